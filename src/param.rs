//! Parameter binding roles.

use std::fmt;
use std::hash::{Hash, Hasher};

/// The binding role declared for one method parameter, before it is given a position.
///
/// A binding is either built directly (`Binding::Path("id".into())`) or parsed from a
/// tag such as `"path:id"`, `"query:filter"`, `"header:x-trace"` or `"body"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    /// Substitutes into the URL template placeholder `{name}`.
    Path(String),
    /// Appended to the query string as `name=value`.
    Query(String),
    /// Sent as a request header.
    Header(String),
    /// Supplies the request payload.
    Body,
    /// A tag that names no known role. Compiling a method that carries one fails.
    Unrecognized(String),
}

impl Binding {
    /// Parses a binding tag.
    ///
    /// Unknown roles and empty names produce [`Binding::Unrecognized`] rather than an
    /// error so that the compiler can report them together with the method and index.
    ///
    /// ```
    /// use declaro::Binding;
    ///
    /// assert_eq!(Binding::parse("path:id"), Binding::Path("id".to_string()));
    /// assert_eq!(Binding::parse("body"), Binding::Body);
    /// assert!(matches!(Binding::parse("cookie:sid"), Binding::Unrecognized(_)));
    /// ```
    pub fn parse(tag: &str) -> Self {
        let tag = tag.trim();
        if tag == "body" {
            return Binding::Body;
        }

        match tag.split_once(':') {
            Some((role, name)) if !name.trim().is_empty() => {
                let name = name.trim().to_string();
                match role.trim() {
                    "path" => Binding::Path(name),
                    "query" => Binding::Query(name),
                    "header" => Binding::Header(name),
                    _ => Binding::Unrecognized(tag.to_string()),
                }
            }
            _ => Binding::Unrecognized(tag.to_string()),
        }
    }
}

/// A compiled parameter binding: its role, its position in the argument list and,
/// for named roles, the binding name.
///
/// Two descriptors are equal when they describe the same position; the role and name
/// do not take part in equality or hashing.
#[derive(Debug, Clone)]
pub enum ParameterDescriptor {
    /// Replaces `{name}` in the URL template.
    Path {
        /// Zero-based argument position
        index: usize,
        /// Placeholder name
        name: String,
    },
    /// Adds `name=value` to the query string.
    Query {
        /// Zero-based argument position
        index: usize,
        /// Query parameter name
        name: String,
    },
    /// Adds a request header.
    Header {
        /// Zero-based argument position
        index: usize,
        /// Header name
        name: String,
    },
    /// The request payload.
    Body {
        /// Zero-based argument position
        index: usize,
    },
}

impl ParameterDescriptor {
    /// The argument position this descriptor reads.
    pub fn index(&self) -> usize {
        match self {
            ParameterDescriptor::Path { index, .. }
            | ParameterDescriptor::Query { index, .. }
            | ParameterDescriptor::Header { index, .. }
            | ParameterDescriptor::Body { index } => *index,
        }
    }

    /// The binding name, absent for the body.
    pub fn name(&self) -> Option<&str> {
        match self {
            ParameterDescriptor::Path { name, .. }
            | ParameterDescriptor::Query { name, .. }
            | ParameterDescriptor::Header { name, .. } => Some(name),
            ParameterDescriptor::Body { .. } => None,
        }
    }

    pub fn is_body(&self) -> bool {
        matches!(self, ParameterDescriptor::Body { .. })
    }
}

impl PartialEq for ParameterDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.index() == other.index()
    }
}

impl Eq for ParameterDescriptor {}

impl Hash for ParameterDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index().hash(state);
    }
}

impl fmt::Display for ParameterDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterDescriptor::Path { index, name } => write!(f, "#{index} path:{name}"),
            ParameterDescriptor::Query { index, name } => write!(f, "#{index} query:{name}"),
            ParameterDescriptor::Header { index, name } => write!(f, "#{index} header:{name}"),
            ParameterDescriptor::Body { index } => write!(f, "#{index} body"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_parse_tags() {
        assert_eq!(Binding::parse("query: filter "), Binding::Query("filter".to_string()));
        assert_eq!(Binding::parse("header:X-Trace"), Binding::Header("X-Trace".to_string()));
        assert_eq!(
            Binding::parse("path:"),
            Binding::Unrecognized("path:".to_string())
        );
        assert_eq!(Binding::parse(""), Binding::Unrecognized(String::new()));
    }

    #[test]
    fn test_equality_is_by_index() {
        let path = ParameterDescriptor::Path {
            index: 1,
            name: "id".to_string(),
        };
        let body = ParameterDescriptor::Body { index: 1 };
        let query = ParameterDescriptor::Query {
            index: 2,
            name: "id".to_string(),
        };

        assert_eq!(path, body);
        assert_ne!(path, query);

        let set: HashSet<_> = [path, body, query].into_iter().collect();
        assert_eq!(set.len(), 2);
    }
}
