//! Compiled, immutable per-method routing plans.
//!
//! A [`MethodDescriptor`] is produced once by the [compiler](crate::compiler) for every
//! routable method and never changes afterwards. Everything a call needs besides its
//! argument values lives here.

use crate::encoding::Arg;
use crate::param::ParameterDescriptor;
use http::Method;
use serde::Serialize;
use std::any::TypeId;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// The default content type of every method.
pub const APPLICATION_JSON: &str = "application/json";

/// A parsed media type such as `application/json; charset=utf-8`.
///
/// Type, subtype and parameter names are case-insensitive and stored in lower case.
///
/// ```
/// use declaro::MediaType;
///
/// let media: MediaType = "Application/Problem+JSON; charset=utf-8".parse().unwrap();
/// assert_eq!(media.essence(), "application/problem+json");
/// assert!(media.is_json());
/// assert_eq!(media.param("charset"), Some("utf-8"));
///
/// assert!("application".parse::<MediaType>().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaType {
    kind: String,
    subtype: String,
    params: Vec<(String, String)>,
}

/// Why a string is not a valid media type.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct MediaTypeError(String);

impl MediaType {
    /// `type/subtype` without parameters.
    pub fn essence(&self) -> String {
        format!("{}/{}", self.kind, self.subtype)
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn subtype(&self) -> &str {
        &self.subtype
    }

    /// Looks up a parameter by (case-insensitive) name.
    pub fn param(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.params
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }

    /// `application/json` and any `+json` structured syntax suffix.
    pub fn is_json(&self) -> bool {
        self.subtype == "json" || self.subtype.ends_with("+json")
    }

    pub fn is_text(&self) -> bool {
        self.kind == "text"
    }

    pub fn is_form(&self) -> bool {
        self.kind == "application" && self.subtype == "x-www-form-urlencoded"
    }
}

fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes().all(|b| {
            b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
        })
}

impl FromStr for MediaType {
    type Err = MediaTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(';');
        let essence = parts.next().unwrap_or_default().trim();

        let (kind, subtype) = essence
            .split_once('/')
            .ok_or_else(|| MediaTypeError(format!("missing '/' in {:?}", essence)))?;
        if !is_token(kind) || !is_token(subtype) {
            return Err(MediaTypeError(format!(
                "{:?} is not a valid type/subtype pair",
                essence
            )));
        }

        let mut params = Vec::new();
        for param in parts {
            let param = param.trim();
            let (name, value) = param
                .split_once('=')
                .ok_or_else(|| MediaTypeError(format!("parameter {:?} has no value", param)))?;
            let (name, value) = (name.trim(), value.trim());
            if !is_token(name) {
                return Err(MediaTypeError(format!("invalid parameter name {:?}", name)));
            }

            let value = match value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
                Some(quoted) => quoted.to_string(),
                None if is_token(value) => value.to_string(),
                None => {
                    return Err(MediaTypeError(format!(
                        "invalid value {:?} for parameter {:?}",
                        value, name
                    )))
                }
            };
            params.push((name.to_ascii_lowercase(), value));
        }

        Ok(Self {
            kind: kind.to_ascii_lowercase(),
            subtype: subtype.to_ascii_lowercase(),
            params,
        })
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.subtype)?;
        for (name, value) in &self.params {
            if is_token(value) {
                write!(f, "; {}={}", name, value)?;
            } else {
                write!(f, "; {}=\"{}\"", name, value)?;
            }
        }
        Ok(())
    }
}

/// The payload type a method's response body is decoded into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseType {
    id: TypeId,
    name: &'static str,
}

impl ResponseType {
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is<T: 'static>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }
}

/// Multi-valued default headers: header name to the set of its values.
///
/// Names are stored in lower case, so declarations that differ only in case merge.
/// Values are deduplicated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefaultHeaders {
    headers: BTreeMap<String, BTreeSet<String>>,
}

impl DefaultHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.headers
            .entry(name.to_ascii_lowercase())
            .or_default()
            .insert(value.into());
    }

    /// Adds every value of `other`.
    pub fn merge(&mut self, other: &DefaultHeaders) {
        for (name, values) in &other.headers {
            self.headers
                .entry(name.clone())
                .or_default()
                .extend(values.iter().cloned());
        }
    }

    pub fn get(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.headers.get(&name.to_ascii_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.headers.iter().map(|(name, values)| (name.as_str(), values))
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }
}

type EncodeBodyFn = Arc<dyn Fn(&Arg) -> Option<Arg> + Send + Sync>;

/// A per-method transformation applied to the body argument before serialization.
///
/// ```
/// use declaro::{Arg, BodyEncoder};
///
/// let encoder = BodyEncoder::new(|name: &String| name.to_uppercase());
///
/// let encoded = encoder.encode(&Arg::new("quiet".to_string())).unwrap();
/// assert_eq!(encoded.to_text(), "QUIET");
/// assert!(encoder.encode(&Arg::new(3)).is_none());
/// ```
#[derive(Clone)]
pub struct BodyEncoder {
    accepts: &'static str,
    encode: EncodeBodyFn,
}

impl BodyEncoder {
    /// Creates an encoder from a function over the body's declared type `T`.
    pub fn new<T, U, F>(encoder: F) -> Self
    where
        T: 'static,
        U: Serialize + fmt::Debug + Send + Sync + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        Self {
            accepts: std::any::type_name::<T>(),
            encode: Arc::new(move |arg: &Arg| arg.downcast_ref::<T>().map(|v| Arg::new(encoder(v)))),
        }
    }

    /// The name of the type this encoder accepts.
    pub fn accepts(&self) -> &'static str {
        self.accepts
    }

    /// Encodes `body`, or returns `None` if it is not of the accepted type.
    pub fn encode(&self, body: &Arg) -> Option<Arg> {
        (self.encode)(body)
    }
}

impl fmt::Debug for BodyEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyEncoder")
            .field("accepts", &self.accepts)
            .finish()
    }
}

/// The compiled plan for one routable method.
#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    pub(crate) name: String,
    pub(crate) declaring_type: String,
    pub(crate) http_method: Method,
    pub(crate) url_template: String,
    pub(crate) content_type: MediaType,
    pub(crate) parameters: Vec<ParameterDescriptor>,
    pub(crate) default_headers: DefaultHeaders,
    pub(crate) body_encoder: Option<BodyEncoder>,
    pub(crate) feature: Option<String>,
    pub(crate) response_type: ResponseType,
}

impl MethodDescriptor {
    /// The method's name; the key it is looked up by.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The name of the interface declaring the method.
    pub fn declaring_type(&self) -> &str {
        &self.declaring_type
    }

    pub fn http_method(&self) -> &Method {
        &self.http_method
    }

    pub fn url_template(&self) -> &str {
        &self.url_template
    }

    pub fn content_type(&self) -> &MediaType {
        &self.content_type
    }

    /// Parameter descriptors in declaration order.
    pub fn parameters(&self) -> &[ParameterDescriptor] {
        &self.parameters
    }

    /// Interface-level and method-level header declarations, merged.
    pub fn default_headers(&self) -> &DefaultHeaders {
        &self.default_headers
    }

    pub fn body_encoder(&self) -> Option<&BodyEncoder> {
        self.body_encoder.as_ref()
    }

    pub fn feature(&self) -> Option<&str> {
        self.feature.as_deref()
    }

    pub fn response_type(&self) -> ResponseType {
        self.response_type
    }

    /// POST, PUT and PATCH requests carry a body; nothing else does.
    pub fn carries_body(&self) -> bool {
        self.http_method == Method::POST
            || self.http_method == Method::PUT
            || self.http_method == Method::PATCH
    }

    pub fn body_parameter(&self) -> Option<&ParameterDescriptor> {
        self.parameters.iter().find(|p| p.is_body())
    }
}

/// Extracts the `{name}` placeholders of a URL template.
pub(crate) fn template_placeholders(template: &str) -> Result<BTreeSet<String>, String> {
    let mut placeholders = BTreeSet::new();
    let mut rest = template;

    while let Some(open) = rest.find(|c| c == '{' || c == '}') {
        if rest[open..].starts_with('}') {
            return Err(format!("unbalanced '}}' in {:?}", template));
        }
        let after = &rest[open + 1..];
        let close = after
            .find('}')
            .ok_or_else(|| format!("unclosed '{{' in {:?}", template))?;
        let name = &after[..close];
        if name.is_empty() || name.contains('{') {
            return Err(format!("malformed placeholder in {:?}", template));
        }
        placeholders.insert(name.to_string());
        rest = &after[close + 1..];
    }

    Ok(placeholders)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_type_parsing() {
        let media: MediaType = "text/plain;charset=\"utf-8\"".parse().unwrap();
        assert!(media.is_text());
        assert_eq!(media.param("Charset"), Some("utf-8"));
        assert_eq!(media.to_string(), "text/plain; charset=utf-8");

        for bad in ["", "json", "application/", "/json", "application/json; charset", "a b/c"] {
            assert!(bad.parse::<MediaType>().is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn test_header_merge_deduplicates() {
        let mut interface = DefaultHeaders::new();
        interface.insert("X-Client", "demo");
        interface.insert("accept", "application/json");

        let mut method = DefaultHeaders::new();
        method.insert("x-client", "demo");
        method.insert("X-CLIENT", "batch");

        interface.merge(&method);
        let values: Vec<_> = interface.get("x-client").unwrap().iter().collect();
        assert_eq!(values, vec!["batch", "demo"]);
        assert_eq!(interface.len(), 2);
    }

    #[test]
    fn test_template_placeholders() {
        let names = template_placeholders("/users/{user}/items/{id}/{id}").unwrap();
        assert_eq!(names.into_iter().collect::<Vec<_>>(), vec!["id", "user"]);

        assert!(template_placeholders("/items").unwrap().is_empty());
        assert!(template_placeholders("/items/{id").is_err());
        assert!(template_placeholders("/items/{}").is_err());
        assert!(template_placeholders("/items/id}").is_err());
    }

    #[test]
    fn test_body_encoder_checks_type() {
        let encoder = BodyEncoder::new(|n: &u32| n * 2);
        let encoded = encoder.encode(&Arg::new(21u32)).unwrap();
        assert_eq!(encoded.to_text(), "42");
        assert!(encoder.encode(&Arg::new("21")).is_none());
    }
}
