//! The request builder: descriptor plus argument values in, outbound request out.
//!
//! Building is pure: no I/O happens here. The URL is assembled in two steps:
//!
//! 1. Query parameters are appended in declaration order, form-urlencoded, the first
//!    preceded by `?` and the rest separated by `&`. A `null` argument (for example
//!    `None`) omits its query parameter.
//! 2. Every `{name}` placeholder is replaced by its path parameter's encoded value.
//!    Characters that would change the structure of the path (`/`, `?`, `#`, `%`,
//!    whitespace and anything outside ASCII) are percent-encoded.
//!
//! Because query values are form-urlencoded before path substitution runs, a query
//! value can never be mistaken for a placeholder.
//!
//! Headers are the descriptor's default headers first, then header parameters. A
//! header parameter whose name is already present adds a value rather than replacing
//! it. The body is attached only for POST, PUT and PATCH.

use crate::descriptor::{MediaType, MethodDescriptor};
use crate::encoding::{Arg, ParamEncoders};
use crate::error::{Error, Result};
use crate::param::ParameterDescriptor;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use std::fmt::Write as _;

/// A fully specified request, ready for the dispatcher.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    /// Path and query string, starting with `/`.
    pub path_and_query: String,
    pub content_type: MediaType,
    pub headers: HeaderMap,
    /// The (already encoded) body argument.
    pub body: Option<Arg>,
}

impl OutboundRequest {
    /// The path without the query string.
    pub fn path(&self) -> &str {
        self.path_and_query
            .split_once('?')
            .map_or(self.path_and_query.as_str(), |(path, _)| path)
    }

    /// The query string without the leading `?`.
    pub fn query(&self) -> Option<&str> {
        self.path_and_query.split_once('?').map(|(_, query)| query)
    }
}

/// Builds the request for one call.
///
/// # Errors
///
/// Fails when the argument count does not match the descriptor, when the body is not
/// of the type its encoder accepts, or when a header parameter encodes to an illegal
/// header value.
pub fn build_request(
    descriptor: &MethodDescriptor,
    args: &[Arg],
    encoders: &ParamEncoders,
) -> Result<OutboundRequest> {
    if args.len() != descriptor.parameters().len() {
        return Err(Error::ArgumentCount {
            method: descriptor.name().to_string(),
            expected: descriptor.parameters().len(),
            actual: args.len(),
        });
    }

    let path_and_query = build_url(descriptor, args, encoders);
    let headers = build_headers(descriptor, args, encoders)?;
    let body = build_body(descriptor, args)?;

    tracing::debug!(
        method = descriptor.name(),
        http_method = %descriptor.http_method(),
        path = %path_and_query,
        headers = headers.len(),
        has_body = body.is_some(),
        "Built request"
    );

    Ok(OutboundRequest {
        method: descriptor.http_method().clone(),
        path_and_query,
        content_type: descriptor.content_type().clone(),
        headers,
        body,
    })
}

fn build_url(descriptor: &MethodDescriptor, args: &[Arg], encoders: &ParamEncoders) -> String {
    let mut url = descriptor.url_template().to_string();

    let mut query = url::form_urlencoded::Serializer::new(String::new());
    let mut has_query = false;
    for parameter in descriptor.parameters() {
        if let ParameterDescriptor::Query { index, name } = parameter {
            let arg = &args[*index];
            if arg.is_null() {
                continue;
            }
            query.append_pair(name, &encoders.encode(arg));
            has_query = true;
        }
    }
    if has_query {
        url.push('?');
        url.push_str(&query.finish());
    }

    for parameter in descriptor.parameters() {
        if let ParameterDescriptor::Path { index, name } = parameter {
            let value = escape_path_value(&encoders.encode(&args[*index]));
            url = url.replace(&format!("{{{}}}", name), &value);
        }
    }

    url
}

fn escape_path_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for byte in value.bytes() {
        let keep = byte.is_ascii_alphanumeric() || b"-._~!$&'()*+,;=:@".contains(&byte);
        if keep {
            escaped.push(byte as char);
        } else {
            let _ = write!(escaped, "%{:02X}", byte);
        }
    }
    escaped
}

fn build_headers(
    descriptor: &MethodDescriptor,
    args: &[Arg],
    encoders: &ParamEncoders,
) -> Result<HeaderMap> {
    let invalid = |name: &str, reason: String| Error::InvalidHeader {
        method: descriptor.name().to_string(),
        name: name.to_string(),
        reason,
    };

    let mut headers = HeaderMap::new();
    for (name, values) in descriptor.default_headers().iter() {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(name, e.to_string()))?;
        for value in values {
            let value = HeaderValue::from_str(value).map_err(|e| invalid(name, e.to_string()))?;
            headers.append(header_name.clone(), value);
        }
    }

    for parameter in descriptor.parameters() {
        if let ParameterDescriptor::Header { index, name } = parameter {
            let arg = &args[*index];
            if arg.is_null() {
                continue;
            }
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(name, e.to_string()))?;
            let value = HeaderValue::from_str(&encoders.encode(arg))
                .map_err(|e| invalid(name, e.to_string()))?;
            headers.append(header_name, value);
        }
    }

    Ok(headers)
}

fn build_body(descriptor: &MethodDescriptor, args: &[Arg]) -> Result<Option<Arg>> {
    if !descriptor.carries_body() {
        return Ok(None);
    }
    let Some(index) = descriptor.body_parameter().map(ParameterDescriptor::index) else {
        return Ok(None);
    };

    let body = &args[index];
    match descriptor.body_encoder() {
        Some(encoder) => encoder
            .encode(body)
            .map(Some)
            .ok_or_else(|| Error::ArgumentType {
                method: descriptor.name().to_string(),
                index,
                expected: encoder.accepts(),
                actual: body.type_name(),
            }),
        None => Ok(Some(body.clone())),
    }
}
