//! The metadata compiler: turns an [`ApiSpec`] into an immutable [`DescriptorTable`].
//!
//! Compilation runs once per client build. Every problem with the description is
//! reported here, before any call can be made:
//!
//! - a parameter without a recognized binding,
//! - more than one body parameter,
//! - an invalid content type,
//! - a URL template without a leading `/`, or whose placeholders and path parameters
//!   do not match one to one,
//! - an invalid header name or value,
//! - a body encoder factory that fails.
//!
//! The resulting table is never mutated, so calls read it without locking.

use crate::api::{ApiSpec, EndpointSpec, PassthroughFn};
use crate::descriptor::{template_placeholders, DefaultHeaders, MediaType, MethodDescriptor};
use crate::error::{Error, Result};
use crate::param::{Binding, ParameterDescriptor};
use http::{HeaderName, HeaderValue};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// Compiled descriptors of one interface, keyed by method name.
#[derive(Clone)]
pub struct DescriptorTable {
    api: String,
    descriptors: HashMap<String, Arc<MethodDescriptor>>,
    passthroughs: HashMap<String, PassthroughFn>,
}

impl DescriptorTable {
    /// The interface name.
    pub fn api(&self) -> &str {
        &self.api
    }

    pub fn get(&self, method: &str) -> Option<&Arc<MethodDescriptor>> {
        self.descriptors.get(method)
    }

    pub(crate) fn passthrough(&self, method: &str) -> Option<&PassthroughFn> {
        self.passthroughs.get(method)
    }

    pub fn is_passthrough(&self, method: &str) -> bool {
        self.passthroughs.contains_key(method)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &Arc<MethodDescriptor>> {
        self.descriptors.values()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

impl fmt::Debug for DescriptorTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut passthroughs: Vec<_> = self.passthroughs.keys().collect();
        passthroughs.sort();
        f.debug_struct("DescriptorTable")
            .field("api", &self.api)
            .field("descriptors", &self.descriptors)
            .field("passthroughs", &passthroughs)
            .finish()
    }
}

/// Compiles every method of `spec`.
///
/// # Errors
///
/// Returns the first configuration error found. No partial table is ever returned.
pub fn compile(spec: ApiSpec) -> Result<DescriptorTable> {
    let ApiSpec {
        name: api,
        headers,
        endpoints,
        passthroughs,
    } = spec;

    let interface_headers = collect_headers(&api, &headers)?;

    let mut descriptors = HashMap::with_capacity(endpoints.len());
    for endpoint in endpoints {
        if descriptors.contains_key(&endpoint.name) {
            return Err(Error::DuplicateMethod {
                method: endpoint.name,
            });
        }
        let descriptor = compile_endpoint(&api, &interface_headers, endpoint)?;
        descriptors.insert(descriptor.name.clone(), Arc::new(descriptor));
    }

    let mut passthrough_table = HashMap::with_capacity(passthroughs.len());
    for (method, handler) in passthroughs {
        if descriptors.contains_key(&method) || passthrough_table.contains_key(&method) {
            return Err(Error::DuplicateMethod { method });
        }
        passthrough_table.insert(method, handler);
    }

    tracing::debug!(
        api = %api,
        descriptors = descriptors.len(),
        passthroughs = passthrough_table.len(),
        "Compiled API description"
    );

    Ok(DescriptorTable {
        api,
        descriptors,
        passthroughs: passthrough_table,
    })
}

fn collect_headers(owner: &str, declared: &[(String, String)]) -> Result<DefaultHeaders> {
    let mut headers = DefaultHeaders::new();
    for (name, value) in declared {
        HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
            Error::ConfigurationError(format!("Invalid header name {:?} on `{}`: {}", name, owner, e))
        })?;
        HeaderValue::from_str(value).map_err(|e| {
            Error::ConfigurationError(format!(
                "Invalid value for header {:?} on `{}`: {}",
                name, owner, e
            ))
        })?;
        headers.insert(name, value.as_str());
    }
    Ok(headers)
}

fn compile_endpoint(
    api: &str,
    interface_headers: &DefaultHeaders,
    endpoint: EndpointSpec,
) -> Result<MethodDescriptor> {
    let EndpointSpec {
        name,
        http_method,
        url,
        content_type,
        headers,
        bindings,
        body_encoder,
        feature,
        response_type,
    } = endpoint;

    if !url.starts_with('/') {
        return Err(Error::MissingLeadingSlash {
            method: name,
            template: url,
        });
    }

    let content_type: MediaType =
        content_type
            .parse()
            .map_err(|e: crate::descriptor::MediaTypeError| Error::InvalidContentType {
                method: name.clone(),
                content_type: content_type.clone(),
                reason: e.to_string(),
            })?;
    if let Err(e) = HeaderValue::from_str(&content_type.to_string()) {
        return Err(Error::InvalidContentType {
            method: name,
            content_type: content_type.to_string(),
            reason: e.to_string(),
        });
    }

    let mut default_headers = interface_headers.clone();
    default_headers.merge(&collect_headers(&name, &headers)?);

    let parameters = compile_parameters(&name, bindings)?;
    check_placeholders(&name, &url, &parameters)?;

    if let Some(feature) = &feature {
        if feature.trim().is_empty() {
            return Err(Error::ConfigurationError(format!(
                "Method `{}` declares an empty feature name",
                name
            )));
        }
    }

    let body_encoder = match body_encoder {
        Some(factory) => Some(factory().map_err(|source| Error::BodyEncoderConstruction {
            method: name.clone(),
            source,
        })?),
        None => None,
    };

    let descriptor = MethodDescriptor {
        name,
        declaring_type: api.to_string(),
        http_method,
        url_template: url,
        content_type,
        parameters,
        default_headers,
        body_encoder,
        feature,
        response_type,
    };

    if !descriptor.carries_body() && descriptor.body_parameter().is_some() {
        tracing::warn!(
            method = %descriptor.name,
            http_method = %descriptor.http_method,
            "Body parameter declared on a method that never sends a body"
        );
    }

    tracing::debug!(
        api = %api,
        method = %descriptor.name,
        http_method = %descriptor.http_method,
        url = %descriptor.url_template,
        content_type = %descriptor.content_type,
        parameters = descriptor.parameters.len(),
        feature = ?descriptor.feature,
        response_type = descriptor.response_type.name(),
        "Compiled method descriptor"
    );

    Ok(descriptor)
}

fn compile_parameters(method: &str, bindings: Vec<Binding>) -> Result<Vec<ParameterDescriptor>> {
    let mut parameters = Vec::with_capacity(bindings.len());
    let mut body_index = None;

    for (index, binding) in bindings.into_iter().enumerate() {
        let parameter = match binding {
            Binding::Path(name) => ParameterDescriptor::Path { index, name },
            Binding::Query(name) => ParameterDescriptor::Query { index, name },
            Binding::Header(name) => {
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                    Error::ConfigurationError(format!(
                        "Invalid header parameter name {:?} on `{}`: {}",
                        name, method, e
                    ))
                })?;
                ParameterDescriptor::Header { index, name }
            }
            Binding::Body => {
                if let Some(first) = body_index {
                    return Err(Error::MultipleBodyParameters {
                        method: method.to_string(),
                        first,
                        second: index,
                    });
                }
                body_index = Some(index);
                ParameterDescriptor::Body { index }
            }
            Binding::Unrecognized(tag) => {
                return Err(Error::UnboundParameter {
                    method: method.to_string(),
                    index,
                    tag,
                })
            }
        };
        parameters.push(parameter);
    }

    Ok(parameters)
}

fn check_placeholders(method: &str, url: &str, parameters: &[ParameterDescriptor]) -> Result<()> {
    let placeholders = template_placeholders(url).map_err(|reason| {
        Error::ConfigurationError(format!("Invalid URL template of `{}`: {}", method, reason))
    })?;

    let mut path_names = BTreeSet::new();
    for parameter in parameters {
        if let ParameterDescriptor::Path { name, .. } = parameter {
            if !path_names.insert(name.as_str()) {
                return Err(Error::ConfigurationError(format!(
                    "Path parameter `{}` of `{}` is bound more than once",
                    name, method
                )));
            }
        }
    }

    if let Some(placeholder) = placeholders
        .iter()
        .find(|placeholder| !path_names.contains(placeholder.as_str()))
    {
        return Err(Error::UnmatchedPlaceholder {
            method: method.to_string(),
            placeholder: placeholder.clone(),
        });
    }

    if let Some(name) = path_names
        .iter()
        .find(|name| !placeholders.contains(**name))
    {
        return Err(Error::OrphanPathParameter {
            method: method.to_string(),
            name: name.to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::EndpointSpec;
    use crate::descriptor::BodyEncoder;
    use http::Method;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Deserialize)]
    struct Item {
        #[allow(dead_code)]
        id: u64,
    }

    fn single(endpoint: EndpointSpec) -> Result<DescriptorTable> {
        compile(ApiSpec::new("ItemsApi").endpoint(endpoint))
    }

    #[test]
    fn test_compiles_full_descriptor() {
        let table = compile(
            ApiSpec::new("ItemsApi")
                .header("X-Client", "inventory")
                .header("accept", "application/json")
                .endpoint(
                    EndpointSpec::put("update_item", "/items/{id}")
                        .content_type("application/merge-patch+json")
                        .header("x-client", "batch")
                        .path("id")
                        .param("query:dry_run")
                        .header_param("x-request-id")
                        .body()
                        .feature("item-updates")
                        .returns::<Item>(),
                ),
        )
        .unwrap();

        let descriptor = table.get("update_item").unwrap();
        assert_eq!(descriptor.declaring_type(), "ItemsApi");
        assert_eq!(descriptor.http_method(), &Method::PUT);
        assert_eq!(descriptor.content_type().essence(), "application/merge-patch+json");
        assert_eq!(descriptor.parameters().len(), 4);
        assert_eq!(descriptor.body_parameter().map(|p| p.index()), Some(3));
        assert_eq!(descriptor.feature(), Some("item-updates"));
        assert!(descriptor.response_type().is::<Item>());
        assert!(descriptor.carries_body());

        let client_values: Vec<_> = descriptor
            .default_headers()
            .get("x-client")
            .unwrap()
            .iter()
            .collect();
        assert_eq!(client_values, vec!["batch", "inventory"]);
    }

    #[test]
    fn test_path_parameters_match_placeholders() {
        let table = single(
            EndpointSpec::get("find", "/users/{user}/items/{id}")
                .path("id")
                .query("filter")
                .path("user"),
        )
        .unwrap();

        let descriptor = table.get("find").unwrap();
        let names: BTreeSet<_> = descriptor
            .parameters()
            .iter()
            .filter(|p| matches!(p, ParameterDescriptor::Path { .. }))
            .filter_map(|p| p.name().map(str::to_string))
            .collect();
        assert_eq!(names, template_placeholders(descriptor.url_template()).unwrap());
    }

    #[test]
    fn test_rejects_unrecognized_binding() {
        let err = single(EndpointSpec::get("find", "/items").query("q").param("cookie:sid"))
            .unwrap_err();
        match err {
            Error::UnboundParameter { method, index, tag } => {
                assert_eq!(method, "find");
                assert_eq!(index, 1);
                assert_eq!(tag, "cookie:sid");
            }
            other => panic!("Expected UnboundParameter, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_second_body() {
        let err = single(EndpointSpec::post("create", "/items").body().query("q").body())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::MultipleBodyParameters {
                first: 0,
                second: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_rejects_bad_content_type() {
        let err = single(EndpointSpec::post("create", "/items").content_type("json")).unwrap_err();
        assert!(matches!(err, Error::InvalidContentType { .. }));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_rejects_placeholder_mismatches() {
        let err = single(EndpointSpec::get("find", "/items/{id}")).unwrap_err();
        assert!(matches!(err, Error::UnmatchedPlaceholder { ref placeholder, .. } if placeholder == "id"));

        let err = single(EndpointSpec::get("find", "/items").path("id")).unwrap_err();
        assert!(matches!(err, Error::OrphanPathParameter { ref name, .. } if name == "id"));

        let err = single(EndpointSpec::get("find", "/items/{id}").path("id").path("id"))
            .unwrap_err();
        assert!(matches!(err, Error::ConfigurationError(_)));
    }

    #[test]
    fn test_rejects_template_without_leading_slash() {
        let err = single(EndpointSpec::get("find", "items/{id}").path("id")).unwrap_err();
        assert!(matches!(err, Error::MissingLeadingSlash { ref template, .. } if template == "items/{id}"));
    }

    #[test]
    fn test_rejects_invalid_headers() {
        let err = compile(
            ApiSpec::new("ItemsApi")
                .header("bad header", "x")
                .endpoint(EndpointSpec::get("find", "/items")),
        )
        .unwrap_err();
        assert!(matches!(err, Error::ConfigurationError(_)));

        let err = single(EndpointSpec::get("find", "/items").header("x-ok", "line\nbreak"))
            .unwrap_err();
        assert!(matches!(err, Error::ConfigurationError(_)));
    }

    #[test]
    fn test_body_encoder_factory_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let table = single(EndpointSpec::post("create", "/items").body().body_encoder(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(BodyEncoder::new(|n: &u32| n + 1))
        }))
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(table.get("create").unwrap().body_encoder().is_some());
    }

    #[test]
    fn test_body_encoder_factory_failure_is_fatal() {
        let err = single(
            EndpointSpec::post("create", "/items")
                .body()
                .body_encoder(|| Err("encoder needs a key".into())),
        )
        .unwrap_err();

        match err {
            Error::BodyEncoderConstruction { method, source } => {
                assert_eq!(method, "create");
                assert_eq!(source.to_string(), "encoder needs a key");
            }
            other => panic!("Expected BodyEncoderConstruction, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_duplicate_methods() {
        let err = compile(
            ApiSpec::new("ItemsApi")
                .endpoint(EndpointSpec::get("find", "/items"))
                .endpoint(EndpointSpec::delete("find", "/items")),
        )
        .unwrap_err();
        assert!(matches!(err, Error::DuplicateMethod { ref method } if method == "find"));

        let err = compile(
            ApiSpec::new("ItemsApi")
                .endpoint(EndpointSpec::get("find", "/items"))
                .passthrough("find", |_args| async {
                    Ok(crate::transport::RawResponse::new(http::StatusCode::OK, ""))
                }),
        )
        .unwrap_err();
        assert!(matches!(err, Error::DuplicateMethod { .. }));
    }

    #[test]
    fn test_passthrough_is_not_compiled() {
        let table = compile(
            ApiSpec::new("ItemsApi")
                .endpoint(EndpointSpec::get("find", "/items"))
                .passthrough("cached", |_args| async {
                    Ok(crate::transport::RawResponse::new(http::StatusCode::OK, "[]"))
                }),
        )
        .unwrap();

        assert_eq!(table.len(), 1);
        assert!(table.get("cached").is_none());
        assert!(table.is_passthrough("cached"));
    }
}
