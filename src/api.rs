//! The declarative description of an HTTP interface.
//!
//! An [`ApiSpec`] names an interface and lists its methods. Each routable method is an
//! [`EndpointSpec`] carrying its verb, URL template, content type, headers, parameter
//! bindings, optional body encoder, optional feature name and response type. Methods
//! that are not HTTP calls can be registered as passthroughs; they are forwarded to a
//! handler instead of being compiled.
//!
//! ```
//! use declaro::{ApiSpec, BodyEncoder, EndpointSpec};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct Item {
//!     id: u64,
//!     name: String,
//! }
//!
//! let api = ApiSpec::new("ItemsApi")
//!     .header("x-client", "inventory")
//!     .endpoint(
//!         EndpointSpec::get("find_item", "/items/{id}")
//!             .path("id")
//!             .query("filter")
//!             .returns::<Item>(),
//!     )
//!     .endpoint(
//!         EndpointSpec::post("create_item", "/items")
//!             .header_param("x-request-id")
//!             .body()
//!             .body_encoder(|| Ok(BodyEncoder::new(|item: &Item| item.name.trim().to_string())))
//!             .feature("item-creation")
//!             .returns::<Item>(),
//!     );
//!
//! assert_eq!(api.name(), "ItemsApi");
//! ```

use crate::descriptor::{BodyEncoder, ResponseType, APPLICATION_JSON};
use crate::encoding::Arg;
use crate::error::{BoxError, Result};
use crate::param::Binding;
use crate::transport::RawResponse;
use futures::future::{BoxFuture, FutureExt};
use http::Method;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Handler invoked for a method that has no HTTP descriptor.
pub type PassthroughFn =
    Arc<dyn Fn(Vec<Arg>) -> BoxFuture<'static, Result<RawResponse>> + Send + Sync>;

type EncoderFactory = Box<dyn FnOnce() -> std::result::Result<BodyEncoder, BoxError> + Send>;

/// Description of one interface: its name, interface-wide headers and methods.
pub struct ApiSpec {
    pub(crate) name: String,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) endpoints: Vec<EndpointSpec>,
    pub(crate) passthroughs: Vec<(String, PassthroughFn)>,
}

impl ApiSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            headers: Vec::new(),
            endpoints: Vec::new(),
            passthroughs: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declares a header sent by every method of the interface.
    ///
    /// Repeatable; declaring the same name twice keeps both values.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Adds a routable method.
    pub fn endpoint(mut self, endpoint: EndpointSpec) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    /// Adds a method that is not an HTTP call.
    ///
    /// Calls to it are forwarded, arguments unchanged, to `handler`, and the handler's
    /// response is decoded like any other.
    pub fn passthrough<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Vec<Arg>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<RawResponse>> + Send + 'static,
    {
        let handler: PassthroughFn = Arc::new(move |args| handler(args).boxed());
        self.passthroughs.push((name.into(), handler));
        self
    }
}

impl fmt::Debug for ApiSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let passthroughs: Vec<_> = self.passthroughs.iter().map(|(name, _)| name).collect();
        f.debug_struct("ApiSpec")
            .field("name", &self.name)
            .field("headers", &self.headers)
            .field("endpoints", &self.endpoints)
            .field("passthroughs", &passthroughs)
            .finish()
    }
}

/// Description of one routable method.
pub struct EndpointSpec {
    pub(crate) name: String,
    pub(crate) http_method: Method,
    pub(crate) url: String,
    pub(crate) content_type: String,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) bindings: Vec<Binding>,
    pub(crate) body_encoder: Option<EncoderFactory>,
    pub(crate) feature: Option<String>,
    pub(crate) response_type: ResponseType,
}

impl EndpointSpec {
    /// Describes a method called `name` that sends `http_method` to `url`.
    ///
    /// The URL template must start with `/` and may contain `{name}` placeholders, each
    /// bound by exactly one path parameter.
    pub fn new(name: impl Into<String>, http_method: Method, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            http_method,
            url: url.into(),
            content_type: APPLICATION_JSON.to_string(),
            headers: Vec::new(),
            bindings: Vec::new(),
            body_encoder: None,
            feature: None,
            response_type: ResponseType::of::<serde_json::Value>(),
        }
    }

    pub fn get(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(name, Method::GET, url)
    }

    pub fn post(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(name, Method::POST, url)
    }

    pub fn put(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(name, Method::PUT, url)
    }

    pub fn patch(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(name, Method::PATCH, url)
    }

    pub fn delete(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(name, Method::DELETE, url)
    }

    /// Sets the content type. Defaults to `application/json`.
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Declares a header sent on every call of this method. Repeatable.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Declares the next parameter with an explicit binding.
    pub fn bind(mut self, binding: Binding) -> Self {
        self.bindings.push(binding);
        self
    }

    /// Declares the next parameter from a binding tag: `path:<name>`, `query:<name>`,
    /// `header:<name>` or `body`.
    pub fn param(self, tag: &str) -> Self {
        self.bind(Binding::parse(tag))
    }

    /// Declares the next parameter as the URL placeholder `{name}`.
    pub fn path(self, name: impl Into<String>) -> Self {
        self.bind(Binding::Path(name.into()))
    }

    /// Declares the next parameter as the query parameter `name`.
    pub fn query(self, name: impl Into<String>) -> Self {
        self.bind(Binding::Query(name.into()))
    }

    /// Declares the next parameter as the request header `name`.
    pub fn header_param(self, name: impl Into<String>) -> Self {
        self.bind(Binding::Header(name.into()))
    }

    /// Declares the next parameter as the request body.
    pub fn body(self) -> Self {
        self.bind(Binding::Body)
    }

    /// Sets the factory of this method's body encoder.
    ///
    /// The factory runs exactly once, when the client is built. If it fails the client
    /// is not built.
    pub fn body_encoder<F>(mut self, factory: F) -> Self
    where
        F: FnOnce() -> std::result::Result<BodyEncoder, BoxError> + Send + 'static,
    {
        self.body_encoder = Some(Box::new(factory));
        self
    }

    /// Routes calls of this method through the feature executor under `feature`.
    pub fn feature(mut self, feature: impl Into<String>) -> Self {
        self.feature = Some(feature.into());
        self
    }

    /// Declares the payload type the response body is decoded into.
    ///
    /// Defaults to `serde_json::Value`.
    pub fn returns<T: 'static>(mut self) -> Self {
        self.response_type = ResponseType::of::<T>();
        self
    }
}

impl fmt::Debug for EndpointSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointSpec")
            .field("name", &self.name)
            .field("http_method", &self.http_method)
            .field("url", &self.url)
            .field("content_type", &self.content_type)
            .field("headers", &self.headers)
            .field("bindings", &self.bindings)
            .field("body_encoder", &self.body_encoder.is_some())
            .field("feature", &self.feature)
            .field("response_type", &self.response_type.name())
            .finish()
    }
}
