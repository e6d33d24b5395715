//! The client proxy: the object callers talk to.
//!
//! A [`Client`] is built once from an [`ApiSpec`]. Building compiles every method
//! descriptor and fails fast on any declaration error. Afterwards each
//! [`Client::call`] looks the method up, builds the request, routes it through the
//! feature executor when the method declares a feature, dispatches it and decodes the
//! response.

use crate::api::ApiSpec;
use crate::compiler::{compile, DescriptorTable};
use crate::descriptor::{MethodDescriptor, ResponseType};
use crate::dispatch::Dispatcher;
use crate::encoding::{Arg, EncoderRegistry};
use crate::error::{Error, Result};
use crate::feature::{self, FeatureExecutor, Supplier};
use crate::request::build_request;
use crate::response::Response;
use crate::retry::{RetryOnRetryable, RetryPredicate, RetryStrategy};
use crate::transport::{RawResponse, ReqwestTransport, Transport};
use futures::future::{self, BoxFuture, FutureExt};
use http::{HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// A generated client for one HTTP interface.
///
/// Cloning is cheap and clones share connection pool, descriptors and encoders. Calls
/// may be issued concurrently from any number of tasks.
///
/// # Examples
///
/// ```no_run
/// use declaro::{args, ApiSpec, Client, EndpointSpec};
/// use serde::Deserialize;
///
/// #[derive(Debug, Deserialize)]
/// struct Item {
///     id: u64,
///     name: String,
/// }
///
/// # async fn example() -> Result<(), declaro::Error> {
/// let api = ApiSpec::new("ItemsApi").endpoint(
///     EndpointSpec::get("find_item", "/items/{id}")
///         .path("id")
///         .query("filter")
///         .returns::<Item>(),
/// );
///
/// let client = Client::builder()
///     .base_url("https://api.example.com")?
///     .build(api)?;
///
/// // GET https://api.example.com/items/42?filter=active
/// let item = client.call::<Item>("find_item", args![42, "active"]).await?;
/// println!("{} took {:?}", item.name, item.latency);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    table: DescriptorTable,
    encoders: Arc<EncoderRegistry>,
    dispatcher: Dispatcher,
    feature_executor: Option<Arc<dyn FeatureExecutor>>,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// The interface name.
    pub fn api(&self) -> &str {
        self.inner.table.api()
    }

    /// The compiled descriptor of `method`, if it is routable.
    pub fn descriptor(&self, method: &str) -> Option<&MethodDescriptor> {
        self.inner.table.get(method).map(|d| d.as_ref())
    }

    pub fn descriptors(&self) -> &DescriptorTable {
        &self.inner.table
    }

    /// Calls `method` with `args`, decoding the response body into `R`.
    ///
    /// `R` must be the response type the method declared. The request is sent when the
    /// returned future is first polled; every failure, including argument errors, is
    /// reported through the future.
    ///
    /// # Errors
    ///
    /// - [`Error::DescriptorNotFound`] if the interface has no such method
    /// - [`Error::ResponseTypeMismatch`] if `R` is not the declared response type
    /// - [`Error::ArgumentCount`], [`Error::ArgumentType`] or [`Error::InvalidHeader`]
    ///   if the arguments do not fit the method
    /// - [`Error::FeatureRejected`] if the feature executor refused the call
    /// - [`Error::Dispatch`] for transport failures, non-2xx responses and bodies that
    ///   cannot be serialized or decoded
    pub fn call<R>(&self, method: &str, args: Vec<Arg>) -> BoxFuture<'static, Result<Response<R>>>
    where
        R: DeserializeOwned + Send + 'static,
    {
        let outcome = self.route(method, args, ResponseType::of::<R>());
        let dispatcher = self.inner.dispatcher.clone();
        let method = method.to_string();

        async move {
            let raw = outcome.await?;
            dispatcher.decode::<R>(&method, raw)
        }
        .boxed()
    }

    fn route(
        &self,
        method: &str,
        args: Vec<Arg>,
        requested: ResponseType,
    ) -> BoxFuture<'static, Result<RawResponse>> {
        let Some(descriptor) = self.inner.table.get(method) else {
            if let Some(handler) = self.inner.table.passthrough(method) {
                tracing::debug!(
                    api = %self.api(),
                    method = %method,
                    "Forwarding call to passthrough handler"
                );
                return handler(args);
            }
            return fail(Error::DescriptorNotFound {
                api: self.api().to_string(),
                method: method.to_string(),
            });
        };

        if requested != descriptor.response_type() {
            return fail(Error::ResponseTypeMismatch {
                method: method.to_string(),
                declared: descriptor.response_type().name(),
                requested: requested.name(),
            });
        }

        if args.len() != descriptor.parameters().len() {
            return fail(Error::ArgumentCount {
                method: method.to_string(),
                expected: descriptor.parameters().len(),
                actual: args.len(),
            });
        }

        match (descriptor.feature(), &self.inner.feature_executor) {
            (Some(feature), Some(executor)) => {
                let supplier = self.supplier(descriptor.clone(), args.clone());
                feature::intercept(executor.as_ref(), descriptor, feature, args, supplier)
            }
            _ => self.supplier(descriptor.clone(), args)(),
        }
    }

    fn supplier(&self, descriptor: Arc<MethodDescriptor>, args: Vec<Arg>) -> Supplier {
        let encoders = self.inner.encoders.clone();
        let dispatcher = self.inner.dispatcher.clone();

        Box::new(move || match build_request(&descriptor, &args, &encoders.params) {
            Ok(request) => dispatcher.dispatch(&descriptor, request),
            Err(e) => fail(e),
        })
    }
}

fn fail<T: Send + 'static>(error: Error) -> BoxFuture<'static, Result<T>> {
    future::ready(Err(error)).boxed()
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("table", &self.inner.table)
            .field("encoders", &self.inner.encoders)
            .field("feature_executor", &self.inner.feature_executor.is_some())
            .finish()
    }
}

/// Builder for [`Client`].
///
/// # Examples
///
/// ```no_run
/// use declaro::{ApiSpec, Client, EndpointSpec, FeatureToggles, RetryStrategy};
/// use std::time::Duration;
///
/// # fn example() -> Result<(), declaro::Error> {
/// let api = ApiSpec::new("StatusApi").endpoint(EndpointSpec::get("status", "/status"));
///
/// let client = Client::builder()
///     .base_url("https://api.example.com")?
///     .timeout(Duration::from_secs(10))
///     .retry_strategy(RetryStrategy::Linear {
///         delay: Duration::from_millis(200),
///         max_retries: 2,
///     })
///     .default_header("user-agent", "inventory/1.0")?
///     .param_encoder(|flag: &bool| if *flag { "yes".into() } else { "no".into() })
///     .feature_executor(FeatureToggles::new())
///     .build(api)?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    base_url: Option<Url>,
    default_headers: HeaderMap,
    retry_strategy: RetryStrategy,
    retry_predicate: Option<Box<dyn RetryPredicate>>,
    timeout: Option<Duration>,
    transport: Option<Arc<dyn Transport>>,
    encoders: EncoderRegistry,
    feature_executor: Option<Arc<dyn FeatureExecutor>>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            base_url: None,
            default_headers: HeaderMap::new(),
            retry_strategy: RetryStrategy::None,
            retry_predicate: None,
            timeout: None,
            transport: None,
            encoders: EncoderRegistry::default(),
            feature_executor: None,
        }
    }

    /// Sets the base URL that request paths are appended to.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the URL is invalid or has a query or fragment.
    pub fn base_url(mut self, url: impl AsRef<str>) -> Result<Self> {
        let url = url.as_ref();
        let parsed = Url::parse(url).map_err(|e| {
            Error::ConfigurationError(format!("Invalid base URL {:?}: {}", url, e))
        })?;
        if parsed.query().is_some() || parsed.fragment().is_some() {
            return Err(Error::ConfigurationError(format!(
                "Base URL {:?} must not carry a query or fragment",
                url
            )));
        }
        self.base_url = Some(parsed);
        Ok(self)
    }

    /// Adds a header the transport sends with every request, whatever the method.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn default_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid header value: {}", e)))?;
        self.default_headers.insert(name, value);
        Ok(self)
    }

    pub fn retry_strategy(mut self, strategy: RetryStrategy) -> Self {
        self.retry_strategy = strategy;
        self
    }

    /// Sets which failures are retried. Defaults to [`RetryOnRetryable`].
    pub fn retry_predicate(mut self, predicate: Box<dyn RetryPredicate>) -> Self {
        self.retry_predicate = Some(predicate);
        self
    }

    /// Sets the per-attempt request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Replaces the reqwest transport.
    ///
    /// With a custom transport the base URL, default headers, timeout and retry
    /// settings of this builder are not used.
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Registers how values of type `T` are rendered into path, query and header
    /// parameters. Replaces any previous encoder for `T`.
    pub fn param_encoder<T, F>(mut self, encoder: F) -> Self
    where
        T: 'static,
        F: Fn(&T) -> String + Send + Sync + 'static,
    {
        self.encoders.params.register::<T, F>(encoder);
        self
    }

    /// Registers a custom JSON form for request bodies of type `T`.
    pub fn body_serializer<T, F>(mut self, serializer: F) -> Self
    where
        T: 'static,
        F: Fn(&T) -> serde_json::Value + Send + Sync + 'static,
    {
        self.encoders.body.register_serializer::<T, F>(serializer);
        self
    }

    /// Registers a custom parser for response payloads of type `T`.
    pub fn body_deserializer<T, E, F>(mut self, deserializer: F) -> Self
    where
        T: Send + 'static,
        E: fmt::Display,
        F: Fn(&str) -> std::result::Result<T, E> + Send + Sync + 'static,
    {
        self.encoders.body.register_deserializer::<T, E, F>(deserializer);
        self
    }

    /// Sets the executor that serves methods declaring a feature.
    pub fn feature_executor(mut self, executor: impl FeatureExecutor + 'static) -> Self {
        self.feature_executor = Some(Arc::new(executor));
        self
    }

    /// Compiles `api` and builds the client.
    ///
    /// # Errors
    ///
    /// Returns the first declaration error in `api`, or a configuration error if
    /// neither a base URL nor a custom transport was provided.
    pub fn build(self, api: ApiSpec) -> Result<Client> {
        let table = compile(api)?;

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => {
                let base_url = self
                    .base_url
                    .ok_or_else(|| Error::ConfigurationError("Base URL is required".to_string()))?;
                let retry_predicate = self
                    .retry_predicate
                    .unwrap_or_else(|| Box::new(RetryOnRetryable));
                Arc::new(ReqwestTransport::new(
                    base_url,
                    self.default_headers,
                    self.retry_strategy,
                    retry_predicate,
                    self.timeout,
                )?)
            }
        };

        if self.feature_executor.is_none() {
            for descriptor in table.descriptors() {
                if let Some(feature) = descriptor.feature() {
                    tracing::warn!(
                        api = %table.api(),
                        method = %descriptor.name(),
                        feature = %feature,
                        "No feature executor configured; featured method will be dispatched directly"
                    );
                }
            }
        }

        tracing::debug!(
            api = %table.api(),
            methods = table.len(),
            "Built client"
        );

        let encoders = Arc::new(self.encoders);
        Ok(Client {
            inner: Arc::new(ClientInner {
                dispatcher: Dispatcher::new(transport, encoders.clone()),
                table,
                encoders,
                feature_executor: self.feature_executor,
            }),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("base_url", &self.base_url.as_ref().map(Url::as_str))
            .field("default_headers", &self.default_headers)
            .field("retry_strategy", &self.retry_strategy)
            .field("retry_predicate", &self.retry_predicate.is_some())
            .field("timeout", &self.timeout)
            .field("transport", &self.transport.is_some())
            .field("encoders", &self.encoders)
            .field("feature_executor", &self.feature_executor.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::EndpointSpec;
    use crate::error::TransportError;
    use crate::feature::{FeatureInvocation, FeatureToggles};
    use crate::transport::TransportRequest;
    use http::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Counts requests and echoes the path back as a JSON string.
    #[derive(Default)]
    struct Echo {
        requests: Mutex<Vec<TransportRequest>>,
    }

    impl Transport for Arc<Echo> {
        fn execute(
            &self,
            request: TransportRequest,
        ) -> BoxFuture<'static, std::result::Result<RawResponse, TransportError>> {
            let body = serde_json::Value::String(request.path_and_query.clone()).to_string();
            self.requests.lock().unwrap().push(request);
            future::ready(Ok(RawResponse::new(StatusCode::OK, body))).boxed()
        }
    }

    fn api() -> ApiSpec {
        ApiSpec::new("Catalog")
            .endpoint(
                EndpointSpec::get("find", "/items/{id}")
                    .path("id")
                    .returns::<String>(),
            )
            .endpoint(
                EndpointSpec::get("search", "/search")
                    .query("q")
                    .feature("new-search")
                    .returns::<String>(),
            )
    }

    fn client(echo: &Arc<Echo>, executor: Option<FeatureToggles>) -> Client {
        let builder = Client::builder().transport(echo.clone());
        let builder = match executor {
            Some(executor) => builder.feature_executor(executor),
            None => builder,
        };
        builder.build(api()).unwrap()
    }

    #[tokio::test]
    async fn test_call_builds_and_decodes() {
        let echo = Arc::new(Echo::default());
        let response = client(&echo, None)
            .call::<String>("find", crate::args![42])
            .await
            .unwrap();

        assert_eq!(response.data, "/items/42");
        assert_eq!(echo.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_call_failures_are_lazy_and_typed() {
        let echo = Arc::new(Echo::default());
        let client = client(&echo, None);

        let missing = client.call::<String>("delete", vec![]).await.unwrap_err();
        assert!(matches!(missing, Error::DescriptorNotFound { ref method, .. } if method == "delete"));

        let wrong_type = client.call::<u64>("find", crate::args![1]).await.unwrap_err();
        assert!(matches!(wrong_type, Error::ResponseTypeMismatch { .. }));

        let arity = client.call::<String>("find", vec![]).await.unwrap_err();
        assert!(matches!(arity, Error::ArgumentCount { expected: 1, actual: 0, .. }));

        assert!(echo.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_featured_method_without_executor_dispatches() {
        let echo = Arc::new(Echo::default());
        let response = client(&echo, None)
            .call::<String>("search", crate::args!["lamp"])
            .await
            .unwrap();

        assert_eq!(response.data, "/search?q=lamp");
    }

    #[tokio::test]
    async fn test_executor_sees_invocation_once() {
        struct Spy(Arc<AtomicUsize>, Arc<Mutex<Option<FeatureInvocation>>>);

        impl FeatureExecutor for Spy {
            fn execute(
                &self,
                _feature: &str,
                invocation: FeatureInvocation,
                supplier: Supplier,
            ) -> BoxFuture<'static, Result<RawResponse>> {
                self.0.fetch_add(1, Ordering::SeqCst);
                *self.1.lock().unwrap() = Some(invocation);
                supplier()
            }
        }

        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(None));
        let echo = Arc::new(Echo::default());
        let client = Client::builder()
            .transport(echo.clone())
            .feature_executor(Spy(calls.clone(), seen.clone()))
            .build(api())
            .unwrap();

        client.call::<String>("find", crate::args![1]).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let response = client
            .call::<String>("search", crate::args!["desk"])
            .await
            .unwrap();
        assert_eq!(response.data, "/search?q=desk");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let invocation = seen.lock().unwrap().take().unwrap();
        assert_eq!(invocation.feature, "new-search");
        assert_eq!(invocation.method, "search");
        assert_eq!(invocation.declaring_type, "Catalog");
        assert_eq!(invocation.arguments[0].to_text(), "desk");
        assert!(invocation.response_type.is::<String>());
    }

    #[tokio::test]
    async fn test_stubbed_feature_skips_transport() {
        let echo = Arc::new(Echo::default());
        let toggles = FeatureToggles::new()
            .stub("new-search", RawResponse::new(StatusCode::OK, "\"stubbed\""));

        let response = client(&echo, Some(toggles))
            .call::<String>("search", crate::args!["lamp"])
            .await
            .unwrap();

        assert_eq!(response.data, "stubbed");
        assert!(echo.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_substituted_failure_status_is_an_error() {
        let echo = Arc::new(Echo::default());
        let toggles = FeatureToggles::new()
            .stub("new-search", RawResponse::new(StatusCode::SERVICE_UNAVAILABLE, "down"));
        let api = api().passthrough("legacy", |_args: Vec<Arg>| async move {
            Ok(RawResponse::new(StatusCode::NOT_FOUND, "missing"))
        });
        let client = Client::builder()
            .transport(echo.clone())
            .feature_executor(toggles)
            .build(api)
            .unwrap();

        let stubbed = client
            .call::<String>("search", crate::args!["lamp"])
            .await
            .unwrap_err();
        assert_eq!(stubbed.status(), Some(StatusCode::SERVICE_UNAVAILABLE));
        assert_eq!(stubbed.transport_error().unwrap().raw_response(), Some("down"));

        let forwarded = client.call::<String>("legacy", vec![]).await.unwrap_err();
        assert!(matches!(&forwarded, Error::Dispatch { method, .. } if method == "legacy"));
        assert_eq!(forwarded.status(), Some(StatusCode::NOT_FOUND));

        assert!(echo.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_passthrough_forwards_arguments() {
        let echo = Arc::new(Echo::default());
        let api = api().passthrough("describe", |args: Vec<Arg>| async move {
            Ok(RawResponse::new(
                StatusCode::OK,
                serde_json::json!(format!("{} args", args.len())).to_string(),
            ))
        });
        let client = Client::builder().transport(echo.clone()).build(api).unwrap();

        let response = client
            .call::<String>("describe", crate::args![1, 2])
            .await
            .unwrap();

        assert_eq!(response.data, "2 args");
        assert!(client.descriptor("describe").is_none());
        assert!(echo.requests.lock().unwrap().is_empty());
    }

    #[test]
    fn test_build_requires_base_url_or_transport() {
        let err = Client::builder().build(api()).unwrap_err();
        assert!(err.is_configuration());

        let err = Client::builder().base_url("not a url").unwrap_err();
        assert!(matches!(err, Error::ConfigurationError(_)));

        let err = Client::builder()
            .base_url("https://api.example.com/?key=1")
            .unwrap_err();
        assert!(matches!(err, Error::ConfigurationError(_)));

        let err = Client::builder()
            .base_url("https://api.example.com/v1#top")
            .unwrap_err();
        assert!(matches!(err, Error::ConfigurationError(_)));

        let builder = Client::builder().base_url("https://api.example.com/v1").unwrap();
        assert!(format!("{:?}", builder).contains("https://api.example.com/v1"));
    }
}
