//! Error types for binding and calling declarative clients.
//!
//! Errors fall into three groups:
//!
//! - **Configuration errors** are raised while a client is being built. They mean the
//!   API description is broken and no client is ever returned.
//! - **Call errors** are raised when a single call cannot be turned into a request
//!   (unknown method, wrong argument count or type, invalid header value).
//! - **Dispatch errors** wrap whatever went wrong in the transport or while decoding the
//!   response. The original [`TransportError`] is preserved as the error source.
//!
//! Call and dispatch errors are always delivered through the call's future, never
//! raised synchronously.

use http::{HeaderMap, StatusCode};

/// Boxed error used for failures coming from user-supplied code.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The main error type of the crate.
///
/// # Examples
///
/// ```no_run
/// use declaro::{args, ApiSpec, Client, EndpointSpec, Error};
///
/// # async fn example() -> Result<(), Error> {
/// let api = ApiSpec::new("StatusApi")
///     .endpoint(EndpointSpec::get("status", "/status").returns::<serde_json::Value>());
///
/// let client = Client::builder()
///     .base_url("https://api.example.com")?
///     .build(api)?;
///
/// match client.call::<serde_json::Value>("status", args![]).await {
///     Ok(response) => println!("Status: {}", response.data),
///     Err(Error::Dispatch { source, .. }) => {
///         eprintln!("Transport failed: {}", source);
///         if let Some(body) = source.raw_response() {
///             eprintln!("  Raw response: {}", body);
///         }
///     }
///     Err(e) => eprintln!("Call failed: {}", e),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Invalid client configuration (base URL, client-wide headers, HTTP client setup).
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// A parameter was declared with a binding tag that is not `path:`, `query:`,
    /// `header:` or `body`.
    #[error("Parameter {index} of `{method}` has no recognized binding: {tag:?}")]
    UnboundParameter {
        /// The method declaring the parameter
        method: String,
        /// Zero-based parameter position
        index: usize,
        /// The tag as written
        tag: String,
    },

    /// A method declares more than one body parameter.
    #[error("Method `{method}` declares more than one body parameter (at {first} and {second})")]
    MultipleBodyParameters {
        /// The offending method
        method: String,
        /// Index of the first body parameter
        first: usize,
        /// Index of the second body parameter
        second: usize,
    },

    /// The declared content type is not a valid media type.
    #[error("Method `{method}` declares an invalid content type {content_type:?}: {reason}")]
    InvalidContentType {
        /// The offending method
        method: String,
        /// The content type as written
        content_type: String,
        /// Why parsing failed
        reason: String,
    },

    /// The URL template references a placeholder no path parameter binds.
    #[error("URL template of `{method}` uses {{{placeholder}}} but no path parameter binds it")]
    UnmatchedPlaceholder {
        /// The offending method
        method: String,
        /// The placeholder name, without braces
        placeholder: String,
    },

    /// A path parameter names a placeholder that is absent from the URL template.
    #[error("Path parameter `{name}` of `{method}` does not appear in the URL template")]
    OrphanPathParameter {
        /// The offending method
        method: String,
        /// The path parameter name
        name: String,
    },

    /// A URL template does not start with `/`.
    #[error("URL template of `{method}` must start with '/': {template:?}")]
    MissingLeadingSlash {
        /// The offending method
        method: String,
        /// The template as written
        template: String,
    },

    /// The body encoder factory of a method failed.
    #[error("Failed to construct the body encoder of `{method}`: {source}")]
    BodyEncoderConstruction {
        /// The offending method
        method: String,
        /// The factory's failure
        #[source]
        source: BoxError,
    },

    /// Two endpoints (or an endpoint and a passthrough) share a method name.
    #[error("Method `{method}` is declared more than once")]
    DuplicateMethod {
        /// The duplicated name
        method: String,
    },

    /// A call reached the client for a method with no descriptor and no passthrough.
    #[error("No descriptor found for method `{method}` of `{api}`")]
    DescriptorNotFound {
        /// The interface name
        api: String,
        /// The requested method
        method: String,
    },

    /// A call supplied the wrong number of arguments.
    #[error("Method `{method}` expects {expected} arguments, got {actual}")]
    ArgumentCount {
        /// The called method
        method: String,
        /// Declared parameter count
        expected: usize,
        /// Supplied argument count
        actual: usize,
    },

    /// An argument's runtime type does not match what its encoder accepts.
    #[error("Argument {index} of `{method}` has type {actual}, expected {expected}")]
    ArgumentType {
        /// The called method
        method: String,
        /// Zero-based argument position
        index: usize,
        /// The type the encoder accepts
        expected: &'static str,
        /// The runtime type supplied
        actual: &'static str,
    },

    /// The caller asked for a payload type other than the declared response type.
    #[error("Method `{method}` returns {declared}, not {requested}")]
    ResponseTypeMismatch {
        /// The called method
        method: String,
        /// Declared response type
        declared: &'static str,
        /// Type requested by the caller
        requested: &'static str,
    },

    /// A header parameter produced a value that is not a legal header value.
    #[error("Invalid header {name:?} for `{method}`: {reason}")]
    InvalidHeader {
        /// The called method
        method: String,
        /// The header name
        name: String,
        /// Why the value was rejected
        reason: String,
    },

    /// A feature executor refused to run a feature.
    #[error("Feature `{feature}` rejected the call: {reason}")]
    FeatureRejected {
        /// The feature name
        feature: String,
        /// The executor's explanation
        reason: String,
    },

    /// The request could not be sent or its response could not be decoded.
    ///
    /// The original failure is kept as `source`.
    #[error("Dispatch of `{method}` failed: {source}")]
    Dispatch {
        /// The called method
        method: String,
        /// The transport or decoding failure
        #[source]
        source: TransportError,
    },
}

impl Error {
    /// Returns `true` for errors raised while building a client.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::ConfigurationError(_)
                | Error::UnboundParameter { .. }
                | Error::MultipleBodyParameters { .. }
                | Error::InvalidContentType { .. }
                | Error::UnmatchedPlaceholder { .. }
                | Error::OrphanPathParameter { .. }
                | Error::MissingLeadingSlash { .. }
                | Error::BodyEncoderConstruction { .. }
                | Error::DuplicateMethod { .. }
        )
    }

    /// Returns the transport failure behind a dispatch error.
    pub fn transport_error(&self) -> Option<&TransportError> {
        match self {
            Error::Dispatch { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Returns the HTTP status code if the failure carries one.
    pub fn status(&self) -> Option<StatusCode> {
        self.transport_error()?.status()
    }

    pub(crate) fn dispatch(method: impl Into<String>, source: TransportError) -> Self {
        Error::Dispatch {
            method: method.into(),
            source,
        }
    }
}

/// Failures produced by a [`Transport`](crate::transport::Transport) or while decoding
/// its response.
///
/// # Examples
///
/// ```
/// use declaro::TransportError;
/// use http::StatusCode;
///
/// let err = TransportError::HttpError {
///     status: StatusCode::SERVICE_UNAVAILABLE,
///     raw_response: "try later".to_string(),
///     headers: http::HeaderMap::new(),
/// };
///
/// assert!(err.is_retryable());
/// assert_eq!(err.raw_response(), Some("try later"));
/// ```
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    /// Connection, DNS or protocol failure reported by `reqwest`.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The request exceeded its timeout.
    #[error("Request timed out")]
    Timeout,

    /// The server answered with a non-2xx status.
    #[error("HTTP error {status}: {raw_response}")]
    HttpError {
        /// The HTTP status code
        status: StatusCode,
        /// The raw response body
        raw_response: String,
        /// The response headers
        headers: HeaderMap,
    },

    /// The response body could not be decoded into the declared type.
    #[error("Failed to deserialize response (status {status}): {serde_error}")]
    DeserializationFailed {
        /// The raw response body that failed to deserialize
        raw_response: String,
        /// The decoder's error message
        serde_error: String,
        /// The HTTP status code
        status: StatusCode,
    },

    /// The request body could not be serialized.
    #[error("Failed to serialize request: {0}")]
    SerializationFailed(String),

    /// The assembled URL is not valid.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// All retry attempts were used up.
    #[error("Max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded {
        /// Number of attempts made
        attempts: usize,
        /// The last failure seen
        last_error: Box<TransportError>,
    },

    /// Failure reported by a custom transport.
    #[error("Transport failure: {0}")]
    Other(BoxError),
}

impl TransportError {
    /// Returns `true` if sending the same request again might succeed.
    ///
    /// Network errors, timeouts, 5xx and 429 responses are retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Network(_) | TransportError::Timeout => true,
            TransportError::HttpError { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            TransportError::DeserializationFailed { .. }
            | TransportError::SerializationFailed(_)
            | TransportError::InvalidUrl(_)
            | TransportError::MaxRetriesExceeded { .. }
            | TransportError::Other(_) => false,
        }
    }

    /// Returns the HTTP status code if this error has one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            TransportError::HttpError { status, .. } => Some(*status),
            TransportError::DeserializationFailed { status, .. } => Some(*status),
            TransportError::MaxRetriesExceeded { last_error, .. } => last_error.status(),
            _ => None,
        }
    }

    /// Returns the raw response body if this error has one.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            TransportError::HttpError { raw_response, .. } => Some(raw_response),
            TransportError::DeserializationFailed { raw_response, .. } => Some(raw_response),
            TransportError::MaxRetriesExceeded { last_error, .. } => last_error.raw_response(),
            _ => None,
        }
    }
}

/// A specialized `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
