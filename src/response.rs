//! The decoded result of a call.

use crate::transport::RawResponse;
use http::{HeaderMap, StatusCode};
use std::time::Duration;

/// A decoded payload together with what the transport saw.
///
/// ```
/// use declaro::{RawResponse, Response};
/// use http::StatusCode;
///
/// let raw = RawResponse::new(StatusCode::OK, "42");
/// let response = Response::from_raw(42u32, raw);
///
/// assert_eq!(*response, 42);
/// assert_eq!(response.raw_body, "42");
/// assert!(!response.was_retried());
/// ```
#[derive(Debug, Clone)]
pub struct Response<T> {
    pub data: T,

    /// The body exactly as received, before decoding.
    pub raw_body: String,

    pub status: StatusCode,

    pub headers: HeaderMap,

    /// Time from the first attempt until the response arrived. Zero for responses that
    /// never touched the network, such as feature stubs.
    pub latency: Duration,

    pub attempts: usize,
}

impl<T> Response<T> {
    /// Pairs decoded `data` with the metadata of the response it came from.
    pub fn from_raw(data: T, raw: RawResponse) -> Self {
        Self {
            data,
            raw_body: raw.body,
            status: raw.status,
            headers: raw.headers,
            latency: raw.latency,
            attempts: raw.attempts,
        }
    }

    /// Transforms the payload, keeping the metadata.
    pub fn map<U, F>(self, f: F) -> Response<U>
    where
        F: FnOnce(T) -> U,
    {
        Response {
            data: f(self.data),
            raw_body: self.raw_body,
            status: self.status,
            headers: self.headers,
            latency: self.latency,
            attempts: self.attempts,
        }
    }

    pub fn into_data(self) -> T {
        self.data
    }

    pub fn was_retried(&self) -> bool {
        self.attempts > 1
    }

    /// The first value of header `name`, if it is valid visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }
}

impl<T> AsRef<T> for Response<T> {
    fn as_ref(&self) -> &T {
        &self.data
    }
}

impl<T> std::ops::Deref for Response<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}
