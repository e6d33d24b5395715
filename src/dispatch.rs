//! The dispatcher: serializes an outbound request, hands it to the transport and
//! decodes what comes back.
//!
//! Dispatch is split in two stages. [`Dispatcher::dispatch`] yields an undecoded
//! [`RawResponse`] and is what feature executors wrap; [`Dispatcher::decode`] turns a
//! raw response into the caller's payload type. Every failure of either stage is an
//! [`Error::Dispatch`] naming the method, with the [`TransportError`] as its source.

use crate::descriptor::MethodDescriptor;
use crate::encoding::EncoderRegistry;
use crate::error::{Error, Result, TransportError};
use crate::request::OutboundRequest;
use crate::response::Response;
use crate::transport::{RawResponse, Transport, TransportRequest};
use futures::future::{BoxFuture, FutureExt};
use http::header::CONTENT_TYPE;
use http::HeaderValue;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;

/// Sends built requests through a [`Transport`].
#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    encoders: Arc<EncoderRegistry>,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>, encoders: Arc<EncoderRegistry>) -> Self {
        Self {
            transport,
            encoders,
        }
    }

    /// Sends `request` and resolves to the raw response.
    ///
    /// Nothing is sent before the returned future is polled. A body that cannot be
    /// serialized fails the future without reaching the transport; a non-2xx response
    /// fails it with [`TransportError::HttpError`].
    pub fn dispatch(
        &self,
        descriptor: &MethodDescriptor,
        request: OutboundRequest,
    ) -> BoxFuture<'static, Result<RawResponse>> {
        let method = descriptor.name().to_string();
        let prepared = self.prepare(request);
        let transport = self.transport.clone();

        async move {
            let request = prepared.map_err(|e| Error::dispatch(&method, e))?;
            let http_method = request.method.clone();
            let path = request.path_and_query.clone();

            let raw = transport
                .execute(request)
                .await
                .map_err(|e| {
                    tracing::error!(
                        method = %method,
                        http_method = %http_method,
                        path = %path,
                        error = %e,
                        "Transport failed"
                    );
                    Error::dispatch(&method, e)
                })?;

            check_status(&method, raw).map_err(|e| Error::dispatch(&method, e))
        }
        .boxed()
    }

    /// Decodes a raw response into `R`.
    ///
    /// Responses produced by feature executors and passthrough handlers come through
    /// here too, so a non-2xx status fails with [`TransportError::HttpError`] whatever
    /// its origin.
    pub fn decode<R>(&self, method: &str, raw: RawResponse) -> Result<Response<R>>
    where
        R: DeserializeOwned + 'static,
    {
        if !raw.is_success() {
            tracing::warn!(
                method = %method,
                status = raw.status.as_u16(),
                "Non-success response refused before decoding"
            );
            return Err(Error::dispatch(method, raw.into_http_error()));
        }

        match self.encoders.body.decode::<R>(&raw.body, raw.status) {
            Ok(data) => Ok(Response::from_raw(data, raw)),
            Err(e) => {
                tracing::error!(
                    method = %method,
                    status = raw.status.as_u16(),
                    error = %e,
                    "Failed to decode response body"
                );
                Err(Error::dispatch(method, e))
            }
        }
    }

    fn prepare(&self, request: OutboundRequest) -> std::result::Result<TransportRequest, TransportError> {
        let OutboundRequest {
            method,
            path_and_query,
            content_type,
            mut headers,
            body,
        } = request;

        let content_type_value = HeaderValue::from_str(&content_type.to_string())
            .map_err(|e| TransportError::SerializationFailed(format!("invalid content type: {}", e)))?;
        if !headers.contains_key(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, content_type_value);
        }

        let body = match body {
            Some(arg) => Some(self.encoders.body.encode(&arg, &content_type)?),
            None => None,
        };

        Ok(TransportRequest {
            method,
            path_and_query,
            headers,
            body,
        })
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("encoders", &self.encoders)
            .finish_non_exhaustive()
    }
}

fn check_status(method: &str, raw: RawResponse) -> std::result::Result<RawResponse, TransportError> {
    let status = raw.status;

    tracing::info!(
        method = %method,
        status = status.as_u16(),
        latency_ms = raw.latency.as_millis() as u64,
        attempts = raw.attempts,
        "Received HTTP response"
    );

    if status.is_success() {
        return Ok(raw);
    }

    if status.is_client_error() {
        tracing::error!(
            method = %method,
            status = status.as_u16(),
            body = %raw.body,
            "HTTP client error"
        );
    } else {
        tracing::warn!(
            method = %method,
            status = status.as_u16(),
            "HTTP server error"
        );
    }

    Err(raw.into_http_error())
}
