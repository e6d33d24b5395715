//! # Declaro - declarative HTTP clients
//!
//! Declaro turns a declarative description of an HTTP interface into a working
//! asynchronous client. Each method of the interface is declared once, with its verb,
//! URL template, content type, headers and parameter bindings; the client compiles
//! those declarations when it is built and afterwards turns every call into an HTTP
//! request sent through `reqwest`.
//!
//! ## Quick Start
//!
//! ```no_run
//! use declaro::{args, ApiSpec, Client, EndpointSpec};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct Item {
//!     id: u64,
//!     name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), declaro::Error> {
//!     let api = ApiSpec::new("ItemsApi")
//!         .header("accept", "application/json")
//!         .endpoint(
//!             EndpointSpec::get("find_item", "/items/{id}")
//!                 .path("id")
//!                 .query("filter")
//!                 .returns::<Item>(),
//!         )
//!         .endpoint(
//!             EndpointSpec::post("create_item", "/items")
//!                 .header_param("x-request-id")
//!                 .body()
//!                 .returns::<Item>(),
//!         );
//!
//!     let client = Client::builder()
//!         .base_url("https://api.example.com")?
//!         .build(api)?;
//!
//!     // GET /items/42?filter=active
//!     let item = client.call::<Item>("find_item", args![42, "active"]).await?;
//!     println!("Found {} in {:?}", item.name, item.latency);
//!
//!     // POST /items with a JSON body and an x-request-id header
//!     let new_item = Item { id: 0, name: "lamp".to_string() };
//!     let created = client
//!         .call::<Item>("create_item", args!["req-1", new_item])
//!         .await?;
//!     println!("Created item {}", created.id);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Declaration errors
//!
//! Every declaration problem is reported by [`ClientBuilder::build`], never by a call:
//!
//! ```
//! use declaro::{ApiSpec, Client, EndpointSpec, Error};
//!
//! let api = ApiSpec::new("ItemsApi")
//!     .endpoint(EndpointSpec::get("find_item", "/items/{id}").query("filter"));
//!
//! let err = Client::builder()
//!     .base_url("https://api.example.com")
//!     .and_then(|builder| builder.build(api))
//!     .unwrap_err();
//!
//! assert!(matches!(err, Error::UnmatchedPlaceholder { .. }));
//! assert!(err.is_configuration());
//! ```
//!
//! ## Call errors
//!
//! Call failures keep the transport's view of what went wrong:
//!
//! ```no_run
//! use declaro::{args, Client, Error, TransportError};
//!
//! # async fn example(client: Client) {
//! match client.call::<serde_json::Value>("find_item", args![42, "active"]).await {
//!     Ok(response) => println!("Success: {:?}", response.data),
//!     Err(Error::Dispatch { method, source }) => match source {
//!         TransportError::HttpError { status, raw_response, .. } => {
//!             eprintln!("{} failed with {}: {}", method, status, raw_response);
//!         }
//!         other => eprintln!("{} failed: {}", method, other),
//!     },
//!     Err(e) => eprintln!("Call rejected: {}", e),
//! }
//! # }
//! ```
//!
//! ## Features
//!
//! A method declared with [`EndpointSpec::feature`] is routed through the client's
//! [`FeatureExecutor`], which may run the real request, serve a stub or refuse the
//! call. [`FeatureToggles`] is a ready-made table-driven executor.

mod api;
mod client;
mod compiler;
mod descriptor;
mod dispatch;
mod encoding;
mod error;
pub mod feature;
mod param;
mod request;
mod response;
pub mod retry;
pub mod transport;

pub use api::{ApiSpec, EndpointSpec, PassthroughFn};
pub use client::{Client, ClientBuilder};
pub use compiler::{compile, DescriptorTable};
pub use descriptor::{
    BodyEncoder, DefaultHeaders, MediaType, MediaTypeError, MethodDescriptor, ResponseType,
    APPLICATION_JSON,
};
pub use dispatch::Dispatcher;
pub use encoding::{Arg, BodyCodec, EncoderRegistry, ParamEncoders};
pub use error::{BoxError, Error, Result, TransportError};
pub use feature::{FeatureBehavior, FeatureExecutor, FeatureInvocation, FeatureToggles, Supplier};
pub use param::{Binding, ParameterDescriptor};
pub use request::{build_request, OutboundRequest};
pub use response::Response;
pub use retry::{RetryPredicate, RetryStrategy};
pub use transport::{RawResponse, ReqwestTransport, Transport, TransportRequest};
