//! The feature interception layer.
//!
//! A method declared with a feature name is not dispatched directly. Its call is
//! described as a [`FeatureInvocation`] and handed, together with a [`Supplier`] of
//! the real request, to the client's [`FeatureExecutor`]. The executor decides what
//! the caller receives: the real response, a substitute, or an error.
//!
//! ```
//! use declaro::{FeatureToggles, RawResponse};
//!
//! let toggles = FeatureToggles::new()
//!     .stub("new-search", RawResponse::json(serde_json::json!([])))
//!     .fail("bulk-export", "disabled for this tenant");
//! ```

use crate::descriptor::{MethodDescriptor, ResponseType};
use crate::encoding::Arg;
use crate::error::{Error, Result};
use crate::transport::RawResponse;
use futures::future::{self, BoxFuture, FutureExt};
use std::collections::HashMap;
use std::fmt;

/// Deferred execution of the real request. Calling it builds and dispatches the
/// request exactly as an unfeatured method would.
pub type Supplier = Box<dyn FnOnce() -> BoxFuture<'static, Result<RawResponse>> + Send>;

/// Everything an executor may want to know about the intercepted call.
#[derive(Debug, Clone)]
pub struct FeatureInvocation {
    pub feature: String,
    pub method: String,
    /// Name of the interface declaring the method.
    pub declaring_type: String,
    pub arguments: Vec<Arg>,
    /// The payload type the caller will decode the response into.
    pub response_type: ResponseType,
}

/// Decides how calls of featured methods are served.
///
/// The executor is called exactly once per call of a featured method. It may call the
/// supplier once, or not at all.
///
/// ```
/// use declaro::{FeatureExecutor, FeatureInvocation, RawResponse, Result, Supplier};
/// use futures::future::BoxFuture;
///
/// /// Runs every feature, logging which one.
/// struct Audited;
///
/// impl FeatureExecutor for Audited {
///     fn execute(
///         &self,
///         feature: &str,
///         invocation: FeatureInvocation,
///         supplier: Supplier,
///     ) -> BoxFuture<'static, Result<RawResponse>> {
///         println!("{} via {}", invocation.method, feature);
///         supplier()
///     }
/// }
/// ```
pub trait FeatureExecutor: Send + Sync {
    fn execute(
        &self,
        feature: &str,
        invocation: FeatureInvocation,
        supplier: Supplier,
    ) -> BoxFuture<'static, Result<RawResponse>>;
}

/// Routes one call through `executor`.
pub(crate) fn intercept(
    executor: &dyn FeatureExecutor,
    descriptor: &MethodDescriptor,
    feature: &str,
    arguments: Vec<Arg>,
    supplier: Supplier,
) -> BoxFuture<'static, Result<RawResponse>> {
    tracing::debug!(
        feature = %feature,
        api = %descriptor.declaring_type(),
        method = %descriptor.name(),
        "Routing call through feature executor"
    );

    let invocation = FeatureInvocation {
        feature: feature.to_string(),
        method: descriptor.name().to_string(),
        declaring_type: descriptor.declaring_type().to_string(),
        arguments,
        response_type: descriptor.response_type(),
    };
    executor.execute(feature, invocation, supplier)
}

/// What [`FeatureToggles`] does with a feature.
#[derive(Debug, Clone)]
pub enum FeatureBehavior {
    /// Perform the real request.
    Run,
    /// Answer with this response instead of calling the server.
    Stub(RawResponse),
    /// Fail with [`Error::FeatureRejected`].
    Fail(String),
}

/// A static table of feature behaviors. Features it does not know run normally.
#[derive(Debug, Clone, Default)]
pub struct FeatureToggles {
    behaviors: HashMap<String, FeatureBehavior>,
}

impl FeatureToggles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, feature: impl Into<String>, behavior: FeatureBehavior) -> Self {
        self.behaviors.insert(feature.into(), behavior);
        self
    }

    pub fn run(self, feature: impl Into<String>) -> Self {
        self.set(feature, FeatureBehavior::Run)
    }

    pub fn stub(self, feature: impl Into<String>, response: RawResponse) -> Self {
        self.set(feature, FeatureBehavior::Stub(response))
    }

    pub fn fail(self, feature: impl Into<String>, reason: impl Into<String>) -> Self {
        self.set(feature, FeatureBehavior::Fail(reason.into()))
    }

    pub fn behavior(&self, feature: &str) -> Option<&FeatureBehavior> {
        self.behaviors.get(feature)
    }
}

impl FeatureExecutor for FeatureToggles {
    fn execute(
        &self,
        feature: &str,
        invocation: FeatureInvocation,
        supplier: Supplier,
    ) -> BoxFuture<'static, Result<RawResponse>> {
        match self.behaviors.get(feature) {
            None | Some(FeatureBehavior::Run) => supplier(),
            Some(FeatureBehavior::Stub(response)) => {
                tracing::info!(
                    feature = %feature,
                    method = %invocation.method,
                    "Serving stubbed response"
                );
                future::ready(Ok(response.clone())).boxed()
            }
            Some(FeatureBehavior::Fail(reason)) => {
                tracing::warn!(
                    feature = %feature,
                    method = %invocation.method,
                    reason = %reason,
                    "Feature rejected call"
                );
                future::ready(Err(Error::FeatureRejected {
                    feature: feature.to_string(),
                    reason: reason.clone(),
                }))
                .boxed()
            }
        }
    }
}

impl fmt::Display for FeatureBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureBehavior::Run => f.write_str("run"),
            FeatureBehavior::Stub(response) => write!(f, "stub ({})", response.status),
            FeatureBehavior::Fail(reason) => write!(f, "fail ({})", reason),
        }
    }
}
