//! # Upstream clients
//!
//! Typed callers for the Flag Definition Service and the Targeting Service.
//! Each call is bounded by the upstream timeout and retried exactly once when
//! it fails with [`UpstreamError::Unavailable`].

pub mod http;

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::errors::UpstreamError;
use crate::evaluation::{EvaluationContext, FlagDefinition, TargetingDecision};

pub use http::{HttpFlagDefinitionClient, HttpTargetingClient};

#[async_trait]
pub trait FlagDefinitionClient: Send + Sync {
    /// Fails with `NotFound` for unknown keys and `Unavailable` on
    /// timeouts or connection errors.
    async fn fetch_flag_definition(&self, flag_key: &str) -> Result<FlagDefinition, UpstreamError>;
}

#[async_trait]
pub trait TargetingClient: Send + Sync {
    /// Fails with `InvalidContext` when the service rejects the context.
    async fn fetch_targeting_decision(
        &self,
        flag_key: &str,
        context: &EvaluationContext,
    ) -> Result<TargetingDecision, UpstreamError>;
}

/// Run `attempt` with a per-attempt deadline, retrying once if the first
/// attempt is unavailable or times out.
pub async fn with_retry<T, F, Fut>(
    operation: &'static str,
    timeout: Duration,
    mut attempt: F,
) -> Result<T, UpstreamError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, UpstreamError>>,
{
    match bounded_attempt(timeout, attempt()).await {
        Err(e) if e.is_retryable() => {
            warn!(operation = operation, error = %e, "upstream call failed, retrying once");
            bounded_attempt(timeout, attempt()).await
        }
        result => result,
    }
}

async fn bounded_attempt<T>(
    timeout: Duration,
    attempt: impl Future<Output = Result<T, UpstreamError>>,
) -> Result<T, UpstreamError> {
    match tokio::time::timeout(timeout, attempt).await {
        Ok(result) => result,
        Err(_) => Err(UpstreamError::Unavailable(format!(
            "timed out after {}ms",
            timeout.as_millis()
        ))),
    }
}
