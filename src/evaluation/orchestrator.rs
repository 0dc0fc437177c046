use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use super::coalescer::Coalescer;
use super::{
    compose_decision, AuditEvent, EvaluationContext, EvaluationDecision, EvaluationRequest,
    Fingerprint,
};
use crate::cache::DecisionCache;
use crate::errors::{EvaluationError, UpstreamError};
use crate::events::EventPublisher;
use crate::upstream::{FlagDefinitionClient, TargetingClient};

type Outcome = Result<EvaluationDecision, EvaluationError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluationSettings {
    pub cache_ttl: Duration,
    /// TTL for `FALLBACK_ERROR` decisions.
    pub error_cache_ttl: Duration,
    /// Upper bound on one `evaluate` call, cache lookup included.
    pub evaluation_timeout: Duration,
}

impl Default for EvaluationSettings {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(60),
            error_cache_ttl: Duration::from_secs(5),
            evaluation_timeout: Duration::from_secs(5),
        }
    }
}

/// Cache-aside, coalesced evaluation pipeline.
///
/// Every shared resource is injected here once at startup; clones share the
/// same clients, cache, in-flight registry and publisher.
#[derive(Clone)]
pub struct EvaluationOrchestrator {
    flags: Arc<dyn FlagDefinitionClient>,
    targeting: Arc<dyn TargetingClient>,
    cache: DecisionCache,
    coalescer: Coalescer<Outcome>,
    publisher: EventPublisher,
    settings: EvaluationSettings,
}

impl EvaluationOrchestrator {
    pub fn new(
        flags: Arc<dyn FlagDefinitionClient>,
        targeting: Arc<dyn TargetingClient>,
        cache: DecisionCache,
        publisher: EventPublisher,
        settings: EvaluationSettings,
    ) -> Self {
        Self {
            flags,
            targeting,
            cache,
            coalescer: Coalescer::new(),
            publisher,
            settings,
        }
    }

    pub fn settings(&self) -> EvaluationSettings {
        self.settings
    }

    /// Decide whether `request.flag_key` is enabled for `request.context`.
    ///
    /// Only caller input problems come back as errors. Every upstream, cache
    /// or queue failure resolves to a decision with reason `FALLBACK_ERROR`.
    #[instrument(name = "evaluate", skip_all, fields(flag_key = %request.flag_key))]
    pub async fn evaluate(&self, request: EvaluationRequest) -> Outcome {
        request.validate()?;

        let fingerprint = Fingerprint::compute(&request.flag_key, &request.context);
        let flag_key = request.flag_key.clone();
        let deadline = self.settings.evaluation_timeout;

        match tokio::time::timeout(deadline, self.resolve(fingerprint, request)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                // The coalesced computation keeps running and still caches its result
                warn!(
                    timeout_ms = deadline.as_millis() as u64,
                    "evaluation deadline exceeded, failing closed"
                );
                Ok(EvaluationDecision::fail_closed(&flag_key))
            }
        }
    }

    async fn resolve(&self, fingerprint: Fingerprint, request: EvaluationRequest) -> Outcome {
        if let Some(decision) = self.cache.get(&fingerprint).await {
            return Ok(decision);
        }

        debug!(in_flight = self.coalescer.in_flight(), "decision cache miss");
        let flag_key = request.flag_key.clone();
        let pipeline = self.clone();
        let key = fingerprint.clone();

        match self
            .coalescer
            .run(fingerprint, move || pipeline.compute(key, request))
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "evaluation task failed, failing closed");
                Ok(EvaluationDecision::fail_closed(&flag_key))
            }
        }
    }

    // Runs once per fingerprint while in flight, detached from the caller.
    async fn compute(self, fingerprint: Fingerprint, request: EvaluationRequest) -> Outcome {
        let EvaluationRequest { flag_key, context } = request;

        let decision = self.decide(&flag_key, &context).await?;

        let ttl = if decision.is_fallback() {
            self.settings.error_cache_ttl
        } else {
            self.settings.cache_ttl
        };
        self.cache.set(&fingerprint, &decision, ttl).await;

        info!(
            fingerprint = %fingerprint,
            enabled = decision.enabled,
            reason = ?decision.reason,
            "flag evaluated"
        );
        self.publisher
            .publish(AuditEvent::new(fingerprint, decision.clone(), context));

        Ok(decision)
    }

    async fn decide(&self, flag_key: &str, context: &EvaluationContext) -> Outcome {
        let flag = self.flags.fetch_flag_definition(flag_key);
        let targeting = self.targeting.fetch_targeting_decision(flag_key, context);
        tokio::pin!(flag, targeting);

        // Both calls make progress together; the flag definition decides
        // whether the targeting result is needed at all.
        let mut early_targeting = None;
        let definition = loop {
            tokio::select! {
                biased;
                result = &mut flag => break result,
                result = &mut targeting, if early_targeting.is_none() => {
                    early_targeting = Some(result);
                }
            }
        };

        let definition = match definition {
            Ok(definition) => definition,
            Err(e) => {
                warn!(error = %e, "flag definition unavailable, failing closed");
                return Ok(EvaluationDecision::fail_closed(flag_key));
            }
        };

        // No targeting rules: the default stands and targeting is dropped
        if let Some(decision) = compose_decision(flag_key, &definition, None) {
            debug!("flag has no targeting rules");
            return Ok(decision);
        }

        let targeting = match early_targeting {
            Some(result) => result,
            None => targeting.await,
        };

        match targeting {
            Ok(outcome) => Ok(compose_decision(flag_key, &definition, Some(outcome))
                .unwrap_or_else(|| EvaluationDecision::targeting_unavailable(flag_key, &definition))),
            Err(UpstreamError::InvalidContext(detail)) => {
                Err(EvaluationError::InvalidContext(detail))
            }
            Err(e) => {
                warn!(error = %e, "targeting unavailable, using flag default");
                Ok(EvaluationDecision::targeting_unavailable(flag_key, &definition))
            }
        }
    }
}
