pub mod coalescer;
pub mod fingerprint;
pub mod orchestrator;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::errors::EvaluationError;

pub use fingerprint::Fingerprint;
pub use orchestrator::{EvaluationOrchestrator, EvaluationSettings};

const MAX_FLAG_KEY_LEN: usize = 256;

// Attribute name -> scalar value. BTreeMap keeps the keys sorted, which is
// what the fingerprint relies on for a canonical serialization.
pub type EvaluationContext = BTreeMap<String, Value>;

// Incoming evaluation request
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationRequest {
    #[serde(alias = "flag_key")]
    pub flag_key: String,
    #[serde(default)]
    pub context: EvaluationContext,
}

impl EvaluationRequest {
    #[cfg(test)]
    pub fn new(flag_key: impl Into<String>, context: EvaluationContext) -> Self {
        Self {
            flag_key: flag_key.into(),
            context,
        }
    }

    /// Reject requests no decision can be computed for, before any I/O happens.
    pub fn validate(&self) -> Result<(), EvaluationError> {
        validate_flag_key(&self.flag_key).map_err(EvaluationError::InvalidRequest)?;

        for (name, value) in &self.context {
            if matches!(value, Value::Array(_) | Value::Object(_)) {
                return Err(EvaluationError::InvalidContext(format!(
                    "attribute '{}' must be a string, number, bool or null",
                    name
                )));
            }
        }

        Ok(())
    }
}

// Validating the flag key
pub fn validate_flag_key(key: &str) -> Result<(), String> {
    if key.is_empty() {
        return Err("flagKey cannot be empty".to_string());
    }

    if key.len() > MAX_FLAG_KEY_LEN {
        return Err(format!("flagKey is too long (max: {} bytes)", MAX_FLAG_KEY_LEN));
    }

    if key.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err("flagKey cannot contain whitespace or control characters".to_string());
    }

    Ok(())
}

// Flag metadata from the Flag Definition Service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagDefinition {
    pub key: String,
    #[serde(alias = "enabled_default")]
    pub enabled_default: bool,
    #[serde(alias = "has_targeting_rules")]
    pub has_targeting_rules: bool,
}

// Result from the Targeting Service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetingDecision {
    pub matched: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reason {
    Default,
    TargetingMatch,
    TargetingNoMatch,
    FallbackError,
}

// The decision that is cached, audited and returned to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationDecision {
    pub flag_key: String,
    pub enabled: bool,
    pub reason: Reason,
    pub evaluated_at: DateTime<Utc>,
}

impl EvaluationDecision {
    fn new(flag_key: &str, enabled: bool, reason: Reason) -> Self {
        Self {
            flag_key: flag_key.to_string(),
            enabled,
            reason,
            evaluated_at: Utc::now(),
        }
    }

    /// Used whenever the flag definition itself is unknown: never enables the flag.
    pub fn fail_closed(flag_key: &str) -> Self {
        Self::new(flag_key, false, Reason::FallbackError)
    }

    /// Targeting could not be consulted, so the flag's own default applies.
    pub fn targeting_unavailable(flag_key: &str, definition: &FlagDefinition) -> Self {
        Self::new(flag_key, definition.enabled_default, Reason::FallbackError)
    }

    pub fn is_fallback(&self) -> bool {
        self.reason == Reason::FallbackError
    }
}

/// Compose the decision for `flag_key` from its definition and, when the flag
/// has targeting rules, the targeting outcome.
///
/// The decision carries the requested key, never the key echoed back by the
/// flag service. Returns `None` when the flag has targeting rules but no
/// targeting outcome was supplied.
pub fn compose_decision(
    flag_key: &str,
    definition: &FlagDefinition,
    targeting: Option<TargetingDecision>,
) -> Option<EvaluationDecision> {
    // Step 1: no rules, the default stands
    if !definition.has_targeting_rules {
        return Some(EvaluationDecision::new(
            flag_key,
            definition.enabled_default,
            Reason::Default,
        ));
    }

    // Step 2: a match always enables, a miss falls back to the default
    let targeting = targeting?;
    let decision = if targeting.matched {
        EvaluationDecision::new(flag_key, true, Reason::TargetingMatch)
    } else {
        EvaluationDecision::new(
            flag_key,
            definition.enabled_default,
            Reason::TargetingNoMatch,
        )
    };

    Some(decision)
}

// Audit record handed to the event publisher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub fingerprint: Fingerprint,
    pub decision: EvaluationDecision,
    pub context: EvaluationContext,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        fingerprint: Fingerprint,
        decision: EvaluationDecision,
        context: EvaluationContext,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            fingerprint,
            decision,
            context,
            timestamp: Utc::now(),
        }
    }
}
