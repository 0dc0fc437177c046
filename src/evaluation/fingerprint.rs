use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

use super::EvaluationContext;

const KEY_PREFIX: &str = "eval";

// Largest magnitude below which every integer is exactly representable as f64
const MAX_EXACT_F64_INT: f64 = 9_007_199_254_740_992.0;

/// Deterministic key for one flag evaluated against one context.
///
/// Used both as the decision cache key and as the coalescing key. The context
/// is serialized with sorted attribute names, so attribute insertion order
/// never changes the result. Numbers with an integral value hash the same
/// however they were spelled (`3`, `3.0`, `3e0`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn compute(flag_key: &str, context: &EvaluationContext) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(flag_key.as_bytes());
        // Separator cannot appear in a valid flag key
        hasher.update(b"\n");
        hasher.update(canonical_context(context).as_bytes());

        Fingerprint(format!("{}:{}", KEY_PREFIX, hex::encode(hasher.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn canonical_context(context: &EvaluationContext) -> String {
    let canonical: BTreeMap<&str, Value> = context
        .iter()
        .map(|(name, value)| (name.as_str(), canonical_value(value)))
        .collect();

    // Serializing a BTreeMap of scalars cannot fail
    serde_json::to_string(&canonical).unwrap_or_default()
}

fn canonical_value(value: &Value) -> Value {
    match value {
        Value::Number(n) if n.is_f64() => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < MAX_EXACT_F64_INT => Value::from(f as i64),
            _ => value.clone(),
        },
        _ => value.clone(),
    }
}
