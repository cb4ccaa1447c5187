// src/metrics.rs
//
// Metrics record produced by evaluators and consumed by the reward shaper.
//
// Values are stored as JSON values rather than plain f64 so that externally
// produced records (file-backed or learned evaluators) can be carried through
// unchanged, including nulls, strings and non-finite numbers. Readers always
// go through `get_f64_or`, which never fails.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Metric keys emitted by `SurrogateSim` and read by the reward shaper.
pub mod keys {
    pub const EQE: &str = "EQE";
    pub const RECOMB_OVERLAP: &str = "recomb_overlap";
    pub const PENALTY: &str = "penalty";
    pub const INJ_BALANCE: &str = "inj_balance";
    pub const OUTCOUPLING: &str = "outcoupling";
    pub const DROOP: &str = "droop";
    pub const BRIGHTNESS: &str = "brightness";
    pub const LEAKAGE: &str = "leakage";
    pub const AUGER_RATE: &str = "auger_rate";
    pub const LIFETIME: &str = "lifetime";

    // Shaping signals injected by the episode controller.
    pub const PREVIOUS_UTILITY: &str = "previous_utility";
    pub const DELTA_PARAMS_NORM: &str = "delta_params_norm";
    pub const BOUNDARY_PENALTY: &str = "boundary_penalty";
    pub const THIN_LAYER_PENALTY: &str = "thin_layer_penalty";
    pub const V_DRIVE: &str = "v_drive";
}

/// Coerce a JSON value to a finite f64.
///
/// Numbers and numeric strings are accepted; NaN, infinities, nulls, bools,
/// arrays and objects yield `None`.
pub fn value_as_finite(value: &JsonValue) -> Option<f64> {
    let v = match value {
        JsonValue::Number(n) => n.as_f64()?,
        JsonValue::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    v.is_finite().then_some(v)
}

/// Name -> value mapping describing one evaluated design.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricsRecord(BTreeMap<String, JsonValue>);

impl MetricsRecord {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Insert a float. Non-finite values are stored as null, since JSON has no
    /// representation for them; readers treat null as missing.
    pub fn set(&mut self, key: &str, value: f64) {
        let v = serde_json::Number::from_f64(value)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null);
        self.0.insert(key.to_string(), v);
    }

    /// Insert an optional float; `None` is stored as an explicit null.
    pub fn set_opt(&mut self, key: &str, value: Option<f64>) {
        match value {
            Some(v) => self.set(key, v),
            None => {
                self.0.insert(key.to_string(), JsonValue::Null);
            }
        }
    }

    /// Insert an arbitrary JSON value (used for externally supplied records).
    pub fn set_raw(&mut self, key: &str, value: JsonValue) {
        self.0.insert(key.to_string(), value);
    }

    pub fn get_raw(&self, key: &str) -> Option<&JsonValue> {
        self.0.get(key)
    }

    /// Finite value for `key`, or `None` when absent / unreadable.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(value_as_finite)
    }

    /// Safe-float read: finite value for `key`, or `default`.
    pub fn get_f64_or(&self, key: &str, default: f64) -> f64 {
        self.get_f64(key).unwrap_or(default)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &JsonValue)> {
        self.0.iter()
    }

    /// Copy every readable numeric entry into a flat float map.
    pub fn to_f64_map(&self) -> BTreeMap<String, f64> {
        self.0
            .iter()
            .filter_map(|(k, v)| value_as_finite(v).map(|f| (k.clone(), f)))
            .collect()
    }
}

impl FromIterator<(String, f64)> for MetricsRecord {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        let mut record = MetricsRecord::new();
        for (k, v) in iter {
            record.set(&k, v);
        }
        record
    }
}

impl From<BTreeMap<String, JsonValue>> for MetricsRecord {
    fn from(map: BTreeMap<String, JsonValue>) -> Self {
        Self(map)
    }
}
