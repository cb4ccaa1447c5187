// src/safety.rs
//
// Deterministic guard for incoming action vectors.
//
// Actions are never rejected. A wrong length is padded with zeros or
// truncated, non-finite components are zeroed and out-of-range components are
// clamped into [-1, 1]. Every adjustment is recorded as a reason string.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardResult {
    /// Action exactly as received.
    pub raw: Vec<f64>,
    /// Action actually applied (length D, finite, within [-1, 1]).
    pub applied: Vec<f64>,
    pub adjustments: Vec<String>,
}

impl GuardResult {
    pub fn was_adjusted(&self) -> bool {
        !self.adjustments.is_empty()
    }
}

pub struct ActionGuard;

impl ActionGuard {
    pub fn apply(action: &[f64], dim: usize) -> GuardResult {
        let mut applied = action.to_vec();
        let mut reasons = Vec::new();

        normalize_len(&mut applied, dim, "action", &mut reasons);
        clamp_unit(&mut applied, "action", &mut reasons);

        GuardResult {
            raw: action.to_vec(),
            applied,
            adjustments: reasons,
        }
    }
}

#[allow(clippy::ptr_arg)]
fn normalize_len(vec: &mut Vec<f64>, len: usize, name: &str, reasons: &mut Vec<String>) {
    if vec.len() == len {
        return;
    }
    reasons.push(format!("{}_len_mismatch:{}->{}", name, vec.len(), len));
    vec.resize(len, 0.0);
}

fn clamp_unit(vec: &mut [f64], name: &str, reasons: &mut Vec<String>) {
    for (i, v) in vec.iter_mut().enumerate() {
        if !v.is_finite() {
            *v = 0.0;
            reasons.push(format!("{}_nan_or_inf:{}", name, i));
            continue;
        }
        let clamped = v.clamp(-1.0, 1.0);
        if (*v - clamped).abs() > 1e-12 {
            *v = clamped;
            reasons.push(format!("{}_clamped:{}", name, i));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_action_passes_through() {
        let r = ActionGuard::apply(&[0.5, -1.0, 0.0], 3);
        assert_eq!(r.applied, vec![0.5, -1.0, 0.0]);
        assert!(!r.was_adjusted());
    }

    #[test]
    fn short_action_is_zero_padded() {
        let r = ActionGuard::apply(&[0.25], 3);
        assert_eq!(r.applied, vec![0.25, 0.0, 0.0]);
        assert_eq!(r.adjustments, vec!["action_len_mismatch:1->3".to_string()]);
    }

    #[test]
    fn long_action_is_truncated_and_clamped() {
        let r = ActionGuard::apply(&[2.0, f64::NAN, -3.0, 1.0], 3);
        assert_eq!(r.applied, vec![1.0, 0.0, -1.0]);
        assert_eq!(
            r.adjustments,
            vec![
                "action_len_mismatch:4->3".to_string(),
                "action_clamped:0".to_string(),
                "action_nan_or_inf:1".to_string(),
                "action_clamped:2".to_string(),
            ]
        );
        assert_eq!(r.raw.len(), 4);
    }

    #[test]
    fn guard_is_deterministic() {
        let action = [0.3, f64::INFINITY, -7.0];
        let a = ActionGuard::apply(&action, 5);
        let b = ActionGuard::apply(&action, 5);
        assert_eq!(a.applied, b.applied);
        assert_eq!(a.adjustments, b.adjustments);
    }
}
