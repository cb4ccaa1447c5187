// src/reward.rs
//
// Reward shaping: metrics + constraint violation -> bounded scalar.
//
// One scoring function with centrally declared weights and targets:
//
//   U = w_eqe * log2(1 + EQE / eqe_ref)
//     + w_ov  * sqrt(overlap)       + w_bal * sqrt(inj_balance)
//     + w_br  * log2(1 + B / b_ref) + w_lt  * log2(1 + L / l_ref)
//     - w_pen * ln(1 + penalty_total)
//     - w_leak * sqrt(leakage) - w_aug * ln(1 + auger)
//     - w_jump * max(0, delta_params_norm - jump_free)^2
//     - sum_k w_k * hinge_k            (squared relative shortfall / excess)
//     - w_bnd * boundary_penalty - w_thin * thin_layer_penalty
//
//   raw    = U + w_prog * (U - previous_utility) + milestone bonuses
//   reward = bound * tanh(raw / bound)
//
// The shaper keeps no state. Cross-step signals (`previous_utility`,
// `delta_params_norm`) and the controller's anti-cheat terms arrive as
// entries of the metrics record. Every read is a safe-float read, so a
// malformed record degrades to neutral defaults instead of failing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::metrics::{keys, MetricsRecord};
use crate::param_space::ViolationSummary;

/// Upper cap on any single penalty term, so the utility stays finite.
const TERM_CAP: f64 = 1.0e6;

/// Weights of the utility terms. Positive terms reward, the rest penalize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardWeights {
    pub eqe: f64,
    pub overlap: f64,
    pub balance: f64,
    pub brightness: f64,
    pub lifetime: f64,

    pub penalty: f64,
    pub leakage: f64,
    pub auger: f64,
    pub jump: f64,

    pub hinge_overlap: f64,
    pub hinge_balance: f64,
    pub hinge_droop: f64,
    pub hinge_lifetime: f64,
    pub hinge_brightness: f64,
    pub hinge_voltage: f64,

    pub boundary: f64,
    pub thin_layer: f64,

    /// Fraction of (U - previous_utility) added as progress shaping.
    pub progress: f64,
}

impl Default for RewardWeights {
    fn default() -> Self {
        Self {
            eqe: 2.0,
            overlap: 1.0,
            balance: 0.5,
            brightness: 0.3,
            lifetime: 0.3,

            penalty: 1.0,
            leakage: 0.3,
            auger: 0.3,
            jump: 2.0,

            hinge_overlap: 2.0,
            hinge_balance: 1.0,
            hinge_droop: 1.0,
            hinge_lifetime: 0.5,
            hinge_brightness: 0.5,
            hinge_voltage: 0.5,

            boundary: 1.0,
            thin_layer: 1.0,

            progress: 0.5,
        }
    }
}

/// Reference scales and target ranges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardTargets {
    /// EQE (%) at which the efficiency term reaches 1.0.
    pub eqe_ref: f64,
    pub brightness_ref: f64,
    pub lifetime_ref: f64,

    pub overlap_min: f64,
    pub balance_min: f64,
    pub droop_min: f64,
    pub lifetime_min: f64,
    pub brightness_min: f64,
    /// Drive voltage above which the voltage hinge engages (V).
    pub v_drive_soft_max: f64,

    /// Per-step normalized move that is free of jump cost.
    pub jump_free: f64,
}

impl Default for RewardTargets {
    fn default() -> Self {
        Self {
            eqe_ref: 40.0,
            brightness_ref: 1000.0,
            lifetime_ref: 2000.0,

            overlap_min: 0.6,
            balance_min: 0.7,
            droop_min: 0.6,
            lifetime_min: 1000.0,
            brightness_min: 500.0,
            v_drive_soft_max: 5.0,

            jump_free: 0.1,
        }
    }
}

/// Discrete epsilon bonuses for crossing fixed thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Milestones {
    pub eqe: f64,
    pub overlap: f64,
    pub balance: f64,
    pub lifetime: f64,
    /// Bonus per milestone reached.
    pub bonus: f64,
}

impl Default for Milestones {
    fn default() -> Self {
        Self {
            eqe: 20.0,
            overlap: 0.8,
            balance: 0.9,
            lifetime: 1500.0,
            bonus: 0.05,
        }
    }
}

/// Full reward configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    pub weights: RewardWeights,
    pub targets: RewardTargets,
    pub milestones: Milestones,
    /// Output range is (-bound, bound).
    pub bound: f64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            weights: RewardWeights::default(),
            targets: RewardTargets::default(),
            milestones: Milestones::default(),
            bound: 10.0,
        }
    }
}

impl RewardConfig {
    /// Score a metrics record. See the module docs for the formula.
    pub fn score<'a>(
        &self,
        metrics: &MetricsRecord,
        violation: impl Into<ViolationSummary<'a>>,
    ) -> (f64, RewardComponents) {
        let w = &self.weights;
        let t = &self.targets;

        // 1) safe reads
        let eqe = metrics.get_f64_or(keys::EQE, 0.0);
        let overlap = metrics.get_f64(keys::RECOMB_OVERLAP);
        let balance = metrics.get_f64(keys::INJ_BALANCE);
        let droop = metrics.get_f64(keys::DROOP);
        let brightness = metrics.get_f64(keys::BRIGHTNESS);
        let lifetime = metrics.get_f64(keys::LIFETIME);
        let leakage = metrics.get_f64_or(keys::LEAKAGE, 0.0);
        let auger = metrics.get_f64_or(keys::AUGER_RATE, 0.0);
        let metric_penalty = metrics.get_f64_or(keys::PENALTY, 0.0).max(0.0);
        let delta_params_norm = metrics.get_f64_or(keys::DELTA_PARAMS_NORM, 0.0).max(0.0);
        let boundary_penalty = metrics.get_f64_or(keys::BOUNDARY_PENALTY, 0.0).max(0.0);
        let thin_layer_penalty = metrics.get_f64_or(keys::THIN_LAYER_PENALTY, 0.0).max(0.0);
        let v_drive = metrics.get_f64(keys::V_DRIVE);
        let previous_utility = metrics.get_f64(keys::PREVIOUS_UTILITY);

        // 2) constraint aggregation
        let constraint_penalty = violation.into().total();
        let penalty_total = metric_penalty + constraint_penalty;

        // 3) shaped terms
        let eqe_term = log2_shape(eqe, t.eqe_ref);
        let overlap_term = sqrt_shape(overlap.unwrap_or(0.0));
        let balance_term = sqrt_shape(balance.unwrap_or(0.0));
        let brightness_term = log2_shape(brightness.unwrap_or(0.0), t.brightness_ref);
        let lifetime_term = log2_shape(lifetime.unwrap_or(0.0), t.lifetime_ref);

        let penalty_term = cap(penalty_total.ln_1p());
        let leakage_term = cap(leakage.max(0.0).sqrt());
        let auger_term = cap(auger.max(0.0).ln_1p());
        let jump_term = cap(excess_sq(delta_params_norm, t.jump_free));

        // Missing gate metrics count as passing.
        let hinge_overlap = shortfall_sq(overlap.unwrap_or(t.overlap_min), t.overlap_min);
        let hinge_balance = shortfall_sq(balance.unwrap_or(t.balance_min), t.balance_min);
        let hinge_droop = shortfall_sq(droop.unwrap_or(t.droop_min), t.droop_min);
        let hinge_lifetime = shortfall_sq(lifetime.unwrap_or(t.lifetime_min), t.lifetime_min);
        let hinge_brightness =
            shortfall_sq(brightness.unwrap_or(t.brightness_min), t.brightness_min);
        let hinge_voltage = cap(excess_sq(
            v_drive.unwrap_or(t.v_drive_soft_max),
            t.v_drive_soft_max,
        ));

        // 4) utility
        let positive = w.eqe * eqe_term
            + w.overlap * overlap_term
            + w.balance * balance_term
            + w.brightness * brightness_term
            + w.lifetime * lifetime_term;
        let negative = w.penalty * penalty_term
            + w.leakage * leakage_term
            + w.auger * auger_term
            + w.jump * jump_term
            + w.hinge_overlap * hinge_overlap
            + w.hinge_balance * hinge_balance
            + w.hinge_droop * hinge_droop
            + w.hinge_lifetime * hinge_lifetime
            + w.hinge_brightness * hinge_brightness
            + w.hinge_voltage * hinge_voltage
            + w.boundary * cap(boundary_penalty)
            + w.thin_layer * cap(thin_layer_penalty);
        let utility = positive - negative;

        // 5) progress
        let progress = progress_term(utility, previous_utility, w.progress);

        // 6) milestones
        let milestones_hit = self.milestones_hit(eqe, overlap, balance, lifetime);
        let milestone_bonus = self.milestones.bonus * milestones_hit as f64;

        // 7) bound
        let raw = utility + progress + milestone_bonus;
        let reward = bound_reward(raw, self.bound);

        let components = RewardComponents {
            eqe_term,
            overlap_term,
            balance_term,
            brightness_term,
            lifetime_term,
            metric_penalty,
            constraint_penalty,
            penalty_total,
            penalty_term,
            leakage_term,
            auger_term,
            delta_params_norm,
            jump_term,
            hinge_overlap,
            hinge_balance,
            hinge_droop,
            hinge_lifetime,
            hinge_brightness,
            hinge_voltage,
            boundary_penalty,
            thin_layer_penalty,
            positive,
            negative,
            utility,
            previous_utility,
            progress,
            milestones_hit,
            milestone_bonus,
            raw,
            reward,
        };
        (reward, components)
    }

    fn milestones_hit(
        &self,
        eqe: f64,
        overlap: Option<f64>,
        balance: Option<f64>,
        lifetime: Option<f64>,
    ) -> u32 {
        let m = &self.milestones;
        [
            eqe >= m.eqe,
            overlap.is_some_and(|v| v >= m.overlap),
            balance.is_some_and(|v| v >= m.balance),
            lifetime.is_some_and(|v| v >= m.lifetime),
        ]
        .iter()
        .filter(|hit| **hit)
        .count() as u32
    }
}

/// Score with the default configuration.
pub fn compute_reward<'a>(
    metrics: &MetricsRecord,
    violation: impl Into<ViolationSummary<'a>>,
) -> (f64, RewardComponents) {
    RewardConfig::default().score(metrics, violation)
}

/// Score with an explicit configuration.
pub fn compute_reward_with<'a>(
    metrics: &MetricsRecord,
    violation: impl Into<ViolationSummary<'a>>,
    config: &RewardConfig,
) -> (f64, RewardComponents) {
    config.score(metrics, violation)
}

// ----- named scoring helpers -----

fn cap(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, TERM_CAP)
    }
}

/// `log2(1 + x / reference)`: 0 at x = 0, 1 at the reference, sublinear beyond.
pub fn log2_shape(x: f64, reference: f64) -> f64 {
    (x.max(0.0) / reference.abs().max(1e-12)).ln_1p() / std::f64::consts::LN_2
}

/// `sqrt(x)` on [0, 1]: steep near zero so a dead metric still has a gradient.
pub fn sqrt_shape(x: f64) -> f64 {
    x.clamp(0.0, 1.0).sqrt()
}

/// Squared relative shortfall below `target`; 0 once the target is met.
pub fn shortfall_sq(x: f64, target: f64) -> f64 {
    let s = (target - x).max(0.0) / target.abs().max(1e-12);
    s * s
}

/// Squared absolute excess above `limit`; 0 at or below it.
pub fn excess_sq(x: f64, limit: f64) -> f64 {
    let e = (x - limit).max(0.0);
    e * e
}

/// `k * (U - previous)` when a previous utility exists, else 0.
pub fn progress_term(utility: f64, previous_utility: Option<f64>, k: f64) -> f64 {
    match previous_utility {
        Some(prev) if prev.is_finite() && utility.is_finite() => k * (utility - prev),
        _ => 0.0,
    }
}

/// Saturating bound into (-bound, bound); near-linear for |raw| << bound.
pub fn bound_reward(raw: f64, bound: f64) -> f64 {
    let b = if bound.is_finite() && bound > 0.0 { bound } else { 10.0 };
    if raw.is_nan() {
        return -b;
    }
    b * (raw / b).tanh()
}

/// Diagnostic breakdown of one reward computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardComponents {
    pub eqe_term: f64,
    pub overlap_term: f64,
    pub balance_term: f64,
    pub brightness_term: f64,
    pub lifetime_term: f64,

    /// Penalty reported by the evaluator.
    pub metric_penalty: f64,
    /// Aggregated constraint severity.
    pub constraint_penalty: f64,
    pub penalty_total: f64,
    pub penalty_term: f64,
    pub leakage_term: f64,
    pub auger_term: f64,
    pub delta_params_norm: f64,
    pub jump_term: f64,

    pub hinge_overlap: f64,
    pub hinge_balance: f64,
    pub hinge_droop: f64,
    pub hinge_lifetime: f64,
    pub hinge_brightness: f64,
    pub hinge_voltage: f64,

    pub boundary_penalty: f64,
    pub thin_layer_penalty: f64,

    /// Weighted sum of positive terms.
    pub positive: f64,
    /// Weighted sum of penalty terms.
    pub negative: f64,
    /// Raw utility U; the controller threads this into the next step.
    pub utility: f64,
    pub previous_utility: Option<f64>,
    pub progress: f64,
    pub milestones_hit: u32,
    pub milestone_bonus: f64,
    /// Unbounded scalar before the saturating bound.
    pub raw: f64,
    pub reward: f64,
}

impl RewardComponents {
    /// Flat name -> value view for logging. `previous_utility` is omitted
    /// when absent.
    pub fn to_map(&self) -> BTreeMap<String, f64> {
        let mut m = BTreeMap::new();
        let mut put = |k: &str, v: f64| {
            m.insert(k.to_string(), v);
        };
        put("eqe_term", self.eqe_term);
        put("overlap_term", self.overlap_term);
        put("balance_term", self.balance_term);
        put("brightness_term", self.brightness_term);
        put("lifetime_term", self.lifetime_term);
        put("metric_penalty", self.metric_penalty);
        put("constraint_penalty", self.constraint_penalty);
        put("penalty_total", self.penalty_total);
        put("penalty_term", self.penalty_term);
        put("leakage_term", self.leakage_term);
        put("auger_term", self.auger_term);
        put("delta_params_norm", self.delta_params_norm);
        put("jump_term", self.jump_term);
        put("hinge_overlap", self.hinge_overlap);
        put("hinge_balance", self.hinge_balance);
        put("hinge_droop", self.hinge_droop);
        put("hinge_lifetime", self.hinge_lifetime);
        put("hinge_brightness", self.hinge_brightness);
        put("hinge_voltage", self.hinge_voltage);
        put("boundary_penalty", self.boundary_penalty);
        put("thin_layer_penalty", self.thin_layer_penalty);
        put("positive", self.positive);
        put("negative", self.negative);
        put("utility", self.utility);
        if let Some(prev) = self.previous_utility {
            put("previous_utility", prev);
        }
        put("progress", self.progress);
        put("milestones_hit", self.milestones_hit as f64);
        put("milestone_bonus", self.milestone_bonus);
        put("raw", self.raw);
        put("reward", self.reward);
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param_space::ConstraintViolation;
    use serde_json::json;

    fn basic(eqe: f64, overlap: f64, penalty: f64) -> MetricsRecord {
        let mut m = MetricsRecord::new();
        m.set(keys::EQE, eqe);
        m.set(keys::RECOMB_OVERLAP, overlap);
        m.set(keys::PENALTY, penalty);
        m
    }

    #[test]
    fn reward_increases_with_eqe_and_overlap() {
        let (low, _) = compute_reward(&basic(0.1, 0.6, 0.0), 0.0);
        let (high, _) = compute_reward(&basic(0.2, 0.8, 0.0), 0.0);
        assert!(high > low);
    }

    #[test]
    fn reward_penalizes_penalty() {
        let (base, _) = compute_reward(&basic(0.15, 0.7, 0.0), 0.0);
        let (penalized, _) = compute_reward(&basic(0.15, 0.7, 0.1), 0.0);
        assert!(penalized < base);
    }

    #[test]
    fn constraint_map_and_scalar_aggregate_identically() {
        let mut v = ConstraintViolation::new();
        v.insert("a", 0.5);
        v.insert("b", 1.0);
        v.insert("c", -3.0);
        let m = basic(10.0, 0.9, 0.2);
        let (r_map, c_map) = compute_reward(&m, &v);
        let (r_scalar, c_scalar) = compute_reward(&m, 1.5);
        assert!((c_map.constraint_penalty - 1.5).abs() < 1e-12);
        assert!((c_map.penalty_total - 1.7).abs() < 1e-12);
        assert_eq!(r_map, r_scalar);
        assert_eq!(c_map.utility, c_scalar.utility);
        let (_, c_neg) = compute_reward(&m, -4.0);
        assert_eq!(c_neg.constraint_penalty, 0.0);
    }

    #[test]
    fn hinges_are_zero_once_targets_are_met() {
        assert_eq!(shortfall_sq(0.7, 0.6), 0.0);
        assert!((shortfall_sq(0.3, 0.6) - 0.25).abs() < 1e-12);
        assert_eq!(excess_sq(4.0, 5.0), 0.0);
        assert!((excess_sq(5.5, 5.0) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn shaping_helpers_are_monotone_and_anchored() {
        assert_eq!(log2_shape(0.0, 40.0), 0.0);
        assert!((log2_shape(40.0, 40.0) - 1.0).abs() < 1e-12);
        assert!(log2_shape(80.0, 40.0) < 2.0);
        assert!(sqrt_shape(0.01) > 0.01);
        assert_eq!(sqrt_shape(4.0), 1.0);
    }

    #[test]
    fn progress_rewards_improvement_only_when_previous_exists() {
        assert_eq!(progress_term(2.0, None, 0.5), 0.0);
        assert!((progress_term(2.0, Some(1.0), 0.5) - 0.5).abs() < 1e-12);
        assert!(progress_term(1.0, Some(2.0), 0.5) < 0.0);
        assert_eq!(progress_term(1.0, Some(f64::NAN), 0.5), 0.0);
    }

    #[test]
    fn previous_utility_threads_into_progress() {
        let mut m = basic(20.0, 0.9, 0.0);
        let (_, first) = compute_reward(&m, 0.0);
        assert_eq!(first.progress, 0.0);
        m.set(keys::PREVIOUS_UTILITY, first.utility - 1.0);
        let (_, second) = compute_reward(&m, 0.0);
        assert!((second.progress - 0.5).abs() < 1e-9);
        assert_eq!(second.utility, first.utility);
    }

    #[test]
    fn milestones_are_small_relative_to_continuous_terms() {
        let mut m = basic(30.0, 0.85, 0.0);
        m.set(keys::INJ_BALANCE, 0.95);
        m.set(keys::LIFETIME, 1800.0);
        let (_, c) = compute_reward(&m, 0.0);
        assert_eq!(c.milestones_hit, 4);
        assert!((c.milestone_bonus - 0.2).abs() < 1e-12);
        assert!(c.milestone_bonus < 0.1 * c.positive);
    }

    #[test]
    fn malformed_metrics_degrade_to_defaults() {
        let mut m = MetricsRecord::new();
        m.set_raw(keys::EQE, json!("garbage"));
        m.set_raw(keys::RECOMB_OVERLAP, json!(null));
        m.set(keys::PENALTY, f64::NAN);
        m.set_raw(keys::PREVIOUS_UTILITY, json!({"nested": 1}));
        m.set_raw(keys::DELTA_PARAMS_NORM, json!([1, 2]));
        let (r, c) = compute_reward(&m, f64::INFINITY);
        assert!(r.is_finite());
        assert_eq!(c.eqe_term, 0.0);
        assert_eq!(c.penalty_total, 0.0);
        assert_eq!(c.hinge_overlap, 0.0);
        assert_eq!(c.previous_utility, None);
    }

    #[test]
    fn extreme_inputs_stay_within_bound() {
        let mut m = basic(1e300, 1.0, 1e300);
        m.set(keys::DELTA_PARAMS_NORM, 1e200);
        m.set(keys::BOUNDARY_PENALTY, 1e308);
        m.set(keys::PREVIOUS_UTILITY, -1e308);
        let (r, c) = compute_reward(&m, 1e300);
        assert!(r.is_finite());
        assert!(r.abs() <= 10.0);
        assert!(c.utility.is_finite());
        let (r_empty, _) = compute_reward(&MetricsRecord::new(), 0.0);
        assert!(r_empty.abs() <= 10.0);
    }

    #[test]
    fn diagnostic_map_exposes_utility() {
        let (r, c) = compute_reward(&basic(12.0, 0.7, 0.0), 0.0);
        let map = c.to_map();
        assert_eq!(map["reward"], r);
        assert_eq!(map["utility"], c.utility);
        assert!(!map.contains_key("previous_utility"));
    }
}
