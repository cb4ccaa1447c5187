// src/evaluator.rs
//
// Evaluators: physical parameters -> metrics record.
//
// `Evaluator` is the substitution seam. `SurrogateSim` is the physics-inspired
// proxy used by default; `PrecomputedEvaluator` replays a record computed
// elsewhere and `FnEvaluator` adapts a closure. None of them sees episode
// state.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::metrics::{keys, MetricsRecord};
use crate::param_space::PhysicalParams;

/// Floor for denominators and log arguments.
const EPS: f64 = 1e-12;

/// Pure mapping from a physical design to performance metrics.
pub trait Evaluator {
    /// Evaluate one design. Must not panic and must not depend on call order.
    fn evaluate(&self, params: &PhysicalParams) -> MetricsRecord;

    /// Short identifier for logs and summaries.
    fn name(&self) -> &'static str {
        "evaluator"
    }
}

impl<E: Evaluator + ?Sized> Evaluator for Box<E> {
    fn evaluate(&self, params: &PhysicalParams) -> MetricsRecord {
        (**self).evaluate(params)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

impl<E: Evaluator + ?Sized> Evaluator for std::sync::Arc<E> {
    fn evaluate(&self, params: &PhysicalParams) -> MetricsRecord {
        (**self).evaluate(params)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn gaussian(x: f64, center: f64, sigma: f64) -> f64 {
    let s = sigma.abs().max(EPS);
    (-((x - center) * (x - center)) / (2.0 * s * s)).exp()
}

fn finite_or(v: f64, fallback: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        fallback
    }
}

/// Reference constants of the physics proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurrogateParams {
    /// Peak EQE scale (%).
    pub eqe_scale: f64,
    /// HTL work-function reference (eV).
    pub phi_htl_ref_ev: f64,
    /// ETL work-function reference (eV).
    pub phi_etl_ref_ev: f64,
    /// Width of the injection-balance Gaussian (eV^2).
    pub balance_width_ev2: f64,
    /// Active-layer thickness with the best recombination overlap (nm).
    pub eml_optimum_nm: f64,
    /// Spread of the overlap Gaussian (nm).
    pub eml_sigma_nm: f64,
    /// Drive voltage above which efficiency droop sets in (V).
    pub droop_onset_v: f64,
    /// Brightness scale (cd/m^2).
    pub brightness_scale: f64,
    /// Lifetime scale (h).
    pub lifetime_scale: f64,
}

impl Default for SurrogateParams {
    fn default() -> Self {
        Self {
            eqe_scale: 20.0,
            phi_htl_ref_ev: 5.2,
            phi_etl_ref_ev: 4.1,
            balance_width_ev2: 0.05,
            eml_optimum_nm: 18.0,
            eml_sigma_nm: 7.0,
            droop_onset_v: 4.0,
            brightness_scale: 1000.0,
            lifetime_scale: 2000.0,
        }
    }
}

/// Per-factor outcoupling gains; the product is the total gain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutcouplingGains {
    pub mie: f64,
    pub coverage: f64,
    pub superlattice: f64,
    pub gap: f64,
    pub qd: f64,
}

impl OutcouplingGains {
    pub fn total(&self) -> f64 {
        self.mie * self.coverage * self.superlattice * self.gap * self.qd
    }
}

/// Physics-inspired QLED proxy.
///
/// Efficiency is a product of injection balance, recombination overlap,
/// outcoupling and droop. Brightness, leakage, Auger rate and lifetime are
/// derived so that pushing the drive voltage up buys brightness at the cost
/// of droop and lifetime.
#[derive(Debug, Clone, Default)]
pub struct SurrogateSim {
    pub params: SurrogateParams,
}

impl SurrogateSim {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(params: SurrogateParams) -> Self {
        Self { params }
    }

    /// Nominal value used when a key is missing or non-finite.
    fn nominal(key: &str) -> f64 {
        match key {
            "t_HTL_nm" | "t_ETL_nm" => 35.0,
            "t_EML_nm" => 18.0,
            "phi_HTL_eV" => 5.2,
            "phi_ETL_eV" => 4.1,
            "p_doping_HTL" | "n_doping_ETL" => 0.075,
            "ps_radius_nm" => 120.0,
            "ps_fill_frac" => 0.2,
            "sl_thickness_nm" => 15.0,
            "sl_gap_um" => 1.2,
            "qd_coverage" => 0.8,
            "V_drive" => 4.0,
            _ => 0.0,
        }
    }

    fn read(params: &PhysicalParams, key: &str) -> f64 {
        match params.get(key) {
            Some(v) if v.is_finite() => *v,
            _ => {
                log::debug!("surrogate: '{key}' missing or non-finite, using nominal");
                Self::nominal(key)
            }
        }
    }

    /// Gaussian in the mismatch between hole and electron injection barriers.
    pub fn injection_balance(&self, phi_htl: f64, phi_etl: f64) -> f64 {
        let p = &self.params;
        let mismatch = ((phi_htl - p.phi_htl_ref_ev) - (p.phi_etl_ref_ev - phi_etl)).abs();
        (-(mismatch * mismatch) / p.balance_width_ev2.max(EPS)).exp()
    }

    /// Doping-driven carrier supply boost in (0, 1).
    pub fn injection_boost(p_doping: f64, n_doping: f64) -> f64 {
        sigmoid(8.0 * (p_doping + n_doping - 0.15))
    }

    /// Overlap of the recombination zone with the QD layer, in [0, 1].
    pub fn recombination_overlap(&self, t_eml_nm: f64) -> f64 {
        gaussian(t_eml_nm, self.params.eml_optimum_nm, self.params.eml_sigma_nm)
    }

    /// Microstructure sweet-spot gains, each at or above its floor.
    pub fn outcoupling_gains(
        ps_radius_nm: f64,
        ps_fill_frac: f64,
        sl_thickness_nm: f64,
        sl_gap_um: f64,
        qd_coverage: f64,
    ) -> OutcouplingGains {
        OutcouplingGains {
            mie: 1.0 + 0.6 * gaussian(ps_radius_nm, 120.0, 50.0),
            coverage: 1.0 + 0.8 * (ps_fill_frac / 0.30).clamp(0.0, 1.0),
            superlattice: 1.0 + 0.4 * gaussian(sl_thickness_nm, 15.0, 6.0),
            gap: 1.0 + 0.3 * gaussian(sl_gap_um, 1.2, 0.8),
            qd: 0.6 + 0.4 * qd_coverage.clamp(0.0, 1.0),
        }
    }

    /// Efficiency droop factor in (0, 1]; 1 below the onset voltage.
    pub fn droop_factor(&self, v_drive: f64) -> f64 {
        (-(v_drive - self.params.droop_onset_v).max(0.0)).exp()
    }

    /// Fabrication-risk penalty: excess fill fraction, thin active layer,
    /// narrow superlattice spacing.
    pub fn fabrication_penalty(ps_fill_frac: f64, t_eml_nm: f64, sl_gap_um: f64) -> f64 {
        let mut penalty = 0.0;
        if ps_fill_frac > 0.45 {
            penalty += (ps_fill_frac - 0.45) * 5.0;
        }
        if t_eml_nm < 12.0 {
            penalty += (12.0 - t_eml_nm) * 0.2;
        }
        if sl_gap_um < 0.5 {
            penalty += (0.5 - sl_gap_um) * 2.0;
        }
        penalty
    }
}

impl Evaluator for SurrogateSim {
    fn evaluate(&self, params: &PhysicalParams) -> MetricsRecord {
        let p = &self.params;

        let t_eml = Self::read(params, "t_EML_nm");
        let phi_h = Self::read(params, "phi_HTL_eV");
        let phi_e = Self::read(params, "phi_ETL_eV");
        let p_d = Self::read(params, "p_doping_HTL");
        let n_d = Self::read(params, "n_doping_ETL");
        let ps_r = Self::read(params, "ps_radius_nm");
        let ps_ff = Self::read(params, "ps_fill_frac");
        let sl_t = Self::read(params, "sl_thickness_nm");
        let sl_gap = Self::read(params, "sl_gap_um");
        let qd_cov = Self::read(params, "qd_coverage");
        let v = Self::read(params, "V_drive");

        let inj_balance = self.injection_balance(phi_h, phi_e);
        let inj_boost = Self::injection_boost(p_d, n_d);
        let overlap = self.recombination_overlap(t_eml);
        let outcoupling = Self::outcoupling_gains(ps_r, ps_ff, sl_t, sl_gap, qd_cov).total();
        let droop = self.droop_factor(v);
        let penalty = Self::fabrication_penalty(ps_ff, t_eml, sl_gap);

        let eqe = (p.eqe_scale * inj_balance * (0.5 + 0.5 * inj_boost) * overlap * outcoupling
            * droop)
            .max(0.0);

        let over_v = (v - p.droop_onset_v).max(0.0);
        let brightness =
            p.brightness_scale * (0.3 + 0.7 * inj_boost) * (0.5 + 0.5 * overlap) * droop;
        let leakage = (1.0 - inj_balance).max(0.0)
            * (0.5 + p_d + n_d)
            * (1.0 + (ps_ff - 0.30).max(0.0));
        let auger_rate = over_v * over_v
            * (0.5 + 0.5 * inj_boost)
            * (0.5 + 0.5 * brightness / p.brightness_scale.max(EPS));
        let lifetime = p.lifetime_scale / (1.0 + 3.0 * leakage + 5.0 * auger_rate + over_v);

        let mut m = MetricsRecord::new();
        m.set(keys::EQE, finite_or(eqe, 0.0));
        m.set(keys::RECOMB_OVERLAP, finite_or(overlap, 0.0).clamp(0.0, 1.0));
        m.set(keys::PENALTY, finite_or(penalty, 0.0).max(0.0));
        m.set(keys::INJ_BALANCE, finite_or(inj_balance, 0.0));
        m.set(keys::OUTCOUPLING, finite_or(outcoupling, 1.0));
        m.set(keys::DROOP, finite_or(droop, 0.0));
        m.set(keys::BRIGHTNESS, finite_or(brightness, 0.0));
        m.set(keys::LEAKAGE, finite_or(leakage, 0.0));
        m.set(keys::AUGER_RATE, finite_or(auger_rate, 0.0));
        m.set(keys::LIFETIME, finite_or(lifetime, 0.0));
        m
    }

    fn name(&self) -> &'static str {
        "surrogate_sim"
    }
}

/// Returns a fixed, externally computed metrics record for every design.
#[derive(Debug, Clone, Default)]
pub struct PrecomputedEvaluator {
    metrics: MetricsRecord,
}

impl PrecomputedEvaluator {
    pub fn new(metrics: MetricsRecord) -> Self {
        Self { metrics }
    }

    /// Parse a flat JSON object such as `{"EQE": 12.0, "recomb_overlap": 0.8}`.
    pub fn from_json(s: &str) -> serde_json::Result<Self> {
        Ok(Self::new(serde_json::from_str(s)?))
    }

    pub fn metrics(&self) -> &MetricsRecord {
        &self.metrics
    }
}

impl Evaluator for PrecomputedEvaluator {
    fn evaluate(&self, _params: &PhysicalParams) -> MetricsRecord {
        self.metrics.clone()
    }

    fn name(&self) -> &'static str {
        "precomputed"
    }
}

/// Adapts a closure to the `Evaluator` trait.
#[derive(Clone)]
pub struct FnEvaluator<F> {
    f: F,
}

impl<F> FnEvaluator<F>
where
    F: Fn(&PhysicalParams) -> MetricsRecord,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> fmt::Debug for FnEvaluator<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnEvaluator")
    }
}

impl<F> Evaluator for FnEvaluator<F>
where
    F: Fn(&PhysicalParams) -> MetricsRecord,
{
    fn evaluate(&self, params: &PhysicalParams) -> MetricsRecord {
        (self.f)(params)
    }

    fn name(&self) -> &'static str {
        "fn"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param_space::ParameterSpace;

    fn nominal_params() -> PhysicalParams {
        [
            ("t_HTL_nm", 35.0),
            ("t_EML_nm", 18.0),
            ("t_ETL_nm", 35.0),
            ("phi_HTL_eV", 5.2),
            ("phi_ETL_eV", 4.1),
            ("p_doping_HTL", 0.1),
            ("n_doping_ETL", 0.1),
            ("ps_radius_nm", 120.0),
            ("ps_fill_frac", 0.3),
            ("sl_thickness_nm", 15.0),
            ("sl_gap_um", 1.2),
            ("qd_coverage", 1.0),
            ("V_drive", 3.5),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }

    #[test]
    fn emits_every_metric_key() {
        let m = SurrogateSim::new().evaluate(&nominal_params());
        for key in [
            keys::EQE,
            keys::RECOMB_OVERLAP,
            keys::PENALTY,
            keys::INJ_BALANCE,
            keys::OUTCOUPLING,
            keys::DROOP,
            keys::BRIGHTNESS,
            keys::LEAKAGE,
            keys::AUGER_RATE,
            keys::LIFETIME,
        ] {
            assert!(m.get_f64(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn sweet_spot_design_peaks() {
        let m = SurrogateSim::new().evaluate(&nominal_params());
        assert!((m.get_f64(keys::RECOMB_OVERLAP).unwrap() - 1.0).abs() < 1e-12);
        assert!((m.get_f64(keys::INJ_BALANCE).unwrap() - 1.0).abs() < 1e-12);
        assert_eq!(m.get_f64(keys::DROOP), Some(1.0));
        assert_eq!(m.get_f64(keys::PENALTY), Some(0.0));
        assert_eq!(m.get_f64(keys::AUGER_RATE), Some(0.0));
        assert!(m.get_f64(keys::EQE).unwrap() > 20.0);
    }

    #[test]
    fn high_voltage_trades_efficiency_for_reliability() {
        let sim = SurrogateSim::new();
        let mut lo = nominal_params();
        lo.insert("V_drive".into(), 4.0);
        let mut hi = nominal_params();
        hi.insert("V_drive".into(), 6.0);
        let m_lo = sim.evaluate(&lo);
        let m_hi = sim.evaluate(&hi);
        assert!(m_hi.get_f64(keys::EQE).unwrap() < m_lo.get_f64(keys::EQE).unwrap());
        assert!(m_hi.get_f64(keys::LIFETIME).unwrap() < m_lo.get_f64(keys::LIFETIME).unwrap());
        assert!(m_hi.get_f64(keys::AUGER_RATE).unwrap() > 0.0);
    }

    #[test]
    fn fabrication_penalty_accumulates() {
        let p = SurrogateSim::fabrication_penalty(0.5, 10.0, 0.3);
        let expected = 0.05 * 5.0 + 2.0 * 0.2 + 0.2 * 2.0;
        assert!((p - expected).abs() < 1e-12);
        assert_eq!(SurrogateSim::fabrication_penalty(0.2, 20.0, 1.0), 0.0);
    }

    #[test]
    fn extreme_and_missing_inputs_stay_finite() {
        let sim = SurrogateSim::new();
        let mut p = PhysicalParams::new();
        p.insert("V_drive".into(), f64::INFINITY);
        p.insert("phi_HTL_eV".into(), 1e300);
        p.insert("t_EML_nm".into(), -1e300);
        let m = sim.evaluate(&p);
        for (k, v) in m.to_f64_map() {
            assert!(v.is_finite(), "{k} not finite");
        }
        assert_eq!(m.to_f64_map().len(), 10);
    }

    #[test]
    fn whole_default_box_is_finite_with_bounded_overlap() {
        let ps = ParameterSpace::qled_default();
        let sim = SurrogateSim::new();
        for corner in [-1.0, -0.5, 0.0, 0.5, 1.0] {
            let m = sim.evaluate(&ps.to_real(&vec![corner; ps.dim()]));
            let ov = m.get_f64(keys::RECOMB_OVERLAP).unwrap();
            assert!((0.0..=1.0).contains(&ov));
            assert!(m.get_f64(keys::PENALTY).unwrap() >= 0.0);
        }
    }

    #[test]
    fn precomputed_replays_record() {
        let e = PrecomputedEvaluator::from_json(r#"{"EQE": 12.0, "recomb_overlap": 0.8}"#)
            .unwrap();
        let m = e.evaluate(&PhysicalParams::new());
        assert_eq!(m.get_f64(keys::EQE), Some(12.0));
        assert_eq!(e.name(), "precomputed");
    }

    #[test]
    fn boxed_and_closure_evaluators_dispatch() {
        let boxed: Box<dyn Evaluator> = Box::new(FnEvaluator::new(|p: &PhysicalParams| {
            let mut m = MetricsRecord::new();
            m.set(keys::EQE, p.len() as f64);
            m
        }));
        let m = boxed.evaluate(&nominal_params());
        assert_eq!(m.get_f64(keys::EQE), Some(13.0));
        assert_eq!(boxed.name(), "fn");
    }
}
