// src/param_space.rs
//
// Design parameter space for QLED stacks.
//
// Provides:
// - normalized vector space for the optimizer: x in [-1, 1]^D
// - mapping between normalized vectors and physical parameter maps
// - soft constraint violation reporting and the hard-invalid gate
// - the optional metrics feature block appended to observations
//
// Dimension order is part of the contract: index i of every normalized vector
// refers to `dimensions()[i]` for the lifetime of the space.

use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{EnvError, EnvResult};
use crate::metrics::{keys, MetricsRecord};

/// Any single constraint severity above this ends the episode.
pub const HARD_INVALID_THRESHOLD: f64 = 20.0;

/// Physical parameters keyed by dimension name.
pub type PhysicalParams = BTreeMap<String, f64>;

/// One named, bounded axis of the design space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub low: f64,
    pub high: f64,
}

impl Dimension {
    pub fn new(name: &str, low: f64, high: f64) -> Self {
        Self {
            name: name.to_string(),
            low,
            high,
        }
    }

    /// [-1, 1] -> [low, high]. Non-finite input maps to the midpoint.
    pub fn to_real(&self, x: f64) -> f64 {
        if x.is_nan() {
            return self.to_real(0.0);
        }
        // Exact bounds at the box edges, independent of rounding in the affine map.
        if x <= -1.0 {
            return self.low;
        }
        if x >= 1.0 {
            return self.high;
        }
        let u = (x + 1.0) / 2.0;
        self.low + u * (self.high - self.low)
    }

    /// [low, high] -> [-1, 1], clamping out-of-range physical values first.
    pub fn to_normalized(&self, v: f64) -> f64 {
        if v.is_nan() {
            return 0.0;
        }
        let v = v.clamp(self.low, self.high);
        let u = (v - self.low) / (self.high - self.low).max(1e-12);
        (2.0 * u - 1.0).clamp(-1.0, 1.0)
    }
}

/// Whether a constraint caps the measured value from above or below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoundKind {
    /// Violated when measured > limit.
    Upper,
    /// Violated when measured < limit.
    Lower,
}

/// Declarative soft constraint over physical parameters.
///
/// The measured quantity is the sum of the named terms, which covers both
/// single-parameter ceilings and aggregate checks such as total stack
/// thickness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub name: String,
    pub terms: Vec<String>,
    pub limit: f64,
    pub bound: BoundKind,
}

impl Constraint {
    pub fn upper(name: &str, terms: &[&str], limit: f64) -> Self {
        Self {
            name: name.to_string(),
            terms: terms.iter().map(|t| t.to_string()).collect(),
            limit,
            bound: BoundKind::Upper,
        }
    }

    pub fn lower(name: &str, terms: &[&str], limit: f64) -> Self {
        Self {
            name: name.to_string(),
            terms: terms.iter().map(|t| t.to_string()).collect(),
            limit,
            bound: BoundKind::Lower,
        }
    }

    /// Severity for `params`, or `None` if any term is missing.
    pub fn severity(&self, params: &PhysicalParams) -> Option<f64> {
        let mut measured = 0.0;
        for term in &self.terms {
            measured += *params.get(term)?;
        }
        let raw = match self.bound {
            BoundKind::Upper => measured - self.limit,
            BoundKind::Lower => self.limit - measured,
        };
        Some(if raw.is_finite() { raw.max(0.0) } else { 0.0 })
    }
}

/// Constraint name -> non-negative severity (0 = satisfied).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConstraintViolation(BTreeMap<String, f64>);

impl ConstraintViolation {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, name: &str, severity: f64) {
        self.0.insert(name.to_string(), severity);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &f64)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sum of `max(0, v)` over finite entries.
    pub fn total(&self) -> f64 {
        self.0
            .values()
            .filter(|v| v.is_finite())
            .map(|v| v.max(0.0))
            .sum()
    }

    /// Largest single severity (0 when empty).
    pub fn max_severity(&self) -> f64 {
        self.0
            .values()
            .filter(|v| v.is_finite())
            .fold(0.0_f64, |acc, v| acc.max(*v))
    }

    pub fn as_map(&self) -> &BTreeMap<String, f64> {
        &self.0
    }
}

impl FromIterator<(String, f64)> for ConstraintViolation {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Constraint input accepted by the hard-invalid gate and the reward shaper:
/// either the per-constraint map or an already aggregated scalar.
#[derive(Debug, Clone, Copy)]
pub enum ViolationSummary<'a> {
    PerConstraint(&'a ConstraintViolation),
    Aggregate(f64),
}

impl<'a> From<&'a ConstraintViolation> for ViolationSummary<'a> {
    fn from(v: &'a ConstraintViolation) -> Self {
        ViolationSummary::PerConstraint(v)
    }
}

impl From<f64> for ViolationSummary<'_> {
    fn from(v: f64) -> Self {
        ViolationSummary::Aggregate(v)
    }
}

impl ViolationSummary<'_> {
    /// Aggregate non-negative severity.
    pub fn total(&self) -> f64 {
        match self {
            ViolationSummary::PerConstraint(v) => v.total(),
            ViolationSummary::Aggregate(v) if v.is_finite() => v.max(0.0),
            ViolationSummary::Aggregate(_) => 0.0,
        }
    }
}

/// One metric folded into the observation feature block as `tanh(v / scale)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricFeature {
    pub key: String,
    pub scale: f64,
}

impl MetricFeature {
    pub fn new(key: &str, scale: f64) -> Self {
        Self {
            key: key.to_string(),
            scale,
        }
    }
}

/// Ordered, bounded design space with constraints and observation features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpace {
    dims: Vec<Dimension>,
    constraints: Vec<Constraint>,
    metric_features: Vec<MetricFeature>,
}

impl Default for ParameterSpace {
    fn default() -> Self {
        Self::qled_default()
    }
}

impl ParameterSpace {
    /// Build a space, validating names and bounds.
    pub fn new(dims: Vec<Dimension>, constraints: Vec<Constraint>) -> EnvResult<Self> {
        if dims.is_empty() {
            return Err(EnvError::InvalidSpace("no dimensions declared".into()));
        }
        for (i, d) in dims.iter().enumerate() {
            if d.name.is_empty() {
                return Err(EnvError::InvalidSpace(format!("dimension {i} has an empty name")));
            }
            if !(d.low.is_finite() && d.high.is_finite() && d.low < d.high) {
                return Err(EnvError::InvalidSpace(format!(
                    "dimension '{}' needs finite low < high, got [{}, {}]",
                    d.name, d.low, d.high
                )));
            }
            if dims[..i].iter().any(|p| p.name == d.name) {
                return Err(EnvError::InvalidSpace(format!(
                    "duplicate dimension name '{}'",
                    d.name
                )));
            }
        }
        for c in &constraints {
            if !c.limit.is_finite() {
                return Err(EnvError::InvalidSpace(format!(
                    "constraint '{}' has a non-finite limit",
                    c.name
                )));
            }
        }
        Ok(Self {
            dims,
            constraints,
            metric_features: Vec::new(),
        })
    }

    /// The 13-dimensional QLED stack: transport-layer thicknesses, energy
    /// levels, doping, PS-microsphere / QD-superlattice microstructure, and
    /// drive voltage.
    pub fn qled_default() -> Self {
        let dims = vec![
            // thicknesses (nm)
            Dimension::new("t_HTL_nm", 10.0, 60.0),
            Dimension::new("t_EML_nm", 10.0, 40.0),
            Dimension::new("t_ETL_nm", 10.0, 60.0),
            // injection / energy-level proxies (eV)
            Dimension::new("phi_HTL_eV", 4.8, 5.6),
            Dimension::new("phi_ETL_eV", 3.8, 4.5),
            // doping / defect proxies
            Dimension::new("p_doping_HTL", 0.0, 0.30),
            Dimension::new("n_doping_ETL", 0.0, 0.30),
            // microstructure
            Dimension::new("ps_radius_nm", 50.0, 250.0),
            Dimension::new("ps_fill_frac", 0.0, 0.50),
            Dimension::new("sl_thickness_nm", 8.0, 30.0),
            Dimension::new("sl_gap_um", 0.3, 5.0),
            Dimension::new("qd_coverage", 0.2, 1.0),
            // drive
            Dimension::new("V_drive", 2.0, 6.0),
        ];
        let constraints = vec![
            Constraint::upper(
                "t_total_over_180nm",
                &["t_HTL_nm", "t_EML_nm", "t_ETL_nm"],
                180.0,
            ),
            Constraint::upper("ps_fill_frac_over_0p45", &["ps_fill_frac"], 0.45),
            Constraint::lower("sl_gap_under_0p5um", &["sl_gap_um"], 0.5),
            Constraint::upper("V_drive_over_5p5V", &["V_drive"], 5.5),
        ];
        Self {
            dims,
            constraints,
            metric_features: Self::standard_metric_features(),
        }
    }

    /// Feature block used by the default space when metrics are folded into
    /// observations. Scales are the typical magnitude of each proxy.
    pub fn standard_metric_features() -> Vec<MetricFeature> {
        vec![
            MetricFeature::new(keys::EQE, 40.0),
            MetricFeature::new(keys::RECOMB_OVERLAP, 1.0),
            MetricFeature::new(keys::INJ_BALANCE, 1.0),
            MetricFeature::new(keys::DROOP, 1.0),
            MetricFeature::new(keys::BRIGHTNESS, 1000.0),
            MetricFeature::new(keys::LEAKAGE, 1.0),
            MetricFeature::new(keys::AUGER_RATE, 1.0),
            MetricFeature::new(keys::LIFETIME, 2000.0),
            MetricFeature::new(keys::PENALTY, 1.0),
        ]
    }

    pub fn with_metric_features(mut self, features: Vec<MetricFeature>) -> Self {
        self.metric_features = features;
        self
    }

    pub fn dim(&self) -> usize {
        self.dims.len()
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dims
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn names(&self) -> Vec<&str> {
        self.dims.iter().map(|d| d.name.as_str()).collect()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.dims.iter().position(|d| d.name == name)
    }

    pub fn dimension(&self, name: &str) -> Option<&Dimension> {
        self.dims.iter().find(|d| d.name == name)
    }

    /// Length of the metrics feature block.
    pub fn metrics_dim(&self) -> usize {
        self.metric_features.len()
    }

    // ----- sampling -----

    /// Sample x in [-1, 1]^D uniformly, one draw per dimension in order.
    pub fn sample_normalized<R: Rng>(&self, rng: &mut R) -> Vec<f64> {
        self.dims.iter().map(|_| rng.gen_range(-1.0..=1.0)).collect()
    }

    // ----- mapping -----

    /// Map a normalized vector to physical units.
    ///
    /// Components are clamped to [-1, 1]; missing trailing components are
    /// treated as 0 (range midpoint).
    pub fn to_real(&self, x: &[f64]) -> PhysicalParams {
        self.dims
            .iter()
            .enumerate()
            .map(|(i, d)| (d.name.clone(), d.to_real(x.get(i).copied().unwrap_or(0.0))))
            .collect()
    }

    /// Map physical parameters back to a normalized vector.
    ///
    /// Strict: every declared dimension must be present. Extra keys are
    /// ignored.
    pub fn to_normalized(&self, params: &PhysicalParams) -> EnvResult<Vec<f64>> {
        self.dims
            .iter()
            .map(|d| {
                params
                    .get(&d.name)
                    .map(|v| d.to_normalized(*v))
                    .ok_or_else(|| EnvError::missing_dimension(&d.name))
            })
            .collect()
    }

    // ----- constraints -----

    /// Evaluate every declared constraint. Constraints referencing a missing
    /// parameter are skipped.
    pub fn constraint_violation(&self, params: &PhysicalParams) -> ConstraintViolation {
        let mut out = ConstraintViolation::new();
        for c in &self.constraints {
            match c.severity(params) {
                Some(s) => out.insert(&c.name, s),
                None => log::debug!("constraint '{}' skipped: missing term", c.name),
            }
        }
        out
    }

    /// True iff any single severity exceeds `HARD_INVALID_THRESHOLD`, or the
    /// aggregate scalar does.
    pub fn is_hard_invalid<'a>(&self, violation: impl Into<ViolationSummary<'a>>) -> bool {
        match violation.into() {
            ViolationSummary::PerConstraint(v) => {
                v.iter().any(|(_, s)| *s > HARD_INVALID_THRESHOLD)
            }
            ViolationSummary::Aggregate(s) => s > HARD_INVALID_THRESHOLD,
        }
    }

    // ----- observation features -----

    /// Metrics feature block, each entry `tanh(value / scale)`; missing or
    /// unreadable metrics contribute 0.
    pub fn metrics_to_vec(&self, metrics: &MetricsRecord) -> Vec<f64> {
        self.metric_features
            .iter()
            .map(|f| {
                let v = metrics.get_f64_or(&f.key, 0.0);
                (v / f.scale.abs().max(1e-12)).tanh()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn default_space_has_thirteen_ordered_dims() {
        let ps = ParameterSpace::qled_default();
        assert_eq!(ps.dim(), 13);
        assert_eq!(ps.names()[0], "t_HTL_nm");
        assert_eq!(ps.names()[12], "V_drive");
        assert_eq!(ps.index_of("t_EML_nm"), Some(1));
        assert_eq!(ps.metrics_dim(), 9);
    }

    #[test]
    fn boundary_components_hit_bounds_exactly() {
        let ps = ParameterSpace::qled_default();
        let lo = ps.to_real(&vec![-1.0; ps.dim()]);
        let hi = ps.to_real(&vec![1.0; ps.dim()]);
        for d in ps.dimensions() {
            assert_eq!(lo[&d.name], d.low);
            assert_eq!(hi[&d.name], d.high);
        }
    }

    #[test]
    fn to_real_clamps_out_of_range_components() {
        let ps = ParameterSpace::qled_default();
        let p = ps.to_real(&vec![5.0; ps.dim()]);
        assert_eq!(p["V_drive"], 6.0);
        let p = ps.to_real(&vec![f64::NAN; ps.dim()]);
        assert!((p["V_drive"] - 4.0).abs() < 1e-12);
    }

    #[test]
    fn to_normalized_clamps_physical_values() {
        let ps = ParameterSpace::qled_default();
        let mut p = ps.to_real(&vec![0.0; ps.dim()]);
        p.insert("V_drive".into(), 9.0);
        let x = ps.to_normalized(&p).unwrap();
        assert_eq!(x[12], 1.0);
    }

    #[test]
    fn missing_dimension_is_an_error() {
        let ps = ParameterSpace::qled_default();
        let mut p = ps.to_real(&vec![0.0; ps.dim()]);
        p.remove("sl_gap_um");
        let err = ps.to_normalized(&p).unwrap_err();
        assert_eq!(err, EnvError::missing_dimension("sl_gap_um"));
    }

    #[test]
    fn sampling_is_seeded_and_in_range() {
        let ps = ParameterSpace::qled_default();
        let a = ps.sample_normalized(&mut ChaCha8Rng::seed_from_u64(7));
        let b = ps.sample_normalized(&mut ChaCha8Rng::seed_from_u64(7));
        assert_eq!(a, b);
        assert!(a.iter().all(|v| (-1.0..=1.0).contains(v)));
    }

    #[test]
    fn default_constraints_report_each_check() {
        let ps = ParameterSpace::qled_default();
        let mut p = ps.to_real(&vec![0.0; ps.dim()]);
        p.insert("V_drive".into(), 5.75);
        p.insert("sl_gap_um".into(), 0.4);
        let v = ps.constraint_violation(&p);
        assert_eq!(v.len(), 4);
        assert!((v.get("V_drive_over_5p5V").unwrap() - 0.25).abs() < 1e-12);
        assert!((v.get("sl_gap_under_0p5um").unwrap() - 0.1).abs() < 1e-12);
        assert_eq!(v.get("t_total_over_180nm"), Some(0.0));
        assert!(!ps.is_hard_invalid(&v));
    }

    #[test]
    fn hard_invalid_accepts_map_or_scalar() {
        let ps = ParameterSpace::qled_default();
        let mut v = ConstraintViolation::new();
        v.insert("a", 12.0);
        v.insert("b", 12.0);
        // Sum is 24 but no single entry exceeds the threshold.
        assert!(!ps.is_hard_invalid(&v));
        v.insert("c", 20.5);
        assert!(ps.is_hard_invalid(&v));
        assert!(ps.is_hard_invalid(20.5));
        assert!(!ps.is_hard_invalid(20.0));
    }

    #[test]
    fn new_rejects_bad_spaces() {
        assert!(ParameterSpace::new(vec![], vec![]).is_err());
        assert!(ParameterSpace::new(vec![Dimension::new("a", 1.0, 1.0)], vec![]).is_err());
        assert!(ParameterSpace::new(
            vec![Dimension::new("a", 0.0, 1.0), Dimension::new("a", 0.0, 2.0)],
            vec![]
        )
        .is_err());
    }

    #[test]
    fn metrics_block_is_bounded_and_tolerates_missing() {
        let ps = ParameterSpace::qled_default();
        let mut m = MetricsRecord::new();
        m.set(keys::EQE, 1e9);
        let f = ps.metrics_to_vec(&m);
        assert_eq!(f.len(), ps.metrics_dim());
        assert!(f.iter().all(|v| (-1.0..=1.0).contains(v)));
        assert_eq!(f[1], 0.0);
    }
}
