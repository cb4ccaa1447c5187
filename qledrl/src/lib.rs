//! qledrl core library.
//!
//! A design-space environment for QLED device stacks. An external optimizer
//! proposes bounded adjustments to a normalized design vector; the crate maps
//! them to physical units, scores the design with a physics proxy, shapes the
//! metrics into one bounded reward and decides when an episode ends.
//!
//! # Components (leaves first)
//!
//! - **ParameterSpace** (`param_space`): named bounded dimensions, the
//!   normalized <-> physical mapping, soft constraint violations and the
//!   hard-invalid gate.
//! - **Evaluator** (`evaluator`): trait for physics proxies; `SurrogateSim`
//!   is the built-in analytic model, `PrecomputedEvaluator` and
//!   `FnEvaluator` are substitution points.
//! - **Reward** (`reward`): `compute_reward`, a pure multi-term shaper with
//!   centrally declared weights and targets, bounded to [-10, 10].
//! - **QledEnv** (`env`): Gym-style reset / step with explicit shaping
//!   memory, terminated / truncated flags and a `VecEnv` for batches.
//!
//! # Ambient pieces
//!
//! - `config`: `EnvConfig` with QLEDRL_* environment overrides
//! - `error`: `EnvError`, surfaced only for caller misuse
//! - `safety`: action guard (pad / truncate / clamp, recorded not raised)
//! - `telemetry`: optional JSONL sink (QLEDRL_TELEMETRY_MODE / _PATH)
//! - `runner`: `Policy` seam, smoke policies and rollout summaries

pub mod config;
pub mod env;
pub mod error;
pub mod evaluator;
pub mod metrics;
pub mod param_space;
pub mod reward;
pub mod runner;
pub mod safety;
pub mod telemetry;

// --- Re-exports for ergonomic external use ---------------------------------

pub use config::{AntiCheatConfig, EnvConfig};
pub use env::{
    EpisodePhase, QledEnv, ResetInfo, ResetResult, ShapingMemory, StepInfo, StepResult,
    TerminationReason, VecEnv,
};
pub use error::{EnvError, EnvResult};
pub use evaluator::{Evaluator, FnEvaluator, PrecomputedEvaluator, SurrogateParams, SurrogateSim};
pub use metrics::{keys, MetricsRecord};
pub use param_space::{
    BoundKind, Constraint, ConstraintViolation, Dimension, MetricFeature, ParameterSpace,
    PhysicalParams, ViolationSummary, HARD_INVALID_THRESHOLD,
};
pub use reward::{
    compute_reward, compute_reward_with, Milestones, RewardComponents, RewardConfig,
    RewardTargets, RewardWeights,
};
pub use runner::{
    run_episode, run_rollouts, EpisodeSummary, Policy, RandomPolicy, RolloutReport, ZeroPolicy,
};
pub use safety::{ActionGuard, GuardResult};
pub use telemetry::{EpisodeMarker, StepRecord, Telemetry, SCHEMA_VERSION};
