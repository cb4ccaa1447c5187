// src/env.rs
//
// Gym-style episodic controller over the QLED design space.
//
// - QledEnv: single environment (reset, step)
// - VecEnv: N independent environments for batched rollouts
// - deterministic given seed + action sequence
//
// One step: guard action -> move x -> physical params -> metrics + violation
// -> anti-cheat terms -> inject shaping signals -> reward -> flags -> memory.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::config::EnvConfig;
use crate::error::{EnvError, EnvResult};
use crate::evaluator::{Evaluator, SurrogateSim};
use crate::metrics::{keys, MetricsRecord};
use crate::param_space::{ConstraintViolation, ParameterSpace, PhysicalParams};
use crate::reward::RewardComponents;
use crate::safety::ActionGuard;

/// Dimension read for the `v_drive` shaping signal.
const DRIVE_VOLTAGE_DIM: &str = "V_drive";

/// Cross-step shaping state. Cleared at reset, dropped at episode end.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShapingMemory {
    pub previous_utility: Option<f64>,
    pub previous_x: Option<Vec<f64>>,
}

impl ShapingMemory {
    pub fn is_empty(&self) -> bool {
        self.previous_utility.is_none() && self.previous_x.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EpisodePhase {
    NotReset,
    Active,
    Ended,
}

/// Why an episode ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationReason {
    /// A constraint severity exceeded the hard-invalid threshold.
    HardInvalid,
    /// The step counter reached `max_steps`.
    MaxSteps,
}

/// Diagnostics returned with the initial observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetInfo {
    pub seed: u64,
    pub params: PhysicalParams,
    pub metrics: MetricsRecord,
    pub violation: ConstraintViolation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetResult {
    pub observation: Vec<f64>,
    pub info: ResetInfo,
}

/// Per-step diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepInfo {
    /// Step index after this step (1-based).
    pub step: u32,
    pub params: PhysicalParams,
    /// Evaluator output, before shaping signals are injected.
    pub metrics: MetricsRecord,
    pub violation: ConstraintViolation,
    pub reward_components: RewardComponents,
    pub termination_reason: Option<TerminationReason>,
    /// Action actually applied, after the guard.
    pub action: Vec<f64>,
    /// Adjustments made to the incoming action (empty when it was clean).
    pub action_adjustments: Vec<String>,
}

/// Result of a single environment step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub observation: Vec<f64>,
    pub reward: f64,
    /// Episode ended on a hard-invalid design.
    pub terminated: bool,
    /// Episode hit `max_steps`.
    pub truncated: bool,
    pub info: StepInfo,
}

impl StepResult {
    pub fn done(&self) -> bool {
        self.terminated || self.truncated
    }
}

/// Episodic design environment.
pub struct QledEnv<E: Evaluator = SurrogateSim> {
    space: ParameterSpace,
    evaluator: E,
    config: EnvConfig,
    /// Seeds `reset(None)`; reseeded from the episode seed on every reset.
    rng: ChaCha8Rng,
    x: Vec<f64>,
    step: u32,
    phase: EpisodePhase,
    memory: ShapingMemory,
    seed: u64,
}

impl QledEnv<SurrogateSim> {
    /// Default QLED space with the surrogate evaluator.
    pub fn new(config: EnvConfig) -> EnvResult<Self> {
        Self::with_evaluator(ParameterSpace::qled_default(), SurrogateSim::new(), config)
    }
}

impl<E: Evaluator> QledEnv<E> {
    pub fn with_evaluator(space: ParameterSpace, evaluator: E, config: EnvConfig) -> EnvResult<Self> {
        config.validate()?;
        let rng = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::seed_from_u64(rand::thread_rng().gen()),
        };
        let x = vec![0.0; space.dim()];
        Ok(Self {
            space,
            evaluator,
            config,
            rng,
            x,
            step: 0,
            phase: EpisodePhase::NotReset,
            memory: ShapingMemory::default(),
            seed: 0,
        })
    }

    /// Start a new episode.
    ///
    /// `seed` reseeds the episode generator; without one the next seed is
    /// drawn from the environment's generator. `init_params` pins the
    /// starting design (every dimension must be present); otherwise x is
    /// sampled uniformly.
    pub fn reset(
        &mut self,
        seed: Option<u64>,
        init_params: Option<&PhysicalParams>,
    ) -> EnvResult<ResetResult> {
        let seed = seed.unwrap_or_else(|| self.rng.gen());
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let x = match init_params {
            Some(params) => match self.space.to_normalized(params) {
                Ok(x) => x,
                Err(err) => {
                    // The previous episode is abandoned; stepping needs a new reset.
                    self.phase = EpisodePhase::NotReset;
                    self.memory = ShapingMemory::default();
                    return Err(err);
                }
            },
            None => self.space.sample_normalized(&mut rng),
        };

        self.seed = seed;
        self.rng = rng;
        self.x = x;
        self.step = 0;
        self.memory = ShapingMemory::default();
        self.phase = EpisodePhase::Active;

        let params = self.space.to_real(&self.x);
        let metrics = self.evaluator.evaluate(&params);
        let violation = self.space.constraint_violation(&params);
        let observation = self.observe(&metrics);

        log::debug!(
            "reset: seed={} evaluator={} dim={}",
            seed,
            self.evaluator.name(),
            self.space.dim()
        );

        Ok(ResetResult {
            observation,
            info: ResetInfo {
                seed,
                params,
                metrics,
                violation,
            },
        })
    }

    /// Apply one action.
    ///
    /// Fails with `NotReset` before the first reset and with `EpisodeEnded`
    /// after termination or truncation.
    pub fn step(&mut self, action: &[f64]) -> EnvResult<StepResult> {
        self.ensure_active()?;

        let guard = ActionGuard::apply(action, self.space.dim());
        if guard.was_adjusted() {
            log::warn!("step {}: action adjusted: {:?}", self.step + 1, guard.adjustments);
        }

        let scale = self.config.action_scale;
        for (xi, ai) in self.x.iter_mut().zip(&guard.applied) {
            *xi = (*xi + scale * ai).clamp(-1.0, 1.0);
        }
        self.step += 1;

        let params = self.space.to_real(&self.x);
        let metrics = self.evaluator.evaluate(&params);
        let violation = self.space.constraint_violation(&params);

        let delta_params_norm = match &self.memory.previous_x {
            Some(prev) => l2_distance(&self.x, prev),
            None => l2_norm(guard.applied.iter().map(|a| scale * a)),
        };
        let anti_cheat = &self.config.anti_cheat;
        let boundary_penalty = anti_cheat.boundary_penalty(&self.x);
        let thin_layer_penalty =
            anti_cheat.thin_layer_penalty(params.get(&anti_cheat.active_layer_dim).copied());

        let mut scored = metrics.clone();
        scored.set_opt(keys::PREVIOUS_UTILITY, self.memory.previous_utility);
        scored.set(keys::DELTA_PARAMS_NORM, delta_params_norm);
        scored.set(keys::BOUNDARY_PENALTY, boundary_penalty);
        scored.set(keys::THIN_LAYER_PENALTY, thin_layer_penalty);
        if let Some(v) = params.get(DRIVE_VOLTAGE_DIM) {
            scored.set(keys::V_DRIVE, *v);
        }

        let (reward, reward_components) = self.config.reward.score(&scored, &violation);

        let terminated = self.space.is_hard_invalid(&violation);
        let truncated = self.step >= self.config.max_steps;
        let termination_reason = if terminated {
            Some(TerminationReason::HardInvalid)
        } else if truncated {
            Some(TerminationReason::MaxSteps)
        } else {
            None
        };

        self.memory.previous_utility = Some(reward_components.utility);
        self.memory.previous_x = Some(self.x.clone());

        if termination_reason.is_some() {
            self.phase = EpisodePhase::Ended;
            self.memory = ShapingMemory::default();
            log::debug!(
                "episode seed={} ended at step {}: {:?}",
                self.seed,
                self.step,
                termination_reason
            );
        }

        let observation = self.observe(&metrics);

        Ok(StepResult {
            observation,
            reward,
            terminated,
            truncated,
            info: StepInfo {
                step: self.step,
                params,
                metrics,
                violation,
                reward_components,
                termination_reason,
                action: guard.applied,
                action_adjustments: guard.adjustments,
            },
        })
    }

    fn observe(&self, metrics: &MetricsRecord) -> Vec<f64> {
        let mut obs = self.x.clone();
        if self.config.include_metrics_in_obs {
            obs.extend(self.space.metrics_to_vec(metrics));
        }
        obs
    }

    /// Observation length: D, plus the metrics block when enabled.
    pub fn observation_dim(&self) -> usize {
        if self.config.include_metrics_in_obs {
            self.space.dim() + self.space.metrics_dim()
        } else {
            self.space.dim()
        }
    }

    pub fn action_dim(&self) -> usize {
        self.space.dim()
    }

    pub fn space(&self) -> &ParameterSpace {
        &self.space
    }

    pub fn evaluator(&self) -> &E {
        &self.evaluator
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    /// Current normalized design vector.
    pub fn x(&self) -> &[f64] {
        &self.x
    }

    /// Current design in physical units.
    pub fn params(&self) -> PhysicalParams {
        self.space.to_real(&self.x)
    }

    pub fn memory(&self) -> &ShapingMemory {
        &self.memory
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn step_count(&self) -> u32 {
        self.step
    }

    pub fn phase(&self) -> EpisodePhase {
        self.phase
    }

    /// `Ok` when `step` would be accepted.
    pub fn ensure_active(&self) -> EnvResult<()> {
        match self.phase {
            EpisodePhase::NotReset => Err(EnvError::NotReset),
            EpisodePhase::Ended => Err(EnvError::EpisodeEnded { step: self.step }),
            EpisodePhase::Active => Ok(()),
        }
    }

    pub fn is_done(&self) -> bool {
        self.phase == EpisodePhase::Ended
    }
}

fn l2_norm(values: impl Iterator<Item = f64>) -> f64 {
    values.map(|v| v * v).sum::<f64>().sqrt()
}

fn l2_distance(a: &[f64], b: &[f64]) -> f64 {
    l2_norm(a.iter().zip(b).map(|(x, y)| x - y))
}

/// Vectorised environment for batched rollouts.
///
/// Manages N independent `QledEnv` instances; no state is shared.
pub struct VecEnv<E: Evaluator + Clone = SurrogateSim> {
    envs: Vec<QledEnv<E>>,
}

impl<E: Evaluator + Clone> VecEnv<E> {
    /// Create N copies. With a configured seed, env i is seeded `seed + i`.
    pub fn new(n: usize, space: ParameterSpace, evaluator: E, config: EnvConfig) -> EnvResult<Self> {
        let envs = (0..n)
            .map(|i| {
                let mut cfg = config.clone();
                cfg.seed = config.seed.map(|s| s.wrapping_add(i as u64));
                QledEnv::with_evaluator(space.clone(), evaluator.clone(), cfg)
            })
            .collect::<EnvResult<Vec<_>>>()?;
        Ok(Self { envs })
    }

    pub fn num_envs(&self) -> usize {
        self.envs.len()
    }

    pub fn action_dim(&self) -> usize {
        self.envs.first().map(|e| e.action_dim()).unwrap_or(0)
    }

    /// Reset all environments with optional per-environment seeds.
    ///
    /// Environments without a seed entry draw their own.
    pub fn reset_all(&mut self, seeds: Option<&[u64]>) -> EnvResult<Vec<ResetResult>> {
        self.envs
            .iter_mut()
            .enumerate()
            .map(|(i, env)| {
                let seed = seeds.and_then(|s| s.get(i).copied());
                env.reset(seed, None)
            })
            .collect()
    }

    /// Step every environment with its own action.
    ///
    /// The batch advances together or not at all: if any environment is not
    /// active, its error is returned and no environment is stepped.
    pub fn step(&mut self, actions: &[Vec<f64>]) -> EnvResult<Vec<StepResult>> {
        if actions.len() != self.envs.len() {
            return Err(EnvError::BatchSize {
                expected: self.envs.len(),
                got: actions.len(),
            });
        }
        for env in &self.envs {
            env.ensure_active()?;
        }
        self.envs
            .iter_mut()
            .zip(actions)
            .map(|(env, action)| env.step(action))
            .collect()
    }

    /// Step every environment with the zero action.
    pub fn step_zero(&mut self) -> EnvResult<Vec<StepResult>> {
        let actions: Vec<Vec<f64>> = self
            .envs
            .iter()
            .map(|env| vec![0.0; env.action_dim()])
            .collect();
        self.step(&actions)
    }

    pub fn envs(&self) -> &[QledEnv<E>] {
        &self.envs
    }

    pub fn env_mut(&mut self, i: usize) -> Option<&mut QledEnv<E>> {
        self.envs.get_mut(i)
    }

    pub fn seeds(&self) -> Vec<u64> {
        self.envs.iter().map(|e| e.seed()).collect()
    }

    pub fn dones(&self) -> Vec<bool> {
        self.envs.iter().map(|e| e.is_done()).collect()
    }
}
