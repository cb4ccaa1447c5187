// src/runner.rs
//
// Episode runner for design rollouts.
//
// The optimizing policy is external; `Policy` is the seam it plugs into.
// `ZeroPolicy` and `RandomPolicy` are smoke actors for harnesses and tests.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::env::{QledEnv, TerminationReason};
use crate::error::EnvResult;
use crate::evaluator::Evaluator;
use crate::metrics::MetricsRecord;
use crate::param_space::PhysicalParams;
use crate::telemetry::Telemetry;

/// Maps an observation to an action in [-1, 1]^action_dim.
pub trait Policy {
    fn act(&mut self, observation: &[f64], action_dim: usize) -> Vec<f64>;

    fn name(&self) -> &str;
}

/// Always proposes "no change".
#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroPolicy;

impl Policy for ZeroPolicy {
    fn act(&mut self, _observation: &[f64], action_dim: usize) -> Vec<f64> {
        vec![0.0; action_dim]
    }

    fn name(&self) -> &str {
        "zero"
    }
}

/// Uniform random actions from a seeded generator.
#[derive(Debug, Clone)]
pub struct RandomPolicy {
    rng: ChaCha8Rng,
}

impl RandomPolicy {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl Policy for RandomPolicy {
    fn act(&mut self, _observation: &[f64], action_dim: usize) -> Vec<f64> {
        (0..action_dim)
            .map(|_| self.rng.gen_range(-1.0..=1.0))
            .collect()
    }

    fn name(&self) -> &str {
        "random"
    }
}

/// Summary of a completed episode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeSummary {
    pub episode_id: u64,
    pub seed: u64,
    pub policy: String,
    pub steps: u32,
    pub total_reward: f64,
    pub termination_reason: Option<TerminationReason>,
    /// Highest raw utility seen during the episode.
    pub best_utility: Option<f64>,
    /// Design that produced `best_utility`.
    pub best_params: Option<PhysicalParams>,
    pub final_params: PhysicalParams,
    pub final_metrics: MetricsRecord,
}

/// Aggregate over several episodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloutReport {
    pub episodes: Vec<EpisodeSummary>,
    pub mean_reward: f64,
    pub best_utility: Option<f64>,
    pub best_params: Option<PhysicalParams>,
}

impl RolloutReport {
    pub fn from_episodes(episodes: Vec<EpisodeSummary>) -> Self {
        let mean_reward = if episodes.is_empty() {
            0.0
        } else {
            episodes.iter().map(|e| e.total_reward).sum::<f64>() / episodes.len() as f64
        };
        let best = episodes
            .iter()
            .filter_map(|e| e.best_utility.map(|u| (u, e)))
            .max_by(|a, b| a.0.total_cmp(&b.0));
        let best_utility = best.map(|(u, _)| u);
        let best_params = best.and_then(|(_, e)| e.best_params.clone());
        Self {
            episodes,
            mean_reward,
            best_utility,
            best_params,
        }
    }
}

/// Run one episode to termination or truncation.
pub fn run_episode<E, P>(
    env: &mut QledEnv<E>,
    policy: &mut P,
    seed: Option<u64>,
    episode_id: u64,
    telemetry: &mut Telemetry,
) -> EnvResult<EpisodeSummary>
where
    E: Evaluator,
    P: Policy + ?Sized,
{
    let reset = env.reset(seed, None)?;
    telemetry.log_episode_start(episode_id, &reset);

    let mut observation = reset.observation;
    let mut final_params = reset.info.params;
    let mut final_metrics = reset.info.metrics;
    let mut total_reward = 0.0;
    let mut best: Option<(f64, PhysicalParams)> = None;
    let mut termination_reason = None;

    while !env.is_done() {
        let action = policy.act(&observation, env.action_dim());
        let result = env.step(&action)?;
        telemetry.log_step(&result);

        total_reward += result.reward;
        let utility = result.info.reward_components.utility;
        if best.as_ref().map_or(true, |(u, _)| utility > *u) {
            best = Some((utility, result.info.params.clone()));
        }

        termination_reason = result.info.termination_reason;
        observation = result.observation;
        final_params = result.info.params;
        final_metrics = result.info.metrics;
    }

    let (best_utility, best_params) = match best {
        Some((u, p)) => (Some(u), Some(p)),
        None => (None, None),
    };
    let steps = env.step_count();

    telemetry.log_episode_end(env.seed(), termination_reason, total_reward, best_utility, steps);
    log::info!(
        "episode {} seed={} policy={} steps={} total_reward={:.4} reason={:?}",
        episode_id,
        env.seed(),
        policy.name(),
        steps,
        total_reward,
        termination_reason
    );

    Ok(EpisodeSummary {
        episode_id,
        seed: env.seed(),
        policy: policy.name().to_string(),
        steps,
        total_reward,
        termination_reason,
        best_utility,
        best_params,
        final_params,
        final_metrics,
    })
}

/// Run `episodes` episodes. With `base_seed`, episode i uses `base_seed + i`.
pub fn run_rollouts<E, P>(
    env: &mut QledEnv<E>,
    policy: &mut P,
    episodes: u64,
    base_seed: Option<u64>,
    telemetry: &mut Telemetry,
) -> EnvResult<RolloutReport>
where
    E: Evaluator,
    P: Policy + ?Sized,
{
    let mut summaries = Vec::with_capacity(episodes as usize);
    for i in 0..episodes {
        let seed = base_seed.map(|s| s.wrapping_add(i));
        summaries.push(run_episode(env, policy, seed, i, telemetry)?);
    }
    telemetry.flush();
    Ok(RolloutReport::from_episodes(summaries))
}
