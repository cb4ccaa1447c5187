// src/config.rs
//
// Environment configuration: episode length, action scale, observation layout,
// seeding, reward shaping and anti-cheat terms.
//
// `EnvConfig::default()` is the reference setup (30 steps, action scale 0.05,
// no metrics block, unseeded). `from_env()` layers QLEDRL_* overrides on top.

use std::env;
use std::str::FromStr;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{EnvError, EnvResult};
use crate::reward::RewardConfig;

/// Anti-cheat shaping applied by the controller before scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AntiCheatConfig {
    /// Normalized |x| beyond which the boundary penalty engages.
    pub boundary_margin: f64,
    /// Power applied to the normalized excursion beyond the margin.
    pub boundary_power: i32,
    /// Dimension treated as the active (emissive) layer thickness.
    pub active_layer_dim: String,
    /// Thickness (physical units) below which the thin-layer penalty engages.
    pub active_layer_floor: f64,
}

impl Default for AntiCheatConfig {
    fn default() -> Self {
        Self {
            boundary_margin: 0.9,
            boundary_power: 4,
            active_layer_dim: "t_EML_nm".to_string(),
            active_layer_floor: 12.0,
        }
    }
}

impl AntiCheatConfig {
    /// Mean over components of `(max(0, |x| - margin) / (1 - margin))^power`.
    pub fn boundary_penalty(&self, x: &[f64]) -> f64 {
        if x.is_empty() {
            return 0.0;
        }
        let width = (1.0 - self.boundary_margin).max(1e-12);
        let sum: f64 = x
            .iter()
            .map(|v| {
                let excursion = (v.abs() - self.boundary_margin).max(0.0) / width;
                excursion.powi(self.boundary_power)
            })
            .sum();
        sum / x.len() as f64
    }

    /// `((floor - t) / floor)^2` when the active layer is below the floor.
    pub fn thin_layer_penalty(&self, thickness: Option<f64>) -> f64 {
        let Some(t) = thickness.filter(|t| t.is_finite()) else {
            return 0.0;
        };
        if self.active_layer_floor <= 0.0 || t >= self.active_layer_floor {
            return 0.0;
        }
        let s = (self.active_layer_floor - t) / self.active_layer_floor;
        s * s
    }
}

/// Configuration for the design environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvConfig {
    /// Steps per episode before truncation.
    pub max_steps: u32,
    /// Per-step multiplier from action to normalized move.
    pub action_scale: f64,
    /// Append the metrics feature block to the observation.
    pub include_metrics_in_obs: bool,
    /// Fallback seed used by `reset(None)`.
    pub seed: Option<u64>,
    pub reward: RewardConfig,
    pub anti_cheat: AntiCheatConfig,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            max_steps: 30,
            action_scale: 0.05,
            include_metrics_in_obs: false,
            seed: None,
            reward: RewardConfig::default(),
            anti_cheat: AntiCheatConfig::default(),
        }
    }
}

impl EnvConfig {
    /// Default settings with a fixed seed (deterministic tests).
    pub fn deterministic(seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..Self::default()
        }
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_action_scale(mut self, action_scale: f64) -> Self {
        self.action_scale = action_scale;
        self
    }

    pub fn with_metrics_in_obs(mut self, include: bool) -> Self {
        self.include_metrics_in_obs = include;
        self
    }

    pub fn validate(&self) -> EnvResult<()> {
        if self.max_steps == 0 {
            return Err(EnvError::InvalidConfig(
                "max_steps must be a positive integer".to_string(),
            ));
        }
        if !self.action_scale.is_finite() || self.action_scale <= 0.0 {
            return Err(EnvError::InvalidConfig(format!(
                "action_scale must be a positive finite float, got {}",
                self.action_scale
            )));
        }
        if !self.reward.bound.is_finite() || self.reward.bound <= 0.0 {
            return Err(EnvError::InvalidConfig(format!(
                "reward.bound must be a positive finite float, got {}",
                self.reward.bound
            )));
        }
        let margin = self.anti_cheat.boundary_margin;
        if !(0.0..1.0).contains(&margin) {
            return Err(EnvError::InvalidConfig(format!(
                "anti_cheat.boundary_margin must lie in [0, 1), got {margin}"
            )));
        }
        Ok(())
    }

    /// Default config with QLEDRL_* environment overrides applied.
    ///
    /// Any variable that fails to parse is ignored with a warning.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(v) = env_override::<u32>("QLEDRL_MAX_STEPS", cfg.max_steps) {
            cfg.max_steps = v.max(1);
        }
        if let Some(v) = env_override::<f64>("QLEDRL_ACTION_SCALE", cfg.action_scale) {
            if v.is_finite() && v > 0.0 {
                cfg.action_scale = v;
            } else {
                warn!("[config] QLEDRL_ACTION_SCALE = {v} is not positive; using default");
            }
        }
        if let Ok(raw) = env::var("QLEDRL_INCLUDE_METRICS") {
            match parse_flag(&raw) {
                Some(v) => {
                    cfg.include_metrics_in_obs = v;
                    info!("[config] QLEDRL_INCLUDE_METRICS = {v} (overrode default)");
                }
                None => warn!(
                    "[config] could not parse QLEDRL_INCLUDE_METRICS = {raw:?} as bool; using default {}",
                    cfg.include_metrics_in_obs
                ),
            }
        }
        if let Ok(raw) = env::var("QLEDRL_SEED") {
            match raw.trim().parse::<u64>() {
                Ok(v) => {
                    cfg.seed = Some(v);
                    info!("[config] QLEDRL_SEED = {v} (overrode default)");
                }
                Err(_) => warn!("[config] could not parse QLEDRL_SEED = {raw:?} as u64; unseeded"),
            }
        }

        cfg
    }
}

fn env_override<T>(name: &str, default: T) -> Option<T>
where
    T: FromStr + std::fmt::Display,
{
    let raw = env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(v) => {
            info!("[config] {name} = {v} (overrode default)");
            Some(v)
        }
        Err(_) => {
            warn!("[config] could not parse {name} = {raw:?}; using default {default}");
            None
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
