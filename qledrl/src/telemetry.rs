// src/telemetry.rs
//
// Structured per-step telemetry for design episodes.
//
// Each line of the JSONL stream is one of:
// - an episode start marker (seed, initial design)
// - a step record (applied action, x, params, metrics, violation, reward
//   breakdown, flags)
// - an episode end marker (termination reason, total reward, best utility)
//
// Controlled by environment variables:
// - QLEDRL_TELEMETRY_MODE: "off" (default) or "jsonl"
// - QLEDRL_TELEMETRY_PATH: path to the JSONL file
//
// Telemetry never fails an episode: a write error disables the sink.

use std::env;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::env::{ResetResult, StepResult, TerminationReason};
use crate::metrics::MetricsRecord;
use crate::param_space::{ConstraintViolation, PhysicalParams};
use crate::reward::RewardComponents;

/// Bumped whenever a record layout changes.
pub const SCHEMA_VERSION: u32 = 1;

pub const TELEMETRY_MODE_ENV: &str = "QLEDRL_TELEMETRY_MODE";
pub const TELEMETRY_PATH_ENV: &str = "QLEDRL_TELEMETRY_PATH";

/// Per-step record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub schema_version: u32,
    pub episode_id: u64,
    pub step: u32,
    /// Action after the guard (what was actually applied).
    pub action: Vec<f64>,
    pub action_adjustments: Vec<String>,
    /// Normalized design after the step (first D observation entries).
    pub x: Vec<f64>,
    pub params: PhysicalParams,
    pub metrics: MetricsRecord,
    pub violation: ConstraintViolation,
    pub reward: f64,
    pub reward_components: RewardComponents,
    pub terminated: bool,
    pub truncated: bool,
}

impl StepRecord {
    pub fn new(episode_id: u64, result: &StepResult) -> Self {
        let dim = result.info.action.len().min(result.observation.len());
        Self {
            schema_version: SCHEMA_VERSION,
            episode_id,
            step: result.info.step,
            action: result.info.action.clone(),
            action_adjustments: result.info.action_adjustments.clone(),
            x: result.observation[..dim].to_vec(),
            params: result.info.params.clone(),
            metrics: result.info.metrics.clone(),
            violation: result.info.violation.clone(),
            reward: result.reward,
            reward_components: result.info.reward_components.clone(),
            terminated: result.terminated,
            truncated: result.truncated,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EpisodeMarkerType {
    Start,
    End,
}

/// Episode boundary marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeMarker {
    pub schema_version: u32,
    pub episode_id: u64,
    pub seed: u64,
    pub marker_type: EpisodeMarkerType,
    /// Initial design (start markers).
    pub initial_params: Option<PhysicalParams>,
    /// Termination reason (end markers).
    pub termination_reason: Option<TerminationReason>,
    pub total_reward: Option<f64>,
    pub best_utility: Option<f64>,
    pub total_steps: Option<u32>,
}

/// Optional JSONL sink for design episodes.
pub struct Telemetry {
    enabled: bool,
    path: Option<PathBuf>,
    writer: Option<BufWriter<File>>,
    episode_id: u64,
    lines_written: u64,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl Telemetry {
    /// Disabled sink.
    pub fn new() -> Self {
        Self {
            enabled: false,
            path: None,
            writer: None,
            episode_id: 0,
            lines_written: 0,
        }
    }

    /// Create from QLEDRL_TELEMETRY_MODE / QLEDRL_TELEMETRY_PATH.
    pub fn from_env() -> Self {
        let enabled = env::var(TELEMETRY_MODE_ENV)
            .map(|s| s.trim().to_lowercase() == "jsonl")
            .unwrap_or(false);
        let path = env::var(TELEMETRY_PATH_ENV).ok().map(PathBuf::from);
        if enabled && path.is_none() {
            log::warn!("{TELEMETRY_MODE_ENV}=jsonl but {TELEMETRY_PATH_ENV} is unset; telemetry off");
        }
        Self {
            enabled: enabled && path.is_some(),
            path,
            writer: None,
            episode_id: 0,
            lines_written: 0,
        }
    }

    /// Enabled sink writing to `path`.
    pub fn enable(path: impl AsRef<Path>) -> Self {
        Self {
            enabled: true,
            path: Some(path.as_ref().to_path_buf()),
            writer: None,
            episode_id: 0,
            lines_written: 0,
        }
    }

    fn ensure_writer(&mut self) -> Option<&mut BufWriter<File>> {
        if !self.enabled {
            return None;
        }

        if self.writer.is_none() {
            let path = self.path.as_ref()?;

            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }

            match OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => self.writer = Some(BufWriter::new(file)),
                Err(err) => {
                    log::warn!("telemetry disabled: cannot open {}: {err}", path.display());
                    self.enabled = false;
                    return None;
                }
            }
        }

        self.writer.as_mut()
    }

    fn write_json(&mut self, value: &JsonValue) {
        let Some(writer) = self.ensure_writer() else {
            return;
        };

        let line = match serde_json::to_string(value) {
            Ok(s) => s,
            Err(_) => return,
        };

        if let Err(err) = writeln!(writer, "{}", line) {
            log::warn!("telemetry disabled after write error: {err}");
            self.enabled = false;
            self.writer = None;
            return;
        }
        self.lines_written += 1;
    }

    fn write_record<T: Serialize>(&mut self, record: &T) {
        if !self.enabled {
            return;
        }
        let value = serde_json::to_value(record).unwrap_or_default();
        self.write_json(&value);
    }

    /// Log an episode start marker.
    pub fn log_episode_start(&mut self, episode_id: u64, reset: &ResetResult) {
        self.episode_id = episode_id;
        let marker = EpisodeMarker {
            schema_version: SCHEMA_VERSION,
            episode_id,
            seed: reset.info.seed,
            marker_type: EpisodeMarkerType::Start,
            initial_params: Some(reset.info.params.clone()),
            termination_reason: None,
            total_reward: None,
            best_utility: None,
            total_steps: None,
        };
        self.write_record(&marker);
    }

    /// Log one step of the current episode.
    pub fn log_step(&mut self, result: &StepResult) {
        if !self.enabled {
            return;
        }
        let record = StepRecord::new(self.episode_id, result);
        self.write_record(&record);
    }

    /// Log an episode end marker.
    pub fn log_episode_end(
        &mut self,
        seed: u64,
        reason: Option<TerminationReason>,
        total_reward: f64,
        best_utility: Option<f64>,
        total_steps: u32,
    ) {
        let marker = EpisodeMarker {
            schema_version: SCHEMA_VERSION,
            episode_id: self.episode_id,
            seed,
            marker_type: EpisodeMarkerType::End,
            initial_params: None,
            termination_reason: reason,
            total_reward: Some(total_reward),
            best_utility,
            total_steps: Some(total_steps),
        };
        self.write_record(&marker);
    }

    pub fn flush(&mut self) {
        if let Some(writer) = &mut self.writer {
            let _ = writer.flush();
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn lines_written(&self) -> u64 {
        self.lines_written
    }
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnvConfig;
    use crate::env::QledEnv;

    #[test]
    fn disabled_sink_writes_nothing() {
        let mut t = Telemetry::new();
        let mut env = QledEnv::new(EnvConfig::default()).unwrap();
        let reset = env.reset(Some(1), None).unwrap();
        t.log_episode_start(0, &reset);
        assert!(!t.is_enabled());
        assert_eq!(t.lines_written(), 0);
    }

    #[test]
    fn writes_markers_and_steps_as_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("telemetry.jsonl");
        let mut t = Telemetry::enable(&path);

        let mut env = QledEnv::new(EnvConfig::default().with_max_steps(2)).unwrap();
        let reset = env.reset(Some(7), None).unwrap();
        t.log_episode_start(3, &reset);
        let action = vec![0.1; 13];
        let mut last = None;
        for _ in 0..2 {
            let r = env.step(&action).unwrap();
            t.log_step(&r);
            last = Some(r);
        }
        let last = last.unwrap();
        t.log_episode_end(7, last.info.termination_reason, last.reward, None, 2);
        t.flush();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<JsonValue> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0]["marker_type"], "Start");
        assert_eq!(lines[0]["seed"], 7);
        assert_eq!(lines[1]["episode_id"], 3);
        assert_eq!(lines[1]["step"], 1);
        assert_eq!(lines[1]["schema_version"], SCHEMA_VERSION);
        assert_eq!(lines[1]["x"].as_array().unwrap().len(), 13);
        assert_eq!(lines[2]["truncated"], true);
        assert_eq!(lines[3]["marker_type"], "End");
        assert_eq!(lines[3]["termination_reason"], "MaxSteps");
    }

    #[test]
    fn step_record_round_trips() {
        let mut env = QledEnv::new(EnvConfig::default()).unwrap();
        env.reset(Some(2), None).unwrap();
        let r = env.step(&[0.0; 13]).unwrap();
        let record = StepRecord::new(0, &r);
        let json = serde_json::to_string(&record).unwrap();
        let parsed: StepRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.step, 1);
        assert_eq!(parsed.params.len(), 13);
        assert_eq!(parsed.action, vec![0.0; 13]);
    }
}
