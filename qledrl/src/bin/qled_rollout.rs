// src/bin/qled_rollout.rs
//
// Rollout harness: runs smoke policies through the design environment and
// writes a JSON report.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};

use qledrl::{
    run_rollouts, EnvConfig, Policy, QledEnv, RandomPolicy, Telemetry, ZeroPolicy,
};

#[derive(Copy, Clone, Debug, ValueEnum)]
enum PolicyArg {
    Zero,
    Random,
}

#[derive(Debug, Parser)]
#[command(
    name = "qled_rollout",
    about = "Run design episodes over the QLED parameter space",
    version
)]
struct Args {
    /// Number of episodes to run.
    #[arg(long, default_value_t = 4)]
    episodes: u64,

    /// Steps per episode (overrides config / QLEDRL_MAX_STEPS).
    #[arg(long)]
    max_steps: Option<u32>,

    /// Per-step action scale (overrides config / QLEDRL_ACTION_SCALE).
    #[arg(long)]
    action_scale: Option<f64>,

    /// Base seed; episode i uses seed + i.
    #[arg(long)]
    seed: Option<u64>,

    /// Smoke policy driving the episodes.
    #[arg(long, value_enum, default_value_t = PolicyArg::Random)]
    policy: PolicyArg,

    /// Append the metrics feature block to observations.
    #[arg(long)]
    include_metrics: bool,

    /// Environment config as JSON (missing fields take defaults).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output path for the rollout report.
    #[arg(long, default_value = "runs/qled_rollout/report.json")]
    out: PathBuf,
}

fn load_config(args: &Args) -> Result<EnvConfig> {
    let mut cfg = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str::<EnvConfig>(&text)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => EnvConfig::from_env(),
    };

    if let Some(v) = args.max_steps {
        cfg.max_steps = v;
    }
    if let Some(v) = args.action_scale {
        cfg.action_scale = v;
    }
    if args.include_metrics {
        cfg.include_metrics_in_obs = true;
    }
    if args.seed.is_some() {
        cfg.seed = args.seed;
    }

    cfg.validate().context("invalid environment config")?;
    Ok(cfg)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let cfg = load_config(&args)?;

    log::info!(
        "qled_rollout | episodes={} | max_steps={} | action_scale={} | policy={:?} | seed={}",
        args.episodes,
        cfg.max_steps,
        cfg.action_scale,
        args.policy,
        args.seed
            .map(|s| s.to_string())
            .unwrap_or_else(|| "none".to_string()),
    );

    let mut policy: Box<dyn Policy> = match args.policy {
        PolicyArg::Zero => Box::new(ZeroPolicy),
        PolicyArg::Random => Box::new(RandomPolicy::new(args.seed.unwrap_or(0))),
    };

    let mut env = QledEnv::new(cfg)?;
    let mut telemetry = Telemetry::from_env();
    let report = run_rollouts(
        &mut env,
        policy.as_mut(),
        args.episodes,
        args.seed,
        &mut telemetry,
    )?;

    if let Some(parent) = args.out.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating output directory {}", parent.display()))?;
    }
    let payload = serde_json::to_string_pretty(&report).context("serializing report")?;
    fs::write(&args.out, payload)
        .with_context(|| format!("writing {}", args.out.display()))?;

    println!(
        "qled_rollout: {} episodes | mean_reward={:.4} | best_utility={} | wrote {}",
        report.episodes.len(),
        report.mean_reward,
        report
            .best_utility
            .map(|u| format!("{u:.4}"))
            .unwrap_or_else(|| "none".to_string()),
        args.out.display()
    );
    Ok(())
}
