//! # Config Subcommand

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use rpe_engine::EngineConfig;

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Engine configuration file. Defaults apply when omitted.
    #[arg(long, value_name = "FILE")]
    pub file: Option<PathBuf>,
}

/// Load the file (if any), then apply `RPE_*` overrides.
pub fn effective_config(
    args: &ConfigArgs,
    env: impl Fn(&str) -> Option<String>,
) -> Result<EngineConfig> {
    let base = match &args.file {
        Some(path) => EngineConfig::from_yaml_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => EngineConfig::default(),
    };
    base.with_env_overrides(env)
        .context("invalid environment override")
}

pub fn run_config(args: &ConfigArgs) -> Result<u8> {
    let config = effective_config(args, |var| std::env::var(var).ok())?;
    print!("{}", serde_yaml::to_string(&config)?);
    Ok(0)
}
