//! # rpe-cli — Referral Pathway Engine CLI
//!
//! - `rpe validate <pathway.yaml>`: structural validation and version digest.
//! - `rpe progress <pathway.yaml> <facts.yaml>`: evaluate a pathway against
//!   a fact file offline and print the progress tree as JSON.
//! - `rpe config [--file engine.yaml]`: print the effective engine
//!   configuration after environment overrides.

pub mod config;
pub mod progress;
pub mod validate;

use std::path::Path;

use anyhow::{Context, Result};
use rpe_pathway::{PathwayDefinition, PathwayModel};

/// Read and validate a pathway definition from a YAML (or JSON) file.
pub fn load_pathway(path: &Path) -> Result<PathwayModel> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let def: PathwayDefinition = serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to parse pathway {}", path.display()))?;
    PathwayModel::new(def).with_context(|| format!("invalid pathway {}", path.display()))
}
