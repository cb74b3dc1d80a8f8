//! # Progress Subcommand
//!
//! Evaluates a pathway against a fact file without an engine. The fact
//! file lists the entities the referee completed:
//!
//! ```yaml
//! completions:
//!   - entity: { entity_type: Opportunity, id: 5a1e2d3c-... }
//!     completed_at: 2026-03-01T10:00:00Z
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use serde::Deserialize;

use rpe_core::Timestamp;
use rpe_pathway::{evaluate, EntityRef, FactTable, PathwayProgress, TaskFact};

use crate::load_pathway;

#[derive(Args, Debug)]
pub struct ProgressArgs {
    /// Pathway definition (YAML or JSON).
    #[arg(value_name = "PATHWAY")]
    pub pathway: PathBuf,

    /// Fact file listing completed entities.
    #[arg(value_name = "FACTS")]
    pub facts: PathBuf,

    /// Print compact JSON.
    #[arg(long)]
    pub compact: bool,
}

#[derive(Debug, Deserialize)]
struct FactFile {
    #[serde(default)]
    completions: Vec<Completion>,
}

#[derive(Debug, Deserialize)]
struct Completion {
    entity: EntityRef,
    completed_at: Timestamp,
}

pub fn load_facts(path: &Path) -> Result<FactTable> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let file: FactFile = serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to parse facts {}", path.display()))?;
    let mut table = FactTable::new();
    for completion in file.completions {
        table.insert(completion.entity, TaskFact::completed(completion.completed_at));
    }
    Ok(table)
}

pub fn evaluate_files(args: &ProgressArgs) -> Result<PathwayProgress> {
    let model = load_pathway(&args.pathway)?;
    let facts = load_facts(&args.facts)?;
    evaluate(&model, &facts).context("evaluation failed")
}

/// Returns exit code: 0 when the pathway is complete, 3 when it is not.
pub fn run_progress(args: &ProgressArgs) -> Result<u8> {
    let progress = evaluate_files(args)?;
    let out = if args.compact {
        serde_json::to_string(&progress)?
    } else {
        serde_json::to_string_pretty(&progress)?
    };
    println!("{out}");
    Ok(if progress.completed { 0 } else { 3 })
}
