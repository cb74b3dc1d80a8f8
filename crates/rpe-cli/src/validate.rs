//! # Validate Subcommand

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use crate::load_pathway;

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Pathway definition (YAML or JSON).
    #[arg(value_name = "PATHWAY")]
    pub path: PathBuf,
}

/// Returns exit code: 0 when valid, 1 when invalid.
pub fn run_validate(args: &ValidateArgs) -> Result<u8> {
    let model = match load_pathway(&args.path) {
        Ok(model) => model,
        Err(e) => {
            println!("FAIL: {e:#}");
            return Ok(1);
        }
    };

    println!("OK: {} ({})", args.path.display(), model.name());
    println!("  version: {}", model.version());
    println!("  rule: {}  order: {:?}", model.rule(), model.order_mode());
    for step in model.steps() {
        println!(
            "  step {} [{} {:?}] {} task(s)",
            step.order_display,
            step.rule,
            step.order_mode,
            step.tasks.len()
        );
    }
    tracing::debug!(tasks = model.task_count(), "pathway validated");
    Ok(0)
}
