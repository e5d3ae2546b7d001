//! Costs command - report accumulated model usage

use std::path::{Path, PathBuf};

use clap::Args;
use triage_core::{CostLedger, OperatorOverrides};

/// Show the cost ledger
#[derive(Args, Debug)]
pub struct CostsArgs {
    /// Cost ledger file
    #[arg(long, value_name = "PATH")]
    ledger: Option<PathBuf>,

    /// Delete the ledger after printing it
    #[arg(long)]
    reset: bool,

    /// Print `key=value` lines instead of the report
    #[arg(long)]
    outputs: bool,
}

impl CostsArgs {
    /// Execute the costs command
    pub async fn execute(&self, config_path: Option<&Path>) -> anyhow::Result<()> {
        let overrides = OperatorOverrides {
            ledger_path: self.ledger.clone(),
            ..Default::default()
        };
        let config = triage_core::Config::load_with_overrides(config_path, overrides)?;
        let path = config.storage.ledger_path();

        let ledger = CostLedger::load(&path, config.pricing.clone())?;
        if ledger.is_empty() {
            println!("No model usage recorded in {}", path.display());
        } else if self.outputs {
            for line in ledger.output_lines() {
                println!("{}", line);
            }
        } else {
            print!("{}", ledger.render_report());
        }

        if self.reset && path.exists() {
            std::fs::remove_file(&path)?;
            println!("Removed {}", path.display());
        }
        Ok(())
    }
}
