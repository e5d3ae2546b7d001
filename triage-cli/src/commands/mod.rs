//! CLI command implementations

pub mod costs;
pub mod defaults;
pub mod plan;
pub mod review;
pub mod tracker;

use std::path::{Path, PathBuf};

use clap::Args;
use triage_core::{Config, OperatorOverrides};
use triage_db::Database;

pub use costs::CostsArgs;
pub use defaults::DefaultsArgs;
pub use plan::PlanArgs;
pub use review::ReviewArgs;
pub use tracker::TrackerArgs;

/// Operator overrides of the review macros and path filters
#[derive(Args, Debug, Clone, Default)]
pub struct MacroArgs {
    /// Changed lines above which the deep-review model is used
    #[arg(long, value_name = "LINES")]
    pub magnitude_threshold: Option<u64>,

    /// Important changes between architecture summaries
    #[arg(long, value_name = "COUNT")]
    pub changes_threshold: Option<u64>,

    /// Extra reviewer instructions, used when the description has none
    #[arg(long, value_name = "TEXT")]
    pub custom_instruction: Option<String>,

    /// Title marker flagging an important change (repeatable)
    #[arg(long = "important-marker", value_name = "MARKER")]
    pub important_markers: Vec<String>,

    /// Label flagging an important change (repeatable)
    #[arg(long = "important-label", value_name = "LABEL")]
    pub important_labels: Vec<String>,

    /// Path glob left out of the magnitude and the reviewed diff (repeatable)
    #[arg(long, value_name = "GLOB")]
    pub exclude: Vec<String>,

    /// Skip the review when every changed file is excluded
    #[arg(long)]
    pub skip_excluded: bool,
}

impl MacroArgs {
    pub fn overrides(&self) -> OperatorOverrides {
        OperatorOverrides {
            magnitude_threshold: self.magnitude_threshold,
            changes_threshold: self.changes_threshold,
            custom_instruction: self.custom_instruction.clone(),
            important_markers: self.important_markers.clone(),
            important_labels: self.important_labels.clone(),
            exclude: self.exclude.clone(),
            skip_excluded: self.skip_excluded,
            ..Default::default()
        }
    }
}

/// Database location from configuration, falling back to the cache directory
pub fn database_path(config: &Config) -> anyhow::Result<PathBuf> {
    match &config.storage.database_path {
        Some(path) => Ok(path.clone()),
        None => Ok(Database::default_path()?),
    }
}

pub async fn open_database(config: &Config) -> anyhow::Result<Database> {
    let path = database_path(config)?;
    Database::new(&path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open database {}: {}", path.display(), e))
}

/// Configuration for commands that only take `--db`
pub fn load_config(config_path: Option<&Path>, db: Option<PathBuf>) -> anyhow::Result<Config> {
    let overrides = OperatorOverrides {
        database_path: db,
        ..Default::default()
    };
    Ok(Config::load_with_overrides(config_path, overrides)?)
}
