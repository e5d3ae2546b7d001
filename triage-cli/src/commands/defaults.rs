//! Project defaults commands

use std::path::{Path, PathBuf};

use clap::{Args, Subcommand};
use triage_core::macros::{PartialMacros, KEY_MAGNITUDE_THRESHOLD};
use triage_core::ArchitectureStore;

use super::{load_config, open_database};

/// Read and write project-wide review defaults in the store
#[derive(Args, Debug)]
pub struct DefaultsArgs {
    /// SQLite database holding project defaults
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: DefaultsCommand,
}

#[derive(Subcommand, Debug)]
pub enum DefaultsCommand {
    /// Show stored defaults
    Get {
        /// Project key
        #[arg(long)]
        project: String,
    },

    /// Store one default (LINE_THRESHOLD, CHANGES_THRESHOLD,
    /// IMPORTANT_CHANGE_MARKERS, IMPORTANT_CHANGE_LABELS)
    Set {
        /// Project key
        #[arg(long)]
        project: String,

        key: String,

        /// Value; lists are comma separated
        value: String,
    },

    /// Remove one default
    Unset {
        /// Project key
        #[arg(long)]
        project: String,

        key: String,
    },
}

impl DefaultsArgs {
    /// Execute the defaults command
    pub async fn execute(&self, config_path: Option<&Path>) -> anyhow::Result<()> {
        let config = load_config(config_path, self.db.clone())?;
        let db = open_database(&config).await?;

        match &self.command {
            DefaultsCommand::Get { project } => {
                let stored = db.project_defaults().get(project).await?;
                if stored.is_empty() {
                    println!("No defaults stored for {}", project);
                    return Ok(());
                }
                println!("Defaults for {}:", project);
                for (key, value) in &stored {
                    println!("  {} = {}", key, value);
                }
            }
            DefaultsCommand::Set {
                project,
                key,
                value,
            } => {
                let parsed = parse_default(key, value)?;
                db.store().set_project_defaults(project, &parsed).await?;
                for (key, value) in parsed.to_key_values() {
                    println!("Set {} = {} for {}", key, value, project);
                }
            }
            DefaultsCommand::Unset { project, key } => {
                let key = match key.trim().to_ascii_uppercase().as_str() {
                    "MAGNITUDE_THRESHOLD" => KEY_MAGNITUDE_THRESHOLD.to_string(),
                    other => other.to_string(),
                };
                if db.project_defaults().remove(project, &key).await? {
                    println!("Removed {} for {}", key, project);
                } else {
                    println!("{} was not set for {}", key, project);
                }
            }
        }

        db.close().await;
        Ok(())
    }
}

/// Validate one key/value pair the way the resolver will read it back
fn parse_default(key: &str, value: &str) -> anyhow::Result<PartialMacros> {
    let parsed = PartialMacros::from_key_values([(key, value)]);
    if parsed.is_empty() {
        anyhow::bail!(
            "Unknown key or invalid value: {}={} (expected LINE_THRESHOLD, CHANGES_THRESHOLD, \
             IMPORTANT_CHANGE_MARKERS or IMPORTANT_CHANGE_LABELS)",
            key,
            value
        );
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_default() {
        let parsed = parse_default("line_threshold", "350").unwrap();
        assert_eq!(parsed.magnitude_threshold, Some(350));

        let parsed = parse_default("IMPORTANT_CHANGE_LABELS", "arch, breaking").unwrap();
        assert_eq!(
            parsed.important_labels,
            Some(vec!["arch".to_string(), "breaking".to_string()])
        );

        assert!(parse_default("LINE_THRESHOLD", "many").is_err());
        assert!(parse_default("COLOR", "blue").is_err());
    }
}
