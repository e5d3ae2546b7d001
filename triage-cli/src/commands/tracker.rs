//! Architecture tracker commands

use std::path::{Path, PathBuf};

use chrono::Local;
use clap::{Args, Subcommand};

use super::{load_config, open_database};

/// Inspect architecture change tracking in the store
#[derive(Args, Debug)]
pub struct TrackerArgs {
    /// SQLite database holding tracking state
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: TrackerCommand,
}

#[derive(Subcommand, Debug)]
pub enum TrackerCommand {
    /// Show the important-change counter
    Status {
        /// Project key
        #[arg(long)]
        project: String,
    },

    /// Show stored architecture summaries, newest first
    Summaries {
        /// Project key
        #[arg(long)]
        project: String,

        /// Number of summaries to show
        #[arg(short = 'n', long, default_value_t = 1)]
        limit: u32,
    },

    /// Clear the counter and the last counted revision
    Reset {
        /// Project key
        #[arg(long)]
        project: String,
    },
}

impl TrackerArgs {
    /// Execute the tracker command
    pub async fn execute(&self, config_path: Option<&Path>) -> anyhow::Result<()> {
        let config = load_config(config_path, self.db.clone())?;
        let db = open_database(&config).await?;

        match &self.command {
            TrackerCommand::Status { project } => match db.tracking().get(project).await? {
                Some(record) => {
                    println!("Project:        {}", record.project);
                    println!(
                        "Change count:   {} of {}",
                        record.change_count,
                        config
                            .review
                            .macros
                            .changes_threshold
                            .map_or_else(|| "(project threshold)".to_string(), |t| t.to_string())
                    );
                    println!(
                        "Last revision:  {}",
                        record.last_revision.as_deref().unwrap_or("(none)")
                    );
                    println!(
                        "Updated:        {}",
                        record
                            .updated_at
                            .with_timezone(&Local)
                            .format("%Y-%m-%d %H:%M:%S")
                    );
                }
                None => println!("No important changes tracked for {}", project),
            },
            TrackerCommand::Summaries { project, limit } => {
                let summaries = db.summaries().list(project, *limit).await?;
                if summaries.is_empty() {
                    println!("No architecture summaries for {}", project);
                }
                for summary in summaries {
                    println!(
                        "── #{} at {} ──",
                        summary.change_id,
                        summary
                            .created_at
                            .with_timezone(&Local)
                            .format("%Y-%m-%d %H:%M")
                    );
                    println!("{}", summary.summary.trim_end());
                    println!();
                }
            }
            TrackerCommand::Reset { project } => {
                db.tracking().reset(project).await?;
                println!("Reset architecture tracking for {}", project);
            }
        }

        db.close().await;
        Ok(())
    }
}
