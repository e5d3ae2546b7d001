//! Triage CLI - Command line interface for Triage
//!
//! Routes pull requests to a review model and keeps track of architecturally
//! important changes.

mod commands;
mod providers;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use triage_core::{Config, OperatorOverrides};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::{CostsArgs, DefaultsArgs, PlanArgs, ReviewArgs, TrackerArgs};

/// Triage: model routing and architecture tracking for code review
#[derive(Parser, Debug)]
#[command(name = "triage")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to ~/.config/triage/config.toml)
    #[arg(long, global = true, env = "TRIAGE_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show version information
    Version,

    /// Review a pull request
    #[command(visible_alias = "r")]
    Review(ReviewArgs),

    /// Show how a change would be routed, using local inputs only
    Plan(PlanArgs),

    /// Manage project-wide defaults in the store
    Defaults(DefaultsArgs),

    /// Inspect architecture change tracking
    Tracker(TrackerArgs),

    /// Show accumulated model costs
    Costs(CostsArgs),

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; RUST_LOG wins over --verbose
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.verbose {
            "triage=debug,triage_core=debug,triage_github=debug,triage_db=debug"
        } else {
            "warn"
        })
    });
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config_path = cli.config.as_deref();

    match cli.command {
        Some(Commands::Version) => {
            println!("triage {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Review(args)) => {
            args.execute(config_path, cli.verbose).await?;
        }
        Some(Commands::Plan(args)) => {
            args.execute(config_path).await?;
        }
        Some(Commands::Defaults(args)) => {
            args.execute(config_path).await?;
        }
        Some(Commands::Tracker(args)) => {
            args.execute(config_path).await?;
        }
        Some(Commands::Costs(args)) => {
            args.execute(config_path).await?;
        }
        Some(Commands::Config) => {
            let config = Config::load_with_overrides(config_path, OperatorOverrides::default())?;
            println!("Triage Configuration");
            println!("====================");
            println!();
            print!("{}", toml::to_string_pretty(&config)?);
            println!();
            let path = config_path
                .map(PathBuf::from)
                .or_else(Config::default_config_path);
            if let Some(path) = path {
                println!("Config file: {}", path.display());
                if path.exists() {
                    println!("  (exists)");
                } else {
                    println!("  (not found - using defaults)");
                }
            }
            match commands::database_path(&config) {
                Ok(db) => println!("Database: {}", db.display()),
                Err(e) => println!("Database: unavailable ({})", e),
            }
            println!("Cost ledger: {}", config.storage.ledger_path().display());
        }
        None => {
            println!("Triage - model routing and architecture tracking for code review");
            println!();
            println!("Use --help for usage information");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_review_flags() {
        let cli = Cli::try_parse_from([
            "triage",
            "review",
            "--repo",
            "acme/widgets",
            "--pr",
            "42",
            "--magnitude-threshold",
            "300",
            "--important-label",
            "arch",
            "--important-label",
            "breaking",
            "--dry-run",
        ])
        .unwrap();
        assert!(matches!(cli.command, Some(Commands::Review(_))));
    }

    #[test]
    fn test_plan_requires_both_revisions() {
        assert!(Cli::try_parse_from(["triage", "plan", "--title", "t", "--base", "a"]).is_err());
        assert!(Cli::try_parse_from([
            "triage",
            "plan",
            "--title",
            "t",
            "--diff-file",
            "x.diff",
            "--base",
            "a",
            "--head",
            "b"
        ])
        .is_err());
    }

    #[test]
    fn test_parse_defaults_set() {
        let cli = Cli::try_parse_from([
            "triage",
            "defaults",
            "set",
            "--project",
            "acme/widgets",
            "LINE_THRESHOLD",
            "300",
        ])
        .unwrap();
        assert!(matches!(cli.command, Some(Commands::Defaults(_))));
    }
}
