//! Review command - route, review and track one pull request

use std::fmt::Write as _;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use clap::Args;
use tracing::{info, warn};
use triage_core::git::GitRepo;
use triage_core::pipeline::{RunStatus, TrackerStatus};
use triage_core::summary::SummaryOutcome;
use triage_core::{
    ArchitectureChangeRecord, ArchitectureStore, ArchitectureSummary, Config, CostLedger,
    ExternalError, IncrementOutcome, PartialMacros, PipelineSettings, ProviderRegistry,
    RetryExecutor, ReviewPipeline, RunReport, Signal,
};
use triage_github::GitHubClient;

use super::{open_database, MacroArgs};
use crate::providers;

/// Review a pull request
#[derive(Args, Debug)]
pub struct ReviewArgs {
    /// Repository (owner/repo format, uses the current repo's remote if not specified)
    #[arg(short, long, env = "GITHUB_REPOSITORY")]
    repo: Option<String>,

    /// Pull request number
    #[arg(long)]
    pr: u64,

    /// Project key in the store (defaults to the repository)
    #[arg(long)]
    project: Option<String>,

    #[command(flatten)]
    macros: MacroArgs,

    /// SQLite database holding project defaults and tracking state
    #[arg(long, value_name = "PATH")]
    db: Option<PathBuf>,

    /// Cost ledger file
    #[arg(long, value_name = "PATH")]
    ledger: Option<PathBuf>,

    /// Stop after routing: no tracking, no model call, no comment
    #[arg(long)]
    dry_run: bool,

    /// Print the run report as JSON
    #[arg(long)]
    json: bool,
}

impl ReviewArgs {
    /// Execute the review command
    pub async fn execute(&self, config_path: Option<&Path>, verbose: bool) -> anyhow::Result<()> {
        let mut overrides = self.macros.overrides();
        overrides.project = self.project.clone();
        overrides.database_path = self.db.clone();
        overrides.ledger_path = self.ledger.clone();
        let config = Config::load_with_overrides(config_path, overrides)?;

        let client = match &self.repo {
            Some(repo) => GitHubClient::from_url(repo)?,
            None => {
                let remote = GitRepo::open(".")?.default_remote()?;
                GitHubClient::from_url(&remote.url)?
            }
        };

        let store: Box<dyn ArchitectureStore> = match open_database(&config).await {
            Ok(db) => Box::new(db.store()),
            Err(e) => {
                warn!(error = %e, "Store unavailable, continuing without project state");
                Box::new(UnavailableStore(e.to_string()))
            }
        };

        let registry = if self.dry_run {
            ProviderRegistry::new()
        } else {
            providers::registry_from_env()?
        };
        let retry = RetryExecutor::new(config.retry.clone(), config.timeouts.clone());
        let settings = pipeline_settings(&config, self.dry_run);

        let ledger_path = config.storage.ledger_path();
        let mut ledger = CostLedger::new(config.pricing.clone());

        let pipeline = ReviewPipeline::new(&client, store.as_ref(), &registry, &retry, settings);
        let result = pipeline.run(self.pr, &mut ledger).await;

        // Whatever was spent before a failure still belongs in the ledger
        persist_ledger(&ledger, &ledger_path);

        let report = result?;
        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print!("{}", render_report(&report));
        }

        if !self.dry_run {
            write_step_outputs(&ledger);
        }
        if verbose && !ledger.is_empty() {
            eprintln!("{}", ledger.render_report());
        }

        info!(change = report.change_id, "Done");
        Ok(())
    }
}

fn pipeline_settings(config: &Config, dry_run: bool) -> PipelineSettings {
    PipelineSettings {
        project: config.review.project.clone(),
        operator: config.review.macros.clone(),
        exclude: config.review.exclude.clone(),
        excluded_diff_policy: config.review.excluded_diff_policy,
        models: config.models.clone(),
        dry_run,
    }
}

/// Add this run's model usage to the ledger file
fn persist_ledger(ledger: &CostLedger, path: &Path) {
    if ledger.is_empty() {
        return;
    }
    if let Err(e) = ledger.append_to(path) {
        warn!(path = %path.display(), error = %e, "Failed to save cost ledger");
    }
}

/// Append `key=value` cost lines to the CI step output file, if there is one
fn write_step_outputs(ledger: &CostLedger) {
    let Some(path) = std::env::var_os("GITHUB_OUTPUT") else {
        return;
    };
    let result = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .and_then(|mut file| {
            for line in ledger.output_lines() {
                writeln!(file, "{}", line)?;
            }
            Ok(())
        });
    if let Err(e) = result {
        warn!(error = %e, "Failed to write step outputs");
    }
}

pub fn render_report(report: &RunReport) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "Pull request #{} ({})", report.change_id, report.project);
    let _ = writeln!(out, "  Revision:   {}", report.revision);
    let status = match &report.status {
        RunStatus::Reviewed => "reviewed".to_string(),
        RunStatus::Planned => "planned (dry run)".to_string(),
        RunStatus::Skipped { reason } => format!("skipped: {}", reason),
    };
    let _ = writeln!(out, "  Status:     {}", status);
    let _ = writeln!(
        out,
        "  Magnitude:  {} (+{} -{}, {} files counted, {} excluded)",
        report.stats.magnitude,
        report.stats.additions,
        report.stats.deletions,
        report.stats.files_counted,
        report.stats.files_excluded
    );
    let _ = writeln!(
        out,
        "  Thresholds: {} lines, {} changes",
        report.macros.magnitude_threshold, report.macros.changes_threshold
    );

    if let Some(plan) = &report.plan {
        let _ = writeln!(
            out,
            "  Model:      {} [{}] ({})",
            plan.decision.model, plan.decision.tier, plan.decision.rationale
        );
        let _ = writeln!(out, "  Important:  {}", plan.classification.important);
        for signal in &plan.classification.signals {
            let _ = writeln!(out, "    - {}", describe_signal(signal));
        }
    }

    let tracker = match report.tracker {
        TrackerStatus::NotInvoked => "not consulted".to_string(),
        TrackerStatus::Counted {
            count,
            should_summarize,
        } => {
            if should_summarize {
                format!("counted ({}), summary triggered", count)
            } else {
                format!("counted ({})", count)
            }
        }
        TrackerStatus::Duplicate { should_summarize } => {
            if should_summarize {
                "revision already counted, summary triggered".to_string()
            } else {
                "revision already counted".to_string()
            }
        }
        TrackerStatus::Unavailable => "unavailable".to_string(),
    };
    let _ = writeln!(out, "  Tracker:    {}", tracker);

    if let Some(summary) = &report.summary {
        let summary = match summary {
            SummaryOutcome::Created { chars } => format!("created ({} chars)", chars),
            SummaryOutcome::Updated { chars } => format!("updated ({} chars)", chars),
            SummaryOutcome::Skipped { reason } => format!("skipped: {}", reason),
        };
        let _ = writeln!(out, "  Summary:    {}", summary);
    }

    let _ = writeln!(out, "  Cost total: ${:.6}", report.cost_total);

    if !report.degraded.is_empty() {
        let _ = writeln!(out, "  Degraded:");
        for step in &report.degraded {
            let _ = writeln!(out, "    - {}: {}", step.step, step.error);
        }
    }

    out
}

pub(crate) fn describe_signal(signal: &Signal) -> String {
    match signal {
        Signal::TitleMarker { marker } => format!("title marker {}", marker),
        Signal::Label { label } => format!("label '{}'", label),
        Signal::ImportantCheckbox => "important-change checkbox".to_string(),
        Signal::DeepReviewCheckbox => "deep-review checkbox".to_string(),
        Signal::MagnitudeExceeded {
            magnitude,
            threshold,
        } => format!("{} lines over the {} line threshold", magnitude, threshold),
    }
}

/// Stand-in when the database cannot be opened; every call fails transiently
/// so the pipeline takes its best-effort paths
struct UnavailableStore(String);

impl UnavailableStore {
    fn error(&self) -> ExternalError {
        ExternalError::transient("store", self.0.clone())
    }
}

#[async_trait]
impl ArchitectureStore for UnavailableStore {
    async fn project_defaults(&self, _project: &str) -> Result<PartialMacros, ExternalError> {
        Err(self.error())
    }

    async fn set_project_defaults(
        &self,
        _project: &str,
        _defaults: &PartialMacros,
    ) -> Result<(), ExternalError> {
        Err(self.error())
    }

    async fn increment_and_maybe_reset(
        &self,
        _project: &str,
        _revision: &str,
        _threshold: u64,
    ) -> Result<IncrementOutcome, ExternalError> {
        Err(self.error())
    }

    async fn change_record(
        &self,
        _project: &str,
    ) -> Result<Option<ArchitectureChangeRecord>, ExternalError> {
        Err(self.error())
    }

    async fn append_architecture_summary(
        &self,
        _project: &str,
        _change_id: u64,
        _summary: &str,
    ) -> Result<(), ExternalError> {
        Err(self.error())
    }

    async fn latest_architecture_summary(
        &self,
        _project: &str,
    ) -> Result<Option<ArchitectureSummary>, ExternalError> {
        Err(self.error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use triage_core::cost::OP_REVIEW;
    use triage_core::pipeline::{plan_review, DegradedStep};
    use triage_core::{
        DiffStats, ExcludedDiffPolicy, MacroConfig, ModelCatalog, PricingTable, Usage,
    };

    fn report() -> RunReport {
        let macros = MacroConfig::default();
        let plan = plan_review(
            "#IMPORTANT-CHANGE new cache",
            &[],
            "",
            12,
            &macros,
            &ModelCatalog::default(),
        );
        RunReport {
            change_id: 42,
            project: "acme/widgets".into(),
            revision: "head111".into(),
            status: RunStatus::Reviewed,
            macros,
            stats: DiffStats {
                magnitude: 12,
                additions: 10,
                deletions: 2,
                files_counted: 1,
                files_excluded: 1,
            },
            plan: Some(plan),
            tracker: TrackerStatus::Counted {
                count: 5,
                should_summarize: true,
            },
            summary: Some(SummaryOutcome::Created { chars: 300 }),
            cost_total: 0.0123,
            degraded: vec![DegradedStep {
                step: "get_project_defaults".into(),
                error: "store: locked".into(),
            }],
        }
    }

    #[test]
    fn test_render_report() {
        let text = render_report(&report());
        assert!(text.contains("Pull request #42 (acme/widgets)"));
        assert!(text.contains("Status:     reviewed"));
        assert!(text.contains("(+10 -2, 1 files counted, 1 excluded)"));
        assert!(text.contains("deep-review"));
        assert!(text.contains("important change detected"));
        assert!(text.contains("title marker #IMPORTANT-CHANGE"));
        assert!(text.contains("counted (5), summary triggered"));
        assert!(text.contains("created (300 chars)"));
        assert!(text.contains("get_project_defaults: store: locked"));
    }

    #[test]
    fn test_settings_follow_config() {
        let mut config = Config::default();
        config.review.project = Some("widgets".into());
        config.review.excluded_diff_policy = ExcludedDiffPolicy::SkipReview;
        config.review.macros.magnitude_threshold = Some(50);

        let settings = pipeline_settings(&config, true);
        assert_eq!(settings.project.as_deref(), Some("widgets"));
        assert_eq!(settings.operator.magnitude_threshold, Some(50));
        assert_eq!(settings.excluded_diff_policy, ExcludedDiffPolicy::SkipReview);
        assert!(settings.dry_run);
    }

    #[test]
    fn test_run_reports_only_its_own_cost() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("costs.json");
        let usage = Usage {
            input_units: 1_000_000,
            output_units: 0,
        };

        let mut earlier = CostLedger::new(PricingTable::default());
        earlier.record("anthropic", "claude-sonnet-4-20250514", OP_REVIEW, usage, None);
        earlier.save(&path).unwrap();

        let mut run = CostLedger::new(PricingTable::default());
        run.record("openai", "gpt-4.1-nano-2025-04-14", OP_REVIEW, usage, None);
        persist_ledger(&run, &path);

        assert_eq!(run.output_lines()[0], "total_ai_cost=0.100000");
        assert_eq!(run.output_lines()[1], "total_ai_calls=1");
        let persisted = CostLedger::load(&path, PricingTable::default()).unwrap();
        assert_eq!(persisted.entries().len(), 2);
    }

    #[tokio::test]
    async fn test_unavailable_store_is_transient() {
        let store = UnavailableStore("disk full".into());
        let err = store.project_defaults("p").await.unwrap_err();
        assert_eq!(err.class, triage_core::ErrorClass::Transient);
        assert!(err.message.contains("disk full"));
    }
}
