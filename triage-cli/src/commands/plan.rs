//! Plan command - compute the review decision for local inputs
//!
//! Nothing here touches the host, the store or a model; remote project
//! defaults are treated as absent.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use clap::Args;
use serde::Serialize;
use triage_core::git::GitRepo;
use triage_core::pipeline::{plan_review, ReviewPlan};
use triage_core::{
    analyze, resolve, Config, DiffStats, ExcludedDiffPolicy, MacroConfig, PartialMacros, PathFilter,
};

use super::review::describe_signal;
use super::MacroArgs;

/// Show how a change would be routed, without calling any service
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Change title
    #[arg(long)]
    title: String,

    /// Change label (repeatable)
    #[arg(long = "label", value_name = "LABEL")]
    labels: Vec<String>,

    /// File holding the change description
    #[arg(long, value_name = "PATH")]
    body_file: Option<PathBuf>,

    /// Unified diff to measure
    #[arg(long, value_name = "PATH", conflicts_with_all = ["base", "head"])]
    diff_file: Option<PathBuf>,

    /// Base revision in the local repository
    #[arg(long, requires = "head")]
    base: Option<String>,

    /// Head revision in the local repository
    #[arg(long, requires = "base")]
    head: Option<String>,

    /// Local repository used with --base/--head
    #[arg(long, value_name = "DIR", default_value = ".")]
    repo_path: PathBuf,

    #[command(flatten)]
    macros: MacroArgs,

    /// Print the plan as JSON
    #[arg(long)]
    json: bool,
}

/// Everything `plan` decided
#[derive(Debug, Serialize)]
pub struct LocalPlan {
    pub macros: MacroConfig,
    pub stats: DiffStats,
    /// `None` when the excluded-diff policy skips the review
    pub plan: Option<ReviewPlan>,
}

impl PlanArgs {
    /// Execute the plan command
    pub async fn execute(&self, config_path: Option<&Path>) -> anyhow::Result<()> {
        let config = Config::load_with_overrides(config_path, self.macros.overrides())?;

        let description = match &self.body_file {
            Some(path) => std::fs::read_to_string(path)
                .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?,
            None => String::new(),
        };
        let diff = self.load_diff()?;

        let local = plan_local(&config, &self.title, &self.labels, &description, &diff)?;
        if self.json {
            println!("{}", serde_json::to_string_pretty(&local)?);
        } else {
            print!("{}", render_plan(&local));
        }
        Ok(())
    }

    fn load_diff(&self) -> anyhow::Result<String> {
        match (&self.diff_file, &self.base, &self.head) {
            (Some(path), _, _) => std::fs::read_to_string(path)
                .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e)),
            (None, Some(base), Some(head)) => {
                Ok(GitRepo::open(&self.repo_path)?.diff_between(base, head)?)
            }
            _ => anyhow::bail!("Provide --diff-file or both --base and --head"),
        }
    }
}

pub fn plan_local(
    config: &Config,
    title: &str,
    labels: &[String],
    description: &str,
    diff: &str,
) -> anyhow::Result<LocalPlan> {
    let per_change = PartialMacros::from_description(description);
    let macros = resolve(&per_change, &config.review.macros, None);

    let filter = PathFilter::new(&config.review.exclude)?;
    let analyzed = analyze(diff, &filter);

    let skip = analyzed.is_fully_excluded()
        && config.review.excluded_diff_policy == ExcludedDiffPolicy::SkipReview;
    let plan = (!skip).then(|| {
        plan_review(
            title,
            labels,
            description,
            analyzed.magnitude(),
            &macros,
            &config.models,
        )
    });

    Ok(LocalPlan {
        macros,
        stats: analyzed.stats,
        plan,
    })
}

fn render_plan(local: &LocalPlan) -> String {
    let mut out = String::new();

    let _ = writeln!(
        out,
        "Magnitude:   {} (+{} -{}, {} files counted, {} excluded)",
        local.stats.magnitude,
        local.stats.additions,
        local.stats.deletions,
        local.stats.files_counted,
        local.stats.files_excluded
    );
    let _ = writeln!(
        out,
        "Thresholds:  {} lines, {} changes",
        local.macros.magnitude_threshold, local.macros.changes_threshold
    );
    if let Some(instruction) = &local.macros.custom_instruction {
        let _ = writeln!(out, "Instruction: {}", instruction.replace('\n', " / "));
    }

    match &local.plan {
        None => {
            let _ = writeln!(out, "Review:      skipped (every changed file is excluded)");
        }
        Some(plan) => {
            let _ = writeln!(
                out,
                "Model:       {} [{}] ({})",
                plan.decision.model, plan.decision.tier, plan.decision.rationale
            );
            let _ = writeln!(out, "Important:   {}", plan.classification.important);
            for signal in &plan.classification.signals {
                let _ = writeln!(out, "  - {}", describe_signal(signal));
            }
            let _ = writeln!(
                out,
                "Tracker:     {}",
                if plan.consult_tracker {
                    "would count this change"
                } else {
                    "not consulted"
                }
            );
        }
    }

    out
}
