//! Review run orchestration
//!
//! One run takes a change id through fetch, configuration, diff analysis,
//! classification, routing, review, tracking and summarization. Components
//! only report typed outcomes; this module alone decides whether a failure
//! aborts the run (required steps) or degrades it (best-effort steps).
//!
//! Required: fetching the change, fetching the diff, invoking the review
//! model, posting the review. Best-effort: project defaults, architecture
//! tracking, architecture context, architecture summarization.
//!
//! The tracker is consulted only once the review is posted, so a failed
//! review never uses up a summary trigger.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::change::ChangeContext;
use crate::classify::{classify, ChangeSignals, ClassificationResult};
use crate::cost::{CostLedger, OP_REVIEW};
use crate::diff::{analyze, DiffStats, ExcludedDiffPolicy, PathFilter};
use crate::error::ExternalError;
use crate::host::{ReviewComment, VersionControl};
use crate::macros::{resolve, MacroConfig, PartialMacros};
use crate::provider::{review_request, ProviderRegistry};
use crate::retry::{CallClass, RetryError, RetryExecutor};
use crate::router::{route, ModelCatalog, ModelDecision};
use crate::store::{ArchitectureStore, IncrementOutcome};
use crate::summary::{ArchitectureSummarizer, SummaryOutcome};
use crate::tracker::ArchitectureTracker;

/// Run-level settings, resolved from operator configuration
#[derive(Debug, Clone, Default)]
pub struct PipelineSettings {
    /// Project key in the store; the change's target repository when `None`
    pub project: Option<String>,
    /// Operator layer of the macro resolution
    pub operator: PartialMacros,
    pub exclude: Vec<String>,
    pub excluded_diff_policy: ExcludedDiffPolicy,
    pub models: ModelCatalog,
    /// Stop after routing: no tracking, no model call, no comment
    pub dry_run: bool,
}

/// Why a run did not complete
#[derive(Debug, Error)]
pub enum RunError {
    /// The change or the configuration is not acceptable; nothing was retried
    #[error("Validation error: {0}")]
    Validation(String),

    /// A required call failed after the retry policy gave up
    #[error("Required step '{step}' failed: {source}")]
    Required {
        step: &'static str,
        #[source]
        source: RetryError<ExternalError>,
    },

    /// Missing or inconsistent setup (e.g. no provider for the routed model)
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Decision for one change, computed without any I/O
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewPlan {
    pub classification: ClassificationResult,
    pub decision: ModelDecision,
    /// The architecture tracker is consulted for important changes only
    pub consult_tracker: bool,
}

/// Classify and route a change
pub fn plan_review(
    title: &str,
    labels: &[String],
    description: &str,
    magnitude: u64,
    macros: &MacroConfig,
    models: &ModelCatalog,
) -> ReviewPlan {
    let classification = classify(
        ChangeSignals {
            title,
            labels,
            description,
            magnitude,
        },
        macros,
    );
    let decision = route(&classification, magnitude, macros.magnitude_threshold, models);

    ReviewPlan {
        consult_tracker: classification.important,
        classification,
        decision,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    /// Review posted
    Reviewed,
    /// Dry run; stopped after routing
    Planned,
    /// Nothing to review under the configured policy
    Skipped { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tracker", rename_all = "snake_case")]
pub enum TrackerStatus {
    /// The change is not important
    NotInvoked,
    Counted { count: u64, should_summarize: bool },
    /// The revision had already been counted; `should_summarize` is what
    /// counting it decided
    Duplicate { should_summarize: bool },
    /// The store could not be reached; treated as "do not summarize"
    Unavailable,
}

impl From<IncrementOutcome> for TrackerStatus {
    fn from(outcome: IncrementOutcome) -> Self {
        match outcome {
            IncrementOutcome::Counted {
                count,
                should_summarize,
            } => TrackerStatus::Counted {
                count,
                should_summarize,
            },
            IncrementOutcome::Duplicate { should_summarize } => {
                TrackerStatus::Duplicate { should_summarize }
            }
        }
    }
}

/// A best-effort step that failed and was replaced by its default
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegradedStep {
    pub step: String,
    pub error: String,
}

/// Everything a run decided and did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub change_id: u64,
    pub project: String,
    pub revision: String,
    pub status: RunStatus,
    pub macros: MacroConfig,
    pub stats: DiffStats,
    pub plan: Option<ReviewPlan>,
    pub tracker: TrackerStatus,
    pub summary: Option<SummaryOutcome>,
    /// Model cost recorded during this run
    pub cost_total: f64,
    pub degraded: Vec<DegradedStep>,
}

/// Runs reviews against the configured collaborators
pub struct ReviewPipeline<'a> {
    host: &'a dyn VersionControl,
    store: &'a dyn ArchitectureStore,
    providers: &'a ProviderRegistry,
    retry: &'a RetryExecutor,
    settings: PipelineSettings,
}

impl<'a> ReviewPipeline<'a> {
    pub fn new(
        host: &'a dyn VersionControl,
        store: &'a dyn ArchitectureStore,
        providers: &'a ProviderRegistry,
        retry: &'a RetryExecutor,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            host,
            store,
            providers,
            retry,
            settings,
        }
    }

    /// Review change `change_id`, appending model usage to `ledger`
    pub async fn run(&self, change_id: u64, ledger: &mut CostLedger) -> Result<RunReport, RunError> {
        let change = self
            .retry
            .execute(CallClass::Host, "get_change", || self.host.get_change(change_id))
            .await
            .map_err(|source| RunError::Required {
                step: "get_change",
                source,
            })?;

        change
            .ensure_reviewable()
            .map_err(|e| RunError::Validation(e.to_string()))?;

        let filter = PathFilter::new(&self.settings.exclude)
            .map_err(|e| RunError::Validation(e.to_string()))?;

        let project = self
            .settings
            .project
            .clone()
            .unwrap_or_else(|| change.target_repository.clone());
        info!(change = change.id, project = %project, revision = %change.head_revision, "Starting review run");

        let mut degraded = Vec::new();

        let per_change = PartialMacros::from_description(&change.description);
        let remote = match self
            .retry
            .execute(CallClass::Store, "get_project_defaults", || {
                self.store.project_defaults(&project)
            })
            .await
        {
            Ok(defaults) => Some(defaults),
            Err(e) => {
                warn!(project = %project, error = %e, "Project defaults unavailable, using built-in defaults");
                degraded.push(DegradedStep {
                    step: "get_project_defaults".to_string(),
                    error: e.to_string(),
                });
                None
            }
        };
        let macros = resolve(&per_change, &self.settings.operator, remote.as_ref());

        let raw_diff = self
            .retry
            .execute(CallClass::Host, "get_diff", || {
                self.host
                    .get_diff(&change.base_revision, &change.head_revision, &self.settings.exclude)
            })
            .await
            .map_err(|source| RunError::Required {
                step: "get_diff",
                source,
            })?;
        let analyzed = analyze(&raw_diff, &filter);

        let mut report = RunReport {
            change_id: change.id,
            project: project.clone(),
            revision: change.head_revision.clone(),
            status: RunStatus::Planned,
            macros: macros.clone(),
            stats: analyzed.stats,
            plan: None,
            tracker: TrackerStatus::NotInvoked,
            summary: None,
            cost_total: ledger.grand_total(),
            degraded,
        };

        if analyzed.is_fully_excluded()
            && self.settings.excluded_diff_policy == ExcludedDiffPolicy::SkipReview
        {
            info!(change = change.id, "Every changed file is excluded, skipping review");
            report.status = RunStatus::Skipped {
                reason: "every changed file is excluded".to_string(),
            };
            return Ok(report);
        }

        let plan = plan_review(
            &change.title,
            &change.labels,
            &change.description,
            analyzed.magnitude(),
            &macros,
            &self.settings.models,
        );
        info!(
            change = change.id,
            magnitude = analyzed.magnitude(),
            important = plan.classification.important,
            model = %plan.decision.model,
            rationale = %plan.decision.rationale,
            "Routed change"
        );
        report.plan = Some(plan.clone());

        if self.settings.dry_run {
            return Ok(report);
        }

        let context = self.architecture_context(&project, &mut report.degraded).await;

        let model = &plan.decision.model;
        let provider = self.providers.get(&model.provider).ok_or_else(|| {
            RunError::Config(format!("No provider registered for '{}'", model.provider))
        })?;
        let request = review_request(
            &model.model,
            &change,
            &analyzed.filtered,
            macros.custom_instruction.as_deref(),
            context.as_deref(),
        );
        let response = self
            .retry
            .execute(CallClass::Model, "review", || provider.invoke(&request))
            .await
            .map_err(|source| RunError::Required {
                step: "review",
                source,
            })?;
        ledger.record(
            &model.provider,
            &model.model,
            OP_REVIEW,
            response.usage,
            Some(format!("Review of #{}", change.id)),
        );

        let comments = [ReviewComment::general(render_comment(&response.text, &plan.decision))];
        self.retry
            .execute(CallClass::Host, "post_comments", || {
                self.host
                    .post_comments(change.id, &change.head_revision, &comments)
            })
            .await
            .map_err(|source| RunError::Required {
                step: "post_comments",
                source,
            })?;
        report.status = RunStatus::Reviewed;

        if plan.consult_tracker {
            let tracker = ArchitectureTracker::new(self.store, self.retry);
            report.tracker = match tracker
                .record_important_change(&project, &change.head_revision, macros.changes_threshold)
                .await
            {
                Ok(outcome) => outcome.into(),
                Err(e) => {
                    warn!(project = %project, error = %e, "Architecture tracking unavailable, not summarizing");
                    report.degraded.push(DegradedStep {
                        step: "track_architecture_change".to_string(),
                        error: e.to_string(),
                    });
                    TrackerStatus::Unavailable
                }
            };
        }

        let summarize = match report.tracker {
            TrackerStatus::Counted {
                should_summarize, ..
            } => should_summarize,
            // A retried or re-run call that crossed the threshold earlier
            TrackerStatus::Duplicate {
                should_summarize: true,
            } => {
                self.summary_pending(&project, change.id, &mut report.degraded)
                    .await
            }
            _ => false,
        };
        if summarize {
            report.summary = self
                .summarize(&project, &change, &analyzed.filtered, ledger, &mut report.degraded)
                .await;
        }

        report.cost_total = ledger.grand_total();
        info!(
            change = change.id,
            degraded = report.degraded.len(),
            cost_total = report.cost_total,
            "Review run finished"
        );
        Ok(report)
    }

    /// Latest architecture summary, passed to the reviewer as context
    async fn architecture_context(
        &self,
        project: &str,
        degraded: &mut Vec<DegradedStep>,
    ) -> Option<String> {
        match self
            .retry
            .execute(CallClass::Store, "get_architecture_context", || {
                self.store.latest_architecture_summary(project)
            })
            .await
        {
            Ok(summary) => summary.map(|s| s.summary),
            Err(e) => {
                warn!(project, error = %e, "Architecture context unavailable");
                degraded.push(DegradedStep {
                    step: "get_architecture_context".to_string(),
                    error: e.to_string(),
                });
                None
            }
        }
    }

    /// True unless the latest stored summary already belongs to `change_id`
    async fn summary_pending(
        &self,
        project: &str,
        change_id: u64,
        degraded: &mut Vec<DegradedStep>,
    ) -> bool {
        match self
            .retry
            .execute(CallClass::Store, "get_architecture_summary", || {
                self.store.latest_architecture_summary(project)
            })
            .await
        {
            Ok(latest) => latest.map_or(true, |s| s.change_id != change_id),
            Err(e) => {
                warn!(project, error = %e, "Cannot tell whether a summary is pending, not summarizing");
                degraded.push(DegradedStep {
                    step: "architecture_summary".to_string(),
                    error: e.to_string(),
                });
                false
            }
        }
    }

    async fn summarize(
        &self,
        project: &str,
        change: &ChangeContext,
        diff: &str,
        ledger: &mut CostLedger,
        degraded: &mut Vec<DegradedStep>,
    ) -> Option<SummaryOutcome> {
        let result = match ArchitectureSummarizer::from_registry(
            self.store,
            self.providers,
            &self.settings.models.deep_review,
            self.retry,
        ) {
            Ok(summarizer) => summarizer.summarize(project, change.id, diff, ledger).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(project, error = %e, "Architecture summary failed");
                degraded.push(DegradedStep {
                    step: "architecture_summary".to_string(),
                    error: e.to_string(),
                });
                None
            }
        }
    }
}

/// Review text followed by a footer naming the model and the reason it was chosen
pub fn render_comment(review: &str, decision: &ModelDecision) -> String {
    format!(
        "{}\n\n---\n_Reviewed by `{}` ({}: {})_",
        review.trim_end(),
        decision.model.model,
        decision.tier,
        decision.rationale
    )
}
