//! Architecture summary generation
//!
//! Runs only after the tracker signals that enough important changes have
//! accumulated. The previous summary is refreshed with the new diff, or a
//! first summary is written from the diff alone.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::cost::{CostLedger, OP_ARCHITECTURE_SUMMARY};
use crate::error::ExternalError;
use crate::provider::{ModelProvider, ModelRequest, ProviderRegistry};
use crate::retry::{CallClass, RetryError, RetryExecutor};
use crate::router::ModelSpec;
use crate::store::ArchitectureStore;

pub const SUMMARY_MAX_OUTPUT_UNITS: u32 = 2000;

/// What the summarizer will do given the stored state and the diff
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryPlan {
    /// No summary yet: describe the architecture from the changes
    CreateFromChanges,
    /// Integrate the changes into the previous summary
    UpdateExisting { previous: String },
    /// Nothing to summarize
    Skip { reason: &'static str },
}

pub fn plan_summary(existing: Option<&str>, diff: &str) -> SummaryPlan {
    let existing = existing.map(str::trim).filter(|s| !s.is_empty());
    let has_changes = !diff.trim().is_empty();

    match (existing, has_changes) {
        (None, true) => SummaryPlan::CreateFromChanges,
        (Some(previous), true) => SummaryPlan::UpdateExisting {
            previous: previous.to_string(),
        },
        (Some(_), false) => SummaryPlan::Skip {
            reason: "no changes to integrate into the existing summary",
        },
        (None, false) => SummaryPlan::Skip {
            reason: "no summary and no changes to describe",
        },
    }
}

/// Result of a summarization attempt that did not fail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SummaryOutcome {
    Created { chars: usize },
    Updated { chars: usize },
    Skipped { reason: String },
}

#[derive(Debug, Error)]
pub enum SummaryError {
    #[error(transparent)]
    Call(#[from] RetryError<ExternalError>),

    #[error("model returned an empty architecture summary")]
    EmptySummary,

    #[error("no provider registered for '{0}'")]
    MissingProvider(String),
}

const REQUIREMENTS: &str = "\
REQUIREMENTS
- Output plain text only, without Markdown.
- Explain the project purpose, overall architecture and design patterns, key components and \
their responsibilities, data flow, technology stack, configuration and deployment, and critical \
dependencies.
- Focus on how everything fits together rather than implementation details.
- Write it so another reviewer can judge which future changes are appropriate.
- Do not repeat these instructions in the output.
";

fn summary_request(model: &str, plan: &SummaryPlan, diff: &str) -> Option<ModelRequest> {
    let (prompt, context) = match plan {
        SummaryPlan::CreateFromChanges => (
            format!(
                "You are an architecture analyst. Describe the architecture of this project \
                 based on the changes below.\n\n{}",
                REQUIREMENTS
            ),
            None,
        ),
        SummaryPlan::UpdateExisting { previous } => (
            format!(
                "You are an architecture analyst. Update the existing architecture summary \
                 (given as context) with the recent changes below, rewriting affected sections \
                 and adding what is new.\n\n{}",
                REQUIREMENTS
            ),
            Some(format!("EXISTING ARCHITECTURE SUMMARY\n{}", previous)),
        ),
        SummaryPlan::Skip { .. } => return None,
    };

    Some(ModelRequest {
        model: model.to_string(),
        prompt,
        diff: diff.to_string(),
        context,
        max_output_units: SUMMARY_MAX_OUTPUT_UNITS,
    })
}

/// Produces and stores architecture summaries
pub struct ArchitectureSummarizer<'a> {
    store: &'a dyn ArchitectureStore,
    provider: Arc<dyn ModelProvider>,
    model: &'a ModelSpec,
    retry: &'a RetryExecutor,
}

impl<'a> ArchitectureSummarizer<'a> {
    pub fn new(
        store: &'a dyn ArchitectureStore,
        provider: Arc<dyn ModelProvider>,
        model: &'a ModelSpec,
        retry: &'a RetryExecutor,
    ) -> Self {
        Self {
            store,
            provider,
            model,
            retry,
        }
    }

    /// Summarizer for `model`, with its provider looked up in `registry`
    pub fn from_registry(
        store: &'a dyn ArchitectureStore,
        registry: &ProviderRegistry,
        model: &'a ModelSpec,
        retry: &'a RetryExecutor,
    ) -> Result<Self, SummaryError> {
        let provider = registry
            .get(&model.provider)
            .ok_or_else(|| SummaryError::MissingProvider(model.provider.clone()))?;
        Ok(Self::new(store, provider, model, retry))
    }

    /// Summarize `diff` into the project's architecture record
    pub async fn summarize(
        &self,
        project: &str,
        change_id: u64,
        diff: &str,
        ledger: &mut CostLedger,
    ) -> Result<SummaryOutcome, SummaryError> {
        let existing = self
            .retry
            .execute(CallClass::Store, "fetch_architecture_summary", || {
                self.store.latest_architecture_summary(project)
            })
            .await?;

        let plan = plan_summary(existing.as_ref().map(|s| s.summary.as_str()), diff);
        let request = match summary_request(&self.model.model, &plan, diff) {
            Some(request) => request,
            None => {
                let reason = match plan {
                    SummaryPlan::Skip { reason } => reason,
                    _ => "nothing to summarize",
                };
                info!(project, reason, "Skipping architecture summary");
                return Ok(SummaryOutcome::Skipped {
                    reason: reason.to_string(),
                });
            }
        };

        let response = self
            .retry
            .execute(CallClass::Model, "architecture_summary", || {
                self.provider.invoke(&request)
            })
            .await?;

        ledger.record(
            &self.model.provider,
            &self.model.model,
            OP_ARCHITECTURE_SUMMARY,
            response.usage,
            Some(format!("Architecture summary for {} after #{}", project, change_id)),
        );

        let text = response.text.trim();
        if text.is_empty() {
            warn!(project, change_id, "Model returned an empty architecture summary");
            return Err(SummaryError::EmptySummary);
        }

        self.retry
            .execute(CallClass::Store, "append_architecture_summary", || {
                self.store.append_architecture_summary(project, change_id, text)
            })
            .await?;

        let chars = text.chars().count();
        info!(project, change_id, chars, "Stored architecture summary");

        Ok(match plan {
            SummaryPlan::UpdateExisting { .. } => SummaryOutcome::Updated { chars },
            _ => SummaryOutcome::Created { chars },
        })
    }
}
