//! Model provider interface and prompt construction

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::change::ChangeContext;
use crate::cost::Usage;
use crate::error::ExternalError;

/// One model invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRequest {
    /// Model identifier at the provider
    pub model: String,
    /// Instructions for the model
    pub prompt: String,
    /// Diff under review (may be empty)
    pub diff: String,
    /// Extra context (custom instruction, previous summary)
    pub context: Option<String>,
    /// Upper bound on generated units
    pub max_output_units: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelResponse {
    pub text: String,
    pub usage: Usage,
}

#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider name as used in [`crate::router::ModelSpec::provider`]
    fn name(&self) -> &str;

    async fn invoke(&self, request: &ModelRequest) -> Result<ModelResponse, ExternalError>;
}

/// Providers by name
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ModelProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn ModelProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn with(mut self, provider: Arc<dyn ModelProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ModelProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}

pub const REVIEW_MAX_OUTPUT_UNITS: u32 = 4000;

/// Build the review request for a change
pub fn review_request(
    model: &str,
    change: &ChangeContext,
    diff: &str,
    custom_instruction: Option<&str>,
    architecture_summary: Option<&str>,
) -> ModelRequest {
    let mut prompt = String::new();
    let _ = writeln!(
        prompt,
        "You are reviewing pull request #{} \"{}\" by {}.",
        change.id, change.title, change.author
    );
    prompt.push_str(
        "Point out bugs, security problems and risky design decisions in the diff. \
         Reference file names and lines. Skip praise and style nits. \
         If nothing needs attention, say so in one sentence.\n",
    );
    if !change.description.trim().is_empty() {
        let _ = write!(prompt, "\nPULL REQUEST DESCRIPTION\n{}\n", change.description.trim());
    }
    if let Some(summary) = architecture_summary {
        let _ = write!(prompt, "\nPROJECT ARCHITECTURE\n{}\n", summary.trim());
    }

    ModelRequest {
        model: model.to_string(),
        prompt,
        diff: diff.to_string(),
        context: custom_instruction.map(str::to_string),
        max_output_units: REVIEW_MAX_OUTPUT_UNITS,
    }
}
