//! Model routing
//!
//! The router is an ordered rule table; the first rule whose predicate holds
//! decides the tier and the rationale. Explicit author intent beats automatic
//! importance, which beats raw size.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::classify::ClassificationResult;

/// Review-policy tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    DeepReview,
    Lightweight,
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelTier::DeepReview => write!(f, "deep-review"),
            ModelTier::Lightweight => write!(f, "lightweight"),
        }
    }
}

/// Why a tier was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rationale {
    ExplicitlyRequested,
    ImportantChange,
    LargeChange,
    SmallChange,
}

impl fmt::Display for Rationale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Rationale::ExplicitlyRequested => "explicitly requested",
            Rationale::ImportantChange => "important change detected",
            Rationale::LargeChange => "large change detected",
            Rationale::SmallChange => "small change",
        };
        f.write_str(text)
    }
}

/// A concrete model at a provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub provider: String,
    pub model: String,
}

impl ModelSpec {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

impl fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

pub const DEFAULT_DEEP_REVIEW_PROVIDER: &str = "anthropic";
pub const DEFAULT_DEEP_REVIEW_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_LIGHTWEIGHT_PROVIDER: &str = "openai";
pub const DEFAULT_LIGHTWEIGHT_MODEL: &str = "gpt-4.1-nano-2025-04-14";

/// Which model serves each tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelCatalog {
    pub deep_review: ModelSpec,
    pub lightweight: ModelSpec,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self {
            deep_review: ModelSpec::new(DEFAULT_DEEP_REVIEW_PROVIDER, DEFAULT_DEEP_REVIEW_MODEL),
            lightweight: ModelSpec::new(DEFAULT_LIGHTWEIGHT_PROVIDER, DEFAULT_LIGHTWEIGHT_MODEL),
        }
    }
}

impl ModelCatalog {
    pub fn for_tier(&self, tier: ModelTier) -> &ModelSpec {
        match tier {
            ModelTier::DeepReview => &self.deep_review,
            ModelTier::Lightweight => &self.lightweight,
        }
    }
}

/// Routing outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDecision {
    pub tier: ModelTier,
    pub model: ModelSpec,
    pub rationale: Rationale,
}

/// Inputs a routing rule looks at
struct RouteInput<'a> {
    classification: &'a ClassificationResult,
    magnitude: u64,
    threshold: u64,
}

struct Rule {
    applies: fn(&RouteInput<'_>) -> bool,
    tier: ModelTier,
    rationale: Rationale,
}

/// Evaluated top to bottom; the last rule always applies
const RULES: &[Rule] = &[
    Rule {
        applies: |i| i.classification.explicit_model_request,
        tier: ModelTier::DeepReview,
        rationale: Rationale::ExplicitlyRequested,
    },
    Rule {
        applies: |i| i.classification.important,
        tier: ModelTier::DeepReview,
        rationale: Rationale::ImportantChange,
    },
    Rule {
        applies: |i| i.magnitude > i.threshold,
        tier: ModelTier::DeepReview,
        rationale: Rationale::LargeChange,
    },
    Rule {
        applies: |_| true,
        tier: ModelTier::Lightweight,
        rationale: Rationale::SmallChange,
    },
];

/// Pick the review model for a classified change
pub fn route(
    classification: &ClassificationResult,
    magnitude: u64,
    threshold: u64,
    catalog: &ModelCatalog,
) -> ModelDecision {
    let input = RouteInput {
        classification,
        magnitude,
        threshold,
    };

    let (tier, rationale) = RULES
        .iter()
        .find(|rule| (rule.applies)(&input))
        .map(|rule| (rule.tier, rule.rationale))
        .unwrap_or((ModelTier::Lightweight, Rationale::SmallChange));

    ModelDecision {
        tier,
        model: catalog.for_tier(tier).clone(),
        rationale,
    }
}
