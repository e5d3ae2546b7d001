//! Importance classification of a change
//!
//! Each signal is evaluated independently and case-insensitively. Only the
//! title marker, label and "important changes" checkbox make a change
//! important; size is recorded as a separate signal for the router, and the
//! "use deep review model" checkbox is an explicit request that is tracked
//! apart from importance.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::macros::MacroConfig;

/// A reason that fired during classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum Signal {
    /// The title contains this configured marker
    TitleMarker { marker: String },
    /// The change carries this configured label
    Label { label: String },
    /// The author ticked the "important changes" checkbox
    ImportantCheckbox,
    /// The author ticked the "use deep review model" checkbox
    DeepReviewCheckbox,
    /// The diff is larger than the threshold
    MagnitudeExceeded { magnitude: u64, threshold: u64 },
}

impl Signal {
    /// True for signals that make a change important
    pub fn marks_important(&self) -> bool {
        matches!(
            self,
            Signal::TitleMarker { .. } | Signal::Label { .. } | Signal::ImportantCheckbox
        )
    }
}

/// Verdict for one change
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// Title marker, label or checkbox fired
    pub important: bool,
    /// The author explicitly asked for the deep-review model
    pub explicit_model_request: bool,
    /// Every signal that fired, in evaluation order
    pub signals: Vec<Signal>,
}

impl ClassificationResult {
    pub fn magnitude_exceeded(&self) -> bool {
        self.signals
            .iter()
            .any(|s| matches!(s, Signal::MagnitudeExceeded { .. }))
    }
}

/// The fields of a change the classifier looks at
#[derive(Debug, Clone, Copy)]
pub struct ChangeSignals<'a> {
    pub title: &'a str,
    pub labels: &'a [String],
    pub description: &'a str,
    pub magnitude: u64,
}

/// Classify a change. Pure: equal inputs always produce equal results.
pub fn classify(change: ChangeSignals<'_>, macros: &MacroConfig) -> ClassificationResult {
    let mut signals = Vec::new();

    let title = change.title.to_lowercase();
    if let Some(marker) = macros
        .important_markers
        .iter()
        .find(|m| !m.trim().is_empty() && title.contains(&m.trim().to_lowercase()))
    {
        signals.push(Signal::TitleMarker {
            marker: marker.clone(),
        });
    }

    if let Some(label) = change.labels.iter().find(|label| {
        macros
            .important_labels
            .iter()
            .any(|wanted| label.trim().eq_ignore_ascii_case(wanted.trim()))
    }) {
        signals.push(Signal::Label {
            label: label.clone(),
        });
    }

    if IMPORTANT_CHECKBOX.is_match(change.description) {
        signals.push(Signal::ImportantCheckbox);
    }

    let explicit_model_request = DEEP_REVIEW_CHECKBOX.is_match(change.description);
    if explicit_model_request {
        signals.push(Signal::DeepReviewCheckbox);
    }

    if change.magnitude > macros.magnitude_threshold {
        signals.push(Signal::MagnitudeExceeded {
            magnitude: change.magnitude,
            threshold: macros.magnitude_threshold,
        });
    }

    ClassificationResult {
        important: signals.iter().any(Signal::marks_important),
        explicit_model_request,
        signals,
    }
}

static IMPORTANT_CHECKBOX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*(?:[-*+]\s*)?\[x\]\s*important\s+changes?\b").expect("valid regex")
});

static DEEP_REVIEW_CHECKBOX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*(?:[-*+]\s*)?\[x\]\s*use\s+(?:deep[\s-]+review(?:\s+model)?|claude)\b")
        .expect("valid regex")
});
