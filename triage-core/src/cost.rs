//! Model usage cost accounting
//!
//! The ledger is append-only: entries are recorded once per model invocation
//! and never edited. Summaries are read-only projections and may be taken at
//! any point of the run.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::router::{DEFAULT_DEEP_REVIEW_MODEL, DEFAULT_LIGHTWEIGHT_MODEL};
use crate::Result;

/// Operation label for review invocations
pub const OP_REVIEW: &str = "review";
/// Operation label for architecture summary invocations
pub const OP_ARCHITECTURE_SUMMARY: &str = "architecture_summary";

/// USD per million units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    pub input: f64,
    pub output: f64,
}

/// Prices by model identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PricingTable(HashMap<String, ModelPrice>);

impl Default for PricingTable {
    fn default() -> Self {
        let mut prices = HashMap::new();
        prices.insert(
            DEFAULT_DEEP_REVIEW_MODEL.to_string(),
            ModelPrice {
                input: 3.00,
                output: 15.00,
            },
        );
        prices.insert(
            DEFAULT_LIGHTWEIGHT_MODEL.to_string(),
            ModelPrice {
                input: 0.10,
                output: 0.40,
            },
        );
        Self(prices)
    }
}

impl PricingTable {
    pub fn with_price(mut self, model: impl Into<String>, price: ModelPrice) -> Self {
        self.0.insert(model.into(), price);
        self
    }

    /// Cost of one invocation; unknown models cost nothing
    pub fn cost(&self, model: &str, input_units: u64, output_units: u64) -> f64 {
        match self.0.get(model) {
            Some(price) => {
                (input_units as f64 / 1_000_000.0) * price.input
                    + (output_units as f64 / 1_000_000.0) * price.output
            }
            None => {
                warn!(model, "Unknown model, recording zero cost");
                0.0
            }
        }
    }
}

/// One model invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostLedgerEntry {
    pub provider: String,
    pub model: String,
    /// What the invocation was for ([`OP_REVIEW`], [`OP_ARCHITECTURE_SUMMARY`])
    pub operation: String,
    pub input_units: u64,
    pub output_units: u64,
    pub cost: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// Aggregate over a group of entries
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub calls: u64,
    pub input_units: u64,
    pub output_units: u64,
    pub cost: f64,
}

impl UsageTotals {
    fn add(&mut self, entry: &CostLedgerEntry) {
        self.calls += 1;
        self.input_units += entry.input_units;
        self.output_units += entry.output_units;
        self.cost += entry.cost;
    }
}

/// Snapshot of the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostSummary {
    pub total: UsageTotals,
    pub by_provider: BTreeMap<String, UsageTotals>,
    pub by_model: BTreeMap<String, UsageTotals>,
    pub by_operation: BTreeMap<String, UsageTotals>,
    pub generated_at: DateTime<Utc>,
}

/// Usage reported by a provider for one invocation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_units: u64,
    pub output_units: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostLedger {
    entries: Vec<CostLedgerEntry>,
    #[serde(skip)]
    pricing: PricingTable,
}

impl CostLedger {
    pub fn new(pricing: PricingTable) -> Self {
        Self {
            entries: Vec::new(),
            pricing,
        }
    }

    /// Load a previously saved ledger, or start empty if there is none
    pub fn load(path: &Path, pricing: PricingTable) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new(pricing));
        }
        let contents = std::fs::read_to_string(path)?;
        let mut ledger: CostLedger = serde_json::from_str(&contents)?;
        ledger.pricing = pricing;
        debug!(path = %path.display(), entries = ledger.entries.len(), "Loaded cost ledger");
        Ok(ledger)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        debug!(path = %path.display(), entries = self.entries.len(), "Saved cost ledger");
        Ok(())
    }

    /// Add this ledger's entries to the one saved at `path`
    ///
    /// The in-memory ledger is left as it is, so its totals keep covering
    /// only what was recorded into it.
    pub fn append_to(&self, path: &Path) -> Result<()> {
        let mut persisted = Self::load(path, self.pricing.clone())?;
        persisted.entries.extend(self.entries.iter().cloned());
        persisted.save(path)
    }

    /// Append one invocation and return its cost
    pub fn record(
        &mut self,
        provider: &str,
        model: &str,
        operation: &str,
        usage: Usage,
        context: Option<String>,
    ) -> f64 {
        let cost = self.pricing.cost(model, usage.input_units, usage.output_units);
        info!(
            provider,
            model,
            operation,
            input_units = usage.input_units,
            output_units = usage.output_units,
            cost,
            "Recorded model usage"
        );
        self.entries.push(CostLedgerEntry {
            provider: provider.to_string(),
            model: model.to_string(),
            operation: operation.to_string(),
            input_units: usage.input_units,
            output_units: usage.output_units,
            cost,
            timestamp: Utc::now(),
            context,
        });
        cost
    }

    pub fn entries(&self) -> &[CostLedgerEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn grand_total(&self) -> f64 {
        self.entries.iter().map(|e| e.cost).sum()
    }

    pub fn provider_total(&self, provider: &str) -> f64 {
        self.entries
            .iter()
            .filter(|e| e.provider == provider)
            .map(|e| e.cost)
            .sum()
    }

    /// Current totals, grouped by provider, model and operation
    pub fn summary(&self) -> CostSummary {
        let mut summary = CostSummary {
            total: UsageTotals::default(),
            by_provider: BTreeMap::new(),
            by_model: BTreeMap::new(),
            by_operation: BTreeMap::new(),
            generated_at: Utc::now(),
        };

        for entry in &self.entries {
            summary.total.add(entry);
            summary.by_provider.entry(entry.provider.clone()).or_default().add(entry);
            summary.by_model.entry(entry.model.clone()).or_default().add(entry);
            summary.by_operation.entry(entry.operation.clone()).or_default().add(entry);
        }

        summary
    }

    /// `key=value` lines for CI step outputs
    pub fn output_lines(&self) -> Vec<String> {
        let total = self.summary().total;
        vec![
            format!("total_ai_cost={:.6}", total.cost),
            format!("total_ai_calls={}", total.calls),
            format!("total_input_tokens={}", total.input_units),
            format!("total_output_tokens={}", total.output_units),
        ]
    }

    /// Boxed text report of the current state
    pub fn render_report(&self) -> String {
        let summary = self.summary();
        let mut out = String::new();
        let rule = "─".repeat(78);

        let _ = writeln!(out, "┌{}┐", rule);
        let _ = writeln!(out, "│{:^78}│", "AI USAGE COST SUMMARY");
        let _ = writeln!(out, "└{}┘", rule);

        let _ = writeln!(out, "\nOVERALL");
        let _ = writeln!(out, "  Total cost           ${:.6}", summary.total.cost);
        let _ = writeln!(out, "  Total calls          {}", summary.total.calls);
        let _ = writeln!(out, "  Total input units    {}", summary.total.input_units);
        let _ = writeln!(out, "  Total output units   {}", summary.total.output_units);

        for (title, group) in [
            ("BY PROVIDER", &summary.by_provider),
            ("BY MODEL", &summary.by_model),
            ("BY OPERATION", &summary.by_operation),
        ] {
            if group.is_empty() {
                continue;
            }
            let _ = writeln!(out, "\n{}", title);
            let _ = writeln!(
                out,
                "  {:<28} {:>6} {:>12} {:>12} {:>12}",
                "name", "calls", "input", "output", "cost ($)"
            );
            for (name, totals) in group {
                let _ = writeln!(
                    out,
                    "  {:<28} {:>6} {:>12} {:>12} {:>12.6}",
                    truncate(name, 28),
                    totals.calls,
                    totals.input_units,
                    totals.output_units,
                    totals.cost
                );
            }
        }

        if !self.entries.is_empty() {
            let _ = writeln!(out, "\nCALLS");
            for (i, entry) in self.entries.iter().enumerate() {
                let _ = writeln!(
                    out,
                    "  {:>2}. {:<20} {:<28} {:>8} in {:>8} out  ${:.6}",
                    i + 1,
                    truncate(&entry.operation, 20),
                    truncate(&entry.model, 28),
                    entry.input_units,
                    entry.output_units,
                    entry.cost
                );
                if let Some(context) = &entry.context {
                    let _ = writeln!(out, "      context: {}", truncate(context, 60));
                }
            }
        }

        let _ = writeln!(
            out,
            "\nReport generated on {}",
            summary.generated_at.format("%Y-%m-%d %H:%M:%S")
        );
        out
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut t: String = s.chars().take(max.saturating_sub(3)).collect();
        t.push_str("...");
        t
    }
}
