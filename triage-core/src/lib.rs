//! Triage Core - review routing and architecture change tracking
//!
//! This crate decides how an incoming change is reviewed (which model, with
//! what context) and whether it counts toward the project's next
//! architecture summary. Hosts, stores and model providers are reached only
//! through the traits in [`host`], [`store`] and [`provider`].

pub mod change;
pub mod classify;
pub mod config;
pub mod cost;
pub mod diff;
pub mod error;
pub mod git;
pub mod host;
pub mod macros;
pub mod pipeline;
pub mod provider;
pub mod retry;
pub mod router;
pub mod store;
pub mod summary;
pub mod tracker;

pub use change::ChangeContext;
pub use classify::{classify, ClassificationResult, Signal};
pub use config::{Config, OperatorOverrides};
pub use cost::{CostLedger, CostLedgerEntry, PricingTable, Usage};
pub use diff::{analyze, AnalyzedDiff, DiffStats, ExcludedDiffPolicy, PathFilter};
pub use error::{Error, ExternalError, Result};
pub use host::{ReviewComment, VersionControl};
pub use macros::{resolve, MacroConfig, PartialMacros};
pub use pipeline::{plan_review, PipelineSettings, ReviewPipeline, RunError, RunReport};
pub use provider::{ModelProvider, ModelRequest, ModelResponse, ProviderRegistry};
pub use retry::{Classify, ErrorClass, RetryError, RetryExecutor, RetryPolicy};
pub use router::{route, ModelCatalog, ModelDecision, ModelSpec, ModelTier, Rationale};
pub use store::{
    ArchitectureChangeRecord, ArchitectureStore, ArchitectureSummary, IncrementOutcome, MemoryStore,
};
pub use tracker::ArchitectureTracker;
