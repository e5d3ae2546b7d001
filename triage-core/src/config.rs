//! Operator configuration for Triage
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables (TRIAGE_*)
//! 3. Config file (~/.config/triage/config.toml)
//! 4. Default values
//!
//! The review thresholds, markers and labels set here form the operator layer
//! of the macro resolution; unset fields fall through to the project defaults
//! in the store and then to the built-in constants.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cost::PricingTable;
use crate::diff::ExcludedDiffPolicy;
use crate::macros::{split_list, PartialMacros};
use crate::retry::{CallTimeouts, RetryPolicy};
use crate::router::{ModelCatalog, ModelSpec};
use crate::{Error, Result};

/// Paths excluded from magnitude when nothing else is configured
pub const DEFAULT_EXCLUDES: &[&str] = &[".github/**"];

/// Review behavior
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ReviewConfig {
    /// Project key in the store; the target repository is used when unset
    pub project: Option<String>,

    /// Path globs left out of the magnitude and the reviewed diff
    pub exclude: Vec<String>,

    /// Treatment of diffs whose every file is excluded
    pub excluded_diff_policy: ExcludedDiffPolicy,

    /// Operator-level overrides of the review macros
    pub macros: PartialMacros,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            project: None,
            exclude: DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect(),
            excluded_diff_policy: ExcludedDiffPolicy::default(),
            macros: PartialMacros::default(),
        }
    }
}

/// Local persistence
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database holding the project store
    pub database_path: Option<PathBuf>,

    /// JSON file accumulating the cost ledger
    pub ledger_path: Option<PathBuf>,
}

impl StorageConfig {
    pub fn ledger_path(&self) -> PathBuf {
        self.ledger_path
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("triage_costs.json"))
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub review: ReviewConfig,
    pub models: ModelCatalog,
    pub pricing: PricingTable,
    pub retry: RetryPolicy,
    pub timeouts: CallTimeouts,
    pub storage: StorageConfig,
}

/// Values given on the command line; `None`/empty means "not given"
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperatorOverrides {
    pub project: Option<String>,
    pub magnitude_threshold: Option<u64>,
    pub changes_threshold: Option<u64>,
    pub custom_instruction: Option<String>,
    pub important_markers: Vec<String>,
    pub important_labels: Vec<String>,
    pub exclude: Vec<String>,
    pub skip_excluded: bool,
    pub database_path: Option<PathBuf>,
    pub ledger_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from the default config file location
    ///
    /// Returns default config if file doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();

        if let Some(path) = config_path {
            if path.exists() {
                return Self::load_from_file(&path);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(Error::Io)?;
        toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// Get the default config file path
    ///
    /// Returns `~/.config/triage/config.toml` on Unix
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("triage").join("config.toml"))
    }

    /// Apply environment variable overrides
    ///
    /// Supported variables:
    /// - TRIAGE_PROJECT: Project key in the store
    /// - TRIAGE_MAGNITUDE_THRESHOLD: Lines above which the deep-review model is used
    /// - TRIAGE_CHANGES_THRESHOLD: Important changes between architecture summaries
    /// - TRIAGE_CUSTOM_INSTRUCTION: Extra reviewer instructions
    /// - TRIAGE_IMPORTANT_MARKERS: Comma-separated title markers
    /// - TRIAGE_IMPORTANT_LABELS: Comma-separated label names
    /// - TRIAGE_EXCLUDE: Comma-separated path globs
    /// - TRIAGE_SKIP_EXCLUDED: Skip review when every file is excluded
    /// - TRIAGE_DEEP_REVIEW_MODEL / TRIAGE_LIGHTWEIGHT_MODEL: `provider/model`
    /// - TRIAGE_DB_PATH, TRIAGE_LEDGER_PATH: Storage locations
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from(mut self, var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let number = |key: &str| -> Result<Option<u64>> {
            match var(key) {
                Some(v) => v
                    .trim()
                    .parse()
                    .map(Some)
                    .map_err(|_| Error::Config(format!("{} must be a number, got '{}'", key, v))),
                None => Ok(None),
            }
        };

        if let Some(project) = var("TRIAGE_PROJECT") {
            self.review.project = Some(project);
        }
        if let Some(v) = number("TRIAGE_MAGNITUDE_THRESHOLD")? {
            self.review.macros.magnitude_threshold = Some(v);
        }
        if let Some(v) = number("TRIAGE_CHANGES_THRESHOLD")? {
            self.review.macros.changes_threshold = Some(v);
        }
        if let Some(v) = var("TRIAGE_CUSTOM_INSTRUCTION").filter(|v| !v.trim().is_empty()) {
            self.review.macros.custom_instruction = Some(v);
        }
        if let Some(v) = var("TRIAGE_IMPORTANT_MARKERS") {
            self.review.macros.important_markers = Some(split_list(&v));
        }
        if let Some(v) = var("TRIAGE_IMPORTANT_LABELS") {
            self.review.macros.important_labels = Some(split_list(&v));
        }
        if let Some(v) = var("TRIAGE_EXCLUDE") {
            self.review.exclude = split_list(&v);
        }
        if let Some(v) = var("TRIAGE_SKIP_EXCLUDED") {
            if matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes") {
                self.review.excluded_diff_policy = ExcludedDiffPolicy::SkipReview;
            }
        }
        if let Some(v) = var("TRIAGE_DEEP_REVIEW_MODEL") {
            self.models.deep_review = parse_model_spec(&v)?;
        }
        if let Some(v) = var("TRIAGE_LIGHTWEIGHT_MODEL") {
            self.models.lightweight = parse_model_spec(&v)?;
        }
        if let Some(v) = var("TRIAGE_DB_PATH") {
            self.storage.database_path = Some(PathBuf::from(v));
        }
        if let Some(v) = var("TRIAGE_LEDGER_PATH") {
            self.storage.ledger_path = Some(PathBuf::from(v));
        }

        Ok(self)
    }

    /// Apply CLI flag overrides
    pub fn with_cli_overrides(mut self, cli: OperatorOverrides) -> Self {
        if let Some(project) = cli.project {
            self.review.project = Some(project);
        }
        if let Some(v) = cli.magnitude_threshold {
            self.review.macros.magnitude_threshold = Some(v);
        }
        if let Some(v) = cli.changes_threshold {
            self.review.macros.changes_threshold = Some(v);
        }
        if let Some(v) = cli.custom_instruction.filter(|v| !v.trim().is_empty()) {
            self.review.macros.custom_instruction = Some(v);
        }
        if !cli.important_markers.is_empty() {
            self.review.macros.important_markers = Some(cli.important_markers);
        }
        if !cli.important_labels.is_empty() {
            self.review.macros.important_labels = Some(cli.important_labels);
        }
        if !cli.exclude.is_empty() {
            self.review.exclude = cli.exclude;
        }
        if cli.skip_excluded {
            self.review.excluded_diff_policy = ExcludedDiffPolicy::SkipReview;
        }
        if let Some(path) = cli.database_path {
            self.storage.database_path = Some(path);
        }
        if let Some(path) = cli.ledger_path {
            self.storage.ledger_path = Some(path);
        }
        self
    }

    /// Load configuration with all overrides applied
    ///
    /// Priority: CLI > env > config file > defaults
    pub fn load_with_overrides(config_path: Option<&Path>, cli: OperatorOverrides) -> Result<Self> {
        let base = match config_path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::load()?,
        };
        Ok(base.with_env_overrides()?.with_cli_overrides(cli))
    }
}

/// Parse `provider/model`
pub fn parse_model_spec(value: &str) -> Result<ModelSpec> {
    match value.trim().split_once('/') {
        Some((provider, model)) if !provider.is_empty() && !model.is_empty() => {
            Ok(ModelSpec::new(provider, model))
        }
        _ => Err(Error::Config(format!(
            "Model must be given as provider/model, got '{}'",
            value
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::DEFAULT_DEEP_REVIEW_MODEL;
    use std::collections::HashMap;
    use std::time::Duration;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.review.exclude, vec![".github/**".to_string()]);
        assert!(config.review.macros.is_empty());
        assert_eq!(config.models.deep_review.model, DEFAULT_DEEP_REVIEW_MODEL);
        assert_eq!(config.retry.max_attempts, 2);
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
[review]
project = "widgets"
exclude = ["docs/", "*.lock"]
excluded_diff_policy = "skip_review"

[review.macros]
magnitude_threshold = 400
important_labels = ["arch"]

[models.deep_review]
provider = "anthropic"
model = "claude-opus-4-20250514"

[retry]
max_attempts = 3

[timeouts]
model = "2m"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.review.project.as_deref(), Some("widgets"));
        assert_eq!(config.review.exclude.len(), 2);
        assert_eq!(config.review.excluded_diff_policy, ExcludedDiffPolicy::SkipReview);
        assert_eq!(config.review.macros.magnitude_threshold, Some(400));
        assert_eq!(config.models.deep_review.model, "claude-opus-4-20250514");
        assert_eq!(config.models.lightweight, ModelCatalog::default().lightweight);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.timeouts.model, Duration::from_secs(120));
        assert_eq!(config.timeouts.host, Duration::from_secs(60));
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::default()
            .with_overrides_from(env(&[
                ("TRIAGE_MAGNITUDE_THRESHOLD", "120"),
                ("TRIAGE_IMPORTANT_MARKERS", "#ARCH, #BIG"),
                ("TRIAGE_SKIP_EXCLUDED", "true"),
                ("TRIAGE_LIGHTWEIGHT_MODEL", "openai/gpt-4o-mini"),
            ]))
            .unwrap();

        assert_eq!(config.review.macros.magnitude_threshold, Some(120));
        assert_eq!(
            config.review.macros.important_markers,
            Some(vec!["#ARCH".to_string(), "#BIG".to_string()])
        );
        assert_eq!(config.review.excluded_diff_policy, ExcludedDiffPolicy::SkipReview);
        assert_eq!(config.models.lightweight.model, "gpt-4o-mini");
    }

    #[test]
    fn test_bad_env_number_is_an_error() {
        let result =
            Config::default().with_overrides_from(env(&[("TRIAGE_CHANGES_THRESHOLD", "many")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_beats_env() {
        let config = Config::default()
            .with_overrides_from(env(&[("TRIAGE_MAGNITUDE_THRESHOLD", "120")]))
            .unwrap()
            .with_cli_overrides(OperatorOverrides {
                magnitude_threshold: Some(80),
                important_labels: vec!["critical".into()],
                ..Default::default()
            });

        assert_eq!(config.review.macros.magnitude_threshold, Some(80));
        assert_eq!(config.review.macros.important_labels, Some(vec!["critical".to_string()]));
        assert!(config.review.macros.important_markers.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[storage]\nledger_path = \"/var/tmp/costs.json\"\n").unwrap();

        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.storage.ledger_path(), PathBuf::from("/var/tmp/costs.json"));

        std::fs::write(&path, "[review\n").unwrap();
        assert!(Config::load_from_file(&path).is_err());
    }

    #[test]
    fn test_parse_model_spec() {
        let spec = parse_model_spec("anthropic/claude-x").unwrap();
        assert_eq!(spec.provider, "anthropic");
        assert_eq!(spec.model, "claude-x");
        assert!(parse_model_spec("claude-x").is_err());
        assert!(parse_model_spec("/claude-x").is_err());
    }
}
