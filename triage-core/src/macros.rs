//! Layered review configuration ("macros")
//!
//! A [`MacroConfig`] is resolved per run from independent layers, each field
//! on its own:
//!
//! 1. per-change values parsed from the change description
//! 2. operator overrides (CLI flags, `TRIAGE_*` environment, config file)
//! 3. project-wide defaults fetched from the store (may be unavailable)
//! 4. built-in constants
//!
//! Important markers and labels are never taken from the per-change layer, so
//! a change author cannot silence importance detection for their own change.
//! The custom instruction is taken only from the per-change layer.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Built-in magnitude threshold, in changed lines
pub const DEFAULT_MAGNITUDE_THRESHOLD: u64 = 200;

/// Built-in number of important changes between architecture summaries
pub const DEFAULT_CHANGES_THRESHOLD: u64 = 5;

/// Built-in title markers
pub const DEFAULT_IMPORTANT_MARKERS: &[&str] = &["#IMPORTANT-CHANGE", "#IMPORTANT-CHANGES"];

/// Built-in label names
pub const DEFAULT_IMPORTANT_LABELS: &[&str] = &["important change", "important changes"];

/// Store keys for project-wide defaults
pub const KEY_MAGNITUDE_THRESHOLD: &str = "LINE_THRESHOLD";
pub const KEY_CHANGES_THRESHOLD: &str = "CHANGES_THRESHOLD";
pub const KEY_IMPORTANT_MARKERS: &str = "IMPORTANT_CHANGE_MARKERS";
pub const KEY_IMPORTANT_LABELS: &str = "IMPORTANT_CHANGE_LABELS";

/// Fully resolved configuration for one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacroConfig {
    /// Changes larger than this many lines are routed to the deep-review model
    pub magnitude_threshold: u64,
    /// Important changes to accumulate before summarizing the architecture
    pub changes_threshold: u64,
    /// Extra reviewer instructions supplied with the change
    pub custom_instruction: Option<String>,
    /// Title substrings that mark a change as important
    pub important_markers: Vec<String>,
    /// Label names that mark a change as important
    pub important_labels: Vec<String>,
}

impl Default for MacroConfig {
    fn default() -> Self {
        Self {
            magnitude_threshold: DEFAULT_MAGNITUDE_THRESHOLD,
            changes_threshold: DEFAULT_CHANGES_THRESHOLD,
            custom_instruction: None,
            important_markers: DEFAULT_IMPORTANT_MARKERS.iter().map(|s| s.to_string()).collect(),
            important_labels: DEFAULT_IMPORTANT_LABELS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// One configuration layer; `None` means "not provided here"
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartialMacros {
    pub magnitude_threshold: Option<u64>,
    pub changes_threshold: Option<u64>,
    pub custom_instruction: Option<String>,
    pub important_markers: Option<Vec<String>>,
    pub important_labels: Option<Vec<String>>,
}

impl PartialMacros {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Parse per-change overrides from a change description
    ///
    /// Recognizes the templated fields of the pull request template, plain
    /// `KEY=value` lines, and the fenced "Additional prompt instructions"
    /// block. Marker and label keys are deliberately not parsed here.
    pub fn from_description(body: &str) -> Self {
        let mut macros = Self::default();
        if body.trim().is_empty() {
            return macros;
        }

        macros.magnitude_threshold = templated_number(&MAGNITUDE_FIELD, body);
        macros.changes_threshold = templated_number(&CHANGES_FIELD, body);

        for caps in KEY_VALUE_LINE.captures_iter(body) {
            let value: u64 = match caps[2].parse() {
                Ok(v) => v,
                Err(_) => continue,
            };
            match caps[1].to_ascii_uppercase().as_str() {
                "MAGNITUDE_THRESHOLD" | "LINE_THRESHOLD" => {
                    macros.magnitude_threshold.get_or_insert(value);
                }
                "CHANGES_THRESHOLD" => {
                    macros.changes_threshold.get_or_insert(value);
                }
                _ => {}
            }
        }

        macros.custom_instruction = CUSTOM_INSTRUCTION
            .captures(body)
            .and_then(|caps| clean_instruction(&caps[1]));

        debug!(?macros, "Parsed per-change macros");
        macros
    }

    /// Parse project-wide defaults stored as string key/value pairs
    ///
    /// Lists are comma separated. Unknown keys are ignored and unparsable
    /// values are logged and skipped so one bad entry does not discard the rest.
    pub fn from_key_values<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut macros = Self::default();

        for (key, value) in pairs {
            match key.trim().to_ascii_uppercase().as_str() {
                KEY_MAGNITUDE_THRESHOLD | "MAGNITUDE_THRESHOLD" => match value.trim().parse() {
                    Ok(v) => macros.magnitude_threshold = Some(v),
                    Err(_) => warn!(key, value, "Ignoring non-numeric project default"),
                },
                KEY_CHANGES_THRESHOLD => match value.trim().parse() {
                    Ok(v) => macros.changes_threshold = Some(v),
                    Err(_) => warn!(key, value, "Ignoring non-numeric project default"),
                },
                KEY_IMPORTANT_MARKERS => macros.important_markers = Some(split_list(value)),
                KEY_IMPORTANT_LABELS => macros.important_labels = Some(split_list(value)),
                _ => debug!(key, "Ignoring unknown project default"),
            }
        }

        macros
    }

    /// Render as the string key/value pairs understood by [`Self::from_key_values`]
    pub fn to_key_values(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        if let Some(v) = self.magnitude_threshold {
            map.insert(KEY_MAGNITUDE_THRESHOLD.to_string(), v.to_string());
        }
        if let Some(v) = self.changes_threshold {
            map.insert(KEY_CHANGES_THRESHOLD.to_string(), v.to_string());
        }
        if let Some(v) = &self.important_markers {
            map.insert(KEY_IMPORTANT_MARKERS.to_string(), v.join(","));
        }
        if let Some(v) = &self.important_labels {
            map.insert(KEY_IMPORTANT_LABELS.to_string(), v.join(","));
        }
        map
    }
}

/// Resolve a [`MacroConfig`] from its layers
///
/// `remote` is `None` when the project defaults could not be fetched; the
/// affected fields then fall through to the built-in constants.
pub fn resolve(
    per_change: &PartialMacros,
    operator: &PartialMacros,
    remote: Option<&PartialMacros>,
) -> MacroConfig {
    let builtin = MacroConfig::default();
    let empty = PartialMacros::default();
    let remote = remote.unwrap_or(&empty);

    MacroConfig {
        magnitude_threshold: per_change
            .magnitude_threshold
            .or(operator.magnitude_threshold)
            .or(remote.magnitude_threshold)
            .unwrap_or(builtin.magnitude_threshold),
        changes_threshold: per_change
            .changes_threshold
            .or(operator.changes_threshold)
            .or(remote.changes_threshold)
            .unwrap_or(builtin.changes_threshold),
        // The operator value is the calling workflow forwarding the change's
        // own instruction, so it ranks with the per-change layer
        custom_instruction: per_change
            .custom_instruction
            .clone()
            .or_else(|| operator.custom_instruction.clone()),
        important_markers: operator
            .important_markers
            .clone()
            .or_else(|| remote.important_markers.clone())
            .unwrap_or(builtin.important_markers),
        important_labels: operator
            .important_labels
            .clone()
            .or_else(|| remote.important_labels.clone())
            .unwrap_or(builtin.important_labels),
    }
}

static MAGNITUDE_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\*\*\s*use\s+(?:deep[\s-]+review|claude)\s+when\s+pr\s+has\s+more\s+than:?\s*\*\*\s*`([^`]+)`",
    )
    .expect("valid regex")
});

static CHANGES_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\*\*\s*update\s+architecture\s+summary\s+when:?\s*\*\*\s*`([^`]+)`")
        .expect("valid regex")
});

static KEY_VALUE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*(magnitude_threshold|line_threshold|changes_threshold)\s*=\s*(\d+)\s*$")
        .expect("valid regex")
});

static CUSTOM_INSTRUCTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)\*\*\s*additional\s+prompt\s+instructions:?\s*\*\*\s*```\s*(.*?)\s*```")
        .expect("valid regex")
});

static HTML_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("valid regex"));

static FIRST_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("valid regex"));

fn templated_number(field: &Regex, body: &str) -> Option<u64> {
    let caps = field.captures(body)?;
    FIRST_NUMBER.find(&caps[1])?.as_str().parse().ok()
}

fn clean_instruction(raw: &str) -> Option<String> {
    let without_comments = HTML_COMMENT.replace_all(raw, "");
    let cleaned = without_comments
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    (!cleaned.is_empty()).then_some(cleaned)
}

/// Split a comma-separated list, dropping blanks
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE_BODY: &str = r#"
## Review settings

**Use deep review when PR has more than:** `350 lines`
**Update architecture summary when:** `3 or more important changes`

**Additional prompt instructions:**
```
<!-- Anything here is passed to the reviewer -->
Focus on error handling.

Ignore formatting.
```
"#;

    #[test]
    fn test_parse_template_fields() {
        let macros = PartialMacros::from_description(TEMPLATE_BODY);
        assert_eq!(macros.magnitude_threshold, Some(350));
        assert_eq!(macros.changes_threshold, Some(3));
        assert_eq!(
            macros.custom_instruction.as_deref(),
            Some("Focus on error handling.\nIgnore formatting.")
        );
        assert!(macros.important_markers.is_none());
    }

    #[test]
    fn test_parse_legacy_wording() {
        let body = "** Use Claude when PR has more than:** `120`";
        let macros = PartialMacros::from_description(body);
        assert_eq!(macros.magnitude_threshold, Some(120));
    }

    #[test]
    fn test_parse_key_value_lines() {
        let body = "Some text\nline_threshold = 90\nCHANGES_THRESHOLD=2\nIMPORTANT_CHANGE_MARKERS=#nope\n";
        let macros = PartialMacros::from_description(body);
        assert_eq!(macros.magnitude_threshold, Some(90));
        assert_eq!(macros.changes_threshold, Some(2));
        assert!(macros.important_markers.is_none());
    }

    #[test]
    fn test_explicit_default_value_is_kept() {
        let body = "MAGNITUDE_THRESHOLD=200";
        let macros = PartialMacros::from_description(body);
        assert_eq!(macros.magnitude_threshold, Some(200));
    }

    #[test]
    fn test_comment_only_instruction_is_absent() {
        let body = "**Additional prompt instructions:**\n```\n<!-- add notes here -->\n```";
        let macros = PartialMacros::from_description(body);
        assert!(macros.custom_instruction.is_none());
    }

    #[test]
    fn test_empty_description() {
        assert!(PartialMacros::from_description("").is_empty());
        assert!(PartialMacros::from_description("Just a fix.").is_empty());
    }

    #[test]
    fn test_per_change_wins_for_thresholds() {
        let per_change = PartialMacros {
            magnitude_threshold: Some(10),
            ..Default::default()
        };
        let operator = PartialMacros {
            magnitude_threshold: Some(20),
            changes_threshold: Some(7),
            ..Default::default()
        };
        let remote = PartialMacros {
            magnitude_threshold: Some(30),
            changes_threshold: Some(8),
            ..Default::default()
        };

        let resolved = resolve(&per_change, &operator, Some(&remote));
        assert_eq!(resolved.magnitude_threshold, 10);
        assert_eq!(resolved.changes_threshold, 7);
    }

    #[test]
    fn test_per_change_markers_ignored() {
        let per_change = PartialMacros {
            important_markers: Some(vec![]),
            important_labels: Some(vec!["nothing".into()]),
            ..Default::default()
        };
        let remote = PartialMacros {
            important_markers: Some(vec!["#ARCH".into()]),
            ..Default::default()
        };

        let resolved = resolve(&per_change, &PartialMacros::default(), Some(&remote));
        assert_eq!(resolved.important_markers, vec!["#ARCH".to_string()]);
        assert_eq!(resolved.important_labels, MacroConfig::default().important_labels);
    }

    #[test]
    fn test_custom_instruction_only_from_change() {
        let remote = PartialMacros {
            custom_instruction: Some("from the store".into()),
            ..Default::default()
        };
        let resolved = resolve(&PartialMacros::default(), &PartialMacros::default(), Some(&remote));
        assert!(resolved.custom_instruction.is_none());

        let per_change = PartialMacros {
            custom_instruction: Some("from the change".into()),
            ..Default::default()
        };
        let operator = PartialMacros {
            custom_instruction: Some("forwarded".into()),
            ..Default::default()
        };
        let resolved = resolve(&per_change, &operator, Some(&remote));
        assert_eq!(resolved.custom_instruction.as_deref(), Some("from the change"));

        let resolved = resolve(&PartialMacros::default(), &operator, None);
        assert_eq!(resolved.custom_instruction.as_deref(), Some("forwarded"));
    }

    #[test]
    fn test_missing_remote_falls_back_to_builtin() {
        let resolved = resolve(&PartialMacros::default(), &PartialMacros::default(), None);
        assert_eq!(resolved, MacroConfig::default());
    }

    #[test]
    fn test_key_values_round_trip_through_store_format() {
        let stored = [
            ("LINE_THRESHOLD", "250"),
            ("CHANGES_THRESHOLD", "oops"),
            ("IMPORTANT_CHANGE_MARKERS", "#ARCH, #BIG ,"),
            ("SOMETHING_ELSE", "x"),
        ];
        let macros = PartialMacros::from_key_values(stored);
        assert_eq!(macros.magnitude_threshold, Some(250));
        assert_eq!(macros.changes_threshold, None);
        assert_eq!(
            macros.important_markers,
            Some(vec!["#ARCH".to_string(), "#BIG".to_string()])
        );

        let rendered = macros.to_key_values();
        assert_eq!(rendered.get("IMPORTANT_CHANGE_MARKERS").unwrap(), "#ARCH,#BIG");
        assert!(!rendered.contains_key("CHANGES_THRESHOLD"));
    }
}
