//! Change magnitude from unified diffs
//!
//! Magnitude is the number of added and removed lines, excluding file and
//! hunk headers, in files that do not match any exclusion glob.

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

/// Set of path-exclusion globs
#[derive(Debug, Clone)]
pub struct PathFilter {
    patterns: Vec<String>,
    set: GlobSet,
}

impl PathFilter {
    /// Build a filter from glob patterns
    ///
    /// A pattern ending in `/` excludes everything below that directory.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        let mut normalized = Vec::with_capacity(patterns.len());

        for pattern in patterns {
            let pattern = pattern.as_ref().trim();
            if pattern.is_empty() {
                continue;
            }
            let pattern = if pattern.ends_with('/') {
                format!("{}**", pattern)
            } else {
                pattern.to_string()
            };
            let glob = Glob::new(&pattern).map_err(|e| {
                Error::Validation(format!("Invalid exclusion glob '{}': {}", pattern, e))
            })?;
            builder.add(glob);
            normalized.push(pattern);
        }

        let set = builder
            .build()
            .map_err(|e| Error::Validation(format!("Invalid exclusion globs: {}", e)))?;

        Ok(Self {
            patterns: normalized,
            set,
        })
    }

    /// A filter that excludes nothing
    pub fn none() -> Self {
        Self {
            patterns: Vec::new(),
            set: GlobSet::empty(),
        }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn is_excluded(&self, path: &str) -> bool {
        self.set.is_match(path)
    }
}

/// Counts produced by [`analyze`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStats {
    /// Added plus removed lines in counted files
    pub magnitude: u64,
    pub additions: u64,
    pub deletions: u64,
    /// Files that contributed to the magnitude
    pub files_counted: u64,
    /// Files skipped because they matched an exclusion glob
    pub files_excluded: u64,
}

/// Result of analyzing a diff
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalyzedDiff {
    pub stats: DiffStats,
    /// The diff with excluded file sections removed
    pub filtered: String,
}

impl AnalyzedDiff {
    pub fn magnitude(&self) -> u64 {
        self.stats.magnitude
    }

    /// True when no file survived the exclusion filter (including an empty diff)
    pub fn is_fully_excluded(&self) -> bool {
        self.stats.files_counted == 0
    }
}

/// What to do with a diff in which every touched path is excluded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExcludedDiffPolicy {
    /// Review it as a routine change of magnitude 0
    #[default]
    ZeroMagnitudeReview,
    /// End the run without a review
    SkipReview,
}

/// Parser position inside the diff
enum Section {
    /// Before the first file header
    Preamble,
    /// Inside a file's header lines (before its first hunk)
    FileHeader,
    /// Inside a hunk with the given remaining old/new line counts
    Hunk { old: u64, new: u64 },
}

/// Compute the magnitude of `diff`, ignoring files matched by `filter`
pub fn analyze(diff: &str, filter: &PathFilter) -> AnalyzedDiff {
    let mut stats = DiffStats::default();
    let mut filtered = String::new();

    let mut section = Section::Preamble;
    let mut excluded = false;
    // Plain unified diffs have no `diff --git` line; the `---`/`+++` pair opens
    // the file, so the `---` line is held back until the path is known
    let mut pending_old: Option<(String, &str)> = None;

    for line in diff.lines() {
        if let Some(rest) = line.strip_prefix("diff --git ") {
            let path = git_header_path(rest);
            excluded = begin_file(&path, filter, &mut stats);
            section = Section::FileHeader;
            pending_old = None;
            push_line(&mut filtered, line, excluded);
            continue;
        }

        if let Section::Hunk { old, new } = section {
            if old > 0 || new > 0 {
                let (old, new) = match line.as_bytes().first() {
                    Some(b'+') => {
                        if !excluded {
                            stats.additions += 1;
                        }
                        (old, new.saturating_sub(1))
                    }
                    Some(b'-') => {
                        if !excluded {
                            stats.deletions += 1;
                        }
                        (old.saturating_sub(1), new)
                    }
                    Some(b'\\') => (old, new),
                    _ => (old.saturating_sub(1), new.saturating_sub(1)),
                };
                section = Section::Hunk { old, new };
                push_line(&mut filtered, line, excluded);
                continue;
            }
        }

        if let Some(path) = line.strip_prefix("--- ") {
            if !matches!(section, Section::FileHeader) {
                pending_old = Some((strip_side_prefix(path), line));
                continue;
            }
        }

        if let Some(path) = line.strip_prefix("+++ ") {
            if let Some((old_path, old_line)) = pending_old.take() {
                let new_path = strip_side_prefix(path);
                let path = if new_path == "/dev/null" { old_path } else { new_path };
                excluded = begin_file(&path, filter, &mut stats);
                section = Section::FileHeader;
                push_line(&mut filtered, old_line, excluded);
                push_line(&mut filtered, line, excluded);
                continue;
            }
        }

        if let Some((_, old_line)) = pending_old.take() {
            push_line(&mut filtered, old_line, excluded);
        }

        if line.starts_with("@@") && !matches!(section, Section::Preamble) {
            section = match parse_hunk_header(line) {
                Some((old, new)) => Section::Hunk { old, new },
                None => Section::Hunk {
                    old: u64::MAX,
                    new: u64::MAX,
                },
            };
        }

        if !matches!(section, Section::Preamble) {
            push_line(&mut filtered, line, excluded);
        }
    }

    stats.magnitude = stats.additions + stats.deletions;
    debug!(
        magnitude = stats.magnitude,
        files_counted = stats.files_counted,
        files_excluded = stats.files_excluded,
        "Analyzed diff"
    );

    AnalyzedDiff { stats, filtered }
}

fn begin_file(path: &str, filter: &PathFilter, stats: &mut DiffStats) -> bool {
    let excluded = filter.is_excluded(path);
    if excluded {
        stats.files_excluded += 1;
    } else {
        stats.files_counted += 1;
    }
    excluded
}

fn push_line(out: &mut String, line: &str, excluded: bool) {
    if !excluded {
        out.push_str(line);
        out.push('\n');
    }
}

/// Extract the post-image path from the remainder of a `diff --git` line
fn git_header_path(rest: &str) -> String {
    if let Some(idx) = rest.rfind(" b/") {
        return rest[idx + 3..].trim_matches('"').to_string();
    }
    rest.split_whitespace()
        .last()
        .map(strip_side_prefix)
        .unwrap_or_default()
}

fn strip_side_prefix(path: &str) -> String {
    let path = path.split('\t').next().unwrap_or(path).trim().trim_matches('"');
    path.strip_prefix("a/")
        .or_else(|| path.strip_prefix("b/"))
        .unwrap_or(path)
        .to_string()
}

/// Parse `@@ -l[,s] +l[,s] @@` into (old_count, new_count)
fn parse_hunk_header(line: &str) -> Option<(u64, u64)> {
    let mut parts = line.trim_start_matches('@').split_whitespace();
    let old = parts.next()?.strip_prefix('-')?;
    let new = parts.next()?.strip_prefix('+')?;
    Some((range_len(old)?, range_len(new)?))
}

fn range_len(range: &str) -> Option<u64> {
    match range.split_once(',') {
        Some((_, len)) => len.parse().ok(),
        None => range.parse::<u64>().ok().map(|_| 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_FILES: &str = "\
diff --git a/src/lib.rs b/src/lib.rs
index 1111111..2222222 100644
--- a/src/lib.rs
+++ b/src/lib.rs
@@ -1,3 +1,4 @@
 fn main() {
-    old();
+    new();
+    more();
 }
diff --git a/.github/workflows/ci.yml b/.github/workflows/ci.yml
index 3333333..4444444 100644
--- a/.github/workflows/ci.yml
+++ b/.github/workflows/ci.yml
@@ -1 +1 @@
-on: push
+on: pull_request
";

    fn exclude_github() -> PathFilter {
        PathFilter::new(&[".github/**"]).unwrap()
    }

    #[test]
    fn test_empty_diff_has_zero_magnitude() {
        let analyzed = analyze("", &PathFilter::none());
        assert_eq!(analyzed.magnitude(), 0);
        assert!(analyzed.is_fully_excluded());
        assert!(analyzed.filtered.is_empty());
    }

    #[test]
    fn test_counts_only_body_lines() {
        let diff = "\
--- a/notes.txt
+++ b/notes.txt
@@ -1,2 +1,3 @@
+one
+two
+three
-four
-five
";
        let analyzed = analyze(diff, &PathFilter::none());
        assert_eq!(analyzed.magnitude(), 5);
        assert_eq!(analyzed.stats.additions, 3);
        assert_eq!(analyzed.stats.deletions, 2);
        assert_eq!(analyzed.stats.files_counted, 1);
    }

    #[test]
    fn test_exclusions_drop_files() {
        let analyzed = analyze(TWO_FILES, &exclude_github());
        assert_eq!(analyzed.magnitude(), 3);
        assert_eq!(analyzed.stats.files_counted, 1);
        assert_eq!(analyzed.stats.files_excluded, 1);
        assert!(analyzed.filtered.contains("src/lib.rs"));
        assert!(!analyzed.filtered.contains("ci.yml"));
    }

    #[test]
    fn test_without_exclusions_counts_everything() {
        let analyzed = analyze(TWO_FILES, &PathFilter::none());
        assert_eq!(analyzed.magnitude(), 5);
        assert_eq!(analyzed.stats.files_counted, 2);
    }

    #[test]
    fn test_only_excluded_paths_is_zero() {
        let diff = "\
diff --git a/.github/triage.toml b/.github/triage.toml
--- a/.github/triage.toml
+++ b/.github/triage.toml
@@ -1 +1 @@
-threshold = 1
+threshold = 2
";
        let analyzed = analyze(diff, &exclude_github());
        assert_eq!(analyzed.magnitude(), 0);
        assert!(analyzed.is_fully_excluded());
        assert_eq!(analyzed.stats.files_excluded, 1);
    }

    #[test]
    fn test_removed_line_that_looks_like_header() {
        // A removed line whose content starts with "-- " renders as "--- "
        let diff = "\
diff --git a/doc.md b/doc.md
--- a/doc.md
+++ b/doc.md
@@ -1,2 +1,1 @@
--- separator
 text
";
        let analyzed = analyze(diff, &PathFilter::none());
        assert_eq!(analyzed.magnitude(), 1);
        assert_eq!(analyzed.stats.deletions, 1);
    }

    #[test]
    fn test_new_file_from_dev_null() {
        let diff = "\
diff --git a/docs/new.md b/docs/new.md
new file mode 100644
--- /dev/null
+++ b/docs/new.md
@@ -0,0 +1,2 @@
+hello
+world
";
        let analyzed = analyze(diff, &PathFilter::new(&["docs/"]).unwrap());
        assert_eq!(analyzed.magnitude(), 0);
        assert_eq!(analyzed.stats.files_excluded, 1);
    }

    #[test]
    fn test_invalid_glob_rejected() {
        assert!(PathFilter::new(&["src/[unclosed"]).is_err());
    }

    #[test]
    fn test_hunk_header_parsing() {
        assert_eq!(parse_hunk_header("@@ -1,4 +1,5 @@ fn main"), Some((4, 5)));
        assert_eq!(parse_hunk_header("@@ -3 +3 @@"), Some((1, 1)));
        assert_eq!(parse_hunk_header("@@ -0,0 +1,2 @@"), Some((0, 2)));
        assert_eq!(parse_hunk_header("@@ garbage @@"), None);
    }
}
