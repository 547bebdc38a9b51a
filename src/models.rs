//! Core data types for the SUSFS patcher.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Where generated content goes relative to the matched anchor span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertMode {
    InsertBefore,
    InsertAfter,
    ReplaceSpan,
}

impl fmt::Display for InsertMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InsertMode::InsertBefore => write!(f, "insert-before"),
            InsertMode::InsertAfter => write!(f, "insert-after"),
            InsertMode::ReplaceSpan => write!(f, "replace-span"),
        }
    }
}

/// Verification check severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    MustPass,
    WarnOnly,
}

/// What happened to a single patch operation during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationOutcome {
    Applied,
    SkippedIdempotent,
    FailedNoAnchor,
    FailedAmbiguous,
    FailedMissingTarget,
}

impl OperationOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            OperationOutcome::FailedNoAnchor
                | OperationOutcome::FailedAmbiguous
                | OperationOutcome::FailedMissingTarget
        )
    }
}

/// Immutable record of one evaluated operation.
#[derive(Debug, Clone, Serialize)]
pub struct OperationResult {
    pub id: String,
    pub label: String,
    /// Tree-relative path of the target file
    pub target: String,
    pub required: bool,
    pub outcome: OperationOutcome,
    /// Index of the anchor tier that fired, set only for `Applied`
    pub matched_candidate: Option<usize>,
    pub diagnostic: String,
}

impl OperationResult {
    /// True when this result must turn the exit status non-zero.
    ///
    /// A missing target always fails the run, even for optional operations.
    pub fn fails_run(&self) -> bool {
        match self.outcome {
            OperationOutcome::FailedMissingTarget => true,
            outcome if outcome.is_failure() => self.required,
            _ => false,
        }
    }

    /// True for failures of optional operations.
    pub fn is_warning(&self) -> bool {
        self.outcome.is_failure() && !self.fails_run()
    }
}

impl fmt::Display for OperationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.outcome {
            OperationOutcome::Applied => write!(
                f,
                "[OK]   {}: {} (anchor tier {})",
                self.target,
                self.label,
                self.matched_candidate.unwrap_or_default()
            ),
            OperationOutcome::SkippedIdempotent => {
                write!(f, "[SKIP] {}: {} (already applied)", self.target, self.label)
            }
            _ if self.is_warning() => write!(
                f,
                "[WARN] {}: {} - optional, {}",
                self.target, self.label, self.diagnostic
            ),
            _ => write!(
                f,
                "[ERR]  {}: {} - {}",
                self.target, self.label, self.diagnostic
            ),
        }
    }
}

/// Ordered per-operation log of a patch run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub results: Vec<OperationResult>,
    /// Files written back to disk, in the order they were flushed
    pub written: Vec<PathBuf>,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, result: OperationResult) {
        self.results.push(result);
    }

    fn count(&self, outcome: OperationOutcome) -> usize {
        self.results.iter().filter(|r| r.outcome == outcome).count()
    }

    pub fn applied(&self) -> usize {
        self.count(OperationOutcome::Applied)
    }

    pub fn skipped(&self) -> usize {
        self.count(OperationOutcome::SkippedIdempotent)
    }

    /// Failures that affect the exit status.
    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| r.fails_run()).count()
    }

    pub fn warnings(&self) -> usize {
        self.results.iter().filter(|r| r.is_warning()).count()
    }

    pub fn success(&self) -> bool {
        self.failed() == 0
    }

    /// Looks up the result of an operation by id.
    pub fn get(&self, id: &str) -> Option<&OperationResult> {
        self.results.iter().find(|r| r.id == id)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for result in &self.results {
            writeln!(f, "  {}", result)?;
        }
        write!(
            f,
            "Patch run: {} applied, {} skipped, {} warnings, {} failed",
            self.applied(),
            self.skipped(),
            self.warnings(),
            self.failed()
        )
    }
}

/// Result of a single verification check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pass,
    Fail,
    Warn,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub label: String,
    pub file: String,
    pub severity: Severity,
    pub status: CheckStatus,
    pub detail: String,
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            CheckStatus::Pass => write!(f, "[OK]   {}: {}", self.file, self.label),
            CheckStatus::Warn => {
                write!(f, "[WARN] {}: {} - {}", self.file, self.label, self.detail)
            }
            CheckStatus::Fail => {
                write!(f, "[ERR]  {}: {} - {}", self.file, self.label, self.detail)
            }
        }
    }
}

/// Outcome of the verification pass over the on-disk tree.
#[derive(Debug, Clone, Default, Serialize)]
pub struct VerificationReport {
    pub results: Vec<CheckResult>,
}

impl VerificationReport {
    fn count(&self, status: CheckStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    pub fn passed(&self) -> usize {
        self.count(CheckStatus::Pass)
    }

    pub fn failed(&self) -> usize {
        self.count(CheckStatus::Fail)
    }

    pub fn warned(&self) -> usize {
        self.count(CheckStatus::Warn)
    }

    pub fn success(&self) -> bool {
        self.failed() == 0
    }

    /// Converts a failing report into the external error signal.
    pub fn into_result(self) -> Result<Self, crate::error::VerificationError> {
        match self.failed() {
            0 => Ok(self),
            failed => Err(crate::error::VerificationError::Mismatch { failed }),
        }
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for result in &self.results {
            writeln!(f, "  {}", result)?;
        }
        write!(
            f,
            "Verification: {} passed, {} warnings, {} failed",
            self.passed(),
            self.warned(),
            self.failed()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(outcome: OperationOutcome, required: bool) -> OperationResult {
        OperationResult {
            id: "op".to_string(),
            label: "add include".to_string(),
            target: "fs/namei.c".to_string(),
            required,
            outcome,
            matched_candidate: (outcome == OperationOutcome::Applied).then_some(1),
            diagnostic: "context not found".to_string(),
        }
    }

    #[test]
    fn test_status_lines() {
        assert_eq!(
            result(OperationOutcome::Applied, true).to_string(),
            "[OK]   fs/namei.c: add include (anchor tier 1)"
        );
        assert_eq!(
            result(OperationOutcome::SkippedIdempotent, true).to_string(),
            "[SKIP] fs/namei.c: add include (already applied)"
        );
        assert!(result(OperationOutcome::FailedNoAnchor, true)
            .to_string()
            .starts_with("[ERR]"));
        assert!(result(OperationOutcome::FailedNoAnchor, false)
            .to_string()
            .starts_with("[WARN]"));
    }

    #[test]
    fn test_missing_target_always_fails_run() {
        assert!(result(OperationOutcome::FailedMissingTarget, false).fails_run());
        assert!(!result(OperationOutcome::FailedNoAnchor, false).fails_run());
        assert!(result(OperationOutcome::FailedAmbiguous, true).fails_run());
    }

    #[test]
    fn test_run_report_counts() {
        let mut report = RunReport::new();
        report.record(result(OperationOutcome::Applied, true));
        report.record(result(OperationOutcome::SkippedIdempotent, true));
        report.record(result(OperationOutcome::FailedNoAnchor, false));
        assert_eq!(report.applied(), 1);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.warnings(), 1);
        assert_eq!(report.failed(), 0);
        assert!(report.success());
    }

    #[test]
    fn test_insert_mode_serde_names() {
        let mode: InsertMode = serde_json::from_str("\"replace_span\"").unwrap();
        assert_eq!(mode, InsertMode::ReplaceSpan);
        let severity: Severity = serde_json::from_str("\"warn_only\"").unwrap();
        assert_eq!(severity, Severity::WarnOnly);
    }
}
