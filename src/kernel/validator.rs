//! Post-patch tree verification.
//!
//! This module re-reads the kernel tree from disk and evaluates a checklist
//! of [`VerificationCheck`]s against it. It never looks at a [`RunReport`]:
//! a tree that was patched by hand passes exactly like one patched by the
//! runner, and an operation that "applied" without establishing its
//! post-condition still fails here.
//!
//! Presence and use are distinct checks. [`CheckPattern::Literal`] proves a
//! symbol is mentioned; [`CheckPattern::CallSite`] proves it is invoked.
//!
//! [`RunReport`]: crate::models::RunReport

use crate::error::VerificationError;
use crate::kernel::anchor::{find_unique, function_region};
use crate::models::{CheckResult, CheckStatus, Severity, VerificationReport};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

/// Result type for validation operations
pub type ValidationResult<T> = std::result::Result<T, VerificationError>;

/// What a check looks for.
#[derive(Debug, Clone)]
pub enum CheckPattern {
    Literal(String),
    Regex(Regex),
    /// `symbol(` in an expression context, not a declaration
    CallSite(String),
    /// The text must not occur
    Absent(String),
}

impl CheckPattern {
    fn describe(&self) -> String {
        match self {
            CheckPattern::Literal(text) => format!("{:?}", text),
            CheckPattern::Regex(regex) => format!("/{}/", regex.as_str()),
            CheckPattern::CallSite(symbol) => format!("call to {}()", symbol),
            CheckPattern::Absent(text) => format!("no {:?}", text),
        }
    }

    fn holds(&self, text: &str) -> bool {
        match self {
            CheckPattern::Literal(needle) => text.contains(needle.as_str()),
            CheckPattern::Regex(regex) => regex.is_match(text),
            CheckPattern::CallSite(symbol) => has_call_site(text, symbol),
            CheckPattern::Absent(needle) => !text.contains(needle.as_str()),
        }
    }
}

/// One entry of the verification checklist.
#[derive(Debug, Clone)]
pub struct VerificationCheck {
    /// Path relative to the tree root
    pub file: PathBuf,
    pub pattern: CheckPattern,
    pub label: String,
    pub severity: Severity,
    /// Restrict the check to the function starting at this marker
    pub within: Option<String>,
}

impl VerificationCheck {
    fn new(file: impl Into<PathBuf>, pattern: CheckPattern, label: impl Into<String>) -> Self {
        VerificationCheck {
            file: file.into(),
            pattern,
            label: label.into(),
            severity: Severity::MustPass,
            within: None,
        }
    }

    pub fn literal(file: impl Into<PathBuf>, needle: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(file, CheckPattern::Literal(needle.into()), label)
    }

    pub fn regex(file: impl Into<PathBuf>, pattern: &str, label: impl Into<String>) -> ValidationResult<Self> {
        let regex = Regex::new(pattern)
            .map_err(|e| VerificationError::RegexInvalid(format!("{}: {}", pattern, e)))?;
        Ok(Self::new(file, CheckPattern::Regex(regex), label))
    }

    pub fn call_site(file: impl Into<PathBuf>, symbol: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(file, CheckPattern::CallSite(symbol.into()), label)
    }

    pub fn absent(file: impl Into<PathBuf>, needle: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(file, CheckPattern::Absent(needle.into()), label)
    }

    pub fn warn_only(mut self) -> Self {
        self.severity = Severity::WarnOnly;
        self
    }

    pub fn within(mut self, marker: impl Into<String>) -> Self {
        self.within = Some(marker.into());
        self
    }

    /// Evaluates the check against already-loaded file text.
    pub fn evaluate(&self, text: &str) -> Result<(), String> {
        let scope = match &self.within {
            Some(marker) => match find_unique(text, marker) {
                Ok(Some(pos)) => {
                    let (start, end) = function_region(text, pos);
                    &text[start..end]
                }
                // Nothing to be absent from
                Ok(None) if matches!(self.pattern, CheckPattern::Absent(_)) => return Ok(()),
                Ok(None) => return Err(format!("marker {:?} not found", marker)),
                Err(count) => return Err(format!("marker {:?} occurs {} times", marker, count)),
            },
            None => text,
        };

        if self.pattern.holds(scope) {
            return Ok(());
        }

        let place = match &self.within {
            Some(marker) => format!(" inside {:?}", marker),
            None => String::new(),
        };
        Err(match self.pattern {
            CheckPattern::Absent(_) => format!("unexpected text present{}: {}", place, self.pattern.describe()),
            _ => format!("expected {}{}", self.pattern.describe(), place),
        })
    }
}

/// Runs `checks` against the tree at `root`, reading every file from disk.
pub fn verify(root: &Path, checks: &[VerificationCheck]) -> VerificationReport {
    let mut report = VerificationReport::default();

    for check in checks {
        let path = root.join(&check.file);
        let outcome = match fs::read_to_string(&path) {
            Ok(text) => check.evaluate(&text),
            Err(e) => Err(format!("cannot read {}: {}", path.display(), e)),
        };

        let (status, detail) = match outcome {
            Ok(()) => (CheckStatus::Pass, String::new()),
            Err(detail) => match check.severity {
                Severity::MustPass => (CheckStatus::Fail, detail),
                Severity::WarnOnly => (CheckStatus::Warn, detail),
            },
        };

        match status {
            CheckStatus::Pass => log::debug!("[Verify] [PASS] {}: {}", check.file.display(), check.label),
            CheckStatus::Warn => log::warn!("[Verify] [WARN] {}: {} ({})", check.file.display(), check.label, detail),
            CheckStatus::Fail => log::error!("[Verify] [FAIL] {}: {} ({})", check.file.display(), check.label, detail),
        }

        report.results.push(CheckResult {
            label: check.label.clone(),
            file: check.file.display().to_string(),
            severity: check.severity,
            status,
            detail,
        });
    }

    report
}

/// True when `text` invokes `symbol` somewhere.
///
/// An occurrence counts when `symbol` is a whole identifier followed by `(`
/// and the text in front of it on its line is an expression context. Column-0
/// definitions, `extern` prototypes, comments, preprocessor lines and
/// `type symbol(` declarations do not count.
pub fn has_call_site(text: &str, symbol: &str) -> bool {
    if symbol.is_empty() {
        return false;
    }
    text.match_indices(symbol).any(|(pos, _)| {
        let before = text[..pos].chars().next_back();
        if before.is_some_and(is_ident_char) {
            return false;
        }
        let after = text[pos + symbol.len()..].trim_start_matches([' ', '\t']);
        if !after.starts_with('(') {
            return false;
        }
        let line_start = text[..pos].rfind('\n').map(|i| i + 1).unwrap_or(0);
        is_call_prefix(&text[line_start..pos])
    })
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_call_prefix(prefix: &str) -> bool {
    let trimmed = prefix.trim();
    if trimmed.is_empty() {
        // Indented statement vs. definition name at column 0
        return prefix.starts_with([' ', '\t']);
    }
    if trimmed.starts_with("extern")
        || trimmed.starts_with('#')
        || trimmed.starts_with("//")
        || trimmed.starts_with("/*")
        || trimmed.starts_with('*')
    {
        return false;
    }

    // `struct filename *symbol(` is a declaration, `= *symbol(` is a call
    let head = trimmed.trim_end_matches(|c: char| c == '*' || c.is_whitespace());
    match head.chars().next_back() {
        Some(c) if is_ident_char(c) => {
            let word_start = head
                .rfind(|c: char| !is_ident_char(c))
                .map(|i| i + 1)
                .unwrap_or(0);
            matches!(&head[word_start..], "return" | "else" | "do" | "case" | "sizeof")
        }
        Some(_) => true,
        None => false,
    }
}
