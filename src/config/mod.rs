//! Configuration module for patch runs.
//!
//! A config file is optional. Without one the patcher runs the built-in
//! SUSFS plan and checklist with default flags. A config can switch
//! individual built-in operations off or make them optional, and can add
//! declarative operations and checks of its own.
//!
//! # Module Structure
//!
//! - `loader`: Reads JSON or TOML config files and validates them
//!
//! # Configuration Flow
//!
//! 1. `loader` parses the file into a [`PatcherConfig`]
//! 2. [`PatcherConfig::validate`] rejects unknown ids and bad patterns
//! 3. CLI flags override the booleans
//! 4. [`PatcherConfig::build_plan`] and [`PatcherConfig::build_checks`]
//!    produce the runtime plan and checklist

pub mod loader;

use crate::error::ConfigError;
use crate::kernel::anchor::AnchorCandidate;
use crate::kernel::guard::Signature;
use crate::kernel::patcher::templates::Template;
use crate::kernel::patcher::PatchOperation;
use crate::kernel::susfs::{susfs_checks, susfs_plan};
use crate::kernel::validator::{CheckPattern, VerificationCheck};
use crate::models::{InsertMode, Severity};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

fn default_true() -> bool {
    true
}

/// Settings for one patch run.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PatcherConfig {
    /// Write `<file>.bak` before the first write-back
    pub backup: bool,
    pub dry_run: bool,
    /// Include the built-in SUSFS plan and checklist
    pub builtin_plan: bool,
    /// Operation ids to leave out of the plan
    pub skip_operations: Vec<String>,
    /// Operation ids whose failures only warn
    pub optional_operations: Vec<String>,
    /// Directory for the session log file; no file when unset
    pub log_dir: Option<PathBuf>,
    pub operations: Vec<OperationSpec>,
    pub checks: Vec<CheckSpec>,
}

impl Default for PatcherConfig {
    fn default() -> Self {
        PatcherConfig {
            backup: false,
            dry_run: false,
            builtin_plan: true,
            skip_operations: Vec::new(),
            optional_operations: Vec::new(),
            log_dir: None,
            operations: Vec::new(),
            checks: Vec::new(),
        }
    }
}

/// Declarative patch operation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OperationSpec {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    pub target: PathBuf,
    pub signature: SignatureSpec,
    pub anchors: Vec<AnchorSpec>,
    /// Template rendered against the anchor context
    pub content: String,
    pub mode: InsertMode,
    #[serde(default = "default_true")]
    pub required: bool,
}

/// Declarative idempotency signature.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureSpec {
    Contains(String),
    Matches(String),
    Absent(Box<SignatureSpec>),
    AllOf(Vec<SignatureSpec>),
    Within {
        marker: String,
        inner: Box<SignatureSpec>,
    },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OccurrenceSpec {
    #[default]
    Unique,
    First,
    Last,
    After,
    Within,
}

/// Declarative anchor tier. Exactly one of `literal`, `regex` or
/// `preprocessor_block` must be set.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnchorSpec {
    pub literal: Option<String>,
    pub regex: Option<String>,
    pub preprocessor_block: Option<String>,
    pub occurrence: OccurrenceSpec,
    /// Required for `after` and `within`
    pub marker: Option<String>,
}

/// Declarative verification check. Exactly one of `literal`, `regex`,
/// `call_site` or `absent` must be set.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckSpec {
    pub file: PathBuf,
    pub label: String,
    pub severity: Severity,
    pub literal: Option<String>,
    pub regex: Option<String>,
    pub call_site: Option<String>,
    pub absent: Option<String>,
    pub within: Option<String>,
}

impl SignatureSpec {
    pub fn to_signature(&self) -> Result<Signature, ConfigError> {
        Ok(match self {
            SignatureSpec::Contains(text) => Signature::contains(text.clone()),
            SignatureSpec::Matches(pattern) => Signature::Matches(Regex::new(pattern)?),
            SignatureSpec::Absent(inner) => Signature::absent(inner.to_signature()?),
            SignatureSpec::AllOf(all) => Signature::AllOf(
                all.iter()
                    .map(SignatureSpec::to_signature)
                    .collect::<Result<_, _>>()?,
            ),
            SignatureSpec::Within { marker, inner } => {
                Signature::within(marker.clone(), inner.to_signature()?)
            }
        })
    }
}

impl AnchorSpec {
    pub fn to_candidate(&self) -> Result<AnchorCandidate, ConfigError> {
        let candidate = match (&self.literal, &self.regex, &self.preprocessor_block) {
            (Some(text), None, None) => AnchorCandidate::literal(text.clone()),
            (None, Some(pattern), None) => AnchorCandidate::from_regex(Regex::new(pattern)?),
            (None, None, Some(opening)) => AnchorCandidate::preprocessor_block(opening.clone()),
            _ => {
                return Err(ConfigError::ValidationFailed(
                    "Anchor must set exactly one of literal, regex, preprocessor_block".to_string(),
                ))
            }
        };

        let marker = || {
            self.marker.clone().ok_or_else(|| {
                ConfigError::ValidationFailed(format!(
                    "Anchor occurrence {:?} requires a marker",
                    self.occurrence
                ))
            })
        };

        Ok(match self.occurrence {
            OccurrenceSpec::Unique => candidate,
            OccurrenceSpec::First => candidate.first(),
            OccurrenceSpec::Last => candidate.last(),
            OccurrenceSpec::After => candidate.after(marker()?),
            OccurrenceSpec::Within => candidate.within(marker()?),
        })
    }
}

impl OperationSpec {
    pub fn to_operation(&self) -> Result<PatchOperation, ConfigError> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "Operation id cannot be empty".to_string(),
            ));
        }
        if self.anchors.is_empty() {
            return Err(ConfigError::ValidationFailed(format!(
                "Operation '{}' has no anchors",
                self.id
            )));
        }

        let template = Template::new(self.content.clone());
        let mut operation = PatchOperation::new(
            self.id.clone(),
            self.label.clone().unwrap_or_else(|| self.id.clone()),
            self.target.clone(),
            self.signature.to_signature()?,
            self.mode,
            move |context| template.render(context),
        );
        for anchor in &self.anchors {
            operation = operation.anchor(anchor.to_candidate()?);
        }
        if !self.required {
            operation = operation.optional();
        }
        Ok(operation)
    }
}

impl CheckSpec {
    pub fn to_check(&self) -> Result<VerificationCheck, ConfigError> {
        let pattern = match (&self.literal, &self.regex, &self.call_site, &self.absent) {
            (Some(text), None, None, None) => CheckPattern::Literal(text.clone()),
            (None, Some(pattern), None, None) => CheckPattern::Regex(Regex::new(pattern)?),
            (None, None, Some(symbol), None) => CheckPattern::CallSite(symbol.clone()),
            (None, None, None, Some(text)) => CheckPattern::Absent(text.clone()),
            _ => {
                return Err(ConfigError::ValidationFailed(format!(
                    "Check '{}' must set exactly one of literal, regex, call_site, absent",
                    self.label
                )))
            }
        };
        if self.file.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed(format!(
                "Check '{}' has no file",
                self.label
            )));
        }

        Ok(VerificationCheck {
            file: self.file.clone(),
            pattern,
            label: self.label.clone(),
            severity: self.severity,
            within: self.within.clone(),
        })
    }
}

impl PatcherConfig {
    /// CLI flags only ever switch behaviour on.
    pub fn with_overrides(mut self, backup: bool, dry_run: bool) -> Self {
        self.backup |= backup;
        self.dry_run |= dry_run;
        self
    }

    /// Checks ids and compiles every declarative entry once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut ids: HashSet<String> = HashSet::new();
        if self.builtin_plan {
            ids.extend(susfs_plan().into_iter().map(|op| op.id));
        }
        for spec in &self.operations {
            spec.to_operation()?;
            if !ids.insert(spec.id.clone()) {
                return Err(ConfigError::ValidationFailed(format!(
                    "Duplicate operation id '{}'",
                    spec.id
                )));
            }
        }

        for id in self.skip_operations.iter().chain(&self.optional_operations) {
            if !ids.contains(id) {
                return Err(ConfigError::ValidationFailed(format!(
                    "Unknown operation id '{}'",
                    id
                )));
            }
        }

        for check in &self.checks {
            check.to_check()?;
        }
        Ok(())
    }

    /// Built-in operations (when enabled) followed by declarative ones, with
    /// skips removed and optional overrides applied.
    pub fn build_plan(&self) -> Result<Vec<PatchOperation>, ConfigError> {
        let mut plan = if self.builtin_plan {
            susfs_plan()
        } else {
            Vec::new()
        };
        for spec in &self.operations {
            plan.push(spec.to_operation()?);
        }

        Ok(plan
            .into_iter()
            .filter(|op| !self.skip_operations.contains(&op.id))
            .map(|op| {
                if self.optional_operations.contains(&op.id) {
                    op.optional()
                } else {
                    op
                }
            })
            .collect())
    }

    pub fn build_checks(&self) -> Result<Vec<VerificationCheck>, ConfigError> {
        let mut checks = if self.builtin_plan {
            susfs_checks()
        } else {
            Vec::new()
        };
        for spec in &self.checks {
            checks.push(spec.to_check()?);
        }
        Ok(checks)
    }
}
