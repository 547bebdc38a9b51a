//! Patch plan application over a kernel source tree.
//!
//! A plan is an ordered list of [`PatchOperation`]s. [`PatchRunner`] loads
//! each target file once, evaluates every operation against the current
//! in-memory text (so later operations see earlier insertions), and writes
//! back only the files whose text actually changed.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::PatchError;
use crate::kernel::anchor::{find_anchor, AnchorCandidate, AnchorContext, AnchorMatch};
use crate::kernel::guard::Signature;
use crate::models::{InsertMode, OperationOutcome, OperationResult, RunReport};

pub mod templates;


/// Result type for patching operations
pub type PatchResult<T> = std::result::Result<T, PatchError>;

/// Pure content generator over the captured anchor context.
pub type BuildContent = Arc<dyn Fn(&AnchorContext) -> String + Send + Sync>;

/// One entry of a patch plan.
#[derive(Clone)]
pub struct PatchOperation {
    pub id: String,
    pub label: String,
    /// Target path relative to the tree root
    pub target: PathBuf,
    pub signature: Signature,
    pub candidates: Vec<AnchorCandidate>,
    pub mode: InsertMode,
    /// Optional operations report failures as warnings only
    pub required: bool,
    build_content: BuildContent,
}

impl PatchOperation {
    pub fn new<F>(
        id: impl Into<String>,
        label: impl Into<String>,
        target: impl Into<PathBuf>,
        signature: Signature,
        mode: InsertMode,
        build_content: F,
    ) -> Self
    where
        F: Fn(&AnchorContext) -> String + Send + Sync + 'static,
    {
        PatchOperation {
            id: id.into(),
            label: label.into(),
            target: target.into(),
            signature,
            candidates: Vec::new(),
            mode,
            required: true,
            build_content: Arc::new(build_content),
        }
    }

    /// Appends a fallback tier.
    pub fn anchor(mut self, candidate: AnchorCandidate) -> Self {
        self.candidates.push(candidate);
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn build_content(&self, context: &AnchorContext) -> String {
        (self.build_content)(context)
    }
}

impl fmt::Debug for PatchOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatchOperation")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("target", &self.target)
            .field("signature", &self.signature)
            .field("candidates", &self.candidates)
            .field("mode", &self.mode)
            .field("required", &self.required)
            .finish_non_exhaustive()
    }
}

/// Splices `content` into `text` around the matched span.
pub fn splice(text: &str, found: &AnchorMatch, mode: InsertMode, content: &str) -> String {
    let mut out = String::with_capacity(text.len() + content.len());
    match mode {
        InsertMode::InsertBefore => {
            out.push_str(&text[..found.start]);
            out.push_str(content);
            out.push_str(&text[found.start..]);
        }
        InsertMode::InsertAfter => {
            out.push_str(&text[..found.end]);
            out.push_str(content);
            out.push_str(&text[found.end..]);
        }
        InsertMode::ReplaceSpan => {
            out.push_str(&text[..found.start]);
            out.push_str(content);
            out.push_str(&text[found.end..]);
        }
    }
    out
}

/// A target file held in memory for the duration of a run.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Path relative to the tree root
    pub rel_path: PathBuf,
    pub path: PathBuf,
    original: String,
    pub text: String,
}

impl SourceFile {
    pub fn load(root: &Path, rel_path: &Path) -> PatchResult<Option<Self>> {
        let path = root.join(rel_path);
        if !path.is_file() {
            return Ok(None);
        }
        let original = fs::read_to_string(&path).map_err(|e| PatchError::io(&path, e))?;
        Ok(Some(SourceFile {
            rel_path: rel_path.to_path_buf(),
            path,
            text: original.clone(),
            original,
        }))
    }

    pub fn is_modified(&self) -> bool {
        self.text != self.original
    }
}

/// Applies patch plans to one kernel tree.
pub struct PatchRunner {
    /// Root directory of the kernel tree
    src_dir: PathBuf,
    /// Write `<file>.bak` before the first write-back of each file
    backup: bool,
    /// Evaluate and report without touching the disk
    dry_run: bool,
    files: BTreeMap<PathBuf, SourceFile>,
}

impl PatchRunner {
    pub fn new(src_dir: impl Into<PathBuf>) -> Self {
        PatchRunner {
            src_dir: src_dir.into(),
            backup: false,
            dry_run: false,
            files: BTreeMap::new(),
        }
    }

    pub fn with_backup(mut self, backup: bool) -> Self {
        self.backup = backup;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Applies `plan` in order and flushes changed files.
    ///
    /// Per-operation failures become report entries. Only an unusable tree
    /// root or an I/O failure while reading or writing aborts the run.
    pub fn apply_plan(&mut self, plan: &[PatchOperation]) -> PatchResult<RunReport> {
        if !self.src_dir.is_dir() {
            return Err(PatchError::TargetFileMissing(format!(
                "kernel tree root {}",
                self.src_dir.display()
            )));
        }

        self.files.clear();
        let mut report = RunReport::new();

        log::info!(
            "[Patcher] Applying {} operation(s) to {}",
            plan.len(),
            self.src_dir.display()
        );

        for op in plan {
            let result = self.evaluate(op)?;
            match result.outcome {
                OperationOutcome::Applied => log::info!("[Patcher] [APPLY] {}", result),
                OperationOutcome::SkippedIdempotent => log::info!("[Patcher] [SKIP] {}", result),
                _ if result.is_warning() => log::warn!("[Patcher] [WARN] {}", result),
                _ => log::error!("[Patcher] [FAIL] {}", result),
            }
            report.record(result);
        }

        report.written = self.flush()?;
        Ok(report)
    }

    fn evaluate(&mut self, op: &PatchOperation) -> PatchResult<OperationResult> {
        let mut result = OperationResult {
            id: op.id.clone(),
            label: op.label.clone(),
            target: op.target.display().to_string(),
            required: op.required,
            outcome: OperationOutcome::FailedMissingTarget,
            matched_candidate: None,
            diagnostic: String::new(),
        };

        let full_path = self.src_dir.join(&op.target);
        let Some(file) = self.source(&op.target)? else {
            result.diagnostic = format!("{} not found", full_path.display());
            return Ok(result);
        };

        if op.signature.is_applied(&file.text) {
            result.outcome = OperationOutcome::SkippedIdempotent;
            result.diagnostic = "signature present".to_string();
            return Ok(result);
        }

        match find_anchor(&file.text, &op.candidates) {
            Ok(Some(found)) => {
                let content = op.build_content(&found.context);
                file.text = splice(&file.text, &found, op.mode, &content);
                result.outcome = OperationOutcome::Applied;
                result.matched_candidate = Some(found.candidate);
                result.diagnostic = format!("{} at byte {}", op.mode, found.start);

                if !op.signature.is_applied(&file.text) {
                    log::warn!(
                        "[Patcher] [GUARD] signature of '{}' does not hold after applying; a re-run will apply it again",
                        op.id
                    );
                    result.diagnostic.push_str(", signature still absent after apply");
                }
            }
            Ok(None) => {
                result.outcome = OperationOutcome::FailedNoAnchor;
                let not_found = PatchError::AnchorNotFound {
                    operation: op.id.clone(),
                    file: op.target.display().to_string(),
                };
                result.diagnostic = match op.candidates.first() {
                    Some(first) => format!(
                        "{} ({} tier(s), expected: {:?})",
                        not_found,
                        op.candidates.len(),
                        snippet(first.needle())
                    ),
                    None => format!("{} (no anchor candidates)", not_found),
                };
            }
            Err(e @ PatchError::AmbiguousAnchor { .. }) => {
                result.outcome = OperationOutcome::FailedAmbiguous;
                result.diagnostic = e.to_string();
            }
            Err(e) => return Err(e),
        }

        Ok(result)
    }

    /// Current in-memory text of a target, loaded from disk on first use.
    fn source(&mut self, rel_path: &Path) -> PatchResult<Option<&mut SourceFile>> {
        if !self.files.contains_key(rel_path) {
            match SourceFile::load(&self.src_dir, rel_path)? {
                Some(file) => {
                    self.files.insert(rel_path.to_path_buf(), file);
                }
                None => return Ok(None),
            }
        }
        Ok(self.files.get_mut(rel_path))
    }

    /// Writes every modified file once; unchanged files are left untouched.
    fn flush(&mut self) -> PatchResult<Vec<PathBuf>> {
        let mut written = Vec::new();
        for file in self.files.values_mut().filter(|f| f.is_modified()) {
            if self.dry_run {
                log::info!("[Patcher] [DRY-RUN] would write {}", file.rel_path.display());
                continue;
            }
            if self.backup {
                write_backup(&file.path, &file.original)?;
            }
            fs::write(&file.path, &file.text).map_err(|e| PatchError::io(&file.path, e))?;
            log::debug!("[Patcher] [WRITE] {}", file.rel_path.display());
            file.original = file.text.clone();
            written.push(file.rel_path.clone());
        }
        Ok(written)
    }
}

/// Writes `<path>.bak` unless a backup already exists.
fn write_backup(path: &Path, content: &str) -> PatchResult<()> {
    let mut name = path.as_os_str().to_owned();
    name.push(".bak");
    let backup_path = PathBuf::from(name);
    if backup_path.exists() {
        log::debug!("[Patcher] [BACKUP] keeping existing {}", backup_path.display());
        return Ok(());
    }
    fs::write(&backup_path, content).map_err(|e| PatchError::io(&backup_path, e))?;
    log::info!("[Patcher] [BACKUP] {}", backup_path.display());
    Ok(())
}

/// First 80 characters of a needle, trimmed, on one line.
fn snippet(needle: &str) -> String {
    needle.trim().chars().take(80).collect::<String>().replace('\n', "\\n")
}
