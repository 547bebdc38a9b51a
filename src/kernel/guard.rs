//! Idempotency signatures.
//!
//! A [`Signature`] answers one question about a file's current text: is the
//! post-condition of an operation already established? The runner asks it
//! before any anchor work, so a re-run over a patched tree is a no-op.
//!
//! Signatures must describe the operation's own effect. A call-site
//! insertion is guarded by the call expression, never by the bare symbol
//! name, which a declaration inserted by an earlier operation would also
//! satisfy.

use crate::error::PatchError;
use crate::kernel::anchor::{find_unique, function_region};
use regex::Regex;

#[derive(Debug, Clone)]
pub enum Signature {
    Contains(String),
    Matches(Regex),
    /// Applied when the inner signature does not hold (removals and repairs)
    Absent(Box<Signature>),
    AllOf(Vec<Signature>),
    /// Inner signature evaluated on the function starting at `marker` only
    Within { marker: String, inner: Box<Signature> },
}

impl Signature {
    pub fn contains(text: impl Into<String>) -> Self {
        Signature::Contains(text.into())
    }

    pub fn matches(pattern: &str) -> Result<Self, PatchError> {
        Regex::new(pattern)
            .map(Signature::Matches)
            .map_err(|e| PatchError::RegexInvalid(format!("{}: {}", pattern, e)))
    }

    pub fn absent(inner: Signature) -> Self {
        Signature::Absent(Box::new(inner))
    }

    pub fn within(marker: impl Into<String>, inner: Signature) -> Self {
        Signature::Within {
            marker: marker.into(),
            inner: Box::new(inner),
        }
    }

    /// Whether the operation guarded by this signature is already applied.
    pub fn is_applied(&self, text: &str) -> bool {
        match self {
            Signature::Contains(needle) => text.contains(needle.as_str()),
            Signature::Matches(regex) => regex.is_match(text),
            Signature::Absent(inner) => inner.scope_resolves(text) && !inner.is_applied(text),
            Signature::AllOf(all) => all.iter().all(|s| s.is_applied(text)),
            // A missing or duplicated marker never counts as applied; the
            // anchor matcher reports the duplicate as ambiguous
            Signature::Within { marker, inner } => match find_unique(text, marker) {
                Ok(Some(pos)) => {
                    let (start, end) = function_region(text, pos);
                    inner.is_applied(&text[start..end])
                }
                Ok(None) | Err(_) => false,
            },
        }
    }

    /// False when a `Within` marker occurs more than once.
    fn scope_resolves(&self, text: &str) -> bool {
        match self {
            Signature::Contains(_) | Signature::Matches(_) => true,
            Signature::Absent(inner) => inner.scope_resolves(text),
            Signature::AllOf(all) => all.iter().all(|s| s.scope_resolves(text)),
            Signature::Within { marker, .. } => find_unique(text, marker).is_ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAMEI: &str = "extern struct filename *susfs_get_redirected_path(unsigned long ino);\n\nstruct file *do_filp_open(int dfd)\n{\n\tstruct file *filp;\n\treturn filp;\n}\n";

    #[test]
    fn test_contains() {
        assert!(Signature::contains("susfs_get_redirected_path").is_applied(NAMEI));
        assert!(!Signature::contains("fake_pathname").is_applied(NAMEI));
    }

    #[test]
    fn test_call_site_signature_is_tighter_than_symbol_name() {
        // The declaration alone must not satisfy a call-site guard
        let call_site = Signature::contains("= susfs_get_redirected_path(filp->f_inode->i_ino)");
        assert!(!call_site.is_applied(NAMEI));
    }

    #[test]
    fn test_absent_inverts() {
        let repaired = Signature::absent(Signature::contains("i_state & BIT_OPEN_REDIRECT"));
        assert!(repaired.is_applied(NAMEI));
        assert!(!repaired.is_applied("x->i_state & BIT_OPEN_REDIRECT"));
    }

    #[test]
    fn test_all_of() {
        let sig = Signature::AllOf(vec![
            Signature::contains("do_filp_open"),
            Signature::matches(r"struct file \*filp;").unwrap(),
        ]);
        assert!(sig.is_applied(NAMEI));
    }

    #[test]
    fn test_within_scopes_to_function() {
        let sig = Signature::within("struct file *do_filp_open(", Signature::contains("extern"));
        assert!(!sig.is_applied(NAMEI));
        let sig = Signature::within("struct file *do_filp_open(", Signature::contains("return filp;"));
        assert!(sig.is_applied(NAMEI));
        let missing = Signature::within("static int nope(", Signature::contains("return"));
        assert!(!missing.is_applied(NAMEI));
    }

    #[test]
    fn test_within_duplicated_marker_is_not_applied() {
        let text = "static int s_show(void)\n{\n\thook();\n}\n\nstatic int s_show(int x)\n{\n\treturn x;\n}\n";
        let sig = Signature::within("static int s_show(", Signature::contains("hook();"));
        assert!(!sig.is_applied(text));
        let repaired = Signature::absent(Signature::within("static int s_show(", Signature::contains("hook();")));
        assert!(!repaired.is_applied(text));
        // A missing marker leaves nothing to remove
        let repaired = Signature::absent(Signature::within("static int nope(", Signature::contains("hook();")));
        assert!(repaired.is_applied(text));
    }

    #[test]
    fn test_invalid_regex() {
        assert!(Signature::matches("(").is_err());
    }
}
