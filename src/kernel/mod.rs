//! Kernel Source Patching Module
//!
//! Handles idempotent edits to a Linux kernel source tree:
//! - Anchor matching with ordered fallback tiers
//! - Idempotency signatures checked before any edit
//! - Plan application with a single write-back per file
//! - Verification of the on-disk result

pub mod anchor;
pub mod guard;
pub mod patcher;
pub mod validator;

// Built-in SUSFS plan and checklist
pub mod susfs;

pub use anchor::{find_anchor, AnchorCandidate, AnchorContext, AnchorMatch, Occurrence};
pub use guard::Signature;
pub use patcher::{PatchOperation, PatchRunner};
pub use validator::{verify, CheckPattern, VerificationCheck};
