//! SUSFS Kernel Patcher
//!
//! This crate integrates SUSFS into an Android GKI kernel source tree by
//! applying idempotent, anchor-based source edits and then verifying the
//! resulting tree on disk.
//!
//! The system is organized into functional modules:
//! - **error**: Unified error type hierarchy
//! - **models**: Reports and outcome types
//! - **kernel**: Anchor matching, idempotency signatures, plan application,
//!   verification and the built-in SUSFS plan
//! - **config**: Optional JSON/TOML configuration and declarative operations
//! - **log_collector**: `log` backend with a session log file

// Core foundational modules
pub mod error;
pub mod models;

// Anchor matching, patch runner, verification
pub mod kernel;

// Optional run configuration
pub mod config;

// Logging backend
pub mod log_collector;

// Re-export commonly used types
pub use config::PatcherConfig;
pub use error::{ConfigError, PatchError, VerificationError};
pub use kernel::{PatchOperation, PatchRunner, VerificationCheck};
pub use log_collector::{LogCollector, LogLine};
pub use models::{OperationOutcome, OperationResult, RunReport, VerificationReport};

// Re-export the log crate for macro usage
pub use log;

/// Version of the patcher
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
