//! Logging backend for patch runs.
//!
//! `LogCollector` implements the `log` crate's `Log` trait. Every record is
//! timestamped and appended to the session log file when one is open; only
//! records passing the console level are mirrored to stderr.
//!
//! # Format
//!
//! ```text
//! [HH:MM:SS.mmm] [LEVEL] message
//! ```
//!
//! Report lines (`[OK]`, `[SKIP]`, ...) go to stdout from `main`; the log
//! stream on stderr carries the tagged `[Patcher]`/`[Verify]` records.

use chrono::Local;
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// A single timestamped log line.
#[derive(Clone, Debug)]
pub struct LogLine {
    /// Format: HH:MM:SS.mmm
    pub timestamp: String,
    pub level: Level,
    pub message: String,
}

impl LogLine {
    pub fn new(level: Level, message: String) -> Self {
        LogLine {
            timestamp: Local::now().format("%H:%M:%S%.3f").to_string(),
            level,
            message,
        }
    }

    pub fn formatted(&self) -> String {
        format!("[{}] [{}] {}\n", self.timestamp, self.level, self.message)
    }
}

/// Ensure the log directory exists
pub fn ensure_logs_dir_exists(log_dir: &Path) -> Result<(), String> {
    fs::create_dir_all(log_dir)
        .map_err(|e| format!("Failed to create log directory {}: {}", log_dir.display(), e))
}

/// Session log file, opened once and appended to.
struct Session {
    path: PathBuf,
    file: File,
}

pub struct LogCollector {
    /// Stderr mirror threshold; the session file receives every record
    console_level: LevelFilter,
    session: Arc<Mutex<Option<Session>>>,
}

impl LogCollector {
    pub fn new(console_level: LevelFilter) -> Self {
        LogCollector {
            console_level,
            session: Arc::new(Mutex::new(None)),
        }
    }

    /// Opens `<log_dir>/susfs_patcher_<timestamp>.log` for this run.
    pub fn start_new_session(&self, log_dir: &Path) -> Result<PathBuf, String> {
        ensure_logs_dir_exists(log_dir)?;
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let path = log_dir.join(format!("susfs_patcher_{}.log", timestamp));

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| format!("Failed to open log file: {}", e))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| format!("Failed to lock session state: {}", e))?;
        *session = Some(Session {
            path: path.clone(),
            file,
        });
        Ok(path)
    }

    /// Get the current session log file path
    pub fn get_session_log_path(&self) -> Option<PathBuf> {
        self.session
            .lock()
            .ok()
            .and_then(|session| session.as_ref().map(|s| s.path.clone()))
    }

    /// Installs a clone of this collector as the global logger.
    pub fn install(&self) -> Result<(), log::SetLoggerError> {
        log::set_boxed_logger(Box::new(self.clone()))?;
        log::set_max_level(LevelFilter::Trace);
        Ok(())
    }

    fn persist(&self, line: &LogLine) {
        let Ok(mut session) = self.session.lock() else {
            return;
        };
        if let Some(session) = session.as_mut() {
            if let Err(e) = session
                .file
                .write_all(line.formatted().as_bytes())
                .and_then(|_| session.file.flush())
            {
                eprintln!("[Log] Failed to write to {}: {}", session.path.display(), e);
            }
        }
    }
}

impl Clone for LogCollector {
    fn clone(&self) -> Self {
        LogCollector {
            console_level: self.console_level,
            session: Arc::clone(&self.session),
        }
    }
}

/// Implementation of the `log` crate's Log trait
/// Wires all log::info!(), log::warn!(), log::error!() calls into LogCollector
impl Log for LogCollector {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let line = LogLine::new(record.level(), record.args().to_string());
            if record.level() <= self.console_level {
                eprint!("{}", line.formatted());
            }
            self.persist(&line);
        }
    }

    fn flush(&self) {
        if let Ok(mut session) = self.session.lock() {
            if let Some(session) = session.as_mut() {
                let _ = session.file.flush();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record_at(collector: &LogCollector, level: Level, message: &str) {
        collector.log(
            &Record::builder()
                .level(level)
                .args(format_args!("{}", message))
                .build(),
        );
    }

    #[test]
    fn test_log_line_format() {
        let line = LogLine::new(Level::Warn, "[Patcher] [WARN] x".to_string());
        let formatted = line.formatted();
        assert!(formatted.starts_with('['));
        assert!(formatted.ends_with("] [WARN] [Patcher] [WARN] x\n"));
        // HH:MM:SS.mmm
        assert_eq!(line.timestamp.len(), 12);
    }

    #[test]
    fn test_session_file_receives_every_record() {
        let temp_dir = TempDir::new().unwrap();
        let log_dir = temp_dir.path().join("logs");
        let collector = LogCollector::new(LevelFilter::Info);

        let path = collector.start_new_session(&log_dir).unwrap();
        assert!(log_dir.is_dir());
        assert_eq!(collector.get_session_log_path(), Some(path.clone()));

        record_at(&collector, Level::Info, "[Patcher] [APPLY] kept");
        record_at(&collector, Level::Debug, "[Anchor] [MISS] tier 0");
        record_at(&collector, Level::Trace, "trace detail");
        collector.flush();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("[INFO] [Patcher] [APPLY] kept"));
        // Below the console level, still persisted
        assert!(content.contains("[DEBUG] [Anchor] [MISS] tier 0"));
        assert!(content.contains("[TRACE] trace detail"));
    }

    #[test]
    fn test_no_session_by_default() {
        let collector = LogCollector::new(LevelFilter::Debug);
        assert!(collector.get_session_log_path().is_none());
        record_at(&collector, Level::Error, "stderr only");
    }
}
