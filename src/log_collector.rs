//! Decoupled logging pipeline.
//!
//! # Architecture
//!
//! ```text
//! log::info!() / log::warn!() / ...
//!     |
//! [LogCollector] (log::Log impl, never blocks the caller)
//!     | (crossbeam unbounded channel)
//!     v
//! [writer thread]
//!     |-- <log_dir>/full/<ts>_full.log      every record
//!     |-- <log_dir>/parsed/<ts>_parsed.log  target "parsed" milestones
//!     `-- stderr                            records at or above the echo level
//! ```
//!
//! The writer is a plain OS thread so records from any runtime or thread reach
//! disk. [`LogCollector::wait_for_empty`] pushes a flush marker through the same
//! channel and resolves once everything queued before it has been written.

use chrono::Local;
use crossbeam_channel::{unbounded, Sender};
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::oneshot;

/// Log target routed to the milestone log.
pub const PARSED_TARGET: &str = "parsed";

enum LogMessage {
    Line(LogLine),
    /// Flush marker; the writer answers once it reaches it
    Flush(oneshot::Sender<()>),
}

/// Which log file(s) a line lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    /// Full log only
    Full,
    /// Full log and milestone log
    Parsed,
}

/// A log line with metadata.
#[derive(Clone, Debug)]
pub struct LogLine {
    pub message: String,
    pub kind: LogKind,
    pub level: Level,
    /// `HH:MM:SS.mmm`, taken when the line was created
    pub timestamp: String,
}

impl LogLine {
    pub fn new(message: impl Into<String>) -> Self {
        Self::with_level(message, Level::Info, LogKind::Full)
    }

    pub fn parsed(message: impl Into<String>) -> Self {
        Self::with_level(message, Level::Info, LogKind::Parsed)
    }

    pub fn with_level(message: impl Into<String>, level: Level, kind: LogKind) -> Self {
        LogLine {
            message: message.into(),
            kind,
            level,
            timestamp: Local::now().format("%H:%M:%S%.3f").to_string(),
        }
    }

    /// `[HH:MM:SS.mmm] [LEVEL] message`
    pub fn format(&self) -> String {
        format!("[{}] [{}] {}", self.timestamp, self.level, self.message)
    }
}

/// Default log directory: `<cache>/super_compactor/logs`, or `./logs` when the
/// platform has no cache directory.
pub fn default_log_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|d| d.join("super_compactor").join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"))
}

/// Unified logger feeding the disk writer thread.
#[derive(Clone)]
pub struct LogCollector {
    tx: Sender<LogMessage>,
    log_dir: PathBuf,
    full_log_path: PathBuf,
    parsed_log_path: PathBuf,
    max_level: LevelFilter,
}

impl LogCollector {
    /// Create the log directories and start the writer thread. Each collector
    /// writes to a fresh pair of timestamped files.
    pub fn new(log_dir: PathBuf) -> Result<Self, String> {
        Self::with_console(log_dir, LevelFilter::Debug, LevelFilter::Off)
    }

    /// Like [`LogCollector::new`], additionally echoing records at or above
    /// `echo_level` to stderr.
    pub fn with_console(
        log_dir: PathBuf,
        max_level: LevelFilter,
        echo_level: LevelFilter,
    ) -> Result<Self, String> {
        let full_dir = log_dir.join("full");
        let parsed_dir = log_dir.join("parsed");
        std::fs::create_dir_all(&full_dir)
            .map_err(|e| format!("Failed to create full log dir: {}", e))?;
        std::fs::create_dir_all(&parsed_dir)
            .map_err(|e| format!("Failed to create parsed log dir: {}", e))?;

        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let full_log_path = full_dir.join(format!("{}_full.log", stamp));
        let parsed_log_path = parsed_dir.join(format!("{}_parsed.log", stamp));

        let mut full = open_append(&full_log_path)?;
        let mut parsed = open_append(&parsed_log_path)?;

        let (tx, rx) = unbounded::<LogMessage>();

        std::thread::Builder::new()
            .name("log-writer".into())
            .spawn(move || {
                while let Ok(msg) = rx.recv() {
                    match msg {
                        LogMessage::Line(line) => {
                            let formatted = line.format();
                            let _ = writeln!(full, "{}", formatted);
                            if line.kind == LogKind::Parsed {
                                let _ = writeln!(parsed, "{}", formatted);
                            }
                            if line.level <= echo_level {
                                eprintln!("{}", formatted);
                            }
                        }
                        LogMessage::Flush(done) => {
                            let _ = full.flush();
                            let _ = parsed.flush();
                            let _ = done.send(());
                        }
                    }
                }
            })
            .map_err(|e| format!("Failed to start log writer thread: {}", e))?;

        Ok(LogCollector {
            tx,
            log_dir,
            full_log_path,
            parsed_log_path,
            max_level,
        })
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn full_log_path(&self) -> &Path {
        &self.full_log_path
    }

    pub fn parsed_log_path(&self) -> &Path {
        &self.parsed_log_path
    }

    /// Queue a line. Never blocks; a dead writer drops the line.
    pub fn log_line(&self, line: LogLine) {
        let _ = self.tx.send(LogMessage::Line(line));
    }

    pub fn log_str(&self, message: impl Into<String>) {
        self.log_line(LogLine::new(message));
    }

    /// Queue a high-level milestone.
    pub fn log_parsed(&self, message: impl Into<String>) {
        self.log_line(LogLine::parsed(message));
    }

    /// Resolve once every line queued before this call is on disk.
    pub async fn wait_for_empty(&self) -> Result<(), String> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(LogMessage::Flush(done_tx))
            .map_err(|e| format!("Failed to send flush marker: {}", e))?;
        done_rx
            .await
            .map_err(|e| format!("Flush signal interrupted: {}", e))
    }

    /// Install a clone of this collector as the global `log` backend.
    pub fn install(&self) -> Result<(), log::SetLoggerError> {
        log::set_boxed_logger(Box::new(self.clone()))?;
        log::set_max_level(self.max_level);
        Ok(())
    }
}

/// Wires every `log::*!` call into the collector. Target `"parsed"` also goes to
/// the milestone log.
impl Log for LogCollector {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let kind = if record.target() == PARSED_TARGET {
            LogKind::Parsed
        } else {
            LogKind::Full
        };
        self.log_line(LogLine::with_level(
            record.args().to_string(),
            record.level(),
            kind,
        ));
    }

    fn flush(&self) {}
}

fn open_append(path: &Path) -> Result<File, String> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| format!("Failed to open log file {}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_log_collector_creates_directories() {
        let temp = TempDir::new().unwrap();
        let collector = LogCollector::new(temp.path().to_path_buf()).unwrap();

        assert!(temp.path().join("full").exists());
        assert!(temp.path().join("parsed").exists());
        assert!(collector.full_log_path().exists());
        assert!(collector.parsed_log_path().exists());
    }

    #[tokio::test]
    async fn test_parsed_lines_reach_both_files() {
        let temp = TempDir::new().unwrap();
        let collector = LogCollector::new(temp.path().to_path_buf()).unwrap();

        for i in 0..1000 {
            collector.log_str(format!("Log message {}", i));
        }
        collector.log_parsed("Build finished");
        collector.wait_for_empty().await.unwrap();

        let full = fs::read_to_string(collector.full_log_path()).unwrap();
        let parsed = fs::read_to_string(collector.parsed_log_path()).unwrap();
        assert_eq!(full.lines().count(), 1001);
        assert!(full.contains("[INFO] Log message 999"));
        assert_eq!(parsed.lines().count(), 1);
        assert!(parsed.contains("Build finished"));
    }

    #[tokio::test]
    async fn test_log_trait_routes_by_target() {
        let temp = TempDir::new().unwrap();
        let collector = LogCollector::new(temp.path().to_path_buf()).unwrap();

        collector.log(
            &Record::builder()
                .args(format_args!("milestone"))
                .level(Level::Warn)
                .target(PARSED_TARGET)
                .build(),
        );
        collector.log(
            &Record::builder()
                .args(format_args!("too chatty"))
                .level(Level::Trace)
                .target("super_compactor")
                .build(),
        );
        collector.wait_for_empty().await.unwrap();

        let full = fs::read_to_string(collector.full_log_path()).unwrap();
        let parsed = fs::read_to_string(collector.parsed_log_path()).unwrap();
        assert!(parsed.contains("[WARN] milestone"));
        assert!(!full.contains("too chatty"));
    }
}
