//! Global logger wiring: `log::*!` records land in the collector's files.
//!
//! Kept in its own test binary since `install()` can only succeed once per process.

use std::fs;
use super_compactor::log_collector::PARSED_TARGET;
use super_compactor::LogCollector;
use tempfile::TempDir;

#[tokio::test]
async fn test_global_logger_routes_by_target() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let collector = LogCollector::new(temp.path().to_path_buf()).expect("collector");
    collector.install().expect("logger already installed");

    log::info!("[lpmake] writing super.img");
    log::info!(target: PARSED_TARGET, "Build succeeded");
    log::trace!("below the max level");

    // Clones share one writer thread, so a flush through either covers both.
    let clone = collector.clone();
    clone.log_str("from the clone");
    collector.wait_for_empty().await.expect("flush");

    let full = fs::read_to_string(collector.full_log_path()).unwrap();
    let parsed = fs::read_to_string(collector.parsed_log_path()).unwrap();

    assert!(full.contains("[INFO] [lpmake] writing super.img"));
    assert!(full.contains("Build succeeded"));
    assert!(full.contains("from the clone"));
    assert!(!full.contains("below the max level"));

    assert!(parsed.contains("Build succeeded"));
    assert!(!parsed.contains("[lpmake]"));
}
