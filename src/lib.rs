//! Super Compactor
//!
//! Rebuilds Android dynamic-partition `super.img` files from an exported ROM
//! tree. A JSON manifest under `META/` describes the block device, groups and
//! partitions; this crate validates it against the files on disk, drives
//! `lpmake` to produce the image and checks the result with `lpdump`.
//!
//! The system is organized into functional modules:
//! - **error**: Unified error types and process result codes
//! - **models**: Core data structures
//! - **config**: Manifest loading, validation and the editable session
//! - **planner**: Size recommendations, dry-run plans and estimates
//! - **command**: lpmake argument synthesis
//! - **orchestrator**: Async build state machine and event stream
//! - **system**: Tool discovery and image verification
//! - **log_collector**: Disk-backed `log` backend

// Core foundational modules
pub mod error;
pub mod models;

pub mod config;
pub mod planner;
pub mod command;
pub mod system;
pub mod orchestrator;

// Robust, decoupled logging system
pub mod log_collector;

// Re-export the log crate for macro usage
pub use log;

pub use command::{BuilderCommand, CommandBuilder};
pub use config::ConfigSession;
pub use error::{BuildError, ConfigError, ResultCode, StartRejected, VerificationError};
pub use log_collector::{LogCollector, LogLine};
pub use models::{
    BlockDevice, DeviceLayout, Group, Partition, SuperConfig, ValidationIssue, ValidationReport,
};
pub use orchestrator::{BuildEvent, BuildOrchestrator, BuildOutcome, BuildState};
pub use system::{BundledToolLocator, FixedToolLocator, Tool, ToolLocator, VerificationStatus, Verifier};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
