//! Core data types for Super Compactor.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default LP metadata region size in bytes.
pub const DEFAULT_METADATA_SIZE: u32 = 65536;

/// Default super partition name; `--super-name` is only emitted when it differs.
pub const DEFAULT_SUPER_NAME: &str = "super";

/// Metadata slots for A/B devices (two active slots plus one reserve).
pub const AB_METADATA_SLOTS: u32 = 3;

/// Metadata slots for non-A/B devices.
pub const NON_AB_METADATA_SLOTS: u32 = 2;

/// Physical backing store described by the first `block_devices` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDevice {
    pub name: String,
    /// Total size in bytes
    pub size: u64,
    pub block_size: u32,
    /// Alignment in bytes
    pub alignment: u32,
}

/// Named capacity bucket partitions are assigned to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    /// Maximum size in bytes, 0 means unconstrained
    pub maximum_size: u64,
}

/// Logical partition inside the super image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub name: String,
    /// Relative to the ROM root, absolute, or empty for a slot placeholder
    pub path: String,
    /// Declared size in bytes
    pub size: u64,
    pub group_name: String,
    pub is_dynamic: bool,
}

impl Partition {
    /// Placeholder partitions get a definition but no image attachment.
    pub fn is_placeholder(&self) -> bool {
        self.path.is_empty()
    }

    /// lpmake attribute string for this partition.
    pub fn attribute(&self) -> &'static str {
        if self.is_dynamic {
            "readonly"
        } else {
            "none"
        }
    }

    /// The A/B slot this partition belongs to, judged by its name suffix.
    pub fn slot(&self) -> Option<Slot> {
        Slot::of(&self.name)
    }
}

/// A/B update slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Slot {
    A,
    B,
}

impl Slot {
    pub fn of(name: &str) -> Option<Slot> {
        if name.ends_with("_a") {
            Some(Slot::A)
        } else if name.ends_with("_b") {
            Some(Slot::B)
        } else {
            None
        }
    }

    pub fn other(self) -> Slot {
        match self {
            Slot::A => Slot::B,
            Slot::B => Slot::A,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::A => write!(f, "A"),
            Slot::B => write!(f, "B"),
        }
    }
}

/// Device topology detected from the group list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceLayout {
    /// Both `main_a` and `main_b` groups present
    Ab,
    NonAb,
}

impl DeviceLayout {
    pub fn default_metadata_slots(&self) -> u32 {
        match self {
            DeviceLayout::Ab => AB_METADATA_SLOTS,
            DeviceLayout::NonAb => NON_AB_METADATA_SLOTS,
        }
    }
}

impl fmt::Display for DeviceLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceLayout::Ab => write!(f, "A/B"),
            DeviceLayout::NonAb => write!(f, "non-A/B"),
        }
    }
}

/// Normalized manifest: the aggregate every other component reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuperConfig {
    pub block_device: BlockDevice,
    pub groups: Vec<Group>,
    pub partitions: Vec<Partition>,
    /// ROM export root; relative partition paths resolve here
    pub base_path: PathBuf,
    pub metadata_size: u32,
    pub metadata_slots: u32,
    pub super_name: String,
    pub alignment_offset: u32,
    pub virtual_ab: bool,
    pub nv_id: String,
    /// `super_meta.path`, when the manifest carries one
    pub metadata_path: Option<String>,
    pub layout: DeviceLayout,
}

impl SuperConfig {
    /// Resolve a partition's backing file. `None` for placeholders.
    pub fn partition_path(&self, partition: &Partition) -> Option<PathBuf> {
        resolve_partition_path(&self.base_path, &partition.path)
    }

    /// Sum of declared partition sizes, saturating rather than wrapping.
    pub fn total_declared_size(&self) -> u64 {
        self.partitions
            .iter()
            .fold(0u64, |acc, p| acc.saturating_add(p.size))
    }
}

/// Absolute paths are used as-is, relative ones are joined onto `base`.
pub fn resolve_partition_path(base: &Path, path: &str) -> Option<PathBuf> {
    if path.is_empty() {
        return None;
    }
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        Some(candidate.to_path_buf())
    } else {
        Some(base.join(candidate))
    }
}

/// Size of a regular file, or `None` if it does not exist.
pub fn file_size(path: &Path) -> Option<u64> {
    std::fs::metadata(path)
        .ok()
        .filter(|m| m.is_file())
        .map(|m| m.len())
}

/// A single validation finding. Whether it blocks the build depends on which
/// list of the [`ValidationReport`] it lands in.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    #[error("Missing partition file: {partition} ({path})")]
    MissingFile { partition: String, path: PathBuf },

    #[error("Missing partition file: {partition} ({path}); both A and B slots are missing")]
    BothSlotsMissing { partition: String, path: PathBuf },

    #[error("Slot {missing} partition missing (building for slot {} only): {partition}", .missing.other())]
    SingleSlotOnly { partition: String, missing: Slot },

    #[error("{partition}: file size ({actual}) exceeds declared size ({declared})")]
    ExceedsDeclared {
        partition: String,
        actual: u64,
        declared: u64,
    },

    #[error("{partition} is empty (0 bytes)")]
    EmptyFile { partition: String },

    #[error("{partition}: file size ({actual}) is much smaller than declared ({declared})")]
    Undersized {
        partition: String,
        actual: u64,
        declared: u64,
    },

    #[error("Total partition size ({total}) exceeds device size ({device})")]
    TotalSizeExceeded { total: u64, device: u64 },

    #[error("Duplicate partition name: {partition}")]
    DuplicateName { partition: String },
}

impl ValidationIssue {
    /// Findings caused by absent backing files.
    pub fn is_missing_file(&self) -> bool {
        matches!(
            self,
            ValidationIssue::MissingFile { .. }
                | ValidationIssue::BothSlotsMissing { .. }
                | ValidationIssue::SingleSlotOnly { .. }
        )
    }
}

/// Result of one validation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(|e| e.to_string()).collect()
    }

    pub fn warning_messages(&self) -> Vec<String> {
        self.warnings.iter().map(|w| w.to_string()).collect()
    }
}

/// Advisory sizing for one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeRecommendation {
    pub current_size: u64,
    pub actual_file_size: u64,
    pub recommended_size: u64,
    pub needs_resize: bool,
}

/// Dry-run description of a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildPlan {
    /// Rendered lpmake command line
    pub command: String,
    pub required_files: Vec<PathBuf>,
    pub estimated_output_size: u64,
    pub output_path: PathBuf,
}

/// Rough build time estimate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildEstimate {
    pub total_bytes_to_process: u64,
    pub estimated_seconds: u64,
    pub estimated_time_str: String,
}
