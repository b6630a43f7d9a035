//! Config validation.
//!
//! Checks a [`SuperConfig`] against the filesystem and its own consistency
//! rules. Errors block a build, warnings are surfaced and the build proceeds.
//! Missing `_a`/`_b` images are judged per slot: one missing slot means a
//! single-slot build, both missing is fatal.

use crate::models::{file_size, Slot, SuperConfig, ValidationIssue, ValidationReport};
use std::collections::HashSet;
use std::path::PathBuf;

/// Validate a configuration. Reads file metadata only; never mutates anything.
pub fn validate(config: &SuperConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    let mut missing_a: Vec<(String, PathBuf)> = Vec::new();
    let mut missing_b: Vec<(String, PathBuf)> = Vec::new();

    for partition in &config.partitions {
        // Placeholders have nothing on disk to check
        let Some(full_path) = config.partition_path(partition) else {
            continue;
        };

        match file_size(&full_path) {
            None => match partition.slot() {
                Some(Slot::A) => missing_a.push((partition.name.clone(), full_path)),
                Some(Slot::B) => missing_b.push((partition.name.clone(), full_path)),
                None => report.errors.push(ValidationIssue::MissingFile {
                    partition: partition.name.clone(),
                    path: full_path,
                }),
            },
            Some(actual) => {
                if actual > partition.size {
                    report.warnings.push(ValidationIssue::ExceedsDeclared {
                        partition: partition.name.clone(),
                        actual,
                        declared: partition.size,
                    });
                } else if actual == 0 {
                    report.warnings.push(ValidationIssue::EmptyFile {
                        partition: partition.name.clone(),
                    });
                } else if actual.saturating_mul(2) < partition.size {
                    report.warnings.push(ValidationIssue::Undersized {
                        partition: partition.name.clone(),
                        actual,
                        declared: partition.size,
                    });
                }
            }
        }
    }

    reconcile_slots(&mut report, missing_a, missing_b);

    let total = config.total_declared_size();
    if total > config.block_device.size {
        report.errors.push(ValidationIssue::TotalSizeExceeded {
            total,
            device: config.block_device.size,
        });
    }

    let mut seen = HashSet::new();
    for partition in &config.partitions {
        if !seen.insert(partition.name.as_str()) {
            report.errors.push(ValidationIssue::DuplicateName {
                partition: partition.name.clone(),
            });
        }
    }

    log::debug!(
        "Validation finished: {} errors, {} warnings",
        report.errors.len(),
        report.warnings.len()
    );
    report
}

fn reconcile_slots(
    report: &mut ValidationReport,
    missing_a: Vec<(String, PathBuf)>,
    missing_b: Vec<(String, PathBuf)>,
) {
    match (missing_a.is_empty(), missing_b.is_empty()) {
        (true, true) => {}
        (false, false) => {
            for (partition, path) in missing_a.into_iter().chain(missing_b) {
                report
                    .errors
                    .push(ValidationIssue::BothSlotsMissing { partition, path });
            }
        }
        (false, true) => {
            for (partition, _) in missing_a {
                report.warnings.push(ValidationIssue::SingleSlotOnly {
                    partition,
                    missing: Slot::A,
                });
            }
        }
        (true, false) => {
            for (partition, _) in missing_b {
                report.warnings.push(ValidationIssue::SingleSlotOnly {
                    partition,
                    missing: Slot::B,
                });
            }
        }
    }
}
