//! Size planning and dry-run helpers.
//!
//! Everything here is advisory: recommendations and plans are computed from the
//! configuration and the filesystem and never written back.

use crate::command::CommandBuilder;
use crate::models::{
    file_size, resolve_partition_path, BuildEstimate, BuildPlan, Partition, SizeRecommendation,
    SuperConfig,
};
use crate::system::paths::ToolLocator;
use std::path::Path;
use std::sync::Arc;

/// Throughput assumed by [`estimate_build_time`], in bytes per second.
pub const ESTIMATED_THROUGHPUT: u64 = 100 * 1024 * 1024;

/// Recommend a declared size for one partition, rounded up to `alignment`.
pub fn recommend(partition: &Partition, base_dir: &Path, alignment: u64) -> SizeRecommendation {
    let alignment = alignment.max(1);
    let actual = resolve_partition_path(base_dir, &partition.path).and_then(|p| file_size(&p));

    let (actual_file_size, recommended_size) = match actual {
        Some(size) => (size, align_up(size, alignment)),
        None => (0, alignment),
    };

    SizeRecommendation {
        current_size: partition.size,
        actual_file_size,
        recommended_size,
        needs_resize: recommended_size != partition.size,
    }
}

/// Recommendations for every partition, in manifest order, using the block
/// device alignment.
pub fn recommend_all(config: &SuperConfig) -> Vec<(String, SizeRecommendation)> {
    let alignment = u64::from(config.block_device.alignment);
    config
        .partitions
        .iter()
        .map(|p| (p.name.clone(), recommend(p, &config.base_path, alignment)))
        .collect()
}

fn align_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment).saturating_mul(alignment)
}

/// Dry-run plan: the command that would run and the files it reads.
pub fn create_build_plan(
    config: &SuperConfig,
    output_path: &Path,
    locator: Arc<dyn ToolLocator>,
) -> BuildPlan {
    let command = CommandBuilder::new(locator).build(config, output_path);
    let required_files = config
        .partitions
        .iter()
        .filter_map(|p| config.partition_path(p))
        .collect();

    BuildPlan {
        command: command.render(),
        required_files,
        estimated_output_size: config.block_device.size,
        output_path: output_path.to_path_buf(),
    }
}

/// Rough duration of a build based on the bytes lpmake has to copy.
pub fn estimate_build_time(config: &SuperConfig) -> BuildEstimate {
    let total_bytes_to_process = config
        .partitions
        .iter()
        .filter_map(|p| config.partition_path(p))
        .filter_map(|p| file_size(&p))
        .fold(0u64, u64::saturating_add);

    let estimated_seconds = (total_bytes_to_process / ESTIMATED_THROUGHPUT).max(1);

    BuildEstimate {
        total_bytes_to_process,
        estimated_seconds,
        estimated_time_str: format!("{}m {}s", estimated_seconds / 60, estimated_seconds % 60),
    }
}

/// Human-readable byte count: "512 B", "1.5 KB", "8.5 GB".
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", size, UNITS[unit])
}
