//! lpmake invocation synthesis.
//!
//! Flag order is fixed: mandatory geometry flags, optional flags, groups,
//! partitions in manifest order, then `--output`. Building a command never
//! fails; validation is the gate for whether it should be run.

use crate::models::{file_size, SuperConfig, DEFAULT_SUPER_NAME};
use crate::system::paths::{Tool, ToolLocator};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A resolved lpmake invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuilderCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl BuilderCommand {
    /// Single-line form for logs and dry runs.
    pub fn render(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .map(|part| {
                if part.contains(char::is_whitespace) {
                    format!("\"{}\"", part)
                } else {
                    part
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Partition names in `--partition=` order.
    pub fn partition_names(&self) -> Vec<&str> {
        self.args
            .iter()
            .filter_map(|a| a.strip_prefix("--partition="))
            .filter_map(|spec| spec.split(':').next())
            .collect()
    }
}

/// Maps a configuration to the lpmake command line.
#[derive(Clone)]
pub struct CommandBuilder {
    locator: Arc<dyn ToolLocator>,
}

impl CommandBuilder {
    pub fn new(locator: Arc<dyn ToolLocator>) -> Self {
        Self { locator }
    }

    pub fn build(&self, config: &SuperConfig, output: &Path) -> BuilderCommand {
        let program = self.locator.locate(Tool::Lpmake);
        let args = builder_args(config, output);
        log::debug!("[Command] {} with {} arguments", program.display(), args.len());
        BuilderCommand { program, args }
    }
}

/// Argument list for lpmake, without the program itself.
pub fn builder_args(config: &SuperConfig, output: &Path) -> Vec<String> {
    let device = &config.block_device;
    let mut args = vec![
        format!("--device-size={}", device.size),
        format!("--metadata-size={}", config.metadata_size),
        format!("--metadata-slots={}", config.metadata_slots),
        format!("--block-size={}", device.block_size),
        format!("--alignment={}", device.alignment),
    ];

    if config.alignment_offset != 0 {
        args.push(format!("--alignment-offset={}", config.alignment_offset));
    }
    if config.super_name != DEFAULT_SUPER_NAME {
        args.push(format!("--super-name={}", config.super_name));
    }
    if config.virtual_ab {
        args.push("--virtual-ab".to_string());
    }

    for group in config.groups.iter().filter(|g| g.maximum_size > 0) {
        args.push(format!("--group={}:{}", group.name, group.maximum_size));
    }

    for partition in &config.partitions {
        let image = config
            .partition_path(partition)
            .filter(|p| file_size(p).is_some());
        let size = if partition.is_placeholder() { 0 } else { partition.size };

        args.push(format!(
            "--partition={}:{}:{}:{}",
            partition.name,
            partition.attribute(),
            size,
            partition.group_name
        ));
        if let Some(path) = image {
            args.push(format!("--image={}={}", partition.name, path.display()));
        }
    }

    args.push(format!("--output={}", output.display()));
    args
}
