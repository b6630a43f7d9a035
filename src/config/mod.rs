//! Configuration management: manifest loading, validation, and the editable
//! session the orchestrator builds from.
//!
//! A loaded [`SuperConfig`] is read-only for every consumer. The one sanctioned
//! edit is redirecting a single partition's image path, which marks the session
//! modified until [`ConfigSession::save_modified_config`] (or
//! [`ConfigSession::save_config_as`]) writes a resolved manifest copy.

pub mod loader;
pub mod validator;

use crate::error::ConfigError;
use crate::models::SuperConfig;
use std::path::{Path, PathBuf};

/// Output image file name inside the chosen output directory.
pub const OUTPUT_IMAGE_NAME: &str = "super.img";

/// Loaded manifest plus the user's build choices.
#[derive(Debug, Clone, Default)]
pub struct ConfigSession {
    config: Option<SuperConfig>,
    manifest_path: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    has_unsaved_changes: bool,
    /// Last resolved manifest copy written by a save
    resolved_manifest_path: Option<PathBuf>,
}

impl ConfigSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a manifest, replacing whatever was loaded before. The ROM root is
    /// derived from the manifest location.
    pub fn load(&mut self, manifest_path: &Path) -> Result<&SuperConfig, ConfigError> {
        let base = loader::rom_root_for(manifest_path).ok_or_else(|| {
            ConfigError::InvalidPath(format!(
                "Cannot determine ROM directory for {}",
                manifest_path.display()
            ))
        })?;
        self.load_with_base(manifest_path, &base)
    }

    /// Load a manifest with an explicit ROM root.
    pub fn load_with_base(
        &mut self,
        manifest_path: &Path,
        base_path: &Path,
    ) -> Result<&SuperConfig, ConfigError> {
        let config = loader::load_manifest(manifest_path, base_path)?;
        self.manifest_path = Some(manifest_path.to_path_buf());
        self.has_unsaved_changes = false;
        self.resolved_manifest_path = None;
        Ok(self.config.insert(config))
    }

    /// Install an already-built configuration (used by callers that parse
    /// manifests themselves).
    pub fn set_config(&mut self, config: SuperConfig) {
        self.config = Some(config);
        self.manifest_path = None;
        self.has_unsaved_changes = false;
        self.resolved_manifest_path = None;
    }

    pub fn config(&self) -> Option<&SuperConfig> {
        self.config.as_ref()
    }

    pub fn manifest_path(&self) -> Option<&Path> {
        self.manifest_path.as_deref()
    }

    pub fn set_output_dir(&mut self, dir: impl Into<PathBuf>) {
        self.output_dir = Some(dir.into());
    }

    pub fn output_dir(&self) -> Option<&Path> {
        self.output_dir.as_deref()
    }

    /// `<output_dir>/super.img`
    pub fn output_path(&self) -> Option<PathBuf> {
        self.output_dir.as_ref().map(|d| d.join(OUTPUT_IMAGE_NAME))
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.has_unsaved_changes
    }

    pub fn resolved_manifest_path(&self) -> Option<&Path> {
        self.resolved_manifest_path.as_deref()
    }

    /// Redirect one partition to a different image file.
    pub fn update_partition_path(
        &mut self,
        index: usize,
        path: impl Into<String>,
    ) -> Result<(), ConfigError> {
        let config = self.config.as_mut().ok_or(ConfigError::NotLoaded)?;
        let len = config.partitions.len();
        let partition = config
            .partitions
            .get_mut(index)
            .ok_or(ConfigError::PartitionIndex { index, len })?;

        partition.path = path.into();
        self.has_unsaved_changes = true;
        log::warn!(
            "Partition {} ({}) now points at '{}' (unsaved changes)",
            index,
            partition.name,
            partition.path
        );
        Ok(())
    }

    /// Write the current configuration to a timestamped file in the system temp
    /// directory and clear the modified flag.
    pub fn save_modified_config(&mut self) -> Result<PathBuf, ConfigError> {
        self.save_modified_config_in(&std::env::temp_dir())
    }

    /// Same as [`Self::save_modified_config`] with an explicit directory.
    pub fn save_modified_config_in(&mut self, dir: &Path) -> Result<PathBuf, ConfigError> {
        let config = self.config.as_ref().ok_or(ConfigError::NotLoaded)?;
        let stem = self
            .manifest_path
            .as_deref()
            .and_then(Path::file_stem)
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "manifest".to_string());
        let file_name = format!(
            "super_compactor_{}_{}.json",
            stem,
            chrono::Local::now().timestamp_millis()
        );
        let path = dir.join(file_name);

        loader::export_manifest(config, &path)?;
        self.has_unsaved_changes = false;
        self.resolved_manifest_path = Some(path.clone());
        Ok(path)
    }

    /// Save to a caller-chosen path (`.json` appended when missing).
    pub fn save_config_as(&mut self, path: &Path) -> Result<PathBuf, ConfigError> {
        let config = self.config.as_ref().ok_or(ConfigError::NotLoaded)?;
        let path = if path.extension().map_or(false, |e| e.eq_ignore_ascii_case("json")) {
            path.to_path_buf()
        } else {
            let mut with_ext = path.as_os_str().to_owned();
            with_ext.push(".json");
            PathBuf::from(with_ext)
        };

        loader::export_manifest(config, &path)?;
        self.has_unsaved_changes = false;
        self.resolved_manifest_path = Some(path.clone());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const MANIFEST: &str = r#"{
        "block_devices": [{ "name": "super", "size": "4096", "block_size": "4096", "alignment": "4096" }],
        "groups": [{ "name": "main" }],
        "partitions": [
            { "name": "system", "path": "IMAGES/system.img", "size": "4096", "group_name": "main", "is_dynamic": true }
        ]
    }"#;

    fn rom_with_manifest() -> (TempDir, PathBuf) {
        let temp = TempDir::new().unwrap();
        let meta = temp.path().join("META");
        fs::create_dir_all(&meta).unwrap();
        let manifest = meta.join("super_def.json");
        fs::write(&manifest, MANIFEST).unwrap();
        (temp, manifest)
    }

    #[test]
    fn test_load_resolves_rom_root() {
        let (temp, manifest) = rom_with_manifest();
        let mut session = ConfigSession::new();
        let config = session.load(&manifest).unwrap();
        assert_eq!(config.base_path, temp.path());
        assert!(!session.has_unsaved_changes());
    }

    #[test]
    fn test_edit_marks_modified_and_save_clears() {
        let (temp, manifest) = rom_with_manifest();
        let mut session = ConfigSession::new();
        session.load(&manifest).unwrap();

        session.update_partition_path(0, "/elsewhere/system.img").unwrap();
        assert!(session.has_unsaved_changes());

        let saved = session.save_modified_config_in(temp.path()).unwrap();
        assert!(!session.has_unsaved_changes());
        assert!(saved.exists());
        assert_eq!(session.resolved_manifest_path(), Some(saved.as_path()));

        let reloaded = loader::load_manifest(&saved, temp.path()).unwrap();
        assert_eq!(reloaded.partitions[0].path, "/elsewhere/system.img");
    }

    #[test]
    fn test_edit_out_of_range() {
        let (_temp, manifest) = rom_with_manifest();
        let mut session = ConfigSession::new();
        session.load(&manifest).unwrap();
        let err = session.update_partition_path(5, "x").unwrap_err();
        assert!(matches!(err, ConfigError::PartitionIndex { index: 5, len: 1 }));
        assert!(!session.has_unsaved_changes());
    }

    #[test]
    fn test_edit_without_config() {
        let mut session = ConfigSession::new();
        assert!(matches!(
            session.update_partition_path(0, "x"),
            Err(ConfigError::NotLoaded)
        ));
    }

    #[test]
    fn test_save_as_appends_extension() {
        let (temp, manifest) = rom_with_manifest();
        let mut session = ConfigSession::new();
        session.load(&manifest).unwrap();
        let saved = session.save_config_as(&temp.path().join("custom")).unwrap();
        assert_eq!(saved, temp.path().join("custom.json"));
        assert!(saved.exists());
    }

    #[test]
    fn test_output_path() {
        let mut session = ConfigSession::new();
        assert_eq!(session.output_path(), None);
        session.set_output_dir("/out");
        assert_eq!(session.output_path(), Some(PathBuf::from("/out/super.img")));
    }
}
