//! Manifest loader and serialization.
//!
//! Reads the partition-layout JSON found under `<rom>/META/`, normalizes it into a
//! [`SuperConfig`] and writes it back out in the same schema. Numeric fields are
//! decimal strings in the manifest; plain JSON integers are accepted too.

use crate::error::ConfigError;
use crate::models::{
    BlockDevice, DeviceLayout, Group, Partition, SuperConfig, DEFAULT_METADATA_SIZE,
    DEFAULT_SUPER_NAME,
};
use serde::Deserialize;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};

/// Directory holding the manifests inside a ROM export.
pub const META_DIR_NAME: &str = "META";

/// Numeric manifest value: decimal string or native integer.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum NumField {
    Text(String),
    Int(u64),
}

impl NumField {
    fn to_u64(&self, field: &str) -> Result<u64, ConfigError> {
        match self {
            NumField::Int(v) => Ok(*v),
            NumField::Text(s) => s.trim().parse::<u64>().map_err(|_| ConfigError::InvalidNumber {
                field: field.to_string(),
                value: s.clone(),
            }),
        }
    }

    fn to_u32(&self, field: &str) -> Result<u32, ConfigError> {
        let value = self.to_u64(field)?;
        u32::try_from(value).map_err(|_| ConfigError::InvalidNumber {
            field: field.to_string(),
            value: value.to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    #[serde(default)]
    nv_id: Option<String>,
    #[serde(default)]
    lpmake: Option<RawLpmake>,
    #[serde(default)]
    block_devices: Vec<RawBlockDevice>,
    #[serde(default)]
    groups: Vec<RawGroup>,
    #[serde(default)]
    partitions: Vec<RawPartition>,
    #[serde(default)]
    super_meta: Option<RawSuperMeta>,
}

#[derive(Debug, Deserialize)]
struct RawLpmake {
    metadata_size: Option<NumField>,
    metadata_slots: Option<NumField>,
    super_name: Option<String>,
    alignment_offset: Option<NumField>,
    virtual_ab: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawBlockDevice {
    name: Option<String>,
    size: Option<NumField>,
    block_size: Option<NumField>,
    alignment: Option<NumField>,
}

#[derive(Debug, Deserialize)]
struct RawGroup {
    name: Option<String>,
    maximum_size: Option<NumField>,
}

#[derive(Debug, Deserialize)]
struct RawPartition {
    name: Option<String>,
    path: Option<String>,
    size: Option<NumField>,
    group_name: Option<String>,
    is_dynamic: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawSuperMeta {
    path: Option<String>,
}

fn required<T>(value: Option<T>, field: impl Into<String>) -> Result<T, ConfigError> {
    value.ok_or_else(|| ConfigError::MissingField {
        field: field.into(),
    })
}

/// Load a manifest file. `base_path` is the ROM root relative partition paths
/// resolve against.
pub fn load_manifest(path: &Path, base_path: &Path) -> Result<SuperConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::ManifestNotFound(path.to_path_buf())
        } else {
            ConfigError::IoError(e)
        }
    })?;

    let config = parse_manifest(&content, base_path)?;
    log::info!(
        "Loaded manifest {} ({} layout, {} groups, {} partitions)",
        path.display(),
        config.layout,
        config.groups.len(),
        config.partitions.len()
    );
    log_summary(&config);
    Ok(config)
}

/// Parse manifest JSON text into a normalized configuration.
pub fn parse_manifest(content: &str, base_path: &Path) -> Result<SuperConfig, ConfigError> {
    let raw: RawManifest = serde_json::from_str(content)?;

    let mut groups = Vec::with_capacity(raw.groups.len());
    for (i, grp) in raw.groups.into_iter().enumerate() {
        let name = required(grp.name, format!("groups[{}].name", i))?;
        let maximum_size = match grp.maximum_size {
            Some(v) => v.to_u64(&format!("groups[{}].maximum_size", i))?,
            None => 0,
        };
        groups.push(Group { name, maximum_size });
    }

    let layout = detect_layout(&groups);

    // Topology decides the slot count unless the lpmake block says otherwise
    let mut metadata_size = DEFAULT_METADATA_SIZE;
    let mut metadata_slots = layout.default_metadata_slots();
    let mut super_name = DEFAULT_SUPER_NAME.to_string();
    let mut alignment_offset = 0;
    let mut virtual_ab = false;

    if let Some(lpmake) = raw.lpmake {
        if let Some(v) = lpmake.metadata_size {
            metadata_size = v.to_u32("lpmake.metadata_size")?;
        }
        if let Some(v) = lpmake.metadata_slots {
            metadata_slots = v.to_u32("lpmake.metadata_slots")?;
        }
        if let Some(v) = lpmake.super_name {
            super_name = v;
        }
        if let Some(v) = lpmake.alignment_offset {
            alignment_offset = v.to_u32("lpmake.alignment_offset")?;
        }
        if let Some(v) = lpmake.virtual_ab {
            virtual_ab = v;
        }
    }

    // Single block device assumed; extra entries are ignored
    let bd = raw
        .block_devices
        .into_iter()
        .next()
        .ok_or_else(|| ConfigError::MissingField {
            field: "block_devices[0]".to_string(),
        })?;
    let block_device = BlockDevice {
        name: required(bd.name, "block_devices[0].name")?,
        size: required(bd.size, "block_devices[0].size")?.to_u64("block_devices[0].size")?,
        block_size: required(bd.block_size, "block_devices[0].block_size")?
            .to_u32("block_devices[0].block_size")?,
        alignment: required(bd.alignment, "block_devices[0].alignment")?
            .to_u32("block_devices[0].alignment")?,
    };

    let mut partitions = Vec::with_capacity(raw.partitions.len());
    for (i, part) in raw.partitions.into_iter().enumerate() {
        let size_field = format!("partitions[{}].size", i);
        partitions.push(Partition {
            name: required(part.name, format!("partitions[{}].name", i))?,
            path: required(part.path, format!("partitions[{}].path", i))?,
            size: required(part.size, size_field.clone())?.to_u64(&size_field)?,
            group_name: required(part.group_name, format!("partitions[{}].group_name", i))?,
            is_dynamic: required(part.is_dynamic, format!("partitions[{}].is_dynamic", i))?,
        });
    }

    let metadata_path = raw
        .super_meta
        .and_then(|m| m.path)
        .filter(|p| !p.is_empty());

    Ok(SuperConfig {
        block_device,
        groups,
        partitions,
        base_path: base_path.to_path_buf(),
        metadata_size,
        metadata_slots,
        super_name,
        alignment_offset,
        virtual_ab,
        nv_id: raw.nv_id.unwrap_or_default(),
        metadata_path,
        layout,
    })
}

/// A/B iff groups for both slot halves are declared.
pub fn detect_layout(groups: &[Group]) -> DeviceLayout {
    let has_a = groups.iter().any(|g| g.name == "main_a");
    let has_b = groups.iter().any(|g| g.name == "main_b");
    if has_a && has_b {
        DeviceLayout::Ab
    } else {
        DeviceLayout::NonAb
    }
}

fn log_summary(config: &SuperConfig) {
    log::debug!("  Block device size: {} bytes", config.block_device.size);
    log::debug!("  Block size: {} bytes", config.block_device.block_size);
    log::debug!("  Alignment: {} bytes", config.block_device.alignment);
    log::debug!("  Metadata size: {} bytes", config.metadata_size);
    log::debug!("  Metadata slots: {}", config.metadata_slots);
    log::debug!("  Super name: {}", config.super_name);
}

/// Serialize a configuration back into the manifest schema.
pub fn manifest_json(config: &SuperConfig) -> serde_json::Value {
    let groups: Vec<serde_json::Value> = config
        .groups
        .iter()
        .map(|g| {
            json!({
                "name": g.name,
                "maximum_size": g.maximum_size.to_string(),
            })
        })
        .collect();

    let partitions: Vec<serde_json::Value> = config
        .partitions
        .iter()
        .map(|p| {
            json!({
                "name": p.name,
                "path": p.path,
                "size": p.size.to_string(),
                "group_name": p.group_name,
                "is_dynamic": p.is_dynamic,
            })
        })
        .collect();

    let mut manifest = json!({
        "nv_id": config.nv_id,
        "lpmake": {
            "metadata_size": config.metadata_size.to_string(),
            "metadata_slots": config.metadata_slots.to_string(),
            "super_name": config.super_name,
            "alignment_offset": config.alignment_offset.to_string(),
            "virtual_ab": config.virtual_ab,
        },
        "block_devices": [{
            "name": config.block_device.name,
            "size": config.block_device.size.to_string(),
            "block_size": config.block_device.block_size.to_string(),
            "alignment": config.block_device.alignment.to_string(),
        }],
        "groups": groups,
        "partitions": partitions,
    });

    if let Some(ref meta) = config.metadata_path {
        manifest["super_meta"] = json!({ "path": meta });
    }
    manifest
}

/// Write a configuration to `path` as pretty-printed manifest JSON.
pub fn export_manifest(config: &SuperConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let content = serde_json::to_string_pretty(&manifest_json(config))?;
    fs::write(path, content)?;
    log::info!("Configuration exported to: {}", path.display());
    Ok(())
}

/// List `.json` manifests directly inside a META directory, sorted.
pub fn find_manifests(meta_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    if !meta_dir.is_dir() {
        return Err(ConfigError::InvalidPath(format!(
            "META folder not found at: {}",
            meta_dir.display()
        )));
    }

    let mut manifests = Vec::new();
    for entry in fs::read_dir(meta_dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().map_or(false, |ext| ext == "json") {
            manifests.push(path);
        }
    }
    manifests.sort();
    Ok(manifests)
}

/// ROM root for a manifest: one level above `META`, else the manifest's own
/// directory.
pub fn rom_root_for(manifest_path: &Path) -> Option<PathBuf> {
    let dir = manifest_path.parent()?;
    if dir.file_name().map_or(false, |n| n == META_DIR_NAME) {
        dir.parent().map(Path::to_path_buf)
    } else {
        Some(dir.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const AB_MANIFEST: &str = r#"{
        "nv_id": "00011010",
        "block_devices": [
            { "name": "super", "size": "9126805504", "block_size": "4096", "alignment": "1048576" }
        ],
        "groups": [
            { "name": "main_a", "maximum_size": "9122611200" },
            { "name": "main_b", "maximum_size": "9122611200" }
        ],
        "partitions": [
            { "name": "system_a", "path": "IMAGES/system.img", "size": "1048576", "group_name": "main_a", "is_dynamic": true },
            { "name": "system_b", "path": "", "size": "0", "group_name": "main_b", "is_dynamic": true }
        ],
        "super_meta": { "path": "META/super_meta.raw" }
    }"#;

    #[test]
    fn test_ab_defaults() {
        let config = parse_manifest(AB_MANIFEST, Path::new("/rom")).unwrap();
        assert_eq!(config.layout, DeviceLayout::Ab);
        assert_eq!(config.metadata_slots, 3);
        assert_eq!(config.metadata_size, 65536);
        assert_eq!(config.super_name, "super");
        assert_eq!(config.alignment_offset, 0);
        assert!(!config.virtual_ab);
        assert_eq!(config.block_device.size, 9126805504);
        assert_eq!(config.block_device.alignment, 1048576);
        assert_eq!(config.partitions.len(), 2);
        assert!(config.partitions[1].is_placeholder());
        assert_eq!(config.metadata_path.as_deref(), Some("META/super_meta.raw"));
        assert_eq!(config.nv_id, "00011010");
    }

    #[test]
    fn test_non_ab_defaults() {
        let json = r#"{
            "block_devices": [{ "name": "super", "size": "100", "block_size": "4096", "alignment": "4096" }],
            "groups": [{ "name": "main" }],
            "partitions": []
        }"#;
        let config = parse_manifest(json, Path::new("/rom")).unwrap();
        assert_eq!(config.layout, DeviceLayout::NonAb);
        assert_eq!(config.metadata_slots, 2);
        assert_eq!(config.groups[0].maximum_size, 0);
    }

    #[test]
    fn test_single_slot_group_is_not_ab() {
        let groups = vec![Group { name: "main_a".into(), maximum_size: 0 }];
        assert_eq!(detect_layout(&groups), DeviceLayout::NonAb);
    }

    #[test]
    fn test_lpmake_block_overrides_topology() {
        let json = r#"{
            "lpmake": { "metadata_size": "131072", "metadata_slots": "2", "super_name": "super_x",
                        "alignment_offset": "4096", "virtual_ab": true },
            "block_devices": [{ "name": "super", "size": "100", "block_size": "4096", "alignment": "4096" }],
            "groups": [{ "name": "main_a" }, { "name": "main_b" }],
            "partitions": []
        }"#;
        let config = parse_manifest(json, Path::new("/rom")).unwrap();
        assert_eq!(config.layout, DeviceLayout::Ab);
        assert_eq!(config.metadata_slots, 2);
        assert_eq!(config.metadata_size, 131072);
        assert_eq!(config.super_name, "super_x");
        assert_eq!(config.alignment_offset, 4096);
        assert!(config.virtual_ab);
    }

    #[test]
    fn test_missing_partition_field_is_parse_error() {
        let json = r#"{
            "block_devices": [{ "name": "super", "size": "100", "block_size": "4096", "alignment": "4096" }],
            "groups": [{ "name": "main" }],
            "partitions": [{ "name": "system", "path": "", "size": "1", "group_name": "main" }]
        }"#;
        let err = parse_manifest(json, Path::new("/rom")).unwrap_err();
        assert!(err.is_parse_error());
        assert!(err.to_string().contains("partitions[0].is_dynamic"));
    }

    #[test]
    fn test_bad_number_is_parse_error() {
        let json = r#"{
            "block_devices": [{ "name": "super", "size": "lots", "block_size": "4096", "alignment": "4096" }]
        }"#;
        let err = parse_manifest(json, Path::new("/rom")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNumber { .. }));
    }

    #[test]
    fn test_malformed_json() {
        let err = parse_manifest("{ not json", Path::new("/rom")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidJson(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let temp = TempDir::new().unwrap();
        let err = load_manifest(&temp.path().join("none.json"), temp.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ManifestNotFound(_)));
    }

    #[test]
    fn test_export_and_reload() {
        let temp = TempDir::new().unwrap();
        let original = parse_manifest(AB_MANIFEST, Path::new("/rom")).unwrap();
        let out = temp.path().join("nested/exported.json");

        export_manifest(&original, &out).unwrap();
        let reloaded = load_manifest(&out, Path::new("/rom")).unwrap();
        assert_eq!(reloaded, original);
    }

    #[test]
    fn test_find_manifests_and_rom_root() {
        let temp = TempDir::new().unwrap();
        let meta = temp.path().join(META_DIR_NAME);
        fs::create_dir_all(&meta).unwrap();
        fs::write(meta.join("b.json"), "{}").unwrap();
        fs::write(meta.join("a.json"), "{}").unwrap();
        fs::write(meta.join("notes.txt"), "").unwrap();

        let found = find_manifests(&meta).unwrap();
        assert_eq!(found, vec![meta.join("a.json"), meta.join("b.json")]);
        assert_eq!(rom_root_for(&found[0]), Some(temp.path().to_path_buf()));
        assert_eq!(
            rom_root_for(Path::new("/configs/x.json")),
            Some(PathBuf::from("/configs"))
        );
    }
}
