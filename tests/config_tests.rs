//! Manifest loading, validation and size planning against a ROM tree on disk.

use std::fs;
use std::path::{Path, PathBuf};
use super_compactor::config::loader::{find_manifests, load_manifest, rom_root_for};
use super_compactor::config::{validator, ConfigSession};
use super_compactor::models::DeviceLayout;
use super_compactor::planner::recommend;
use super_compactor::ValidationIssue;
use tempfile::TempDir;

const AB_MANIFEST: &str = r#"{
    "nv_id": "0",
    "block_devices": [
        { "name": "super", "size": "65536000", "block_size": "4096", "alignment": "4096" }
    ],
    "groups": [
        { "name": "main_a", "maximum_size": "32000000" },
        { "name": "main_b", "maximum_size": "32000000" }
    ],
    "partitions": [
        { "name": "system_a", "path": "IMAGES/system.img", "size": "8192", "group_name": "main_a", "is_dynamic": true },
        { "name": "system_b", "path": "IMAGES/system_b.img", "size": "8192", "group_name": "main_b", "is_dynamic": true },
        { "name": "vendor_a", "path": "IMAGES/vendor.img", "size": "8192", "group_name": "main_a", "is_dynamic": true },
        { "name": "vendor_b", "path": "", "size": "0", "group_name": "main_b", "is_dynamic": true }
    ]
}"#;

/// ROM export with META/super_def.json and only the slot A images present.
fn ab_rom() -> (TempDir, PathBuf) {
    let rom = TempDir::new().expect("Failed to create temp dir");
    let meta = rom.path().join("META");
    let images = rom.path().join("IMAGES");
    fs::create_dir_all(&meta).unwrap();
    fs::create_dir_all(&images).unwrap();
    fs::write(images.join("system.img"), vec![0u8; 8192]).unwrap();
    fs::write(images.join("vendor.img"), vec![0u8; 4097]).unwrap();

    let manifest = meta.join("super_def.json");
    fs::write(&manifest, AB_MANIFEST).unwrap();
    (rom, manifest)
}

#[test]
fn test_ab_manifest_loads_with_three_slots() {
    let (rom, manifest) = ab_rom();
    let base = rom_root_for(&manifest).unwrap();
    assert_eq!(base, rom.path());

    let config = load_manifest(&manifest, &base).unwrap();
    assert_eq!(config.layout, DeviceLayout::Ab);
    assert_eq!(config.metadata_slots, 3);
    assert_eq!(config.partitions.len(), 4);
    assert!(config.partitions[3].is_placeholder());
}

#[test]
fn test_missing_b_slot_only_warns() {
    let (rom, manifest) = ab_rom();
    let config = load_manifest(&manifest, rom.path()).unwrap();

    let report = validator::validate(&config);
    assert!(report.success(), "errors: {:?}", report.error_messages());
    assert!(report
        .warnings
        .iter()
        .any(|w| matches!(w, ValidationIssue::SingleSlotOnly { partition, .. } if partition == "system_b")));
}

#[test]
fn test_missing_both_slots_fails() {
    let (rom, manifest) = ab_rom();
    fs::remove_file(rom.path().join("IMAGES/system.img")).unwrap();
    let config = load_manifest(&manifest, rom.path()).unwrap();

    let report = validator::validate(&config);
    assert!(!report.success());
    assert_eq!(
        report
            .errors
            .iter()
            .filter(|e| matches!(e, ValidationIssue::BothSlotsMissing { .. }))
            .count(),
        2
    );
}

#[test]
fn test_recommendation_for_unaligned_image() {
    let (rom, manifest) = ab_rom();
    let config = load_manifest(&manifest, rom.path()).unwrap();
    let vendor = &config.partitions[2];

    let rec = recommend(vendor, &config.base_path, config.block_device.alignment as u64);
    assert_eq!(rec.actual_file_size, 4097);
    assert_eq!(rec.recommended_size, 8192);
    assert!(!rec.needs_resize);
}

#[test]
fn test_redirected_partition_round_trips_through_save() {
    let (rom, manifest) = ab_rom();
    let elsewhere = TempDir::new().unwrap();
    let image = elsewhere.path().join("system_b.img");
    fs::write(&image, vec![0u8; 8192]).unwrap();

    let mut session = ConfigSession::new();
    session.load(&manifest).unwrap();
    session
        .update_partition_path(1, image.to_string_lossy().into_owned())
        .unwrap();
    assert!(session.has_unsaved_changes());

    let saved = session.save_modified_config_in(elsewhere.path()).unwrap();
    assert!(!session.has_unsaved_changes());

    let reloaded = load_manifest(&saved, rom.path()).unwrap();
    assert_eq!(reloaded.partitions[1].path, image.to_string_lossy());
    let report = validator::validate(&reloaded);
    assert!(report.warnings.iter().all(|w| !w.is_missing_file()));
}

#[test]
fn test_find_manifests_lists_json_only() {
    let (rom, _manifest) = ab_rom();
    let meta = rom.path().join("META");
    fs::write(meta.join("notes.txt"), "x").unwrap();
    fs::write(meta.join("another.json"), "{}").unwrap();

    let names: Vec<String> = find_manifests(&meta)
        .unwrap()
        .iter()
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect();
    assert_eq!(names, vec!["another.json", "super_def.json"]);
}

#[test]
fn test_missing_manifest_is_reported() {
    let err = load_manifest(Path::new("/no/such/META/super.json"), Path::new("/no/such")).unwrap_err();
    assert!(!err.is_parse_error());
}
