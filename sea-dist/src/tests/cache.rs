use axoasset::LocalAsset;

use super::mock::scratch_dir;
use crate::cache::{validate_cache, ContentCache, MARKER_FILE_NAME};
use crate::tools::{lookup_asset, AssetLookup, TOOL_RUNTIME};

#[test]
fn marker_must_match_exactly() {
    let (_guard, dir) = scratch_dir();
    let marker = dir.join(MARKER_FILE_NAME);

    assert!(!validate_cache(&marker, "v1"));

    LocalAsset::write_new("v1\n", &marker).unwrap();
    assert!(validate_cache(&marker, "v1"));
    // asking twice doesn't change anything
    assert!(validate_cache(&marker, "v1"));

    for other in ["v", "v1.0", "V1", "v12", ""] {
        assert!(!validate_cache(&marker, other), "{other:?} matched");
    }

    LocalAsset::write_new("  v2  ", &marker).unwrap();
    assert!(validate_cache(&marker, "v2"));
    assert!(!validate_cache(&marker, "v1"));
}

#[test]
fn unreadable_marker_is_stale() {
    let (_guard, dir) = scratch_dir();
    // a directory where the marker should be
    let marker = dir.join(MARKER_FILE_NAME);
    LocalAsset::create_dir_all(&marker).unwrap();
    assert!(!validate_cache(&marker, "v1"));
}

#[test]
fn download_dir_is_just_path_math() {
    let (_guard, dir) = scratch_dir();
    let cache = ContentCache::new(dir.join("cache"));
    let path = cache.get_download_dir("binject", "linux-x64-musl");
    assert_eq!(path, dir.join("cache").join("binject").join("linux-x64-musl"));
    assert!(!path.exists());

    let made = cache.ensure_download_dir("binject", "linux-x64-musl").unwrap();
    assert_eq!(made, path);
    assert!(path.is_dir());
}

#[test]
fn entry_is_valid_only_with_asset_and_marker() {
    let (_guard, dir) = scratch_dir();
    let cache = ContentCache::new(&dir);
    let AssetLookup::Supported(asset) = lookup_asset(TOOL_RUNTIME, "darwin-arm64") else {
        panic!("runtime should support darwin-arm64");
    };
    let entry = cache.entry(asset, "smol-runtime-1");
    assert_eq!(
        entry.asset_path,
        dir.join("smol-runtime/darwin-arm64/smol-runtime-darwin-arm64.tar.gz")
    );
    assert!(!entry.is_valid());

    cache
        .ensure_download_dir(asset.tool_name, &asset.platform_arch_key)
        .unwrap();
    cache.write_marker(&entry).unwrap();
    // marker without the asset isn't enough
    assert!(!entry.is_valid());

    LocalAsset::write_new("archive", &entry.asset_path).unwrap();
    assert!(entry.is_valid());
    assert!(!cache.entry(asset, "smol-runtime-2").is_valid());

    assert_eq!(
        cache.installed_binary(asset),
        dir.join("smol-runtime/darwin-arm64/bin/node")
    );
}

#[test]
fn scan_lists_entries_in_order() {
    let (_guard, dir) = scratch_dir();
    let cache = ContentCache::new(dir.join("nothing-here"));
    assert!(cache.scan().unwrap().is_empty());

    let cache = ContentCache::new(&dir);
    LocalAsset::write_new_all("t2", dir.join("smol-runtime/linux-x64").join(MARKER_FILE_NAME))
        .unwrap();
    LocalAsset::create_dir_all(dir.join("binject/linux-x64")).unwrap();
    LocalAsset::write_new_all("t1\n", dir.join("binject/darwin-arm64").join(MARKER_FILE_NAME))
        .unwrap();

    let found = cache
        .scan()
        .unwrap()
        .into_iter()
        .map(|c| format!("{}/{} {:?}", c.tool, c.key, c.tag))
        .collect::<Vec<_>>();
    assert_eq!(
        found,
        [
            "binject/darwin-arm64 Some(\"t1\")",
            "binject/linux-x64 None",
            "smol-runtime/linux-x64 Some(\"t2\")",
        ]
    );
}
