//! The on-disk cache of downloaded tool archives
//!
//! Layout: `<root>/<tool>/<platform-arch-key>/<asset file>` with a sibling
//! `.tag` marker holding the raw release tag the asset came from. An entry is
//! only ever trusted when that marker matches the tag we resolved this run;
//! anything else (missing, unreadable, different) means "refresh".

use std::time::SystemTime;

use axoasset::{AxoClient, LocalAsset};
use camino::{Utf8Path, Utf8PathBuf};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::errors::{DistError, DistResult};
use crate::release::classify_status;
use crate::tools::AssetDescriptor;

/// Name of the marker file next to each cached asset
pub const MARKER_FILE_NAME: &str = ".tag";
/// Subdirectory of each cache entry that holds the extracted binary
pub const BIN_DIR_NAME: &str = "bin";

/// Is the marker at `marker_path` exactly `expected_tag`?
///
/// Fails closed: a missing marker, an unreadable marker, or any difference
/// after trimming surrounding whitespace all return false.
pub fn validate_cache(marker_path: &Utf8Path, expected_tag: &str) -> bool {
    match LocalAsset::load_string(marker_path) {
        Ok(contents) => contents.trim() == expected_tag,
        Err(e) => {
            debug!("treating {marker_path} as stale: {e}");
            false
        }
    }
}

/// One cached asset, for a specific tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Where the downloaded archive lives
    pub asset_path: Utf8PathBuf,
    /// Where the tag marker lives
    pub marker_path: Utf8PathBuf,
    /// The tag this entry should hold
    pub tag: String,
}

impl CacheEntry {
    /// Can this entry be used as-is?
    pub fn is_valid(&self) -> bool {
        self.asset_path.is_file() && validate_cache(&self.marker_path, &self.tag)
    }
}

/// What `cache-status` reports for a directory it found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedAsset {
    /// The tool
    pub tool: String,
    /// The platform/arch key
    pub key: String,
    /// Whatever the marker says, if it's readable
    pub tag: Option<String>,
}

/// The root of the asset cache
#[derive(Debug, Clone)]
pub struct ContentCache {
    root: Utf8PathBuf,
}

impl ContentCache {
    /// A cache rooted at `root` (which needn't exist yet)
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// The directory for one tool on one platform
    ///
    /// This is just path math, use [`ContentCache::ensure_download_dir`][]
    /// before writing anything there.
    pub fn get_download_dir(&self, tool_name: &str, platform_arch_key: &str) -> Utf8PathBuf {
        self.root.join(tool_name).join(platform_arch_key)
    }

    /// Create the directory for one tool on one platform
    pub fn ensure_download_dir(
        &self,
        tool_name: &str,
        platform_arch_key: &str,
    ) -> DistResult<Utf8PathBuf> {
        let dir = self.get_download_dir(tool_name, platform_arch_key);
        LocalAsset::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// The cache entry an asset would occupy for a given tag
    pub fn entry(&self, asset: &AssetDescriptor, tag: &str) -> CacheEntry {
        let dir = self.get_download_dir(asset.tool_name, &asset.platform_arch_key);
        CacheEntry {
            asset_path: dir.join(&asset.asset_file_name),
            marker_path: dir.join(MARKER_FILE_NAME),
            tag: tag.to_owned(),
        }
    }

    /// Where the extracted binary of an asset lives
    pub fn bin_dir(&self, asset: &AssetDescriptor) -> Utf8PathBuf {
        self.get_download_dir(asset.tool_name, &asset.platform_arch_key)
            .join(BIN_DIR_NAME)
    }

    /// The path of the extracted, ready to run binary of an asset
    pub fn installed_binary(&self, asset: &AssetDescriptor) -> Utf8PathBuf {
        self.bin_dir(asset).join(asset.binary_file_name())
    }

    /// Record that an entry now holds its tag
    ///
    /// Only call this once the asset itself is completely in place.
    pub fn write_marker(&self, entry: &CacheEntry) -> DistResult<()> {
        LocalAsset::write_new(&entry.tag, &entry.marker_path)?;
        Ok(())
    }

    /// Forget which tag an entry holds
    ///
    /// Call this before replacing the asset, so a half-finished refresh never
    /// leaves an old tag next to a new archive.
    pub fn clear_marker(&self, entry: &CacheEntry) -> DistResult<()> {
        if entry.marker_path.exists() {
            LocalAsset::remove_file(&entry.marker_path)?;
        }
        Ok(())
    }

    /// Every tool/key directory in the cache, and what its marker says
    pub fn scan(&self) -> DistResult<Vec<CachedAsset>> {
        let mut found = vec![];
        if !self.root.is_dir() {
            return Ok(found);
        }
        for tool in sorted_subdirs(&self.root)? {
            for key in sorted_subdirs(&self.root.join(&tool))? {
                let marker = self.root.join(&tool).join(&key).join(MARKER_FILE_NAME);
                let tag = LocalAsset::load_string(&marker)
                    .ok()
                    .map(|t| t.trim().to_owned());
                found.push(CachedAsset { tool: tool.clone(), key, tag });
            }
        }
        Ok(found)
    }
}

fn sorted_subdirs(dir: &Utf8Path) -> DistResult<Vec<String>> {
    let mut names = vec![];
    for entry in dir.read_dir_utf8()? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            names.push(entry.file_name().to_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// Download `url` to `dest_path`
///
/// The bytes land in a temporary sibling first and are renamed into place,
/// so `dest_path` is never observed half-written. When `expected_sha256` is
/// given, a mismatch is an error and nothing is moved into place. Returns the
/// sha256 of what was downloaded.
pub async fn download(
    client: &AxoClient,
    url: &str,
    dest_path: &Utf8Path,
    expected_sha256: Option<&str>,
) -> DistResult<String> {
    info!("downloading {url}");
    let response = client.get(url).await?;
    if let Some(err) = classify_status(url, response.status(), response.headers(), SystemTime::now())
    {
        return Err(err);
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|details| DistError::Network {
            url: url.to_owned(),
            details,
        })?
        .to_vec();
    write_atomically(bytes, dest_path, expected_sha256)
}

fn write_atomically(
    bytes: Vec<u8>,
    dest_path: &Utf8Path,
    expected_sha256: Option<&str>,
) -> DistResult<String> {
    let digest = format!("{:x}", Sha256::digest(&bytes));
    if let Some(expected) = expected_sha256 {
        if !digest.eq_ignore_ascii_case(expected.trim()) {
            return Err(DistError::ChecksumMismatch {
                path: dest_path.to_owned(),
                expected: expected.trim().to_owned(),
                actual: digest,
            });
        }
    } else {
        info!("{dest_path} has sha256 {digest} (not pinned)");
    }

    let dir = dest_path.parent().unwrap_or_else(|| Utf8Path::new("."));
    LocalAsset::create_dir_all(dir)?;
    let file_name = dest_path.file_name().unwrap_or("download");
    let partial = dir.join(format!(".{file_name}.partial-{}", std::process::id()));
    LocalAsset::new(&partial, bytes)?.write_to_dir(dir)?;
    if let Err(e) = std::fs::rename(&partial, dest_path) {
        let _ = LocalAsset::remove_file(&partial);
        return Err(e.into());
    }
    Ok(digest)
}
