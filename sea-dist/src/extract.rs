//! Unpacking cached archives into ready-to-run binaries

use axoasset::LocalAsset;
use axoprocess::Cmd;
use camino::{Utf8Path, Utf8PathBuf};
use tracing::info;

use crate::errors::{DistError, DistResult};
use crate::platform::Platform;
use crate::process::run_tool;
use crate::create_tmp;

/// Marker written into an output dir recording which tag it was extracted from
pub const EXTRACTED_MARKER_FILE_NAME: &str = ".extracted-tag";

/// What [`extract`][] did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    /// The output dir already held this tag's binary
    UpToDate(Utf8PathBuf),
    /// The archive was unpacked
    Extracted(Utf8PathBuf),
}

impl Extraction {
    /// The path of the ready-to-run binary
    pub fn binary(&self) -> &Utf8Path {
        match self {
            Extraction::UpToDate(path) | Extraction::Extracted(path) => path,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveFormat {
    Tar,
    Zip,
}

fn archive_format(archive: &Utf8Path) -> DistResult<ArchiveFormat> {
    let name = archive.file_name().unwrap_or_default();
    if name.ends_with(".tar.gz") || name.ends_with(".tgz") || name.ends_with(".tar.xz") {
        Ok(ArchiveFormat::Tar)
    } else if name.ends_with(".zip") {
        Ok(ArchiveFormat::Zip)
    } else {
        Err(DistError::UnknownArchiveFormat {
            path: archive.to_owned(),
        })
    }
}

/// Extract `expected_binary` out of `archive` into `output_dir`
///
/// The archive is unpacked into a temporary staging dir (deleted however this
/// returns), searched for the binary, and only the binary is copied out. If
/// `output_dir` was already populated from the same `tag`, nothing happens.
pub fn extract(
    archive: &Utf8Path,
    output_dir: &Utf8Path,
    expected_binary: &str,
    platform: Platform,
    tag: &str,
) -> DistResult<Extraction> {
    let binary_name = format!("{expected_binary}{}", platform.exe_suffix());
    let dest = output_dir.join(&binary_name);
    let marker = output_dir.join(EXTRACTED_MARKER_FILE_NAME);

    if dest.is_file() && crate::cache::validate_cache(&marker, tag) {
        info!("{dest} already extracted from {tag}");
        return Ok(Extraction::UpToDate(dest));
    }
    if !archive.is_file() {
        return Err(DistError::ArchiveMissing {
            path: archive.to_owned(),
        });
    }
    let format = archive_format(archive)?;

    let (_staging, staging_dir) = create_tmp()?;
    unpack(archive, &staging_dir, format)?;

    let Some(found) = find_file(&staging_dir, &binary_name)? else {
        return Err(DistError::BinaryNotInArchive {
            archive: archive.to_owned(),
            binary: binary_name,
        });
    };

    LocalAsset::create_dir_all(output_dir)?;
    // Clear the old marker first so a half-finished copy is never mistaken
    // for an up to date one
    if marker.exists() {
        LocalAsset::remove_file(&marker)?;
    }
    LocalAsset::copy_file_to_file(&found, &dest)?;
    if platform != Platform::Win32 {
        make_executable(&dest)?;
    }
    LocalAsset::write_new(tag, &marker)?;
    info!("extracted {binary_name} from {archive}");
    Ok(Extraction::Extracted(dest))
}

fn unpack(archive: &Utf8Path, staging: &Utf8Path, format: ArchiveFormat) -> DistResult<()> {
    let mut cmd = match format {
        ArchiveFormat::Tar => {
            let mut cmd = Cmd::new("tar", format!("extract {archive}"));
            cmd.arg("-xf").arg(archive).arg("-C").arg(staging);
            cmd
        }
        ArchiveFormat::Zip => {
            let mut cmd = Cmd::new("unzip", format!("extract {archive}"));
            cmd.arg("-o").arg("-q").arg(archive).arg("-d").arg(staging);
            cmd
        }
    };
    let output = run_tool(&mut cmd)?;
    if !output.success() {
        return Err(DistError::ExtractionFailed {
            archive: archive.to_owned(),
            exit: output.exit_description(),
            stderr: output.diagnostics(),
        });
    }
    Ok(())
}

/// Breadth-first search for a file named `name`, so the shallowest match wins
fn find_file(root: &Utf8Path, name: &str) -> DistResult<Option<Utf8PathBuf>> {
    let mut queue = std::collections::VecDeque::from([root.to_owned()]);
    while let Some(dir) = queue.pop_front() {
        let mut subdirs = vec![];
        for entry in dir.read_dir_utf8()? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                subdirs.push(entry.path().to_owned());
            } else if entry.file_name() == name {
                return Ok(Some(entry.path().to_owned()));
            }
        }
        subdirs.sort();
        queue.extend(subdirs);
    }
    Ok(None)
}

#[cfg(unix)]
fn make_executable(path: &Utf8Path) -> DistResult<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Utf8Path) -> DistResult<()> {
    Ok(())
}
