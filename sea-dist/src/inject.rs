//! Patching a blob into a copy of the base runtime binary

use std::fmt;

use axoasset::LocalAsset;
use axoprocess::Cmd;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::{DistError, DistResult};
use crate::platform::{BuildTarget, Platform};
use crate::process::run_tool;

/// The fuse the runtime checks to decide whether it carries a blob
pub const SENTINEL_FUSE: &str = "NODE_SEA_FUSE_fce680ab2cc467b6e072b8b5df1996b2";
/// Mach-O segment the blob lives in on macOS
pub const MACHO_SEGMENT_NAME: &str = "NODE_SEA";

/// How far a target's pipeline got
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineStage {
    /// Output paths are known, nothing has run
    Prepared,
    /// The blob exists
    BlobBuilt,
    /// The base runtime was copied to the output path
    BaseCopied,
    /// The blob is inside the output
    Injected,
    /// The output carries a signature
    Signed,
    /// The output is ready to ship
    Done,
}

impl PipelineStage {
    /// The name used in logs and reports
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStage::Prepared => "prepared",
            PipelineStage::BlobBuilt => "blob-built",
            PipelineStage::BaseCopied => "base-copied",
            PipelineStage::Injected => "injected",
            PipelineStage::Signed => "signed",
            PipelineStage::Done => "done",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extra payloads to inject alongside the blob
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InjectOptions {
    /// An archive to mount as a virtual filesystem
    pub vfs_archive: Option<Utf8PathBuf>,
}

/// Drives the external injection tool
#[derive(Debug, Clone)]
pub struct Injector {
    tool: Utf8PathBuf,
}

impl Injector {
    /// Use the injector binary at `tool`
    pub fn new(tool: impl Into<Utf8PathBuf>) -> Self {
        Self { tool: tool.into() }
    }

    /// Copy the base runtime to where the executable will be written
    pub fn copy_base(&self, base_binary: &Utf8Path, output: &Utf8Path) -> DistResult<()> {
        if let Some(parent) = output.parent() {
            LocalAsset::create_dir_all(parent)?;
        }
        if output.exists() {
            LocalAsset::remove_file(output)?;
        }
        LocalAsset::copy_file_to_file(base_binary, output)?;
        make_writable(output)?;
        Ok(())
    }

    /// Inject `blob` into `output` (which already holds a copy of the base runtime)
    pub fn inject(
        &self,
        blob: &Utf8Path,
        output: &Utf8Path,
        target: &BuildTarget,
        options: &InjectOptions,
    ) -> DistResult<()> {
        let mut cmd = Cmd::new(&self.tool, format!("inject blob into {output}"));
        cmd.arg("inject");
        cmd.arg("--executable").arg(output);
        cmd.arg("--output").arg(output);
        cmd.arg("--sea").arg(blob);
        cmd.arg("--sentinel-fuse").arg(SENTINEL_FUSE);
        if target.platform == Platform::Darwin {
            cmd.arg("--macho-segment-name").arg(MACHO_SEGMENT_NAME);
        }
        if let Some(vfs) = &options.vfs_archive {
            cmd.arg("--vfs").arg(vfs);
        }
        let out = run_tool(&mut cmd)?;
        if !out.success() {
            return Err(DistError::Injection {
                output: output.to_owned(),
                exit: out.exit_description(),
                stderr: out.diagnostics(),
            });
        }
        info!("injected {blob} into {output}");
        Ok(())
    }
}

#[cfg(unix)]
fn make_writable(path: &Utf8Path) -> DistResult<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[cfg(not(unix))]
fn make_writable(path: &Utf8Path) -> DistResult<()> {
    let mut perms = std::fs::metadata(path)?.permissions();
    #[allow(clippy::permissions_set_readonly_false)]
    perms.set_readonly(false);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names() {
        let names = [
            PipelineStage::Prepared,
            PipelineStage::BlobBuilt,
            PipelineStage::BaseCopied,
            PipelineStage::Injected,
            PipelineStage::Signed,
            PipelineStage::Done,
        ]
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>();
        assert_eq!(
            names,
            ["prepared", "blob-built", "base-copied", "injected", "signed", "done"]
        );
        assert_eq!(
            serde_json::to_string(&PipelineStage::BlobBuilt).unwrap(),
            "\"blob-built\""
        );
    }
}
