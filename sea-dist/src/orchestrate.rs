//! Driving every build target through its pipeline at once
//!
//! Each target gets its own pipeline on tokio's blocking pool. A failing (or
//! panicking) pipeline only ever affects its own [`BuildResult`][]; everyone
//! else runs to completion and the results come back in target order.

use std::collections::BTreeMap;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use sea_dist_schema::BuildReport;
use tokio::sync::Semaphore;
use tracing::{error, info};

use crate::blob::{BlobBuilder, BlobConfig};
use crate::cache::ContentCache;
use crate::errors::{DistError, DistResult};
use crate::inject::{InjectOptions, Injector, PipelineStage};
use crate::platform::BuildTarget;
use crate::sign::Signing;
use crate::tools::{lookup_target_asset, AssetLookup, TOOL_RUNTIME};

/// Builds one target, start to finish
///
/// Implementations are shared between every target's pipeline, so they only
/// get `&self`.
pub trait TargetPipeline: Send + Sync + 'static {
    /// Produce the executable for `target`, returning where it was written
    fn build(&self, target: &BuildTarget) -> DistResult<Utf8PathBuf>;
}

/// How one target went
#[derive(Debug)]
pub struct BuildResult {
    /// The target
    pub target: BuildTarget,
    /// The executable, or why there isn't one
    pub outcome: Result<Utf8PathBuf, DistError>,
}

impl BuildResult {
    /// Did it work?
    pub fn success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// The executable, if it worked
    pub fn output_path(&self) -> Option<&Utf8Path> {
        self.outcome.as_ref().ok().map(|p| p.as_path())
    }

    /// The error, if it didn't
    pub fn error(&self) -> Option<&DistError> {
        self.outcome.as_ref().err()
    }
}

/// Counts of what worked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BuildSummary {
    /// Targets that produced an executable
    pub succeeded: usize,
    /// Targets that didn't
    pub failed: usize,
}

impl BuildSummary {
    /// Tally up some results
    pub fn from_results(results: &[BuildResult]) -> Self {
        let succeeded = results.iter().filter(|r| r.success()).count();
        Self {
            succeeded,
            failed: results.len() - succeeded,
        }
    }

    /// Turn the tally into an overall pass/fail
    pub fn into_result(self) -> DistResult<()> {
        if self.failed > 0 {
            Err(DistError::AggregateBuildFailure {
                failed: self.failed,
                total: self.succeeded + self.failed,
            })
        } else {
            Ok(())
        }
    }
}

impl From<&BuildReport> for BuildSummary {
    fn from(report: &BuildReport) -> Self {
        Self {
            succeeded: report.succeeded,
            failed: report.failed,
        }
    }
}

/// The default pipeline concurrency: one per cpu
pub fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Run `pipeline` for every target, at most `jobs` at a time (0 = no limit)
///
/// Never fails as a whole: every target's outcome, including panics, ends up
/// in its own result.
pub async fn run_pipelines<P: TargetPipeline>(
    targets: &[BuildTarget],
    pipeline: Arc<P>,
    jobs: usize,
) -> Vec<BuildResult> {
    let limit = (jobs > 0).then(|| Arc::new(Semaphore::new(jobs)));
    let handles = targets
        .iter()
        .map(|&target| {
            let pipeline = pipeline.clone();
            let limit = limit.clone();
            tokio::spawn(async move {
                let _permit = match limit {
                    Some(limit) => limit.acquire_owned().await.ok(),
                    None => None,
                };
                tokio::task::spawn_blocking(move || pipeline.build(&target)).await
            })
        })
        .collect::<Vec<_>>();

    let mut results = Vec::with_capacity(targets.len());
    for (&target, handle) in targets.iter().zip(handles) {
        let outcome = match handle.await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) | Err(_) => Err(DistError::PipelinePanicked {
                target: target.to_string(),
            }),
        };
        match &outcome {
            Ok(path) => info!("{target}: wrote {path}"),
            Err(e) => error!("{target}: {e}"),
        }
        results.push(BuildResult { target, outcome });
    }
    results
}

/// What to build, shared by every target
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Base name of every executable
    pub product: String,
    /// Where executables go
    pub out_dir: Utf8PathBuf,
    /// Files to embed, by virtual path
    pub assets: BTreeMap<String, Utf8PathBuf>,
    /// Treat the entry point as a startup snapshot script
    pub snapshot: bool,
    /// An archive to inject as a virtual filesystem
    pub vfs_archive: Option<Utf8PathBuf>,
    /// How many targets to build at once (0 = all of them)
    pub jobs: usize,
}

impl BuildOptions {
    /// Where `target`'s executable goes
    ///
    /// Non-default libcs get their own subdirectory so the file name can stay
    /// `<product>-<platform>-<arch>`.
    pub fn output_path(&self, target: &BuildTarget) -> Utf8PathBuf {
        let file_name = target.output_file_name(&self.product);
        match target.libc {
            Some(libc) if target.has_nondefault_libc() => {
                self.out_dir.join(libc.as_str()).join(file_name)
            }
            _ => self.out_dir.join(file_name),
        }
    }
}

/// The external tools a build needs, already provisioned
#[derive(Debug, Clone)]
pub struct Toolchain {
    /// Where the per-target runtimes were warmed
    pub cache: ContentCache,
    /// Compiles blobs
    pub blob_builder: BlobBuilder,
    /// Injects blobs
    pub injector: Injector,
    /// Signs macOS outputs
    pub signing: Signing,
}

/// The real pipeline: blob, copy, inject, sign
#[derive(Debug)]
pub struct SeaPipeline {
    entry_point: Utf8PathBuf,
    options: BuildOptions,
    toolchain: Toolchain,
    work_dir: Utf8PathBuf,
}

impl SeaPipeline {
    /// Make a pipeline; intermediate files go in per-target dirs under `work_dir`
    pub fn new(
        entry_point: Utf8PathBuf,
        options: BuildOptions,
        toolchain: Toolchain,
        work_dir: Utf8PathBuf,
    ) -> Self {
        Self {
            entry_point,
            options,
            toolchain,
            work_dir,
        }
    }

    fn base_binary(&self, target: &BuildTarget) -> DistResult<Utf8PathBuf> {
        let AssetLookup::Supported(asset) = lookup_target_asset(TOOL_RUNTIME, target) else {
            return Err(DistError::UnsupportedTarget {
                tool: TOOL_RUNTIME.to_owned(),
                key: target.key(),
            });
        };
        let base = self.toolchain.cache.installed_binary(asset);
        if !base.is_file() {
            return Err(DistError::NotWarmed {
                tool: TOOL_RUNTIME.to_owned(),
                key: target.key(),
            });
        }
        Ok(base)
    }
}

/// Run one stage, attributing any failure to it
fn stage<T>(
    target: &BuildTarget,
    stage: PipelineStage,
    step: impl FnOnce() -> DistResult<T>,
) -> DistResult<T> {
    let value = step().map_err(|cause| DistError::StageFailed {
        target: target.to_string(),
        stage,
        cause: Box::new(cause),
    })?;
    info!("{target}: {stage}");
    Ok(value)
}

impl TargetPipeline for SeaPipeline {
    fn build(&self, target: &BuildTarget) -> DistResult<Utf8PathBuf> {
        let output = self.options.output_path(target);
        let target_dir = self.work_dir.join(target.key());

        let base = stage(target, PipelineStage::Prepared, || {
            axoasset::LocalAsset::create_dir_all(&target_dir)?;
            self.base_binary(target)
        })?;

        let blob = stage(target, PipelineStage::BlobBuilt, || {
            let config = BlobConfig {
                entry_point: self.entry_point.clone(),
                assets: self.options.assets.clone(),
                output_blob_path: target_dir.join(format!("{}.blob", self.options.product)),
                snapshot_enabled: self.options.snapshot,
            };
            self.toolchain.blob_builder.build_blob(&config, target)
        })?;

        stage(target, PipelineStage::BaseCopied, || {
            self.toolchain.injector.copy_base(&base, &output)?;
            self.toolchain.signing.strip(&output, target)
        })?;

        stage(target, PipelineStage::Injected, || {
            let options = InjectOptions {
                vfs_archive: self.options.vfs_archive.clone(),
            };
            self.toolchain
                .injector
                .inject(&blob, &output, target, &options)
        })?;

        if target.platform.requires_signing() {
            stage(target, PipelineStage::Signed, || {
                self.toolchain.signing.sign(&output, target).map(|_| ())
            })?;
        }

        info!("{target}: {}", PipelineStage::Done);
        Ok(output)
    }
}

/// Build every target from `entry_point`
///
/// Only reads from the cache; warming has to have happened already.
pub async fn run_builds(
    targets: &[BuildTarget],
    entry_point: &Utf8Path,
    options: &BuildOptions,
    toolchain: Toolchain,
) -> DistResult<Vec<BuildResult>> {
    let (_work, work_dir) = crate::create_tmp()?;
    let pipeline = Arc::new(SeaPipeline::new(
        entry_point.to_owned(),
        options.clone(),
        toolchain,
        work_dir,
    ));
    Ok(run_pipelines(targets, pipeline, options.jobs).await)
}
