#![deny(missing_docs)]
#![allow(clippy::result_large_err)]

//! # sea-dist
//!
//! This is the library at the core of the `sea-dist` CLI. It provisions the
//! prebuilt runtimes and tools a build needs into a tag-addressed cache (the
//! *warm* phase), then turns one entry-point script into a self-contained
//! executable per platform/arch/libc by injecting a blob into a copy of each
//! runtime (the *build* phase).
//!
//! Like the CLI it backs, it logs freely via `tracing`.

use std::collections::BTreeMap;

use camino::Utf8PathBuf;
use sea_dist_schema::{BuildReport, TargetReport, WarmEntry, WarmReport, WarmStatusKind};
use serde::Serialize;
use temp_dir::TempDir;
use tracing::{info, warn};

pub use errors::*;

pub mod blob;
pub mod cache;
pub mod config;
pub mod errors;
pub mod extract;
pub mod inject;
pub mod net;
pub mod orchestrate;
pub mod platform;
pub mod process;
pub mod release;
pub mod sign;
pub mod tools;
pub mod warm;
#[cfg(test)]
mod tests;

use blob::{parse_asset_mapping, BlobBuilder};
use cache::ContentCache;
use config::Config;
use inject::Injector;
use net::ClientSettings;
use orchestrate::{run_builds, BuildOptions, BuildResult, BuildSummary, Toolchain};
use platform::{supported_targets, BuildTarget, TargetSelection};
use release::ReleaseResolver;
use sign::Signing;
use tools::{all_tools, TOOL_INJECTOR, TOOL_RUNTIME, TOOL_SIGNER};
use warm::{count_failures, warm_plan, WarmOutcome, WarmStatus, Warmer};

/// Make a temporary directory that's deleted when the guard is dropped
pub fn create_tmp() -> DistResult<(TempDir, Utf8PathBuf)> {
    let tmp = TempDir::new()?;
    let path = Utf8PathBuf::from_path_buf(tmp.path().to_owned())
        .map_err(|path| DistError::NonUtf8Path { path })?;
    Ok((tmp, path))
}

/// Arguments for `sea-dist build`
#[derive(Debug, Clone, Default)]
pub struct BuildArgs {
    /// The script the executables run
    pub entry: Utf8PathBuf,
    /// `VIRTUAL_PATH=HOST_PATH` files to embed
    pub assets: Vec<String>,
    /// Treat the entry point as a startup snapshot script
    pub snapshot: bool,
    /// An archive to mount as a virtual filesystem
    pub vfs: Option<Utf8PathBuf>,
    /// Overrides the configured output dir
    pub out_dir: Option<Utf8PathBuf>,
    /// Overrides the configured concurrency
    pub jobs: Option<usize>,
    /// Overrides the configured product name
    pub product: Option<String>,
    /// Which targets to build
    pub selection: TargetSelection,
}

fn warm_client_parts(cfg: &Config) -> DistResult<(ReleaseResolver, axoasset::AxoClient)> {
    let settings = ClientSettings::new(cfg.token.clone());
    let api = net::create_api_client(&settings)?;
    let client = net::create_axoasset_client()?;
    let resolver = ReleaseResolver::new(api, &cfg.api_base, &cfg.release_repo)
        .trust_pins(cfg.mirror.is_some());
    Ok((resolver, client))
}

async fn warm(cfg: &Config, targets: &[BuildTarget]) -> DistResult<Vec<WarmOutcome>> {
    let cache = ContentCache::new(cfg.cache_dir.clone());
    let (resolver, client) = warm_client_parts(cfg)?;
    let mut warmer = Warmer::new(cfg, &cache, resolver, &client);
    let plan = warm_plan(targets);
    Ok(warmer.warm_all(&plan).await)
}

/// sea-dist warm -- provision every asset a build of `selection` needs
pub async fn do_warm(cfg: &Config, selection: &TargetSelection) -> DistResult<WarmReport> {
    let targets = selection.select()?;
    let outcomes = warm(cfg, &targets).await?;
    Ok(warm_report(&outcomes))
}

/// Render warm outcomes as a report
pub fn warm_report(outcomes: &[WarmOutcome]) -> WarmReport {
    let assets = outcomes
        .iter()
        .map(|outcome| {
            let (status, tag, binary_path, message) = match &outcome.result {
                Ok(warmed) => (
                    match warmed.status {
                        WarmStatus::Cached => WarmStatusKind::Cached,
                        WarmStatus::Refreshed => WarmStatusKind::Refreshed,
                        WarmStatus::Skipped => WarmStatusKind::Skipped,
                    },
                    warmed.tag.clone(),
                    warmed.binary.as_ref().map(|p| p.to_string()),
                    warmed.reason.clone(),
                ),
                Err(e) => (WarmStatusKind::Failed, None, None, Some(render_error(e))),
            };
            WarmEntry {
                tool: outcome.tool.name.to_owned(),
                key: outcome.key.clone(),
                tag,
                status,
                binary_path,
                message,
            }
        })
        .collect();
    WarmReport {
        sea_dist_version: Some(env!("CARGO_PKG_VERSION").to_owned()),
        assets,
    }
}

/// Find the host's copy of a warmed tool
///
/// A failed required asset fails the whole build: nothing can run without
/// the host tools.
fn host_binary(outcomes: &[WarmOutcome], tool_name: &str) -> DistResult<Option<Utf8PathBuf>> {
    let host_key = BuildTarget::host().map(|t| t.key());
    let outcome = outcomes
        .iter()
        .find(|o| o.tool.name == tool_name && Some(&o.key) == host_key.as_ref());
    match outcome.map(|o| &o.result) {
        Some(Ok(warmed)) => Ok(warmed.binary.clone()),
        Some(Err(_)) => Err(DistError::WarmFailed {
            failed: count_failures(outcomes),
        }),
        None => Ok(None),
    }
}

fn required_host_binary(outcomes: &[WarmOutcome], tool_name: &str) -> DistResult<Utf8PathBuf> {
    host_binary(outcomes, tool_name)?.ok_or_else(|| DistError::NotWarmed {
        tool: tool_name.to_owned(),
        key: BuildTarget::host()
            .map(|t| t.key())
            .unwrap_or_else(|| "host".to_owned()),
    })
}

/// sea-dist build -- warm the cache, then build every selected target
///
/// Only fails outright if the build can't start at all. Per-target failures
/// are in the report; check [`BuildReport::is_success`][].
pub async fn do_build(cfg: &Config, args: &BuildArgs) -> DistResult<BuildReport> {
    let targets = args.selection.select()?;
    let mut assets = BTreeMap::new();
    for spec in &args.assets {
        let (virtual_path, host_path) = parse_asset_mapping(spec)?;
        assets.insert(virtual_path, host_path);
    }
    let product = args
        .product
        .clone()
        .or_else(|| cfg.product.clone())
        .or_else(|| args.entry.file_stem().map(|s| s.to_owned()))
        .unwrap_or_else(|| "app".to_owned());
    let options = BuildOptions {
        product,
        out_dir: args.out_dir.clone().unwrap_or_else(|| cfg.out_dir.clone()),
        assets,
        snapshot: args.snapshot,
        vfs_archive: args.vfs.clone(),
        jobs: args
            .jobs
            .or(cfg.jobs)
            .unwrap_or_else(orchestrate::default_jobs),
    };

    let outcomes = warm(cfg, &targets).await?;
    let failures = count_failures(&outcomes);
    if failures > 0 {
        warn!("{failures} assets failed to warm, targets that need them will fail");
    }
    let toolchain = Toolchain {
        cache: ContentCache::new(cfg.cache_dir.clone()),
        blob_builder: BlobBuilder::new(required_host_binary(&outcomes, TOOL_RUNTIME)?),
        injector: Injector::new(required_host_binary(&outcomes, TOOL_INJECTOR)?),
        signing: Signing::detect(host_binary(&outcomes, TOOL_SIGNER).ok().flatten()),
    };

    info!("building {} targets", targets.len());
    let results = run_builds(&targets, &args.entry, &options, toolchain).await?;
    Ok(build_report(&options.product, &results))
}

/// Render build results as a report
pub fn build_report(product: &str, results: &[BuildResult]) -> BuildReport {
    let summary = BuildSummary::from_results(results);
    let targets = results
        .iter()
        .map(|result| TargetReport {
            target: result.target.key(),
            platform: result.target.platform.to_string(),
            arch: result.target.arch.to_string(),
            libc: result.target.libc.map(|l| l.to_string()),
            success: result.success(),
            output_path: result.output_path().map(|p| p.to_string()),
            failed_stage: result
                .error()
                .and_then(DistError::failed_stage)
                .map(|s| s.to_string()),
            error: result.error().map(render_error),
        })
        .collect();
    BuildReport {
        sea_dist_version: Some(env!("CARGO_PKG_VERSION").to_owned()),
        product: product.to_owned(),
        targets,
        succeeded: summary.succeeded,
        failed: summary.failed,
    }
}

/// An error and every cause under it, on one line
pub fn render_error(err: &DistError) -> String {
    let mut rendered = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

/// sea-dist targets -- the support matrix, narrowed by `selection`
///
/// An empty selection lists everything rather than just the host.
pub fn do_targets(selection: &TargetSelection) -> DistResult<Vec<BuildTarget>> {
    if selection.is_empty() {
        Ok(supported_targets())
    } else {
        selection.select()
    }
}

/// One cache directory, as seen by `sea-dist cache-status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStatusEntry {
    /// The tool
    pub tool: String,
    /// The platform/arch key
    pub key: String,
    /// What the marker says
    pub tag: Option<String>,
    /// The tag that would be used right now, if we looked it up
    pub current: Option<String>,
    /// Whether the entry is usable as-is, if we know the current tag
    pub fresh: Option<bool>,
}

/// sea-dist cache-status -- what's in the cache (read-only)
///
/// With `resolve`, each tool's current tag is looked up so staleness can be
/// reported; lookup failures just leave it unknown.
pub async fn do_cache_status(cfg: &Config, resolve: bool) -> DistResult<Vec<CacheStatusEntry>> {
    let cache = ContentCache::new(cfg.cache_dir.clone());
    let found = cache.scan()?;

    let mut current = BTreeMap::new();
    if resolve {
        let (mut resolver, _client) = warm_client_parts(cfg)?;
        for tool in all_tools() {
            if !found.iter().any(|f| f.tool == tool.name) {
                continue;
            }
            match resolver.resolve(tool, cfg.pinned_tag(tool)).await {
                Ok(release) => {
                    current.insert(tool.name.to_owned(), release.tag);
                }
                Err(e) => warn!("couldn't resolve {}: {e}", tool.name),
            }
        }
    }

    Ok(found
        .into_iter()
        .map(|entry| {
            let current = current.get(&entry.tool).cloned();
            let fresh = current
                .as_ref()
                .map(|cur| entry.tag.as_deref() == Some(cur.as_str()));
            CacheStatusEntry {
                tool: entry.tool,
                key: entry.key,
                tag: entry.tag,
                current,
                fresh,
            }
        })
        .collect())
}
