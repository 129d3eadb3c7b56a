//! The warm phase: make sure every asset a build needs is cached and extracted
//!
//! Strictly sequential. Each asset is handled on its own, so one failing
//! download doesn't stop the rest from being provisioned.

use axoasset::AxoClient;
use camino::Utf8PathBuf;
use tracing::{info, warn};

use crate::cache::{download, ContentCache};
use crate::config::Config;
use crate::errors::{DistError, DistResult};
use crate::extract::extract;
use crate::platform::BuildTarget;
use crate::release::ReleaseResolver;
use crate::tools::{all_tools, lookup_asset, AssetLookup, ToolScope, ToolSpec};

/// What warming did for one asset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmStatus {
    /// Already cached at the resolved tag
    Cached,
    /// Downloaded (or re-downloaded)
    Refreshed,
    /// Optional, and not available
    Skipped,
}

/// A ready (or skipped) asset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warmed {
    /// What happened
    pub status: WarmStatus,
    /// The tag it was resolved against, if we got that far
    pub tag: Option<String>,
    /// The extracted binary, unless skipped
    pub binary: Option<Utf8PathBuf>,
    /// Why it was skipped
    pub reason: Option<String>,
}

impl Warmed {
    fn skipped(tag: Option<String>, reason: String) -> Self {
        Self {
            status: WarmStatus::Skipped,
            tag,
            binary: None,
            reason: Some(reason),
        }
    }
}

/// One line of the warm phase's outcome
#[derive(Debug)]
pub struct WarmOutcome {
    /// The tool
    pub tool: &'static ToolSpec,
    /// The platform/arch key
    pub key: String,
    /// What happened
    pub result: DistResult<Warmed>,
}

/// Every (tool, key) pair needed to build `targets` on this machine
///
/// Per-target tools are needed for each target plus the host (the host's
/// runtime compiles the blobs); host tools only for the host.
pub fn warm_plan(targets: &[BuildTarget]) -> Vec<(&'static ToolSpec, Option<String>)> {
    let host = BuildTarget::host();
    let mut plan: Vec<(&'static ToolSpec, Option<String>)> = vec![];
    for tool in all_tools() {
        let keys = match tool.scope {
            ToolScope::PerTarget => targets
                .iter()
                .chain(host.as_ref())
                .map(|t| Some(t.key()))
                .collect::<Vec<_>>(),
            ToolScope::Host => vec![host.map(|t| t.key())],
        };
        for key in keys {
            if !plan.iter().any(|(t, k)| t.name == tool.name && *k == key) {
                plan.push((tool, key));
            }
        }
    }
    plan
}

/// Looks after the cache for one warm phase
pub struct Warmer<'a> {
    config: &'a Config,
    cache: &'a ContentCache,
    resolver: ReleaseResolver,
    client: &'a AxoClient,
}

impl<'a> Warmer<'a> {
    /// Make a warmer
    pub fn new(
        config: &'a Config,
        cache: &'a ContentCache,
        resolver: ReleaseResolver,
        client: &'a AxoClient,
    ) -> Self {
        Self {
            config,
            cache,
            resolver,
            client,
        }
    }

    /// Warm everything in `plan`, in order
    pub async fn warm_all(
        &mut self,
        plan: &[(&'static ToolSpec, Option<String>)],
    ) -> Vec<WarmOutcome> {
        let mut outcomes = Vec::with_capacity(plan.len());
        for (tool, key) in plan {
            let (key, result) = match key {
                Some(key) => (key.clone(), self.warm_asset(tool, key).await),
                None => {
                    let err = DistError::UnsupportedTarget {
                        tool: tool.name.to_owned(),
                        key: std::env::consts::OS.to_owned(),
                    };
                    (String::from("unknown"), self.soften(tool, None, err))
                }
            };
            match &result {
                Ok(warmed) => info!("{} ({key}): {:?}", tool.name, warmed.status),
                Err(e) => warn!("{} ({key}) failed: {e}", tool.name),
            }
            outcomes.push(WarmOutcome {
                tool,
                key,
                result,
            });
        }
        outcomes
    }

    /// Warm a single asset
    pub async fn warm_asset(&mut self, tool: &'static ToolSpec, key: &str) -> DistResult<Warmed> {
        let asset = match lookup_asset(tool.name, key) {
            AssetLookup::Supported(asset) => asset,
            AssetLookup::Unsupported => {
                let err = DistError::UnsupportedTarget {
                    tool: tool.name.to_owned(),
                    key: key.to_owned(),
                };
                return self.soften(tool, None, err);
            }
            AssetLookup::UnknownTool => {
                return Err(DistError::UnknownTool {
                    tool: tool.name.to_owned(),
                })
            }
        };

        let release = match self
            .resolver
            .resolve(tool, self.config.pinned_tag(tool))
            .await
        {
            Ok(release) => release,
            Err(e) => return self.soften(tool, None, e),
        };
        let tag = release.tag.clone();

        let entry = self.cache.entry(asset, &tag);
        let status = if entry.is_valid() {
            info!("{} for {key} is cached at {tag}", tool.name);
            WarmStatus::Cached
        } else {
            let url = match release.asset_url(&asset.asset_file_name) {
                Some(None) => {
                    let err = DistError::AssetNotFound {
                        tool: tool.name.to_owned(),
                        tag: tag.clone(),
                        asset: asset.asset_file_name.clone(),
                    };
                    return self.soften(tool, Some(tag), err);
                }
                Some(Some(url)) if self.config.mirror.is_none() => url.to_owned(),
                _ => asset.download_url(
                    self.resolver.repo(),
                    &tag,
                    self.config.mirror.as_deref(),
                ),
            };
            self.cache
                .ensure_download_dir(tool.name, &asset.platform_arch_key)?;
            self.cache.clear_marker(&entry)?;
            let expected = self.config.expected_sha256(tool, key);
            match download(self.client, &url, &entry.asset_path, expected).await {
                Ok(_) => {}
                Err(DistError::HttpStatus { status: 404, .. }) => {
                    let err = DistError::AssetNotFound {
                        tool: tool.name.to_owned(),
                        tag: tag.clone(),
                        asset: asset.asset_file_name.clone(),
                    };
                    return self.soften(tool, Some(tag), err);
                }
                Err(e) => return self.soften(tool, Some(tag), e),
            }
            self.cache.write_marker(&entry)?;
            WarmStatus::Refreshed
        };

        let extracted = extract(
            &entry.asset_path,
            &self.cache.bin_dir(asset),
            &asset.expected_binary_name,
            asset.platform,
            &tag,
        );
        let extracted = match extracted {
            Ok(extracted) => extracted,
            Err(e) => return self.soften(tool, Some(tag), e),
        };

        Ok(Warmed {
            status,
            tag: Some(tag),
            binary: Some(extracted.binary().to_owned()),
            reason: None,
        })
    }

    /// Optional tools never fail the warm phase, they're just skipped
    fn soften(&self, tool: &ToolSpec, tag: Option<String>, err: DistError) -> DistResult<Warmed> {
        if self.config.is_optional(tool) {
            warn!("skipping optional tool {}: {err}", tool.name);
            Ok(Warmed::skipped(tag, err.to_string()))
        } else {
            Err(err)
        }
    }
}

/// How many outcomes are hard failures
pub fn count_failures(outcomes: &[WarmOutcome]) -> usize {
    outcomes.iter().filter(|o| o.result.is_err()).count()
}
