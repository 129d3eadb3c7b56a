//! Resolving which release of a tool to use
//!
//! Tags are opaque. We either take the tag we were told to pin, or the newest
//! non-draft release whose tag starts with the tool's prefix. Each tool is
//! resolved at most once per run.

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axoasset::reqwest::{self, header::HeaderMap, StatusCode};
use serde::Deserialize;
use tracing::{debug, info};

use crate::errors::{DistError, DistResult};
use crate::tools::ToolSpec;

/// The default release host API
pub const GITHUB_API: &str = "https://api.github.com";

/// A release as reported by the release host
#[derive(Clone, Debug, Deserialize)]
pub struct HostedRelease {
    /// The tag this release represents
    pub tag_name: String,
    /// Drafts aren't downloadable by anonymous users
    #[serde(default)]
    pub draft: bool,
    /// Whether or not this release is a prerelease
    #[serde(default)]
    pub prerelease: bool,
    /// All assets associated with this release
    #[serde(default)]
    pub assets: Vec<HostedAsset>,
}

/// An asset attached to a [`HostedRelease`][]
#[derive(Clone, Debug, Deserialize)]
pub struct HostedAsset {
    /// This asset's name
    pub name: String,
    /// The URL at which this asset can be downloaded
    pub browser_download_url: String,
}

/// A tag we settled on, and what's attached to it
#[derive(Clone, Debug)]
pub struct ResolvedRelease {
    /// The release tag
    pub tag: String,
    /// Asset metadata, when we fetched it from the host
    ///
    /// None means we only know the tag (pinned with a mirror), so assets are
    /// assumed to exist and a failed download is what reports them missing.
    pub assets: Option<Vec<HostedAsset>>,
}

impl ResolvedRelease {
    /// Find the download url of an asset in this release
    ///
    /// The outer `None` means we have no metadata to check against.
    pub fn asset_url(&self, name: &str) -> Option<Option<&str>> {
        match &self.assets {
            Some(assets) => Some(
                assets
                    .iter()
                    .find(|a| a.name == name)
                    .map(|a| a.browser_download_url.as_str()),
            ),
            None => None,
        }
    }
}

/// Looks up and remembers release tags for tools
pub struct ReleaseResolver {
    client: reqwest::Client,
    api_base: String,
    repo: String,
    /// Skip the API entirely for pinned tags (used with download mirrors)
    trust_pins: bool,
    resolved: HashMap<String, ResolvedRelease>,
}

impl ReleaseResolver {
    /// Make a resolver that talks to `api_base` about releases in `repo` (`owner/name`)
    pub fn new(client: reqwest::Client, api_base: &str, repo: &str) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_owned(),
            repo: repo.to_owned(),
            trust_pins: false,
            resolved: HashMap::new(),
        }
    }

    /// Don't ask the release host about pinned tags
    pub fn trust_pins(mut self, trust: bool) -> Self {
        self.trust_pins = trust;
        self
    }

    /// The `owner/name` of the repo releases come from
    pub fn repo(&self) -> &str {
        &self.repo
    }

    /// Resolve the release to use for `tool`, optionally pinned to a tag
    pub async fn resolve(
        &mut self,
        tool: &ToolSpec,
        pinned: Option<&str>,
    ) -> DistResult<ResolvedRelease> {
        if let Some(release) = self.resolved.get(tool.name) {
            return Ok(release.clone());
        }
        let release = match pinned {
            Some(tag) if self.trust_pins => {
                debug!("using pinned tag {tag} for {} without asking the host", tool.name);
                ResolvedRelease {
                    tag: tag.to_owned(),
                    assets: None,
                }
            }
            Some(tag) => self.release_by_tag(tool, tag).await?,
            None => self.latest_with_prefix(tool).await?,
        };
        info!("{} resolved to {}", tool.name, release.tag);
        self.resolved.insert(tool.name.to_owned(), release.clone());
        Ok(release)
    }

    async fn release_by_tag(&self, tool: &ToolSpec, tag: &str) -> DistResult<ResolvedRelease> {
        let url = format!("{}/repos/{}/releases/tags/{tag}", self.api_base, self.repo);
        let response = self.get(&url).await;
        let response = match response {
            Err(DistError::HttpStatus { status: 404, .. }) => {
                return Err(DistError::TagNotFound {
                    tool: tool.name.to_owned(),
                    tag: tag.to_owned(),
                    env_var: tool.tag_env_var(),
                })
            }
            other => other?,
        };
        let release: HostedRelease = response
            .json()
            .await
            .map_err(|details| DistError::Network {
                url: url.clone(),
                details,
            })?;
        Ok(ResolvedRelease {
            tag: release.tag_name,
            assets: Some(release.assets),
        })
    }

    async fn latest_with_prefix(&self, tool: &ToolSpec) -> DistResult<ResolvedRelease> {
        let mut url = Some(format!(
            "{}/repos/{}/releases?per_page=100",
            self.api_base, self.repo
        ));
        while let Some(page_url) = url.take() {
            let response = self.get(&page_url).await?;
            url = next_page_url(response.headers());
            let releases: Vec<HostedRelease> =
                response.json().await.map_err(|details| DistError::Network {
                    url: page_url.clone(),
                    details,
                })?;
            // The host lists newest first, so the first hit wins
            if let Some(release) = releases
                .into_iter()
                .find(|r| !r.draft && r.tag_name.starts_with(tool.tag_prefix))
            {
                return Ok(ResolvedRelease {
                    tag: release.tag_name,
                    assets: Some(release.assets),
                });
            }
        }
        Err(DistError::ReleaseNotFound {
            tool: tool.name.to_owned(),
            prefix: tool.tag_prefix.to_owned(),
            repo: self.repo.clone(),
        })
    }

    async fn get(&self, url: &str) -> DistResult<reqwest::Response> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|details| DistError::Network {
                url: url.to_owned(),
                details,
            })?;
        match classify_status(url, response.status(), response.headers(), SystemTime::now()) {
            Some(err) => Err(err),
            None => Ok(response),
        }
    }
}

/// Turn an unsuccessful response into the error that explains it
///
/// 401 and 403 get dedicated errors since the fix for each is different.
pub fn classify_status(
    url: &str,
    status: StatusCode,
    headers: &HeaderMap,
    now: SystemTime,
) -> Option<DistError> {
    if status.is_success() {
        return None;
    }
    let url = url.to_owned();
    Some(match status {
        StatusCode::UNAUTHORIZED => DistError::Auth { url },
        StatusCode::FORBIDDEN => DistError::RateLimit {
            url,
            reset: describe_reset(headers, now),
        },
        other => DistError::HttpStatus {
            url,
            status: other.as_u16(),
        },
    })
}

fn describe_reset(headers: &HeaderMap, now: SystemTime) -> String {
    let reset = headers
        .get("x-ratelimit-reset")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let Some(reset) = reset else {
        return "at an unknown time".to_owned();
    };
    let reset_at = UNIX_EPOCH + Duration::from_secs(reset);
    match reset_at.duration_since(now) {
        Ok(wait) if wait.as_secs() > 0 => {
            let minutes = wait.as_secs().div_ceil(60);
            format!("in {minutes} minute(s), at unix time {reset}")
        }
        _ => "now".to_owned(),
    }
}

// The format of the header looks like so:
// ```
// <https://api.github.com/repositories/1300192/releases?page=2>; rel="next", <https://api.github.com/repositories/1300192/releases?page=5>; rel="last"
// ```
fn next_page_url(headers: &HeaderMap) -> Option<String> {
    let link = headers.get(reqwest::header::LINK)?.to_str().ok()?;
    link.split(',').find_map(|entry| {
        let (target, params) = entry.split_once(';')?;
        if !params.contains("rel=\"next\"") {
            return None;
        }
        let target = target.trim();
        Some(target.strip_prefix('<')?.strip_suffix('>')?.to_owned())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axoasset::reqwest::header::HeaderValue;

    #[test]
    fn rate_limit_carries_reset_time() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-reset", HeaderValue::from_static("1000600"));
        let now = UNIX_EPOCH + Duration::from_secs(1_000_000);
        let err = classify_status("u", StatusCode::FORBIDDEN, &headers, now).unwrap();
        match err {
            DistError::RateLimit { reset, .. } => {
                assert_eq!(reset, "in 10 minute(s), at unix time 1000600")
            }
            other => panic!("wrong error {other:?}"),
        }
    }

    #[test]
    fn statuses_map_to_distinct_errors() {
        let headers = HeaderMap::new();
        let now = SystemTime::now();
        assert!(classify_status("u", StatusCode::OK, &headers, now).is_none());
        assert!(matches!(
            classify_status("u", StatusCode::UNAUTHORIZED, &headers, now),
            Some(DistError::Auth { .. })
        ));
        assert!(matches!(
            classify_status("u", StatusCode::FORBIDDEN, &headers, now),
            Some(DistError::RateLimit { ref reset, .. }) if reset == "at an unknown time"
        ));
        assert!(matches!(
            classify_status("u", StatusCode::BAD_GATEWAY, &headers, now),
            Some(DistError::HttpStatus { status: 502, .. })
        ));
    }

    #[test]
    fn finds_next_link() {
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::LINK,
            HeaderValue::from_static(
                "<https://h/r?page=1>; rel=\"prev\", <https://h/r?page=3>; rel=\"next\", <https://h/r?page=9>; rel=\"last\"",
            ),
        );
        assert_eq!(next_page_url(&headers).as_deref(), Some("https://h/r?page=3"));
        assert_eq!(next_page_url(&HeaderMap::new()), None);
    }
}
