//! Config loading: defaults, then `sea-dist.toml`, then the environment
//!
//! Command line flags are layered on top of this by the CLI itself.

use std::collections::BTreeMap;

use axoasset::SourceFile;
use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::errors::{DistError, DistResult};
use crate::release::GITHUB_API;
use crate::tools::{all_tools, tool, ToolSpec};

/// The config file we look for in the working directory
pub const CONFIG_FILE_NAME: &str = "sea-dist.toml";
/// Where tool releases come from unless configured otherwise
pub const DEFAULT_RELEASE_REPO: &str = "sea-dist/toolchain";
/// Where executables go unless configured otherwise
pub const DEFAULT_OUT_DIR: &str = "dist";

/// Env vars that can hold a release host token, in priority order
pub const TOKEN_ENV_VARS: &[&str] = &["SEA_DIST_GITHUB_TOKEN", "GH_TOKEN", "GITHUB_TOKEN"];
/// Env var overriding the release host API base url
pub const API_URL_ENV_VAR: &str = "SEA_DIST_GITHUB_API_URL";
/// Env var selecting a download mirror
pub const MIRROR_ENV_VAR: &str = "SEA_DIST_DOWNLOAD_MIRROR";
/// Env var overriding the cache root
pub const CACHE_DIR_ENV_VAR: &str = "SEA_DIST_CACHE_DIR";

/// The contents of `sea-dist.toml`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ConfigFile {
    /// Base name of produced executables
    pub product: Option<String>,
    /// Root of the asset cache
    pub cache_dir: Option<Utf8PathBuf>,
    /// Where executables go
    pub out_dir: Option<Utf8PathBuf>,
    /// `owner/name` of the repo tool releases come from
    pub release_repo: Option<String>,
    /// How many targets to build at once
    pub jobs: Option<usize>,
    /// Per-tool settings
    #[serde(default)]
    pub tools: BTreeMap<String, ToolConfig>,
}

/// `[tools.<name>]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ToolConfig {
    /// Pin this exact release tag
    pub tag: Option<String>,
    /// Override whether a missing asset is fine
    pub optional: Option<bool>,
    /// Expected sha256 of the archive, by platform/arch key
    #[serde(default)]
    pub sha256: BTreeMap<String, String>,
}

impl ConfigFile {
    /// Parse a config file
    pub fn load(path: &Utf8Path) -> DistResult<Self> {
        let src = SourceFile::load_local(path)?;
        Ok(src.deserialize_toml()?)
    }

    /// Load `--config` if given, else `sea-dist.toml` if it exists, else nothing
    pub fn discover(explicit: Option<&Utf8Path>) -> DistResult<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let default = Utf8Path::new(CONFIG_FILE_NAME);
        if default.is_file() {
            debug!("loading {default}");
            Self::load(default)
        } else {
            Ok(Self::default())
        }
    }
}

/// Fully resolved configuration
#[derive(Clone)]
pub struct Config {
    /// Base name of produced executables, if configured
    pub product: Option<String>,
    /// Root of the asset cache
    pub cache_dir: Utf8PathBuf,
    /// Where executables go
    pub out_dir: Utf8PathBuf,
    /// `owner/name` of the repo tool releases come from
    pub release_repo: String,
    /// Release host API base
    pub api_base: String,
    /// How many targets to build at once, if configured
    pub jobs: Option<usize>,
    /// Release host token
    pub token: Option<String>,
    /// Download mirror
    pub mirror: Option<String>,
    /// Per-tool settings, with env tag pins folded in
    pub tools: BTreeMap<String, ToolConfig>,
}

// manual debug impl to prevent anyone adding derive(Debug) and leaking SECRETS
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("product", &self.product)
            .field("cache_dir", &self.cache_dir)
            .field("out_dir", &self.out_dir)
            .field("release_repo", &self.release_repo)
            .field("api_base", &self.api_base)
            .field("jobs", &self.jobs)
            .field("token", &self.token.as_ref().map(|_| "<hidden>"))
            .field("mirror", &self.mirror)
            .field("tools", &self.tools)
            .finish()
    }
}

impl Config {
    /// Load from the config file and the process environment
    pub fn load(config_path: Option<&Utf8Path>) -> DistResult<Self> {
        let file = ConfigFile::discover(config_path)?;
        Self::from_sources(file, |var| std::env::var(var).ok(), default_cache_root)
    }

    /// Layer the environment (as given by `env`) over a config file
    ///
    /// `default_cache` is only consulted when neither the file nor the env
    /// picks a cache dir. Empty env vars count as unset.
    pub fn from_sources(
        file: ConfigFile,
        env: impl Fn(&str) -> Option<String>,
        default_cache: impl FnOnce() -> Utf8PathBuf,
    ) -> DistResult<Self> {
        let lookup = |var: &str| env(var).filter(|v| !v.trim().is_empty());

        let mut tools = file.tools;
        for name in tools.keys() {
            if tool(name).is_none() {
                return Err(DistError::UnknownTool { tool: name.clone() });
            }
        }
        for spec in all_tools() {
            if let Some(tag) = lookup(&spec.tag_env_var()) {
                debug!("{} pinned to {tag} by {}", spec.name, spec.tag_env_var());
                tools.entry(spec.name.to_owned()).or_default().tag = Some(tag);
            }
        }

        let token = TOKEN_ENV_VARS.iter().find_map(|var| lookup(*var));
        if token.is_none() {
            warn!("no release host token found, making anonymous requests at a lower rate limit");
        }

        let cache_dir = lookup(CACHE_DIR_ENV_VAR)
            .map(Utf8PathBuf::from)
            .or(file.cache_dir)
            .unwrap_or_else(default_cache);

        Ok(Self {
            product: file.product,
            cache_dir,
            out_dir: file
                .out_dir
                .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_OUT_DIR)),
            release_repo: file
                .release_repo
                .unwrap_or_else(|| DEFAULT_RELEASE_REPO.to_owned()),
            api_base: lookup(API_URL_ENV_VAR).unwrap_or_else(|| GITHUB_API.to_owned()),
            jobs: file.jobs,
            token,
            mirror: lookup(MIRROR_ENV_VAR),
            tools,
        })
    }

    /// The tag `tool` is pinned to, if any
    pub fn pinned_tag(&self, tool: &ToolSpec) -> Option<&str> {
        self.tools.get(tool.name)?.tag.as_deref()
    }

    /// Whether a missing asset for `tool` is fine
    pub fn is_optional(&self, tool: &ToolSpec) -> bool {
        self.tools
            .get(tool.name)
            .and_then(|t| t.optional)
            .unwrap_or(tool.optional)
    }

    /// The pinned sha256 of `tool`'s asset for `key`, if any
    pub fn expected_sha256(&self, tool: &ToolSpec, key: &str) -> Option<&str> {
        self.tools
            .get(tool.name)?
            .sha256
            .get(key)
            .map(|s| s.as_str())
    }
}

/// `<home>/.cache/sea-dist`, or `./.sea-dist-cache` when there's no home
pub fn default_cache_root() -> Utf8PathBuf {
    let home = homedir::get_my_home()
        .ok()
        .flatten()
        .and_then(|home| Utf8PathBuf::from_path_buf(home).ok());
    match home {
        Some(home) => home.join(".cache").join("sea-dist"),
        None => Utf8PathBuf::from(".sea-dist-cache"),
    }
}
