//! The third-party tools we provision, and every asset they ship
//!
//! Both tables are built once and never change. Anything not in them is
//! reported as [`AssetLookup::Unsupported`][] rather than silently missing.

use std::collections::BTreeMap;

use lazy_static::lazy_static;

use crate::platform::{supported_targets, BuildTarget, Libc, Platform};

/// Tool name of the minimal runtime that executables are built from
pub const TOOL_RUNTIME: &str = "smol-runtime";
/// Tool name of the blob injector
pub const TOOL_INJECTOR: &str = "binject";
/// Tool name of the portable Mach-O signer
pub const TOOL_SIGNER: &str = "rcodesign";

/// Which machine a tool's asset is needed for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolScope {
    /// One asset per build target (the runtime the executable is made of)
    PerTarget,
    /// Only the asset that runs on this machine
    Host,
}

/// A tool we download from the release host
#[derive(Debug, Clone)]
pub struct ToolSpec {
    /// Name of the tool, also its cache directory
    pub name: &'static str,
    /// Releases of this tool have tags starting with this
    pub tag_prefix: &'static str,
    /// Name of the executable inside each archive (without .exe)
    pub binary_name: &'static str,
    /// Whether a missing asset is fine
    pub optional: bool,
    /// Which machines we need it for
    pub scope: ToolScope,
    /// platform/arch keys with a published asset
    pub keys: Vec<String>,
}

impl ToolSpec {
    /// The env var that pins a release tag for this tool
    pub fn tag_env_var(&self) -> String {
        format!(
            "SEA_DIST_{}_TAG",
            self.name.to_ascii_uppercase().replace('-', "_")
        )
    }
}

/// One downloadable archive for one tool on one platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetDescriptor {
    /// The tool this belongs to
    pub tool_name: &'static str,
    /// The platform/arch(/libc) key, also the cache subdirectory
    pub platform_arch_key: String,
    /// The platform the binary inside runs on
    pub platform: Platform,
    /// The libc variant, if the key has one
    pub libc: Option<Libc>,
    /// File name of the archive in the release
    pub asset_file_name: String,
    /// Name of the executable we want out of the archive
    pub expected_binary_name: String,
}

impl AssetDescriptor {
    /// Where to download this asset from for a given release tag
    ///
    /// A mirror, if configured, is laid out as `<mirror>/<tag>/<asset>`.
    pub fn download_url(&self, repo: &str, tag: &str, mirror: Option<&str>) -> String {
        match mirror {
            Some(mirror) => format!(
                "{}/{tag}/{}",
                mirror.trim_end_matches('/'),
                self.asset_file_name
            ),
            None => format!(
                "https://github.com/{repo}/releases/download/{tag}/{}",
                self.asset_file_name
            ),
        }
    }

    /// File name of the executable once extracted
    pub fn binary_file_name(&self) -> String {
        format!("{}{}", self.expected_binary_name, self.platform.exe_suffix())
    }
}

/// Result of looking an asset up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetLookup<'a> {
    /// Here's the asset
    Supported(&'a AssetDescriptor),
    /// The tool doesn't ship for that platform
    Unsupported,
    /// We've never heard of the tool
    UnknownTool,
}

fn all_target_keys() -> Vec<String> {
    supported_targets().iter().map(BuildTarget::key).collect()
}

fn host_tool_keys(with_musl: bool) -> Vec<String> {
    supported_targets()
        .iter()
        .filter(|t| with_musl || !t.has_nondefault_libc())
        .map(BuildTarget::key)
        .collect()
}

fn archive_ext(platform: Platform) -> &'static str {
    match platform {
        Platform::Win32 => "zip",
        Platform::Darwin | Platform::Linux => "tar.gz",
    }
}

fn descriptor_for(tool: &ToolSpec, target: &BuildTarget) -> AssetDescriptor {
    let key = target.key();
    AssetDescriptor {
        tool_name: tool.name,
        asset_file_name: format!("{}-{key}.{}", tool.name, archive_ext(target.platform)),
        platform_arch_key: key,
        platform: target.platform,
        libc: target.libc.filter(|_| target.has_nondefault_libc()),
        expected_binary_name: tool.binary_name.to_owned(),
    }
}

lazy_static! {
    static ref TOOLS: Vec<ToolSpec> = vec![
        ToolSpec {
            name: TOOL_RUNTIME,
            tag_prefix: "smol-runtime-",
            binary_name: "node",
            optional: false,
            scope: ToolScope::PerTarget,
            keys: all_target_keys(),
        },
        ToolSpec {
            name: TOOL_INJECTOR,
            tag_prefix: "binject-",
            binary_name: "binject",
            optional: false,
            scope: ToolScope::Host,
            keys: host_tool_keys(true),
        },
        ToolSpec {
            name: TOOL_SIGNER,
            tag_prefix: "rcodesign-",
            binary_name: "rcodesign",
            optional: true,
            scope: ToolScope::Host,
            keys: host_tool_keys(false),
        },
    ];
    static ref ASSETS: BTreeMap<(&'static str, String), AssetDescriptor> = {
        let mut assets = BTreeMap::new();
        for tool in TOOLS.iter() {
            for target in supported_targets() {
                if tool.keys.contains(&target.key()) {
                    let desc = descriptor_for(tool, &target);
                    assets.insert((tool.name, desc.platform_arch_key.clone()), desc);
                }
            }
        }
        assets
    };
}

/// Every tool we know about, in provisioning order
pub fn all_tools() -> &'static [ToolSpec] {
    &TOOLS
}

/// Find a tool by name
pub fn tool(name: &str) -> Option<&'static ToolSpec> {
    TOOLS.iter().find(|t| t.name == name)
}

/// Look up the asset for a tool on a platform/arch key
pub fn lookup_asset(tool_name: &str, key: &str) -> AssetLookup<'static> {
    let Some(spec) = tool(tool_name) else {
        return AssetLookup::UnknownTool;
    };
    match ASSETS.get(&(spec.name, key.to_owned())) {
        Some(desc) => AssetLookup::Supported(desc),
        None => AssetLookup::Unsupported,
    }
}

/// Look up the asset for a tool on a build target
pub fn lookup_target_asset(tool_name: &str, target: &BuildTarget) -> AssetLookup<'static> {
    lookup_asset(tool_name, &target.key())
}
