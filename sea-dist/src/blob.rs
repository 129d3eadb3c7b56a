//! Building the script+asset blob that gets injected into each executable

use std::collections::BTreeMap;

use axoasset::LocalAsset;
use axoprocess::Cmd;
use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::info;

use crate::errors::{DistError, DistResult};
use crate::platform::{Arch, BuildTarget, Platform};
use crate::process::run_tool;

/// Name of the config file the blob compiler reads
pub const SEA_CONFIG_FILE_NAME: &str = "sea-config.json";

/// Everything that goes into one blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobConfig {
    /// The script that runs when the executable starts
    pub entry_point: Utf8PathBuf,
    /// Files to embed, by the path the executable will ask for them with
    pub assets: BTreeMap<String, Utf8PathBuf>,
    /// Where the compiler should write the blob
    pub output_blob_path: Utf8PathBuf,
    /// Whether the entry point is a startup snapshot script
    pub snapshot_enabled: bool,
}

/// The `sea-config.json` format
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SeaConfig<'a> {
    main: &'a Utf8Path,
    output: &'a Utf8Path,
    #[serde(rename = "disableExperimentalSEAWarning")]
    disable_experimental_sea_warning: bool,
    use_snapshot: bool,
    use_code_cache: bool,
    #[serde(skip_serializing_if = "no_assets")]
    assets: &'a BTreeMap<String, Utf8PathBuf>,
}

fn no_assets(assets: &&BTreeMap<String, Utf8PathBuf>) -> bool {
    assets.is_empty()
}

impl BlobConfig {
    /// Where `sea-config.json` goes: next to the blob
    pub fn config_path(&self) -> Utf8PathBuf {
        let dir = self
            .output_blob_path
            .parent()
            .unwrap_or_else(|| Utf8Path::new("."));
        dir.join(SEA_CONFIG_FILE_NAME)
    }

    /// Render `sea-config.json`
    ///
    /// A `portable` blob is one that will run on another platform than the
    /// one compiling it, so it can't carry a code cache.
    pub fn to_sea_config_json(&self, portable: bool) -> DistResult<String> {
        let config = SeaConfig {
            main: &self.entry_point,
            output: &self.output_blob_path,
            disable_experimental_sea_warning: true,
            use_snapshot: self.snapshot_enabled,
            // code cache and snapshots can't be combined
            use_code_cache: !self.snapshot_enabled && !portable,
            assets: &self.assets,
        };
        Ok(serde_json::to_string_pretty(&config)?)
    }

    /// Check every input exists before we bother the compiler
    pub fn check_inputs(&self) -> DistResult<()> {
        if !self.entry_point.is_file() {
            return Err(DistError::EntryPointMissing {
                path: self.entry_point.clone(),
            });
        }
        for (virtual_path, host_path) in &self.assets {
            if !host_path.is_file() {
                return Err(DistError::BlobAssetMissing {
                    virtual_path: virtual_path.clone(),
                    host_path: host_path.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Parse a `VIRTUAL_PATH=HOST_PATH` asset mapping
pub fn parse_asset_mapping(spec: &str) -> DistResult<(String, Utf8PathBuf)> {
    match spec.split_once('=') {
        Some((virtual_path, host_path)) if !virtual_path.is_empty() && !host_path.is_empty() => {
            Ok((virtual_path.to_owned(), Utf8PathBuf::from(host_path)))
        }
        _ => Err(DistError::InvalidAssetSpec {
            spec: spec.to_owned(),
        }),
    }
}

/// Runs the native blob compiler
#[derive(Debug, Clone)]
pub struct BlobBuilder {
    compiler: Utf8PathBuf,
    host_platform: Option<Platform>,
    host_arch: Option<Arch>,
}

impl BlobBuilder {
    /// Use `compiler` (a runtime binary that runs on this machine)
    pub fn new(compiler: impl Into<Utf8PathBuf>) -> Self {
        Self {
            compiler: compiler.into(),
            host_platform: Platform::host(),
            host_arch: Arch::host(),
        }
    }

    /// Pretend the host is a different platform
    pub fn with_host_platform(mut self, platform: Option<Platform>) -> Self {
        self.host_platform = platform;
        self
    }

    /// Pretend the host has a different architecture
    pub fn with_host_arch(mut self, arch: Option<Arch>) -> Self {
        self.host_arch = arch;
        self
    }

    /// Build the blob for `target`, returning its path
    pub fn build_blob(&self, config: &BlobConfig, target: &BuildTarget) -> DistResult<Utf8PathBuf> {
        if self.host_arch != Some(target.arch) {
            return Err(DistError::CrossArchBlob {
                target: target.to_string(),
                host_arch: self
                    .host_arch
                    .map(|a| a.to_string())
                    .unwrap_or_else(|| std::env::consts::ARCH.to_owned()),
            });
        }
        let portable = self.host_platform != Some(target.platform);
        if portable && config.snapshot_enabled {
            return Err(DistError::ForeignSnapshot {
                target: target.to_string(),
                host_platform: self
                    .host_platform
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| std::env::consts::OS.to_owned()),
            });
        }
        config.check_inputs()?;

        let config_path = config.config_path();
        LocalAsset::write_new_all(&config.to_sea_config_json(portable)?, &config_path)?;

        let mut cmd = Cmd::new(&self.compiler, format!("build blob for {target}"));
        cmd.arg("--experimental-sea-config").arg(&config_path);
        let output = run_tool(&mut cmd)?;
        if !output.success() {
            return Err(DistError::BlobBuild {
                target: target.to_string(),
                exit: output.exit_description(),
                stderr: output.diagnostics(),
            });
        }
        if !config.output_blob_path.is_file() {
            return Err(DistError::BlobBuild {
                target: target.to_string(),
                exit: output.exit_description(),
                stderr: format!(
                    "the compiler reported success but {} wasn't written",
                    config.output_blob_path
                ),
            });
        }
        info!("built blob {}", config.output_blob_path);
        Ok(config.output_blob_path.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Libc;
    use crate::tests::mock::scratch_dir;

    fn config(dir: &Utf8Path) -> BlobConfig {
        BlobConfig {
            entry_point: dir.join("main.js"),
            assets: BTreeMap::from([("data.txt".to_owned(), dir.join("data.txt"))]),
            output_blob_path: dir.join("out").join("app.blob"),
            snapshot_enabled: false,
        }
    }

    #[test]
    fn sea_config_format() {
        let config = BlobConfig {
            entry_point: "/src/main.js".into(),
            assets: BTreeMap::from([("a/b.txt".to_owned(), "/src/b.txt".into())]),
            output_blob_path: "/work/app.blob".into(),
            snapshot_enabled: false,
        };
        insta::assert_snapshot!(config.to_sea_config_json(false).unwrap(), @r###"
        {
          "main": "/src/main.js",
          "output": "/work/app.blob",
          "disableExperimentalSEAWarning": true,
          "useSnapshot": false,
          "useCodeCache": true,
          "assets": {
            "a/b.txt": "/src/b.txt"
          }
        }
        "###);
        assert_eq!(config.config_path(), Utf8Path::new("/work/sea-config.json"));
    }

    #[test]
    fn asset_mappings() {
        assert_eq!(
            parse_asset_mapping("cfg/app.json=./app.json").unwrap(),
            ("cfg/app.json".to_owned(), Utf8PathBuf::from("./app.json"))
        );
        // only the first '=' splits
        assert_eq!(
            parse_asset_mapping("a=b=c").unwrap().1,
            Utf8PathBuf::from("b=c")
        );
        for bad in ["noequals", "=host", "virtual="] {
            assert!(matches!(
                parse_asset_mapping(bad),
                Err(DistError::InvalidAssetSpec { .. })
            ));
        }
    }

    #[test]
    fn cross_arch_is_refused_before_anything_runs() {
        let (_guard, dir) = scratch_dir();
        let target = BuildTarget::new(Platform::Linux, Arch::Arm64, Some(Libc::Glibc));
        let builder = BlobBuilder::new("/does/not/exist").with_host_arch(Some(Arch::X64));
        let err = builder.build_blob(&config(&dir), &target).unwrap_err();
        assert!(matches!(err, DistError::CrossArchBlob { .. }));
        assert!(!config(&dir).config_path().exists());
    }

    #[test]
    fn missing_inputs_are_reported() {
        let (_guard, dir) = scratch_dir();
        let target = BuildTarget::new(Platform::Linux, Arch::X64, None);
        let builder = BlobBuilder::new("/does/not/exist").with_host_arch(Some(Arch::X64));

        let err = builder.build_blob(&config(&dir), &target).unwrap_err();
        assert!(matches!(err, DistError::EntryPointMissing { .. }));

        LocalAsset::write_new("console.log(1)", dir.join("main.js")).unwrap();
        let err = builder.build_blob(&config(&dir), &target).unwrap_err();
        match err {
            DistError::BlobAssetMissing { virtual_path, .. } => assert_eq!(virtual_path, "data.txt"),
            other => panic!("wrong error {other:?}"),
        }
    }

    #[test]
    fn foreign_snapshots_are_refused() {
        let (_guard, dir) = scratch_dir();
        let mut config = config(&dir);
        config.snapshot_enabled = true;
        let mac = BuildTarget::new(Platform::Darwin, Arch::X64, None);
        let builder = BlobBuilder::new("/does/not/exist")
            .with_host_platform(Some(Platform::Linux))
            .with_host_arch(Some(Arch::X64));
        match builder.build_blob(&config, &mac).unwrap_err() {
            DistError::ForeignSnapshot {
                target,
                host_platform,
            } => {
                assert_eq!(target, "darwin-x64");
                assert_eq!(host_platform, "linux");
            }
            other => panic!("wrong error {other:?}"),
        }
        assert!(!config.config_path().exists());
    }

    #[cfg(unix)]
    #[test]
    fn code_cache_only_for_the_host_platform() {
        use crate::tests::mock::{fake_tool, FAKE_COMPILER};

        let (_guard, dir) = scratch_dir();
        LocalAsset::write_new("console.log(1)", dir.join("main.js")).unwrap();
        LocalAsset::write_new("data", dir.join("data.txt")).unwrap();
        let builder = BlobBuilder::new(fake_tool(&dir, "node", FAKE_COMPILER))
            .with_host_platform(Some(Platform::Linux))
            .with_host_arch(Some(Arch::X64));
        let config = config(&dir);
        let written = || {
            let json = LocalAsset::load_string(config.config_path()).unwrap();
            serde_json::from_str::<serde_json::Value>(&json).unwrap()
        };

        let linux = BuildTarget::new(Platform::Linux, Arch::X64, None);
        builder.build_blob(&config, &linux).unwrap();
        assert_eq!(written()["useCodeCache"], true);

        for foreign in [
            BuildTarget::new(Platform::Darwin, Arch::X64, None),
            BuildTarget::new(Platform::Win32, Arch::X64, None),
        ] {
            builder.build_blob(&config, &foreign).unwrap();
            assert_eq!(written()["useCodeCache"], false, "{foreign}");
            assert_eq!(written()["useSnapshot"], false, "{foreign}");
        }
    }
}
