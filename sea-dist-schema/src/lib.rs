#![deny(missing_docs)]

//! # sea-dist-schema
//!
//! This crate exists to serialize and deserialize the reports produced by
//! sea-dist, so that whatever drives a build (a release script, CI, a parent
//! CLI) can consume the pass/fail outcome per target without scraping logs.
//!
//! The root types are [`BuildReport`][] and [`WarmReport`][].

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A local system path on the machine sea-dist was run.
///
/// This is a String because when deserializing this may be a path format from a different OS!
pub type LocalPath = String;

/// The outcome of one `sea-dist build` invocation
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BuildReport {
    /// The version of sea-dist that generated this
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sea_dist_version: Option<String>,
    /// The product name used for the produced executables
    pub product: String,
    /// One entry per requested target, in the order they were requested
    #[serde(default)]
    pub targets: Vec<TargetReport>,
    /// How many targets produced an executable
    pub succeeded: usize,
    /// How many targets failed
    pub failed: usize,
}

impl BuildReport {
    /// Whether every target succeeded
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Get the JSON Schema for a BuildReport
    pub fn json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(BuildReport)
    }
}

/// The outcome of building a single target
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TargetReport {
    /// The display name of the target (e.g. `linux-x64-musl`)
    pub target: String,
    /// The platform family (`darwin`, `linux`, `win32`)
    pub platform: String,
    /// The cpu architecture (`x64`, `arm64`)
    pub arch: String,
    /// The libc variant, only present for linux targets
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub libc: Option<String>,
    /// Whether an executable was produced
    pub success: bool,
    /// Where the executable was written (only on success)
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<LocalPath>,
    /// The pipeline stage that failed (only on failure)
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<String>,
    /// A rendering of the error (only on failure)
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The outcome of one `sea-dist warm` invocation
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WarmReport {
    /// The version of sea-dist that generated this
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sea_dist_version: Option<String>,
    /// One entry per (tool, platform) asset that was considered
    #[serde(default)]
    pub assets: Vec<WarmEntry>,
}

impl WarmReport {
    /// Whether every asset is either ready or was allowed to be skipped
    pub fn is_success(&self) -> bool {
        !self
            .assets
            .iter()
            .any(|a| matches!(a.status, WarmStatusKind::Failed))
    }

    /// Get the JSON Schema for a WarmReport
    pub fn json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(WarmReport)
    }
}

/// The state of a single cached asset after warming
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WarmEntry {
    /// The tool this asset belongs to
    pub tool: String,
    /// The platform/arch(/libc) key of the asset
    pub key: String,
    /// The release tag the asset was resolved against
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// What happened
    pub status: WarmStatusKind,
    /// Path to the ready-to-use binary
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary_path: Option<LocalPath>,
    /// Why the asset was skipped or failed
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// What happened to a cached asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum WarmStatusKind {
    /// The cache already held this exact tag
    Cached,
    /// The asset was (re)downloaded
    Refreshed,
    /// An optional tool had no asset for this platform
    Skipped,
    /// A required tool couldn't be provisioned
    Failed,
    /// Unknown to this version of sea-dist-schema
    ///
    /// This is a fallback for forward/backward-compat
    #[serde(other)]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_target_makes_report_fail() {
        let report: BuildReport = serde_json::from_str(
            r#"{
                "product": "tool",
                "targets": [
                    {"target": "linux-x64", "platform": "linux", "arch": "x64", "success": true, "output_path": "out/tool-linux-x64"},
                    {"target": "darwin-arm64", "platform": "darwin", "arch": "arm64", "success": false, "failed_stage": "signed", "error": "no codesign"}
                ],
                "succeeded": 1,
                "failed": 1
            }"#,
        )
        .unwrap();
        assert!(!report.is_success());
        assert_eq!(report.targets[1].failed_stage.as_deref(), Some("signed"));
        assert!(report.targets[0].libc.is_none());
    }

    #[test]
    fn unknown_warm_status_is_tolerated() {
        let entry: WarmEntry = serde_json::from_str(
            r#"{"tool": "smol-runtime", "key": "linux-x64", "status": "teleported"}"#,
        )
        .unwrap();
        assert_eq!(entry.status, WarmStatusKind::Unknown);

        let report = WarmReport {
            sea_dist_version: None,
            assets: vec![entry],
        };
        assert!(report.is_success());
    }

    #[test]
    fn skipped_fields_stay_out_of_json() {
        let report = TargetReport {
            target: "linux-x64-musl".to_owned(),
            platform: "linux".to_owned(),
            arch: "x64".to_owned(),
            libc: Some("musl".to_owned()),
            success: true,
            output_path: Some("out/musl/tool-linux-x64".to_owned()),
            failed_stage: None,
            error: None,
        };
        insta::assert_snapshot!(serde_json::to_string(&report).unwrap(), @r###"{"target":"linux-x64-musl","platform":"linux","arch":"x64","libc":"musl","success":true,"output_path":"out/musl/tool-linux-x64"}"###);
    }

    #[test]
    fn schema_names_root_type() {
        let schema = serde_json::to_value(BuildReport::json_schema()).unwrap();
        assert_eq!(schema["title"], "BuildReport");
        assert!(schema["properties"]["targets"].is_object());
        assert!(schema["definitions"]["TargetReport"].is_object());
    }
}
