//! Errors!
//!
//! Every subsystem returns these as values so that a single asset's or target's
//! failure is observable (and reportable) before it propagates anywhere.

use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

use crate::inject::PipelineStage;

/// An alias for the common Result type for this crate
pub type DistResult<T> = std::result::Result<T, DistError>;

/// Errors sea-dist can have
#[derive(Debug, Error, Diagnostic)]
pub enum DistError {
    /// random axoasset error
    #[error(transparent)]
    #[diagnostic(transparent)]
    Asset(#[from] axoasset::AxoassetError),

    /// random axoprocess error
    #[error(transparent)]
    #[diagnostic(transparent)]
    Cmd(#[from] axoprocess::AxoprocessError),

    /// random i/o error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// random json error
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// The release host couldn't be reached, or the response was garbled
    #[error("failed to talk to {url}")]
    #[diagnostic(help("check your network connection, or pin a tag and use a mirror"))]
    Network {
        /// what we were fetching
        url: String,
        /// What failed
        #[source]
        details: axoasset::reqwest::Error,
    },

    /// 401 from the release host
    #[error("the release host rejected our credentials while fetching {url}")]
    #[diagnostic(help(
        "the token in SEA_DIST_GITHUB_TOKEN, GH_TOKEN or GITHUB_TOKEN is invalid or expired; unset it to fall back to anonymous access"
    ))]
    Auth {
        /// what we were fetching
        url: String,
    },

    /// The token can't even be put in a header
    #[error("the release host token contains characters that can't be sent in an http header")]
    #[diagnostic(help(
        "check SEA_DIST_GITHUB_TOKEN, GH_TOKEN or GITHUB_TOKEN for stray newlines or quotes"
    ))]
    InvalidToken,

    /// 403 from the release host
    #[error("rate limited by the release host while fetching {url} (resets {reset})")]
    #[diagnostic(help("set GITHUB_TOKEN to get a much higher rate limit"))]
    RateLimit {
        /// what we were fetching
        url: String,
        /// human readable description of when the limit resets
        reset: String,
    },

    /// Some other unsuccessful http status
    #[error("request to {url} failed with status {status}")]
    HttpStatus {
        /// what we were fetching
        url: String,
        /// the status code
        status: u16,
    },

    /// No release on the host carries the prefix we're looking for
    #[error("couldn't find any release of {tool} (tags starting with \"{prefix}\") in {repo}")]
    ReleaseNotFound {
        /// the tool
        tool: String,
        /// the tag prefix we searched for
        prefix: String,
        /// the owner/repo we searched
        repo: String,
    },

    /// An explicitly requested tag doesn't exist
    #[error("release {tag} of {tool} doesn't exist")]
    #[diagnostic(help("check the value of {env_var}"))]
    TagNotFound {
        /// the tool
        tool: String,
        /// the tag
        tag: String,
        /// the env var that can pin it
        env_var: String,
    },

    /// The release exists but doesn't have the asset we need
    #[error("release {tag} of {tool} has no asset {asset}")]
    #[diagnostic(help("this usually means the upstream release is incomplete or still uploading"))]
    AssetNotFound {
        /// the tool
        tool: String,
        /// the release tag
        tag: String,
        /// the asset file name
        asset: String,
    },

    /// The tool isn't built for this platform at all
    #[error("{tool} isn't available for {key}")]
    UnsupportedTarget {
        /// the tool
        tool: String,
        /// the platform/arch key
        key: String,
    },

    /// The build phase needs an asset that warming didn't leave in the cache
    #[error("{tool} for {key} isn't in the cache")]
    #[diagnostic(help("run `sea-dist warm` with the same target selection first"))]
    NotWarmed {
        /// the tool
        tool: String,
        /// the platform/arch key
        key: String,
    },

    /// A downloaded asset didn't match its pinned digest
    #[error("checksum mismatch for {path}: expected sha256 {expected}, got {actual}")]
    #[diagnostic(help("the download was corrupted or the release was replaced upstream"))]
    ChecksumMismatch {
        /// the downloaded file
        path: Utf8PathBuf,
        /// the pinned digest
        expected: String,
        /// the computed digest
        actual: String,
    },

    /// The archive to extract isn't on disk
    #[error("archive to extract doesn't exist: {path}")]
    ArchiveMissing {
        /// the archive
        path: Utf8PathBuf,
    },

    /// We don't know how to unpack this kind of archive
    #[error("don't know how to extract {path}")]
    #[diagnostic(help("supported archives are .tar.gz, .tgz, .tar.xz and .zip"))]
    UnknownArchiveFormat {
        /// the archive
        path: Utf8PathBuf,
    },

    /// The extraction tool exited unsuccessfully
    #[error("failed to extract {archive} ({exit})\n{stderr}")]
    ExtractionFailed {
        /// the archive
        archive: Utf8PathBuf,
        /// how the tool exited
        exit: String,
        /// captured stderr of the tool
        stderr: String,
    },

    /// The archive unpacked fine but the binary we wanted isn't inside
    #[error("{binary} wasn't found anywhere inside {archive}")]
    #[diagnostic(help("the upstream release is probably malformed; try pinning an older tag"))]
    BinaryNotInArchive {
        /// the archive
        archive: Utf8PathBuf,
        /// the binary we were looking for
        binary: String,
    },

    /// The entry point for the blob doesn't exist
    #[error("entry point {path} doesn't exist")]
    EntryPointMissing {
        /// the entry point
        path: Utf8PathBuf,
    },

    /// An asset to embed in the blob doesn't exist
    #[error("asset {virtual_path} points at {host_path}, which doesn't exist")]
    BlobAssetMissing {
        /// the path the running executable will see
        virtual_path: String,
        /// the path on this machine
        host_path: Utf8PathBuf,
    },

    /// The blob compiler would have to run on another architecture
    #[error("can't build a blob for {target} on a {host_arch} host")]
    #[diagnostic(help(
        "blobs must be compiled on the same architecture as the target; build this target on a matching machine"
    ))]
    CrossArchBlob {
        /// the target
        target: String,
        /// the host's architecture
        host_arch: String,
    },

    /// Startup snapshots only load on the platform that made them
    #[error("can't build a snapshot blob for {target} on a {host_platform} host")]
    #[diagnostic(help("drop --snapshot, or build this target on a machine of its own platform"))]
    ForeignSnapshot {
        /// the target
        target: String,
        /// the host's platform
        host_platform: String,
    },

    /// The blob compiler exited unsuccessfully, or didn't produce a blob
    #[error("failed to build blob for {target} ({exit})\n{stderr}")]
    BlobBuild {
        /// the target
        target: String,
        /// how the compiler exited
        exit: String,
        /// captured stderr of the compiler
        stderr: String,
    },

    /// The injection tool exited unsuccessfully
    #[error("failed to inject blob into {output} ({exit})\n{stderr}")]
    Injection {
        /// the executable being patched
        output: Utf8PathBuf,
        /// how the injector exited
        exit: String,
        /// captured stderr of the injector
        stderr: String,
    },

    /// A target needs signing and nothing can sign it
    #[error("{target} executables must be signed, but no signing tool is available")]
    #[diagnostic(help(
        "build macOS targets on a macOS host, or run `sea-dist warm` so the optional rcodesign tool gets cached"
    ))]
    MissingSigningTool {
        /// the target
        target: String,
    },

    /// The signing tool exited unsuccessfully
    #[error("failed to sign {file} ({exit})\n{stderr}")]
    Signing {
        /// the executable
        file: Utf8PathBuf,
        /// how the signer exited
        exit: String,
        /// captured stderr of the signer
        stderr: String,
    },

    /// A build target's pipeline failed at some stage
    #[error("{target} failed while reaching stage \"{stage}\"")]
    StageFailed {
        /// the target
        target: String,
        /// the stage that couldn't be reached
        stage: PipelineStage,
        /// what went wrong
        #[source]
        cause: Box<DistError>,
    },

    /// A build target's pipeline panicked
    #[error("the pipeline for {target} panicked")]
    #[diagnostic(help("This probably isn't your fault; please open an issue!"))]
    PipelinePanicked {
        /// the target
        target: String,
    },

    /// Some targets failed to build
    #[error("{failed} of {total} targets failed to build")]
    AggregateBuildFailure {
        /// how many failed
        failed: usize,
        /// how many were attempted
        total: usize,
    },

    /// Some required assets failed to warm
    #[error("{failed} required assets couldn't be provisioned")]
    WarmFailed {
        /// how many failed
        failed: usize,
    },

    /// The selection matched nothing in the support table
    #[error("no supported targets match the selection {selection}")]
    #[diagnostic(help("run `sea-dist targets --all` to see what's supported"))]
    NoTargetsSelected {
        /// the selection, rendered
        selection: String,
    },

    /// A selector value we don't recognize
    #[error("unknown {kind} \"{value}\"")]
    #[diagnostic(help("expected one of: {expected}"))]
    UnknownSelector {
        /// platform/arch/libc
        kind: &'static str,
        /// what we got
        value: String,
        /// what we accept
        expected: &'static str,
    },

    /// `--asset` wasn't `VIRTUAL=HOST`
    #[error("asset mapping \"{spec}\" should look like VIRTUAL_PATH=HOST_PATH")]
    InvalidAssetSpec {
        /// what we got
        spec: String,
    },

    /// A tool name we don't have in our table
    #[error("unknown tool {tool}")]
    UnknownTool {
        /// the tool
        tool: String,
    },

    /// Failure when converting a PathBuf to a Utf8PathBuf
    #[error("An internal error occurred when decoding path `{:?}' to utf8", path)]
    #[diagnostic(help("This probably isn't your fault; please open an issue!"))]
    NonUtf8Path {
        /// The path which Camino failed to convert
        path: std::path::PathBuf,
    },
}

impl DistError {
    /// The pipeline stage this error is attributed to, if any
    pub fn failed_stage(&self) -> Option<PipelineStage> {
        match self {
            DistError::StageFailed { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
