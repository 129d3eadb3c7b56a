//! All the clap stuff for parsing/documenting the cli

use camino::Utf8PathBuf;
use clap::{
    builder::{PossibleValuesParser, TypedValueParser},
    Args, Parser, Subcommand, ValueEnum,
};
use sea_dist::platform::TargetSelection;
use sea_dist::DistResult;
use tracing::level_filters::LevelFilter;

#[derive(Parser, Clone, Debug)]
#[clap(version, about, long_about = None)]
#[clap(propagate_version = true)]
/// Turn one script into a self-contained executable for every platform.
///
/// `warm` fills the asset cache, `build` warms and then produces the
/// executables. Everything else is read-only.
pub struct Cli {
    /// Subcommands
    #[clap(subcommand)]
    pub command: Commands,

    /// How verbose logging should be (log level)
    #[clap(long, short)]
    #[clap(default_value_t = LevelFilter::WARN)]
    #[clap(value_parser = PossibleValuesParser::new(["off", "error", "warn", "info", "debug", "trace"]).map(|s| s.parse::<LevelFilter>().expect("possible values are valid")))]
    #[clap(help_heading = "GLOBAL OPTIONS", global = true)]
    pub verbose: LevelFilter,

    /// The format of the output
    #[clap(long, short, value_enum)]
    #[clap(default_value_t = OutputFormat::Human)]
    #[clap(help_heading = "GLOBAL OPTIONS", global = true)]
    pub output_format: OutputFormat,

    /// Path to a config file (defaults to ./sea-dist.toml if present)
    #[clap(long)]
    #[clap(help_heading = "GLOBAL OPTIONS", global = true)]
    pub config: Option<Utf8PathBuf>,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Download and extract every tool a build of the selected targets needs
    Warm(WarmArgs),
    /// Warm the cache, then build an executable per selected target
    ///
    /// Exits non-zero if any target failed; the others are still built.
    Build(BuildArgs),
    /// List the targets we can build
    Targets(TargetsArgs),
    /// Show what's in the asset cache
    CacheStatus(CacheStatusArgs),
    /// Print the JSON schema of a report
    ReportSchema(ReportSchemaArgs),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum OutputFormat {
    Human,
    Json,
}

/// Which targets to act on
///
/// With nothing set, just the machine we're running on.
#[derive(Args, Clone, Debug, Default)]
pub struct SelectionArgs {
    /// Only these platforms (darwin, linux, win32)
    #[clap(long, value_delimiter = ',')]
    pub platform: Vec<String>,
    /// Only these architectures (x64, arm64)
    #[clap(long, value_delimiter = ',')]
    pub arch: Vec<String>,
    /// Only these libcs (glibc, musl); implies linux unless --platform says otherwise
    #[clap(long, value_delimiter = ',')]
    pub libc: Vec<String>,
    /// Every supported target
    #[clap(long)]
    pub all: bool,
}

impl SelectionArgs {
    pub fn to_selection(&self) -> DistResult<TargetSelection> {
        Ok(TargetSelection {
            all: self.all,
            platforms: self
                .platform
                .iter()
                .map(|s| s.parse())
                .collect::<DistResult<_>>()?,
            arches: self
                .arch
                .iter()
                .map(|s| s.parse())
                .collect::<DistResult<_>>()?,
            libcs: self
                .libc
                .iter()
                .map(|s| s.parse())
                .collect::<DistResult<_>>()?,
        })
    }
}

#[derive(Args, Clone, Debug)]
pub struct WarmArgs {
    #[clap(flatten)]
    pub selection: SelectionArgs,
}

#[derive(Args, Clone, Debug)]
pub struct BuildArgs {
    /// The script the executables run
    #[clap(long)]
    pub entry: Utf8PathBuf,
    /// Embed a file, as VIRTUAL_PATH=HOST_PATH (repeatable)
    #[clap(long = "asset")]
    pub assets: Vec<String>,
    /// Treat the entry point as a startup snapshot script
    #[clap(long)]
    pub snapshot: bool,
    /// An archive to inject as a virtual filesystem
    #[clap(long)]
    pub vfs: Option<Utf8PathBuf>,
    /// Where to write executables (default: ./dist)
    #[clap(long)]
    pub out_dir: Option<Utf8PathBuf>,
    /// How many targets to build at once (0 = no limit, default: one per cpu)
    #[clap(long, short)]
    pub jobs: Option<usize>,
    /// Base name of the executables (default: the entry point's file stem)
    #[clap(long)]
    pub product: Option<String>,
    #[clap(flatten)]
    pub selection: SelectionArgs,
}

#[derive(Args, Clone, Debug)]
pub struct TargetsArgs {
    #[clap(flatten)]
    pub selection: SelectionArgs,
}

#[derive(Args, Clone, Debug)]
pub struct CacheStatusArgs {
    /// Don't ask the release host which tags are current
    #[clap(long)]
    pub offline: bool,
}

#[derive(Args, Clone, Debug)]
pub struct ReportSchemaArgs {
    /// Which report
    #[clap(value_enum, default_value_t = ReportKind::Build)]
    pub report: ReportKind,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum ReportKind {
    Build,
    Warm,
}
