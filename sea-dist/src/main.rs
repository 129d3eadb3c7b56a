use std::io::Write;
use std::panic;
use std::sync::Mutex;

use clap::Parser;
use cli::{Cli, Commands, OutputFormat, ReportKind};
use console::{style, Term};
use lazy_static::lazy_static;
use miette::{Diagnostic, IntoDiagnostic};
use sea_dist::config::Config;
use sea_dist::orchestrate::BuildSummary;
use sea_dist::platform::BuildTarget;
use sea_dist::{CacheStatusEntry, DistError};
use sea_dist_schema::{BuildReport, WarmReport, WarmStatusKind};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

mod cli;

type ReportErrorFunc = dyn Fn(&miette::Report) + Send + Sync + 'static;

lazy_static! {
    static ref REPORT_ERROR: Mutex<Option<Box<ReportErrorFunc>>> = Mutex::new(None);
}

fn set_report_errors_as_json() {
    if let Ok(mut guard) = REPORT_ERROR.lock() {
        *guard = Some(Box::new(move |error| {
            // Manually invoke JSONReportHandler to format the error as a report
            // to out_.
            let mut report = String::new();
            if miette::JSONReportHandler::new()
                .render_report(&mut report, error.as_ref())
                .is_ok()
            {
                let _ = writeln!(&mut Term::stdout(), r#"{{"error": {report}}}"#);
            }
        }));
    }
}

fn report_error(error: &miette::Report) {
    if let Ok(guard) = REPORT_ERROR.lock() {
        if let Some(do_report) = &*guard {
            do_report(error);
            return;
        }
    }
    error!("{:?}", error);
}

fn main() {
    let cli = Cli::parse();
    // Init the logger
    tracing_subscriber::fmt::fmt()
        .with_max_level(cli.verbose)
        .with_target(false)
        .without_time()
        .with_ansi(console::colors_enabled_stderr())
        .with_writer(std::io::stderr)
        .init();

    // Control how errors are formatted by setting the miette hook. This will
    // only be used for errors presented to humans, when formatting an error as
    // JSON, it will be handled by a custom `report_error` override, bypassing
    // the hook.
    let _ = miette::set_hook(Box::new(move |_| {
        let graphical_theme = if console::colors_enabled_stderr() {
            miette::GraphicalTheme::unicode()
        } else {
            miette::GraphicalTheme::unicode_nocolor()
        };
        Box::new(
            miette::MietteHandlerOpts::new()
                .graphical_theme(graphical_theme)
                .build(),
        )
    }));

    // Now that miette is set up, use it to format panics.
    panic::set_hook(Box::new(move |panic_info| {
        let payload = panic_info.payload();
        let message = if let Some(msg) = payload.downcast_ref::<&str>() {
            msg
        } else if let Some(msg) = payload.downcast_ref::<String>() {
            &msg[..]
        } else {
            "something went wrong"
        };

        #[derive(Debug, Error, Diagnostic)]
        #[error("{message}")]
        pub struct PanicError {
            pub message: String,
            #[help]
            pub help: Option<String>,
        }

        report_error(
            &miette::Report::from(PanicError {
                message: message.to_owned(),
                help: panic_info
                    .location()
                    .map(|loc| format!("at {}:{}:{}", loc.file(), loc.line(), loc.column())),
            })
            .wrap_err("sea-dist panicked"),
        );
    }));

    // If we're outputting JSON, replace the error report method such that it
    // writes errors out to the normal output stream as JSON.
    if cli.output_format == OutputFormat::Json {
        set_report_errors_as_json();
    }

    let main_result = real_main(&cli);

    let _ = main_result.map_err(|e| {
        report_error(&e);
        std::process::exit(-1);
    });
}

fn real_main(cli: &Cli) -> Result<(), miette::Report> {
    match &cli.command {
        Commands::Warm(args) => cmd_warm(cli, args),
        Commands::Build(args) => cmd_build(cli, args),
        Commands::Targets(args) => cmd_targets(cli, args),
        Commands::CacheStatus(args) => cmd_cache_status(cli, args),
        Commands::ReportSchema(args) => cmd_report_schema(args),
    }
}

fn runtime() -> Result<tokio::runtime::Runtime, miette::Report> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .into_diagnostic()
}

fn load_config(cli: &Cli) -> Result<Config, miette::Report> {
    Ok(Config::load(cli.config.as_deref())?)
}

fn print_json(out: &mut Term, report: &impl Serialize) -> Result<(), miette::Report> {
    let string = serde_json::to_string_pretty(report).into_diagnostic()?;
    writeln!(out, "{string}").into_diagnostic()?;
    Ok(())
}

fn cmd_warm(cli: &Cli, args: &cli::WarmArgs) -> Result<(), miette::Report> {
    let cfg = load_config(cli)?;
    let selection = args.selection.to_selection()?;
    let report = runtime()?.block_on(sea_dist::do_warm(&cfg, &selection))?;
    let mut out = Term::stdout();
    match cli.output_format {
        OutputFormat::Human => print_human_warm(&mut out, &report).into_diagnostic()?,
        OutputFormat::Json => print_json(&mut out, &report)?,
    }
    if !report.is_success() {
        let failed = report
            .assets
            .iter()
            .filter(|a| a.status == WarmStatusKind::Failed)
            .count();
        return Err(DistError::WarmFailed { failed }.into());
    }
    Ok(())
}

fn print_human_warm(out: &mut Term, report: &WarmReport) -> Result<(), std::io::Error> {
    for asset in &report.assets {
        let status = match asset.status {
            WarmStatusKind::Cached => style("cached").green(),
            WarmStatusKind::Refreshed => style("refreshed").green(),
            WarmStatusKind::Skipped => style("skipped").yellow(),
            WarmStatusKind::Failed => style("failed").red(),
            WarmStatusKind::Unknown => style("unknown").dim(),
        };
        let tag = asset.tag.as_deref().unwrap_or("-");
        writeln!(out, "{status:>9} {} ({}) {tag}", asset.tool, asset.key)?;
        if let Some(message) = &asset.message {
            writeln!(out, "          {}", style(message).dim())?;
        }
    }
    Ok(())
}

fn cmd_build(cli: &Cli, args: &cli::BuildArgs) -> Result<(), miette::Report> {
    let cfg = load_config(cli)?;
    let build_args = sea_dist::BuildArgs {
        entry: args.entry.clone(),
        assets: args.assets.clone(),
        snapshot: args.snapshot,
        vfs: args.vfs.clone(),
        out_dir: args.out_dir.clone(),
        jobs: args.jobs,
        product: args.product.clone(),
        selection: args.selection.to_selection()?,
    };
    let report = runtime()?.block_on(sea_dist::do_build(&cfg, &build_args))?;
    let mut out = Term::stdout();
    match cli.output_format {
        OutputFormat::Human => print_human_build(&mut out, &report).into_diagnostic()?,
        OutputFormat::Json => print_json(&mut out, &report)?,
    }
    BuildSummary::from(&report).into_result()?;
    Ok(())
}

fn print_human_build(out: &mut Term, report: &BuildReport) -> Result<(), std::io::Error> {
    for target in &report.targets {
        if target.success {
            let path = target.output_path.as_deref().unwrap_or_default();
            writeln!(out, "{} {} -> {path}", style("  ok").green(), target.target)?;
        } else {
            let stage = target.failed_stage.as_deref().unwrap_or("?");
            writeln!(out, "{} {} [{stage}]", style("FAIL").red(), target.target)?;
            if let Some(error) = &target.error {
                writeln!(out, "     {}", style(error).dim())?;
            }
        }
    }
    writeln!(
        out,
        "{} succeeded, {} failed",
        report.succeeded, report.failed
    )?;
    Ok(())
}

fn cmd_targets(cli: &Cli, args: &cli::TargetsArgs) -> Result<(), miette::Report> {
    let targets = sea_dist::do_targets(&args.selection.to_selection()?)?;
    let mut out = Term::stdout();
    match cli.output_format {
        OutputFormat::Human => {
            let host = BuildTarget::host();
            for target in &targets {
                let marker = if Some(*target) == host { " (host)" } else { "" };
                writeln!(out, "{target}{marker}").into_diagnostic()?;
            }
        }
        OutputFormat::Json => print_json(&mut out, &targets)?,
    }
    Ok(())
}

fn cmd_cache_status(cli: &Cli, args: &cli::CacheStatusArgs) -> Result<(), miette::Report> {
    let cfg = load_config(cli)?;
    let entries = runtime()?.block_on(sea_dist::do_cache_status(&cfg, !args.offline))?;
    let mut out = Term::stdout();
    match cli.output_format {
        OutputFormat::Human => {
            print_human_cache_status(&mut out, &cfg, &entries).into_diagnostic()?
        }
        OutputFormat::Json => print_json(&mut out, &entries)?,
    }
    Ok(())
}

fn print_human_cache_status(
    out: &mut Term,
    cfg: &Config,
    entries: &[CacheStatusEntry],
) -> Result<(), std::io::Error> {
    writeln!(out, "cache: {}", cfg.cache_dir)?;
    if entries.is_empty() {
        writeln!(out, "  (empty)")?;
    }
    for entry in entries {
        let tag = entry.tag.as_deref().unwrap_or("<no marker>");
        let freshness = match (entry.fresh, &entry.current) {
            (Some(true), _) => style("current".to_owned()).green(),
            (Some(false), Some(current)) => style(format!("stale, current is {current}")).yellow(),
            _ => style("unknown".to_owned()).dim(),
        };
        writeln!(out, "  {}/{} {tag} ({freshness})", entry.tool, entry.key)?;
    }
    Ok(())
}

fn cmd_report_schema(args: &cli::ReportSchemaArgs) -> Result<(), miette::Report> {
    let mut out = Term::stdout();
    match args.report {
        ReportKind::Build => print_json(&mut out, &BuildReport::json_schema()),
        ReportKind::Warm => print_json(&mut out, &WarmReport::json_schema()),
    }
}
