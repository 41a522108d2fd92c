// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
//
// SPDX-License-Identifier: MIT

//! Command-line interface for the stashgen binary.
//!
//! Running without a subcommand performs a full generation run. The
//! `preview`, `backup` and `sync` subcommands expose the individual stages.

use std::{
    io::{self, Write},
    path::{Path, PathBuf},
    process,
};

use clap::{ArgAction, Args, Parser, Subcommand};
use serde::Serialize;
use stashgen::{
    BackupReport, DeviceStatus, Error, GitCli, Pipeline, PreviewDocument, RenderMode, RunOptions,
    RunOutcome, Settings, SyncResult, VersionControl, io_error, rotate, timestamp_tag,
};
use tracing_subscriber::EnvFilter;

/// Generate per-device Stash profiles, QR codes and backups.
#[derive(Debug, Parser,)]
#[command(name = "stashgen", version, about = "Generate Stash proxy profiles from a device spreadsheet")]
struct Cli
{
    #[command(subcommand)]
    command: Option<Command,>,

    #[command(flatten)]
    global: GlobalArgs,

    /// Run arguments accepted when no subcommand is given.
    #[command(flatten)]
    legacy: RunArgs,
}

#[derive(Debug, Subcommand,)]
/// Supported commands exposed by the CLI.
enum Command
{
    /// Generate profiles, rotate backups and sync the repository.
    Run(RunArgs,),
    /// Print the rendered profiles without writing anything.
    Preview(PreviewArgs,),
    /// Archive the output directory and prune old bundles.
    Backup(BackupArgs,),
    /// Synchronize the repository with its remote.
    Sync(SyncArgs,),
}

/// Settings overrides shared by every command.
#[derive(Debug, Args, Default,)]
struct GlobalArgs
{
    /// Settings file. Defaults to `stashgen.yaml` in the working directory.
    #[arg(long = "config", value_name = "PATH", env = "STASHGEN_CONFIG", global = true)]
    config: Option<PathBuf,>,

    /// Repository holding the output directory.
    #[arg(long = "repo", value_name = "DIR", global = true)]
    repo: Option<PathBuf,>,

    /// Device spreadsheet (.xlsx, .xls, .ods or .csv).
    #[arg(long = "input", value_name = "PATH", global = true)]
    input: Option<PathBuf,>,

    /// Public base URL the output directory is served from.
    #[arg(long = "cdn-base", value_name = "URL", global = true)]
    cdn_base: Option<String,>,

    /// Profile layout.
    #[arg(long = "mode", value_enum, global = true)]
    mode: Option<RenderMode,>,

    /// Number of backup bundles to retain.
    #[arg(long = "keep", value_name = "N", global = true)]
    keep: Option<usize,>,

    /// Enable debug logging.
    #[arg(short = 'v', long = "verbose", action = ArgAction::SetTrue, global = true)]
    verbose: bool,
}

#[derive(Debug, Args, Default, Clone,)]
struct RunArgs
{
    /// Regenerate even when the spreadsheet has not changed.
    #[arg(long = "force", action = ArgAction::SetTrue)]
    force: bool,

    /// Skip repository synchronization.
    #[arg(long = "no-sync", action = ArgAction::SetTrue)]
    no_sync: bool,

    /// Skip backup rotation.
    #[arg(long = "no-backup", action = ArgAction::SetTrue)]
    no_backup: bool,

    /// Tag for the backup bundle and cache busting. Defaults to the current time.
    #[arg(long = "tag", value_name = "TAG")]
    tag: Option<String,>,

    /// Print the run report as JSON.
    #[arg(long = "json", action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(Debug, Args,)]
struct PreviewArgs
{
    /// Version tag appended to public URLs when cache busting is enabled.
    #[arg(long = "tag", value_name = "TAG")]
    tag: Option<String,>,

    /// Print the documents as JSON.
    #[arg(long = "json", action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(Debug, Args,)]
struct BackupArgs
{
    /// Bundle tag. Defaults to the current time.
    #[arg(long = "tag", value_name = "TAG")]
    tag: Option<String,>,

    /// Print the rotation report as JSON.
    #[arg(long = "json", action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(Debug, Args,)]
struct SyncArgs
{
    /// Print the sync result as JSON.
    #[arg(long = "json", action = ArgAction::SetTrue)]
    json: bool,
}

/// Entry point that reports errors and sets the appropriate exit status.
fn main()
{
    if let Err(error,) = run() {
        eprintln!("{}", error.to_display_string());
        process::exit(1,);
    }
}

/// Executes the CLI using parsed arguments.
///
/// # Errors
///
/// Propagates settings, input and output errors. Device encoding failures and
/// an explicit `sync` that could not run are also reported as errors after
/// the summary has been printed.
fn run() -> Result<(), Error,>
{
    let cli = Cli::parse();
    init_tracing(cli.global.verbose,);

    let settings = load_settings(&cli.global,)?;
    match cli.command {
        Some(Command::Run(args,),) => run_generate(settings, &args,),
        Some(Command::Preview(args,),) => run_preview(settings, &args,),
        Some(Command::Backup(args,),) => run_backup(&settings, &args,),
        Some(Command::Sync(args,),) => run_sync(&settings, &args,),
        None => run_generate(settings, &cli.legacy,),
    }
}

fn init_tracing(verbose: bool,)
{
    let filter = if verbose {
        EnvFilter::new("debug",)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info",),)
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter,)
        .with_target(false,)
        .with_writer(io::stderr,)
        .try_init();
}

/// Loads the settings file and applies command-line overrides.
fn load_settings(args: &GlobalArgs,) -> Result<Settings, Error,>
{
    let mut settings = Settings::load(args.config.as_deref(),)?;
    apply_overrides(&mut settings, args,);
    settings.validate()?;
    Ok(settings,)
}

fn apply_overrides(settings: &mut Settings, args: &GlobalArgs,)
{
    if let Some(repo,) = &args.repo {
        settings.repo_path = repo.clone();
    }
    if let Some(input,) = &args.input {
        settings.input = input.clone();
    }
    if let Some(cdn_base,) = &args.cdn_base {
        settings.cdn_base = cdn_base.clone();
    }
    if let Some(mode,) = args.mode {
        settings.mode = mode;
    }
    if let Some(keep,) = args.keep {
        settings.keep_backups = keep;
    }
}

fn run_generate(settings: Settings, args: &RunArgs,) -> Result<(), Error,>
{
    let pipeline = Pipeline::new(settings,)?.with_progress(!args.json,);
    let options = RunOptions {
        force:       args.force,
        tag:         args.tag.clone().unwrap_or_else(timestamp_tag,),
        skip_backup: args.no_backup,
        skip_sync:   args.no_sync,
    };

    let outcome = pipeline.run(&options,)?;

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    if args.json {
        write_json(&mut handle, &outcome,)?;
    } else {
        write_outcome(&mut handle, &outcome,)?;
    }

    ensure_published(&outcome,)
}

/// Fails with [`Error::Incomplete`] when a completed run left devices
/// unpublished.
fn ensure_published(outcome: &RunOutcome,) -> Result<(), Error,>
{
    let RunOutcome::Completed(report,) = outcome else {
        return Ok((),);
    };
    let failed = report.devices.iter().filter(|device| device.status == DeviceStatus::Failed,).count();
    if failed > 0 {
        return Err(Error::Incomplete {
            failed,
            total: report.devices.len(),
        },);
    }
    Ok((),)
}

fn run_preview(settings: Settings, args: &PreviewArgs,) -> Result<(), Error,>
{
    let documents = Pipeline::new(settings,)?.preview(args.tag.as_deref(),)?;

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    if args.json {
        write_json(&mut handle, &documents,)?;
        return Ok((),);
    }

    write_previews(&mut handle, &documents,)
}

fn run_backup(settings: &Settings, args: &BackupArgs,) -> Result<(), Error,>
{
    let paths = settings.resolve();
    let tag = args.tag.clone().unwrap_or_else(timestamp_tag,);
    let report = rotate(&paths.output, &paths.backups, &tag, settings.keep_backups,)?;

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    if args.json {
        write_json(&mut handle, &report,)?;
        return Ok((),);
    }

    write_backup(&mut handle, &report,)
}

fn run_sync(settings: &Settings, args: &SyncArgs,) -> Result<(), Error,>
{
    let result = GitCli::new(&settings.sync,).sync(&settings.resolve().repo,);

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    if args.json {
        write_json(&mut handle, &result,)?;
    } else {
        write_sync(&mut handle, &result,)?;
    }

    if result.ok { Ok((),) } else { Err(Error::publish(result.message,),) }
}

fn stdout_error(source: io::Error,) -> Error
{
    io_error(Path::new("<stdout>",), source,)
}

fn write_json<W: Write, T: Serialize,>(writer: &mut W, value: &T,) -> Result<(), Error,>
{
    serde_json::to_writer_pretty(&mut *writer, value,).map_err(|source| Error::Report {
        source,
    },)?;
    writeln!(writer).map_err(stdout_error,)
}

fn write_outcome<W: Write,>(writer: &mut W, outcome: &RunOutcome,) -> Result<(), Error,>
{
    let report = match outcome {
        RunOutcome::Skipped {
            fingerprint,
            last,
        } => {
            writeln!(writer, "Input unchanged (fingerprint {fingerprint}, last {last}); nothing to do.")
                .map_err(stdout_error,)?;
            return Ok((),);
        }
        RunOutcome::Completed(report,) => report,
    };

    for device in &report.devices {
        match (&device.status, &device.artifact,) {
            (DeviceStatus::Published, Some(artifact,),) => {
                writeln!(
                    writer,
                    "Phone{:<6} {}\n    document: {}\n    qr code:  {}",
                    device.id,
                    artifact.public_url,
                    artifact.config_path.display(),
                    artifact.image_path.display()
                )
                .map_err(stdout_error,)?;
                if let Some(descriptor,) = &device.descriptor {
                    writeln!(writer, "    provider: {}", descriptor.display()).map_err(stdout_error,)?;
                }
            }
            _ => {
                writeln!(
                    writer,
                    "Phone{:<6} FAILED: {}",
                    device.id,
                    device.error.as_deref().unwrap_or("unknown error",)
                )
                .map_err(stdout_error,)?;
                if let Some(public_url,) = &device.public_url {
                    writeln!(writer, "    url:      {public_url}").map_err(stdout_error,)?;
                }
                if let Some(document,) = &device.document {
                    writeln!(writer, "    document: {}", document.display()).map_err(stdout_error,)?;
                }
                if let Some(descriptor,) = &device.descriptor {
                    writeln!(writer, "    provider: {}", descriptor.display()).map_err(stdout_error,)?;
                }
            }
        }
    }

    if let Some(backup,) = &report.backup {
        write_backup(writer, backup,)?;
    }
    if let Some(sync,) = &report.sync {
        writeln!(writer, "Sync: {}", sync.message).map_err(stdout_error,)?;
    }
    for warning in &report.warnings {
        writeln!(writer, "warning: {warning}").map_err(stdout_error,)?;
    }

    let published = report.devices.iter().filter(|device| device.status == DeviceStatus::Published,).count();
    writeln!(writer, "{published}/{} devices published.", report.devices.len()).map_err(stdout_error,)?;
    Ok((),)
}

fn write_previews<W: Write,>(writer: &mut W, documents: &[PreviewDocument],) -> Result<(), Error,>
{
    for document in documents {
        writeln!(writer, "# {} -> {}", document.slot, document.public_url).map_err(stdout_error,)?;
        writer.write_all(document.document.as_bytes(),).map_err(stdout_error,)?;
        if let Some(descriptor,) = &document.descriptor {
            writeln!(writer, "# providers/proxy_{}.yaml", document.id).map_err(stdout_error,)?;
            writer.write_all(descriptor.as_bytes(),).map_err(stdout_error,)?;
        }
    }
    Ok((),)
}

fn write_backup<W: Write,>(writer: &mut W, report: &BackupReport,) -> Result<(), Error,>
{
    let written = match &report.archive {
        Some(archive,) => writeln!(
            writer,
            "Backup: {} ({} kept, {} removed)",
            archive.display(),
            report.retained.len(),
            report.removed.len()
        ),
        None => writeln!(writer, "Backup: output directory empty, nothing archived"),
    };
    written.map_err(stdout_error,)
}

fn write_sync<W: Write,>(writer: &mut W, result: &SyncResult,) -> Result<(), Error,>
{
    for step in &result.steps {
        let status = if step.succeeded { "ok" } else { "failed" };
        writeln!(writer, "git {:<40} {status}", step.command).map_err(stdout_error,)?;
    }
    writeln!(writer, "Sync: {}", result.message).map_err(stdout_error,)
}
