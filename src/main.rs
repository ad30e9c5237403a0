//! Azkaban CLI
//!
//! Entry point for the `azkaban` command-line tool.

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use azkaban_cli::alias::{AliasResolver, Endpoint};
use azkaban_cli::archive::{ArchiveBuilder, ArchiveError};
use azkaban_cli::config::{self, ConfigError, Settings};
use azkaban_cli::project::{load_manifest, CompiledProject, ManifestError, ProjectError};
use azkaban_cli::session::{
    FileSessionStore, HttpTransport, RetryPolicy, SessionClient, SessionError, TransportError,
};
use azkaban_cli::signal::{SignalHandler, EXIT_CODE_INTERRUPTED};
use azkaban_protocol::ops::Concurrency;
use chrono::{NaiveDate, NaiveTime, Timelike, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use dialoguer::{theme::ColorfulTheme, Confirm};
use regex_lite::Regex;

const DEFAULT_MANIFEST: &str = "azkaban.toml";

#[derive(Parser)]
#[command(name = "azkaban")]
#[command(about = "Build Azkaban projects and manage them on a server", version)]
struct Cli {
    /// Server URL, optionally with a user (`user@https://host:8443`)
    #[arg(long, short = 'u', global = true, conflicts_with = "alias")]
    url: Option<String>,

    /// Alias from aliases.toml (default: the alias marked default)
    #[arg(long, short = 'a', global = true)]
    alias: Option<String>,

    /// Configuration directory (default: $AZKABAN_CONFIG_DIR or ~/.config/azkaban)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct ManifestArgs {
    /// Project manifest
    #[arg(long, short = 'm', default_value = DEFAULT_MANIFEST)]
    manifest: PathBuf,
}

#[derive(clap::Args)]
struct ProjectArgs {
    /// Remote project name (default: the manifest's project name)
    #[arg(long, short = 'p')]
    project: Option<String>,

    /// Project manifest
    #[arg(long, short = 'm', default_value = DEFAULT_MANIFEST)]
    manifest: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the project archive
    Build {
        #[command(flatten)]
        manifest: ManifestArgs,

        /// Archive path (default: <project>.zip)
        #[arg(long)]
        path: Option<PathBuf>,

        /// Replace an existing archive
        #[arg(long, short = 'o')]
        overwrite: bool,
    },

    /// Show the jobs, files or options of the project
    Info {
        #[command(flatten)]
        manifest: ManifestArgs,

        /// List files instead of jobs
        #[arg(long, short = 'f', conflicts_with = "options")]
        files: bool,

        /// Show the options of a job
        #[arg(long, short = 'o')]
        options: Option<String>,
    },

    /// Create the project on the server
    Create {
        #[command(flatten)]
        project: ProjectArgs,

        /// Project description
        #[arg(long, short = 'd', default_value = "")]
        description: String,
    },

    /// Delete the project from the server
    Delete {
        #[command(flatten)]
        project: ProjectArgs,

        /// Do not ask for confirmation
        #[arg(long, short = 'y')]
        yes: bool,
    },

    /// Build the archive and upload it to the server
    Upload {
        #[command(flatten)]
        project: ProjectArgs,

        /// Upload an existing archive instead of building one
        #[arg(long)]
        archive: Option<PathBuf>,
    },

    /// Run a flow, or only some of its jobs
    Run {
        #[command(flatten)]
        project: ProjectArgs,

        /// Flow to run
        flow: String,

        /// Jobs of the flow to run (default: all)
        jobs: Vec<String>,

        /// What to do when the flow is already running
        #[arg(long, short = 'c', value_enum, default_value_t = ConcurrencyArg::Concurrent)]
        concurrency: ConcurrencyArg,

        /// Stream the execution log until the flow finishes
        #[arg(long, short = 'l')]
        log: bool,
    },

    /// Schedule a flow
    Schedule {
        #[command(flatten)]
        project: ProjectArgs,

        /// Flow to schedule
        flow: String,

        /// First run date, YYYY-MM-DD or MM/DD/YYYY (default: today, UTC)
        #[arg(long, short = 'd', value_parser = parse_date)]
        date: Option<NaiveDate>,

        /// First run time, HH:MM in UTC (default: now)
        #[arg(long, short = 't', value_parser = parse_time)]
        time: Option<NaiveTime>,

        /// Repeat every span, e.g. 1d, 12h, 30m, 2w, 1M
        #[arg(long, short = 's', value_parser = parse_span)]
        span: Option<String>,
    },

    /// Stream the log of an execution
    Log {
        /// Execution id
        exec_id: u64,

        /// Only show the log of this job
        #[arg(long, short = 'j')]
        job: Option<String>,
    },

    /// Cancel a running execution
    Cancel {
        /// Execution id
        exec_id: u64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ConcurrencyArg {
    Concurrent,
    Skip,
    Pipeline,
}

impl From<ConcurrencyArg> for Concurrency {
    fn from(arg: ConcurrencyArg) -> Self {
        match arg {
            ConcurrencyArg::Concurrent => Concurrency::Concurrent,
            ConcurrencyArg::Skip => Concurrency::Skip,
            ConcurrencyArg::Pipeline => Concurrency::Pipeline,
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Project(#[from] ProjectError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to install Ctrl-C handler: {0}")]
    Signal(#[from] ctrlc::Error),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Prompt(String),

    #[error("no job named '{job}' in project '{project}'")]
    UnknownJob { project: String, job: String },

    #[error("execution {exec_id} ended with status {status}")]
    ExecutionFailed { exec_id: u64, status: String },
}

impl CliError {
    fn exit_code(&self) -> i32 {
        match self {
            Self::Session(SessionError::Cancelled) => EXIT_CODE_INTERRUPTED,
            _ => 1,
        }
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        process::exit(e.exit_code());
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let remote = Remote {
        url: cli.url,
        alias: cli.alias,
        config_dir: cli.config_dir,
    };

    match cli.command {
        Commands::Build {
            manifest,
            path,
            overwrite,
        } => run_build(&manifest.manifest, path, overwrite),
        Commands::Info {
            manifest,
            files,
            options,
        } => run_info(&manifest.manifest, files, options.as_deref()),
        Commands::Create {
            project,
            description,
        } => {
            let name = project_name(&project)?;
            let (mut client, endpoint) = remote.connect()?;
            let created = client.create_project(&endpoint, &name, &description)?;
            println!("Project '{}' created.", created.name);
            if let Some(path) = created.path {
                println!("  {}/{}", endpoint.url, path);
            }
            Ok(())
        }
        Commands::Delete { project, yes } => {
            let name = project_name(&project)?;
            let (mut client, endpoint) = remote.connect()?;
            if !yes && !confirm(&format!("Delete project '{}' from {}?", name, endpoint.url))? {
                println!("Aborted.");
                return Ok(());
            }
            client.delete_project(&endpoint, &name)?;
            println!("Project '{}' deleted.", name);
            Ok(())
        }
        Commands::Upload { project, archive } => {
            let bytes = match &archive {
                Some(path) => read_file(path)?,
                None => {
                    let compiled = load_manifest(&project.manifest)?.build()?;
                    ArchiveBuilder::new(&compiled).build_bytes()?
                }
            };
            let name = project_name(&project)?;
            let (mut client, endpoint) = remote.connect()?;
            let receipt = client.upload_archive(&endpoint, &name, bytes)?;
            println!(
                "Project '{}' uploaded (id {}, version {}).",
                name, receipt.project_id, receipt.version
            );
            Ok(())
        }
        Commands::Run {
            project,
            flow,
            jobs,
            concurrency,
            log,
        } => {
            let name = project_name(&project)?;
            let (mut client, endpoint) = remote.connect()?;
            let selected = if jobs.is_empty() { None } else { Some(jobs.as_slice()) };
            let started =
                client.run_workflow(&endpoint, &name, &flow, selected, concurrency.into())?;
            println!(
                "Flow '{}' started: {}/executor?execid={}",
                flow, endpoint.url, started.exec_id
            );
            if log {
                follow_log(&mut client, &endpoint, started.exec_id, None)?;
            }
            Ok(())
        }
        Commands::Schedule {
            project,
            flow,
            date,
            time,
            span,
        } => {
            let name = project_name(&project)?;
            let now = Utc::now();
            let date = date.unwrap_or_else(|| now.date_naive());
            let time = time.unwrap_or_else(|| {
                let time = now.time();
                NaiveTime::from_hms_opt(time.hour(), time.minute(), 0).unwrap_or(time)
            });
            let (mut client, endpoint) = remote.connect()?;
            let receipt = client.schedule_workflow(&endpoint, &name, &flow, date, time, span)?;
            match receipt.schedule_id {
                Some(id) => println!("Flow '{}' scheduled (schedule id {}).", flow, id),
                None => println!("Flow '{}' scheduled.", flow),
            }
            Ok(())
        }
        Commands::Log { exec_id, job } => {
            let (mut client, endpoint) = remote.connect()?;
            follow_log(&mut client, &endpoint, exec_id, job.as_deref())
        }
        Commands::Cancel { exec_id } => {
            let (mut client, endpoint) = remote.connect()?;
            client.cancel_execution(&endpoint, exec_id)?;
            println!("Execution {} cancelled.", exec_id);
            Ok(())
        }
    }
}

/// Endpoint selection shared by the remote commands
struct Remote {
    url: Option<String>,
    alias: Option<String>,
    config_dir: Option<PathBuf>,
}

impl Remote {
    fn connect(&self) -> Result<(SessionClient, Endpoint), CliError> {
        let dir = match &self.config_dir {
            Some(dir) => dir.clone(),
            None => config::config_dir()?,
        };
        let settings = Settings::load_from_dir(&dir)?;
        let endpoint =
            AliasResolver::load_from_dir(&dir)?.resolve(self.url.as_deref(), self.alias.as_deref())?;
        log::debug!("connecting to {} (config in {})", endpoint, dir.display());

        let handler = SignalHandler::new();
        handler.install()?;

        let transport = HttpTransport::new(Duration::from_secs(settings.client.timeout_seconds))?;
        let client = SessionClient::new(Arc::new(transport))
            .with_store(Box::new(FileSessionStore::open_in_dir(&dir)))
            .with_policy(RetryPolicy::from(&settings.client))
            .with_cancel_flag(handler.state().cancel_flag());
        Ok((client, endpoint))
    }
}

fn run_build(manifest: &Path, path: Option<PathBuf>, overwrite: bool) -> Result<(), CliError> {
    let compiled = load_manifest(manifest)?.build()?;
    let path = path.unwrap_or_else(|| PathBuf::from(format!("{}.zip", compiled.name)));
    let summary = ArchiveBuilder::new(&compiled).write_to(&path, overwrite)?;

    println!("Project '{}' built: {}", compiled.name, summary.path.display());
    println!("  Entries: {}", summary.entries.len());
    println!("  Size: {} bytes", summary.size);
    println!("  SHA-256: {}", summary.sha256);
    Ok(())
}

fn run_info(manifest: &Path, files: bool, options: Option<&str>) -> Result<(), CliError> {
    let compiled = load_manifest(manifest)?.build()?;

    if let Some(job) = options {
        print_job_options(&compiled, job)?;
    } else if files {
        for (dest, source) in &compiled.files {
            println!("{}\t{}", dest, source.display());
        }
    } else {
        for (name, job) in &compiled.jobs {
            println!("{}\t{}", job.kind.code(), name);
        }
    }
    Ok(())
}

fn print_job_options(compiled: &CompiledProject, job: &str) -> Result<(), CliError> {
    let compiled_job = compiled.jobs.get(job).ok_or_else(|| CliError::UnknownJob {
        project: compiled.name.clone(),
        job: job.to_string(),
    })?;
    print!("{}", compiled_job.job_file);
    Ok(())
}

fn follow_log(
    client: &mut SessionClient,
    endpoint: &Endpoint,
    exec_id: u64,
    job: Option<&str>,
) -> Result<(), CliError> {
    let status = client.fetch_execution_log(endpoint, exec_id, job, |chunk| print!("{}", chunk))?;
    let final_status = match job {
        Some(job) => status
            .nodes
            .iter()
            .find(|node| node.id == job)
            .map(|node| node.status.clone())
            .unwrap_or(status.status),
        None => status.status,
    };
    println!();
    println!("Execution {} finished: {}", exec_id, final_status);
    if final_status == "SUCCEEDED" {
        Ok(())
    } else {
        Err(CliError::ExecutionFailed {
            exec_id,
            status: final_status,
        })
    }
}

fn project_name(args: &ProjectArgs) -> Result<String, CliError> {
    match &args.project {
        Some(name) => Ok(name.clone()),
        None => Ok(load_manifest(&args.manifest)?.name().to_string()),
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, CliError> {
    std::fs::read(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn confirm(prompt: &str) -> Result<bool, CliError> {
    Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(false)
        .interact()
        .map_err(|e| CliError::Prompt(e.to_string()))
}

fn parse_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%m/%d/%Y"))
        .map_err(|_| format!("invalid date '{}' (expected YYYY-MM-DD or MM/DD/YYYY)", value))
}

fn parse_time(value: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .map_err(|_| format!("invalid time '{}' (expected HH:MM)", value))
}

/// Azkaban periods: a count followed by M, w, d, h, m or s.
fn parse_span(value: &str) -> Result<String, String> {
    let pattern = Regex::new(r"^[0-9]+[Mwdhms]$").map_err(|e| e.to_string())?;
    if pattern.is_match(value) {
        Ok(value.to_string())
    } else {
        Err(format!("invalid span '{}' (expected e.g. 1d, 12h, 30m)", value))
    }
}
