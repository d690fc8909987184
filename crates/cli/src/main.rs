// rawsync - pull tabular files over SFTP and reconcile them into SQLite

mod exit_codes;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};

use rawsync_ingest::config::{PipelineConfig, DEFAULT_CONFIG_FILE};
use rawsync_ingest::entity::EntityKind;
use rawsync_ingest::reconcile::ReconcileReport;
use rawsync_ingest::routing::{file_stem, RoutingOutcome, SheetRoute, UnknownSheetPolicy};
use rawsync_ingest::{
    IngestError, Pipeline, RunReport, SftpSource, SqliteStore, TargetAction, TargetOutcome,
};

use exit_codes::{ingest_exit_code, EXIT_STORE, EXIT_SUCCESS};

#[derive(Parser)]
#[command(name = "rawsync")]
#[command(about = "Pull tabular files over SFTP and reconcile them into SQLite")]
#[command(long_version = long_version())]
#[command(version)]
struct Cli {
    /// Config file (default: ./rawsync.toml if present)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Only log warnings and errors
    #[arg(long, short = 'q', global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Log debug detail (per-column renames, per-page fetches)
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// SFTP overrides. A flag wins over SFTP_API_* and over the config file.
#[derive(Args, Default)]
struct Credentials {
    /// SFTP host
    #[arg(long)]
    host: Option<String>,

    /// SFTP port
    #[arg(long)]
    port: Option<u16>,

    /// SFTP username
    #[arg(long)]
    username: Option<String>,

    /// SFTP password
    #[arg(long)]
    password: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Transfer every remote file, then ingest the staging directory
    #[command(after_help = "\
Examples:
  rawsync run
  rawsync run --config /etc/rawsync.toml
  SFTP_API_PASSWORD=... rawsync run --host files.example.com --username ingest")]
    Run {
        #[command(flatten)]
        credentials: Credentials,
    },

    /// Transfer every remote file into the staging directory only
    Transfer {
        #[command(flatten)]
        credentials: Credentials,
    },

    /// Ingest files already in the staging directory (no network)
    Ingest,

    /// Fetch every site from the sites API and upsert them
    Sites,

    /// Show how a file name would be routed
    #[command(after_help = "\
Examples:
  rawsync route people_in_department_merged.xlsx
  rawsync route ads_click.csv")]
    Route {
        /// File name (only the name is used; the file need not exist)
        file: String,
    },
}

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (", env!("GIT_COMMIT_HASH"), ")",
        "\ningest:  rawsync-ingest ", env!("CARGO_PKG_VERSION"),
        "\ntarget:  ", env!("TARGET"),
    )
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);

    let result = match cli.command {
        Commands::Run { credentials } => {
            load_config(cli.config.as_deref(), &credentials).and_then(|c| cmd_run(&c))
        }
        Commands::Transfer { credentials } => {
            load_config(cli.config.as_deref(), &credentials).and_then(|c| cmd_transfer(&c))
        }
        Commands::Ingest => {
            load_config(cli.config.as_deref(), &Credentials::default()).and_then(|c| cmd_ingest(&c))
        }
        Commands::Sites => {
            load_config(cli.config.as_deref(), &Credentials::default()).and_then(|c| cmd_sites(&c))
        }
        Commands::Route { file } => {
            load_config(cli.config.as_deref(), &Credentials::default())
                .and_then(|c| cmd_route(&c, &file))
        }
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

/// `log` records from the library reach the fmt subscriber through its log
/// bridge. RUST_LOG replaces the flag-derived filter entirely.
fn init_logging(quiet: bool, verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = match std::env::var("RUST_LOG") {
        Ok(directives) if !directives.is_empty() => EnvFilter::new(directives),
        _ if quiet => EnvFilter::new("rawsync=warn"),
        _ if verbose => EnvFilter::new("rawsync=debug"),
        _ => EnvFilter::new("rawsync=info"),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn store(msg: impl Into<String>) -> Self {
        Self { code: EXIT_STORE, message: msg.into(), hint: None }
    }

    /// Create error from a fatal pipeline error with the matching exit code.
    pub fn ingest(err: IngestError) -> Self {
        let code = ingest_exit_code(&err);
        let hint = match &err {
            IngestError::Locked { path, .. } => Some(format!(
                "another rawsync run is in progress; if it crashed, remove {path}"
            )),
            IngestError::Transfer(msg) if msg.contains("not found in") => {
                Some("add the server to known_hosts or set sftp.trust_on_first_use = true".to_string())
            }
            IngestError::Transfer(msg) if msg.contains("authentication failed") => {
                Some("check SFTP_API_USERNAME / SFTP_API_PASSWORD or --username / --password".to_string())
            }
            IngestError::Upstream(msg) if msg.contains("HTTP 401") || msg.contains("HTTP 403") => {
                Some("check SITES_API_PASSWORD".to_string())
            }
            _ => None,
        };
        Self { code, message: err.to_string(), hint }
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

// ============================================================================
// Config
// ============================================================================

/// file < environment < flags
fn load_config(path: Option<&Path>, credentials: &Credentials) -> Result<PipelineConfig, CliError> {
    let (path, required) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
    };
    let mut config = PipelineConfig::load(&path, required).map_err(|e| {
        CliError::ingest(e).with_hint(format!("fix or remove {}", path.display()))
    })?;
    log::debug!("config: {} ({})", path.display(), if required { "required" } else { "optional" });
    config.apply_env().map_err(CliError::ingest)?;

    if let Some(host) = &credentials.host {
        config.sftp.host = host.clone();
    }
    if let Some(port) = credentials.port {
        config.sftp.port = port;
    }
    if let Some(username) = &credentials.username {
        config.sftp.username = username.clone();
    }
    if let Some(password) = &credentials.password {
        config.sftp.password = Some(password.clone());
    }

    config.validate().map_err(CliError::ingest)?;
    Ok(config)
}

fn open_store(config: &PipelineConfig) -> Result<SqliteStore, CliError> {
    SqliteStore::open(&config.database.path).map_err(|e| {
        CliError::store(format!("cannot open {}: {e}", config.database.path.display()))
            .with_hint("set database.path or RAWSYNC_DATABASE to a writable location")
    })
}

fn pipeline(config: &PipelineConfig) -> Result<Pipeline, CliError> {
    Pipeline::new(config).map_err(CliError::ingest)
}

// ============================================================================
// Commands
// ============================================================================

fn cmd_run(config: &PipelineConfig) -> Result<(), CliError> {
    let pipeline = pipeline(config)?;
    let mut store = open_store(config)?;
    let mut source = SftpSource::connect(&config.sftp).map_err(CliError::ingest)?;
    let report = pipeline.run(&mut source, &mut store).map_err(CliError::ingest)?;
    print_run_summary(&report);
    Ok(())
}

fn cmd_transfer(config: &PipelineConfig) -> Result<(), CliError> {
    let pipeline = pipeline(config)?;
    let mut source = SftpSource::connect(&config.sftp).map_err(CliError::ingest)?;
    let report = pipeline.transfer(&mut source).map_err(CliError::ingest)?;
    print_run_summary(&report);
    Ok(())
}

fn cmd_ingest(config: &PipelineConfig) -> Result<(), CliError> {
    let pipeline = pipeline(config)?;
    let mut store = open_store(config)?;
    let report = pipeline.ingest_staged(&mut store).map_err(CliError::ingest)?;
    print_run_summary(&report);
    Ok(())
}

fn cmd_sites(config: &PipelineConfig) -> Result<(), CliError> {
    let pipeline = pipeline(config)?;
    let mut store = open_store(config)?;
    let report = pipeline.collect_sites(&mut store).map_err(CliError::ingest)?;
    eprintln!("sites: {}", reconcile_line(&report));
    for rejection in &report.rejected {
        eprintln!("  row {}: {}", rejection.row, rejection.error);
    }
    Ok(())
}

fn cmd_route(config: &PipelineConfig, file: &str) -> Result<(), CliError> {
    let pipeline = pipeline(config)?;
    let name = Path::new(file)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.to_string());

    match pipeline.router().route(&name) {
        RoutingOutcome::Direct(entity) if EntityKind::from_name(&entity).is_some() => {
            println!("{name}: direct -> {entity} (refused: entity table)");
        }
        RoutingOutcome::Direct(entity) => {
            println!("{name}: direct -> {entity} (append)");
        }
        RoutingOutcome::MultiSheet(routes) => {
            println!("{name}: multi-sheet");
            for (sheet, _) in routes.sheets() {
                match routes.resolve(sheet) {
                    SheetRoute::Entity(entity) => {
                        println!("  {sheet} -> {entity} ({})", action_for(&entity));
                    }
                    SheetRoute::Rejected => println!("  {sheet} -> rejected"),
                }
            }
            match routes.policy() {
                UnknownSheetPolicy::Reject => println!("  (other sheets) -> rejected"),
                UnknownSheetPolicy::Append => {
                    println!("  (other sheets) -> {}__<sheet> (append)", file_stem(&name))
                }
            }
        }
    }
    Ok(())
}

fn action_for(entity: &str) -> &'static str {
    match EntityKind::from_name(entity) {
        Some(_) => "upsert",
        None => "append",
    }
}

// ============================================================================
// Summary (stderr)
// ============================================================================

fn reconcile_line(report: &ReconcileReport) -> String {
    format!(
        "{} created, {} updated, {} rejected",
        report.created,
        report.updated,
        report.rejected.len()
    )
}

fn target_line(target: &TargetOutcome) -> String {
    let sheet = target
        .sheet
        .as_deref()
        .map(|s| format!("[{s}] "))
        .unwrap_or_default();
    match &target.action {
        TargetAction::Upserted(report) => {
            format!("{sheet}{}: {}", target.target, reconcile_line(report))
        }
        TargetAction::Appended(n) => format!("{sheet}{}: {n} rows appended", target.target),
        TargetAction::Rejected => format!("{sheet}rejected (not in routing table)"),
        TargetAction::Failed(e) => format!("{sheet}{}: FAILED {e}", target.target),
    }
}

fn print_run_summary(report: &RunReport) {
    eprintln!("run {}", report.run_id);

    if let Some(transfer) = &report.transfer {
        eprintln!(
            "transfer: {} staged, {} failed, {} directories skipped",
            transfer.staged.len(),
            transfer.failures.len(),
            transfer.skipped_dirs
        );
        for failure in &transfer.failures {
            eprintln!("  {}: {}", failure.name, failure.message);
        }
    }

    for file in &report.files {
        match &file.error {
            Some(e) => eprintln!("{}: FAILED {e}", file.file),
            None => {
                eprintln!("{}", file.file);
                for target in &file.targets {
                    eprintln!("  {}", target_line(target));
                }
            }
        }
    }

    if report.transfer.is_none() || !report.files.is_empty() {
        eprintln!(
            "total: {} file(s), {} created, {} updated, {} appended, {} rejected record(s), {} rejected sheet(s), {} failed file(s)",
            report.files.len(),
            report.created(),
            report.updated(),
            report.appended(),
            report.rejected_records(),
            report.rejected_sheets(),
            report.failed_files()
        );
    }
}
