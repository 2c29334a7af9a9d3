use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use archive_ingest::app::Pipeline;
use archive_ingest::config::{ConfigLoader, DEFAULT_DATA_DIR};
use archive_ingest::error::IngestError;
use archive_ingest::fetch::HttpArchiveSource;
use archive_ingest::output::{JsonOutput, OutputMode, TextOutput};
use archive_ingest::report::StatusStore;
use archive_ingest::store::Store;

#[derive(Parser)]
#[command(name = "archive-ingest")]
#[command(about = "Fetch, extract and normalize remote dataset archives, resumably")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run the pipeline over the catalog")]
    Run(RunArgs),
    #[command(about = "Print the status report of the last run")]
    Report(ReportArgs),
}

#[derive(Args)]
struct RunArgs {
    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    data_dir: Option<String>,

    #[arg(long)]
    limit: Option<usize>,

    #[arg(long, help = "Only process the first N catalog items")]
    take: Option<usize>,
}

#[derive(Args)]
struct ReportArgs {
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    data_dir: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<IngestError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &IngestError) -> u8 {
    match error {
        IngestError::MissingConfig
        | IngestError::ConfigRead(_)
        | IngestError::ConfigParse(_)
        | IngestError::InvalidItemKey(_)
        | IngestError::InvalidSourceUrl(_)
        | IngestError::DuplicateItemKey(_)
        | IngestError::InvalidColor(_)
        | IngestError::InvalidProfile(_) => 2,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };

    match cli.command {
        Commands::Run(args) => run_pipeline(args, output_mode),
        Commands::Report(args) => run_report(args),
    }
}

fn run_pipeline(args: RunArgs, output_mode: OutputMode) -> miette::Result<()> {
    let mut config = ConfigLoader::resolve(args.config.as_deref())?;
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(limit) = args.limit {
        config.limit = limit;
    }
    let take = args.take.unwrap_or(config.items.len());
    let items = &config.items[..take.min(config.items.len())];

    let source = HttpArchiveSource::new()?;
    let pipeline = Pipeline::from_config(&config, source);
    let result = pipeline.run(items)?;

    match output_mode {
        OutputMode::Json => JsonOutput::print_run(&result).into_diagnostic(),
        OutputMode::Text => TextOutput::print_run(&result).into_diagnostic(),
    }
}

fn run_report(args: ReportArgs) -> miette::Result<()> {
    let store = Store::new(args.data_dir);
    let status = StatusStore::new(store.report_path());
    JsonOutput::print_report(&status.load()).into_diagnostic()
}
