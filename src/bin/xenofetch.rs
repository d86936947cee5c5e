use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use xenofetch::cache::CacheStore;
use xenofetch::config::ConfigLoader;
use xenofetch::download::{DownloadStage, HttpAudioSource};
use xenofetch::error::XenoError;
use xenofetch::fetch::run_batch;
use xenofetch::output::{LogSink, write_summary};
use xenofetch::species::read_species_list;
use xenofetch::xeno::XenoHttpClient;

#[derive(Parser)]
#[command(name = "xenofetch")]
#[command(about = "Fetches bird-recording metadata and audio from the xeno-canto catalog")]
#[command(version, author)]
struct Cli {
    /// Path to the JSON config file (default: xenofetch.json if present).
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Fetch recording metadata pages into the cache")]
    Fetch(FetchArgs),
    #[command(about = "Download audio files for every cached page")]
    Download,
}

#[derive(Args)]
struct FetchArgs {
    /// Species list CSV; overrides the configured path.
    #[arg(long)]
    species_list: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<XenoError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &XenoError) -> u8 {
    match error {
        XenoError::ConfigRead(_)
        | XenoError::ConfigParse(_)
        | XenoError::MissingApiKey
        | XenoError::InvalidPerPage(_)
        | XenoError::InvalidSpeciesName(_)
        | XenoError::SpeciesList(_) => 2,
        XenoError::InvalidApiKey
        | XenoError::RateLimitExceeded { .. }
        | XenoError::Network(_)
        | XenoError::UnexpectedStatus { .. } => 3,
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
    let mut config = ConfigLoader::resolve(cli.config.as_deref()).into_diagnostic()?;
    let sink = LogSink;

    match cli.command {
        Commands::Fetch(args) => {
            if let Some(path) = args.species_list {
                config.species_list = path.into();
            }
            let species =
                read_species_list(&config.species_list, config.country.as_deref())
                    .into_diagnostic()?;
            let cache = CacheStore::new(config.cache_dir.clone());
            let mut client = XenoHttpClient::new(&config).into_diagnostic()?;

            let started = chrono::Utc::now();
            tracing::info!(started = %started.to_rfc3339(), species = species.len(), "fetch run started");
            let summary = run_batch(&mut client, &cache, &config, &species, &sink)
                .into_diagnostic()?;
            write_summary(&config.summary_file, &summary.rows).into_diagnostic()?;

            tracing::info!(
                species = summary.rows.len(),
                api_calls = summary.api_calls,
                minutes = %format!("{:.1}", summary.elapsed.as_secs_f64() / 60.0),
                summary_file = %config.summary_file,
                "fetch run complete"
            );
            Ok(())
        }
        Commands::Download => {
            let cache = CacheStore::new(config.cache_dir.clone());
            let mut source = HttpAudioSource::new().into_diagnostic()?;
            let stats = DownloadStage::new(&mut source, &cache, &config)
                .run(&sink)
                .into_diagnostic()?;
            tracing::info!(
                downloaded = stats.downloaded,
                already_present = stats.already_present,
                size_exceeded = stats.size_exceeded,
                failed = stats.failed,
                "download run complete"
            );
            Ok(())
        }
    }
}
