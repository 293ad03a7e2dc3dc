use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use hsextract::config::{self, PipelineConfig};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "hsextract")]
#[command(about = "Catalog scientific data files into linked JSON metadata documents")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract metadata for every recognized file and link datasets
    Extract(ExtractArgs),
    /// Print how each file under a directory would be classified
    Classify(ClassifyArgs),
}

#[derive(Args)]
struct ExtractArgs {
    /// Input directory containing the data files
    input: PathBuf,

    /// Output directory for the metadata documents
    output: PathBuf,

    /// Public base URL of the output directory
    #[arg(long, default_value = config::DEFAULT_OUTPUT_BASE_URL)]
    output_base_url: String,

    /// Public base URL of the input directory
    #[arg(long, default_value = config::DEFAULT_INPUT_BASE_URL)]
    input_base_url: String,

    /// Name of the user metadata file that marks a dataset directory
    #[arg(long, default_value = config::DEFAULT_USER_METADATA_FILENAME)]
    user_metadata_filename: String,

    /// Max files extracted concurrently (defaults to available parallelism)
    #[arg(long)]
    max_parallel: Option<usize>,

    /// Per-file extraction timeout in seconds (0 disables)
    #[arg(long, default_value_t = config::DEFAULT_EXTRACT_TIMEOUT_SECS)]
    timeout_secs: u64,

    /// Remove the output directory before starting
    #[arg(long)]
    clean: bool,
}

#[derive(Args)]
struct ClassifyArgs {
    /// Input directory to classify
    input: PathBuf,

    /// Name of the user metadata file that marks a dataset directory
    #[arg(long, default_value = config::DEFAULT_USER_METADATA_FILENAME)]
    user_metadata_filename: String,
}

fn run_extract(args: ExtractArgs) -> Result<()> {
    if args.clean && args.output.exists() {
        info!("Cleaning output directory: {}", args.output.display());
        fs::remove_dir_all(&args.output).with_context(|| {
            format!("Failed to clean output directory: {}", args.output.display())
        })?;
    }

    let mut config = PipelineConfig::new(args.input, args.output);
    config.output_base_url = args.output_base_url;
    config.input_base_url = args.input_base_url;
    config.user_metadata_filename = args.user_metadata_filename;
    config.max_parallel = args.max_parallel.unwrap_or_else(config::default_parallelism).max(1);
    config.timeout = config::timeout_from_secs(args.timeout_secs);
    config.show_progress = true;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .thread_name("hsextract-worker")
        .enable_time()
        .build()
        .context("Failed to start runtime")?;
    let summary = rt.block_on(hsextract::pipeline::run_pipeline(config))?;
    let stats = &summary.stats;

    println!();
    println!("=== Summary ===");
    println!("Total time:         {:.2}s", summary.duration_secs);
    println!();
    println!("Files classified:   {}", stats.classified());
    println!("Files dispatched:   {}", stats.dispatched());
    println!("Files extracted:    {}", stats.extracted());
    println!("Files failed:       {}", stats.failed());
    println!("  of which timeout: {}", stats.timed_out());
    println!("Documents written:  {}", stats.written());
    println!("Datasets linked:    {}", stats.datasets());
    println!("Children linked:    {}", stats.children());
    if !summary.link.overlapping_claims.is_empty() {
        println!("Overlapping claims: {}", summary.link.overlapping_claims.len());
    }
    if !summary.link.failed_datasets.is_empty() {
        println!("Datasets skipped:   {}", summary.link.failed_datasets.len());
    }

    Ok(())
}

fn run_classify(args: ClassifyArgs) -> Result<()> {
    let classification =
        hsextract::classify::classify_tree(&args.input, &args.user_metadata_filename)?;
    let json = serde_json::to_string_pretty(&classification.buckets)
        .context("Failed to serialize classification")?;
    println!("{json}");
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {e}");
    }

    let result = match cli.command {
        Commands::Extract(args) => run_extract(args),
        Commands::Classify(args) => run_classify(args),
    };

    match result {
        Ok(()) => {
            info!("Completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Error: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
