//! # Batch Media Optimizer - Main Entry Point
//!
//! Questo è il punto di ingresso principale dell'applicazione.
//!
//! ## Responsabilità:
//! - Parsing degli argomenti della command line con `clap`
//! - Inizializzazione del sistema di logging con `tracing`
//! - Risoluzione della configurazione (default, file utente, override `--set`)
//! - Discovery delle immagini, pianificazione dei task e avvio dell'orchestratore
//!
//! ## Flusso di esecuzione:
//! 1. Parsa gli argomenti CLI
//! 2. Configura il logging (INFO o DEBUG a seconda del flag verbose, `RUST_LOG` se presente)
//! 3. Risolve la configurazione a tre livelli
//! 4. Trova le immagini e calcola i path di output
//! 5. Rileva l'engine ed esegue il batch
//! 6. Stampa il riepilogo (o il messaggio JSON finale)
//!
//! ## Esempio di utilizzo:
//! ```bash
//! media-optimizer ./photos --output ./optimized --threads 8 --set defaultSettings.jpeg.quality=75
//! media-optimizer ./photos --convert-to webp --engine fallback --json
//! ```

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use batch_media_optimizer::config::{default_user_config_path, load_layer};
use batch_media_optimizer::json_output::{JsonMessage, JsonProgressSink};
use batch_media_optimizer::progress::ProgressManager;
use batch_media_optimizer::resolver::overrides_from_pairs;
use batch_media_optimizer::{
    resolve, BatchAggregate, BatchOrchestrator, CapabilityProbe, Config, FileManager, ImageFormat,
    ProgressSink, TaskPlanner,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EngineChoice {
    /// ImageMagick when installed, otherwise the built-in codecs
    Auto,
    /// ImageMagick only
    Primary,
    /// Built-in codecs only
    Fallback,
}

#[derive(Parser)]
#[command(name = "media-optimizer")]
#[command(about = "Optimize, resize and convert images in parallel")]
struct Args {
    /// Image file or directory to optimize
    input: PathBuf,

    /// Output directory (defaults to writing next to the inputs, never over them
    /// unless output.overwriteOriginal is set)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// JSON configuration file (defaults to the user config file, if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override a configuration key, e.g. --set processing.maxThreads=8
    #[arg(long = "set", value_name = "KEY=VALUE")]
    overrides: Vec<String>,

    /// Number of parallel workers (defaults to processing.maxThreads)
    #[arg(short, long)]
    threads: Option<usize>,

    /// Convert every image to this format (jpeg, png, webp, avif)
    #[arg(long, value_name = "FORMAT")]
    convert_to: Option<ImageFormat>,

    /// Transformation engine
    #[arg(long, value_enum, default_value_t = EngineChoice::Auto)]
    engine: EngineChoice,

    /// Emit JSON lines on stdout instead of a progress bar
    #[arg(long)]
    json: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    init_logging(&args)?;

    match run(&args).await {
        Ok(aggregate) if aggregate.error_count > 0 => Ok(ExitCode::from(2)),
        Ok(_) => Ok(ExitCode::SUCCESS),
        Err(e) if args.json => {
            JsonMessage::error(e.to_string(), e.chain().nth(1).map(|s| s.to_string())).emit();
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e),
    }
}

fn init_logging(args: &Args) -> Result<()> {
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    // in modalità JSON stdout è riservato ai messaggi
    if args.json {
        tracing::subscriber::set_global_default(builder.with_writer(std::io::stderr).finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

async fn run(args: &Args) -> Result<BatchAggregate> {
    let start_time = Instant::now();
    let config = Arc::new(load_config(args).await?);

    if let Some(ref output_dir) = args.output {
        if output_dir.exists() && !output_dir.is_dir() {
            return Err(anyhow::anyhow!("Output path is not a directory: {}", output_dir.display()));
        }
    }

    let files = FileManager::discover(&args.input, config.processing.min_file_size_kb)?;
    let input_root = if args.input.is_dir() {
        args.input.clone()
    } else {
        args.input.parent().map(PathBuf::from).unwrap_or_default()
    };
    let tasks = TaskPlanner::new(input_root, args.output.clone(), &config.output)
        .with_conversion(args.convert_to)
        .plan_all(&files);

    let probe = CapabilityProbe::new()
        .primary_enabled(args.engine != EngineChoice::Fallback)
        .fallback_enabled(args.engine != EngineChoice::Primary);
    let orchestrator = BatchOrchestrator::with_probe(config.clone(), &probe).await;
    let threads = args.threads.unwrap_or(config.processing.max_threads);

    if args.json {
        JsonMessage::start(
            args.input.clone(),
            args.output.clone(),
            tasks.len(),
            orchestrator.engine().kind(),
            threads,
        )
        .emit();
    } else {
        info!("Found {} images in {}", tasks.len(), args.input.display());
        if let Some(format) = args.convert_to {
            info!("Converting everything to {}", format);
        }
    }

    let progress_bar = (!args.json && !tasks.is_empty())
        .then(|| Arc::new(ProgressManager::new(tasks.len() as u64)));
    let sink: Option<Arc<dyn ProgressSink>> = if args.json {
        Some(Arc::new(JsonProgressSink))
    } else {
        progress_bar.clone().map(|bar| bar as Arc<dyn ProgressSink>)
    };

    let aggregate = orchestrator.run(tasks, threads, sink).await?;

    if args.json {
        for result in &aggregate.results {
            JsonMessage::file_complete(result).emit();
        }
        JsonMessage::complete(&aggregate, start_time.elapsed().as_secs_f64()).emit();
    } else {
        if let Some(bar) = progress_bar {
            bar.finish(&aggregate.format_summary());
        }
        print_summary(&aggregate, start_time.elapsed().as_secs_f64());
    }

    Ok(aggregate)
}

/// Merge built-in defaults, the user file and `--set` overrides
async fn load_config(args: &Args) -> Result<Config> {
    let user_layer = match args.config {
        Some(ref path) => Some(
            load_layer(path)
                .await?
                .with_context(|| format!("Configuration file not found: {}", path.display()))?,
        ),
        None => match default_user_config_path() {
            Some(path) => load_layer(&path).await?,
            None => None,
        },
    };

    let call_layer = if args.overrides.is_empty() {
        None
    } else {
        Some(overrides_from_pairs(&args.overrides)?)
    };

    let config = resolve(&Config::builtin_defaults(), user_layer.as_ref(), call_layer.as_ref())?;
    Ok(config)
}

fn print_summary(aggregate: &BatchAggregate, duration: f64) {
    info!("Completed in {:.1}s", duration);
    info!(
        "Files: {} processed, {} succeeded, {} failed",
        aggregate.total_processed, aggregate.success_count, aggregate.error_count
    );
    info!(
        "Size: {} -> {} (saved {}, {:.1}%)",
        FileManager::format_size(aggregate.total_original_size()),
        FileManager::format_size(aggregate.total_optimized_size()),
        FileManager::format_size(aggregate.bytes_saved()),
        aggregate.overall_reduction_percent()
    );
    info!(
        "Workers used: {}, average time per file: {:?}",
        aggregate.worker_ids_used.len(),
        aggregate.average_duration
    );
    if let Some(delta) = aggregate.memory_delta_mb {
        info!("Memory delta: {:+.1} MB", delta);
    }

    for (file_name, message) in aggregate.errors() {
        warn!("{}: {}", file_name, message);
    }
}
