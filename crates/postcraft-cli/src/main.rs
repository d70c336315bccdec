//! Postcraft CLI: entry point.
//!
//! # Commands
//!
//! - `postcraft run`: batch-generate card SVG, title and body for a dataset
//! - `postcraft generate --task T`: one dispatch, printed to stdout
//! - `postcraft status`: show configuration and provider status
//! - `postcraft init`: write a default config file

mod batch;
mod content;
mod helpers;
mod progress;
mod status;

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::{info, warn};

use postcraft_core::config::schema::LoggingConfig;
use postcraft_core::config::{load_config, save_config, Config};
use postcraft_providers::{DispatchError, Dispatcher};

use crate::batch::{load_dataset, BatchOptions, BatchRunner, Prompts};
use crate::helpers::{expand_tilde, resolve_config_path};

// ─────────────────────────────────────────────
// CLI definition
// ─────────────────────────────────────────────

/// 🧾 Postcraft: turn posts into social cards and copy with LLM failover
#[derive(Parser)]
#[command(name = "postcraft", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process a dataset: card SVG, title and body for every record
    Run {
        /// Config file (default: $CONFIG_FILE or ./config.json)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Dataset JSON (overrides files.inputJson)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Output directory (overrides files.outputDir)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Index of the first record to process
        #[arg(long, default_value_t = 0)]
        start: usize,

        /// Maximum number of records to process
        #[arg(long)]
        count: Option<usize>,

        /// Print provider usage when done
        #[arg(long, default_value_t = false)]
        stats: bool,

        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        logs: bool,
    },

    /// Run a single task and print the result
    Generate {
        /// Task name: svg, title or body
        #[arg(short, long)]
        task: String,

        /// File holding the system prompt
        #[arg(long)]
        system_file: PathBuf,

        /// Source text
        #[arg(long, conflicts_with = "text_file", required_unless_present = "text_file")]
        text: Option<String>,

        /// File holding the source text
        #[arg(long)]
        text_file: Option<PathBuf>,

        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(long, default_value_t = false)]
        logs: bool,
    },

    /// Show configuration and provider status
    Status {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Write a default configuration file
    Init {
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long, default_value_t = false)]
        force: bool,
    },
}

// ─────────────────────────────────────────────
// Entrypoint
// ─────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            input,
            output,
            start,
            count,
            stats,
            logs,
        } => {
            let config = load_and_init_logging(config.as_deref(), logs);
            run_batch(config, input, output, start, count, stats).await
        }
        Commands::Generate {
            task,
            system_file,
            text,
            text_file,
            config,
            logs,
        } => {
            let config = load_and_init_logging(config.as_deref(), logs);
            run_generate(&config, &task, &system_file, text, text_file.as_deref()).await
        }
        Commands::Status { config } => status::run(config.as_deref()),
        Commands::Init { config, force } => run_init(config.as_deref(), force),
    }
}

/// Load the config, start logging from its `logging` section, then report
/// anything that went wrong while loading it.
fn load_and_init_logging(config_flag: Option<&Path>, verbose: bool) -> Config {
    let path = resolve_config_path(config_flag);
    let loaded = load_config(Some(path.as_path()));
    init_logging(&loaded.config.logging, verbose);
    for warning in &loaded.warnings {
        warn!("{warning}");
    }
    loaded.config
}

fn warn_on_issues(config: &Config) {
    for issue in config.validate() {
        warn!("config: {issue}");
    }
}

// ─────────────────────────────────────────────
// run
// ─────────────────────────────────────────────

async fn run_batch(
    config: Config,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    start: usize,
    count: Option<usize>,
    show_stats: bool,
) -> Result<()> {
    warn_on_issues(&config);

    let input = input.unwrap_or_else(|| expand_tilde(&config.files.input_json));
    let output_dir = output.unwrap_or_else(|| expand_tilde(&config.files.output_dir));

    let prompts = Prompts::load(&config.files)?;
    let records = load_dataset(&input)?;
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("failed to create output dir {}", output_dir.display()))?;

    let dispatcher = Arc::new(Dispatcher::from_config(&config));
    let mut options = BatchOptions::new(output_dir, &config.batch);
    options.start = start;
    options.count = count;
    let runner = BatchRunner::new(Arc::clone(&dispatcher), prompts, options);

    let stop = runner.stop_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, stopping after the current record");
            stop.store(true, Ordering::SeqCst);
        }
    });

    let summary = runner.run(&records).await?;

    println!();
    println!(
        "{} processed {}, completed {}, unresolved {}, skipped {}{}",
        "🧾".cyan(),
        summary.processed,
        summary.completed.to_string().green(),
        summary.unresolved.to_string().yellow(),
        summary.skipped,
        if summary.interrupted {
            " (interrupted)".red().to_string()
        } else {
            String::new()
        }
    );

    if show_stats {
        helpers::print_stats(&dispatcher.stats().snapshot());
    }
    Ok(())
}

// ─────────────────────────────────────────────
// generate
// ─────────────────────────────────────────────

async fn run_generate(
    config: &Config,
    task: &str,
    system_file: &Path,
    text: Option<String>,
    text_file: Option<&Path>,
) -> Result<()> {
    warn_on_issues(config);

    let system_prompt = std::fs::read_to_string(system_file)
        .with_context(|| format!("failed to read {}", system_file.display()))?;
    let user_content = match (text, text_file) {
        (Some(text), _) => text,
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        (None, None) => bail!("either --text or --text-file is required"),
    };

    let dispatcher = Dispatcher::from_config(config);
    match dispatcher.generate(task, &system_prompt, &user_content).await {
        Ok(generation) => {
            info!(
                provider = %generation.provider,
                model = %generation.model,
                calls = generation.attempts,
                "Generated"
            );
            println!("{}", generation.text);
            Ok(())
        }
        Err(DispatchError::TaskFailed { task, attempts }) => {
            eprintln!("{} task '{}' failed on every provider:", "✗".red(), task);
            for attempt in &attempts {
                eprintln!("  {} {}", "·".dimmed(), attempt);
            }
            bail!("task '{task}' failed")
        }
        Err(e) => Err(e.into()),
    }
}

// ─────────────────────────────────────────────
// init
// ─────────────────────────────────────────────

fn run_init(config_flag: Option<&Path>, force: bool) -> Result<()> {
    let path = resolve_config_path(config_flag);

    println!();
    if path.exists() && !force {
        println!(
            "  {} config already exists at {} (use --force to overwrite)",
            "✓".green(),
            path.display()
        );
        println!();
        return Ok(());
    }

    save_config(&Config::default(), Some(path.as_path()))
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("  {} created config at {}", "✓".green(), path.display());
    println!();
    println!(
        "  {}",
        "Next: set OPENROUTER_API_KEY, SILICONFLOW_API_KEY, MOONSHOT_API_KEY, NOVITA_API_KEY"
            .dimmed()
    );
    println!(
        "  {}",
        "then write your prompt files and run `postcraft status`.".dimmed()
    );
    println!();
    Ok(())
}

// ─────────────────────────────────────────────
// Logging
// ─────────────────────────────────────────────

/// Initialize tracing: console and/or file output, filtered by `RUST_LOG`,
/// else `--logs`, else `logging.level`.
fn init_logging(config: &LoggingConfig, verbose: bool) {
    use std::sync::Mutex;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("postcraft=debug,postcraft_core=debug,postcraft_providers=debug,info")
        } else {
            EnvFilter::new(&config.level)
        }
    });

    let console = config.console.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .compact()
    });

    let file = config.file.as_deref().and_then(|path| {
        let path = expand_tilde(path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            let _ = std::fs::create_dir_all(parent);
        }
        match std::fs::OpenOptions::new().create(true).append(true).open(&path) {
            Ok(f) => Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(f))),
            Err(e) => {
                eprintln!("warning: cannot open log file {}: {e}", path.display());
                None
            }
        }
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init();
}
