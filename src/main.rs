use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use starfeed::provider::build_providers;
use starfeed::reconcile::{is_semver_shaped, should_skip_tag};
use starfeed::watch::{run_once, Watcher};
use starfeed::{Config, PipelineSummary, ReleasePipeline};

#[derive(Parser)]
#[command(name = "starfeed")]
#[command(about = "Release feed for your starred repositories")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch releases once and write the feed
    Fetch {
        /// Output file, or "-" for stdout (overrides feed.output)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Fetch periodically until interrupted
    Watch {
        /// Poll interval, e.g. "30m" (overrides watch.interval)
        #[arg(short, long)]
        interval: Option<String>,

        /// Output file, or "-" for stdout (overrides feed.output)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// List configured providers
    Providers,

    /// Show whether tags would be skipped as noise
    CheckTag {
        /// Tags to check
        #[arg(required = true)]
        tags: Vec<String>,
    },

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // init and check-tag must work without a readable config
    match cli.command {
        Some(Commands::Init { force }) => {
            init_logging(cli.verbose, "info");
            return cmd_init(cli.config, force);
        }
        Some(Commands::CheckTag { ref tags }) => {
            init_logging(cli.verbose, "info");
            cmd_check_tag(tags);
            return Ok(());
        }
        _ => {}
    }

    let config = load_config(cli.config)?;
    init_logging(cli.verbose, &config.logging.level);
    info!("Starting starfeed v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        None => cmd_fetch(None, &config).await,
        Some(Commands::Fetch { output }) => cmd_fetch(output, &config).await,
        Some(Commands::Watch { interval, output }) => cmd_watch(interval, output, &config).await,
        Some(Commands::Providers) => cmd_providers(&config),
        Some(Commands::CheckTag { .. }) | Some(Commands::Init { .. }) => Ok(()),
    }
}

/// Initialize logging: RUST_LOG wins, then --verbose, then the configured level
fn init_logging(verbose: bool, level: &str) {
    let default_level = if verbose { "debug" } else { level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Load configuration from specified path or default location
fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load(&path),
        None => Config::load_or_default(),
    }
}

fn cmd_init(config_path: Option<PathBuf>, force: bool) -> Result<()> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_config_path()?,
    };

    if path.exists() && !force {
        return Err(anyhow!(
            "Configuration already exists at {:?} (use --force to overwrite)",
            path
        ));
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }

    Config::default().save(&path)?;

    println!("✅ Configuration written to {:?}", path);
    println!("   Next: add tokens (or export GITHUB_TOKEN, GITLAB_TOKEN, ...) and run 'starfeed fetch'");
    Ok(())
}

async fn cmd_fetch(output: Option<String>, config: &Config) -> Result<()> {
    let output = output.unwrap_or_else(|| config.feed.output.clone());
    let pipeline = ReleasePipeline::from_config(config)?;

    let summary = run_once(&pipeline, &output).await?;
    print_summary(&summary, &output);

    // The feed is already on disk; only now report provider failures
    let failed = summary.failed_providers();
    if !failed.is_empty() {
        let names: Vec<&str> = failed.iter().map(|(name, _)| *name).collect();
        return Err(anyhow!("{} provider(s) failed: {}", failed.len(), names.join(", ")));
    }

    Ok(())
}

async fn cmd_watch(interval: Option<String>, output: Option<String>, config: &Config) -> Result<()> {
    let mut config = config.clone();
    if let Some(interval) = interval {
        config.watch.interval = interval;
    }
    let period = config.watch_interval()?;
    let output = output.unwrap_or_else(|| config.feed.output.clone());

    let pipeline = ReleasePipeline::from_config(&config)?;
    Watcher::new(pipeline, output, period).run().await
}

fn cmd_providers(config: &Config) -> Result<()> {
    let providers = build_providers(config)?;

    if providers.is_empty() {
        println!("No providers enabled");
        return Ok(());
    }

    println!("Providers ({}):", providers.len());
    for provider in providers {
        let status = if provider.is_configured() {
            "✅ credentials found"
        } else {
            "⚠️  no credentials, will be skipped"
        };
        println!("   {:<12} {}", provider.name(), status);
    }

    Ok(())
}

fn cmd_check_tag(tags: &[String]) {
    for tag in tags {
        let verdict = if should_skip_tag(tag) { "skip" } else { "keep" };
        let shape = if is_semver_shaped(tag) { "semver" } else { "other" };
        println!("{:<5} {:<7} {}", verdict, shape, tag);
    }
}

fn print_summary(summary: &PipelineSummary, output: &str) {
    // Keep stdout clean when it carries the feed
    if output == starfeed::feed::STDOUT {
        return;
    }

    println!("\n📡 Fetch complete in {:.2}s", summary.duration.as_secs_f64());
    for result in &summary.results {
        match &result.error {
            None => println!(
                "   ✅ {:<12} {:>4} event(s)  {}ms",
                result.provider_name,
                result.events.len(),
                result.duration_millis()
            ),
            Some(e) => println!("   ❌ {:<12} {}", result.provider_name, e),
        }
    }
    println!("   📰 {} event(s) written to {}", summary.events.len(), output);
}
