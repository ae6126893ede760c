//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use serde_json::Value;
use tracing::{error, info};

use folio_cache::ResponseCache;
use folio_core::{PageAssembler, PageOutcome};
use folio_shared::{AppConfig, init_config, load_config, load_config_from};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Folio: assemble headless-CMS pages.
#[derive(Parser)]
#[command(
    name = "folio",
    version,
    about = "Resolve, fetch, localize, and assemble headless-CMS pages.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.folio/folio.toml).
    #[arg(long, global = true, env = "FOLIO_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Assemble the page at a URL path and print it as JSON.
    Render {
        /// Request path, e.g. `/pl/blog/hello-world`.
        path: String,

        /// Language override (otherwise taken from the path prefix).
        #[arg(short, long)]
        lang: Option<String>,

        /// Pretty-print the JSON output.
        #[arg(long)]
        pretty: bool,
    },

    /// Response cache maintenance.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Post a JSON array of mutations to the backend.
    Mutate {
        /// File holding `[...]` or `{"mutations": [...]}`.
        file: PathBuf,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Cache subcommands.
#[derive(Subcommand)]
pub(crate) enum CacheAction {
    /// Drop one entry, or every entry when no key is given.
    Clear {
        /// Full cache key (`namespace:sha256`).
        #[arg(long)]
        key: Option<String>,
    },
    /// Drop expired entries.
    Purge,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "folio=info",
        1 => "folio=debug",
        _ => "folio=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    // Logs go to stderr so rendered JSON on stdout stays clean.
    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Render { path, lang, pretty } => {
            cmd_render(config_path, &path, lang.as_deref(), pretty).await
        }
        Command::Cache { action } => match action {
            CacheAction::Clear { key } => cmd_cache_clear(config_path, key.as_deref()).await,
            CacheAction::Purge => cmd_cache_purge(config_path).await,
        },
        Command::Mutate { file } => cmd_mutate(config_path, &file).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path).await,
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    Ok(config)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_render(
    config_path: Option<&Path>,
    path: &str,
    lang: Option<&str>,
    pretty: bool,
) -> Result<()> {
    let config = resolve_config(config_path)?;
    let assembler = PageAssembler::from_config(&config).await?;

    // Backend detail stays in the logs; the user sees a short line.
    let outcome = match assembler.assemble(path, lang).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(path, error = %e, "render failed");
            return Err(eyre!("could not render {path}"));
        }
    };

    match outcome {
        PageOutcome::Found(page) => {
            let json = if pretty {
                serde_json::to_string_pretty(&page)?
            } else {
                serde_json::to_string(&page)?
            };
            println!("{json}");
            Ok(())
        }
        PageOutcome::NotFound { path } => Err(eyre!("not found: {path}")),
    }
}

async fn cmd_cache_clear(config_path: Option<&Path>, key: Option<&str>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let cache = ResponseCache::from_config(&config.cache).await?;
    match key {
        Some(key) => {
            if cache.clear(key).await? {
                println!("Removed {key}");
            } else {
                println!("No entry for {key}");
            }
        }
        None => {
            let removed = cache.clear_all().await?;
            println!("Removed {removed} entries");
        }
    }
    Ok(())
}

async fn cmd_cache_purge(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let cache = ResponseCache::from_config(&config.cache).await?;
    let removed = cache.purge_expired().await?;
    info!(removed, "purged expired cache entries");
    println!("Purged {removed} expired entries");
    Ok(())
}

async fn cmd_mutate(config_path: Option<&Path>, file: &Path) -> Result<()> {
    let config = resolve_config(config_path)?;
    config.validate()?;

    let ops = read_mutations(file)?;
    let source = folio_source::connect(&config, None)?;
    if source.post_mutations(&ops).await {
        println!("Applied {} mutations", ops.len());
        Ok(())
    } else {
        Err(eyre!("mutations were rejected, see logs"))
    }
}

/// Accept either a bare array or a `{"mutations": [...]}` envelope.
fn read_mutations(file: &Path) -> Result<Vec<Value>> {
    let content = std::fs::read_to_string(file)
        .wrap_err_with(|| format!("failed to read {}", file.display()))?;
    let value: Value = serde_json::from_str(&content)
        .wrap_err_with(|| format!("{} is not valid JSON", file.display()))?;
    match value {
        Value::Array(ops) => Ok(ops),
        Value::Object(mut map) => match map.remove("mutations") {
            Some(Value::Array(ops)) => Ok(ops),
            _ => Err(eyre!("expected a \"mutations\" array in {}", file.display())),
        },
        _ => Err(eyre!("expected a JSON array of mutations in {}", file.display())),
    }
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
