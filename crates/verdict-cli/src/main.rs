use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use verdict_core::{CredentialSet, Generator, ProviderId};

mod config;

use config::VerdictConfig;

#[derive(Parser)]
#[command(name = "verdict")]
#[command(version)]
#[command(about = "Verdict: route prompts across LLM backends and recover JSON replies")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a prompt to a randomly chosen provider
    Ask {
        /// The prompt, or "-" to read it from stdin
        prompt: String,

        /// Caller-supplied API key as PROVIDER=SECRET (repeatable)
        #[arg(short, long = "key", value_name = "PROVIDER=SECRET", value_parser = parse_key)]
        keys: Vec<(ProviderId, String)>,

        /// Extract the JSON object from the reply and tag it with the model label
        #[arg(short, long)]
        structured: bool,
    },

    /// Extract the JSON object embedded in a model reply
    Extract {
        /// File holding the reply; stdin when omitted
        file: Option<PathBuf>,
    },

    /// List the providers a request would choose from
    Providers {
        /// Caller-supplied API key as PROVIDER=SECRET (repeatable)
        #[arg(short, long = "key", value_name = "PROVIDER=SECRET", value_parser = parse_key)]
        keys: Vec<(ProviderId, String)>,
    },

    /// Initialize config directory and default config
    Init,

    /// Show current configuration (secrets masked)
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays machine-readable
    let filter = if cli.debug { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Ask {
            prompt,
            keys,
            structured,
        } => cmd_ask(&cli.config, &prompt, keys, structured).await,
        Commands::Extract { file } => cmd_extract(file.as_deref()).await,
        Commands::Providers { keys } => cmd_providers(&cli.config, keys).await,
        Commands::Init => cmd_init().await,
        Commands::Config => cmd_config(&cli.config).await,
    }
}

/// Parse `provider=secret`; the provider may be an id (`openai`) or a caller key name (`chatgpt`)
fn parse_key(arg: &str) -> Result<(ProviderId, String), String> {
    let (name, secret) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected PROVIDER=SECRET, got '{arg}'"))?;
    let provider: ProviderId = name.parse()?;
    if provider.caller_key().is_none() {
        return Err(format!("{provider} keys are server-only and cannot be passed with --key"));
    }
    let secret = secret.trim();
    if secret.is_empty() {
        return Err(format!("empty secret for {provider}"));
    }
    Ok((provider, secret.to_string()))
}

fn credentials(keys: Vec<(ProviderId, String)>) -> CredentialSet {
    let mut creds = CredentialSet::new();
    for (provider, secret) in keys {
        creds.insert(provider, secret);
    }
    creds
}

async fn read_input(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display())),
        None => {
            let mut buf = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buf)
                .await
                .context("Failed to read stdin")?;
            Ok(buf)
        }
    }
}

async fn cmd_ask(
    config_path: &Option<PathBuf>,
    prompt: &str,
    keys: Vec<(ProviderId, String)>,
    structured: bool,
) -> Result<()> {
    let cfg = VerdictConfig::load(config_path)?;
    let generator = Generator::new(cfg.providers)?;
    let creds = credentials(keys);

    let prompt = if prompt == "-" {
        read_input(None).await?
    } else {
        prompt.to_string()
    };
    if prompt.trim().is_empty() {
        anyhow::bail!("Prompt is empty");
    }

    if structured {
        let reply = tokio::select! {
            reply = generator.generate_structured(&prompt, &creds) => reply?,
            _ = signal::ctrl_c() => {
                warn!("Interrupted, request abandoned");
                anyhow::bail!("Interrupted");
            }
        };
        println!("{}", serde_json::to_string_pretty(&reply.into_json())?);
    } else {
        let result = tokio::select! {
            result = generator.generate(&prompt, &creds) => result?,
            _ = signal::ctrl_c() => {
                warn!("Interrupted, request abandoned");
                anyhow::bail!("Interrupted");
            }
        };
        println!("{}", result.text);
        info!("Answered by {}", result.model);
    }
    Ok(())
}

async fn cmd_extract(file: Option<&Path>) -> Result<()> {
    let raw = read_input(file).await?;
    let value = verdict_core::extract(&raw).context("No JSON object could be recovered")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn cmd_providers(
    config_path: &Option<PathBuf>,
    keys: Vec<(ProviderId, String)>,
) -> Result<()> {
    let cfg = VerdictConfig::load(config_path)?;
    let generator = Generator::new(cfg.providers)?;
    let pool = generator.pool(&credentials(keys))?;

    println!("{:<10} {:<28} SOURCE", "PROVIDER", "MODEL");
    for entry in pool.entries() {
        println!(
            "{:<10} {:<28} {}",
            entry.id(),
            entry.provider().model(),
            entry.source()
        );
    }
    println!("\nTimeout per call: {:?}", generator.settings().timeout());
    Ok(())
}

async fn cmd_init() -> Result<()> {
    let config_dir = config::config_dir();
    tokio::fs::create_dir_all(&config_dir)
        .await
        .with_context(|| format!("Failed to create config dir: {}", config_dir.display()))?;

    let config_path = config::default_config_path();
    if config_path.exists() {
        warn!("Config already exists at {}", config_path.display());
    } else {
        let default_config = include_str!("../../../config/default.toml");
        tokio::fs::write(&config_path, default_config).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&config_path, std::fs::Permissions::from_mode(0o600))
                .await?;
        }
        info!("Created default config at {}", config_path.display());
    }

    println!("Verdict initialized at {}", config_dir.display());
    println!(
        "Export your API keys or edit {} to configure providers.",
        config_path.display()
    );
    Ok(())
}

async fn cmd_config(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = VerdictConfig::load(config_path)?;
    println!("{:#?}", cfg);
    Ok(())
}
