//! ragindex CLI entry point

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use ragindex::{config::Config, error::Result, meta::MetaDb, server, service::IndexingService};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "ragindex")]
#[command(version, about = "RAG indexing service for local repositories and web pages", long_about = None)]
struct Cli {
    /// Data directory (config, database, lock file, corpus)
    #[arg(long, env = "DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file to the data directory
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Run the HTTP service
    Serve {
        /// Address to bind (overrides server.bind)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Print the resource registry as JSON
    Resources,

    /// Print the indexing history of a resource as JSON
    Status {
        /// Resource URI (file:// or http(s)://)
        uri: String,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    if let Err(e) = run(cli).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

async fn run(cli: Cli) -> Result<()> {
    let data_dir = cli.data_dir;
    let load_config = move || -> Result<Config> {
        let config = Config::load_from(data_dir)?;
        info!("data dir: {:?}", config.paths.data_dir);
        Ok(config)
    };

    match cli.command {
        // Completions need no config
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "ragindex", &mut std::io::stdout());
        }

        Commands::Init { force } => {
            let config = load_config()?;
            if config.paths.config_file.exists() && !force {
                println!(
                    "Config already exists at {:?}; use --force to overwrite",
                    config.paths.config_file
                );
            } else {
                config.save()?;
                println!("Wrote config to {:?}", config.paths.config_file);
            }
        }

        Commands::Serve { bind } => {
            let config = load_config()?;
            let bind = bind.unwrap_or_else(|| config.server.bind.clone());
            let service = IndexingService::open(config).await?;
            service.start().await?;
            server::run(service, &bind).await?;
        }

        Commands::Resources => {
            let db = MetaDb::open(&load_config()?).await?;
            let resources = db.resources().list_all().await?;
            println!("{}", serde_json::to_string_pretty(&resources)?);
        }

        Commands::Status { uri } => {
            let db = MetaDb::open(&load_config()?).await?;
            let records = db.history().list_for_base_uri(&uri).await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[tokio::test]
    async fn test_completions_skip_config() {
        let tmp = TempDir::new().unwrap();
        // a config file that would fail to parse
        std::fs::write(tmp.path().join("config.toml"), "not = [valid").unwrap();
        let data_dir = tmp.path().to_str().unwrap();

        let cli = Cli::try_parse_from(["ragindex", "--data-dir", data_dir, "completions", "bash"])
            .unwrap();
        assert!(run(cli).await.is_ok());

        let cli = Cli::try_parse_from(["ragindex", "--data-dir", data_dir, "resources"]).unwrap();
        assert!(run(cli).await.is_err());
    }
}
