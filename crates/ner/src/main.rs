// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! NER Studio - multi-tenant AI image-generation backend.
//!
//! This is the binary entry point.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod admin;
mod providers;
mod serve;
mod shutdown;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use ner_config::NerConfig;
use uuid::Uuid;

/// NER Studio - multi-tenant AI image-generation backend.
#[derive(Parser, Debug)]
#[command(name = "ner", version, about, long_about = None)]
struct Cli {
    /// Read configuration from this file instead of the standard locations.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP API and generation workers.
    Serve,
    /// Create or upgrade the database schema.
    Migrate,
    /// Inspect configuration.
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
    /// Manage organizations.
    Org {
        #[command(subcommand)]
        action: OrgCommand,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Validate the configuration and print a summary.
    Check,
}

#[derive(Subcommand, Debug)]
enum OrgCommand {
    /// Add credits to an organization.
    Grant {
        organization_id: Uuid,
        amount: i64,
        #[arg(long)]
        reason: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => ner_config::load_and_validate_path(path),
        None => ner_config::load_and_validate(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(errors) => {
            ner_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    init_tracing(&config.server.log_level);

    if let Err(e) = run(cli.command, config).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(command: Commands, config: NerConfig) -> Result<(), ner_core::NerError> {
    match command {
        Commands::Serve => serve::run_serve(config).await,
        Commands::Migrate => admin::run_migrate(&config).await,
        Commands::Config {
            action: ConfigCommand::Check,
        } => {
            admin::run_config_check(&config);
            Ok(())
        }
        Commands::Org {
            action:
                OrgCommand::Grant {
                    organization_id,
                    amount,
                    reason,
                },
        } => admin::run_org_grant(&config, organization_id, amount, reason).await,
    }
}

/// Initialize the tracing subscriber with the given log level.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("ner={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(not(target_env = "msvc"))]
    fn jemalloc_is_active() {
        use tikv_jemalloc_ctl::{epoch, stats};
        epoch::advance().unwrap();
        let allocated = stats::allocated::read().unwrap();
        assert!(allocated > 0, "jemalloc should report non-zero allocation");
    }

    #[test]
    fn cli_parses_org_grant() {
        let id = Uuid::new_v4();
        let cli = Cli::try_parse_from([
            "ner",
            "org",
            "grant",
            &id.to_string(),
            "250",
            "--reason",
            "pilot",
        ])
        .unwrap();
        match cli.command {
            Commands::Org {
                action:
                    OrgCommand::Grant {
                        organization_id,
                        amount,
                        reason,
                    },
            } => {
                assert_eq!(organization_id, id);
                assert_eq!(amount, 250);
                assert_eq!(reason.as_deref(), Some("pilot"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn cli_accepts_global_config_flag() {
        let cli = Cli::try_parse_from(["ner", "config", "check", "--config", "/tmp/ner.toml"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/ner.toml")));
        assert!(matches!(
            cli.command,
            Commands::Config {
                action: ConfigCommand::Check
            }
        ));
    }
}
