//! simplex-bots: runs the bot modules listed in a config file.
//!
//! Every `[[moderate]]`, `[[quota]]` and `[[promote]]` entry becomes one
//! task. Modules on the same daemon port share one websocket connection.
//! The process runs until every module has stopped or Ctrl-C is pressed.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::Parser;
use simplex_sdk::client::ChatClient;
use simplex_sdk::transport::{ConnectionManager, TransportConfig};
use tokio::task::JoinSet;

use simplex_bots::config::{BotConfig, DEFAULT_CONFIG_PATH};
use simplex_bots::moderate::ModerateModule;
use simplex_bots::promote::PromoteModule;
use simplex_bots::quota::QuotaModule;

#[derive(Parser)]
#[command(name = "simplex-bots", about = "Moderation bots for SimpleX groups")]
struct Args {
    /// Module configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Host the chat daemon listens on
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Seconds to wait for a reply to each command
    #[arg(long, default_value_t = 60)]
    response_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "simplex_bots=info,simplex_sdk=info".into()),
        )
        .init();

    let args = Args::parse();
    let config = BotConfig::load(&args.config)?;
    if config.is_empty() {
        bail!("no modules configured in {}", args.config.display());
    }

    tracing::info!(
        config = %args.config.display(),
        moderate = config.moderate.len(),
        quota = config.quota.len(),
        promote = config.promote.len(),
        "Starting simplex-bots"
    );

    let manager = ConnectionManager::new(TransportConfig {
        host: args.host.clone(),
        response_timeout: Duration::from_secs(args.response_timeout_secs),
    });

    let mut modules = JoinSet::new();

    for module in config.moderate {
        let port = module.port;
        let group = module.group.clone();
        let client = match manager.connect(port).await {
            Ok(connection) => ChatClient::new(connection),
            Err(e) => {
                tracing::error!(port, group = %group, error = %e, "Moderation module not started");
                continue;
            }
        };
        match ModerateModule::new(module, client) {
            Ok(bot) => {
                modules.spawn(async move { ("moderate", group, bot.run().await) });
            }
            Err(e) => tracing::error!(port, group = %group, error = %format!("{e:#}"), "Moderation module not started"),
        }
    }

    for module in config.quota {
        let port = module.port;
        let group = module.group.clone();
        match manager.connect(port).await {
            Ok(connection) => {
                let bot = QuotaModule::new(module, ChatClient::new(connection));
                modules.spawn(async move { ("quota", group, bot.run().await) });
            }
            Err(e) => tracing::error!(port, group = %group, error = %e, "Quota module not started"),
        }
    }

    for module in config.promote {
        let port = module.port;
        let group = module.group.clone();
        match manager.connect(port).await {
            Ok(connection) => {
                let bot = PromoteModule::new(module, ChatClient::new(connection));
                modules.spawn(async move { ("promote", group, bot.run().await) });
            }
            Err(e) => tracing::error!(port, group = %group, error = %e, "Promote module not started"),
        }
    }

    if modules.is_empty() {
        bail!("no module could be started");
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                modules.abort_all();
                return Ok(());
            }
            joined = modules.join_next() => match joined {
                Some(Ok((kind, group, Ok(())))) => {
                    tracing::info!(module = kind, group = %group, "Module finished");
                }
                Some(Ok((kind, group, Err(e)))) => {
                    tracing::error!(module = kind, group = %group, error = %format!("{e:#}"), "Module stopped");
                }
                Some(Err(e)) => tracing::error!(error = %e, "Module task panicked"),
                None => {
                    tracing::warn!("All modules have stopped");
                    return Ok(());
                }
            }
        }
    }
}
