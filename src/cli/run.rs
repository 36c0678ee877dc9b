//! `run` subcommand: wire the transport, store and engine together.
//!
//! Loads (or generates) the TOML configuration, initializes logging,
//! opens the database, then long-polls the transport and feeds every
//! event into the decision engine. Per-event failures are logged, never
//! fatal; Ctrl-C stops polling and destroys the caches.

use super::config::{default_config_path, VestibuleConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use vestibule::chat::telegram::TelegramClient;
use vestibule::gatekeeper::GatekeepEngine;
use vestibule::store::SqliteUserStore;

/// Token resolution order: `--token` flag, then `VESTIBULE_BOT_TOKEN`,
/// then the config file.
fn resolve_token(flag: Option<String>, config: &VestibuleConfig) -> Option<String> {
    flag.or_else(|| std::env::var("VESTIBULE_BOT_TOKEN").ok())
        .or_else(|| config.telegram.token.clone())
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Run the bot service.
pub async fn execute(
    config_path: Option<String>,
    token: Option<String>,
    database: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = config_path
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path);

    let config = if config_path.exists() {
        VestibuleConfig::load(&config_path)?
    } else {
        println!(
            "No config file found. Creating default at {}",
            config_path.display()
        );
        VestibuleConfig::create_default(&config_path)?;
        VestibuleConfig::load(&config_path)?
    };

    init_tracing(&config.logging.level);

    let Some(token) = resolve_token(token, &config) else {
        return Err(
            "no bot token: pass --token, set VESTIBULE_BOT_TOKEN, \
             or fill telegram.token in the config file"
                .into(),
        );
    };

    let database = database
        .map(PathBuf::from)
        .unwrap_or_else(|| config.database.path.clone());
    if let Some(parent) = database.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let store = Arc::new(SqliteUserStore::open(&database).await?);
    let client = TelegramClient::new(&token);
    let engine = GatekeepEngine::new(
        client.clone(),
        Arc::clone(&store),
        config.gatekeeper.to_engine_config(),
    )
    .await?;

    info!(
        config = %config_path.display(),
        database = %database.display(),
        "vestibule running; press Ctrl-C to stop"
    );

    let poll_timeout = Duration::from_secs(config.telegram.poll_timeout_secs);
    let mut offset = 0i64;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            polled = client.poll_updates(offset, poll_timeout) => {
                let updates = match polled {
                    Ok(updates) => updates,
                    Err(e) => {
                        warn!(error = %e, "polling failed; backing off");
                        tokio::time::sleep(Duration::from_secs(3)).await;
                        continue;
                    }
                };
                for update in updates {
                    offset = offset.max(update.update_id + 1);
                    let Some(event) = update.into_event() else {
                        continue;
                    };
                    match engine.handle_event(&event).await {
                        Ok(decision) => debug!(?decision, "event handled"),
                        Err(e) => warn!(error = %e, "event handling failed"),
                    }
                }
            }
        }
    }

    engine.shutdown();
    info!("shut down");
    Ok(())
}
