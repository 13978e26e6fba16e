use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use crate::{
    adapter::MagnetAdapter,
    bot::TelegramBot,
    config::{AppConfig, TomlConfigStore},
};

pub struct MagrelayDaemon {
    bot: Arc<TelegramBot>,
    adapter: MagnetAdapter,
    store: TomlConfigStore,
}

impl MagrelayDaemon {
    /// Create a new daemon instance from the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the `[telegram]` section is missing or a backend cannot be built.
    pub fn from_config(config: &AppConfig, store: TomlConfigStore) -> anyhow::Result<Self> {
        let telegram = config
            .telegram
            .as_ref()
            .context("The daemon requires a [telegram] section")?;

        let bot = Arc::new(TelegramBot::from_config(telegram));
        let adapter = MagnetAdapter::from_config(config, bot.clone())?;

        Ok(Self {
            bot,
            adapter,
            store,
        })
    }

    /// Run the main event loop of the daemon.
    ///
    /// Queued magnet links from the configuration are dispatched first. Commands
    /// are then handled one at a time, in the order they arrive.
    ///
    /// # Errors
    ///
    /// Returns an error if anything fails during startup, or the bot task panics.
    pub async fn run(self) -> anyhow::Result<()> {
        match self.adapter.drain_queued(&self.store).await {
            Ok(reports) if !reports.is_empty() => {
                let ok = reports.iter().filter(|r| r.is_success()).count();
                tracing::info!(
                    dispatched = ok,
                    failed = reports.len() - ok,
                    "Queued magnet links processed"
                );
            }
            Ok(_) => {}
            Err(e) => tracing::error!("Failed to process queued magnet links: {e:?}"),
        }

        let cancel = CancellationToken::new();
        let mut bot_handle = self.bot.run(cancel.child_token()).await?;

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Received Ctrl-C, shutting down");
                    cancel.cancel();
                    break;
                }
                event = bot_handle.rx.recv() => {
                    match event {
                        Some(event) => {
                            self.adapter.handle_event(&event).await;
                        }
                        None => {
                            tracing::error!(
                                "Telegram bot command channel closed unexpectedly, shutting down"
                            );
                            cancel.cancel();
                            break;
                        }
                    }
                }
            };
        }

        bot_handle.handle.await?;

        tracing::info!("Terminated gracefully");

        Ok(())
    }
}
