use std::{cmp::min, sync::Arc, time::Duration};

use async_trait::async_trait;
use frankenstein::{
    AsyncTelegramApi,
    methods::{GetUpdatesParams, SendMessageParams, SetMyCommandsParams},
    types::{BotCommandScope, BotCommandScopeChat, Message},
    updates::UpdateContent,
};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    command::{InboundEvent, registered_commands},
    config::TelegramConfig,
    notify::{Notice, Notifier},
};

/// Handle to the running update loop.
pub struct BotHandle {
    pub rx: mpsc::Receiver<InboundEvent>,
    pub handle: JoinHandle<()>,
}

/// Telegram front-end: turns chat commands into events and posts notices back.
pub struct TelegramBot {
    bot: Arc<frankenstein::client_reqwest::Bot>,
    chat_id: i64,
}

impl TelegramBot {
    pub fn from_config(config: &TelegramConfig) -> Self {
        let bot = Arc::new(frankenstein::client_reqwest::Bot::new(&config.bot_token));
        Self {
            bot,
            chat_id: config.chat_id,
        }
    }

    /// Register the commands and start polling updates in a background task.
    ///
    /// # Errors
    ///
    /// Returns an error if the commands cannot be registered.
    pub async fn run(&self, cancel: CancellationToken) -> anyhow::Result<BotHandle> {
        self.register_commands().await?;

        let (tx, rx) = mpsc::channel(16);

        let handle = {
            let bot = self.bot.clone();
            let chat_id = self.chat_id;

            let mut update_params = GetUpdatesParams::builder()
                .allowed_updates(vec![frankenstein::types::AllowedUpdate::Message])
                .build();

            tokio::spawn(async move {
                const MIN_RETRY_DELAY: Duration = Duration::from_secs(1);
                const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);
                let mut retry_delay = MIN_RETRY_DELAY;

                loop {
                    let updates;

                    tokio::select! {
                        () = cancel.cancelled() => break,
                        updates_result = bot.get_updates(&update_params) => {
                            updates = updates_result;
                        }
                    };

                    let updates = match updates {
                        Ok(updates) => updates,
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to get updates from Telegram");
                            tokio::time::sleep(retry_delay).await;
                            retry_delay = min(retry_delay * 2, MAX_RETRY_DELAY);
                            continue;
                        }
                    };

                    retry_delay = MIN_RETRY_DELAY;

                    for update in updates.result {
                        update_params.offset = Some(i64::from(update.update_id) + 1);

                        let UpdateContent::Message(message) = &update.content else {
                            continue;
                        };

                        if message.chat.id != chat_id {
                            continue;
                        }

                        Self::handle_message(message, &tx).await;
                    }
                }

                tracing::debug!("Telegram bot main loop exited");
            })
        };

        Ok(BotHandle { rx, handle })
    }

    async fn register_commands(&self) -> anyhow::Result<()> {
        let commands = registered_commands()
            .iter()
            .map(|spec| {
                frankenstein::types::BotCommand::builder()
                    .command(spec.name())
                    .description(spec.description)
                    .build()
            })
            .collect();

        let params = SetMyCommandsParams::builder()
            .commands(commands)
            .scope(BotCommandScope::Chat(BotCommandScopeChat {
                chat_id: self.chat_id.into(),
            }))
            .build();

        self.bot.set_my_commands(&params).await?;

        Ok(())
    }

    async fn handle_message(msg: &Message, tx: &mpsc::Sender<InboundEvent>) {
        let Some(text) = &msg.text else {
            tracing::info!("Received empty message");
            return;
        };

        let channel = Some(msg.chat.id.to_string());
        let user = msg.from.as_ref().map(|u| u.id.to_string());

        let Some(event) = InboundEvent::from_text(text, channel, user) else {
            tracing::info!(text = %text, "Received invalid command");
            return;
        };

        match tx.send(event).await {
            Ok(()) => {
                tracing::info!(text = %text, "Received command");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to send command to handler");
            }
        }
    }
}

#[async_trait]
impl Notifier for TelegramBot {
    async fn post(&self, notice: &Notice) -> anyhow::Result<()> {
        let chat_id = notice
            .channel
            .as_deref()
            .and_then(|c| c.parse::<i64>().ok())
            .unwrap_or(self.chat_id);

        let params = SendMessageParams::builder()
            .chat_id(chat_id)
            .text(notice.to_string())
            .build();
        self.bot.send_message(&params).await?;
        Ok(())
    }
}
