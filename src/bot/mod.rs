//! Telegram front end: polls updates, dispatches commands and links, and
//! delivers downloaded files.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::downloader::Downloader;
use crate::error::DownloadError;
use crate::links;
use crate::post::{MediaAsset, MediaKind, PostRecord};

pub mod client;
pub mod messages;
pub mod types;

pub use client::TelegramClient;
use types::{CallbackQuery, Message, Update};

/// Pause after a failed poll before trying again.
const POLL_ERROR_PAUSE: Duration = Duration::from_secs(5);

/// Chat commands the bot understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    About,
    Saved,
}

impl Command {
    /// Parse `/name` or `/name@botname`, ignoring arguments.
    ///
    /// Returns `None` for text that is not a command, `Some(None)` for an
    /// unknown command.
    #[must_use]
    pub fn parse(text: &str) -> Option<Option<Self>> {
        let word = text.trim().strip_prefix('/')?.split_whitespace().next()?;
        let name = word.split('@').next().unwrap_or(word);
        Some(match name.to_lowercase().as_str() {
            "start" => Some(Self::Start),
            "help" => Some(Self::Help),
            "about" => Some(Self::About),
            "saved" => Some(Self::Saved),
            _ => None,
        })
    }
}

pub struct Bot {
    client: TelegramClient,
    downloader: Arc<Downloader>,
    max_file_size: u64,
    poll_timeout: Duration,
}

impl Bot {
    #[must_use]
    pub fn new(client: TelegramClient, downloader: Arc<Downloader>, config: &Config) -> Self {
        Self {
            client,
            downloader,
            max_file_size: config.max_file_size,
            poll_timeout: config.poll_timeout,
        }
    }

    /// Poll for updates until `shutdown` fires, handling each on its own task.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut offset = 0;

        loop {
            let polled = tokio::select! {
                () = shutdown.cancelled() => break,
                polled = self.client.get_updates(offset, self.poll_timeout) => polled,
            };

            match polled {
                Ok(updates) => {
                    if !updates.is_empty() {
                        debug!(count = updates.len(), "Received updates");
                    }
                    for update in updates {
                        offset = offset.max(update.update_id + 1);
                        let bot = Arc::clone(&self);
                        tokio::spawn(async move {
                            bot.handle_update(update).await;
                        });
                    }
                }
                Err(e) => {
                    error!("Failed to poll Telegram: {e:#}");
                    tokio::select! {
                        () = shutdown.cancelled() => break,
                        () = tokio::time::sleep(POLL_ERROR_PAUSE) => {}
                    }
                }
            }
        }

        info!("Stopped polling Telegram");
    }

    /// Handle one update, logging instead of propagating failures.
    pub async fn handle_update(&self, update: Update) {
        let result = if let Some(callback) = update.callback_query {
            self.handle_callback(callback).await
        } else if let Some(message) = update.message {
            self.handle_message(message).await
        } else {
            Ok(())
        };

        if let Err(e) = result {
            error!(update_id = update.update_id, "Failed to handle update: {e:#}");
        }
    }

    async fn handle_message(&self, message: Message) -> Result<()> {
        let chat_id = message.chat.id;
        let Some(text) = message.text.as_deref().map(str::trim) else {
            return Ok(());
        };

        match Command::parse(text) {
            Some(Some(command)) => self.handle_command(chat_id, command).await,
            Some(None) => {
                debug!(chat_id, text, "Ignoring unknown command");
                Ok(())
            }
            None if links::mentions_instagram(text) => self.process_link(chat_id, text).await,
            None => {
                self.client
                    .send_message(chat_id, messages::NOT_A_LINK, None)
                    .await?;
                Ok(())
            }
        }
    }

    async fn handle_command(&self, chat_id: i64, command: Command) -> Result<()> {
        debug!(chat_id, ?command, "Handling command");
        match command {
            Command::Start => {
                let keyboard = messages::welcome_keyboard();
                self.client
                    .send_message(chat_id, messages::WELCOME, Some(&keyboard))
                    .await?;
            }
            Command::Help => {
                self.client.send_message(chat_id, messages::HELP, None).await?;
            }
            Command::About => {
                self.client.send_message(chat_id, messages::ABOUT, None).await?;
            }
            Command::Saved => {
                let text = match self.downloader.saved_posts().await {
                    Ok(records) => messages::saved_list(&records),
                    Err(e) => {
                        error!("Failed to list saved posts: {e}");
                        messages::error(&e)
                    }
                };
                self.client.send_message(chat_id, &text, None).await?;
            }
        }
        Ok(())
    }

    async fn handle_callback(&self, callback: CallbackQuery) -> Result<()> {
        self.client.answer_callback_query(&callback.id).await?;

        let Some(chat_id) = callback.message.as_ref().map(|m| m.chat.id) else {
            return Ok(());
        };
        match callback.data.as_deref() {
            Some("help") => self.handle_command(chat_id, Command::Help).await,
            Some("about") => self.handle_command(chat_id, Command::About).await,
            other => {
                debug!(data = ?other, "Ignoring unknown callback");
                Ok(())
            }
        }
    }

    /// Download the post behind `url` and send it to `chat_id`.
    async fn process_link(&self, chat_id: i64, url: &str) -> Result<()> {
        let status = self
            .client
            .send_message(chat_id, messages::PROCESSING, None)
            .await?;

        let result = match self.downloader.download(url).await {
            Err(DownloadError::EmptyResult { from_cache: true }) => {
                info!(chat_id, "Cached post lost its files, fetching again");
                self.client
                    .edit_message_text(chat_id, status.message_id, messages::REFETCHING)
                    .await?;
                self.downloader.refetch(url).await
            }
            other => other,
        };

        match result {
            Ok(download) => {
                self.client
                    .edit_message_text(chat_id, status.message_id, &messages::post_summary(&download))
                    .await?;
                self.deliver(chat_id, &download.record).await;
            }
            Err(e) => {
                warn!(chat_id, kind = e.kind(), "Download failed: {e}");
                self.client
                    .edit_message_text(chat_id, status.message_id, &messages::error(&e))
                    .await?;
            }
        }
        Ok(())
    }

    /// Send every file of `record`, falling back to a typed upload when a
    /// document upload is refused.
    async fn deliver(&self, chat_id: i64, record: &PostRecord) {
        for asset in record.assets() {
            let name = file_name(&asset.path);
            let size = match tokio::fs::metadata(&asset.path).await {
                Ok(meta) => meta.len(),
                Err(e) => {
                    warn!(path = %asset.path.display(), error = %e, "Skipping unreadable file");
                    continue;
                }
            };

            if size > self.max_file_size {
                warn!(path = %asset.path.display(), size, "File over upload limit");
                self.notify(chat_id, &messages::too_large(&name, size, self.max_file_size))
                    .await;
                continue;
            }

            if let Err(e) = self.send_asset(chat_id, &asset, &name).await {
                error!(path = %asset.path.display(), "All upload methods failed: {e:#}");
                self.notify(chat_id, &messages::send_failed(&name, &e)).await;
            }
        }
    }

    async fn send_asset(&self, chat_id: i64, asset: &MediaAsset, name: &str) -> Result<()> {
        let document = self
            .client
            .send_document(chat_id, &asset.path, &format!("📁 {name}"))
            .await;
        let Err(doc_error) = document else {
            info!(path = %asset.path.display(), "Sent file as document");
            return Ok(());
        };

        warn!(path = %asset.path.display(), "send_document failed, retrying by media type: {doc_error:#}");
        match asset.kind {
            Some(MediaKind::Video) => {
                self.client
                    .send_video(chat_id, &asset.path, &format!("📹 {name}"))
                    .await?;
            }
            Some(MediaKind::Image) => {
                self.client
                    .send_photo(chat_id, &asset.path, &format!("📸 {name}"))
                    .await?;
            }
            None => return Err(doc_error),
        }
        info!(path = %asset.path.display(), "Sent file by media type");
        Ok(())
    }

    async fn notify(&self, chat_id: i64, text: &str) {
        if let Err(e) = self.client.send_message(chat_id, text, None).await {
            error!(chat_id, "Failed to send message: {e:#}");
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().to_string())
}
