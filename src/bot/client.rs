//! Telegram Bot API client.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::multipart;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::io::ReaderStream;
use tracing::debug;

use super::types::{ApiResponse, InlineKeyboardMarkup, Message, Update};

/// Slack on top of the long-poll timeout before the HTTP request gives up.
const POLL_GRACE: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    base_url: String,
}

impl TelegramClient {
    pub fn new(api_url: &str, token: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: format!("{}/bot{token}", api_url.trim_end_matches('/')),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{method}", self.base_url)
    }

    async fn call<B, T>(&self, method: &str, body: &B, timeout: Option<Duration>) -> Result<T>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let mut request = self.http.post(self.method_url(method)).json(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to call Telegram {method}"))?;
        Self::parse(method, response).await
    }

    async fn parse<T: DeserializeOwned>(method: &str, response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let body: ApiResponse<T> = response
            .json()
            .await
            .with_context(|| format!("Failed to parse Telegram {method} response ({status})"))?;

        if !body.ok {
            anyhow::bail!(
                "Telegram {method} failed: {}",
                body.description.as_deref().unwrap_or("no description")
            );
        }
        body.result
            .with_context(|| format!("Telegram {method} returned no result"))
    }

    /// Long-poll for updates with id at least `offset`.
    pub async fn get_updates(&self, offset: i64, timeout: Duration) -> Result<Vec<Update>> {
        let body = serde_json::json!({
            "offset": offset,
            "timeout": timeout.as_secs(),
            "allowed_updates": ["message", "callback_query"],
        });
        self.call("getUpdates", &body, Some(timeout + POLL_GRACE))
            .await
    }

    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&InlineKeyboardMarkup>,
    ) -> Result<Message> {
        let mut body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });
        if let Some(keyboard) = keyboard {
            body["reply_markup"] = serde_json::to_value(keyboard)?;
        }
        self.call("sendMessage", &body, None).await
    }

    pub async fn edit_message_text(&self, chat_id: i64, message_id: i64, text: &str) -> Result<()> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": text,
        });
        // Result is the edited message or `true`
        let _: serde_json::Value = self.call("editMessageText", &body, None).await?;
        Ok(())
    }

    pub async fn answer_callback_query(&self, callback_query_id: &str) -> Result<()> {
        let body = serde_json::json!({ "callback_query_id": callback_query_id });
        let _: bool = self.call("answerCallbackQuery", &body, None).await?;
        Ok(())
    }

    pub async fn send_document(&self, chat_id: i64, path: &Path, caption: &str) -> Result<Message> {
        self.send_file("sendDocument", "document", chat_id, path, caption)
            .await
    }

    pub async fn send_photo(&self, chat_id: i64, path: &Path, caption: &str) -> Result<Message> {
        self.send_file("sendPhoto", "photo", chat_id, path, caption)
            .await
    }

    pub async fn send_video(&self, chat_id: i64, path: &Path, caption: &str) -> Result<Message> {
        self.send_file("sendVideo", "video", chat_id, path, caption)
            .await
    }

    /// Upload a local file, streaming it from disk.
    async fn send_file(
        &self,
        method: &str,
        field: &'static str,
        chat_id: i64,
        path: &Path,
        caption: &str,
    ) -> Result<Message> {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let len = file.metadata().await?.len();
        let file_name = path
            .file_name()
            .map_or_else(|| "file".to_string(), |n| n.to_string_lossy().to_string());
        let mime = mime_guess::from_path(path).first_or_octet_stream();

        let part = multipart::Part::stream_with_length(
            reqwest::Body::wrap_stream(ReaderStream::new(file)),
            len,
        )
        .file_name(file_name)
        .mime_str(mime.as_ref())
        .context("Failed to set mime type")?;

        let form = multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption.to_string())
            .part(field, part);

        debug!(method, path = %path.display(), bytes = len, "Uploading file to Telegram");

        let response = self
            .http
            .post(self.method_url(method))
            .multipart(form)
            .send()
            .await
            .with_context(|| format!("Failed to call Telegram {method}"))?;
        Self::parse(method, response).await
    }
}
