//! Telegram Bot API transport.
//!
//! Long-polls `getUpdates`, turns messages into [`Envelope`]s and implements
//! [`Chat`] for replies, video uploads and file downloads.

use crate::bot::{Chat, Envelope, Incoming};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

const API_BASE: &str = "https://api.telegram.org";
const POLL_TIMEOUT_SECS: u64 = 30;
const MAX_MESSAGE_LEN: usize = 4096;

#[derive(Debug, Deserialize)]
struct TgResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgUpdate {
    update_id: i64,
    message: Option<TgMessage>,
}

#[derive(Debug, Deserialize)]
struct TgMessage {
    from: Option<TgUser>,
    chat: TgChat,
    text: Option<String>,
    #[serde(default)]
    photo: Vec<TgPhotoSize>,
    audio: Option<TgFileRef>,
    voice: Option<TgFileRef>,
}

#[derive(Debug, Deserialize)]
struct TgUser {
    id: i64,
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgChat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct TgPhotoSize {
    file_id: String,
    width: u32,
    height: u32,
}

#[derive(Debug, Deserialize)]
struct TgFileRef {
    file_id: String,
}

#[derive(Debug, Deserialize)]
struct TgFile {
    file_path: Option<String>,
}

pub struct Telegram {
    client: reqwest::Client,
    token: String,
}

impl Telegram {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: token.into(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", API_BASE, self.token, method)
    }

    /// Validates the token; returns the bot's username.
    pub async fn get_me(&self) -> Result<String> {
        let resp: TgResponse<TgUser> = self
            .client
            .get(self.method_url("getMe"))
            .send()
            .await?
            .json()
            .await?;
        let me = api_result(resp).context("getMe failed; check TELEGRAM_TOKEN")?;
        Ok(me.username.unwrap_or_else(|| me.id.to_string()))
    }

    async fn get_updates(&self, offset: i64) -> Result<Vec<TgUpdate>> {
        let resp: TgResponse<Vec<TgUpdate>> = self
            .client
            .get(self.method_url("getUpdates"))
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", POLL_TIMEOUT_SECS.to_string()),
                ("allowed_updates", r#"["message"]"#.to_string()),
            ])
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 10))
            .send()
            .await?
            .json()
            .await?;
        api_result(resp)
    }

    /// Polls forever, handing each usable message to `on_message`.
    pub async fn poll<F>(&self, mut on_message: F)
    where
        F: FnMut(Envelope),
    {
        let mut offset: i64 = 0;
        info!("Telegram polling started");
        loop {
            match self.get_updates(offset).await {
                Ok(updates) => {
                    for update in updates {
                        offset = update.update_id + 1;
                        let Some(message) = update.message else {
                            continue;
                        };
                        match envelope_from(message) {
                            Some(envelope) => on_message(envelope),
                            None => debug!("Ignoring update {} without usable content", update.update_id),
                        }
                    }
                }
                Err(e) => {
                    warn!("Telegram polling error: {e}");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }
    }
}

fn api_result<T>(resp: TgResponse<T>) -> Result<T> {
    if !resp.ok {
        anyhow::bail!("Telegram API error: {}", resp.description.unwrap_or_default());
    }
    resp.result
        .ok_or_else(|| anyhow::anyhow!("Telegram API returned no result"))
}

fn envelope_from(message: TgMessage) -> Option<Envelope> {
    let user_id = message.from.as_ref()?.id;
    let chat_id = message.chat.id;

    let incoming = if let Some(largest) = message
        .photo
        .iter()
        .max_by_key(|p| u64::from(p.width) * u64::from(p.height))
    {
        Incoming::Photo {
            file_id: largest.file_id.clone(),
        }
    } else if let Some(audio) = message.audio {
        Incoming::Audio {
            file_id: audio.file_id,
            extension: "mp3",
        }
    } else if let Some(voice) = message.voice {
        Incoming::Audio {
            file_id: voice.file_id,
            extension: "ogg",
        }
    } else {
        Incoming::Text(message.text.filter(|t| !t.trim().is_empty())?)
    };

    Some(Envelope {
        chat_id,
        user_id,
        incoming,
    })
}

#[async_trait]
impl Chat for Telegram {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()> {
        for chunk in split_message(text, MAX_MESSAGE_LEN) {
            let resp: TgResponse<serde_json::Value> = self
                .client
                .post(self.method_url("sendMessage"))
                .json(&serde_json::json!({ "chat_id": chat_id, "text": chunk }))
                .send()
                .await?
                .json()
                .await?;
            api_result(resp).context("sendMessage failed")?;
        }
        Ok(())
    }

    async fn send_video(&self, chat_id: i64, path: &Path) -> Result<()> {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let size = data.len();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video.mp4".to_string());

        let part = reqwest::multipart::Part::bytes(data)
            .file_name(file_name)
            .mime_str("video/mp4")?;
        let form = reqwest::multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .text("supports_streaming", "true")
            .part("video", part);

        info!("Telegram: uploading video ({} bytes) to chat {}", size, chat_id);
        let resp: TgResponse<serde_json::Value> = self
            .client
            .post(self.method_url("sendVideo"))
            .multipart(form)
            .send()
            .await?
            .json()
            .await?;
        api_result(resp).context("sendVideo failed")?;
        Ok(())
    }

    async fn download(&self, file_id: &str, dest: &Path) -> Result<()> {
        let resp: TgResponse<TgFile> = self
            .client
            .get(self.method_url("getFile"))
            .query(&[("file_id", file_id)])
            .send()
            .await?
            .json()
            .await?;
        let file_path = api_result(resp)?
            .file_path
            .ok_or_else(|| anyhow::anyhow!("No file_path in getFile response"))?;

        let url = format!("{}/file/bot{}/{}", API_BASE, self.token, file_path);
        let resp = self.client.get(&url).send().await?.error_for_status()?;
        let mut file = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("creating {}", dest.display()))?;
        let mut written = 0usize;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            written += chunk.len();
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        debug!("Telegram: downloaded {} ({} bytes) to {}", file_id, written, dest.display());
        Ok(())
    }
}

fn split_message(text: &str, max_len: usize) -> Vec<&str> {
    if text.len() <= max_len {
        return vec![text];
    }
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < text.len() {
        let mut end = (start + max_len).min(text.len());
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        let split_at = if end < text.len() {
            text[start..end].rfind('\n').map(|i| start + i + 1).unwrap_or(end)
        } else {
            end
        };
        chunks.push(&text[start..split_at]);
        start = split_at;
    }
    chunks
}
