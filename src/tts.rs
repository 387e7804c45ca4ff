//! Narration through the ElevenLabs text-to-speech API.

use crate::audio::PcmWavWriter;
use crate::error::{BotError, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Sample rate of the `pcm_22050` output format.
pub const NARRATION_SAMPLE_RATE: u32 = 22050;

const API_BASE: &str = "https://api.elevenlabs.io/v1/text-to-speech";

/// A narration file on disk. Its length is read back by the clip composer.
#[derive(Debug, Clone, PartialEq)]
pub struct Narration {
    pub path: PathBuf,
}

pub fn narration_text(quote: &str, author: &str) -> String {
    format!("{} - {}", quote, author)
}

#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Narrates `quote` and `author` into `voice_{index}.wav` under `dest_dir`.
    async fn synthesize(&self, quote: &str, author: &str, index: usize, dest_dir: &Path) -> Result<Narration>;
}

#[derive(Debug, Clone)]
pub struct VoiceConfig {
    pub voice_id: String,
    pub model_id: String,
    pub stability: f32,
    pub similarity_boost: f32,
    pub style: f32,
    pub use_speaker_boost: bool,
}

impl VoiceConfig {
    pub fn new(voice_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            voice_id: voice_id.into(),
            model_id: model_id.into(),
            stability: 0.0,
            similarity_boost: 1.0,
            style: 0.0,
            use_speaker_boost: false,
        }
    }
}

pub struct ElevenLabs {
    client: reqwest::Client,
    api_key: String,
    voice: VoiceConfig,
}

impl ElevenLabs {
    pub fn new(api_key: impl Into<String>, voice: VoiceConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key: api_key.into(),
            voice,
        }
    }

    fn request_body(&self, text: &str) -> serde_json::Value {
        serde_json::json!({
            "text": text,
            "model_id": self.voice.model_id,
            "voice_settings": {
                "stability": self.voice.stability,
                "similarity_boost": self.voice.similarity_boost,
                "style": self.voice.style,
                "use_speaker_boost": self.voice.use_speaker_boost,
            },
        })
    }
}

#[async_trait]
impl Synthesizer for ElevenLabs {
    async fn synthesize(&self, quote: &str, author: &str, index: usize, dest_dir: &Path) -> Result<Narration> {
        let text = narration_text(quote, author);
        info!(
            "TTS: ElevenLabs voice={} item={} ({} chars)",
            self.voice.voice_id,
            index,
            text.chars().count()
        );

        let resp = self
            .client
            .post(format!("{}/{}", API_BASE, self.voice.voice_id))
            .query(&[("output_format", format!("pcm_{}", NARRATION_SAMPLE_RATE))])
            .header("xi-api-key", &self.api_key)
            .json(&self.request_body(&text))
            .send()
            .await
            .map_err(|e| BotError::Synthesis(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(BotError::Synthesis(format!("HTTP {}: {}", status, body)));
        }

        let path = dest_dir.join(format!("voice_{}.wav", index));
        let write_err = |e: hound::Error| BotError::Write {
            path: path.clone(),
            message: e.to_string(),
        };
        let mut writer = PcmWavWriter::create(&path, NARRATION_SAMPLE_RATE).map_err(write_err)?;
        let mut received = 0usize;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| BotError::Synthesis(e.to_string()))?;
            received += chunk.len();
            writer.write_chunk(&chunk).map_err(write_err)?;
        }
        writer.finalize().map_err(write_err)?;

        if received == 0 {
            return Err(BotError::Synthesis("empty audio stream".to_string()));
        }

        debug!("TTS: {} bytes -> {}", received, path.display());
        Ok(Narration { path })
    }
}
