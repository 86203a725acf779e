//! Audio transcription for voice notes.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::LlmError;

/// Turns an audio message into text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, media_url: &str) -> Result<String, LlmError>;
}

#[derive(Debug, Clone)]
pub struct WhisperConfig {
    pub api_key: SecretString,
    /// OpenAI-compatible API root, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    pub model: String,
}

impl WhisperConfig {
    /// `None` when no API key is configured.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())?;
        Some(Self {
            api_key: SecretString::from(api_key),
            base_url: std::env::var("WHISPER_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            model: std::env::var("WHISPER_MODEL").unwrap_or_else(|_| "whisper-1".to_string()),
        })
    }
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Downloads the media and posts it to `/audio/transcriptions`.
pub struct WhisperTranscriber {
    config: WhisperConfig,
    client: reqwest::Client,
}

impl WhisperTranscriber {
    pub fn new(config: WhisperConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

fn transcription_err(e: impl std::fmt::Display) -> LlmError {
    LlmError::Transcription(e.to_string())
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, media_url: &str) -> Result<String, LlmError> {
        let media = self
            .client
            .get(media_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(transcription_err)?;
        let mime = media
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("audio/ogg")
            .to_string();
        let bytes = media.bytes().await.map_err(transcription_err)?;

        let part = Part::bytes(bytes.to_vec())
            .file_name("audio.ogg")
            .mime_str(&mime)
            .map_err(transcription_err)?;
        let form = Form::new()
            .part("file", part)
            .text("model", self.config.model.clone());

        let resp = self
            .client
            .post(format!(
                "{}/audio/transcriptions",
                self.config.base_url.trim_end_matches('/')
            ))
            .bearer_auth(self.config.api_key.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(transcription_err)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::Transcription(format!("HTTP {status}: {body}")));
        }

        let parsed: TranscriptionResponse = resp.json().await.map_err(transcription_err)?;
        tracing::debug!(chars = parsed.text.len(), "Audio transcribed");
        Ok(parsed.text.trim().to_string())
    }
}
