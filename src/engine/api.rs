//! Playback engine API client implementation

use crate::engine::models::{
    Chapter, LoadRequest, PlaybackStatus, SeekRequest, SpeedRequest, VolumeRequest,
};
use async_trait::async_trait;
use reqwest::{Client, Error as ReqwestError, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration as StdDuration;
use thiserror::Error;
use tracing::{debug, error, trace, warn};
use uuid::Uuid;

const LOG_TARGET: &str = "r_bookcli::engine::api";

/// Error types for engine API operations
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Network error: {0}")]
    Network(#[from] ReqwestError),
    #[error("Authentication error: {0}")]
    Authentication(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Engine rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// The command surface of the out-of-process playback engine.
///
/// Every call is a suspension point; none of them carry ordering guarantees
/// relative to each other.
#[async_trait]
pub trait EngineApiContract: Send + Sync {
    async fn load(&self, file_path: &str) -> Result<(), EngineError>;
    async fn play(&self) -> Result<(), EngineError>;
    async fn pause(&self) -> Result<(), EngineError>;
    async fn stop(&self) -> Result<(), EngineError>;
    async fn seek(&self, position_secs: f64) -> Result<(), EngineError>;
    async fn set_volume(&self, volume: f64) -> Result<(), EngineError>;
    async fn set_speed(&self, speed: f64) -> Result<(), EngineError>;
    async fn get_status(&self) -> Result<PlaybackStatus, EngineError>;
    async fn get_chapters(&self, audiobook_id: &str) -> Result<Vec<Chapter>, EngineError>;
    async fn play_chapter(&self, chapter_id: &str) -> Result<(), EngineError>;
}

/// HTTP client for the playback engine
#[derive(Clone)]
pub struct EngineClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    client_session_id: String,
    client_name: String,
}

impl EngineClient {
    /// Create a new engine client for the given base URL.
    pub fn new(base_url: &str, timeout: StdDuration) -> Self {
        debug!(target: LOG_TARGET, "Creating new EngineClient with base_url: {}", base_url);

        let client = match Client::builder().timeout(timeout).build() {
            Ok(client) => client,
            Err(e) => {
                warn!(target: LOG_TARGET, "Error creating HTTP client with timeout: {:?}. Falling back to default.", e);
                Client::new()
            }
        };

        let client_name = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "r-bookcli".to_string());

        EngineClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: None,
            client_session_id: Uuid::new_v4().to_string(),
            client_name,
        }
    }

    /// Set API key sent with every request
    pub fn with_api_key(mut self, api_key: &str) -> Self {
        self.api_key = Some(api_key.to_string());
        self
    }

    /// Builds a full URL for an endpoint path.
    pub fn build_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// URL of the chapter list for an audiobook.
    pub fn chapters_url(&self, audiobook_id: &str) -> String {
        self.build_url(&format!("/audiobooks/{}/chapters", urlencoding::encode(audiobook_id)))
    }

    /// URL that starts playback of a single chapter.
    pub fn play_chapter_url(&self, chapter_id: &str) -> String {
        self.build_url(&format!("/chapters/{}/play", urlencoding::encode(chapter_id)))
    }

    fn with_headers(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder
            .header("X-Client-Session", &self.client_session_id)
            .header("X-Client-Name", &self.client_name);
        match &self.api_key {
            Some(key) => builder.header("X-Engine-Token", key),
            None => builder,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> Result<T, EngineError> {
        trace!(target: LOG_TARGET, "GET {}", url);
        let response = self.with_headers(self.client.get(&url)).send().await?;
        Self::handle_json_response(response).await
    }

    async fn post_command(&self, url: String) -> Result<(), EngineError> {
        debug!(target: LOG_TARGET, "POST {}", url);
        let response = self.with_headers(self.client.post(&url)).send().await?;
        Self::handle_command_response(response).await
    }

    async fn post_json_command<B: Serialize>(&self, url: String, body: &B) -> Result<(), EngineError> {
        debug!(target: LOG_TARGET, "POST {} with JSON body", url);
        let response = self
            .with_headers(self.client.post(&url))
            .json(body)
            .send()
            .await?;
        Self::handle_command_response(response).await
    }

    async fn handle_command_response(response: Response) -> Result<(), EngineError> {
        let status = response.status();
        if status.is_success() {
            trace!(target: LOG_TARGET, "Command accepted with status {}", status);
            Ok(())
        } else {
            Err(Self::error_from_status(status, response).await)
        }
    }

    async fn handle_json_response<T: DeserializeOwned>(response: Response) -> Result<T, EngineError> {
        let status = response.status();
        if !status.is_success() {
            return Err(Self::error_from_status(status, response).await);
        }

        let text = response.text().await?;
        if text.is_empty() {
            error!(target: LOG_TARGET, "Received empty response body with success status {}", status);
            return Err(EngineError::InvalidResponse("Empty response body received".to_string()));
        }
        serde_json::from_str::<T>(&text).map_err(|e| {
            error!(target: LOG_TARGET, "JSON parsing error: {}. Body: {}", e, text);
            EngineError::InvalidResponse(format!("Failed to parse JSON response: {}", e))
        })
    }

    async fn error_from_status(status: StatusCode, response: Response) -> EngineError {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read error body".to_string());
        error!(target: LOG_TARGET, "Request failed. Status: {}, Body: {}", status, body);
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                EngineError::Authentication(format!("{}: {}", status, body))
            }
            StatusCode::NOT_FOUND => EngineError::NotFound(body),
            _ => EngineError::Rejected {
                status: status.as_u16(),
                body,
            },
        }
    }

    // --- Getter methods (primarily for testing/debugging) ---
    pub fn get_base_url(&self) -> &str {
        &self.base_url
    }
    pub fn get_api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }
    pub fn client_session_id(&self) -> &str {
        &self.client_session_id
    }
}

#[async_trait]
impl EngineApiContract for EngineClient {
    async fn load(&self, file_path: &str) -> Result<(), EngineError> {
        self.post_json_command(self.build_url("/playback/load"), &LoadRequest { file_path })
            .await
    }

    async fn play(&self) -> Result<(), EngineError> {
        self.post_command(self.build_url("/playback/play")).await
    }

    async fn pause(&self) -> Result<(), EngineError> {
        self.post_command(self.build_url("/playback/pause")).await
    }

    async fn stop(&self) -> Result<(), EngineError> {
        self.post_command(self.build_url("/playback/stop")).await
    }

    async fn seek(&self, position_secs: f64) -> Result<(), EngineError> {
        self.post_json_command(
            self.build_url("/playback/seek"),
            &SeekRequest { position: position_secs },
        )
        .await
    }

    async fn set_volume(&self, volume: f64) -> Result<(), EngineError> {
        self.post_json_command(self.build_url("/playback/volume"), &VolumeRequest { volume })
            .await
    }

    async fn set_speed(&self, speed: f64) -> Result<(), EngineError> {
        self.post_json_command(self.build_url("/playback/speed"), &SpeedRequest { speed })
            .await
    }

    async fn get_status(&self) -> Result<PlaybackStatus, EngineError> {
        self.get_json(self.build_url("/playback/status")).await
    }

    async fn get_chapters(&self, audiobook_id: &str) -> Result<Vec<Chapter>, EngineError> {
        let mut chapters: Vec<Chapter> = self.get_json(self.chapters_url(audiobook_id)).await?;
        chapters.sort_by_key(|c| c.chapter_number);
        debug!(target: LOG_TARGET, "Fetched {} chapters for audiobook {}", chapters.len(), audiobook_id);
        Ok(chapters)
    }

    async fn play_chapter(&self, chapter_id: &str) -> Result<(), EngineError> {
        self.post_command(self.play_chapter_url(chapter_id)).await
    }
}
