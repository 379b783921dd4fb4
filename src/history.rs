//! Past analyses for the current session.
//!
//! Every call to [`HistoryFlow::fetch_history`] downloads the full list again. Entries
//! keep the server's order.

use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::analysis::Detection;
use crate::error::ApiError;
use crate::http::{ApiClient, RequestOptions};
use crate::overlay::{self, OverlayBox};

pub const GENERIC_HISTORY_ERROR: &str = "An error occurred while fetching the analysis history.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Base64 of the analysed image.
    pub image_file: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub detections: Vec<Detection>,
}

impl HistoryEntry {
    pub fn decode_image(&self) -> Result<Vec<u8>, base64::DecodeError> {
        general_purpose::STANDARD.decode(self.image_file.trim())
    }

    pub fn data_url(&self) -> String {
        format!("data:image/jpeg;base64,{}", self.image_file)
    }

    pub fn overlays(&self) -> Vec<OverlayBox> {
        overlay::boxes(&self.detections)
    }
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    uploads: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HistoryState {
    Loading,
    Loaded(Vec<HistoryEntry>),
    Empty,
    Error(String),
}

#[derive(Debug, Clone)]
pub struct HistoryFlow {
    api: ApiClient,
    state: Arc<Mutex<HistoryState>>,
}

impl HistoryFlow {
    pub fn new(api: ApiClient) -> Self {
        Self {
            api,
            state: Arc::new(Mutex::new(HistoryState::Loading)),
        }
    }

    pub async fn state(&self) -> HistoryState {
        self.state.lock().await.clone()
    }

    pub async fn fetch_history(&self) -> Result<Vec<HistoryEntry>, ApiError> {
        *self.state.lock().await = HistoryState::Loading;

        let result = self
            .api
            .request_json::<HistoryResponse>("/history", RequestOptions::get().authenticated())
            .await
            .map(|r| r.uploads);

        let next = match &result {
            Ok(entries) if entries.is_empty() => HistoryState::Empty,
            Ok(entries) => HistoryState::Loaded(entries.clone()),
            Err(ApiError::Server { message, .. }) => {
                HistoryState::Error(format!("We couldn't fetch the history: {message}"))
            }
            Err(_) => HistoryState::Error(GENERIC_HISTORY_ERROR.to_string()),
        };

        match &result {
            Ok(entries) => tracing::info!(entries = entries.len(), "History fetched"),
            Err(e) => tracing::warn!(error = %e, "History fetch failed"),
        }

        *self.state.lock().await = next;
        result
    }
}
