//! Caption proxy: accepts an uploaded image and asks a chat-completions model what is in it.
//!
//! `POST /api/upload` with a multipart `image` field. The reply is `{"result": "..."}`, or
//! `{"error": "..."}` with a 4xx/5xx status.

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::config::ProxyConfig;

pub const PROMPT: &str = "What's in this image?";
pub const UPSTREAM_FAILURE: &str = "Failed to process image.";
const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
const JPEG_QUALITY: u8 = 85;
const ERROR_PREVIEW_CHARS: usize = 500;

#[derive(Clone)]
pub struct ProxyState {
    api_key: String,
    upstream_base_url: String,
    model: String,
    http: reqwest::Client,
}

impl ProxyState {
    pub fn new(config: &ProxyConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            upstream_base_url: config.upstream_base_url.clone(),
            model: config.model.clone(),
            http: reqwest::Client::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub result: String,
}

#[derive(Debug)]
pub enum ProxyError {
    MissingImage,
    InvalidImage,
    Upstream(String),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ProxyError::MissingImage => (StatusCode::BAD_REQUEST, "No image uploaded"),
            ProxyError::InvalidImage => (StatusCode::BAD_REQUEST, "Invalid image"),
            ProxyError::Upstream(detail) => {
                tracing::error!(error = %detail, "Error processing image");
                (StatusCode::INTERNAL_SERVER_ERROR, UPSTREAM_FAILURE)
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Decodes the upload and re-encodes it as JPEG so the inlined data URL is always
/// `image/jpeg`.
pub fn to_jpeg_base64(data: &[u8]) -> Result<String, ProxyError> {
    let img = image::load_from_memory(data).map_err(|_| ProxyError::InvalidImage)?;
    let rgb = image::DynamicImage::ImageRgb8(img.to_rgb8());

    let mut jpeg_bytes = Vec::new();
    rgb.write_to(
        &mut std::io::Cursor::new(&mut jpeg_bytes),
        image::ImageOutputFormat::Jpeg(JPEG_QUALITY),
    )
    .map_err(|e| ProxyError::Upstream(e.to_string()))?;

    Ok(general_purpose::STANDARD.encode(&jpeg_bytes))
}

/// At most `max` characters of `text`, never splitting a character.
fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

async fn describe_image(state: &ProxyState, image_base64: &str) -> Result<String, ProxyError> {
    let url = format!(
        "{}/chat/completions",
        state.upstream_base_url.trim_end_matches('/')
    );

    let payload = json!({
        "model": state.model,
        "messages": [{
            "role": "user",
            "content": [
                { "type": "text", "text": PROMPT },
                {
                    "type": "image_url",
                    "image_url": { "url": format!("data:image/jpeg;base64,{image_base64}") }
                }
            ]
        }]
    });

    tracing::debug!(%url, model = %state.model, "Sending image to chat completions");

    let response = state
        .http
        .post(&url)
        .bearer_auth(&state.api_key)
        .json(&payload)
        .send()
        .await
        .map_err(|e| ProxyError::Upstream(e.to_string()))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ProxyError::Upstream(e.to_string()))?;

    if !status.is_success() {
        return Err(ProxyError::Upstream(format!(
            "API error {status}: {}",
            truncate_chars(&body, ERROR_PREVIEW_CHARS)
        )));
    }

    let completion: ChatCompletion =
        serde_json::from_str(&body).map_err(|e| ProxyError::Upstream(e.to_string()))?;

    completion
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| ProxyError::Upstream("no content in completion".to_string()))
}

async fn upload_image(
    State(state): State<Arc<ProxyState>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ProxyError> {
    let start = std::time::Instant::now();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| ProxyError::MissingImage)?
    {
        if field.name() != Some("image") {
            continue;
        }
        let data = field.bytes().await.map_err(|_| ProxyError::MissingImage)?;
        let image_base64 = to_jpeg_base64(&data)?;

        let result = describe_image(&state, &image_base64).await?;
        tracing::info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Image described"
        );
        return Ok(Json(UploadResponse { result }));
    }

    Err(ProxyError::MissingImage)
}

pub fn router(config: &ProxyConfig) -> Router {
    let state = Arc::new(ProxyState::new(config));

    let api = Router::new()
        .route("/api/upload", post(upload_image))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state);

    let app = match &config.static_dir {
        Some(dir) => api.fallback_service(ServeDir::new(dir)),
        None => api,
    };

    app.layer(CorsLayer::permissive())
}
