//! Upload/analyze flow.
//!
//! Holds the selected image, its preview and the last analysis shown for it. Every
//! failure ends in [`AnalyzeStatus::Error`]; nothing here panics on a bad response.

use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use image::{GenericImageView, ImageFormat};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{AnalyzeError, ApiError};
use crate::guard::{self, InFlight};
use crate::http::{ApiClient, FilePart, RequestBody, RequestOptions};
use crate::overlay::{self, OverlayBox};

pub const NO_OBJECTS_MESSAGE: &str = "No objects detected";
pub const GENERIC_ANALYZE_ERROR: &str = "An error occurred while processing the image.";

/// One recognised object. Coordinates are pixel offsets in the analysed image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub name: String,
    pub score: f64,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Detection {
    /// `"dog — 92.0%"`
    pub fn label(&self) -> String {
        format!("{} — {:.1}%", self.name, self.score * 100.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub detections: Vec<Detection>,
}

#[derive(Debug, Deserialize)]
struct DescribeResponse {
    #[serde(default)]
    description: String,
}

/// Which backend shape to talk to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AnalyzeMode {
    /// Single `/analyse` call.
    #[default]
    Combined,
    /// `/detect` and `/describe` issued concurrently.
    Split,
}

/// An image picked for analysis, already checked to be decodable.
#[derive(Debug, Clone)]
pub struct ImageFile {
    name: String,
    mime: &'static str,
    bytes: Vec<u8>,
    width: u32,
    height: u32,
}

impl ImageFile {
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Result<Self, AnalyzeError> {
        let format =
            image::guess_format(&bytes).map_err(|e| AnalyzeError::InvalidImage(e.to_string()))?;
        let decoded = image::load_from_memory_with_format(&bytes, format)
            .map_err(|e| AnalyzeError::InvalidImage(e.to_string()))?;
        let (width, height) = decoded.dimensions();

        Ok(Self {
            name: name.into(),
            mime: mime_for(format),
            bytes,
            width,
            height,
        })
    }

    pub async fn open(path: impl AsRef<Path>) -> Result<Self, AnalyzeError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        Self::from_bytes(name, bytes)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime(&self) -> &str {
        self.mime
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn part(&self) -> FilePart {
        FilePart {
            field: "image",
            file_name: self.name.clone(),
            mime: self.mime.to_string(),
            bytes: self.bytes.clone(),
        }
    }
}

fn mime_for(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Png => "image/png",
        ImageFormat::Jpeg => "image/jpeg",
        ImageFormat::Gif => "image/gif",
        ImageFormat::WebP => "image/webp",
        ImageFormat::Bmp => "image/bmp",
        ImageFormat::Tiff => "image/tiff",
        _ => "application/octet-stream",
    }
}

/// Local preview of the selected image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preview {
    pub data_url: String,
    pub width: u32,
    pub height: u32,
}

impl Preview {
    fn of(file: &ImageFile) -> Self {
        Self {
            data_url: format!(
                "data:{};base64,{}",
                file.mime,
                general_purpose::STANDARD.encode(&file.bytes)
            ),
            width: file.width,
            height: file.height,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnalyzeStatus {
    Idle,
    FileSelected,
    Analyzing,
    ResultShown,
    /// Informational: the call succeeded but found nothing.
    NoObjects,
    Error(String),
}

/// What the analysis view renders.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzeView {
    pub file_name: Option<String>,
    pub preview: Option<Preview>,
    pub detections: Vec<Detection>,
    pub description: String,
    pub status: AnalyzeStatus,
}

impl AnalyzeView {
    pub fn overlays(&self) -> Vec<OverlayBox> {
        overlay::boxes(&self.detections)
    }

    pub fn message(&self) -> Option<&str> {
        match &self.status {
            AnalyzeStatus::NoObjects => Some(NO_OBJECTS_MESSAGE),
            AnalyzeStatus::Error(message) => Some(message),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct AnalyzeState {
    selected: Option<ImageFile>,
    preview: Option<Preview>,
    detections: Vec<Detection>,
    description: String,
    status: AnalyzeStatus,
    // Bumped on every selection so late responses for an old image are dropped.
    generation: u64,
}

#[derive(Debug, Clone)]
pub struct AnalyzeFlow {
    api: ApiClient,
    mode: AnalyzeMode,
    state: Arc<Mutex<AnalyzeState>>,
    in_flight: Arc<AtomicBool>,
}

impl AnalyzeFlow {
    pub fn new(api: ApiClient, mode: AnalyzeMode) -> Self {
        Self {
            api,
            mode,
            state: Arc::new(Mutex::new(AnalyzeState {
                selected: None,
                preview: None,
                detections: Vec::new(),
                description: String::new(),
                status: AnalyzeStatus::Idle,
                generation: 0,
            })),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn mode(&self) -> AnalyzeMode {
        self.mode
    }

    pub fn is_analyzing(&self) -> bool {
        guard::is_busy(&self.in_flight)
    }

    pub async fn view(&self) -> AnalyzeView {
        let state = self.state.lock().await;
        AnalyzeView {
            file_name: state.selected.as_ref().map(|f| f.name.clone()),
            preview: state.preview.clone(),
            detections: state.detections.clone(),
            description: state.description.clone(),
            status: state.status.clone(),
        }
    }

    /// Replaces the selection and drops results computed for the previous one.
    pub async fn select_file(&self, file: ImageFile) {
        let mut state = self.state.lock().await;
        tracing::debug!(file = %file.name, mime = file.mime, "Image selected");
        state.preview = Some(Preview::of(&file));
        state.selected = Some(file);
        state.detections.clear();
        state.description.clear();
        state.status = AnalyzeStatus::FileSelected;
        state.generation += 1;
    }

    pub async fn analyze(&self) -> Result<AnalysisResult, AnalyzeError> {
        let _flight = InFlight::acquire(&self.in_flight).ok_or(AnalyzeError::InFlight)?;

        let (file, generation) = {
            let mut state = self.state.lock().await;
            let file = state.selected.clone().ok_or(AnalyzeError::NoFileSelected)?;
            state.status = AnalyzeStatus::Analyzing;
            (file, state.generation)
        };

        tracing::info!(file = %file.name, mode = ?self.mode, "Analysing image");
        let outcome = match self.mode {
            AnalyzeMode::Combined => self.analyse_combined(&file).await,
            AnalyzeMode::Split => self.analyse_split(&file).await,
        };

        let mut state = self.state.lock().await;
        if state.generation != generation {
            tracing::debug!(file = %file.name, "Discarding analysis for a replaced image");
            return Err(AnalyzeError::Superseded);
        }

        match outcome {
            Ok(result) => {
                state.detections = result.detections.clone();
                state.description = result.description.clone();
                state.status = if result.detections.is_empty() {
                    AnalyzeStatus::NoObjects
                } else {
                    AnalyzeStatus::ResultShown
                };
                tracing::info!(
                    detections = result.detections.len(),
                    "Analysis completed"
                );
                Ok(result)
            }
            Err(Failure { error, detections }) => {
                if let Some(detections) = detections {
                    state.detections = detections;
                }
                state.status = AnalyzeStatus::Error(failure_message(&error));
                tracing::warn!(%error, kept = state.detections.len(), "Analysis failed");
                Err(error.into())
            }
        }
    }

    async fn analyse_combined(&self, file: &ImageFile) -> Result<AnalysisResult, Failure> {
        let options = RequestOptions::post(RequestBody::Multipart(file.part())).authenticated();
        Ok(self.api.request_json("/analyse", options).await?)
    }

    /// `/detect` and `/describe` run concurrently. Detections survive a failed `/describe`.
    async fn analyse_split(&self, file: &ImageFile) -> Result<AnalysisResult, Failure> {
        let detect = self.api.request_json::<Vec<Detection>>(
            "/detect",
            RequestOptions::post(RequestBody::Multipart(file.part())).authenticated(),
        );
        let describe = self.api.request_json::<DescribeResponse>(
            "/describe",
            RequestOptions::post(RequestBody::Multipart(file.part())).authenticated(),
        );

        match tokio::join!(detect, describe) {
            (Ok(detections), Ok(described)) => Ok(AnalysisResult {
                detections,
                description: described.description,
            }),
            (Ok(detections), Err(error)) => Err(Failure {
                error,
                detections: Some(detections),
            }),
            (Err(error), _) => Err(error.into()),
        }
    }
}

/// A failed analysis, with whatever detections arrived before the failure.
struct Failure {
    error: ApiError,
    detections: Option<Vec<Detection>>,
}

impl From<ApiError> for Failure {
    fn from(error: ApiError) -> Self {
        Self {
            error,
            detections: None,
        }
    }
}

fn failure_message(error: &ApiError) -> String {
    match error {
        ApiError::Server { message, .. } => format!("We couldn't process the image: {message}"),
        _ => GENERIC_ANALYZE_ERROR.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionStore;
    use image::{ImageBuffer, Rgb};
    use reqwest::StatusCode;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = ImageBuffer::from_pixel(width, height, Rgb([10u8, 20, 30]));
        let mut bytes = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageOutputFormat::Png)
            .unwrap();
        bytes
    }

    fn dog() -> Detection {
        Detection {
            name: "dog".to_string(),
            score: 0.92,
            x: 10.0,
            y: 20.0,
            width: 100.0,
            height: 80.0,
        }
    }

    #[test]
    fn label_formats_percentage() {
        assert_eq!(dog().label(), "dog — 92.0%");
        let cat = Detection {
            name: "cat".to_string(),
            score: 0.5,
            ..dog()
        };
        assert_eq!(cat.label(), "cat — 50.0%");
    }

    #[test]
    fn image_file_reads_format_and_size() {
        let file = ImageFile::from_bytes("a.png", png(4, 3)).unwrap();
        assert_eq!(file.mime(), "image/png");
        assert_eq!(file.dimensions(), (4, 3));
    }

    #[test]
    fn rejects_non_images() {
        let err = ImageFile::from_bytes("notes.txt", b"hello".to_vec()).unwrap_err();
        assert!(matches!(err, AnalyzeError::InvalidImage(_)));
    }

    #[test]
    fn failure_messages() {
        let server = ApiError::Server {
            status: StatusCode::BAD_REQUEST,
            message: "Invalid image".to_string(),
        };
        assert_eq!(
            failure_message(&server),
            "We couldn't process the image: Invalid image"
        );
        assert_eq!(
            failure_message(&ApiError::Decode("x".to_string())),
            GENERIC_ANALYZE_ERROR
        );
    }

    #[test]
    fn analysis_result_tolerates_missing_fields() {
        let result: AnalysisResult = serde_json::from_str(r#"{"description":"a dog"}"#).unwrap();
        assert!(result.detections.is_empty());

        let result: AnalysisResult = serde_json::from_str(
            r#"{"description":"a dog","detections":[{"name":"dog","score":0.92,"x":10,"y":20,"width":100,"height":80}]}"#,
        )
        .unwrap();
        assert_eq!(result.detections, vec![dog()]);
    }

    #[tokio::test]
    async fn select_file_clears_previous_results() {
        let flow = AnalyzeFlow::new(
            ApiClient::new("http://127.0.0.1:9", SessionStore::in_memory()),
            AnalyzeMode::Combined,
        );
        {
            let mut state = flow.state.lock().await;
            state.detections = vec![dog()];
            state.description = "a dog".to_string();
            state.status = AnalyzeStatus::ResultShown;
        }

        flow.select_file(ImageFile::from_bytes("b.png", png(2, 2)).unwrap())
            .await;

        let view = flow.view().await;
        assert!(view.detections.is_empty());
        assert!(view.description.is_empty());
        assert_eq!(view.status, AnalyzeStatus::FileSelected);
        assert_eq!(view.file_name.as_deref(), Some("b.png"));
        let preview = view.preview.unwrap();
        assert!(preview.data_url.starts_with("data:image/png;base64,"));
        assert_eq!((preview.width, preview.height), (2, 2));
    }

    #[tokio::test]
    async fn analyze_without_selection_is_refused() {
        let flow = AnalyzeFlow::new(
            ApiClient::new("http://127.0.0.1:9", SessionStore::in_memory()),
            AnalyzeMode::Combined,
        );
        let err = flow.analyze().await.unwrap_err();
        assert!(matches!(err, AnalyzeError::NoFileSelected));
        assert_eq!(flow.view().await.status, AnalyzeStatus::Idle);
        assert!(!flow.is_analyzing());
    }

    #[test]
    fn view_messages() {
        let mut view = AnalyzeView {
            file_name: None,
            preview: None,
            detections: vec![],
            description: String::new(),
            status: AnalyzeStatus::NoObjects,
        };
        assert_eq!(view.message(), Some(NO_OBJECTS_MESSAGE));
        view.status = AnalyzeStatus::Error("boom".to_string());
        assert_eq!(view.message(), Some("boom"));
        view.status = AnalyzeStatus::ResultShown;
        assert_eq!(view.message(), None);
    }
}
