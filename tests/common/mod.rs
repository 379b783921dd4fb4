#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use image::{ImageBuffer, Rgb};
use tokio::sync::Notify;

use image_analyser::{ApiClient, ImageFile, SessionStore};

#[derive(Debug, Clone)]
pub struct Recorded {
    pub path: &'static str,
    pub authorization: Option<String>,
    pub body: Vec<u8>,
}

impl Recorded {
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Default)]
struct Inner {
    replies: Mutex<HashMap<&'static str, (u16, String)>>,
    requests: Mutex<Vec<Recorded>>,
    hold: AtomicBool,
    gate: Notify,
}

/// In-process stand-in for the analysis backend.
#[derive(Clone)]
pub struct MockBackend {
    inner: Arc<Inner>,
    pub addr: SocketAddr,
}

impl MockBackend {
    pub async fn start() -> Self {
        let inner = Arc::new(Inner::default());

        let mut app = Router::new();
        for path in ["/login", "/register", "/analyse", "/detect", "/describe"] {
            app = app.route(path, post(handler(inner.clone(), path)));
        }
        app = app.route("/history", get(handler(inner.clone(), "/history")));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { inner, addr }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn client(&self, session: &SessionStore) -> ApiClient {
        ApiClient::new(self.base_url(), session.clone())
    }

    pub fn reply(&self, path: &'static str, status: u16, body: &str) {
        self.inner
            .replies
            .lock()
            .unwrap()
            .insert(path, (status, body.to_string()));
    }

    pub fn reply_json(&self, path: &'static str, status: u16, body: serde_json::Value) {
        self.reply(path, status, &body.to_string());
    }

    pub fn requests(&self, path: &str) -> Vec<Recorded> {
        self.inner
            .requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }

    pub fn hits(&self, path: &str) -> usize {
        self.requests(path).len()
    }

    /// Requests are recorded immediately but not answered until [`Self::release`].
    pub fn hold(&self) {
        self.inner.hold.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.inner.hold.store(false, Ordering::SeqCst);
        self.inner.gate.notify_waiters();
        self.inner.gate.notify_one();
    }

    pub async fn wait_for_hits(&self, path: &str, count: usize) {
        for _ in 0..400 {
            if self.hits(path) >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {count} request(s) to {path}");
    }
}

fn handler(
    inner: Arc<Inner>,
    path: &'static str,
) -> impl Fn(HeaderMap, Bytes) -> std::pin::Pin<Box<dyn std::future::Future<Output = axum::response::Response> + Send>>
       + Clone
       + Send
       + Sync
       + 'static {
    move |headers: HeaderMap, body: Bytes| {
        let inner = inner.clone();
        Box::pin(async move {
            let authorization = headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            inner.requests.lock().unwrap().push(Recorded {
                path,
                authorization,
                body: body.to_vec(),
            });

            if inner.hold.load(Ordering::SeqCst) {
                inner.gate.notified().await;
            }

            let (status, body) = inner
                .replies
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .unwrap_or((404, r#"{"error":"not configured"}"#.to_string()));

            (
                StatusCode::from_u16(status).unwrap(),
                [(header::CONTENT_TYPE, "application/json")],
                body,
            )
                .into_response()
        })
    }
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = ImageBuffer::from_pixel(width, height, Rgb([200u8, 180, 40]));
    let mut bytes = Vec::new();
    img.write_to(
        &mut std::io::Cursor::new(&mut bytes),
        image::ImageOutputFormat::Png,
    )
    .unwrap();
    bytes
}

pub fn image_file(name: &str) -> ImageFile {
    ImageFile::from_bytes(name, png_bytes(160, 120)).unwrap()
}

pub fn dog_response() -> serde_json::Value {
    serde_json::json!({
        "description": "a dog",
        "detections": [
            {"name": "dog", "score": 0.92, "x": 10, "y": 20, "width": 100, "height": 80}
        ]
    })
}
