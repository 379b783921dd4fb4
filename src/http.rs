//! Thin wrapper over `reqwest` that every flow goes through.
//!
//! Outcomes are normalised to `Result<serde_json::Value, ApiError>`. A failure response
//! carries the body's `error` field, an unreadable one the generic server message, and a
//! missing one the generic transport message. Nothing here retries.

use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::ClientConfig;
use crate::error::{ApiError, GENERIC_SERVER_ERROR};
use crate::session::SessionStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// A file sent as one multipart field.
#[derive(Debug, Clone)]
pub struct FilePart {
    pub field: &'static str,
    pub file_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl FilePart {
    fn into_form(self) -> Result<Form, ApiError> {
        let part = Part::bytes(self.bytes)
            .file_name(self.file_name)
            .mime_str(&self.mime)
            .map_err(|e| ApiError::Encode(format!("invalid mime type {:?}: {e}", self.mime)))?;
        Ok(Form::new().part(self.field, part))
    }
}

#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    /// `application/x-www-form-urlencoded`
    Form(Vec<(&'static str, String)>),
    Multipart(FilePart),
}

#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub body: RequestBody,
    pub authenticated: bool,
}

impl RequestOptions {
    pub fn get() -> Self {
        Self {
            method: Method::Get,
            body: RequestBody::Empty,
            authenticated: false,
        }
    }

    pub fn post(body: RequestBody) -> Self {
        Self {
            method: Method::Post,
            body,
            authenticated: false,
        }
    }

    pub fn authenticated(mut self) -> Self {
        self.authenticated = true;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    session: SessionStore,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, session: SessionStore) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            session,
        }
    }

    pub fn from_config(config: &ClientConfig, session: SessionStore) -> Result<Self, ApiError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(ApiError::Transport)?;

        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            session,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub async fn request(&self, path: &str, options: RequestOptions) -> Result<Value, ApiError> {
        let url = self.url(path);
        let mut builder = match options.method {
            Method::Get => self.http.get(&url),
            Method::Post => self.http.post(&url),
        };

        if options.authenticated {
            match self.session.token() {
                Some(token) => builder = builder.bearer_auth(token),
                None => tracing::debug!(path, "No token available, sending unauthenticated"),
            }
        }

        builder = match options.body {
            RequestBody::Empty => builder,
            RequestBody::Form(fields) => builder.form(&fields),
            RequestBody::Multipart(file) => builder.multipart(file.into_form()?),
        };

        tracing::debug!(method = ?options.method, %url, "Sending request");

        let response = builder.send().await.map_err(|e| {
            tracing::warn!(%url, error = %e, "Request failed before a response arrived");
            ApiError::Transport(e)
        })?;

        let status = response.status();
        let body = response.text().await;

        if !status.is_success() {
            let message = body
                .ok()
                .and_then(|text| error_field(&text))
                .unwrap_or_else(|| GENERIC_SERVER_ERROR.to_string());
            tracing::warn!(%url, status = status.as_u16(), %message, "Server reported an error");
            return Err(ApiError::Server { status, message });
        }

        let text = body.map_err(|e| ApiError::Decode(e.to_string()))?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// [`Self::request`] followed by deserialisation into `T`.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<T, ApiError> {
        let value = self.request(path, options).await?;
        serde_json::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

fn error_field(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value.get("error")?.as_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_without_double_slashes() {
        let client = ApiClient::new("http://localhost:5000/", SessionStore::in_memory());
        assert_eq!(client.url("/login"), "http://localhost:5000/login");
        assert_eq!(client.url("history"), "http://localhost:5000/history");
    }

    #[test]
    fn bad_mime_is_an_encode_error() {
        let part = FilePart {
            field: "image",
            file_name: "a.png".to_string(),
            mime: "not a mime".to_string(),
            bytes: vec![1, 2, 3],
        };
        match part.into_form() {
            Err(ApiError::Encode(detail)) => assert!(detail.contains("not a mime")),
            other => panic!("expected an encode error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn error_field_extraction() {
        assert_eq!(error_field(r#"{"error":"Invalid image"}"#).as_deref(), Some("Invalid image"));
        assert_eq!(error_field(r#"{"message":"nope"}"#), None);
        assert_eq!(error_field("<html>502</html>"), None);
    }

    #[test]
    fn options_builders() {
        let options = RequestOptions::get().authenticated();
        assert_eq!(options.method, Method::Get);
        assert!(options.authenticated);
        assert!(matches!(options.body, RequestBody::Empty));
    }
}
