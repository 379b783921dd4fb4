//! Login, registration and logout.
//!
//! Validation runs before anything touches the network. Only one submission per flow
//! runs at a time; a second one while the first is pending is refused with
//! [`AuthError::InFlight`] and sends nothing.

use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::error::{ApiError, AuthError};
use crate::guard::{self, InFlight};
use crate::http::{ApiClient, RequestBody, RequestOptions};
use crate::session::SessionStore;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[\w.-]+@[a-zA-Z\d.-]+\.[a-zA-Z]{2,}$").expect("email pattern is valid")
});

pub const EMAIL_REQUIRED: &str = "Enter your email";
pub const EMAIL_INVALID: &str = "Invalid email";
pub const PASSWORD_REQUIRED: &str = "Enter your password";
pub const CONFIRMATION_REQUIRED: &str = "Enter the password confirmation";
pub const PASSWORDS_DIFFER: &str = "Passwords do not match";

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormKind {
    Login,
    Register,
}

/// Lives only for one submission; never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
    pub password_confirmation: Option<String>,
}

impl Credentials {
    pub fn login(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            password_confirmation: None,
        }
    }

    pub fn register(
        email: impl Into<String>,
        password: impl Into<String>,
        confirmation: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            password_confirmation: Some(confirmation.into()),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

/// Per-field messages. `None` means the field is fine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors {
    pub email: Option<String>,
    pub password: Option<String>,
    pub password_confirmation: Option<String>,
}

impl FieldErrors {
    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.password.is_none() && self.password_confirmation.is_none()
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields = [
            ("email", &self.email),
            ("password", &self.password),
            ("password_confirmation", &self.password_confirmation),
        ];
        let mut first = true;
        for (name, message) in fields {
            if let Some(message) = message {
                if !first {
                    f.write_str("; ")?;
                }
                write!(f, "{name}: {message}")?;
                first = false;
            }
        }
        Ok(())
    }
}

pub fn validate(credentials: &Credentials, kind: FormKind) -> FieldErrors {
    let mut errors = FieldErrors::default();

    if credentials.email.is_empty() {
        errors.email = Some(EMAIL_REQUIRED.to_string());
    } else if !is_valid_email(&credentials.email) {
        errors.email = Some(EMAIL_INVALID.to_string());
    }

    if credentials.password.is_empty() {
        errors.password = Some(PASSWORD_REQUIRED.to_string());
    }

    if kind == FormKind::Register {
        let confirmation = credentials.password_confirmation.as_deref().unwrap_or_default();
        if confirmation.is_empty() {
            errors.password_confirmation = Some(CONFIRMATION_REQUIRED.to_string());
        } else if !credentials.password.is_empty() && confirmation != credentials.password {
            errors.password_confirmation = Some(PASSWORDS_DIFFER.to_string());
        }
    }

    errors
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Anonymous,
    Submitting,
    Authenticated,
    Failed(String),
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    access_token: String,
}

#[derive(Debug, Clone)]
pub struct AuthFlow {
    api: ApiClient,
    state: Arc<Mutex<AuthState>>,
    in_flight: Arc<AtomicBool>,
}

impl AuthFlow {
    pub fn new(api: ApiClient) -> Self {
        let initial = if api.session().is_authenticated() {
            AuthState::Authenticated
        } else {
            AuthState::Anonymous
        };
        Self {
            api,
            state: Arc::new(Mutex::new(initial)),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn session(&self) -> &SessionStore {
        self.api.session()
    }

    pub async fn state(&self) -> AuthState {
        self.state.lock().await.clone()
    }

    /// True while a submission is pending (the submit control is disabled).
    pub fn is_submitting(&self) -> bool {
        guard::is_busy(&self.in_flight)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<(), AuthError> {
        let credentials = Credentials::login(email, password);
        let errors = validate(&credentials, FormKind::Login);
        if !errors.is_empty() {
            return Err(AuthError::Invalid(errors));
        }

        let _flight = InFlight::acquire(&self.in_flight).ok_or(AuthError::InFlight)?;
        self.set_state(AuthState::Submitting).await;

        let result = self.submit_login(&credentials).await;
        self.finish(result).await
    }

    /// Creates the account, then logs in with the same credentials.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        password_confirmation: &str,
    ) -> Result<(), AuthError> {
        let credentials = Credentials::register(email, password, password_confirmation);
        let errors = validate(&credentials, FormKind::Register);
        if !errors.is_empty() {
            return Err(AuthError::Invalid(errors));
        }

        let _flight = InFlight::acquire(&self.in_flight).ok_or(AuthError::InFlight)?;
        self.set_state(AuthState::Submitting).await;

        let result = match self.submit_register(&credentials).await {
            Ok(()) => self.submit_login(&credentials).await,
            Err(e) => Err(e),
        };
        self.finish(result).await
    }

    pub async fn logout(&self) -> Result<(), AuthError> {
        self.session().clear_token()?;
        self.set_state(AuthState::Anonymous).await;
        Ok(())
    }

    async fn submit_login(&self, credentials: &Credentials) -> Result<(), AuthError> {
        tracing::info!(email = %credentials.email, "Logging in");
        let body = RequestBody::Form(vec![
            ("email", credentials.email.clone()),
            ("password", credentials.password.clone()),
        ]);
        let response: LoginResponse = self
            .api
            .request_json("/login", RequestOptions::post(body))
            .await?;

        if response.access_token.is_empty() {
            return Err(ApiError::Decode("login response has no access_token".to_string()).into());
        }
        self.session().set_token(&response.access_token)?;
        Ok(())
    }

    async fn submit_register(&self, credentials: &Credentials) -> Result<(), AuthError> {
        tracing::info!(email = %credentials.email, "Registering account");
        let body = RequestBody::Form(vec![
            ("email", credentials.email.clone()),
            ("password", credentials.password.clone()),
            (
                "password_confirmation",
                credentials.password_confirmation.clone().unwrap_or_default(),
            ),
        ]);
        self.api.request("/register", RequestOptions::post(body)).await?;
        Ok(())
    }

    async fn finish(&self, result: Result<(), AuthError>) -> Result<(), AuthError> {
        match &result {
            Ok(()) => self.set_state(AuthState::Authenticated).await,
            Err(e) => {
                tracing::warn!(error = %e, "Authentication failed");
                self.set_state(AuthState::Failed(e.to_string())).await;
            }
        }
        result
    }

    async fn set_state(&self, next: AuthState) {
        *self.state.lock().await = next;
    }
}
