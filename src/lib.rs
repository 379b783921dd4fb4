//! Client for an image object-detection and description service, plus a small caption
//! proxy that forwards uploads to a chat-completions API.
//!
//! The client side is a set of flows sharing one [`session::SessionStore`]:
//!
//! ```ignore
//! let session = SessionStore::load(Arc::new(FileStore::new(&config.session_path)))?;
//! let api = ApiClient::from_config(&config, session.clone())?;
//! let auth = AuthFlow::new(api.clone());
//! auth.login("a@b.com", "secret").await?;
//! let analyse = AnalyzeFlow::new(api, AnalyzeMode::Combined);
//! ```

pub mod analysis;
pub mod auth;
pub mod config;
pub mod error;
mod guard;
pub mod history;
pub mod http;
pub mod logging;
pub mod overlay;
pub mod proxy;
pub mod router;
pub mod session;

pub use analysis::{AnalysisResult, AnalyzeFlow, AnalyzeMode, AnalyzeStatus, Detection, ImageFile};
pub use auth::{AuthFlow, AuthState, Credentials, FieldErrors, FormKind};
pub use error::{AnalyzeError, ApiError, AuthError, ConfigError, StorageError};
pub use history::{HistoryEntry, HistoryFlow, HistoryState};
pub use http::ApiClient;
pub use router::{AuthView, MainView, Mode, ViewRouter};
pub use session::{FileStore, KeyValueStore, MemoryStore, Session, SessionStore};
