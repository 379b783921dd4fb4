//! Top-level view selection.
//!
//! The app is in exactly one of two modes, and each mode owns its own set of views. A
//! path that doesn't belong to the current mode resolves to that mode's default view.

use tokio::sync::watch;

use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthView {
    Login,
    Register,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MainView {
    ImageAnalysis,
    History,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Unauthenticated(AuthView),
    Authenticated(MainView),
}

impl Mode {
    pub fn resolve(session: &Session, path: &str) -> Self {
        let path = path.trim_end_matches('/');
        if session.is_authenticated() {
            match path {
                "/history" => Mode::Authenticated(MainView::History),
                _ => Mode::Authenticated(MainView::ImageAnalysis),
            }
        } else {
            match path {
                "/register" => Mode::Unauthenticated(AuthView::Register),
                _ => Mode::Unauthenticated(AuthView::Login),
            }
        }
    }

    pub fn path(&self) -> &'static str {
        match self {
            Mode::Unauthenticated(AuthView::Login) => "/login",
            Mode::Unauthenticated(AuthView::Register) => "/register",
            Mode::Authenticated(MainView::ImageAnalysis) => "/image-analysis",
            Mode::Authenticated(MainView::History) => "/history",
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Mode::Authenticated(_))
    }
}

#[derive(Debug)]
pub struct ViewRouter {
    current: Mode,
    session: watch::Receiver<Session>,
}

impl ViewRouter {
    pub fn new(mut session: watch::Receiver<Session>) -> Self {
        let current = Mode::resolve(&session.borrow_and_update(), "/");
        Self { current, session }
    }

    pub fn current(&self) -> Mode {
        self.current
    }

    /// Requests a path. Paths outside the current mode are redirected.
    pub fn navigate(&mut self, path: &str) -> Mode {
        self.current = Mode::resolve(&self.session.borrow(), path);
        self.current
    }

    /// Re-evaluates after a session change. Logging in lands on the history view and
    /// logging out on the login form.
    pub fn on_session_change(&mut self) -> Mode {
        let session = self.session.borrow_and_update().clone();
        let next = match (self.current, session.is_authenticated()) {
            (Mode::Unauthenticated(_), true) => Mode::Authenticated(MainView::History),
            (Mode::Authenticated(_), false) => Mode::Unauthenticated(AuthView::Login),
            (current, _) => current,
        };
        if next != self.current {
            tracing::debug!(from = self.current.path(), to = next.path(), "View changed");
        }
        self.current = next;
        next
    }

    pub async fn changed(&mut self) -> Mode {
        if self.session.changed().await.is_ok() {
            self.on_session_change()
        } else {
            self.current
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionStore;

    #[test]
    fn unauthenticated_routes() {
        let anon = Session::anonymous();
        let cases = [
            ("/", Mode::Unauthenticated(AuthView::Login)),
            ("/login", Mode::Unauthenticated(AuthView::Login)),
            ("/register", Mode::Unauthenticated(AuthView::Register)),
            ("/history", Mode::Unauthenticated(AuthView::Login)),
            ("/image-analysis", Mode::Unauthenticated(AuthView::Login)),
            ("/nope", Mode::Unauthenticated(AuthView::Login)),
        ];
        for (path, expected) in cases {
            assert_eq!(Mode::resolve(&anon, path), expected, "path {path}");
        }
    }

    #[test]
    fn authenticated_routes() {
        let session = Session::from_token("tok");
        let cases = [
            ("/", Mode::Authenticated(MainView::ImageAnalysis)),
            ("/login", Mode::Authenticated(MainView::ImageAnalysis)),
            ("/register", Mode::Authenticated(MainView::ImageAnalysis)),
            ("/history", Mode::Authenticated(MainView::History)),
            ("/history/", Mode::Authenticated(MainView::History)),
            ("/image-analysis", Mode::Authenticated(MainView::ImageAnalysis)),
        ];
        for (path, expected) in cases {
            assert_eq!(Mode::resolve(&session, path), expected, "path {path}");
        }
    }

    #[test]
    fn session_changes_move_between_modes() {
        let store = SessionStore::in_memory();
        let mut router = ViewRouter::new(store.subscribe());
        assert_eq!(router.current(), Mode::Unauthenticated(AuthView::Login));

        assert_eq!(router.navigate("/register"), Mode::Unauthenticated(AuthView::Register));

        store.set_token("tok").unwrap();
        assert_eq!(router.on_session_change(), Mode::Authenticated(MainView::History));

        assert_eq!(router.navigate("/image-analysis"), Mode::Authenticated(MainView::ImageAnalysis));

        store.clear_token().unwrap();
        assert_eq!(router.on_session_change(), Mode::Unauthenticated(AuthView::Login));
    }

    #[tokio::test]
    async fn changed_waits_for_session_update() {
        let store = SessionStore::in_memory();
        let mut router = ViewRouter::new(store.subscribe());

        let writer = store.clone();
        tokio::spawn(async move {
            writer.set_token("tok").unwrap();
        });

        assert_eq!(router.changed().await, Mode::Authenticated(MainView::History));
    }
}
