//! Authentication provider collaborator.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::domain::value_objects::UserId;

/// The signed-in identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: UserId,
    #[serde(default)]
    pub is_vendor: bool,
}

impl Session {
    pub fn customer(user_id: impl Into<UserId>) -> Self { Self { user_id: user_id.into(), is_vendor: false } }
    pub fn vendor(user_id: impl Into<UserId>) -> Self { Self { user_id: user_id.into(), is_vendor: true } }
}

/// Source of the current identity and of sign-in/sign-out notifications.
pub trait AuthProvider: Send + Sync {
    fn current_session(&self) -> Option<Session>;

    /// Receiver that observes every identity change.
    fn watch(&self) -> watch::Receiver<Option<Session>>;

    fn current_user_id(&self) -> Option<UserId> { self.current_session().map(|s| s.user_id) }
}

/// In-process provider: whoever signs in here is the current identity.
#[derive(Debug)]
pub struct AuthService {
    session: watch::Sender<Option<Session>>,
}

impl Default for AuthService {
    fn default() -> Self { Self::new() }
}

impl AuthService {
    pub fn new() -> Self {
        let (session, _) = watch::channel(None);
        Self { session }
    }

    pub fn sign_in(&self, session: Session) {
        tracing::info!(user_id = %session.user_id, is_vendor = session.is_vendor, "signed in");
        self.session.send_replace(Some(session));
    }

    pub fn sign_out(&self) {
        if let Some(previous) = self.session.send_replace(None) {
            tracing::info!(user_id = %previous.user_id, "signed out");
        }
    }
}

impl AuthProvider for AuthService {
    fn current_session(&self) -> Option<Session> { self.session.borrow().clone() }
    fn watch(&self) -> watch::Receiver<Option<Session>> { self.session.subscribe() }
}
