//! In-memory credential store.

use crate::ports::CredentialStore;
use parking_lot::RwLock;
use shared_types::{Timestamp, TokenGrant};

#[derive(Debug, Default, Clone)]
struct Credentials {
    expires_at: Option<Timestamp>,
    csrf_token: Option<String>,
}

/// Credential state held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    state: RwLock<Credentials>,
}

impl InMemoryCredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with an expiry.
    #[must_use]
    pub fn with_expiry(expires_at: Timestamp) -> Self {
        Self {
            state: RwLock::new(Credentials {
                expires_at: Some(expires_at),
                csrf_token: None,
            }),
        }
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn expires_at(&self) -> Option<Timestamp> {
        self.state.read().expires_at
    }

    fn csrf_token(&self) -> Option<String> {
        self.state.read().csrf_token.clone()
    }

    fn store_grant(&self, grant: &TokenGrant) {
        let mut state = self.state.write();
        state.expires_at = Some(grant.expires_at);
        if grant.csrf_token.is_some() {
            state.csrf_token = grant.csrf_token.clone();
        }
    }

    fn update_expiry(&self, expires_at: Timestamp) {
        self.state.write().expires_at = Some(expires_at);
    }

    fn clear(&self) {
        *self.state.write() = Credentials::default();
    }
}
