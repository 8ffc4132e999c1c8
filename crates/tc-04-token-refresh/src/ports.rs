//! Ports of the refresh coordinator.

use async_trait::async_trait;
use shared_types::{RequestContext, Timestamp, TokenGrant};

/// Local credential state of one tab. The credentials themselves are opaque
/// to coordination; only the expiry and anti-forgery token are visible.
pub trait CredentialStore: Send + Sync {
    /// Expiry of the current access credential.
    fn expires_at(&self) -> Option<Timestamp>;

    /// Current anti-forgery token.
    fn csrf_token(&self) -> Option<String>;

    /// Apply a grant obtained by this tab.
    fn store_grant(&self, grant: &TokenGrant);

    /// Apply an expiry learned from another tab.
    fn update_expiry(&self, expires_at: Timestamp);

    /// Drop all local credential state.
    fn clear(&self);
}

/// What leader-gated callers need from the refresh coordinator.
#[async_trait]
pub trait RefreshTrigger: Send + Sync {
    /// Single-flight refresh; `true` on success.
    async fn refresh(&self) -> bool;

    /// Identity headers for a remote call made by this tab.
    fn request_context(&self) -> RequestContext;
}
