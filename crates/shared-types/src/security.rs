//! # Message Signing
//!
//! HMAC-SHA256 signatures for coordination messages.
//!
//! ## Security Properties
//!
//! - The signature covers the canonical JSON of the message without its
//!   `signature` field (see `CoordinationMessage::canonical_bytes`).
//! - Verification uses the constant-time comparison provided by `hmac`.
//! - Tabs without a configured secret neither sign nor verify.

use crate::envelope::CoordinationMessage;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signs and verifies coordination messages with a shared secret.
#[derive(Clone)]
pub struct MessageSigner {
    secret: Vec<u8>,
}

impl std::fmt::Debug for MessageSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageSigner").finish_non_exhaustive()
    }
}

impl MessageSigner {
    /// Create a signer over `secret`.
    #[must_use]
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    fn mac(&self) -> Option<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret).ok()
    }

    /// Compute the hex signature for `message`.
    #[must_use]
    pub fn signature_for(&self, message: &CoordinationMessage) -> String {
        let Some(mut mac) = self.mac() else {
            return String::new();
        };
        mac.update(&message.canonical_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Attach a signature to `message` in place.
    pub fn sign(&self, message: &mut CoordinationMessage) {
        message.signature = Some(self.signature_for(message));
    }

    /// Verify the attached signature.
    ///
    /// Returns `false` if the signature is missing, not hex, or wrong.
    #[must_use]
    pub fn verify(&self, message: &CoordinationMessage) -> bool {
        let Some(signature) = message.signature.as_deref() else {
            return false;
        };
        let Ok(bytes) = hex::decode(signature) else {
            return false;
        };
        let Some(mut mac) = self.mac() else {
            return false;
        };
        mac.update(&message.canonical_bytes());
        mac.verify_slice(&bytes).is_ok()
    }
}
