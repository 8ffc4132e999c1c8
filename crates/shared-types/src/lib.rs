//! # Shared Types Crate
//!
//! Types shared by every coordination subsystem of a tab.
//!
//! ## Design Principles
//!
//! - **Transport-agnostic envelope**: `CoordinationMessage` is the same
//!   whether it arrives over the broker, the channel, or store polling.
//! - **Envelope identity**: `source_tab_id` is the sole authority for who
//!   sent a message; payloads never repeat it.
//! - **Injected time**: every staleness decision goes through a `Clock`
//!   so tests can drive time explicitly.

pub mod clock;
pub mod entities;
pub mod envelope;
pub mod errors;
pub mod security;
pub mod session_api;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entities::*;
pub use envelope::{CoordinationMessage, MessageType};
pub use errors::*;
pub use security::MessageSigner;
pub use session_api::{RequestContext, ServerEvent, SessionApi, SessionStatus, TokenGrant};
