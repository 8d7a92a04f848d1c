//! Transport capability.
//!
//! The core is transport-agnostic: anything that can ship binary frames
//! in both directions can carry the protocol. The concrete WebSocket
//! implementation lives in the server crate; tests use an in-memory
//! transport. Inbound frames are pushed by the transport glue into
//! `ClientConnection::handle_message`, so the capability only covers
//! the outbound half plus identity and lifecycle.

use async_trait::async_trait;

use crate::prelude::*;

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// Going away (server shutdown).
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Unsupported or malformed frame.
pub const CLOSE_UNSUPPORTED: u16 = 1003;
/// Internal server error.
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;
/// Authentication failed / access denied.
pub const CLOSE_AUTH_FAILED: u16 = 4403;

/// One bidirectional framed connection to a client.
#[async_trait]
pub trait Transport: Send + Sync {
	/// Ship one binary frame. May block on socket buffers; a failure
	/// means the connection is no longer usable.
	async fn send(&self, data: Vec<u8>) -> YrResult<()>;

	/// Close with a code and reason. Must be idempotent.
	async fn close(&self, code: u16, reason: &str);

	fn is_open(&self) -> bool;

	/// Transport-assigned identifier, unique per live connection.
	fn connection_id(&self) -> &str;

	fn remote_address(&self) -> &str;
}

// vim: ts=4
