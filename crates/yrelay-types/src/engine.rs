//! CRDT engine capability.
//!
//! The server treats document updates as opaque bytes and talks to the
//! CRDT implementation exclusively through this trait. Transactionality
//! lives inside the engine: one `apply_update` call is one committed
//! transaction, and the update observer fires exactly once per commit,
//! on the committing thread. Observer callbacks must therefore be cheap
//! and re-enter the server only through async handoffs.

use crate::prelude::*;

/// Callback invoked with the encoded incremental update of one
/// committed transaction.
pub type UpdateCallback = Box<dyn Fn(&[u8]) + Send + Sync + 'static>;

/// Opaque observer registration guard. Dropping it unsubscribes; the
/// document record drops it before closing the engine so the observer
/// can never fire against a closed document.
pub struct EngineSubscription {
	_guard: Box<dyn std::any::Any + Send>,
}

impl EngineSubscription {
	pub fn new(guard: impl std::any::Any + Send) -> Self {
		Self { _guard: Box::new(guard) }
	}
}

impl std::fmt::Debug for EngineSubscription {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		f.write_str("EngineSubscription")
	}
}

/// Handle into the CRDT engine owning one document.
pub trait DocumentEngine: Send + Sync {
	/// Apply an encoded update inside a single transaction.
	fn apply_update(&self, update: &[u8]) -> YrResult<()>;

	/// Encode the full document state as one update.
	fn encode_state_as_update(&self) -> YrResult<Vec<u8>>;

	/// Encode the compact per-client version summary.
	fn encode_state_vector(&self) -> YrResult<Vec<u8>>;

	/// Encode the minimal diff against a remote state vector.
	fn encode_diff(&self, state_vector: &[u8]) -> YrResult<Vec<u8>>;

	/// Register an observer fired once per committed transaction.
	fn observe_update(&self, callback: UpdateCallback) -> YrResult<EngineSubscription>;

	/// Release engine resources. Callers drop their
	/// `EngineSubscription` first.
	fn close(&self);
}

// vim: ts=4
