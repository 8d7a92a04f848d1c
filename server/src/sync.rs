//! Stateless sync-protocol functions.
//!
//! The Yjs handshake is client-initiated: step 1 carries the client's
//! state vector, the server answers with the diff (step 2) and its own
//! state vector (a reciprocal step 1); step 2 and incremental updates
//! are applied to the engine inside one transaction each. The server
//! never emits an unsolicited step 1.

use crate::prelude::*;
use yrelay_types::engine::DocumentEngine;
use yrelay_types::protocol::SyncMessage;

/// What processing one sync message produced.
#[derive(Debug)]
pub enum SyncOutcome {
	/// Step 1 was answered: send the diff as step 2, then the server
	/// state vector as step 1.
	Handshake { diff: Vec<u8>, state_vector: Vec<u8> },
	/// A step 2 / update payload was applied to the engine.
	Applied,
}

/// Apply one decoded sync message to an engine handle.
///
/// Read-only gating happens in the caller; this function always
/// executes the message it is given.
pub fn apply_sync_message(
	engine: &dyn DocumentEngine,
	message: &SyncMessage,
) -> YrResult<SyncOutcome> {
	match message {
		SyncMessage::Step1(state_vector) => {
			let diff = engine.encode_diff(state_vector)?;
			let state_vector = engine.encode_state_vector()?;
			Ok(SyncOutcome::Handshake { diff, state_vector })
		}
		SyncMessage::Step2(update) | SyncMessage::Update(update) => {
			engine.apply_update(update)?;
			Ok(SyncOutcome::Applied)
		}
	}
}


// vim: ts=4
