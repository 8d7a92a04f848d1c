//! Per-document awareness (presence) table.
//!
//! Every entry is a last-writer-wins pair `(clock, state)` keyed by the
//! peer-chosen awareness client id. Clocks are Lamport-style: an update
//! is accepted iff its clock is strictly greater than the stored one,
//! or equal while the state differs (a peer re-announcing itself after
//! its entry was removed elsewhere). An empty state string signals
//! removal. Awareness is never persisted; the table dies with the
//! document.
//!
//! Frame layout (inbound and outbound):
//! `varint(count) || repeat { varint(client_id) || varint(clock) || varstring(state) }`

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Instant;

use crate::prelude::*;
use yrelay_types::codec::{Decoder, Encoder};

#[derive(Debug, Clone)]
pub struct AwarenessEntry {
	pub clock: u64,
	pub state: Box<str>,
	pub last_seen: Instant,
}

/// One accepted element of an inbound awareness frame. An empty state
/// is a removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwarenessPeer {
	pub client_id: u64,
	pub clock: u64,
	pub state: Box<str>,
}

impl AwarenessPeer {
	pub fn is_removal(&self) -> bool {
		self.state.is_empty()
	}
}

/// Result of applying one inbound frame: the entries that survived the
/// clock comparison, in frame order. Stale entries are dropped.
#[derive(Debug, Default)]
pub struct AwarenessChange {
	pub accepted: Vec<AwarenessPeer>,
}

impl AwarenessChange {
	pub fn is_empty(&self) -> bool {
		self.accepted.is_empty()
	}

	/// Re-encode the accepted entries as an awareness frame payload for
	/// fan-out to peers.
	pub fn encode(&self) -> Vec<u8> {
		encode_entries(self.accepted.iter().map(|p| (p.client_id, p.clock, p.state.as_ref())))
	}
}

fn encode_entries<'a>(entries: impl ExactSizeIterator<Item = (u64, u64, &'a str)>) -> Vec<u8> {
	let mut enc = Encoder::new();
	enc.write_var_uint(entries.len() as u64);
	for (client_id, clock, state) in entries {
		enc.write_var_uint(client_id);
		enc.write_var_uint(clock);
		enc.write_var_string(state);
	}
	enc.into_inner()
}

/// Awareness table of one document.
#[derive(Debug, Default)]
pub struct Awareness {
	states: Mutex<HashMap<u64, AwarenessEntry>>,
}

impl Awareness {
	pub fn new() -> Self {
		Self::default()
	}

	/// Apply an inbound frame, returning the accepted entries.
	pub fn apply_update(&self, payload: &[u8]) -> YrResult<AwarenessChange> {
		let mut dec = Decoder::new(payload);
		let count = dec.read_var_uint()?;
		let mut change = AwarenessChange::default();
		let mut states = self.states.lock();
		for _ in 0..count {
			let client_id = dec.read_var_uint()?;
			let clock = dec.read_var_uint()?;
			let state = dec.read_var_string()?;

			match states.get(&client_id) {
				None => {
					// Removal of an unknown client carries no information.
					if state.is_empty() {
						continue;
					}
				}
				Some(existing) => {
					let accepted = clock > existing.clock
						|| (clock == existing.clock && existing.state.as_ref() != state);
					if !accepted {
						continue;
					}
				}
			}

			if state.is_empty() {
				states.remove(&client_id);
			} else {
				states.insert(
					client_id,
					AwarenessEntry { clock, state: state.into(), last_seen: Instant::now() },
				);
			}
			change.accepted.push(AwarenessPeer { client_id, clock, state: state.into() });
		}
		Ok(change)
	}

	/// Encode the full table with current clocks. A zero-count frame
	/// when the table is empty.
	pub fn snapshot_payload(&self) -> Vec<u8> {
		let states = self.states.lock();
		let entries: Vec<(u64, u64, Box<str>)> =
			states.iter().map(|(id, e)| (*id, e.clock, e.state.clone())).collect();
		drop(states);
		encode_entries(entries.iter().map(|(id, clock, state)| (*id, *clock, state.as_ref())))
	}

	/// Evict the listed clients, bumping each known client's clock by
	/// one with an empty state. The removal is applied locally before
	/// the frame is returned so the caller can broadcast it. Returns
	/// `None` when none of the ids were present.
	pub fn remove_states(&self, client_ids: &[u64]) -> Option<Vec<u8>> {
		let mut states = self.states.lock();
		let mut removed: Vec<(u64, u64)> = Vec::new();
		for id in client_ids {
			if let Some(entry) = states.remove(id) {
				removed.push((*id, entry.clock + 1));
			}
		}
		drop(states);
		if removed.is_empty() {
			return None;
		}
		Some(encode_entries(removed.iter().map(|(id, clock)| (*id, *clock, ""))))
	}

	pub fn len(&self) -> usize {
		self.states.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.states.lock().is_empty()
	}

	pub fn entry(&self, client_id: u64) -> Option<AwarenessEntry> {
		self.states.lock().get(&client_id).cloned()
	}
}


// vim: ts=4
