//! yrs-backed implementation of the `DocumentEngine` capability.
//!
//! The server core never touches yrs types directly; everything flows
//! through the trait so tests and embedders can substitute their own
//! engine. One `apply_update` call is one committed transaction, which
//! makes the update observer fire exactly once per call.

use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, ReadTxn, StateVector, Transact, Update};

use crate::prelude::*;
use yrelay_types::engine::{DocumentEngine, EngineSubscription, UpdateCallback};

pub struct YrsEngine {
	doc: Doc,
}

impl YrsEngine {
	pub fn new() -> Self {
		Self { doc: Doc::new() }
	}
}

impl Default for YrsEngine {
	fn default() -> Self {
		Self::new()
	}
}

impl DocumentEngine for YrsEngine {
	fn apply_update(&self, update: &[u8]) -> YrResult<()> {
		let decoded = Update::decode_v1(update)
			.map_err(|err| Error::Engine(format!("update decode failed: {}", err).into()))?;
		let mut txn = self.doc.transact_mut();
		txn.apply_update(decoded)
			.map_err(|err| Error::Engine(format!("update apply failed: {}", err).into()))
	}

	fn encode_state_as_update(&self) -> YrResult<Vec<u8>> {
		let txn = self.doc.transact();
		Ok(txn.encode_state_as_update_v1(&StateVector::default()))
	}

	fn encode_state_vector(&self) -> YrResult<Vec<u8>> {
		let txn = self.doc.transact();
		Ok(txn.state_vector().encode_v1())
	}

	fn encode_diff(&self, state_vector: &[u8]) -> YrResult<Vec<u8>> {
		let sv = StateVector::decode_v1(state_vector)
			.map_err(|err| Error::Engine(format!("state vector decode failed: {}", err).into()))?;
		let txn = self.doc.transact();
		Ok(txn.encode_state_as_update_v1(&sv))
	}

	fn observe_update(&self, callback: UpdateCallback) -> YrResult<EngineSubscription> {
		let subscription = self
			.doc
			.observe_update_v1(move |_txn, event| callback(&event.update))
			.map_err(|err| Error::Engine(format!("observer registration failed: {}", err).into()))?;
		Ok(EngineSubscription::new(subscription))
	}

	fn close(&self) {
		// The yrs document owns no external resources; dropping the
		// engine releases everything.
	}
}


// vim: ts=4
