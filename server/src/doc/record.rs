//! The in-memory holder of one open document.
//!
//! A record owns the engine handle, the awareness table and the set of
//! attached connections. Its lifecycle state only moves forward:
//! `Loading → Active → Unloading → Closed`. The registry is the only
//! component creating and destroying records; connections hold the
//! record through an `Arc` and never outlive its engine (the engine is
//! closed only after every connection left and the final save ran).

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::awareness::Awareness;
use crate::conn::document::DocumentConnection;
use crate::prelude::*;
use yrelay_types::context::Context;
use yrelay_types::engine::{DocumentEngine, EngineSubscription};
use yrelay_types::transport;

/// Lifecycle state of a document record. Transitions are monotone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DocState {
	Loading,
	Active,
	Unloading,
	Closed,
}

pub struct DocumentRecord {
	name: Box<str>,
	engine: Arc<dyn DocumentEngine>,
	awareness: Awareness,
	/// Frozen context snapshot of the load that created this record.
	context: Arc<Context>,
	connections: Mutex<HashMap<Box<str>, Arc<DocumentConnection>>>,
	state: Mutex<DocState>,
	subscription: Mutex<Option<EngineSubscription>>,
	error_handler: Arc<dyn ErrorHandler>,
}

impl DocumentRecord {
	pub fn new(
		name: impl Into<Box<str>>,
		engine: Arc<dyn DocumentEngine>,
		context: Arc<Context>,
		error_handler: Arc<dyn ErrorHandler>,
	) -> Self {
		Self {
			name: name.into(),
			engine,
			awareness: Awareness::new(),
			context,
			connections: Mutex::new(HashMap::new()),
			state: Mutex::new(DocState::Loading),
			subscription: Mutex::new(None),
			error_handler,
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn engine(&self) -> &Arc<dyn DocumentEngine> {
		&self.engine
	}

	pub fn awareness(&self) -> &Awareness {
		&self.awareness
	}

	pub fn context(&self) -> &Arc<Context> {
		&self.context
	}

	pub fn state(&self) -> DocState {
		*self.state.lock()
	}

	/// Move the lifecycle forward. Returns false when `to` would be a
	/// backward transition (the record is left untouched).
	pub fn advance(&self, to: DocState) -> bool {
		let mut state = self.state.lock();
		if to > *state {
			*state = to;
			true
		} else {
			false
		}
	}

	pub(crate) fn set_subscription(&self, subscription: EngineSubscription) {
		*self.subscription.lock() = Some(subscription);
	}

	/// Attach a connection. Only an ACTIVE record accepts connections;
	/// a record caught mid-unload refuses and the caller asks the
	/// registry for a fresh record.
	pub(crate) fn add_connection(&self, conn: Arc<DocumentConnection>) -> YrResult<()> {
		let state = self.state.lock();
		if *state != DocState::Active {
			return Err(Error::DocumentClosed);
		}
		self.connections.lock().insert(conn.connection_id().into(), conn);
		Ok(())
	}

	/// Detach a connection, returning how many remain.
	pub(crate) fn remove_connection(&self, connection_id: &str) -> usize {
		let mut connections = self.connections.lock();
		connections.remove(connection_id);
		connections.len()
	}

	pub fn connection_count(&self) -> usize {
		self.connections.lock().len()
	}

	pub(crate) fn connections_snapshot(&self) -> Vec<Arc<DocumentConnection>> {
		self.connections.lock().values().cloned().collect()
	}

	/// Fan one frame out to every attached connection, preserving the
	/// caller's ordering. A send failure closes the offending
	/// connection (internal error) without disturbing the others.
	pub async fn broadcast(&self, frame: Vec<u8>, exclude: Option<&str>) {
		for conn in self.connections_snapshot() {
			if Some(conn.connection_id()) == exclude || conn.is_closed() {
				continue;
			}
			if let Err(err) = conn.transport().send(frame.clone()).await {
				self.error_handler.on_protocol_error(conn.connection_id(), &err);
				let conn = conn.clone();
				let fut: std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> =
					Box::pin(async move {
						conn.close_with(transport::CLOSE_INTERNAL_ERROR, "send failed").await;
					});
				tokio::spawn(fut);
			}
		}
	}

	/// Release the engine: the observer subscription is dropped first
	/// so it can never fire against a closing document.
	pub(crate) fn close_engine(&self) {
		let subscription = self.subscription.lock().take();
		drop(subscription);
		self.engine.close();
	}
}

impl std::fmt::Debug for DocumentRecord {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		f.debug_struct("DocumentRecord")
			.field("name", &self.name)
			.field("state", &self.state())
			.field("connections", &self.connection_count())
			.finish_non_exhaustive()
	}
}


// vim: ts=4
