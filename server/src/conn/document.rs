//! Per-(client, document) connection: dispatches frames by message
//! type, enforces the read-only gate and answers sync probes.
//!
//! Handler failures are reported through the error handler and never
//! tear down the underlying transport; a malformed envelope is the
//! client connection's problem, not this one's.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::doc::record::DocumentRecord;
use crate::doc::registry::DocumentRegistry;
use crate::prelude::*;
use crate::sync::{SyncOutcome, apply_sync_message};
use yrelay_types::codec::Decoder;
use yrelay_types::context::Context;
use yrelay_types::extension::OnDisconnectPayload;
use yrelay_types::protocol::{self, IncomingMessage, MessageType, SyncMessage};
use yrelay_types::transport::{self, Transport};

pub struct DocumentConnection {
	transport: Arc<dyn Transport>,
	record: Arc<DocumentRecord>,
	registry: Arc<DocumentRegistry>,
	app: App,
	context: Arc<Context>,
	read_only: bool,
	closed: AtomicBool,
	/// Awareness client ids introduced over this connection; evicted
	/// (with a broadcast) when the connection goes away.
	awareness_clients: Mutex<HashSet<u64>>,
}

impl DocumentConnection {
	/// Create the connection and register it with the record. Only an
	/// ACTIVE record accepts the attach; the caller retries against
	/// the registry otherwise.
	pub(crate) fn attach(
		transport: Arc<dyn Transport>,
		record: Arc<DocumentRecord>,
		registry: Arc<DocumentRegistry>,
		app: App,
		context: Arc<Context>,
		read_only: bool,
	) -> YrResult<Arc<Self>> {
		let conn = Arc::new(Self {
			transport,
			record: record.clone(),
			registry,
			app,
			context,
			read_only,
			closed: AtomicBool::new(false),
			awareness_clients: Mutex::new(HashSet::new()),
		});
		record.add_connection(conn.clone())?;
		Ok(conn)
	}

	pub fn connection_id(&self) -> &str {
		self.transport.connection_id()
	}

	pub fn document_name(&self) -> &str {
		self.record.name()
	}

	pub fn is_read_only(&self) -> bool {
		self.read_only
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
		&self.transport
	}

	/// Dispatch one decoded frame. Never fails upward; handler errors
	/// go to the error handler.
	pub async fn handle_message(&self, msg: &IncomingMessage) {
		if self.is_closed() {
			return;
		}
		let result = match msg.kind {
			Some(MessageType::Sync) => self.handle_sync(&msg.payload).await,
			Some(MessageType::Awareness) => self.handle_awareness(&msg.payload).await,
			Some(MessageType::QueryAwareness) => self.handle_query_awareness().await,
			Some(MessageType::Stateless) => self.handle_stateless(&msg.payload).await,
			Some(MessageType::BroadcastStateless) => {
				self.handle_broadcast_stateless(&msg.payload).await
			}
			// AUTH is opaque to dispatch, SYNC_STATUS is server-sent,
			// unknown codes are ignored without disconnecting.
			Some(MessageType::Auth | MessageType::SyncStatus) | None => Ok(()),
		};
		if let Err(err) = result {
			self.app.error_handler.on_protocol_error(self.connection_id(), &err);
		}
	}

	async fn handle_sync(&self, payload: &[u8]) -> YrResult<()> {
		let message = SyncMessage::decode(payload)?;

		// A read-only peer may still probe state; only payloads that
		// carry changes are rejected.
		if self.read_only && message.carries_changes() {
			self.send(protocol::encode_sync_status(self.document_name(), false)).await?;
			return Ok(());
		}

		match apply_sync_message(self.record.engine().as_ref(), &message)? {
			SyncOutcome::Handshake { diff, state_vector } => {
				self.send(protocol::encode_sync_step2(self.document_name(), &diff)).await?;
				self.send(protocol::encode_sync_step1(self.document_name(), &state_vector))
					.await?;
				let snapshot = self.record.awareness().snapshot_payload();
				self.send(protocol::encode_awareness(self.document_name(), &snapshot)).await?;
			}
			SyncOutcome::Applied => {
				// The engine observer drives broadcast + persistence.
			}
		}
		self.send(protocol::encode_sync_status(self.document_name(), true)).await
	}

	async fn handle_awareness(&self, payload: &[u8]) -> YrResult<()> {
		let change = self.record.awareness().apply_update(payload)?;
		if change.is_empty() {
			return Ok(());
		}
		{
			let mut own = self.awareness_clients.lock();
			for peer in &change.accepted {
				if peer.is_removal() {
					own.remove(&peer.client_id);
				} else {
					own.insert(peer.client_id);
				}
			}
		}
		let frame = protocol::encode_awareness(self.document_name(), &change.encode());
		self.record.broadcast(frame, None).await;
		Ok(())
	}

	async fn handle_query_awareness(&self) -> YrResult<()> {
		let snapshot = self.record.awareness().snapshot_payload();
		self.send(protocol::encode_awareness(self.document_name(), &snapshot)).await
	}

	async fn handle_stateless(&self, payload: &[u8]) -> YrResult<()> {
		let mut dec = Decoder::new(payload);
		let custom = dec.read_var_string()?;
		// Echoed only to the sender.
		self.send(protocol::encode_stateless(self.document_name(), custom)).await
	}

	async fn handle_broadcast_stateless(&self, payload: &[u8]) -> YrResult<()> {
		let mut dec = Decoder::new(payload);
		let custom = dec.read_var_string()?;
		let frame = protocol::encode_broadcast_stateless(self.document_name(), custom);
		self.record.broadcast(frame, Some(self.connection_id())).await;
		Ok(())
	}

	async fn send(&self, frame: Vec<u8>) -> YrResult<()> {
		if let Err(err) = self.transport.send(frame).await {
			// A dead transport closes the whole connection.
			let conn: Arc<dyn Transport> = self.transport.clone();
			tokio::spawn(async move {
				conn.close(transport::CLOSE_INTERNAL_ERROR, "send failed").await;
			});
			return Err(err);
		}
		Ok(())
	}

	/// Detach from the record: evict this connection's awareness
	/// entries (broadcasting the removal), release the record (the
	/// last connection out triggers the unload) and fire
	/// `on_disconnect`. Leaves the transport open — it may carry other
	/// documents.
	pub(crate) fn close(&self) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> {
		Box::pin(async move {
			if self.closed.swap(true, Ordering::SeqCst) {
				return;
			}
			let removed: Vec<u64> = {
				let mut own = self.awareness_clients.lock();
				own.drain().collect()
			};
			if !removed.is_empty() {
				if let Some(payload) = self.record.awareness().remove_states(&removed) {
					let frame = protocol::encode_awareness(self.document_name(), &payload);
					self.record.broadcast(frame, Some(self.connection_id())).await;
				}
			}

			self.registry.release(&self.record, self.connection_id());

			let payload = OnDisconnectPayload {
				connection_id: self.connection_id().into(),
				document_name: self.document_name().into(),
				context: self.context.clone(),
			};
			if let Err(err) = self.app.hooks.on_disconnect(&payload).await {
				err.report(self.app.error_handler.as_ref());
			}
		})
	}

	/// Close the transport too; used on send failures and shutdown.
	pub(crate) async fn close_with(&self, code: u16, reason: &str) {
		self.transport.close(code, reason).await;
		self.close().await;
	}
}

impl std::fmt::Debug for DocumentConnection {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		f.debug_struct("DocumentConnection")
			.field("connection_id", &self.connection_id())
			.field("document", &self.document_name())
			.field("read_only", &self.read_only)
			.finish_non_exhaustive()
	}
}

// vim: ts=4
