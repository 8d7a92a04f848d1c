//! Per-transport client connection: envelope decoding, per-document
//! authentication with frame queueing, and multiplexing onto document
//! connections.
//!
//! One transport carries arbitrarily many documents. The first frame
//! naming a document starts the authentication flow for it on a task
//! of its own; frames arriving for that document while authentication
//! runs are queued (FIFO, keyed by name) and drained after the flow
//! completes, so per-document ordering is exactly the transport
//! arrival order. Frames for other document names dispatch
//! independently and are never held up by another document's flow.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::conn::document::DocumentConnection;
use crate::doc::registry::DocumentRegistry;
use crate::prelude::*;
use yrelay_types::codec::Decoder;
use yrelay_types::context::{Context, ContextCell};
use yrelay_types::extension::OnAuthenticatePayload;
use yrelay_types::protocol::{IncomingMessage, MessageType};
use yrelay_types::transport::{self, Transport};

/// How often an attach races a concurrent unload before we give up.
const ATTACH_RETRIES: usize = 3;

pub struct ClientConnection {
	transport: Arc<dyn Transport>,
	app: App,
	registry: Arc<DocumentRegistry>,
	context: Arc<ContextCell>,
	documents: tokio::sync::RwLock<HashMap<Box<str>, Arc<DocumentConnection>>>,
	queues: Mutex<HashMap<Box<str>, VecDeque<Vec<u8>>>>,
	authenticating: Mutex<HashSet<Box<str>>>,
	closed: AtomicBool,
}

impl ClientConnection {
	pub(crate) fn new(
		transport: Arc<dyn Transport>,
		app: App,
		registry: Arc<DocumentRegistry>,
		initial_context: Context,
	) -> Arc<Self> {
		Arc::new(Self {
			transport,
			app,
			registry,
			context: Arc::new(ContextCell::new(initial_context)),
			documents: tokio::sync::RwLock::new(HashMap::new()),
			queues: Mutex::new(HashMap::new()),
			authenticating: Mutex::new(HashSet::new()),
			closed: AtomicBool::new(false),
		})
	}

	pub fn connection_id(&self) -> &str {
		self.transport.connection_id()
	}

	pub fn context(&self) -> &Arc<ContextCell> {
		&self.context
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	pub async fn document_connection(&self, name: &str) -> Option<Arc<DocumentConnection>> {
		self.documents.read().await.get(name).cloned()
	}

	/// Process one inbound frame in transport arrival order.
	pub async fn handle_message(self: &Arc<Self>, data: &[u8]) {
		if self.is_closed() || self.app.is_closed() {
			return;
		}
		let msg = match IncomingMessage::decode(data) {
			Ok(msg) => msg,
			Err(err) => {
				self.app.error_handler.on_protocol_error(self.connection_id(), &err);
				self.close(transport::CLOSE_UNSUPPORTED, "malformed message").await;
				return;
			}
		};

		let existing = { self.documents.read().await.get(&msg.document_name).cloned() };
		if let Some(doc_conn) = existing {
			doc_conn.handle_message(&msg).await;
			return;
		}

		// First frame for this document, or authentication in flight:
		// queue the raw frame, start the flow if nobody did yet. The
		// flow runs on its own task so a slow authentication or
		// document load cannot stall frames for other documents
		// arriving on the same transport.
		let name = msg.document_name.clone();
		{
			let mut queues = self.queues.lock();
			queues.entry(name.clone()).or_default().push_back(msg.raw.clone());
		}
		let starts_flow = { self.authenticating.lock().insert(name.clone()) };
		if starts_flow {
			let this = self.clone();
			let token = token_from(&msg);
			tokio::spawn(async move {
				this.authenticate_document(&name, token).await;
			});
		}
	}

	/// Authentication flow for one document name. On success the
	/// document connection is registered and the queued frames are
	/// drained in FIFO order; on failure the transport closes with
	/// 4403 and the queue is dropped.
	async fn authenticate_document(self: &Arc<Self>, name: &str, token: Option<Box<str>>) {
		if self.is_closed() || self.app.is_closed() {
			return;
		}
		let payload = OnAuthenticatePayload::new(
			self.connection_id(),
			name,
			token,
			self.context.clone(),
		);
		if let Err(err) = self.app.hooks.on_authenticate(&payload).await {
			err.report(self.app.error_handler.as_ref());
			self.close(transport::CLOSE_AUTH_FAILED, "authentication failed").await;
			return;
		}
		let read_only = payload.is_read_only();

		// The single irrevocable transition: from here on every reader
		// observes this exact snapshot.
		let frozen = match self.context.freeze() {
			Ok(frozen) => frozen,
			Err(err) => {
				self.app.error_handler.on_protocol_error(self.connection_id(), &err);
				self.close(transport::CLOSE_INTERNAL_ERROR, "internal error").await;
				return;
			}
		};

		let mut attempts = 0;
		let doc_conn = loop {
			let record = match self.registry.get_or_create(name, frozen.clone()).await {
				Ok(record) => record,
				Err(err) => {
					self.app.error_handler.on_protocol_error(self.connection_id(), &err);
					self.close(transport::CLOSE_AUTH_FAILED, "document load failed").await;
					return;
				}
			};
			match DocumentConnection::attach(
				self.transport.clone(),
				record,
				self.registry.clone(),
				self.app.clone(),
				frozen.clone(),
				read_only,
			) {
				Ok(doc_conn) => break doc_conn,
				// The record slipped into UNLOADING between load and
				// attach; ask the registry again for a fresh one.
				Err(_) if attempts < ATTACH_RETRIES => {
					attempts += 1;
					tokio::time::sleep(Duration::from_millis(20)).await;
				}
				Err(err) => {
					self.app.error_handler.on_protocol_error(self.connection_id(), &err);
					self.close(transport::CLOSE_INTERNAL_ERROR, "document unavailable").await;
					return;
				}
			}
		};

		// Drain everything queued before and during authentication,
		// then publish the connection for direct dispatch. A second
		// drain catches frames that raced in around the publish.
		self.drain_queue(name, &doc_conn).await;
		self.documents.write().await.insert(name.into(), doc_conn.clone());
		self.authenticating.lock().remove(name);
		self.drain_queue(name, &doc_conn).await;
		self.queues.lock().remove(name);

		// The client may have closed while this flow was in flight;
		// don't leave a freshly attached connection behind.
		if self.is_closed() {
			doc_conn.close().await;
		}
	}

	async fn drain_queue(&self, name: &str, doc_conn: &Arc<DocumentConnection>) {
		loop {
			let frame = {
				let mut queues = self.queues.lock();
				queues.get_mut(name).and_then(VecDeque::pop_front)
			};
			let Some(frame) = frame else { break };
			match IncomingMessage::decode(&frame) {
				Ok(msg) => doc_conn.handle_message(&msg).await,
				Err(err) => {
					self.app.error_handler.on_protocol_error(self.connection_id(), &err);
				}
			}
		}
	}

	/// Close everything: document connections, queues, transport.
	/// Idempotent.
	pub async fn close(self: &Arc<Self>, code: u16, reason: &str) {
		if self.closed.swap(true, Ordering::SeqCst) {
			return;
		}
		let doc_conns: Vec<Arc<DocumentConnection>> =
			{ self.documents.write().await.drain().map(|(_, conn)| conn).collect() };
		for doc_conn in doc_conns {
			doc_conn.close().await;
		}
		self.queues.lock().clear();
		self.authenticating.lock().clear();
		self.transport.close(code, reason).await;
	}
}

/// Token extraction: an AUTH first frame carries a varstring token;
/// every other first frame authenticates without one.
fn token_from(msg: &IncomingMessage) -> Option<Box<str>> {
	if msg.kind != Some(MessageType::Auth) {
		return None;
	}
	let mut dec = Decoder::new(&msg.payload);
	dec.read_var_string().ok().map(Into::into)
}

impl std::fmt::Debug for ClientConnection {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		f.debug_struct("ClientConnection")
			.field("connection_id", &self.connection_id())
			.field("closed", &self.is_closed())
			.finish_non_exhaustive()
	}
}

// vim: ts=4
