//! Shared fixtures for the server integration tests: an in-memory
//! transport, a recording extension and yrs update helpers.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use yrs::updates::decoder::Decode;
use yrs::{Doc, GetString, ReadTxn, StateVector, Text, Transact, Update};

use yrelay::types::context::{Context, ContextCell};
use yrelay::types::error::{Error, ErrorHandler, YrResult};
use yrelay::types::extension::{
	DocumentPayload, Extension, OnAuthenticatePayload, OnChangePayload, OnConnectPayload,
	OnDestroyPayload, OnDisconnectPayload, OnLoadDocumentPayload, OnStoreDocumentPayload,
};
use yrelay::types::protocol::{IncomingMessage, MessageType, SyncMessage};
use yrelay::types::transport::Transport;

// MockTransport //
//***************//

/// In-memory transport capturing everything the server sends.
pub struct MockTransport {
	connection_id: Box<str>,
	open: AtomicBool,
	sent: Mutex<Vec<Vec<u8>>>,
	closed_with: Mutex<Option<(u16, String)>>,
}

impl MockTransport {
	pub fn new(connection_id: &str) -> Arc<Self> {
		Arc::new(Self {
			connection_id: connection_id.into(),
			open: AtomicBool::new(true),
			sent: Mutex::new(Vec::new()),
			closed_with: Mutex::new(None),
		})
	}

	pub fn sent_frames(&self) -> Vec<Vec<u8>> {
		self.sent.lock().unwrap().clone()
	}

	pub fn sent_count(&self) -> usize {
		self.sent.lock().unwrap().len()
	}

	/// Decoded server frames of one message type.
	pub fn frames_of(&self, kind: MessageType) -> Vec<IncomingMessage> {
		self.sent_frames()
			.iter()
			.filter_map(|frame| IncomingMessage::decode(frame).ok())
			.filter(|msg| msg.kind == Some(kind))
			.collect()
	}

	/// Decoded sync sub-messages received, in order.
	pub fn sync_messages(&self) -> Vec<SyncMessage> {
		self.frames_of(MessageType::Sync)
			.iter()
			.filter_map(|msg| SyncMessage::decode(&msg.payload).ok())
			.collect()
	}

	/// Payloads of received SYNC_STATUS frames (true/false), in order.
	pub fn sync_statuses(&self) -> Vec<bool> {
		self.frames_of(MessageType::SyncStatus)
			.iter()
			.map(|msg| msg.payload == [1])
			.collect()
	}

	/// SYNC_STATUS payloads for one document only.
	pub fn sync_statuses_for(&self, document: &str) -> Vec<bool> {
		self.frames_of(MessageType::SyncStatus)
			.iter()
			.filter(|msg| &*msg.document_name == document)
			.map(|msg| msg.payload == [1])
			.collect()
	}

	pub fn close_code(&self) -> Option<u16> {
		self.closed_with.lock().unwrap().as_ref().map(|(code, _)| *code)
	}
}

#[async_trait]
impl Transport for MockTransport {
	async fn send(&self, data: Vec<u8>) -> YrResult<()> {
		if !self.is_open() {
			return Err(Error::TransportClosed);
		}
		self.sent.lock().unwrap().push(data);
		Ok(())
	}

	async fn close(&self, code: u16, reason: &str) {
		if self.open.swap(false, Ordering::SeqCst) {
			*self.closed_with.lock().unwrap() = Some((code, reason.to_owned()));
		}
	}

	fn is_open(&self) -> bool {
		self.open.load(Ordering::SeqCst)
	}

	fn connection_id(&self) -> &str {
		&self.connection_id
	}

	fn remote_address(&self) -> &str {
		"127.0.0.1:0"
	}
}

// RecordingExtension //
//********************//

/// Extension recording every hook it sees, with a handful of switches
/// the tests flip per scenario.
#[derive(Default)]
pub struct RecordingExtension {
	// Configuration
	pub read_only: bool,
	pub reject_auth: bool,
	pub auth_delay: Option<Duration>,
	/// Restrict `auth_delay` to one document name; `None` delays all.
	pub auth_delay_document: Option<Box<str>>,
	pub initial_state: Option<Vec<u8>>,
	/// Serve previously stored state back on load (in-memory store).
	pub serve_store: bool,
	pub fail_store: AtomicBool,

	// Recorded observations
	pub events: Mutex<Vec<String>>,
	pub load_count: AtomicUsize,
	pub store_count: AtomicUsize,
	pub change_count: AtomicUsize,
	pub disconnect_count: AtomicUsize,
	pub destroy_count: AtomicUsize,
	pub before_unload_count: AtomicUsize,
	pub after_unload_count: AtomicUsize,
	pub change_updates: Mutex<Vec<Vec<u8>>>,
	pub stored_states: Mutex<Vec<Vec<u8>>>,
	pub store_instants: Mutex<Vec<Instant>>,
	pub store_contexts: Mutex<Vec<Arc<Context>>>,
	pub auth_tokens: Mutex<Vec<Option<Box<str>>>>,
	pub auth_cells: Mutex<Vec<Arc<ContextCell>>>,
	pub persisted: Mutex<HashMap<Box<str>, Vec<u8>>>,
}

impl RecordingExtension {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn read_only() -> Arc<Self> {
		Arc::new(Self { read_only: true, ..Self::default() })
	}

	pub fn rejecting_auth() -> Arc<Self> {
		Arc::new(Self { reject_auth: true, ..Self::default() })
	}

	pub fn with_auth_delay(delay: Duration) -> Arc<Self> {
		Arc::new(Self { auth_delay: Some(delay), ..Self::default() })
	}

	pub fn with_auth_delay_for(document: &str, delay: Duration) -> Arc<Self> {
		Arc::new(Self {
			auth_delay: Some(delay),
			auth_delay_document: Some(document.into()),
			..Self::default()
		})
	}

	pub fn with_initial_state(state: Vec<u8>) -> Arc<Self> {
		Arc::new(Self { initial_state: Some(state), ..Self::default() })
	}

	pub fn storing() -> Arc<Self> {
		Arc::new(Self { serve_store: true, ..Self::default() })
	}

	fn log(&self, event: impl Into<String>) {
		self.events.lock().unwrap().push(event.into());
	}

	pub fn event_log(&self) -> Vec<String> {
		self.events.lock().unwrap().clone()
	}

	pub fn loads(&self) -> usize {
		self.load_count.load(Ordering::SeqCst)
	}

	pub fn stores(&self) -> usize {
		self.store_count.load(Ordering::SeqCst)
	}

	pub fn changes(&self) -> usize {
		self.change_count.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl Extension for RecordingExtension {
	fn name(&self) -> &'static str {
		"recording"
	}

	async fn on_connect(&self, payload: &OnConnectPayload) -> YrResult<()> {
		self.log(format!("onConnect:{}", payload.connection_id));
		Ok(())
	}

	async fn on_authenticate(&self, payload: &OnAuthenticatePayload) -> YrResult<()> {
		if let Some(delay) = self.auth_delay {
			let applies = self
				.auth_delay_document
				.as_deref()
				.is_none_or(|document| document == &*payload.document_name);
			if applies {
				tokio::time::sleep(delay).await;
			}
		}
		self.log(format!("onAuthenticate:{}", payload.document_name));
		self.auth_tokens.lock().unwrap().push(payload.token.clone());
		self.auth_cells.lock().unwrap().push(payload.context.clone());
		if self.reject_auth {
			return Err(Error::Unauthorized);
		}
		if !payload.context.is_frozen() {
			payload.context.insert("authenticated", true)?;
		}
		if self.read_only {
			payload.set_read_only(true);
		}
		Ok(())
	}

	async fn on_create_document(&self, payload: &DocumentPayload) -> YrResult<()> {
		self.log(format!("onCreateDocument:{}", payload.document_name));
		Ok(())
	}

	async fn on_load_document(&self, payload: &OnLoadDocumentPayload) -> YrResult<()> {
		self.log(format!("onLoadDocument:{}", payload.document_name));
		self.load_count.fetch_add(1, Ordering::SeqCst);
		if let Some(state) = &self.initial_state {
			payload.set_state(state.clone());
		} else if self.serve_store {
			let persisted = self.persisted.lock().unwrap();
			if let Some(state) = persisted.get(&payload.document_name) {
				payload.set_state(state.clone());
			}
		}
		Ok(())
	}

	async fn after_load_document(&self, payload: &DocumentPayload) -> YrResult<()> {
		self.log(format!("afterLoadDocument:{}", payload.document_name));
		Ok(())
	}

	async fn on_change(&self, payload: &OnChangePayload) -> YrResult<()> {
		self.log(format!("onChange:{}", payload.document_name));
		self.change_count.fetch_add(1, Ordering::SeqCst);
		self.change_updates.lock().unwrap().push(payload.update.clone());
		Ok(())
	}

	async fn on_store_document(&self, payload: &OnStoreDocumentPayload) -> YrResult<()> {
		self.log(format!("onStoreDocument:{}", payload.document_name));
		if self.fail_store.load(Ordering::SeqCst) {
			return Err(Error::Storage("simulated store failure".into()));
		}
		self.store_count.fetch_add(1, Ordering::SeqCst);
		self.stored_states.lock().unwrap().push(payload.state.clone());
		self.store_instants.lock().unwrap().push(Instant::now());
		self.store_contexts.lock().unwrap().push(payload.context.clone());
		if self.serve_store {
			self.persisted
				.lock()
				.unwrap()
				.insert(payload.document_name.clone(), payload.state.clone());
		}
		Ok(())
	}

	async fn before_unload_document(&self, payload: &DocumentPayload) -> YrResult<()> {
		self.log(format!("beforeUnloadDocument:{}", payload.document_name));
		self.before_unload_count.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}

	async fn after_unload_document(&self, payload: &DocumentPayload) -> YrResult<()> {
		self.log(format!("afterUnloadDocument:{}", payload.document_name));
		self.after_unload_count.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}

	async fn on_disconnect(&self, payload: &OnDisconnectPayload) -> YrResult<()> {
		self.log(format!("onDisconnect:{}", payload.document_name));
		self.disconnect_count.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}

	async fn on_destroy(&self, _payload: &OnDestroyPayload) -> YrResult<()> {
		self.log("onDestroy".to_string());
		self.destroy_count.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}
}

// CollectingErrorHandler //
//************************//

#[derive(Default)]
pub struct CollectingErrorHandler {
	pub storage_errors: Mutex<Vec<(String, String)>>,
	pub hook_errors: Mutex<Vec<(String, String)>>,
	pub protocol_errors: Mutex<Vec<String>>,
}

impl CollectingErrorHandler {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn storage_error_count(&self) -> usize {
		self.storage_errors.lock().unwrap().len()
	}
}

impl ErrorHandler for CollectingErrorHandler {
	fn on_storage_error(&self, document_name: &str, error: &Error) {
		self.storage_errors
			.lock()
			.unwrap()
			.push((document_name.to_owned(), error.to_string()));
	}

	fn on_hook_error(&self, extension: &str, hook: &str, error: &Error) {
		self.hook_errors
			.lock()
			.unwrap()
			.push((format!("{}/{}", extension, hook), error.to_string()));
	}

	fn on_protocol_error(&self, connection_id: &str, error: &Error) {
		self.protocol_errors
			.lock()
			.unwrap()
			.push(format!("{}: {}", connection_id, error));
	}
}

// yrs helpers //
//*************//

/// Full-state update of a fresh document whose text "t" holds `text`.
pub fn update_inserting(text: &str) -> Vec<u8> {
	let doc = Doc::new();
	let field = doc.get_or_insert_text("t");
	{
		let mut txn = doc.transact_mut();
		field.insert(&mut txn, 0, text);
	}
	let txn = doc.transact();
	txn.encode_state_as_update_v1(&StateVector::default())
}

/// Two sequential updates from one client: `u2` builds on `u1`.
pub fn two_sequential_updates() -> (Vec<u8>, Vec<u8>, String) {
	let doc = Doc::new();
	let field = doc.get_or_insert_text("t");
	{
		let mut txn = doc.transact_mut();
		field.insert(&mut txn, 0, "a");
	}
	let (u1, sv1) = {
		let txn = doc.transact();
		(txn.encode_state_as_update_v1(&StateVector::default()), txn.state_vector())
	};
	{
		let mut txn = doc.transact_mut();
		field.insert(&mut txn, 1, "b");
	}
	let u2 = {
		let txn = doc.transact();
		txn.encode_state_as_update_v1(&sv1)
	};
	(u1, u2, "ab".to_owned())
}

/// Text "t" after applying `updates` to a fresh document.
pub fn text_from_updates(updates: &[Vec<u8>]) -> String {
	let doc = Doc::new();
	{
		let mut txn = doc.transact_mut();
		for update in updates {
			let decoded = Update::decode_v1(update).unwrap();
			txn.apply_update(decoded).unwrap();
		}
	}
	let txn = doc.transact();
	txn.get_text("t").map(|t| t.get_string(&txn)).unwrap_or_default()
}

/// The varint-0 empty state vector of the sync handshake.
pub fn empty_state_vector() -> Vec<u8> {
	vec![0x00]
}

/// Poll `condition` every 10 ms until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
	let deadline = Instant::now() + timeout;
	while Instant::now() < deadline {
		if condition() {
			return true;
		}
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
	condition()
}

// vim: ts=4
