//! Extension capability and hook payloads.
//!
//! Extensions observe and steer the document lifecycle through named
//! hooks. Every hook defaults to a resolved no-op, so an extension
//! implements only the events it cares about. For one event the server
//! runs the registered extensions strictly sequentially, ordered by
//! `priority()` descending; the first failure aborts the chain for that
//! event and the caller decides what the failure means.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::context::{Context, ContextCell};
use crate::prelude::*;

/// Fired once when the server is built.
#[derive(Debug)]
pub struct OnConfigurePayload {
	pub debounce: Duration,
	pub max_debounce: Duration,
	pub extension_count: usize,
}

/// Fired once per transport, before any frame is processed. The
/// context is still mutable at this point.
#[derive(Debug)]
pub struct OnConnectPayload {
	pub connection_id: Box<str>,
	pub remote_address: Box<str>,
	pub context: Arc<ContextCell>,
}

/// Fired once per (transport, document) on the first frame naming the
/// document. The context is still mutable; after the chain completes
/// it is frozen for good.
#[derive(Debug)]
pub struct OnAuthenticatePayload {
	pub connection_id: Box<str>,
	pub document_name: Box<str>,
	/// Credential extracted from the first frame, when it carried one.
	pub token: Option<Box<str>>,
	pub context: Arc<ContextCell>,
	read_only: AtomicBool,
}

impl OnAuthenticatePayload {
	pub fn new(
		connection_id: impl Into<Box<str>>,
		document_name: impl Into<Box<str>>,
		token: Option<Box<str>>,
		context: Arc<ContextCell>,
	) -> Self {
		Self {
			connection_id: connection_id.into(),
			document_name: document_name.into(),
			token,
			context,
			read_only: AtomicBool::new(false),
		}
	}

	/// Bar this connection from mutating the document. Later extensions
	/// may override the decision; the last write wins.
	pub fn set_read_only(&self, read_only: bool) {
		self.read_only.store(read_only, Ordering::SeqCst);
	}

	pub fn is_read_only(&self) -> bool {
		self.read_only.load(Ordering::SeqCst)
	}
}

/// Generic document lifecycle payload (create / after-load /
/// before-unload / after-unload).
#[derive(Debug, Clone)]
pub struct DocumentPayload {
	pub document_name: Box<str>,
	pub context: Arc<Context>,
}

/// Fired while a document is loading. An extension that has persisted
/// state injects it through `set_state`; later extensions overwrite
/// earlier ones and the final value is applied to the engine in a
/// single transaction.
#[derive(Debug)]
pub struct OnLoadDocumentPayload {
	pub document_name: Box<str>,
	pub context: Arc<Context>,
	state: Mutex<Option<Vec<u8>>>,
}

impl OnLoadDocumentPayload {
	pub fn new(document_name: impl Into<Box<str>>, context: Arc<Context>) -> Self {
		Self { document_name: document_name.into(), context, state: Mutex::new(None) }
	}

	pub fn set_state(&self, state: Vec<u8>) {
		if let Ok(mut slot) = self.state.lock() {
			*slot = Some(state);
		}
	}

	pub fn has_state(&self) -> bool {
		self.state.lock().map(|slot| slot.is_some()).unwrap_or(false)
	}

	pub fn take_state(&self) -> Option<Vec<u8>> {
		self.state.lock().ok().and_then(|mut slot| slot.take())
	}
}

/// Fired after every committed transaction, before the update is
/// broadcast or persisted.
#[derive(Debug, Clone)]
pub struct OnChangePayload {
	pub document_name: Box<str>,
	pub context: Arc<Context>,
	pub update: Vec<u8>,
}

/// Fired by the debounced saver with the full encoded document state.
#[derive(Debug, Clone)]
pub struct OnStoreDocumentPayload {
	pub document_name: Box<str>,
	pub context: Arc<Context>,
	pub state: Vec<u8>,
}

/// Fired when a (transport, document) connection goes away.
#[derive(Debug, Clone)]
pub struct OnDisconnectPayload {
	pub connection_id: Box<str>,
	pub document_name: Box<str>,
	pub context: Arc<Context>,
}

/// Fired once during server shutdown.
#[derive(Debug, Clone, Default)]
pub struct OnDestroyPayload {}

/// A pluggable lifecycle extension.
///
/// All hooks default to `Ok(())`; `priority()` defaults to 0. Higher
/// priority fires earlier.
#[async_trait]
pub trait Extension: Send + Sync {
	/// Stable name used for error attribution.
	fn name(&self) -> &'static str;

	fn priority(&self) -> i32 {
		0
	}

	async fn on_configure(&self, _payload: &OnConfigurePayload) -> YrResult<()> {
		Ok(())
	}

	async fn on_connect(&self, _payload: &OnConnectPayload) -> YrResult<()> {
		Ok(())
	}

	async fn on_authenticate(&self, _payload: &OnAuthenticatePayload) -> YrResult<()> {
		Ok(())
	}

	async fn on_create_document(&self, _payload: &DocumentPayload) -> YrResult<()> {
		Ok(())
	}

	async fn on_load_document(&self, _payload: &OnLoadDocumentPayload) -> YrResult<()> {
		Ok(())
	}

	async fn after_load_document(&self, _payload: &DocumentPayload) -> YrResult<()> {
		Ok(())
	}

	async fn on_change(&self, _payload: &OnChangePayload) -> YrResult<()> {
		Ok(())
	}

	async fn on_store_document(&self, _payload: &OnStoreDocumentPayload) -> YrResult<()> {
		Ok(())
	}

	async fn after_store_document(&self, _payload: &OnStoreDocumentPayload) -> YrResult<()> {
		Ok(())
	}

	async fn before_unload_document(&self, _payload: &DocumentPayload) -> YrResult<()> {
		Ok(())
	}

	async fn after_unload_document(&self, _payload: &DocumentPayload) -> YrResult<()> {
		Ok(())
	}

	async fn on_disconnect(&self, _payload: &OnDisconnectPayload) -> YrResult<()> {
		Ok(())
	}

	async fn on_destroy(&self, _payload: &OnDestroyPayload) -> YrResult<()> {
		Ok(())
	}
}

// vim: ts=4
