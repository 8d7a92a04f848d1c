//! Extension hook chain.
//!
//! Extensions are sorted once at construction by `priority()`
//! descending (registration order breaks ties) and run strictly
//! sequentially for each event: extension *k*+1 only starts after
//! extension *k* resolved. The first failure aborts the chain and is
//! returned with extension and hook attribution; the caller decides
//! whether the failure is fatal for its path.

use std::cmp::Reverse;
use std::sync::Arc;

use crate::prelude::*;
use yrelay_types::extension::{
	DocumentPayload, Extension, OnAuthenticatePayload, OnChangePayload, OnConfigurePayload,
	OnConnectPayload, OnDestroyPayload, OnDisconnectPayload, OnLoadDocumentPayload,
	OnStoreDocumentPayload,
};

/// A hook chain failure with attribution.
#[derive(Debug, Clone)]
pub struct HookError {
	pub extension: &'static str,
	pub hook: &'static str,
	pub error: Error,
}

impl HookError {
	fn new(extension: &'static str, hook: &'static str, error: Error) -> Self {
		Self { extension, hook, error }
	}

	/// Report this failure through the error handler.
	pub fn report(&self, error_handler: &dyn ErrorHandler) {
		error_handler.on_hook_error(self.extension, self.hook, &self.error);
	}
}

impl std::fmt::Display for HookError {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(f, "extension '{}' failed in {}: {}", self.extension, self.hook, self.error)
	}
}

impl From<HookError> for Error {
	fn from(err: HookError) -> Self {
		Error::Hook {
			extension: err.extension.into(),
			hook: err.hook.into(),
			message: err.error.to_string().into(),
		}
	}
}

macro_rules! run_chain {
	($self:expr, $hook:ident, $name:literal, $payload:expr) => {{
		for ext in &$self.extensions {
			ext.$hook($payload)
				.await
				.map_err(|error| HookError::new(ext.name(), $name, error))?;
		}
		Ok(())
	}};
}

/// The ordered extension list.
pub struct ExtensionRegistry {
	extensions: Vec<Arc<dyn Extension>>,
}

impl ExtensionRegistry {
	pub fn new(mut extensions: Vec<Arc<dyn Extension>>) -> Self {
		extensions.sort_by_key(|ext| Reverse(ext.priority()));
		Self { extensions }
	}

	pub fn len(&self) -> usize {
		self.extensions.len()
	}

	pub fn is_empty(&self) -> bool {
		self.extensions.is_empty()
	}

	pub async fn on_configure(&self, payload: &OnConfigurePayload) -> Result<(), HookError> {
		run_chain!(self, on_configure, "onConfigure", payload)
	}

	pub async fn on_connect(&self, payload: &OnConnectPayload) -> Result<(), HookError> {
		run_chain!(self, on_connect, "onConnect", payload)
	}

	pub async fn on_authenticate(&self, payload: &OnAuthenticatePayload) -> Result<(), HookError> {
		run_chain!(self, on_authenticate, "onAuthenticate", payload)
	}

	pub async fn on_create_document(&self, payload: &DocumentPayload) -> Result<(), HookError> {
		run_chain!(self, on_create_document, "onCreateDocument", payload)
	}

	pub async fn on_load_document(
		&self,
		payload: &OnLoadDocumentPayload,
	) -> Result<(), HookError> {
		run_chain!(self, on_load_document, "onLoadDocument", payload)
	}

	pub async fn after_load_document(&self, payload: &DocumentPayload) -> Result<(), HookError> {
		run_chain!(self, after_load_document, "afterLoadDocument", payload)
	}

	pub async fn on_change(&self, payload: &OnChangePayload) -> Result<(), HookError> {
		run_chain!(self, on_change, "onChange", payload)
	}

	pub async fn on_store_document(
		&self,
		payload: &OnStoreDocumentPayload,
	) -> Result<(), HookError> {
		run_chain!(self, on_store_document, "onStoreDocument", payload)
	}

	pub async fn after_store_document(
		&self,
		payload: &OnStoreDocumentPayload,
	) -> Result<(), HookError> {
		run_chain!(self, after_store_document, "afterStoreDocument", payload)
	}

	pub async fn before_unload_document(
		&self,
		payload: &DocumentPayload,
	) -> Result<(), HookError> {
		run_chain!(self, before_unload_document, "beforeUnloadDocument", payload)
	}

	pub async fn after_unload_document(&self, payload: &DocumentPayload) -> Result<(), HookError> {
		run_chain!(self, after_unload_document, "afterUnloadDocument", payload)
	}

	pub async fn on_disconnect(&self, payload: &OnDisconnectPayload) -> Result<(), HookError> {
		run_chain!(self, on_disconnect, "onDisconnect", payload)
	}

	pub async fn on_destroy(&self, payload: &OnDestroyPayload) -> Result<(), HookError> {
		run_chain!(self, on_destroy, "onDestroy", payload)
	}
}


// vim: ts=4
