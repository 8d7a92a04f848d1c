//! Lifecycle logging extension.
//!
//! Reports document and connection lifecycle events through `tracing`.
//! Runs early by default (high priority) so its log lines frame the
//! work of the other extensions.

use async_trait::async_trait;

use crate::prelude::*;
use yrelay_types::extension::{
	DocumentPayload, Extension, OnAuthenticatePayload, OnChangePayload, OnConnectPayload,
	OnDestroyPayload, OnDisconnectPayload, OnStoreDocumentPayload,
};

pub struct Logger {
	priority: i32,
}

impl Logger {
	pub fn new() -> Self {
		Self { priority: 1000 }
	}

	pub fn with_priority(priority: i32) -> Self {
		Self { priority }
	}
}

impl Default for Logger {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl Extension for Logger {
	fn name(&self) -> &'static str {
		"logger"
	}

	fn priority(&self) -> i32 {
		self.priority
	}

	async fn on_connect(&self, payload: &OnConnectPayload) -> YrResult<()> {
		info!("connection {} from {}", payload.connection_id, payload.remote_address);
		Ok(())
	}

	async fn on_authenticate(&self, payload: &OnAuthenticatePayload) -> YrResult<()> {
		debug!(
			"connection {} authenticating for document '{}'",
			payload.connection_id, payload.document_name
		);
		Ok(())
	}

	async fn after_load_document(&self, payload: &DocumentPayload) -> YrResult<()> {
		info!("document '{}' loaded", payload.document_name);
		Ok(())
	}

	async fn on_change(&self, payload: &OnChangePayload) -> YrResult<()> {
		debug!(
			"document '{}' changed ({} bytes)",
			payload.document_name,
			payload.update.len()
		);
		Ok(())
	}

	async fn on_store_document(&self, payload: &OnStoreDocumentPayload) -> YrResult<()> {
		debug!(
			"storing document '{}' ({} bytes)",
			payload.document_name,
			payload.state.len()
		);
		Ok(())
	}

	async fn after_unload_document(&self, payload: &DocumentPayload) -> YrResult<()> {
		info!("document '{}' unloaded", payload.document_name);
		Ok(())
	}

	async fn on_disconnect(&self, payload: &OnDisconnectPayload) -> YrResult<()> {
		debug!(
			"connection {} left document '{}'",
			payload.connection_id, payload.document_name
		);
		Ok(())
	}

	async fn on_destroy(&self, _payload: &OnDestroyPayload) -> YrResult<()> {
		info!("server shutting down");
		Ok(())
	}
}

// vim: ts=4
