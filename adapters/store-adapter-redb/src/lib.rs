//! Redb-backed document store extension
//!
//! Persists the full encoded document state per document name and
//! injects it back on load, using redb for storage.
//!
//! # Storage Layout
//!
//! Two redb tables:
//! - `document_states` - encoded document state keyed by document name
//! - `document_meta` - per-document metadata as JSON (timestamps,
//!   stored size, store count)
//!
//! The extension hooks into the document lifecycle:
//! - `on_load_document` reads the stored state and hands it to the
//!   server, which applies it in one transaction
//! - `on_store_document` overwrites state and metadata
//!
//! redb transactions are synchronous; every database operation runs on
//! the blocking pool so the async hook chain never stalls on disk I/O.
//! Backend failures surface as `Error::Storage`, which the server
//! routes to its error handler without unloading the document.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

use async_trait::async_trait;
use redb::{ReadableDatabase, ReadableTable};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::debug;

use yrelay_types::error::{Error, YrResult};
use yrelay_types::extension::{Extension, OnLoadDocumentPayload, OnStoreDocumentPayload};

// Storage table definitions
mod tables {
	use redb::TableDefinition;

	/// Encoded document state: doc_name -> state_bytes
	pub const TABLE_STATES: TableDefinition<&str, &[u8]> =
		TableDefinition::new("document_states");

	/// Document metadata: doc_name -> meta_json
	pub const TABLE_META: TableDefinition<&str, &str> = TableDefinition::new("document_meta");
}

use tables::*;

/// Lift a redb failure into the core storage error.
fn storage_err(what: &str, err: impl std::fmt::Display) -> Error {
	Error::Storage(format!("{}: {}", what, err).into())
}

/// Metadata kept next to every stored document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentMeta {
	/// First store timestamp (Unix seconds)
	#[serde(default)]
	pub created_at: u64,

	/// Last store timestamp (Unix seconds)
	#[serde(default)]
	pub updated_at: u64,

	/// Size of the stored state in bytes
	#[serde(default)]
	pub size_bytes: u64,

	/// Number of stores for this document
	#[serde(default)]
	pub store_count: u64,
}

impl DocumentMeta {
	fn decode(json: &str) -> YrResult<Self> {
		serde_json::from_str(json).map_err(|err| storage_err("meta decode failed", err))
	}

	fn encode(&self) -> YrResult<String> {
		serde_json::to_string(self).map_err(|err| storage_err("meta encode failed", err))
	}
}

fn now_timestamp() -> u64 {
	SystemTime::now()
		.duration_since(SystemTime::UNIX_EPOCH)
		.unwrap_or_default()
		.as_secs()
}

/// Run a redb operation on the blocking pool.
async fn blocking<T, F>(op: F) -> YrResult<T>
where
	T: Send + 'static,
	F: FnOnce() -> YrResult<T> + Send + 'static,
{
	tokio::task::spawn_blocking(op)
		.await
		.map_err(|err| Error::Internal(format!("blocking task failed: {}", err).into()))?
}

/// Document store extension using redb for persistence.
pub struct StoreAdapterRedb {
	db: Arc<redb::Database>,
	db_path: PathBuf,
}

impl StoreAdapterRedb {
	/// Open (or create) the database file and make sure the tables
	/// exist.
	pub async fn new(db_path: impl AsRef<Path>) -> YrResult<Self> {
		let db_path = db_path.as_ref().to_path_buf();
		if let Some(parent) = db_path.parent() {
			std::fs::create_dir_all(parent)?;
		}

		let path = db_path.clone();
		let db = blocking(move || {
			let db = redb::Database::create(&path)
				.map_err(|err| storage_err("failed to open database", err))?;
			let txn =
				db.begin_write().map_err(|err| storage_err("failed to begin write", err))?;
			{
				txn.open_table(TABLE_STATES)
					.map_err(|err| storage_err("failed to open table", err))?;
				txn.open_table(TABLE_META)
					.map_err(|err| storage_err("failed to open table", err))?;
			}
			txn.commit().map_err(|err| storage_err("failed to commit", err))?;
			Ok(db)
		})
		.await?;

		debug!("store adapter opened at {:?}", db_path);
		Ok(Self { db: Arc::new(db), db_path })
	}

	/// Stored state for a document, if any.
	pub async fn read_state(&self, document_name: &str) -> YrResult<Option<Vec<u8>>> {
		let db = self.db.clone();
		let name = document_name.to_owned();
		blocking(move || {
			let txn = db.begin_read().map_err(|err| storage_err("failed to begin read", err))?;
			let table = txn
				.open_table(TABLE_STATES)
				.map_err(|err| storage_err("failed to open table", err))?;
			let state = table
				.get(name.as_str())
				.map_err(|err| storage_err("failed to read state", err))?
				.map(|guard| guard.value().to_vec());
			Ok(state)
		})
		.await
	}

	/// Metadata for a document; default when the document was never
	/// stored.
	pub async fn read_meta(&self, document_name: &str) -> YrResult<DocumentMeta> {
		let db = self.db.clone();
		let name = document_name.to_owned();
		blocking(move || {
			let txn = db.begin_read().map_err(|err| storage_err("failed to begin read", err))?;
			let table = txn
				.open_table(TABLE_META)
				.map_err(|err| storage_err("failed to open table", err))?;
			let meta = match table
				.get(name.as_str())
				.map_err(|err| storage_err("failed to read meta", err))?
			{
				Some(guard) => DocumentMeta::decode(guard.value())?,
				None => DocumentMeta::default(),
			};
			Ok(meta)
		})
		.await
	}

	/// Overwrite state and metadata for a document.
	pub async fn write_state(&self, document_name: &str, state: Vec<u8>) -> YrResult<()> {
		let db = self.db.clone();
		let name = document_name.to_owned();
		blocking(move || {
			let txn =
				db.begin_write().map_err(|err| storage_err("failed to begin write", err))?;
			{
				let mut states = txn
					.open_table(TABLE_STATES)
					.map_err(|err| storage_err("failed to open table", err))?;
				let mut metas = txn
					.open_table(TABLE_META)
					.map_err(|err| storage_err("failed to open table", err))?;

				let mut meta = match metas
					.get(name.as_str())
					.map_err(|err| storage_err("failed to read meta", err))?
				{
					Some(guard) => DocumentMeta::decode(guard.value())?,
					None => DocumentMeta { created_at: now_timestamp(), ..Default::default() },
				};
				meta.updated_at = now_timestamp();
				meta.size_bytes = state.len() as u64;
				meta.store_count += 1;
				let meta_json = meta.encode()?;

				states
					.insert(name.as_str(), state.as_slice())
					.map_err(|err| storage_err("failed to write state", err))?;
				metas
					.insert(name.as_str(), meta_json.as_str())
					.map_err(|err| storage_err("failed to write meta", err))?;
			}
			txn.commit().map_err(|err| storage_err("failed to commit", err))?;
			Ok(())
		})
		.await
	}

	/// Remove a document and its metadata.
	pub async fn delete_document(&self, document_name: &str) -> YrResult<()> {
		let db = self.db.clone();
		let name = document_name.to_owned();
		blocking(move || {
			let txn =
				db.begin_write().map_err(|err| storage_err("failed to begin write", err))?;
			{
				let mut states = txn
					.open_table(TABLE_STATES)
					.map_err(|err| storage_err("failed to open table", err))?;
				let mut metas = txn
					.open_table(TABLE_META)
					.map_err(|err| storage_err("failed to open table", err))?;
				states
					.remove(name.as_str())
					.map_err(|err| storage_err("failed to delete state", err))?;
				metas
					.remove(name.as_str())
					.map_err(|err| storage_err("failed to delete meta", err))?;
			}
			txn.commit().map_err(|err| storage_err("failed to commit", err))?;
			Ok(())
		})
		.await
	}

	/// Names of all stored documents.
	pub async fn list_documents(&self) -> YrResult<Vec<String>> {
		let db = self.db.clone();
		blocking(move || {
			let txn = db.begin_read().map_err(|err| storage_err("failed to begin read", err))?;
			let table = txn
				.open_table(TABLE_STATES)
				.map_err(|err| storage_err("failed to open table", err))?;
			let mut names = Vec::new();
			for entry in table.iter().map_err(|err| storage_err("failed to iterate", err))? {
				let (key, _) = entry.map_err(|err| storage_err("failed to iterate", err))?;
				names.push(key.value().to_owned());
			}
			Ok(names)
		})
		.await
	}
}

#[async_trait]
impl Extension for StoreAdapterRedb {
	fn name(&self) -> &'static str {
		"store-redb"
	}

	async fn on_load_document(&self, payload: &OnLoadDocumentPayload) -> YrResult<()> {
		if let Some(state) = self.read_state(&payload.document_name).await? {
			debug!(
				"loaded {} bytes for document '{}'",
				state.len(),
				payload.document_name
			);
			payload.set_state(state);
		}
		Ok(())
	}

	async fn on_store_document(&self, payload: &OnStoreDocumentPayload) -> YrResult<()> {
		debug!(
			"storing {} bytes for document '{}'",
			payload.state.len(),
			payload.document_name
		);
		self.write_state(&payload.document_name, payload.state.clone()).await
	}
}

impl std::fmt::Debug for StoreAdapterRedb {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("StoreAdapterRedb").field("db_path", &self.db_path).finish()
	}
}

// vim: ts=4
