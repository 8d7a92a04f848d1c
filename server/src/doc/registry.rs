//! Document registry: name → record with single-flight loading and
//! coordinated unload.
//!
//! Any number of concurrent requesters of the same name observe exactly
//! one loader; everyone awaits the same shared future and receives the
//! same record (or the same error — no partial record is ever exposed).
//! The loader runs on its own task so a requester dropping out cannot
//! cancel a load other requesters still wait for.

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::doc::record::{DocState, DocumentRecord};
use crate::prelude::*;
use crate::saver::SaveTask;
use yrelay_types::context::Context;
use yrelay_types::extension::{DocumentPayload, OnChangePayload, OnLoadDocumentPayload, OnStoreDocumentPayload};
use yrelay_types::protocol;
use yrelay_types::transport;

type LoadFuture = Shared<BoxFuture<'static, YrResult<Arc<DocumentRecord>>>>;

pub struct DocumentRegistry {
	app: App,
	documents: RwLock<HashMap<Box<str>, Arc<DocumentRecord>>>,
	loading: Mutex<HashMap<Box<str>, LoadFuture>>,
}

impl DocumentRegistry {
	pub fn new(app: App) -> Arc<Self> {
		Arc::new(Self {
			app,
			documents: RwLock::new(HashMap::new()),
			loading: Mutex::new(HashMap::new()),
		})
	}

	pub fn get(&self, name: &str) -> Option<Arc<DocumentRecord>> {
		self.documents.read().get(name).cloned()
	}

	pub fn document_names(&self) -> Vec<Box<str>> {
		self.documents.read().keys().cloned().collect()
	}

	pub fn len(&self) -> usize {
		self.documents.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.documents.read().is_empty()
	}

	/// Return the ACTIVE record for `name`, loading it first if needed.
	/// Concurrent callers for the same name share one load.
	pub async fn get_or_create(
		self: &Arc<Self>,
		name: &str,
		context: Arc<Context>,
	) -> YrResult<Arc<DocumentRecord>> {
		if let Some(record) = self.get(name) {
			if record.state() == DocState::Active {
				return Ok(record);
			}
		}

		let load = {
			let mut loading = self.loading.lock();
			if let Some(pending) = loading.get(name) {
				pending.clone()
			} else {
				// A loader may have finished between the lock-free
				// check above and taking the loading lock.
				if let Some(record) = self.documents.read().get(name).cloned() {
					if record.state() == DocState::Active {
						return Ok(record);
					}
				}
				let (tx, rx) = tokio::sync::oneshot::channel::<YrResult<Arc<DocumentRecord>>>();
				let shared: LoadFuture = async move {
					match rx.await {
						Ok(result) => result,
						Err(_) => Err(Error::Internal("document loader vanished".into())),
					}
				}
				.boxed()
				.shared();
				loading.insert(name.into(), shared.clone());

				let this = self.clone();
				let name: Box<str> = name.into();
				tokio::spawn(async move {
					let result = this.load_document(&name, context).await;
					// Unregister the loader before resolving so a
					// retry after an error starts a fresh load; a
					// successful record is already published.
					this.loading.lock().remove(&name);
					let _ = tx.send(result);
				});
				shared
			}
		};

		load.await
	}

	async fn load_document(
		self: &Arc<Self>,
		name: &str,
		context: Arc<Context>,
	) -> YrResult<Arc<DocumentRecord>> {
		if self.app.is_closed() {
			return Err(Error::ServerClosed);
		}
		debug!("loading document '{}'", name);

		let engine = (self.app.settings.engine_factory)();
		let record = Arc::new(DocumentRecord::new(
			name,
			engine.clone(),
			context.clone(),
			self.app.error_handler.clone(),
		));
		let doc_payload =
			DocumentPayload { document_name: name.into(), context: context.clone() };

		self.app.hooks.on_create_document(&doc_payload).await.map_err(Error::from)?;

		let load_payload = OnLoadDocumentPayload::new(name, context.clone());
		if let Err(err) = self.app.hooks.on_load_document(&load_payload).await {
			return Err(Error::from(err));
		}
		// The last extension to set state wins; applied as one
		// transaction, before the observer exists, so the initial
		// apply never triggers broadcast or persistence.
		if let Some(state) = load_payload.take_state() {
			if !state.is_empty() {
				if let Err(err) = engine.apply_update(&state) {
					record.close_engine();
					return Err(err);
				}
			}
		}

		// Observer → ordered channel → pump task. The channel keeps
		// commit order; the pump re-enters the async world.
		let (update_tx, mut update_rx) = tokio::sync::mpsc::unbounded_channel::<Vec<u8>>();
		let subscription = match engine.observe_update(Box::new(move |update| {
			let _ = update_tx.send(update.to_vec());
		})) {
			Ok(subscription) => subscription,
			Err(err) => {
				record.close_engine();
				return Err(err);
			}
		};
		record.set_subscription(subscription);
		{
			let this = self.clone();
			let record = record.clone();
			tokio::spawn(async move {
				while let Some(update) = update_rx.recv().await {
					this.handle_document_change(&record, update).await;
				}
			});
		}

		record.advance(DocState::Active);
		self.documents.write().insert(name.into(), record.clone());

		if let Err(err) = self.app.hooks.after_load_document(&doc_payload).await {
			// No partial record may stay visible after a failed load.
			self.documents.write().remove(name);
			record.advance(DocState::Unloading);
			record.close_engine();
			record.advance(DocState::Closed);
			return Err(Error::from(err));
		}

		info!("document '{}' loaded", name);
		Ok(record)
	}

	/// Update observer pipeline: change hooks, broadcast fan-out,
	/// debounced persistence. Fired once per committed transaction, in
	/// commit order.
	pub(crate) async fn handle_document_change(
		self: &Arc<Self>,
		record: &Arc<DocumentRecord>,
		update: Vec<u8>,
	) {
		if self.app.is_closed() || record.state() != DocState::Active {
			return;
		}

		let payload = OnChangePayload {
			document_name: record.name().into(),
			context: record.context().clone(),
			update: update.clone(),
		};
		if let Err(err) = self.app.hooks.on_change(&payload).await {
			err.report(self.app.error_handler.as_ref());
			return;
		}

		let frame = protocol::encode_sync_update(record.name(), &update);
		record.broadcast(frame, None).await;

		self.app.saver.schedule(record.name(), store_task(&self.app, record));
	}

	/// Detach a connection; the last one out of an ACTIVE record
	/// triggers the unload.
	pub(crate) fn release(self: &Arc<Self>, record: &Arc<DocumentRecord>, connection_id: &str) {
		let remaining = record.remove_connection(connection_id);
		if remaining == 0 && record.state() == DocState::Active && !self.app.is_closed() {
			let this = self.clone();
			let record = record.clone();
			tokio::spawn(async move {
				this.unload(record).await;
			});
		}
	}

	/// Coordinated unload: unpublish, wait briefly for stragglers,
	/// flush the pending save, fire the unload hooks, release the
	/// engine.
	pub(crate) async fn unload(self: &Arc<Self>, record: Arc<DocumentRecord>) {
		{
			let mut documents = self.documents.write();
			let is_current = documents
				.get(record.name())
				.is_some_and(|current| Arc::ptr_eq(current, &record));
			// Already unloaded, or a fresh record took the name.
			if !is_current {
				return;
			}
			documents.remove(record.name());
		}
		if !record.advance(DocState::Unloading) {
			return;
		}
		debug!("unloading document '{}'", record.name());

		let deadline = tokio::time::Instant::now() + self.app.settings.unload_grace;
		while record.connection_count() > 0 && tokio::time::Instant::now() < deadline {
			tokio::time::sleep(Duration::from_millis(100)).await;
		}

		// Flush bypasses the debounce; errors are surfaced by the
		// saver and do not block the unload.
		let _ = self.app.saver.save_now(record.name(), store_task(&self.app, &record)).await;

		let payload = DocumentPayload {
			document_name: record.name().into(),
			context: record.context().clone(),
		};
		if let Err(err) = self.app.hooks.before_unload_document(&payload).await {
			err.report(self.app.error_handler.as_ref());
		}

		record.close_engine();

		if let Err(err) = self.app.hooks.after_unload_document(&payload).await {
			err.report(self.app.error_handler.as_ref());
		}
		record.advance(DocState::Closed);
		info!("document '{}' unloaded", record.name());
	}

	/// Shutdown path: close every connection (1001), then run the
	/// regular unload for each record.
	pub(crate) async fn shutdown(self: &Arc<Self>) {
		let records: Vec<Arc<DocumentRecord>> =
			{ self.documents.read().values().cloned().collect() };
		for record in records {
			for conn in record.connections_snapshot() {
				conn.close_with(transport::CLOSE_GOING_AWAY, "server shutting down").await;
			}
			self.unload(record).await;
		}
	}
}

/// Build the persistence task for one record. The task re-reads the
/// full state at fire time, so it carries every change accumulated
/// since it was scheduled. Holding only a weak reference keeps a
/// pending timer from pinning an unloaded record alive.
fn store_task(app: &App, record: &Arc<DocumentRecord>) -> SaveTask {
	let app = app.clone();
	let weak = Arc::downgrade(record);
	Arc::new(move || {
		let app = app.clone();
		let weak = weak.clone();
		Box::pin(async move {
			let Some(record) = weak.upgrade() else {
				return Ok(());
			};
			let state = record.engine().encode_state_as_update()?;
			let payload = OnStoreDocumentPayload {
				document_name: record.name().into(),
				context: record.context().clone(),
				state,
			};
			app.hooks.on_store_document(&payload).await.map_err(Error::from)?;
			app.hooks.after_store_document(&payload).await.map_err(Error::from)?;
			Ok(())
		})
	})
}

// vim: ts=4
