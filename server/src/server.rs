//! Server facade: builder, connection entry point and shutdown
//! orchestration.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::conn::client::ClientConnection;
use crate::doc::registry::DocumentRegistry;
use crate::hooks::ExtensionRegistry;
use crate::prelude::*;
use crate::saver::DebouncedSaver;
use crate::settings::{EngineFactory, Settings};
use yrelay_types::context::Context;
use yrelay_types::error::TracingErrorHandler;
use yrelay_types::extension::{Extension, OnConfigurePayload, OnConnectPayload, OnDestroyPayload};
use yrelay_types::transport::{self, Transport};

/// Configures and builds a [`Server`].
pub struct Builder {
	settings: Settings,
	extensions: Vec<Arc<dyn Extension>>,
	error_handler: Option<Arc<dyn ErrorHandler>>,
}

impl Builder {
	pub fn new() -> Self {
		Self { settings: Settings::default(), extensions: Vec::new(), error_handler: None }
	}

	/// Quiet period before a scheduled save fires.
	pub fn debounce(mut self, debounce: Duration) -> Self {
		self.settings.debounce = debounce;
		self
	}

	/// Hard cap on save latency since the first schedule of a burst.
	pub fn max_debounce(mut self, max_debounce: Duration) -> Self {
		self.settings.max_debounce = max_debounce;
		self
	}

	/// Grace period an unloading document grants straggling connections.
	pub fn unload_grace(mut self, unload_grace: Duration) -> Self {
		self.settings.unload_grace = unload_grace;
		self
	}

	pub fn scheduler_threads(mut self, scheduler_threads: usize) -> Self {
		self.settings.scheduler_threads = scheduler_threads;
		self
	}

	pub fn engine_factory(mut self, engine_factory: EngineFactory) -> Self {
		self.settings.engine_factory = engine_factory;
		self
	}

	pub fn extension(mut self, extension: impl Extension + 'static) -> Self {
		self.extensions.push(Arc::new(extension));
		self
	}

	pub fn extension_arc(mut self, extension: Arc<dyn Extension>) -> Self {
		self.extensions.push(extension);
		self
	}

	pub fn error_handler(mut self, error_handler: Arc<dyn ErrorHandler>) -> Self {
		self.error_handler = Some(error_handler);
		self
	}

	/// Validate the options, assemble the shared state and fire the
	/// `onConfigure` chain.
	pub async fn build(self) -> YrResult<Server> {
		self.settings.validate()?;
		let error_handler =
			self.error_handler.unwrap_or_else(|| Arc::new(TracingErrorHandler));
		let extension_count = self.extensions.len();
		let hooks = ExtensionRegistry::new(self.extensions);
		let saver = DebouncedSaver::new(
			self.settings.debounce,
			self.settings.max_debounce,
			error_handler.clone(),
		);
		let configure = OnConfigurePayload {
			debounce: self.settings.debounce,
			max_debounce: self.settings.max_debounce,
			extension_count,
		};

		let app: App = Arc::new(AppState {
			settings: self.settings,
			hooks,
			saver,
			error_handler,
			closed: AtomicBool::new(false),
		});
		let registry = DocumentRegistry::new(app.clone());
		let server =
			Server { app, registry, connections: Mutex::new(HashMap::new()) };

		server.app.hooks.on_configure(&configure).await.map_err(Error::from)?;
		Ok(server)
	}
}

impl Default for Builder {
	fn default() -> Self {
		Self::new()
	}
}

/// The collaborative editing server.
pub struct Server {
	app: App,
	registry: Arc<DocumentRegistry>,
	/// Live client connections, for shutdown of transports that never
	/// attached a document. Weak so a closed connection can drop.
	connections: Mutex<HashMap<Box<str>, Weak<ClientConnection>>>,
}

impl Server {
	pub fn builder() -> Builder {
		Builder::new()
	}

	pub fn is_closed(&self) -> bool {
		self.app.is_closed()
	}

	/// Names of the currently loaded documents.
	pub fn loaded_documents(&self) -> Vec<Box<str>> {
		self.registry.document_names()
	}

	pub fn has_pending_save(&self, document_name: &str) -> bool {
		self.app.saver.has_pending(document_name)
	}

	/// Accept one transport. Runs the `onConnect` chain (a failure
	/// closes with 4403) and hands back the client connection the
	/// transport glue feeds inbound frames into.
	pub async fn handle_connection(
		&self,
		transport: Arc<dyn Transport>,
		initial_context: Context,
	) -> YrResult<Arc<ClientConnection>> {
		if self.app.is_closed() {
			return Err(Error::ServerClosed);
		}

		let client = ClientConnection::new(
			transport.clone(),
			self.app.clone(),
			self.registry.clone(),
			initial_context,
		);

		let payload = OnConnectPayload {
			connection_id: transport.connection_id().into(),
			remote_address: transport.remote_address().into(),
			context: client.context().clone(),
		};
		if let Err(err) = self.app.hooks.on_connect(&payload).await {
			err.report(self.app.error_handler.as_ref());
			transport.close(transport::CLOSE_AUTH_FAILED, "connection rejected").await;
			return Err(Error::from(err));
		}

		let mut connections = self.connections.lock();
		connections.retain(|_, weak| weak.strong_count() > 0);
		connections.insert(transport.connection_id().into(), Arc::downgrade(&client));
		drop(connections);

		Ok(client)
	}

	/// Shut the server down: refuse new connections, run `onDestroy`,
	/// unload every document (closing its connections with 1001) and
	/// stop the save scheduler. Idempotent.
	pub async fn close(&self) {
		if self.app.closed.swap(true, Ordering::SeqCst) {
			return;
		}
		info!("server closing");

		if let Err(err) = self.app.hooks.on_destroy(&OnDestroyPayload::default()).await {
			err.report(self.app.error_handler.as_ref());
		}

		self.registry.shutdown().await;

		let clients: Vec<Arc<ClientConnection>> = {
			let mut connections = self.connections.lock();
			connections.drain().filter_map(|(_, weak)| weak.upgrade()).collect()
		};
		for client in clients {
			client.close(transport::CLOSE_GOING_AWAY, "server shutting down").await;
		}

		self.app.saver.shutdown();
		info!("server closed");
	}
}

impl std::fmt::Debug for Server {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		f.debug_struct("Server")
			.field("closed", &self.is_closed())
			.field("documents", &self.registry.len())
			.finish_non_exhaustive()
	}
}

// vim: ts=4
