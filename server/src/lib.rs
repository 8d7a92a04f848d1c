//! yrelay: a collaborative editing relay server.
//!
//! Clients connect over a framed binary transport (WebSocket in
//! production), name a document, and exchange Yjs sync and awareness
//! messages. The server owns the authoritative in-memory copy of every
//! open document, fans out incremental updates to the attached peers,
//! keeps a short-lived presence channel, and persists document state
//! through pluggable extensions with debounced scheduling.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub mod awareness;
pub mod conn;
pub mod doc;
pub mod engine;
pub mod extensions;
pub mod hooks;
pub mod prelude;
pub mod saver;
pub mod server;
pub mod settings;
pub mod sync;
pub mod websocket;

pub use crate::server::{Builder, Server};
pub use yrelay_types as types;

use crate::hooks::ExtensionRegistry;
use crate::saver::DebouncedSaver;
use crate::settings::Settings;
use yrelay_types::error::ErrorHandler;

/// Shared server state handed to every component.
pub struct AppState {
	pub settings: Settings,
	pub hooks: ExtensionRegistry,
	pub saver: DebouncedSaver,
	pub error_handler: Arc<dyn ErrorHandler>,
	pub closed: AtomicBool,
}

pub type App = Arc<AppState>;

impl AppState {
	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}
}

// vim: ts=4
