//! Error handling subsystem. Implements the custom Error type shared by
//! the server core, extensions and adapters, plus the error handler
//! capability the server reports non-fatal failures through.

use crate::prelude::*;

pub type YrResult<T> = std::result::Result<T, Error>;

/// Errors produced by the protocol pipeline and its collaborators.
///
/// The type is `Clone` so single-flight load results can be shared
/// between every caller awaiting the same document; external error
/// sources are therefore carried as messages rather than source values.
#[derive(Debug, Clone)]
pub enum Error {
	// Wire protocol
	Truncated,
	MalformedMessage(Box<str>),

	// Input validation and programmer errors
	InvalidArgument(Box<str>),
	ContextFrozen,

	// Authentication / authorization
	Unauthorized,

	// Lifecycle
	DocumentClosed,
	ServerClosed,
	TransportClosed,

	// Collaborators
	Hook {
		extension: Box<str>,
		hook: Box<str>,
		message: Box<str>,
	},
	Engine(Box<str>),
	Storage(Box<str>),

	// System
	Internal(Box<str>),
	Io(Box<str>),
}

impl std::fmt::Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		match self {
			Error::Truncated => write!(f, "message truncated"),
			Error::MalformedMessage(msg) => write!(f, "malformed message: {}", msg),
			Error::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
			Error::ContextFrozen => write!(f, "context is frozen"),
			Error::Unauthorized => write!(f, "unauthorized"),
			Error::DocumentClosed => write!(f, "document is closed"),
			Error::ServerClosed => write!(f, "server is closed"),
			Error::TransportClosed => write!(f, "transport is closed"),
			Error::Hook { extension, hook, message } => {
				write!(f, "extension '{}' failed in {}: {}", extension, hook, message)
			}
			Error::Engine(msg) => write!(f, "engine error: {}", msg),
			Error::Storage(msg) => write!(f, "storage error: {}", msg),
			Error::Internal(msg) => write!(f, "internal error: {}", msg),
			Error::Io(msg) => write!(f, "io error: {}", msg),
		}
	}
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
	fn from(err: std::io::Error) -> Self {
		warn!("io error: {}", err);
		Self::Io(err.to_string().into())
	}
}

impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		warn!("json error: {}", err);
		Self::MalformedMessage(err.to_string().into())
	}
}

/// Sink for failures that must not tear down the host process.
///
/// Injected at server construction; every non-fatal failure (store
/// errors, hook errors outside the load path, protocol errors) ends up
/// in exactly one of these methods.
pub trait ErrorHandler: Send + Sync {
	/// A persistence task for `document_name` failed. The document stays
	/// loaded and the save is not retried.
	fn on_storage_error(&self, document_name: &str, error: &Error);

	/// An extension hook failed outside a fatal path.
	fn on_hook_error(&self, extension: &str, hook: &str, error: &Error);

	/// A per-connection protocol failure (decode, dispatch, send).
	fn on_protocol_error(&self, connection_id: &str, error: &Error);
}

/// Default error handler: reports through `tracing`.
#[derive(Debug, Default)]
pub struct TracingErrorHandler;

impl ErrorHandler for TracingErrorHandler {
	fn on_storage_error(&self, document_name: &str, error: &Error) {
		error!("storage error for document '{}': {}", document_name, error);
	}

	fn on_hook_error(&self, extension: &str, hook: &str, error: &Error) {
		warn!("extension '{}' failed in {}: {}", extension, hook, error);
	}

	fn on_protocol_error(&self, connection_id: &str, error: &Error) {
		warn!("protocol error on connection {}: {}", connection_id, error);
	}
}

// vim: ts=4
