//! Connection handling: the per-transport client connection and the
//! per-(client, document) dispatcher it multiplexes.

pub mod client;
pub mod document;

pub use client::ClientConnection;
pub use document::DocumentConnection;

// vim: ts=4
