//! Shared types and capability traits for the yrelay collaborative
//! editing server.
//!
//! This crate contains everything the server core and extension/adapter
//! crates have to agree on: the wire codec and message envelope, the
//! context with its mutable/frozen phases, the `DocumentEngine`,
//! `Transport`, `Extension` and `ErrorHandler` capabilities, and the
//! common error type. Extracting these into a separate crate lets
//! adapter crates compile against the contracts without pulling in the
//! server itself.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

pub mod codec;
pub mod context;
pub mod engine;
pub mod error;
pub mod extension;
pub mod prelude;
pub mod protocol;
pub mod transport;

// vim: ts=4
