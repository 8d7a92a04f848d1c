//! Extensions shipped with the server.

pub mod logger;

pub use logger::Logger;

// vim: ts=4
