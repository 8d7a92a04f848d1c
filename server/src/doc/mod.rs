//! Document lifecycle: the in-memory record and the registry that owns
//! all records by name.

pub mod record;
pub mod registry;

pub use record::{DocState, DocumentRecord};
pub use registry::DocumentRegistry;

// vim: ts=4
