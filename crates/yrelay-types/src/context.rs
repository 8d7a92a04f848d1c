//! Per-connection context carried through the hook chain.
//!
//! The context starts as a mutable copy of the transport-supplied
//! initial values and may be augmented by the `on_connect` and
//! `on_authenticate` hooks. Once authentication completes it is frozen:
//! an immutable snapshot is published and every later reader (change
//! hooks, store hooks, observers) sees exactly that snapshot. Mutation
//! after the freeze fails with `Error::ContextFrozen`.

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::prelude::*;

/// Ordered string → JSON mapping, opaque to the server core.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Context {
	entries: BTreeMap<Box<str>, Value>,
}

impl Context {
	pub fn new() -> Self {
		Self::default()
	}

	/// Builder-style insertion for initial contexts.
	pub fn with(mut self, key: impl Into<Box<str>>, value: impl Into<Value>) -> Self {
		self.entries.insert(key.into(), value.into());
		self
	}

	pub fn get(&self, key: &str) -> Option<&Value> {
		self.entries.get(key)
	}

	pub fn insert(&mut self, key: impl Into<Box<str>>, value: impl Into<Value>) -> Option<Value> {
		self.entries.insert(key.into(), value.into())
	}

	pub fn remove(&mut self, key: &str) -> Option<Value> {
		self.entries.remove(key)
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
		self.entries.iter().map(|(k, v)| (k.as_ref(), v))
	}
}

#[derive(Debug)]
enum CellState {
	Mutable(Context),
	Frozen(Arc<Context>),
}

/// Two-phase context holder: mutable until authentication completes,
/// then a published immutable snapshot. The freeze is the single
/// irrevocable transition of a connection's context lifecycle.
#[derive(Debug)]
pub struct ContextCell {
	state: RwLock<CellState>,
}

impl ContextCell {
	pub fn new(initial: Context) -> Self {
		Self { state: RwLock::new(CellState::Mutable(initial)) }
	}

	/// Insert into the mutable context. Fails with
	/// `Error::ContextFrozen` once the snapshot has been published.
	pub fn insert(&self, key: impl Into<Box<str>>, value: impl Into<Value>) -> YrResult<()> {
		let mut state = self
			.state
			.write()
			.map_err(|_| Error::Internal("context lock poisoned".into()))?;
		match &mut *state {
			CellState::Mutable(ctx) => {
				ctx.insert(key, value);
				Ok(())
			}
			CellState::Frozen(_) => Err(Error::ContextFrozen),
		}
	}

	pub fn get(&self, key: &str) -> Option<Value> {
		let state = self.state.read().ok()?;
		match &*state {
			CellState::Mutable(ctx) => ctx.get(key).cloned(),
			CellState::Frozen(ctx) => ctx.get(key).cloned(),
		}
	}

	/// Copy of the current contents, regardless of phase.
	pub fn snapshot(&self) -> Context {
		match self.state.read() {
			Ok(state) => match &*state {
				CellState::Mutable(ctx) => ctx.clone(),
				CellState::Frozen(ctx) => ctx.as_ref().clone(),
			},
			Err(_) => Context::new(),
		}
	}

	/// Publish the immutable snapshot. Idempotent: a second call
	/// returns the already-published snapshot.
	pub fn freeze(&self) -> YrResult<Arc<Context>> {
		let mut state = self
			.state
			.write()
			.map_err(|_| Error::Internal("context lock poisoned".into()))?;
		match &mut *state {
			CellState::Frozen(ctx) => Ok(ctx.clone()),
			CellState::Mutable(ctx) => {
				let frozen = Arc::new(std::mem::take(ctx));
				*state = CellState::Frozen(frozen.clone());
				Ok(frozen)
			}
		}
	}

	/// The published snapshot, if the freeze already happened.
	pub fn frozen(&self) -> Option<Arc<Context>> {
		let state = self.state.read().ok()?;
		match &*state {
			CellState::Frozen(ctx) => Some(ctx.clone()),
			CellState::Mutable(_) => None,
		}
	}

	pub fn is_frozen(&self) -> bool {
		self.frozen().is_some()
	}
}


// vim: ts=4
