//! Server configuration.

use std::sync::Arc;
use std::time::Duration;

use crate::engine::YrsEngine;
use crate::prelude::*;
use yrelay_types::engine::DocumentEngine;

/// Constructor for the engine handle backing a freshly loaded document.
pub type EngineFactory = Arc<dyn Fn() -> Arc<dyn DocumentEngine> + Send + Sync>;

/// Tunable server options. Built through [`crate::Builder`].
#[derive(Clone)]
pub struct Settings {
	/// Quiet period before a scheduled save fires.
	pub debounce: Duration,
	/// Hard cap on save latency since the first schedule of a burst.
	pub max_debounce: Duration,
	/// How long an unloading document waits for straggling connections.
	pub unload_grace: Duration,
	/// Worker threads the embedding binary should give the runtime.
	pub scheduler_threads: usize,
	/// Engine constructor; defaults to the yrs-backed engine.
	pub engine_factory: EngineFactory,
}

impl Default for Settings {
	fn default() -> Self {
		Self {
			debounce: Duration::from_secs(2),
			max_debounce: Duration::from_secs(10),
			unload_grace: Duration::from_secs(5),
			scheduler_threads: 2,
			engine_factory: Arc::new(|| Arc::new(YrsEngine::new()) as Arc<dyn DocumentEngine>),
		}
	}
}

impl Settings {
	pub fn validate(&self) -> YrResult<()> {
		if self.debounce.is_zero() {
			return Err(Error::InvalidArgument("debounce must be non-zero".into()));
		}
		if self.max_debounce < self.debounce {
			return Err(Error::InvalidArgument("max_debounce must be >= debounce".into()));
		}
		Ok(())
	}
}

impl std::fmt::Debug for Settings {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		f.debug_struct("Settings")
			.field("debounce", &self.debounce)
			.field("max_debounce", &self.max_debounce)
			.field("unload_grace", &self.unload_grace)
			.field("scheduler_threads", &self.scheduler_threads)
			.finish_non_exhaustive()
	}
}

// vim: ts=4
