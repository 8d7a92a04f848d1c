//! Debounced per-document persistence scheduler.
//!
//! Each document name holds at most one pending save. A new schedule
//! during the quiet period resets the debounce timer but never pushes
//! the fire time past `first_scheduled_at + max_debounce`, so a busy
//! document still hits storage within the hard cap. The latest task
//! replaces any earlier one for the same name. Saves for one name are
//! strictly serialized through a per-name async mutex; saves for
//! different names run freely in parallel. `save_now` cancels the
//! pending timer and runs under the same mutex, so it waits for an
//! in-flight timed save of the same name.
//!
//! Task failures are reported to the error handler and never cancel
//! future schedules.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::prelude::*;

/// A persistence task. Re-reads whatever it stores at fire time, so a
/// task scheduled early still persists every change that accumulated
/// until the timer fired.
pub type SaveTask =
	Arc<dyn Fn() -> futures::future::BoxFuture<'static, YrResult<()>> + Send + Sync>;

struct PendingSave {
	task: SaveTask,
	first_at: Instant,
	generation: u64,
	timer: JoinHandle<()>,
}

struct SaverInner {
	debounce: Duration,
	max_debounce: Duration,
	error_handler: Arc<dyn ErrorHandler>,
	entries: Mutex<HashMap<Box<str>, PendingSave>>,
	locks: Mutex<HashMap<Box<str>, Arc<tokio::sync::Mutex<()>>>>,
	next_generation: AtomicU64,
	closed: AtomicBool,
}

impl SaverInner {
	fn lock_for(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
		let mut locks = self.locks.lock();
		locks.entry(name.into()).or_default().clone()
	}

	async fn fire(self: Arc<Self>, name: Box<str>, generation: u64) {
		let task = {
			let mut entries = self.entries.lock();
			// A newer schedule or save_now may have superseded this timer.
			let current =
				entries.get(&name).is_some_and(|pending| pending.generation == generation);
			if current { entries.remove(&name).map(|pending| pending.task) } else { None }
		};
		let Some(task) = task else { return };
		self.run(&name, task).await;
	}

	async fn run(&self, name: &str, task: SaveTask) {
		let lock = self.lock_for(name);
		let _guard = lock.lock().await;
		if let Err(err) = task().await {
			self.error_handler.on_storage_error(name, &err);
		}
	}
}

pub struct DebouncedSaver {
	inner: Arc<SaverInner>,
}

impl DebouncedSaver {
	pub fn new(
		debounce: Duration,
		max_debounce: Duration,
		error_handler: Arc<dyn ErrorHandler>,
	) -> Self {
		Self {
			inner: Arc::new(SaverInner {
				debounce,
				max_debounce,
				error_handler,
				entries: Mutex::new(HashMap::new()),
				locks: Mutex::new(HashMap::new()),
				next_generation: AtomicU64::new(0),
				closed: AtomicBool::new(false),
			}),
		}
	}

	/// Schedule (or re-schedule) the save for `name`. The effective
	/// fire time is `min(now + debounce, first_scheduled_at + max_debounce)`.
	pub fn schedule(&self, name: &str, task: SaveTask) {
		let mut entries = self.inner.entries.lock();
		if self.inner.closed.load(Ordering::SeqCst) {
			return;
		}
		let now = Instant::now();
		let first_at = match entries.remove(name) {
			Some(previous) => {
				previous.timer.abort();
				previous.first_at
			}
			None => now,
		};
		let fire_at = std::cmp::min(now + self.inner.debounce, first_at + self.inner.max_debounce);
		let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);

		let timer = tokio::spawn({
			let inner = self.inner.clone();
			let name: Box<str> = name.into();
			async move {
				tokio::time::sleep_until(fire_at).await;
				inner.fire(name, generation).await;
			}
		});
		entries.insert(name.into(), PendingSave { task, first_at, generation, timer });
	}

	/// Cancel any pending timer for `name` and run `task` right away,
	/// serialized against an in-flight save for the same name.
	pub async fn save_now(&self, name: &str, task: SaveTask) -> YrResult<()> {
		{
			let mut entries = self.inner.entries.lock();
			if let Some(previous) = entries.remove(name) {
				previous.timer.abort();
			}
		}
		let lock = self.inner.lock_for(name);
		let _guard = lock.lock().await;
		let result = task().await;
		if let Err(err) = &result {
			self.inner.error_handler.on_storage_error(name, err);
		}
		result
	}

	pub fn has_pending(&self, name: &str) -> bool {
		self.inner.entries.lock().contains_key(name)
	}

	pub fn pending_count(&self) -> usize {
		self.inner.entries.lock().len()
	}

	/// Stop accepting schedules and abort every pending timer.
	pub fn shutdown(&self) {
		self.inner.closed.store(true, Ordering::SeqCst);
		let mut entries = self.inner.entries.lock();
		for (_, pending) in entries.drain() {
			pending.timer.abort();
		}
	}
}


// vim: ts=4
