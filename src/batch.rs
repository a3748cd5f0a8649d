//! Time-windowed batching of independent writes.
//!
//! The first [`BatchCoordinator::add`] for a key opens a window and arms its timer. Items
//! that arrive while the window is open join it until the timer fires or the window
//! reaches `max_batch_size`; the window is then handed to the [`BatchHandler`] as one
//! list in arrival order, and every caller receives the result at its own position.
//! A handler failure rejects every item of the window with the same [`BatchFlushError`].

// std
use std::sync::atomic::{AtomicU64, Ordering};
// crates.io
use tokio::{sync::oneshot, task::JoinHandle};
// self
use crate::{
	_prelude::*,
	clock,
	config::BatchConfig,
	error::ConfigError,
	obs::{self, CoreOp, OpOutcome},
};

/// Boxed future returned by [`BatchHandler::flush`].
pub type BatchFuture<'a, O> = Pin<Box<dyn Future<Output = Result<Vec<Result<O>>>> + 'a + Send>>;

type Reply<O> = oneshot::Sender<Result<O>>;

/// Sends one window of items upstream.
pub trait BatchHandler<K, I, O>
where
	Self: Send + Sync,
{
	/// Flushes `items` collected under `key`.
	///
	/// Must return exactly one result per item, in the order received. Returning `Err`
	/// rejects the whole window.
	fn flush<'a>(&'a self, key: &'a K, items: Vec<I>) -> BatchFuture<'a, O>;
}

/// Failure shared by every item of one window.
#[derive(Clone, Debug, ThisError)]
pub enum BatchFlushError {
	/// The handler failed for the whole window.
	#[error("Batch flush handler failed: {source}")]
	Handler {
		/// Handler error, shared by every rejected item.
		#[source]
		source: Arc<Error>,
	},
	/// The handler returned a different number of results than items it received.
	#[error("Batch flush handler returned {returned} results for {expected} items.")]
	CountMismatch {
		/// Items passed to the handler.
		expected: usize,
		/// Results returned by the handler.
		returned: usize,
	},
	/// The coordinator was dropped before the window flushed.
	#[error("Batch window was dropped before it flushed.")]
	Abandoned,
}

struct Window<I, O> {
	id: u64,
	items: Vec<I>,
	replies: Vec<Reply<O>>,
	timer: Option<JoinHandle<()>>,
}
impl<I, O> Window<I, O> {
	// The timer task flushes its own window and must not abort itself.
	fn without_timer(mut self) -> Self {
		self.timer = None;

		self
	}
}

struct BatchInner<K, I, O> {
	config: BatchConfig,
	handler: Arc<dyn BatchHandler<K, I, O>>,
	windows: Mutex<HashMap<K, Window<I, O>>>,
	next_id: AtomicU64,
}
impl<K, I, O> BatchInner<K, I, O>
where
	K: 'static + Clone + Eq + Hash + Debug + Send + Sync,
	I: 'static + Send,
	O: 'static + Send,
{
	fn take_window(&self, key: &K, id: u64) -> Option<Window<I, O>> {
		let mut windows = self.windows.lock();

		if windows.get(key).is_some_and(|w| w.id == id) { windows.remove(key) } else { None }
	}

	async fn run_flush(&self, key: K, window: Window<I, O>) {
		let Window { id, items, replies, timer } = window;

		// Size-triggered and forced flushes must not race the pending timer.
		if let Some(timer) = timer {
			timer.abort();
		}

		let expected = items.len();

		tracing::debug!(?key, window = id, items = expected, "Flushing batch window.");
		obs::record_outcome(CoreOp::Batch, OpOutcome::Attempt);

		match self.handler.flush(&key, items).await {
			Ok(results) if results.len() == expected => {
				obs::record_outcome(CoreOp::Batch, OpOutcome::Success);

				for (reply, result) in replies.into_iter().zip(results) {
					let _ = reply.send(result);
				}
			},
			Ok(results) => {
				tracing::warn!(
					?key,
					window = id,
					expected,
					returned = results.len(),
					"Batch handler returned a mismatched result count."
				);

				reject_all(replies, BatchFlushError::CountMismatch { expected, returned: results.len() });
			},
			Err(err) => {
				tracing::warn!(?key, window = id, error = %err, "Batch handler failed.");

				reject_all(replies, BatchFlushError::Handler { source: Arc::new(err) });
			},
		}
	}
}
impl<K, I, O> Drop for BatchInner<K, I, O> {
	fn drop(&mut self) {
		for window in self.windows.get_mut().values_mut() {
			if let Some(timer) = window.timer.take() {
				timer.abort();
			}
		}
	}
}

/// Keyed batch coordinator; cheap to clone.
pub struct BatchCoordinator<K, I, O> {
	inner: Arc<BatchInner<K, I, O>>,
}
impl<K, I, O> BatchCoordinator<K, I, O>
where
	K: 'static + Clone + Eq + Hash + Debug + Send + Sync,
	I: 'static + Send,
	O: 'static + Send,
{
	/// Creates a coordinator that flushes windows through `handler`.
	pub fn new(
		config: BatchConfig,
		handler: Arc<dyn BatchHandler<K, I, O>>,
	) -> Result<Self, ConfigError> {
		config.validate()?;

		Ok(Self {
			inner: Arc::new(BatchInner {
				config,
				handler,
				windows: Default::default(),
				next_id: AtomicU64::new(0),
			}),
		})
	}

	/// Adds `item` to the open window for `key` and waits for its individual result.
	///
	/// Must be called within a Tokio runtime; window timers and size-triggered flushes
	/// run as spawned tasks.
	pub async fn add(&self, key: K, item: I) -> Result<O> {
		let (reply, receiver) = oneshot::channel();
		let full = {
			let mut windows = self.inner.windows.lock();
			let window = windows.entry(key.clone()).or_insert_with(|| self.open_window(&key));

			window.items.push(item);
			window.replies.push(reply);

			if window.items.len() >= self.inner.config.max_batch_size {
				windows.remove(&key)
			} else {
				None
			}
		};

		if let Some(window) = full {
			let inner = self.inner.clone();

			tokio::spawn(async move { inner.run_flush(key, window).await });
		}

		receiver.await.map_err(|_| BatchFlushError::Abandoned)?
	}

	/// Flushes every open window immediately and waits until each caller was answered.
	pub async fn flush(&self) {
		let windows = self.inner.windows.lock().drain().collect::<Vec<_>>();

		if windows.is_empty() {
			return;
		}

		tracing::debug!(windows = windows.len(), "Forcing batch flush.");

		futures::future::join_all(
			windows.into_iter().map(|(key, window)| self.inner.run_flush(key, window)),
		)
		.await;
	}

	/// Items waiting in the open window for `key`.
	pub fn pending(&self, key: &K) -> usize {
		self.inner.windows.lock().get(key).map_or(0, |w| w.items.len())
	}

	/// Number of windows currently open.
	pub fn open_windows(&self) -> usize {
		self.inner.windows.lock().len()
	}

	fn open_window(&self, key: &K) -> Window<I, O> {
		let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
		let weak = Arc::downgrade(&self.inner);
		let owned_key = key.clone();
		let delay = clock::to_std(self.inner.config.window);
		let timer = tokio::spawn(async move {
			tokio::time::sleep(delay).await;

			let Some(inner) = weak.upgrade() else { return };

			if let Some(window) = inner.take_window(&owned_key, id) {
				inner.run_flush(owned_key, window.without_timer()).await;
			}
		});

		Window { id, items: Vec::new(), replies: Vec::new(), timer: Some(timer) }
	}
}
impl<K, I, O> Clone for BatchCoordinator<K, I, O> {
	fn clone(&self) -> Self {
		Self { inner: self.inner.clone() }
	}
}
impl<K, I, O> Debug for BatchCoordinator<K, I, O> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("BatchCoordinator")
			.field("config", &self.inner.config)
			.field("open_windows", &self.inner.windows.lock().len())
			.finish()
	}
}

fn reject_all<O>(replies: Vec<Reply<O>>, err: BatchFlushError) {
	obs::record_outcome(CoreOp::Batch, OpOutcome::Failure);

	for reply in replies {
		let _ = reply.send(Err(err.clone().into()));
	}
}
