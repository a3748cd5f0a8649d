//! Keyed deduplication of concurrent asynchronous operations.
//!
//! [`SingleFlight::run`] starts the operation for a key only when no call for that key
//! is in flight; every caller that arrives meanwhile awaits the same shared future and
//! receives a clone of its output. The in-flight record is removed by the operation
//! itself as soon as it completes, so the next demand starts a fresh generation.

// std
use std::sync::atomic::{AtomicU64, Ordering};
// crates.io
use futures::future::{BoxFuture, FutureExt, Shared};
// self
use crate::_prelude::*;

type Registry<K, T> = Arc<Mutex<HashMap<K, Flight<T>>>>;

struct Flight<T>
where
	T: Clone,
{
	generation: u64,
	future: Shared<BoxFuture<'static, T>>,
}

/// Collapses concurrent calls with the same key into one execution.
pub struct SingleFlight<K, T>
where
	T: Clone,
{
	flights: Registry<K, T>,
	generations: AtomicU64,
}
impl<K, T> SingleFlight<K, T>
where
	K: 'static + Clone + Eq + Hash + Send,
	T: 'static + Clone + Send + Sync,
{
	/// Creates an empty registry.
	pub fn new() -> Self {
		Self { flights: Default::default(), generations: AtomicU64::new(0) }
	}

	/// Runs `factory()` for `key` unless a call for `key` is already in flight, in which
	/// case the caller joins that call.
	///
	/// The factory is invoked at most once per generation of concurrent demand. Errors
	/// are part of `T` and are delivered to every joined caller unchanged.
	pub async fn run<F, Fut>(&self, key: K, factory: F) -> T
	where
		F: FnOnce() -> Fut,
		Fut: 'static + Future<Output = T> + Send,
	{
		self.join_or_start(key, factory).await
	}

	/// Returns `true` when a call for `key` is currently in flight.
	pub fn is_in_flight(&self, key: &K) -> bool {
		self.flights.lock().contains_key(key)
	}

	/// Number of keys with a call in flight.
	pub fn in_flight(&self) -> usize {
		self.flights.lock().len()
	}

	fn join_or_start<F, Fut>(&self, key: K, factory: F) -> Shared<BoxFuture<'static, T>>
	where
		F: FnOnce() -> Fut,
		Fut: 'static + Future<Output = T> + Send,
	{
		let mut flights = self.flights.lock();

		if let Some(flight) = flights.get(&key) {
			tracing::debug!(generation = flight.generation, "Joining in-flight call.");

			return flight.future.clone();
		}

		let generation = self.generations.fetch_add(1, Ordering::Relaxed);
		let registry = Arc::downgrade(&self.flights);
		let owned_key = key.clone();
		let operation = factory();
		let future = async move {
			let output = operation.await;

			if let Some(registry) = registry.upgrade() {
				let mut flights = registry.lock();

				if flights.get(&owned_key).is_some_and(|f| f.generation == generation) {
					flights.remove(&owned_key);
				}
			}

			output
		}
		.boxed()
		.shared();

		flights.insert(key, Flight { generation, future: future.clone() });

		future
	}
}
impl<K, T> Default for SingleFlight<K, T>
where
	K: 'static + Clone + Eq + Hash + Send,
	T: 'static + Clone + Send + Sync,
{
	fn default() -> Self {
		Self::new()
	}
}
impl<K, T> Debug for SingleFlight<K, T>
where
	T: Clone,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SingleFlight").field("in_flight", &self.flights.lock().len()).finish()
	}
}
