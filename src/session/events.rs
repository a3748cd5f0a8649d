//! Observer registry for session lifecycle events.

// std
use std::sync::atomic::{AtomicU64, Ordering};
// self
use crate::_prelude::*;

type Listener = Arc<dyn Fn(&AuthEvent) + Send + Sync>;

/// Session lifecycle notifications.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthEvent {
	/// A new credential pair was stored.
	TokensUpdated {
		/// Expiry of the stored access token.
		access_expires_at: OffsetDateTime,
	},
	/// The session was cleared on request.
	LoggedOut,
	/// Refresh failed definitively; credentials were cleared and the user must log in again.
	AuthError,
}

/// Handle returned by [`AuthCoordinator::subscribe`](crate::session::AuthCoordinator::subscribe).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
pub(crate) struct Listeners {
	next_id: AtomicU64,
	entries: RwLock<Vec<(ListenerId, Listener)>>,
}
impl Listeners {
	pub(crate) fn subscribe(&self, listener: Listener) -> ListenerId {
		let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));

		self.entries.write().push((id, listener));

		id
	}

	pub(crate) fn unsubscribe(&self, id: ListenerId) -> bool {
		let mut entries = self.entries.write();
		let before = entries.len();

		entries.retain(|(existing, _)| *existing != id);

		entries.len() != before
	}

	/// Invokes every listener synchronously, in subscription order.
	///
	/// The registry lock is released first so listeners may subscribe or unsubscribe.
	pub(crate) fn emit(&self, event: &AuthEvent) {
		let snapshot =
			self.entries.read().iter().map(|(_, listener)| listener.clone()).collect::<Vec<_>>();

		tracing::debug!(?event, listeners = snapshot.len(), "Emitting session event.");

		for listener in snapshot {
			listener(event);
		}
	}

	pub(crate) fn len(&self) -> usize {
		self.entries.read().len()
	}
}
impl Debug for Listeners {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Listeners").field("len", &self.len()).finish()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn unsubscribed_listeners_stop_receiving() {
		let listeners = Listeners::default();
		let seen = Arc::new(Mutex::new(Vec::new()));
		let id = listeners.subscribe({
			let seen = seen.clone();

			Arc::new(move |event: &AuthEvent| seen.lock().push(event.clone()))
		});

		listeners.emit(&AuthEvent::LoggedOut);

		assert!(listeners.unsubscribe(id));
		assert!(!listeners.unsubscribe(id));

		listeners.emit(&AuthEvent::AuthError);

		assert_eq!(*seen.lock(), vec![AuthEvent::LoggedOut]);
	}

	#[test]
	fn listeners_may_unsubscribe_themselves() {
		let listeners = Arc::new(Listeners::default());
		let slot = Arc::new(Mutex::new(None));
		let id = listeners.subscribe({
			let listeners = Arc::downgrade(&listeners);
			let slot = slot.clone();

			Arc::new(move |_: &AuthEvent| {
				if let (Some(listeners), Some(id)) = (listeners.upgrade(), *slot.lock()) {
					listeners.unsubscribe(id);
				}
			})
		});

		*slot.lock() = Some(id);
		listeners.emit(&AuthEvent::AuthError);

		assert_eq!(listeners.len(), 0);
	}
}
