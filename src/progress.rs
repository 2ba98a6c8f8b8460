//! Progress reporting for crawls and batches.
//!
//! Observers implement [`ProgressSink`] and are registered on a
//! [`ProgressNotifier`]. Every event is delivered synchronously to every
//! observer, in the order they subscribed.

use chrono::{DateTime, Local};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// A human-readable progress message stamped with the time it was emitted
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub timestamp: DateTime<Local>,
    pub message: String,
}

impl ProgressEvent {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}",
            self.timestamp.format("%d/%m/%y %H:%M"),
            self.message
        )
    }
}

/// Receives progress events
pub trait ProgressSink: Send + Sync {
    fn notify(&self, event: &ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn notify(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// Forwards progress events to the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ProgressSink for LogSink {
    fn notify(&self, event: &ProgressEvent) {
        ::log::info!("{}", event.message);
    }
}

/// Handle returned by [`ProgressNotifier::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Ordered registry of progress observers
#[derive(Default)]
pub struct ProgressNotifier {
    observers: RwLock<Vec<(SubscriptionId, Arc<dyn ProgressSink>)>>,
    next_id: AtomicU64,
}

impl ProgressNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer. It receives every event emitted after this call.
    pub fn subscribe(&self, sink: Arc<dyn ProgressSink>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.write_observers().push((id, sink));
        id
    }

    /// Remove an observer. Returns `false` if the id was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.write_observers();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    pub fn observer_count(&self) -> usize {
        self.read_observers().len()
    }

    /// Emit a message to every observer in registration order
    pub fn notify(&self, message: impl Into<String>) {
        let event = ProgressEvent::new(message);
        ::log::debug!("progress: {}", event.message);

        // Snapshot first so an observer may (un)subscribe without deadlocking
        let observers: Vec<Arc<dyn ProgressSink>> = self
            .read_observers()
            .iter()
            .map(|(_, sink)| Arc::clone(sink))
            .collect();

        for observer in observers {
            observer.notify(&event);
        }
    }

    fn read_observers(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, Vec<(SubscriptionId, Arc<dyn ProgressSink>)>> {
        self.observers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_observers(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, Vec<(SubscriptionId, Arc<dyn ProgressSink>)>> {
        self.observers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for ProgressNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressNotifier")
            .field("observers", &self.observer_count())
            .finish()
    }
}

/// A notifier can itself be subscribed to another notifier
impl ProgressSink for ProgressNotifier {
    fn notify(&self, event: &ProgressEvent) {
        ProgressNotifier::notify(self, event.message.clone());
    }
}
