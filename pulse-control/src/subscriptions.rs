//! Reference-counted metric subscriptions

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::SubscriptionError;

/// Join a metric namespace into its registry key
pub fn metric_key<S: AsRef<str>>(namespace: &[S]) -> String {
    namespace
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(".")
}

/// Subscriber counts per metric key
///
/// Each increment or decrement happens under a single lock, so concurrent
/// callers always observe distinct counts.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    counts: Mutex<HashMap<String, u64>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber, returns the new count
    pub fn subscribe(&self, key: &str) -> u64 {
        self.subscribe_with(key, |_| {})
    }

    /// Add a subscriber and hand the new count to `on_change` before the
    /// lock is released
    ///
    /// Callbacks for the same registry run in the order the counts changed.
    /// `on_change` must not call back into the registry.
    pub fn subscribe_with<F: FnOnce(u64)>(&self, key: &str, on_change: F) -> u64 {
        let mut counts = self.counts.lock();
        let count = counts.entry(key.to_string()).or_insert(0);
        *count += 1;
        let count = *count;
        on_change(count);
        count
    }

    /// Remove a subscriber, returns the new count
    ///
    /// Removing from a key with no subscribers is an error; the count is
    /// left untouched.
    pub fn unsubscribe(&self, key: &str) -> Result<u64, SubscriptionError> {
        self.unsubscribe_with(key, |_| {})
    }

    /// Remove a subscriber, calling `on_change` under the lock
    ///
    /// `on_change` is not called on underflow.
    pub fn unsubscribe_with<F: FnOnce(u64)>(
        &self,
        key: &str,
        on_change: F,
    ) -> Result<u64, SubscriptionError> {
        let mut counts = self.counts.lock();
        match counts.get_mut(key) {
            Some(count) if *count > 0 => {
                *count -= 1;
                let count = *count;
                on_change(count);
                Ok(count)
            }
            _ => Err(SubscriptionError::Underflow {
                key: key.to_string(),
            }),
        }
    }

    /// Current count for a key (0 when never subscribed)
    pub fn count(&self, key: &str) -> u64 {
        self.counts.lock().get(key).copied().unwrap_or(0)
    }

    /// Keys with at least one subscriber
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .counts
            .lock()
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Number of keys with at least one subscriber
    pub fn len(&self) -> usize {
        self.counts.lock().values().filter(|c| **c > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
