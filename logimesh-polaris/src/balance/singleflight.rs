// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Duplicate call suppression.

use dashmap::DashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// [`SingleFlight`] runs at most one computation per key at a time.
///
/// Concurrent callers of [`SingleFlight::work`] with the same key share the output of the
/// first caller's computation. Once it completes the key is forgotten, so a later call
/// computes again.
pub struct SingleFlight<K, V> {
    calls: DashMap<K, Arc<OnceCell<V>>>,
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Hash + Eq,
{
    fn default() -> Self {
        Self { calls: DashMap::new() }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Creates an empty group.
    pub fn new() -> Self {
        Self { calls: DashMap::new() }
    }

    /// Runs `f` unless a computation for `key` is already in flight, in which case its output
    /// is awaited instead.
    ///
    /// If the computing caller is dropped before completion, one of the waiters takes over.
    pub async fn work<F, Fut>(&self, key: K, f: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        let call = self.calls.entry(key.clone()).or_insert_with(|| Arc::new(OnceCell::new())).value().clone();
        let value = call.get_or_init(f).await.clone();
        self.calls.remove_if(&key, |_, c| Arc::ptr_eq(c, &call));
        value
    }

    /// Number of computations in flight.
    pub fn in_flight(&self) -> usize {
        self.calls.len()
    }
}
