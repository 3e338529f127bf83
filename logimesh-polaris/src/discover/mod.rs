// Modifications Copyright Andeya Lee 2024
// Based on original source code from Volo Contributors licensed under MIT OR Apache-2.0
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! Service discovery: resolving a service description into instances and following
//! its changes.

use crate::net::Address;
use faststr::FastStr;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub mod codec;
mod instance;
mod resolver;

pub use instance::Instance;
pub use resolver::{PolarisResolver, Resolver, WatchStream};

/// Discovery is the result of resolving a service description.
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    /// Stable key of the result, the service description for registry results.
    pub cache_key: FastStr,
    /// Whether the result may be cached by `cache_key` and reused across calls.
    pub cacheable: bool,
    /// The instances, in registry order.
    pub instances: Vec<Arc<Instance>>,
}

impl Discovery {
    /// Creates a cacheable result.
    pub fn cacheable(cache_key: FastStr, instances: Vec<Arc<Instance>>) -> Self {
        Self {
            cache_key,
            cacheable: true,
            instances,
        }
    }
}

/// Change indicates the change of the service discover.
///
/// Change contains the difference between the current discovery result and the previous one.
/// `result` always carries the complete post-change instance set, so a consumer may treat a
/// change either as a delta or as a full refresh.
#[derive(Debug, Clone, Default)]
pub struct Change {
    /// the post-change result
    pub result: Discovery,
    /// instances that appeared
    pub added: Vec<Arc<Instance>>,
    /// instances whose weight, tags or health changed
    pub updated: Vec<Arc<Instance>>,
    /// instances that disappeared
    pub removed: Vec<Arc<Instance>>,
}

/// [`diff`] compares `prev` and `next` by instance address.
///
/// An instance present in both with a different weight, tags or health state is reported
/// as updated, never as a removal plus an addition.
///
/// The bool in the return value indicates whether there's diff between prev and next. If it
/// is false, the [`Change`] should be ignored.
pub fn diff(cache_key: &FastStr, prev: &Discovery, next: &Discovery) -> (Change, bool) {
    let mut added = Vec::new();
    let mut updated = Vec::new();
    let mut removed = Vec::new();

    let prev_map: HashMap<&Address, &Arc<Instance>> = prev.instances.iter().map(|i| (&i.address, i)).collect();
    let next_set: HashSet<&Address> = next.instances.iter().map(|i| &i.address).collect();

    for i in &next.instances {
        match prev_map.get(&i.address) {
            None => added.push(i.clone()),
            Some(p) if !p.same_state(i) => updated.push(i.clone()),
            Some(_) => {},
        }
    }
    for i in &prev.instances {
        if !next_set.contains(&i.address) {
            removed.push(i.clone());
        }
    }

    let changed = !added.is_empty() || !updated.is_empty() || !removed.is_empty();
    let result = Discovery {
        cache_key: cache_key.clone(),
        cacheable: next.cacheable,
        instances: next.instances.clone(),
    };
    (Change { result, added, updated, removed }, changed)
}
