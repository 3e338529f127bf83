// Modifications Copyright Andeya Lee 2024
// Based on original source code from Volo Contributors licensed under MIT OR Apache-2.0
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! Endpoint information of the callee, as seen by the service discoverer.

use crate::net::Address;
use faststr::FastStr;
use metainfo::FastStrMap;
use std::fmt::Debug;

const DEFAULT_MAP_CAPACITY: usize = 10;

/// Endpoint contains the information of the service.
#[derive(Debug, Default)]
pub struct Endpoint {
    /// `service_name` is the most important information, which is used by the service discovering.
    pub service_name: FastStr,
    /// address of the instance chosen for the current call
    pub address: Option<Address>,
    /// `tags` is used to store additional information of the endpoint.
    ///
    /// Tags are keyed by marker types, such as [`crate::config::DstNamespace`] or
    /// [`crate::config::InstanceId`].
    pub tags: FastStrMap,
}

impl Endpoint {
    /// Creates a new endpoint info.
    #[inline]
    pub fn new(service_name: impl Into<FastStr>) -> Self {
        Self {
            service_name: service_name.into(),
            address: None,
            tags: FastStrMap::with_capacity(DEFAULT_MAP_CAPACITY),
        }
    }

    /// Gets the service name of the endpoint.
    #[inline]
    pub fn service_name_ref(&self) -> &str {
        &self.service_name
    }

    /// Returns service name
    #[inline]
    pub fn service_name(&self) -> FastStr {
        self.service_name.clone()
    }

    /// Insert a tag into this `Endpoint`.
    #[inline]
    pub fn insert<T: Send + Sync + 'static>(&mut self, val: FastStr) {
        self.tags.insert::<T>(val);
    }

    /// Insert a tag, returning `self` for chaining.
    #[inline]
    pub fn with_tag<T: Send + Sync + 'static>(mut self, val: FastStr) -> Self {
        self.insert::<T>(val);
        self
    }

    /// Check if `Endpoint` tags contain entry
    #[inline]
    pub fn contains<T: 'static>(&self) -> bool {
        self.tags.contains::<T>()
    }

    /// Get a reference to a tag previously inserted on this `Endpoint`.
    #[inline]
    pub fn get<T: 'static>(&self) -> Option<&FastStr> {
        self.tags.get::<T>()
    }

    /// Sets the address.
    #[inline]
    pub fn set_address(&mut self, address: Address) {
        self.address = Some(address)
    }

    /// Gets the address.
    #[inline]
    pub fn address(&self) -> Option<Address> {
        self.address.clone()
    }
}
