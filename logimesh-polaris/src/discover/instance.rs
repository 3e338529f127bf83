// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Mapping between registry records and framework instances.

use crate::config::{ClientOptions, DEFAULT_WEIGHT};
use crate::net::Address;
use crate::registry::RegistryInstance;
use faststr::FastStr;
use std::collections::HashMap;
use std::sync::Arc;

/// [`Instance`] contains information of an instance from the target service.
///
/// It wraps the registry record it was built from, so the record stays reachable for
/// routing and call result reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    /// service address
    pub address: Address,
    /// service weight
    pub weight: u32,
    /// service tags extension
    pub tags: HashMap<String, String>,
    raw: Arc<RegistryInstance>,
    options: Arc<ClientOptions>,
}

impl Instance {
    /// Wraps a registry record.
    pub fn from_registry(raw: Arc<RegistryInstance>, options: Arc<ClientOptions>) -> Self {
        let weight = if raw.weight == 0 { DEFAULT_WEIGHT } else { raw.weight };
        Self {
            address: raw.address(),
            weight,
            tags: raw.metadata.clone(),
            raw,
            options,
        }
    }

    /// Registry id of the instance.
    #[inline]
    pub fn id(&self) -> &FastStr {
        &self.raw.id
    }

    /// The registry record this instance was built from.
    #[inline]
    pub fn registry_instance(&self) -> &Arc<RegistryInstance> {
        &self.raw
    }

    /// Routing options of the client that discovered this instance.
    #[inline]
    pub fn options(&self) -> &Arc<ClientOptions> {
        &self.options
    }

    /// Whether `other` describes the same state of the same instance.
    pub(crate) fn same_state(&self, other: &Instance) -> bool {
        self.weight == other.weight && self.tags == other.tags && self.raw.healthy == other.raw.healthy && self.raw.isolated == other.raw.isolated
    }
}

impl From<Instance> for Arc<RegistryInstance> {
    fn from(instance: Instance) -> Self {
        instance.raw
    }
}
