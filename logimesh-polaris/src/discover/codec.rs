// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Service description codec.
//!
//! A description is `namespace:service`. It is both the watch target and the balancer's
//! cache key. Decoding splits at the first separator, so a service name may contain `:`
//! while a namespace may not.

use crate::config::DESCRIPTION_SEPARATOR;
use crate::error::{PolarisError, Result};
use crate::registry::ServiceKey;
use faststr::FastStr;

/// Composes the description of `service` in `namespace`.
pub fn encode(namespace: &str, service: &str) -> FastStr {
    debug_assert!(!namespace.contains(DESCRIPTION_SEPARATOR), "namespace {namespace:?} contains the description separator");
    let mut desc = String::with_capacity(namespace.len() + service.len() + 1);
    desc.push_str(namespace);
    desc.push(DESCRIPTION_SEPARATOR);
    desc.push_str(service);
    FastStr::from_string(desc)
}

/// Splits a description into `(namespace, service)`.
pub fn decode(desc: &str) -> Result<(FastStr, FastStr)> {
    match desc.split_once(DESCRIPTION_SEPARATOR) {
        Some((namespace, service)) => Ok((FastStr::new(namespace), FastStr::new(service))),
        None => Err(PolarisError::MalformedDescriptor(FastStr::new(desc))),
    }
}

impl ServiceKey {
    /// Decodes a service key from its description.
    pub fn from_description(desc: &str) -> Result<Self> {
        let (namespace, service) = decode(desc)?;
        Ok(Self { namespace, service })
    }

    /// The description of this key.
    pub fn description(&self) -> FastStr {
        encode(&self.namespace, &self.service)
    }
}
