// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! net tool

use faststr::FastStr;
use std::fmt;

/// Network address of a service instance, displayed as `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    host: FastStr,
    port: u16,
}

impl Address {
    /// Creates an address.
    pub fn new(host: impl Into<FastStr>, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    /// Host part.
    #[inline]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port part.
    #[inline]
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
