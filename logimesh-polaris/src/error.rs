// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Errors of the discovery and selection path.

use faststr::FastStr;

/// Errors raised while resolving, routing, balancing or reporting.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PolarisError {
    /// The service description is not `namespace:service`.
    #[error("malformed service description: {0}")]
    MalformedDescriptor(FastStr),
    /// The registry has no instance for the service.
    #[error("no instance remains for {0}")]
    NoInstancesAvailable(FastStr),
    /// The registry call itself failed.
    #[error("registry unavailable: {0}")]
    UpstreamUnavailable(FastStr),
    /// The policy router rejected the request.
    #[error("routing failed: {0}")]
    RoutingFailed(FastStr),
    /// The load balancer could not pick an instance.
    #[error("load balancing failed: {0}")]
    BalancingFailed(FastStr),
    /// A call result could not be delivered to the registry.
    #[error("call result reporting failed: {0}")]
    ReportingFailed(FastStr),
    /// The client options could not be loaded.
    #[error("invalid client options: {0}")]
    Config(FastStr),
}

impl PolarisError {
    /// Whether a caller may reasonably retry the operation later.
    pub fn retryable(&self) -> bool {
        matches!(self, PolarisError::NoInstancesAvailable(_) | PolarisError::UpstreamUnavailable(_))
    }
}

/// Result alias of this crate.
pub type Result<T, E = PolarisError> = std::result::Result<T, E>;
