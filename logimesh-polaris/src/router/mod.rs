// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! The two selection stages run by a picker: a policy router narrowing the candidates,
//! then a load balancing policy choosing one of them.

use crate::config::ClientOptions;
use crate::error::Result;
use crate::registry::RegistryInstance;
use std::sync::Arc;

mod metadata;
mod weighted;
pub use metadata::MetadataRouter;
pub use weighted::WeightedRandom;

/// Inputs of one routing decision.
#[derive(Debug, Clone, Copy)]
pub struct RouteRequest<'a> {
    /// namespace of the destination service
    pub namespace: &'a str,
    /// name of the destination service
    pub service: &'a str,
    /// candidate instances
    pub instances: &'a [Arc<RegistryInstance>],
    /// source identity and metadata of the caller
    pub options: &'a ClientOptions,
    /// the method being called
    pub method: &'a str,
}

/// [`PolicyRouter`] filters the candidate instances of a call.
pub trait PolicyRouter: Send + Sync + 'static {
    /// Appends the instances that may serve `request` to `out`.
    fn filter_instances(&self, request: &RouteRequest<'_>, out: &mut Vec<Arc<RegistryInstance>>) -> Result<()>;
}

/// [`LoadBalancePolicy`] picks one instance among routed candidates.
pub trait LoadBalancePolicy: Send + Sync + 'static {
    /// Picks one instance.
    fn pick_one(&self, instances: &[Arc<RegistryInstance>]) -> Result<Arc<RegistryInstance>>;
    /// Policy name, such as `weightedRandom`.
    fn name(&self) -> &'static str;
}
