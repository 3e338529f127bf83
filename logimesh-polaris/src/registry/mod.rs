// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! Contracts of the service registry consumed by the resolver, the balancer and the reporter.
//!
//! The registry handle is created once by the process entry point and injected into every
//! component that needs it, so tests can substitute [`MemoryRegistry`].

use crate::config::{DEFAULT_WEIGHT, DESCRIPTION_SEPARATOR};
use crate::error::Result;
use crate::net::Address;
use faststr::FastStr;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

mod memory;
pub use memory::MemoryRegistry;

/// Identifies a service inside the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ServiceKey {
    /// namespace of the service
    pub namespace: FastStr,
    /// service name
    pub service: FastStr,
}

impl ServiceKey {
    /// Creates a service key.
    pub fn new(namespace: impl Into<FastStr>, service: impl Into<FastStr>) -> Self {
        Self {
            namespace: namespace.into(),
            service: service.into(),
        }
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.namespace, DESCRIPTION_SEPARATOR, self.service)
    }
}

/// An instance record as the registry knows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryInstance {
    /// registry id of the instance
    pub id: FastStr,
    /// namespace of the owning service
    pub namespace: FastStr,
    /// name of the owning service
    pub service: FastStr,
    /// host
    pub host: FastStr,
    /// port
    pub port: u16,
    /// load balancing weight, zero takes no traffic
    pub weight: u32,
    /// instance metadata
    pub metadata: HashMap<String, String>,
    /// health state computed by the registry
    pub healthy: bool,
    /// isolated instances never receive traffic
    pub isolated: bool,
    /// application protocol
    pub protocol: FastStr,
    /// version of the deployed service
    pub version: FastStr,
}

impl RegistryInstance {
    /// Creates a healthy instance of `key` at `host:port`, identified by its address.
    pub fn new(key: &ServiceKey, host: impl Into<FastStr>, port: u16) -> Self {
        let host = host.into();
        Self {
            id: format!("{host}:{port}").into(),
            namespace: key.namespace.clone(),
            service: key.service.clone(),
            host,
            port,
            weight: DEFAULT_WEIGHT,
            metadata: HashMap::new(),
            healthy: true,
            isolated: false,
            protocol: FastStr::empty(),
            version: FastStr::empty(),
        }
    }
    /// Set the registry id.
    pub fn with_id(mut self, id: impl Into<FastStr>) -> Self {
        self.id = id.into();
        self
    }
    /// Set the weight.
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }
    /// Add a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
    /// Set the health state.
    pub fn with_healthy(mut self, healthy: bool) -> Self {
        self.healthy = healthy;
        self
    }
    /// Set the isolation state.
    pub fn with_isolated(mut self, isolated: bool) -> Self {
        self.isolated = isolated;
        self
    }
    /// Network address of the instance.
    pub fn address(&self) -> Address {
        Address::new(self.host.clone(), self.port)
    }
    /// Key of the owning service.
    pub fn service_key(&self) -> ServiceKey {
        ServiceKey::new(self.namespace.clone(), self.service.clone())
    }
}

/// One instance replaced by the registry.
#[derive(Debug, Clone)]
pub struct InstanceUpdate {
    /// the record before the update
    pub before: Arc<RegistryInstance>,
    /// the record after the update
    pub after: Arc<RegistryInstance>,
}

/// Membership change of one service.
#[derive(Debug, Clone, Default)]
pub struct InstanceEvent {
    /// the changed service
    pub key: ServiceKey,
    /// newly registered instances
    pub added: Vec<Arc<RegistryInstance>>,
    /// instances whose record changed
    pub updated: Vec<InstanceUpdate>,
    /// deregistered instances
    pub deleted: Vec<Arc<RegistryInstance>>,
}

/// An event delivered on a service subscription.
#[derive(Debug, Clone)]
pub enum SubscribeEvent {
    /// Instance membership changed.
    Instance(InstanceEvent),
    /// Service level attributes changed; carries no membership information.
    Service(ServiceKey),
    /// Events of the service were lost; the subscriber must re-fetch the full instance set.
    Resync(ServiceKey),
}

/// An open subscription: the snapshot at subscription time and the event feed after it.
pub struct WatchResponse {
    /// all instances known when the subscription was opened
    pub instances: Vec<Arc<RegistryInstance>>,
    /// subsequent events, ending when the registry closes the subscription
    pub events: BoxStream<'static, SubscribeEvent>,
}

impl fmt::Debug for WatchResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchResponse").field("instances", &self.instances).finish_non_exhaustive()
    }
}

/// Reference to the instance that served a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRef {
    /// namespace of the service
    pub namespace: FastStr,
    /// service name
    pub service: FastStr,
    /// registry id of the instance
    pub instance_id: FastStr,
}

/// Outcome class of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetStatus {
    /// The call succeeded.
    Success,
    /// The call failed.
    Fail,
}

/// Return code reported for a successful call.
pub const RET_SUCCESS_CODE: i32 = 0;
/// Return code reported for a failed call.
pub const RET_FAIL_CODE: i32 = -1;

/// A call outcome fed into the registry's health and circuit breaking model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallResult {
    /// the instance that served the call
    pub instance: InstanceRef,
    /// outcome class
    pub status: RetStatus,
    /// outcome code
    pub ret_code: i32,
    /// call latency
    pub delay: Duration,
}

impl CallResult {
    /// Builds the result of a call from its outcome.
    pub fn new(instance: InstanceRef, success: bool, delay: Duration) -> Self {
        let (status, ret_code) = if success { (RetStatus::Success, RET_SUCCESS_CODE) } else { (RetStatus::Fail, RET_FAIL_CODE) };
        Self { instance, status, ret_code, delay }
    }
}

/// [`Registry`] is the client side view of the service registry.
pub trait Registry: Send + Sync + 'static {
    /// Point-in-time instance list of a service.
    fn get_instances<'s>(&'s self, key: &'s ServiceKey) -> impl Future<Output = Result<Vec<Arc<RegistryInstance>>>> + Send;
    /// Opens a change subscription for a service.
    fn watch_service<'s>(&'s self, key: &'s ServiceKey) -> impl Future<Output = Result<WatchResponse>> + Send;
    /// Delivers the outcome of one call, best effort.
    fn update_service_call_result(&self, result: CallResult) -> impl Future<Output = Result<()>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_result_codes() {
        let instance = InstanceRef {
            namespace: "default".into(),
            service: "echo".into(),
            instance_id: "10.0.0.1:8000".into(),
        };
        let ok = CallResult::new(instance.clone(), true, Duration::from_millis(3));
        assert_eq!((ok.status, ok.ret_code), (RetStatus::Success, RET_SUCCESS_CODE));
        let failed = CallResult::new(instance, false, Duration::from_millis(3));
        assert_eq!((failed.status, failed.ret_code), (RetStatus::Fail, RET_FAIL_CODE));
    }

    #[test]
    fn test_instance_defaults() {
        let key = ServiceKey::new("default", "echo");
        let instance = RegistryInstance::new(&key, "10.0.0.1", 8000);
        assert_eq!(instance.id.as_str(), "10.0.0.1:8000");
        assert_eq!(instance.service_key(), key);
        assert_eq!(instance.address().to_string(), "10.0.0.1:8000");
        assert!(instance.healthy);
        assert_eq!(key.to_string(), "default:echo");
    }
}
