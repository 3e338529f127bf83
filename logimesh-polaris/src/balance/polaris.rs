// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Polaris load balancer.

use super::pool::{PickerPool, Pooled, Reset, DEFAULT_POOL_CAPACITY};
use super::singleflight::SingleFlight;
use super::{Loadbalancer, Picker};
use crate::client::CallInfo;
use crate::config::ClientOptions;
use crate::discover::{codec, Change, Discovery, Instance};
use crate::net::Address;
use crate::registry::RegistryInstance;
use crate::router::{LoadBalancePolicy, MetadataRouter, PolicyRouter, RouteRequest, WeightedRandom};
use dashmap::DashMap;
use faststr::FastStr;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, trace};

/// Routing state derived from one discovery result.
///
/// It is immutable once built. The balancer swaps in a new one when the result changes.
#[derive(Debug)]
pub struct RoutingContext {
    namespace: FastStr,
    service_name: FastStr,
    options: Arc<ClientOptions>,
    address_index: HashMap<Address, Arc<Instance>>,
    raw_instances: Vec<Arc<RegistryInstance>>,
}

impl RoutingContext {
    /// Builds the routing state of `discovery`.
    pub fn new(discovery: &Discovery) -> Self {
        let mut address_index = HashMap::with_capacity(discovery.instances.len());
        let mut raw_instances = Vec::with_capacity(discovery.instances.len());
        for instance in &discovery.instances {
            raw_instances.push(instance.registry_instance().clone());
            address_index.insert(instance.address.clone(), instance.clone());
        }
        let first = discovery.instances.first();
        let (namespace, service_name) = match codec::decode(&discovery.cache_key) {
            Ok(pair) => pair,
            Err(_) => match first {
                Some(i) => (i.registry_instance().namespace.clone(), i.registry_instance().service.clone()),
                None => (FastStr::empty(), FastStr::empty()),
            },
        };
        let options = first.map(|i| i.options().clone()).unwrap_or_default();
        Self {
            namespace,
            service_name,
            options,
            address_index,
            raw_instances,
        }
    }

    /// Namespace of the destination service.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Name of the destination service.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Routing options of the client that discovered the instances.
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Registry records of all instances, in discovery order.
    pub fn raw_instances(&self) -> &[Arc<RegistryInstance>] {
        &self.raw_instances
    }

    /// Maps an address chosen by the load balancing policy back to the discovered instance.
    pub fn lookup(&self, address: &Address) -> Option<&Arc<Instance>> {
        self.address_index.get(address)
    }

    /// Number of instances.
    pub fn len(&self) -> usize {
        self.raw_instances.len()
    }

    /// Whether no instance was discovered.
    pub fn is_empty(&self) -> bool {
        self.raw_instances.is_empty()
    }
}

/// [`PolarisBalancer`] keeps one [`RoutingContext`] per cacheable discovery result and hands
/// out pooled pickers over it.
///
/// The context of a cache key is built at most once for concurrent first accesses, replaced
/// by [`Loadbalancer::rebalance`] and dropped by [`Loadbalancer::delete`].
pub struct PolarisBalancer {
    cache: DashMap<FastStr, Arc<RoutingContext>>,
    flight: SingleFlight<FastStr, Arc<RoutingContext>>,
    router: Arc<dyn PolicyRouter>,
    lb: Arc<dyn LoadBalancePolicy>,
    pool: Arc<PickerPool<PickerState>>,
    builds: AtomicUsize,
}

impl Default for PolarisBalancer {
    fn default() -> Self {
        Self::new(Arc::new(MetadataRouter), Arc::new(WeightedRandom))
    }
}

impl PolarisBalancer {
    /// Creates a balancer running `router` then `lb` for every call.
    pub fn new(router: Arc<dyn PolicyRouter>, lb: Arc<dyn LoadBalancePolicy>) -> Self {
        Self {
            cache: DashMap::new(),
            flight: SingleFlight::new(),
            router,
            lb,
            pool: PickerPool::new(DEFAULT_POOL_CAPACITY),
            builds: AtomicUsize::new(0),
        }
    }

    /// Set the number of idle pickers kept for reuse.
    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.pool = PickerPool::new(capacity);
        self
    }

    /// The cached routing context of `cache_key`.
    pub fn cached(&self, cache_key: &str) -> Option<Arc<RoutingContext>> {
        self.cache.get(cache_key).map(|c| c.value().clone())
    }

    /// Number of cached routing contexts.
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    /// Number of routing contexts built so far.
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::Relaxed)
    }

    /// The picker pool.
    pub fn pool(&self) -> &Arc<PickerPool<PickerState>> {
        &self.pool
    }

    fn build(&self, discovery: &Discovery) -> Arc<RoutingContext> {
        self.builds.fetch_add(1, Ordering::Relaxed);
        trace!("[POLARIS] build routing context of {}", discovery.cache_key);
        Arc::new(RoutingContext::new(discovery))
    }

    async fn routing_context(&self, discovery: &Discovery) -> Arc<RoutingContext> {
        if !discovery.cacheable {
            return self.build(discovery);
        }
        let key = &discovery.cache_key;
        if let Some(ctx) = self.cached(key) {
            trace!("[POLARIS] routing context cache hit: {key}");
            return ctx;
        }
        self.flight
            .work(key.clone(), move || async move {
                if let Some(ctx) = self.cached(key) {
                    return ctx;
                }
                let ctx = self.build(discovery);
                self.cache.entry(key.clone()).or_insert(ctx).value().clone()
            })
            .await
    }

    fn picker(&self, ctx: Arc<RoutingContext>) -> PolarisPicker {
        let mut state = self.pool.get();
        state.ctx = Some(ctx);
        state.router = Some(self.router.clone());
        state.lb = Some(self.lb.clone());
        PolarisPicker { state }
    }
}

impl fmt::Debug for PolarisBalancer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolarisBalancer")
            .field("cached", &self.cache.len())
            .field("lb", &self.lb.name())
            .field("pool", &self.pool)
            .field("builds", &self.builds.load(Ordering::Relaxed))
            .finish()
    }
}

impl Loadbalancer for PolarisBalancer {
    type Picker = PolarisPicker;

    fn get_picker<'s>(&'s self, discovery: &'s Discovery) -> impl Future<Output = PolarisPicker> + Send {
        async move {
            let ctx = self.routing_context(discovery).await;
            self.picker(ctx)
        }
    }

    fn rebalance(&self, change: &Change) {
        if !change.result.cacheable {
            return;
        }
        let ctx = self.build(&change.result);
        debug!("[POLARIS] rebalance {} with {} instances", change.result.cache_key, ctx.len());
        self.cache.insert(change.result.cache_key.clone(), ctx);
    }

    fn delete(&self, change: &Change) {
        if !change.result.cacheable {
            return;
        }
        debug!("[POLARIS] delete routing context of {}", change.result.cache_key);
        self.cache.remove(&change.result.cache_key);
    }

    fn name(&self) -> &'static str {
        "polaris"
    }
}

/// Pooled state of a [`PolarisPicker`].
#[derive(Default)]
pub struct PickerState {
    ctx: Option<Arc<RoutingContext>>,
    router: Option<Arc<dyn PolicyRouter>>,
    lb: Option<Arc<dyn LoadBalancePolicy>>,
    routed: Vec<Arc<RegistryInstance>>,
    routed_once: bool,
}

impl Reset for PickerState {
    fn reset(&mut self) {
        self.ctx = None;
        self.router = None;
        self.lb = None;
        self.routed.clear();
        self.routed_once = false;
    }
}

impl fmt::Debug for PickerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PickerState")
            .field("ctx", &self.ctx.as_ref().map(|c| c.len()))
            .field("routed", &self.routed.len())
            .field("routed_once", &self.routed_once)
            .finish()
    }
}

/// [`PolarisPicker`] selects instances for one call.
///
/// The policy router runs once, on the first [`Picker::next`]. Every call to `next` then
/// asks the load balancing policy for one of the routed instances.
#[derive(Debug)]
pub struct PolarisPicker {
    state: Pooled<PickerState>,
}

impl PolarisPicker {
    /// Whether the routing stage has run.
    pub fn is_routed(&self) -> bool {
        self.state.routed_once
    }

    /// The routing context the picker is bound to.
    pub fn routing_context(&self) -> Option<&Arc<RoutingContext>> {
        self.state.ctx.as_ref()
    }
}

impl Picker for PolarisPicker {
    fn next(&mut self, info: &CallInfo) -> Option<Arc<Instance>> {
        let PickerState {
            ctx,
            router,
            lb,
            routed,
            routed_once,
        } = &mut *self.state;
        let ctx = ctx.as_deref()?;
        if !*routed_once {
            *routed_once = true;
            let request = RouteRequest {
                namespace: &ctx.namespace,
                service: &ctx.service_name,
                instances: &ctx.raw_instances,
                options: &ctx.options,
                method: info.method(),
            };
            if let Err(e) = router.as_deref()?.filter_instances(&request, routed) {
                error!("[POLARIS] fail to route {}:{}: {e}", ctx.namespace, ctx.service_name);
                routed.clear();
                return None;
            }
        }
        if routed.is_empty() {
            return None;
        }
        let chosen = match lb.as_deref()?.pick_one(routed) {
            Ok(chosen) => chosen,
            Err(e) => {
                debug!("[POLARIS] fail to pick from {}:{}: {e}", ctx.namespace, ctx.service_name);
                return None;
            },
        };
        ctx.lookup(&chosen.address()).cloned()
    }

    fn recycle(self) {
        self.state.recycle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Endpoint;
    use crate::error::{PolarisError, Result};
    use crate::registry::ServiceKey;

    fn echo_instances(hosts: &[&'static str]) -> Vec<Arc<Instance>> {
        let options = Arc::new(ClientOptions::default());
        hosts
            .iter()
            .map(|host| {
                let raw = RegistryInstance::new(&ServiceKey::new("default", "echo"), *host, 8000).with_weight(5);
                Arc::new(Instance::from_registry(Arc::new(raw), options.clone()))
            })
            .collect()
    }

    fn discovery(hosts: &[&'static str]) -> Discovery {
        Discovery::cacheable(FastStr::from_static_str("default:echo"), echo_instances(hosts))
    }

    fn call() -> CallInfo {
        CallInfo::new(Endpoint::new("echo"), "Echo")
    }

    struct FailingRouter;

    impl PolicyRouter for FailingRouter {
        fn filter_instances(&self, _: &RouteRequest<'_>, _: &mut Vec<Arc<RegistryInstance>>) -> Result<()> {
            Err(PolarisError::RoutingFailed(FastStr::from_static_str("rule engine down")))
        }
    }

    /// Routes to an instance the context does not know.
    struct StrangerRouter;

    impl PolicyRouter for StrangerRouter {
        fn filter_instances(&self, request: &RouteRequest<'_>, out: &mut Vec<Arc<RegistryInstance>>) -> Result<()> {
            let key = ServiceKey::new(FastStr::new(request.namespace), FastStr::new(request.service));
            out.push(Arc::new(RegistryInstance::new(&key, "10.9.9.9", 9000)));
            Ok(())
        }
    }

    /// Keeps every candidate, or none when `drop_all` is set.
    #[derive(Default)]
    struct CountingRouter {
        calls: AtomicUsize,
        drop_all: bool,
    }

    impl PolicyRouter for CountingRouter {
        fn filter_instances(&self, request: &RouteRequest<'_>, out: &mut Vec<Arc<RegistryInstance>>) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.drop_all {
                out.extend(request.instances.iter().cloned());
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingLb {
        calls: AtomicUsize,
    }

    impl LoadBalancePolicy for CountingLb {
        fn pick_one(&self, instances: &[Arc<RegistryInstance>]) -> Result<Arc<RegistryInstance>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            WeightedRandom.pick_one(instances)
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    #[tokio::test]
    async fn test_route_once_pick_each() {
        let router = Arc::new(CountingRouter::default());
        let lb = Arc::new(CountingLb::default());
        let balancer = PolarisBalancer::new(router.clone(), lb.clone());
        let mut picker = balancer.get_picker(&discovery(&["10.0.0.1", "10.0.0.2"])).await;
        for _ in 0..5 {
            assert!(picker.next(&call()).is_some());
        }
        assert_eq!(router.calls.load(Ordering::SeqCst), 1);
        assert_eq!(lb.calls.load(Ordering::SeqCst), 5);

        let router = Arc::new(CountingRouter {
            drop_all: true,
            ..Default::default()
        });
        let lb = Arc::new(CountingLb::default());
        let balancer = PolarisBalancer::new(router.clone(), lb.clone());
        let mut picker = balancer.get_picker(&discovery(&["10.0.0.1"])).await;
        for _ in 0..3 {
            assert!(picker.next(&call()).is_none());
        }
        assert_eq!(router.calls.load(Ordering::SeqCst), 1);
        assert_eq!(lb.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_build() {
        let balancer = Arc::new(PolarisBalancer::default());
        let discovery = Arc::new(discovery(&["10.0.0.1", "10.0.0.2"]));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let (balancer, discovery) = (balancer.clone(), discovery.clone());
            handles.push(tokio::spawn(async move {
                let mut picker = balancer.get_picker(&discovery).await;
                let instance = picker.next(&call()).map(|i| i.address.to_string());
                picker.recycle();
                instance
            }));
        }
        for handle in handles {
            let address = handle.await.unwrap().unwrap();
            assert!(address == "10.0.0.1:8000" || address == "10.0.0.2:8000");
        }
        assert_eq!(balancer.build_count(), 1);
        assert_eq!(balancer.cached_len(), 1);
    }

    #[tokio::test]
    async fn test_non_cacheable() {
        let balancer = PolarisBalancer::default();
        let mut discovery = discovery(&["10.0.0.1"]);
        discovery.cacheable = false;
        for _ in 0..3 {
            let mut picker = balancer.get_picker(&discovery).await;
            assert!(picker.next(&call()).is_some());
        }
        assert_eq!(balancer.build_count(), 3);
        assert_eq!(balancer.cached_len(), 0);
    }

    #[tokio::test]
    async fn test_empty_set() {
        let balancer = PolarisBalancer::default();
        let mut picker = balancer.get_picker(&discovery(&[])).await;
        assert!(picker.next(&call()).is_none());
        assert!(picker.is_routed());
        assert!(picker.next(&call()).is_none());
    }

    #[tokio::test]
    async fn test_router_failure() {
        let balancer = PolarisBalancer::new(Arc::new(FailingRouter), Arc::new(WeightedRandom));
        let mut picker = balancer.get_picker(&discovery(&["10.0.0.1"])).await;
        assert!(picker.next(&call()).is_none());
        assert!(picker.next(&call()).is_none());
    }

    #[tokio::test]
    async fn test_address_index_miss() {
        let balancer = PolarisBalancer::new(Arc::new(StrangerRouter), Arc::new(WeightedRandom));
        let mut picker = balancer.get_picker(&discovery(&["10.0.0.1"])).await;
        assert!(picker.next(&call()).is_none());
    }

    #[tokio::test]
    async fn test_recycle_resets() {
        let balancer = PolarisBalancer::default();
        let mut picker = balancer.get_picker(&discovery(&["10.0.0.1"])).await;
        assert!(picker.next(&call()).is_some());
        picker.recycle();
        assert_eq!(balancer.pool().idle(), 1);

        let picker = balancer.get_picker(&discovery(&["10.0.0.1"])).await;
        assert!(!picker.is_routed());
        assert_eq!(balancer.pool().created(), 1);
    }

    #[tokio::test]
    async fn test_rebalance_and_delete() {
        let balancer = PolarisBalancer::default();
        let _ = balancer.get_picker(&discovery(&["10.0.0.1"])).await;

        let change = Change {
            result: discovery(&["10.0.0.2"]),
            ..Default::default()
        };
        balancer.rebalance(&change);
        let mut picker = balancer.get_picker(&discovery(&["10.0.0.1"])).await;
        assert_eq!(picker.next(&call()).unwrap().address.host(), "10.0.0.2");

        let mut stale = change.clone();
        stale.result.cacheable = false;
        balancer.delete(&stale);
        assert_eq!(balancer.cached_len(), 1);

        balancer.delete(&change);
        assert_eq!(balancer.cached_len(), 0);
        assert_eq!(balancer.name(), "polaris");
    }

    #[test]
    fn test_routing_context_fallback() {
        let instances = echo_instances(&["10.0.0.1"]);
        let ctx = RoutingContext::new(&Discovery::cacheable(FastStr::from_static_str("echo"), instances));
        assert_eq!(ctx.namespace(), "default");
        assert_eq!(ctx.service_name(), "echo");
        assert!(ctx.lookup(&Address::new("10.0.0.1", 8000)).is_some());
    }
}
