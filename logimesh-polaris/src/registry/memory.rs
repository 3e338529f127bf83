// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! An in-process registry.

use super::{CallResult, InstanceEvent, InstanceUpdate, Registry, RegistryInstance, ServiceKey, SubscribeEvent, WatchResponse};
use crate::error::{PolarisError, Result};
use async_broadcast::{InactiveReceiver, Receiver, RecvError, Sender};
use dashmap::DashMap;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{trace, warn};

const EVENT_CAPACITY: usize = 64;

/// [`MemoryRegistry`] keeps services in memory and fans membership events out to every
/// subscriber of the changed service.
///
/// It stands in for a remote registry in tests and local setups.
#[derive(Default)]
pub struct MemoryRegistry {
    services: DashMap<ServiceKey, Vec<Arc<RegistryInstance>>>,
    feeds: DashMap<ServiceKey, (Sender<SubscribeEvent>, InactiveReceiver<SubscribeEvent>)>,
    call_results: Mutex<Vec<CallResult>>,
    unavailable: AtomicBool,
}

impl MemoryRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an instance, replacing the one at the same address.
    pub fn register(&self, instance: RegistryInstance) -> Arc<RegistryInstance> {
        let key = instance.service_key();
        let instance = Arc::new(instance);
        let mut event = InstanceEvent {
            key: key.clone(),
            ..Default::default()
        };
        // Publish under the entry guard so events leave in the order they were applied.
        let mut instances = self.services.entry(key.clone()).or_default();
        match instances.iter_mut().find(|i| i.host == instance.host && i.port == instance.port) {
            Some(slot) => {
                let before = std::mem::replace(slot, instance.clone());
                event.updated.push(InstanceUpdate { before, after: instance.clone() });
            },
            None => {
                instances.push(instance.clone());
                event.added.push(instance.clone());
            },
        }
        self.publish(&key, SubscribeEvent::Instance(event));
        drop(instances);
        instance
    }

    /// Removes the instance at `host:port`, returning it if it was registered.
    pub fn deregister(&self, key: &ServiceKey, host: &str, port: u16) -> Option<Arc<RegistryInstance>> {
        let mut instances = self.services.get_mut(key)?;
        let offset = instances.iter().position(|i| i.host.as_str() == host && i.port == port)?;
        let removed = instances.remove(offset);
        self.publish(
            key,
            SubscribeEvent::Instance(InstanceEvent {
                key: key.clone(),
                deleted: vec![removed.clone()],
                ..Default::default()
            }),
        );
        drop(instances);
        Some(removed)
    }

    /// Emits a service level event that carries no membership change.
    pub fn touch_service(&self, key: &ServiceKey) {
        self.publish(key, SubscribeEvent::Service(key.clone()));
    }

    /// Closes every subscription of `key`.
    pub fn close_feed(&self, key: &ServiceKey) {
        if let Some((_, (sender, _))) = self.feeds.remove(key) {
            sender.close();
        }
    }

    /// Makes every registry call fail while `unavailable` is true.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Release);
    }

    /// Call results received so far.
    pub fn call_results(&self) -> Vec<CallResult> {
        self.call_results.lock().clone()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::Acquire) {
            return Err(PolarisError::UpstreamUnavailable("memory registry is switched off".into()));
        }
        Ok(())
    }

    fn publish(&self, key: &ServiceKey, event: SubscribeEvent) {
        if let Some(feed) = self.feeds.get(key) {
            // No active subscriber is not an error.
            if let Err(e) = feed.0.try_broadcast(event) {
                trace!("[POLARIS] event of {key} not delivered: {e:?}");
            }
        }
    }

    fn subscribe(&self, key: &ServiceKey) -> Receiver<SubscribeEvent> {
        let feed = self.feeds.entry(key.clone()).or_insert_with(|| {
            let (mut sender, receiver) = async_broadcast::broadcast(EVENT_CAPACITY);
            sender.set_overflow(true);
            (sender, receiver.deactivate())
        });
        feed.0.new_receiver()
    }
}

/// Turns a subscription into an event stream. A receiver that fell behind and lost
/// events yields [`SubscribeEvent::Resync`] in their place.
fn event_stream(key: ServiceKey, receiver: Receiver<SubscribeEvent>) -> BoxStream<'static, SubscribeEvent> {
    stream::unfold(receiver, move |mut receiver| {
        let key = key.clone();
        async move {
            match receiver.recv().await {
                Ok(event) => Some((event, receiver)),
                Err(RecvError::Overflowed(missed)) => {
                    warn!("[POLARIS] subscriber of {key} missed {missed} events");
                    Some((SubscribeEvent::Resync(key), receiver))
                },
                Err(_) => None,
            }
        }
    })
    .boxed()
}

impl Registry for MemoryRegistry {
    fn get_instances<'s>(&'s self, key: &'s ServiceKey) -> impl Future<Output = Result<Vec<Arc<RegistryInstance>>>> + Send {
        async move {
            self.check_available()?;
            Ok(self.services.get(key).map(|instances| instances.value().clone()).unwrap_or_default())
        }
    }

    fn watch_service<'s>(&'s self, key: &'s ServiceKey) -> impl Future<Output = Result<WatchResponse>> + Send {
        async move {
            self.check_available()?;
            // Subscribe before taking the snapshot: an event racing with the snapshot is seen twice, never lost.
            let events = self.subscribe(key);
            let instances = self.services.get(key).map(|instances| instances.value().clone()).unwrap_or_default();
            Ok(WatchResponse {
                instances,
                events: event_stream(key.clone(), events),
            })
        }
    }

    fn update_service_call_result(&self, result: CallResult) -> impl Future<Output = Result<()>> + Send {
        async move {
            if self.unavailable.load(Ordering::Acquire) {
                return Err(PolarisError::ReportingFailed(format!("drop result of {}", result.instance.instance_id).into()));
            }
            self.call_results.lock().push(result);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use futures::FutureExt;

    fn echo() -> ServiceKey {
        ServiceKey::new("default", "echo")
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let registry = MemoryRegistry::new();
        registry.register(RegistryInstance::new(&echo(), "10.0.0.1", 8000).with_weight(5));
        registry.register(RegistryInstance::new(&echo(), "10.0.0.2", 8000).with_weight(5));
        let instances = registry.get_instances(&echo()).await.unwrap();
        assert_eq!(instances.len(), 2);
        assert!(registry.get_instances(&ServiceKey::new("default", "other")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_watch_events() {
        let registry = MemoryRegistry::new();
        registry.register(RegistryInstance::new(&echo(), "10.0.0.1", 8000));
        let mut watch = registry.watch_service(&echo()).await.unwrap();
        assert_eq!(watch.instances.len(), 1);

        registry.register(RegistryInstance::new(&echo(), "10.0.0.1", 8000).with_weight(7));
        registry.deregister(&echo(), "10.0.0.1", 8000).unwrap();

        assert_matches!(watch.events.next().await, Some(SubscribeEvent::Instance(InstanceEvent { ref updated, .. })) if updated.len() == 1);
        assert_matches!(watch.events.next().await, Some(SubscribeEvent::Instance(InstanceEvent { ref deleted, .. })) if deleted.len() == 1);

        registry.close_feed(&echo());
        assert!(watch.events.next().await.is_none());
    }

    #[tokio::test]
    async fn test_overflow_resync() {
        let registry = MemoryRegistry::new();
        let mut watch = registry.watch_service(&echo()).await.unwrap();
        for i in 0..EVENT_CAPACITY + 10 {
            registry.register(RegistryInstance::new(&echo(), format!("10.0.{}.{}", i / 250, i % 250), 8000));
        }
        assert_matches!(watch.events.next().await, Some(SubscribeEvent::Resync(ref key)) if *key == echo());
        let mut delivered = 0;
        while let Some(Some(event)) = watch.events.next().now_or_never() {
            assert_matches!(event, SubscribeEvent::Instance(_));
            delivered += 1;
        }
        assert_eq!(delivered, EVENT_CAPACITY);
    }

    #[test]
    fn test_concurrent_register_order() {
        let registry = Arc::new(MemoryRegistry::new());
        let mut watch = futures::executor::block_on(registry.watch_service(&echo())).unwrap();
        let writers: Vec<_> = (1..=4u32)
            .map(|weight| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for _ in 0..8 {
                        registry.register(RegistryInstance::new(&echo(), "10.0.0.1", 8000).with_weight(weight));
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let mut last = None;
        while let Some(Some(SubscribeEvent::Instance(event))) = watch.events.next().now_or_never() {
            let instance = event.added.into_iter().chain(event.updated.into_iter().map(|u| u.after)).last().unwrap();
            last = Some(instance.weight);
        }
        let stored = registry.services.get(&echo()).unwrap()[0].weight;
        assert_eq!(last, Some(stored));
    }

    #[tokio::test]
    async fn test_unavailable() {
        let registry = MemoryRegistry::new();
        registry.set_unavailable(true);
        assert_matches!(registry.get_instances(&echo()).await, Err(PolarisError::UpstreamUnavailable(_)));
        assert_matches!(registry.watch_service(&echo()).await, Err(PolarisError::UpstreamUnavailable(_)));
    }
}
