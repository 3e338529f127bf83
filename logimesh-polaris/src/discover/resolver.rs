// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Polaris resolver.

use super::{codec, diff, Change, Discovery, Instance};
use crate::component::Endpoint;
use crate::config::{ClientOptions, DstNamespace, DEFAULT_NAMESPACE};
use crate::error::{PolarisError, Result};
use crate::registry::{InstanceEvent, Registry, RegistryInstance, ServiceKey, SubscribeEvent};
use faststr::FastStr;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// A lazy, infinite sequence of changes that ends only when the watch is cancelled or the
/// registry closes the subscription. It cannot be restarted.
pub type WatchStream = BoxStream<'static, Change>;

/// [`Resolver`] turns a service description into instances.
pub trait Resolver: Send + Sync + 'static {
    /// `target` derives the service description of an endpoint. It performs no I/O.
    fn target(&self, endpoint: &Endpoint) -> FastStr;
    /// `resolve` fetches the current instances of a description. It never retries.
    fn resolve<'s>(&'s self, desc: &'s str) -> impl Future<Output = Result<Discovery>> + Send;
    /// `watcher` subscribes to the changes of a description until `cancel` fires.
    fn watcher<'s>(&'s self, desc: &'s str, cancel: CancellationToken) -> impl Future<Output = Result<WatchStream>> + Send;
    /// `diff` computes the change between two results of the same description.
    fn diff(&self, cache_key: &FastStr, prev: &Discovery, next: &Discovery) -> (Change, bool) {
        diff(cache_key, prev, next)
    }
    /// Name of the resolver.
    fn name(&self) -> &'static str;
}

/// [`PolarisResolver`] resolves services from a Polaris registry.
pub struct PolarisResolver<R> {
    registry: Arc<R>,
    options: Arc<ClientOptions>,
    default_namespace: FastStr,
}

impl<R: Registry> PolarisResolver<R> {
    /// Creates a resolver on an initialized registry handle.
    pub fn new(registry: Arc<R>, options: ClientOptions) -> Self {
        Self {
            registry,
            options: Arc::new(options),
            default_namespace: FastStr::from_static_str(DEFAULT_NAMESPACE),
        }
    }

    /// Set the namespace used for endpoints without a [`DstNamespace`] tag.
    pub fn with_default_namespace(mut self, namespace: impl Into<FastStr>) -> Self {
        self.default_namespace = namespace.into();
        self
    }

    fn adapt(&self, raw: Arc<RegistryInstance>) -> Arc<Instance> {
        Arc::new(Instance::from_registry(raw, self.options.clone()))
    }
}

impl<R: Registry> Resolver for PolarisResolver<R> {
    fn target(&self, endpoint: &Endpoint) -> FastStr {
        let namespace = endpoint.get::<DstNamespace>().unwrap_or(&self.default_namespace);
        codec::encode(namespace, endpoint.service_name_ref())
    }

    fn resolve<'s>(&'s self, desc: &'s str) -> impl Future<Output = Result<Discovery>> + Send {
        async move {
            let key = ServiceKey::from_description(desc)?;
            let instances = self.registry.get_instances(&key).await.map_err(|e| match e {
                e @ PolarisError::UpstreamUnavailable(_) => e,
                e => PolarisError::UpstreamUnavailable(e.to_string().into()),
            })?;
            if instances.is_empty() {
                return Err(PolarisError::NoInstancesAvailable(FastStr::new(desc)));
            }
            let instances = instances
                .into_iter()
                .map(|raw| {
                    debug!("[POLARIS] resolved instance {}:{} of {desc}", raw.host, raw.port);
                    self.adapt(raw)
                })
                .collect();
            Ok(Discovery::cacheable(FastStr::new(desc), instances))
        }
    }

    fn watcher<'s>(&'s self, desc: &'s str, cancel: CancellationToken) -> impl Future<Output = Result<WatchStream>> + Send {
        async move {
            let key = ServiceKey::from_description(desc)?;
            let response = self.registry.watch_service(&key).await.map_err(|e| match e {
                e @ PolarisError::UpstreamUnavailable(_) => e,
                e => PolarisError::UpstreamUnavailable(e.to_string().into()),
            })?;
            let state = WatchState {
                registry: self.registry.clone(),
                desc: FastStr::new(desc),
                key,
                options: self.options.clone(),
                current: response.instances.into_iter().map(|raw| self.adapt(raw)).collect(),
                events: response.events,
                cancel,
            };
            Ok(stream::unfold(state, WatchState::next_change).boxed())
        }
    }

    fn name(&self) -> &'static str {
        "Polaris"
    }
}

struct WatchState<R> {
    registry: Arc<R>,
    desc: FastStr,
    key: ServiceKey,
    options: Arc<ClientOptions>,
    current: Vec<Arc<Instance>>,
    events: BoxStream<'static, SubscribeEvent>,
    cancel: CancellationToken,
}

impl<R: Registry> WatchState<R> {
    async fn next_change(mut self) -> Option<(Change, Self)> {
        loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!("[POLARIS] watch of {} has been finished", self.desc);
                    return None;
                },
                event = self.events.next() => event,
            };
            match event {
                Some(SubscribeEvent::Instance(event)) if event.key == self.key => {
                    let change = self.apply(event);
                    return Some((change, self));
                },
                Some(SubscribeEvent::Resync(key)) if key == self.key => match self.registry.get_instances(&self.key).await {
                    Ok(instances) => {
                        let change = self.refresh(instances);
                        return Some((change, self));
                    },
                    Err(e) => warn!("[POLARIS] fail to refetch {} after lost events: {e}", self.desc),
                },
                Some(other) => trace!("[POLARIS] ignore event of {}: {other:?}", self.desc),
                None => {
                    info!("[POLARIS] subscription of {} closed by the registry", self.desc);
                    return None;
                },
            }
        }
    }

    fn apply(&mut self, event: InstanceEvent) -> Change {
        let mut change = Change::default();
        for raw in event.deleted {
            let address = raw.address();
            if let Some(offset) = self.current.iter().position(|i| i.address == address) {
                change.removed.push(self.current.remove(offset));
            }
        }
        for update in event.updated {
            let instance = self.adapt(update.after);
            if self.upsert(instance.clone()) {
                change.added.push(instance);
            } else {
                change.updated.push(instance);
            }
        }
        for raw in event.added {
            let instance = self.adapt(raw);
            if self.upsert(instance.clone()) {
                change.added.push(instance);
            } else {
                change.updated.push(instance);
            }
        }
        change.result = Discovery::cacheable(self.desc.clone(), self.current.clone());
        change
    }

    /// Replaces the known set with a full registry listing.
    fn refresh(&mut self, instances: Vec<Arc<RegistryInstance>>) -> Change {
        let prev = Discovery::cacheable(self.desc.clone(), std::mem::take(&mut self.current));
        self.current = instances.into_iter().map(|raw| self.adapt(raw)).collect();
        let next = Discovery::cacheable(self.desc.clone(), self.current.clone());
        diff(&self.desc, &prev, &next).0
    }

    /// Returns true if the instance was not known before.
    fn upsert(&mut self, instance: Arc<Instance>) -> bool {
        match self.current.iter_mut().find(|i| i.address == instance.address) {
            Some(slot) => {
                *slot = instance;
                false
            },
            None => {
                self.current.push(instance);
                true
            },
        }
    }

    fn adapt(&self, raw: Arc<RegistryInstance>) -> Arc<Instance> {
        Arc::new(Instance::from_registry(raw, self.options.clone()))
    }
}
