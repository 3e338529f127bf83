// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! One-stop client setup.

use super::ReportCallResult;
use crate::balance::PolarisBalancer;
use crate::component::Endpoint;
use crate::config::{ClientOptions, DstNamespace, DEFAULT_NAMESPACE};
use crate::discover::PolarisResolver;
use crate::registry::Registry;
use faststr::FastStr;
use std::sync::Arc;

/// [`ClientSuite`] builds the resolver, balancer and call result reporter of a client so that
/// they share one registry handle and agree on the destination namespace.
#[derive(Debug)]
pub struct ClientSuite<R> {
    registry: Arc<R>,
    dst_namespace: FastStr,
    options: ClientOptions,
}

impl<R> Clone for ClientSuite<R> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            dst_namespace: self.dst_namespace.clone(),
            options: self.options.clone(),
        }
    }
}

impl<R: Registry> ClientSuite<R> {
    /// Creates a suite on an initialized registry handle.
    pub fn new(registry: Arc<R>) -> Self {
        Self {
            registry,
            dst_namespace: FastStr::from_static_str(DEFAULT_NAMESPACE),
            options: ClientOptions::default(),
        }
    }

    /// Set the destination namespace. An empty namespace selects the default one.
    pub fn with_dst_namespace(mut self, namespace: impl Into<FastStr>) -> Self {
        let namespace = namespace.into();
        self.dst_namespace = if namespace.is_empty() {
            FastStr::from_static_str(DEFAULT_NAMESPACE)
        } else {
            namespace
        };
        self
    }

    /// Set the routing options.
    pub fn with_options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// The destination namespace.
    pub fn dst_namespace(&self) -> &str {
        &self.dst_namespace
    }

    /// The registry handle.
    pub fn registry(&self) -> &Arc<R> {
        &self.registry
    }

    /// The callee endpoint of `service`, tagged with the destination namespace.
    pub fn endpoint(&self, service: impl Into<FastStr>) -> Endpoint {
        Endpoint::new(service).with_tag::<DstNamespace>(self.dst_namespace.clone())
    }

    /// Builds the resolver.
    pub fn build_resolver(&self) -> PolarisResolver<R> {
        PolarisResolver::new(self.registry.clone(), self.options.clone()).with_default_namespace(self.dst_namespace.clone())
    }

    /// Builds the balancer.
    pub fn build_balancer(&self) -> PolarisBalancer {
        PolarisBalancer::default()
    }

    /// Wraps `inner` with call result reporting.
    pub fn report_layer<S>(&self, inner: S) -> ReportCallResult<S, R> {
        ReportCallResult::new(inner, self.registry.clone()).with_default_namespace(self.dst_namespace.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discover::Resolver;
    use crate::registry::MemoryRegistry;

    #[test]
    fn test_suite() {
        let suite = ClientSuite::new(Arc::new(MemoryRegistry::new())).with_dst_namespace("prod");
        let resolver = suite.build_resolver();
        assert_eq!(resolver.target(&suite.endpoint("echo")).as_str(), "prod:echo");
        assert_eq!(resolver.target(&Endpoint::new("echo")).as_str(), "prod:echo");

        let suite = suite.with_dst_namespace("");
        assert_eq!(suite.dst_namespace(), DEFAULT_NAMESPACE);
    }
}
