// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Call result reporting.

use super::{CallInfo, CallService, RpcError};
use crate::config::{DstNamespace, InstanceId, DEFAULT_NAMESPACE};
use crate::registry::{CallResult, InstanceRef, Registry};
use faststr::FastStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tracing::{trace, warn};

/// [`ReportCallResult`] times every call of the inner service and reports its outcome for the
/// instance that served it.
///
/// Reports are sent in the background and never affect the call: a failed report is logged
/// and dropped. Calls that did not go through a discovered instance are not reported.
pub struct ReportCallResult<S, R> {
    inner: S,
    registry: Arc<R>,
    default_namespace: FastStr,
}

impl<S, R: Registry> ReportCallResult<S, R> {
    /// Wraps `inner`, reporting to `registry`.
    pub fn new(inner: S, registry: Arc<R>) -> Self {
        Self {
            inner,
            registry,
            default_namespace: FastStr::from_static_str(DEFAULT_NAMESPACE),
        }
    }

    /// Set the namespace reported for callees without a [`DstNamespace`] tag.
    pub fn with_default_namespace(mut self, namespace: impl Into<FastStr>) -> Self {
        self.default_namespace = namespace.into();
        self
    }

    /// The wrapped service.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn report(&self, info: &CallInfo, success: bool, delay: Duration) {
        let callee = info.callee();
        let Some(instance_id) = callee.get::<InstanceId>() else {
            trace!("[POLARIS] no instance recorded for {}, skip reporting", callee.service_name_ref());
            return;
        };
        let instance = InstanceRef {
            namespace: callee.get::<DstNamespace>().unwrap_or(&self.default_namespace).clone(),
            service: callee.service_name(),
            instance_id: instance_id.clone(),
        };
        let result = CallResult::new(instance, success, delay);
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                warn!("[POLARIS] cannot report call result of {}: {e}", callee.service_name_ref());
                return;
            },
        };
        let registry = self.registry.clone();
        handle.spawn(async move {
            let instance_id = result.instance.instance_id.clone();
            if let Err(e) = registry.update_service_call_result(result).await {
                warn!("[POLARIS] report call result of instance {instance_id} failed: {e}");
            }
        });
    }
}

impl<S, R> CallService for ReportCallResult<S, R>
where
    S: CallService,
    R: Registry,
{
    type Req = S::Req;
    type Resp = S::Resp;

    async fn call(&self, info: &CallInfo, request: Self::Req) -> Result<Self::Resp, RpcError> {
        let start = Instant::now();
        let result = self.inner.call(info, request).await;
        self.report(info, result.is_ok(), start.elapsed());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Endpoint;
    use crate::registry::{MemoryRegistry, RetStatus, RET_FAIL_CODE, RET_SUCCESS_CODE};

    /// Fails requests equal to "fail".
    struct Fake;

    impl CallService for Fake {
        type Req = &'static str;
        type Resp = &'static str;

        async fn call(&self, _: &CallInfo, request: &'static str) -> Result<&'static str, RpcError> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            if request == "fail" {
                Err(RpcError::Shutdown)
            } else {
                Ok(request)
            }
        }
    }

    fn routed_call() -> CallInfo {
        let mut info = CallInfo::new(Endpoint::new("echo").with_tag::<DstNamespace>(FastStr::from_static_str("prod")), "Echo");
        info.callee.insert::<InstanceId>(FastStr::from_static_str("ins-1"));
        info
    }

    async fn settle(registry: &MemoryRegistry, n: usize) -> Vec<CallResult> {
        for _ in 0..100 {
            let results = registry.call_results();
            if results.len() >= n {
                return results;
            }
            tokio::task::yield_now().await;
        }
        registry.call_results()
    }

    #[tokio::test]
    async fn test_report_outcomes() {
        let registry = Arc::new(MemoryRegistry::new());
        let service = ReportCallResult::new(Fake, registry.clone());
        assert_eq!(service.call(&routed_call(), "hello").await.unwrap(), "hello");
        assert!(matches!(service.call(&routed_call(), "fail").await, Err(RpcError::Shutdown)));

        let results = settle(&registry, 2).await;
        assert_eq!(results.len(), 2);
        let ok = results.iter().find(|r| r.status == RetStatus::Success).unwrap();
        assert_eq!(ok.ret_code, RET_SUCCESS_CODE);
        assert_eq!(ok.instance.namespace.as_str(), "prod");
        assert_eq!(ok.instance.service.as_str(), "echo");
        assert_eq!(ok.instance.instance_id.as_str(), "ins-1");
        assert!(ok.delay >= Duration::from_millis(5));
        let failed = results.iter().find(|r| r.status == RetStatus::Fail).unwrap();
        assert_eq!(failed.ret_code, RET_FAIL_CODE);
    }

    #[tokio::test]
    async fn test_skip_without_instance() {
        let registry = Arc::new(MemoryRegistry::new());
        let service = ReportCallResult::new(Fake, registry.clone());
        let info = CallInfo::new(Endpoint::new("echo"), "Echo");
        assert_eq!(service.call(&info, "hello").await.unwrap(), "hello");
        assert!(settle(&registry, 1).await.is_empty());
    }

    #[tokio::test]
    async fn test_default_namespace() {
        let registry = Arc::new(MemoryRegistry::new());
        let service = ReportCallResult::new(Fake, registry.clone()).with_default_namespace("test");
        let mut info = CallInfo::new(Endpoint::new("echo"), "Echo");
        info.callee.insert::<InstanceId>(FastStr::from_static_str("ins-2"));
        service.call(&info, "hello").await.unwrap();
        let results = settle(&registry, 1).await;
        assert_eq!(results[0].instance.namespace.as_str(), "test");
    }

    #[tokio::test]
    async fn test_report_failure_swallowed() {
        let registry = Arc::new(MemoryRegistry::new());
        registry.set_unavailable(true);
        let service = ReportCallResult::new(Fake, registry.clone());
        assert_eq!(service.call(&routed_call(), "hello").await.unwrap(), "hello");
        assert!(settle(&registry, 1).await.is_empty());
    }
}
