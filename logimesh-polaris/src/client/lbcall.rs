// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Load balanced call.

use super::{CallInfo, CallService, RpcError};
use crate::balance::{Loadbalancer, Picker};
use crate::discover::Resolver;
use crate::error::PolarisError;
use faststr::FastStr;
use std::sync::Arc;
use tracing::trace;

/// Errors of a load balanced call.
#[derive(thiserror::Error, Debug)]
pub enum CallError {
    /// The picker selected no instance.
    #[error("no instance available for {0}")]
    NoInstance(FastStr),
    /// The callee could not be resolved.
    #[error(transparent)]
    Discover(#[from] PolarisError),
    /// The call itself failed.
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

type RetryFn<Resp> = Box<dyn Fn(&Result<Resp, RpcError>, u32) -> bool + Send + Sync>;

/// [`LbCall`] resolves the callee, picks an instance and calls it through the inner service.
pub struct LbCall<S: CallService, Rs, Lb> {
    inner: S,
    resolver: Arc<Rs>,
    balancer: Arc<Lb>,
    retry_fn: Option<RetryFn<S::Resp>>,
}

impl<S, Rs, Lb> LbCall<S, Rs, Lb>
where
    S: CallService,
    Rs: Resolver,
    Lb: Loadbalancer,
{
    /// Creates a load balanced call over `inner`.
    pub fn new(inner: S, resolver: Arc<Rs>, balancer: Arc<Lb>) -> Self {
        Self {
            inner,
            resolver,
            balancer,
            retry_fn: None,
        }
    }

    /// Set a callback function for judging whether to re-initiate the request on another pick.
    ///
    /// It receives the result and the 1-based attempt number.
    pub fn with_retry_fn(mut self, retry_fn: impl Fn(&Result<S::Resp, RpcError>, u32) -> bool + Send + Sync + 'static) -> Self {
        self.retry_fn = Some(Box::new(retry_fn));
        self
    }

    /// The inner service.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Calls the callee of `info`. On return `info` records the last instance tried.
    pub async fn call(&self, info: &mut CallInfo, request: S::Req) -> Result<S::Resp, CallError>
    where
        S::Req: Clone,
    {
        let desc = self.resolver.target(info.callee());
        let discovery = self.resolver.resolve(&desc).await?;
        let mut picker = self.balancer.get_picker(&discovery).await;
        let mut attempt = 0;
        let result = loop {
            attempt += 1;
            let Some(instance) = picker.next(info) else {
                picker.recycle();
                return Err(CallError::NoInstance(desc));
            };
            info.set_instance(&instance);
            let result = self.inner.call(info, request.clone()).await;
            match &self.retry_fn {
                Some(retry_fn) if retry_fn(&result, attempt) => trace!("[POLARIS] Retrying {desc} on attempt {attempt}"),
                _ => break result,
            }
        };
        picker.recycle();
        Ok(result?)
    }
}
