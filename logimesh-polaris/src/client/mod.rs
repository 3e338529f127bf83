// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Client side glue: the per-call context, the call contract and the layers built on them.

use crate::component::Endpoint;
use crate::config::InstanceId;
use crate::context;
use crate::discover::Instance;
use faststr::FastStr;

mod lbcall;
mod report;
mod suite;
pub mod watch;

pub use ::tarpc::client::stub::Stub;
pub use ::tarpc::client::RpcError;
pub use lbcall::{CallError, LbCall};
pub use report::ReportCallResult;
pub use suite::ClientSuite;

/// Per-call information shared by the picker, the transport and the reporter.
#[derive(Debug)]
pub struct CallInfo {
    /// tarpc request context
    pub ctx: context::Context,
    /// name of the called method
    pub method: FastStr,
    /// the callee; gains an address and an [`InstanceId`] tag once an instance is chosen
    pub callee: Endpoint,
}

impl CallInfo {
    /// Creates the information of a call to `method` of `callee`, with a fresh context.
    pub fn new(callee: Endpoint, method: impl Into<FastStr>) -> Self {
        Self {
            ctx: context::current(),
            method: method.into(),
            callee,
        }
    }

    /// Set the tarpc request context.
    pub fn with_context(mut self, ctx: context::Context) -> Self {
        self.ctx = ctx;
        self
    }

    /// Name of the called method.
    #[inline]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The callee endpoint.
    #[inline]
    pub fn callee(&self) -> &Endpoint {
        &self.callee
    }

    /// Records `instance` as the target of the call.
    pub fn set_instance(&mut self, instance: &Instance) {
        self.callee.insert::<InstanceId>(instance.id().clone());
        self.callee.set_address(instance.address.clone());
    }
}

/// [`CallService`] performs one call against the instance recorded in [`CallInfo`].
#[allow(async_fn_in_trait)]
pub trait CallService {
    /// Request type.
    type Req;
    /// Response type.
    type Resp;
    /// Calls the service.
    async fn call(&self, info: &CallInfo, request: Self::Req) -> Result<Self::Resp, RpcError>;
}

/// Adapts a tarpc [`Stub`] into a [`CallService`].
#[derive(Debug, Clone)]
pub struct StubService<S>(pub S);

impl<S: Stub> CallService for StubService<S> {
    type Req = S::Req;
    type Resp = S::Resp;

    async fn call(&self, info: &CallInfo, request: Self::Req) -> Result<Self::Resp, RpcError> {
        self.0.call(info.ctx, request).await
    }
}
