// Modifications Copyright Andeya Lee 2024
// Based on original source code from Volo Contributors licensed under MIT OR Apache-2.0
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! load balance for discovered instances.

use crate::client::CallInfo;
use crate::discover::{Change, Discovery, Instance};
use std::future::Future;
use std::sync::Arc;

mod polaris;
pub mod pool;
pub mod singleflight;

pub use polaris::{PickerState, PolarisBalancer, PolarisPicker, RoutingContext};

/// [`Loadbalancer`] promise the feature of the load balance policy.
pub trait Loadbalancer: Send + Sync + 'static {
    /// The per-call picker.
    type Picker: Picker;

    /// `get_picker` returns a picker bound to the routing state of `discovery`.
    ///
    /// It never fails: a picker over an unusable state simply selects no instance.
    fn get_picker<'s>(&'s self, discovery: &'s Discovery) -> impl Future<Output = Self::Picker> + Send;
    /// `rebalance` is the callback method be used in service discovering subscription.
    fn rebalance(&self, change: &Change);
    /// `delete` drops the state kept for the changed result.
    fn delete(&self, change: &Change);
    /// Name of the balancer.
    fn name(&self) -> &'static str;
}

/// [`Picker`] selects instances for one call.
pub trait Picker: Send {
    /// `next` returns the instance for the next attempt of the call, if any.
    fn next(&mut self, info: &CallInfo) -> Option<Arc<Instance>>;
    /// Releases the picker. It cannot be used afterwards.
    fn recycle(self);
}
