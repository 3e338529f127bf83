// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Keeps a balancer in step with the registry.

use crate::balance::Loadbalancer;
use crate::discover::{Change, Resolver};
use crate::error::Result;
use faststr::FastStr;
use futures::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Watches `desc` and feeds every change into `balancer`.
///
/// The subscription is opened before this returns, so a registry failure surfaces here. When
/// the watch ends and the last known result had no instance left, the cached state of `desc`
/// is deleted from the balancer.
///
/// The watch stops when the returned guard is dropped.
pub async fn spawn_rebalancer<Rs, Lb>(resolver: Arc<Rs>, balancer: Arc<Lb>, desc: impl Into<FastStr>) -> Result<WatchGuard>
where
    Rs: Resolver,
    Lb: Loadbalancer,
{
    let desc = desc.into();
    let token = CancellationToken::new();
    let mut changes = resolver.watcher(&desc, token.clone()).await?;
    let handle = tokio::spawn(async move {
        let mut last: Option<Change> = None;
        while let Some(change) = changes.next().await {
            debug!(
                "[POLARIS] {} changed: {} added, {} updated, {} removed",
                desc,
                change.added.len(),
                change.updated.len(),
                change.removed.len()
            );
            balancer.rebalance(&change);
            last = Some(change);
        }
        if let Some(change) = last.filter(|c| c.result.instances.is_empty()) {
            balancer.delete(&change);
        }
        info!("[POLARIS] rebalancer of {desc} stopped");
    });
    Ok(WatchGuard { token, handle: Some(handle) })
}

/// Stops the watch task it belongs to when dropped.
#[derive(Debug)]
pub struct WatchGuard {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl WatchGuard {
    /// Asks the watch task to stop, without waiting for it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the watch task has stopped.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Stops the watch task and waits for it to exit.
    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
