// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Metadata and health based routing.

use super::{PolicyRouter, RouteRequest};
use crate::error::Result;
use crate::registry::RegistryInstance;
use std::sync::Arc;
use tracing::debug;

/// [`MetadataRouter`] keeps the instances that are able to take traffic.
///
/// * isolated and zero weight instances are dropped;
/// * instances must carry every entry of the caller's `dst_metadata`;
/// * healthy instances are preferred. When none of the remaining candidates is
///   healthy all of them are returned.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetadataRouter;

impl PolicyRouter for MetadataRouter {
    fn filter_instances(&self, request: &RouteRequest<'_>, out: &mut Vec<Arc<RegistryInstance>>) -> Result<()> {
        let start = out.len();
        let dst_metadata = &request.options.dst_metadata;
        let mut unhealthy = 0usize;
        for instance in request.instances {
            if instance.isolated || instance.weight == 0 {
                continue;
            }
            if !dst_metadata.iter().all(|(k, v)| instance.metadata.get(k) == Some(v)) {
                continue;
            }
            if !instance.healthy {
                unhealthy += 1;
            }
            out.push(instance.clone());
        }
        let total = out.len() - start;
        if unhealthy > 0 && unhealthy < total {
            let mut offset = start;
            out.retain(|instance| {
                let keep = offset < start || instance.healthy;
                offset += 1;
                keep
            });
        } else if unhealthy > 0 {
            debug!(
                "[POLARIS] all {total} candidates of {}:{} are unhealthy, routing to all of them",
                request.namespace, request.service
            );
        }
        Ok(())
    }
}
