// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Weighted random load balance implemention

use super::LoadBalancePolicy;
use crate::error::{PolarisError, Result};
use crate::registry::RegistryInstance;
use rand::Rng;
use std::sync::Arc;

/// [`WeightedRandom`] picks an instance with a probability proportional to its weight.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeightedRandom;

impl LoadBalancePolicy for WeightedRandom {
    fn pick_one(&self, instances: &[Arc<RegistryInstance>]) -> Result<Arc<RegistryInstance>> {
        let sum_of_weights = instances.iter().fold(0u64, |lhs, rhs| lhs + rhs.weight as u64);
        if sum_of_weights == 0 {
            return Err(PolarisError::BalancingFailed(format!("no weighted instance among {} candidates", instances.len()).into()));
        }
        pick_one(rand::thread_rng().gen_range(0..sum_of_weights), instances)
            .cloned()
            .ok_or_else(|| PolarisError::BalancingFailed("weight exceeds the candidates".into()))
    }

    fn name(&self) -> &'static str {
        "weightedRandom"
    }
}

#[inline]
fn pick_one(mut weight: u64, instances: &[Arc<RegistryInstance>]) -> Option<&Arc<RegistryInstance>> {
    for instance in instances {
        let w = instance.weight as u64;
        if weight < w {
            return Some(instance);
        }
        weight -= w;
    }
    None
}
