// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Client options, defaults and endpoint tag keys.

use crate::error::{PolarisError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Namespace used when the endpoint carries no [`DstNamespace`] tag.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Weight given to instances the registry reports without a positive weight.
pub const DEFAULT_WEIGHT: u32 = 10;

/// Separator between namespace and service name in a service description.
pub const DESCRIPTION_SEPARATOR: char = ':';

/// Endpoint tag key: the destination namespace of the callee.
#[derive(Debug, Clone, Copy)]
pub struct DstNamespace;

/// Endpoint tag key: the registry id of the instance chosen for the call.
#[derive(Debug, Clone, Copy)]
pub struct InstanceId;

/// Routing inputs of a client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    /// Metadata an instance must carry to be routed to.
    pub dst_metadata: HashMap<String, String>,
    /// Namespace of the calling service.
    pub src_namespace: String,
    /// Name of the calling service.
    pub src_service: String,
    /// Metadata of the calling service, consumed by rule based routing.
    pub src_metadata: HashMap<String, String>,
}

impl ClientOptions {
    /// Returns empty options.
    pub fn new() -> Self {
        Self::default()
    }
    /// Parses options from a JSON document.
    pub fn from_json_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| PolarisError::Config(e.to_string().into()))
    }
    /// Loads options from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| PolarisError::Config(format!("{}: {e}", path.display()).into()))?;
        Self::from_json_str(&content)
    }
    /// Set the identity of the calling service.
    pub fn with_source(mut self, namespace: impl Into<String>, service: impl Into<String>) -> Self {
        self.src_namespace = namespace.into();
        self.src_service = service.into();
        self
    }
    /// Add one source metadata entry.
    pub fn with_src_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.src_metadata.insert(key.into(), value.into());
        self
    }
    /// Add one destination metadata entry.
    pub fn with_dst_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.dst_metadata.insert(key.into(), value.into());
        self
    }
}
