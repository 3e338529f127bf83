// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! logimesh-polaris plugs a Polaris-style service registry into the logimesh client.
//!
//! The crate resolves a logical service name into a live instance set, keeps it
//! fresh from the registry's change feed, picks one instance per call through a
//! routing filter plus a weighted load balancer, and reports call outcomes back
//! to the registry.
//!
//! ```text
//! Endpoint ─► Resolver::target ─► Resolver::resolve / watcher ─► Discovery
//!          ─► Loadbalancer::get_picker ─► Picker::next ─► Instance
//!          ─► ReportCallResult ─► Registry::update_service_call_result
//! ```
#![deny(missing_docs)]
#![allow(clippy::type_complexity)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod balance;
pub mod client;
pub mod component;
pub mod config;
pub mod discover;
pub mod error;
pub mod net;
pub mod registry;
pub mod router;

pub use error::{PolarisError, Result};

/// re-public `tarpc` crate something.
pub use ::tarpc::context;
