// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

use clap::Parser;
use logimesh_polaris::client::{watch, CallInfo, CallService, ClientSuite, LbCall, RpcError};
use logimesh_polaris::config::ClientOptions;
use logimesh_polaris::registry::{MemoryRegistry, RegistryInstance, RetStatus, ServiceKey};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
struct Flags {
    /// Sets the service to call.
    #[clap(long, default_value = "polaris.quickstart.echo")]
    service: String,
    /// Sets the namespace of the service.
    #[clap(long, default_value = "default")]
    namespace: String,
    /// Sets the number of calls per round.
    #[clap(long, default_value_t = 5)]
    calls: usize,
    /// Sets a JSON file with the client routing options.
    #[clap(long)]
    options: Option<PathBuf>,
}

/// Pretends to send the request to the chosen instance.
struct EchoTransport;

impl CallService for EchoTransport {
    type Req = String;
    type Resp = String;

    async fn call(&self, info: &CallInfo, request: String) -> Result<String, RpcError> {
        match info.callee().address() {
            Some(address) => Ok(format!("{address} says {request}")),
            None => Err(RpcError::Shutdown),
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let flags = Flags::parse();
    init_tracing();

    let options = match &flags.options {
        Some(path) => ClientOptions::from_json_file(path)?,
        None => ClientOptions::new().with_source("default", "polaris.quickstart.client"),
    };

    let key = ServiceKey::new(flags.namespace.clone(), flags.service.clone());
    let registry = Arc::new(MemoryRegistry::new());
    registry.register(RegistryInstance::new(&key, "127.0.0.1", 8888).with_weight(100));
    registry.register(RegistryInstance::new(&key, "127.0.0.2", 8888).with_weight(100));

    let suite = ClientSuite::new(registry.clone()).with_dst_namespace(flags.namespace.clone()).with_options(options);
    let resolver = Arc::new(suite.build_resolver());
    let balancer = Arc::new(suite.build_balancer());
    let guard = watch::spawn_rebalancer(resolver.clone(), balancer.clone(), key.description()).await?;

    let client = LbCall::new(suite.report_layer(EchoTransport), resolver, balancer).with_retry_fn(|result, attempt| result.is_err() && attempt < 3);

    for round in 1..=2 {
        for i in 0..flags.calls {
            let mut info = CallInfo::new(suite.endpoint(flags.service.clone()), "Echo");
            match client.call(&mut info, format!("hello {round}-{i}")).await {
                Ok(resp) => tracing::info!("{resp}"),
                Err(e) => tracing::warn!("{:?}", anyhow::Error::from(e)),
            }
        }
        if round == 1 {
            registry.deregister(&key, "127.0.0.2", 8888);
            tracing::info!("127.0.0.2:8888 deregistered");
            sleep(Duration::from_millis(50)).await;
        }
    }

    // Let the background reports land.
    sleep(Duration::from_millis(50)).await;
    let results = registry.call_results();
    let succeeded = results.iter().filter(|r| r.status == RetStatus::Success).count();
    tracing::info!("{} call results reported, {succeeded} succeeded", results.len());

    guard.shutdown().await;
    Ok(())
}
