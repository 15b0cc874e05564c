//! Demo content for `vigil --demo`: a counter channel, a few editable
//! parameters and two services.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::json;
use tracing::{debug, info};
use vigil_core::time::now_nanos;
use vigil_core::{Capability, ChannelInfo, ClientId, Parameter, Schema};
use vigil_server::{
    ClientChannel, ServerConfig, ServerHandle, ServerListener, Service, ServiceHandler,
    ServiceRequest, ServiceSchema, VigilServer,
};

const COUNTER_SCHEMA: &str = r#"{"type":"object","properties":{"count":{"type":"integer"},"phase":{"type":"number"}}}"#;

/// Enable what the demo exercises.
pub(crate) fn configure(config: ServerConfig) -> ServerConfig {
    config
        .with_capability(Capability::ClientPublish)
        .with_capability(Capability::Parameters)
        .with_capability(Capability::ParametersSubscribe)
        .with_capability(Capability::Time)
}

/// Attach the demo listener and services.
pub(crate) fn register(server: VigilServer) -> VigilServer {
    server
        .listener(Arc::new(DemoListener::new()))
        .services([
            Service::from_fn("/demo/echo", ServiceSchema::new("demo.Echo"), |req| Ok(req.payload)),
            Service::new(
                "/demo/uptime",
                ServiceSchema::new("demo.Uptime"),
                Uptime {
                    started: Instant::now(),
                },
            ),
        ])
}

/// Publish the counter channel and server time every `period` until `stop` resolves.
pub(crate) async fn run<F>(handle: &ServerHandle, period: Duration, stop: F) -> anyhow::Result<()>
where
    F: Future<Output = std::io::Result<()>>,
{
    let counter = handle.advertise_channel(
        "/demo/counter",
        "json",
        Some(Schema::new("demo.Counter", "jsonschema", COUNTER_SCHEMA)),
    )?;
    let mut tick = tokio::time::interval(period);
    let mut count: u64 = 0;
    tokio::pin!(stop);

    loop {
        tokio::select! {
            result = &mut stop => {
                result?;
                break;
            }
            _ = tick.tick() => {
                count += 1;
                #[allow(clippy::cast_precision_loss)]
                let phase = (count as f64 / 10.0).sin();
                let payload = json!({"count": count, "phase": phase}).to_string();
                let _ = counter.log(payload.as_bytes());
                handle.broadcast_time(now_nanos())?;
            }
        }
    }

    info!(published = count, "demo stopped");
    let _ = handle.withdraw_channel(counter.id());
    Ok(())
}

/// In-memory parameter store that logs client activity.
struct DemoListener {
    params: Mutex<BTreeMap<String, Parameter>>,
}

impl DemoListener {
    fn new() -> Self {
        let params = [
            Parameter::float64("speed", 1.0),
            Parameter::string("label", "demo"),
            Parameter::bool("enabled", true),
        ];
        Self {
            params: Mutex::new(params.into_iter().map(|p| (p.name.clone(), p)).collect()),
        }
    }
}

impl ServerListener for DemoListener {
    fn on_subscribe(&self, client: ClientId, channel: &ChannelInfo) {
        info!(%client, topic = %channel.topic, "client subscribed");
    }

    fn on_unsubscribe(&self, client: ClientId, channel: &ChannelInfo) {
        info!(%client, topic = %channel.topic, "client unsubscribed");
    }

    fn on_message_data(&self, client: ClientId, channel: &ClientChannel, payload: &[u8]) {
        debug!(%client, topic = %channel.topic, len = payload.len(), "client message");
    }

    fn on_get_parameters(
        &self,
        _client: ClientId,
        names: &[String],
        _request_id: Option<&str>,
    ) -> Vec<Parameter> {
        let params = self.params.lock();
        if names.is_empty() {
            return params.values().cloned().collect();
        }
        names.iter().filter_map(|n| params.get(n).cloned()).collect()
    }

    fn on_set_parameters(
        &self,
        client: ClientId,
        parameters: Vec<Parameter>,
        _request_id: Option<&str>,
    ) -> Vec<Parameter> {
        let mut params = self.params.lock();
        let mut updated = Vec::with_capacity(parameters.len());
        for param in parameters {
            info!(%client, name = %param.name, "parameter set");
            if param.is_unset() {
                let _ = params.remove(&param.name);
            } else {
                let _ = params.insert(param.name.clone(), param.clone());
                updated.push(param);
            }
        }
        updated
    }
}

struct Uptime {
    started: Instant,
}

#[async_trait]
impl ServiceHandler for Uptime {
    async fn call(&self, _request: ServiceRequest) -> Result<Bytes, String> {
        let body = json!({"uptimeSecs": self.started.elapsed().as_secs_f64()});
        Ok(Bytes::from(body.to_string()))
    }
}
