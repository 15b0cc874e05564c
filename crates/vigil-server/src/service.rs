//! Services: named request/response endpoints clients can call.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use vigil_core::{CallId, ClientId, Schema, ServiceId, VigilError};
use vigil_protocol::{AdvertisedService, WireMessageSchema};

/// Encoding and schema of a request or response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageSchema {
    /// Message encoding, e.g. `json`.
    pub encoding: String,
    /// Message schema.
    pub schema: Schema,
}

impl MessageSchema {
    /// Create a message schema.
    pub fn new(encoding: impl Into<String>, schema: Schema) -> Self {
        Self {
            encoding: encoding.into(),
            schema,
        }
    }
}

/// Schema of a service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceSchema {
    /// Schema name advertised as the service type.
    pub name: String,
    /// Request schema. Without one, any supported encoding is accepted.
    pub request: Option<MessageSchema>,
    /// Response schema. Without one, responses reuse the request encoding.
    pub response: Option<MessageSchema>,
}

impl ServiceSchema {
    /// A schema with no request or response definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            request: None,
            response: None,
        }
    }

    /// Set the request schema.
    #[must_use]
    pub fn with_request(mut self, request: MessageSchema) -> Self {
        self.request = Some(request);
        self
    }

    /// Set the response schema.
    #[must_use]
    pub fn with_response(mut self, response: MessageSchema) -> Self {
        self.response = Some(response);
        self
    }
}

/// A call delivered to a service handler.
#[derive(Clone, Debug)]
pub struct ServiceRequest {
    /// Calling client.
    pub client_id: ClientId,
    /// Service name.
    pub service_name: String,
    /// Client-chosen call id.
    pub call_id: CallId,
    /// Request encoding.
    pub encoding: String,
    /// Raw request body.
    pub payload: Bytes,
}

/// Handles calls to one service.
///
/// Each call runs on its own task. A returned `Err` or a panic is reported
/// to the caller as a call failure; other calls are unaffected.
#[async_trait]
pub trait ServiceHandler: Send + Sync + 'static {
    /// Handle a call, returning the response body or an error message.
    async fn call(&self, request: ServiceRequest) -> Result<Bytes, String>;
}

struct BlockingFn<F>(Arc<F>);

#[async_trait]
impl<F> ServiceHandler for BlockingFn<F>
where
    F: Fn(ServiceRequest) -> Result<Bytes, String> + Send + Sync + 'static,
{
    async fn call(&self, request: ServiceRequest) -> Result<Bytes, String> {
        let f = self.0.clone();
        match tokio::task::spawn_blocking(move || f(request)).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err("service handler panicked".into()),
            Err(_) => Err("service handler was cancelled".into()),
        }
    }
}

struct AsyncFn<F>(F);

#[async_trait]
impl<F, Fut> ServiceHandler for AsyncFn<F>
where
    F: Fn(ServiceRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Bytes, String>> + Send + 'static,
{
    async fn call(&self, request: ServiceRequest) -> Result<Bytes, String> {
        (self.0)(request).await
    }
}

/// A service ready to be registered with the server.
#[derive(Clone)]
pub struct Service {
    name: String,
    schema: ServiceSchema,
    handler: Arc<dyn ServiceHandler>,
}

impl Service {
    /// Create a service from any handler.
    pub fn new(name: impl Into<String>, schema: ServiceSchema, handler: impl ServiceHandler) -> Self {
        Self {
            name: name.into(),
            schema,
            handler: Arc::new(handler),
        }
    }

    /// Create a service from a synchronous function, run on the blocking pool.
    pub fn from_fn<F>(name: impl Into<String>, schema: ServiceSchema, f: F) -> Self
    where
        F: Fn(ServiceRequest) -> Result<Bytes, String> + Send + Sync + 'static,
    {
        Self::new(name, schema, BlockingFn(Arc::new(f)))
    }

    /// Create a service from an async function.
    pub fn from_async_fn<F, Fut>(name: impl Into<String>, schema: ServiceSchema, f: F) -> Self
    where
        F: Fn(ServiceRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Bytes, String>> + Send + 'static,
    {
        Self::new(name, schema, AsyncFn(f))
    }

    /// Service name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Service schema.
    pub fn schema(&self) -> &ServiceSchema {
        &self.schema
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("schema", &self.schema.name)
            .finish_non_exhaustive()
    }
}

/// A service with its server-assigned id.
pub struct RegisteredService {
    /// Server-assigned id.
    pub id: ServiceId,
    /// Service name.
    pub name: String,
    /// Service schema.
    pub schema: ServiceSchema,
    pub(crate) handler: Arc<dyn ServiceHandler>,
}

impl RegisteredService {
    /// Descriptor sent in `advertiseServices`.
    pub fn advertisement(&self) -> AdvertisedService {
        AdvertisedService {
            id: self.id,
            name: self.name.clone(),
            r#type: self.schema.name.clone(),
            request: self
                .schema
                .request
                .as_ref()
                .map(|m| WireMessageSchema::new(&m.encoding, &m.schema)),
            response: self
                .schema
                .response
                .as_ref()
                .map(|m| WireMessageSchema::new(&m.encoding, &m.schema)),
        }
    }

    /// Encoding to label a response with, given the request encoding.
    pub fn response_encoding<'a>(&'a self, request_encoding: &'a str) -> &'a str {
        self.schema
            .response
            .as_ref()
            .map_or(request_encoding, |m| m.encoding.as_str())
    }
}

/// Registered services, fixed for the life of the server.
#[derive(Default)]
pub struct ServiceMap {
    by_id: HashMap<ServiceId, Arc<RegisteredService>>,
    by_name: HashMap<String, ServiceId>,
}

impl ServiceMap {
    /// Register services, assigning ids from 1 in the given order.
    pub fn new(services: Vec<Service>) -> Result<Self, VigilError> {
        let mut map = Self::default();
        for (index, service) in services.into_iter().enumerate() {
            if map.by_name.contains_key(&service.name) {
                return Err(VigilError::DuplicateService(service.name));
            }
            let raw = u32::try_from(index + 1)
                .map_err(|_| VigilError::Config("too many services".into()))?;
            let id = ServiceId::new(raw);
            let _ = map.by_name.insert(service.name.clone(), id);
            let _ = map.by_id.insert(
                id,
                Arc::new(RegisteredService {
                    id,
                    name: service.name,
                    schema: service.schema,
                    handler: service.handler,
                }),
            );
        }
        Ok(map)
    }

    /// Look up by id.
    pub fn get(&self, id: ServiceId) -> Option<&Arc<RegisteredService>> {
        self.by_id.get(&id)
    }

    /// Look up by name.
    pub fn by_name(&self, name: &str) -> Option<&Arc<RegisteredService>> {
        self.by_name.get(name).and_then(|id| self.by_id.get(id))
    }

    /// Descriptors of every service, ordered by id.
    pub fn advertisements(&self) -> Vec<AdvertisedService> {
        let mut ads: Vec<_> = self.by_id.values().map(|s| s.advertisement()).collect();
        ads.sort_by_key(|a| a.id);
        ads
    }

    /// Number of services.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether no services are registered.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo(name: &str) -> Service {
        Service::from_fn(name, ServiceSchema::new("Echo"), |req| Ok(req.payload))
    }

    fn request(payload: &'static [u8]) -> ServiceRequest {
        ServiceRequest {
            client_id: ClientId::new(1),
            service_name: "/echo".into(),
            call_id: CallId::new(1),
            encoding: "json".into(),
            payload: Bytes::from_static(payload),
        }
    }

    #[test]
    fn ids_assigned_in_order() {
        let map = ServiceMap::new(vec![echo("/a"), echo("/b")]).unwrap();
        assert_eq!(map.by_name("/a").unwrap().id, ServiceId::new(1));
        assert_eq!(map.by_name("/b").unwrap().id, ServiceId::new(2));
        assert_eq!(map.get(ServiceId::new(2)).unwrap().name, "/b");
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn duplicate_names_rejected() {
        assert!(matches!(
            ServiceMap::new(vec![echo("/a"), echo("/a")]),
            Err(VigilError::DuplicateService(n)) if n == "/a"
        ));
    }

    #[test]
    fn advertisement_carries_schemas() {
        let schema = ServiceSchema::new("std_srvs/SetBool")
            .with_request(MessageSchema::new("json", Schema::new("Req", "jsonschema", "{}")))
            .with_response(MessageSchema::new("cbor", Schema::new("Res", "jsonschema", "{}")));
        let map = ServiceMap::new(vec![Service::from_fn("/set", schema, |_| Ok(Bytes::new()))]).unwrap();
        let ads = map.advertisements();
        assert_eq!(ads[0].r#type, "std_srvs/SetBool");
        assert_eq!(ads[0].request.as_ref().unwrap().schema_name, "Req");
        assert_eq!(map.by_name("/set").unwrap().response_encoding("json"), "cbor");
    }

    #[test]
    fn response_encoding_falls_back_to_request() {
        let map = ServiceMap::new(vec![echo("/a")]).unwrap();
        assert_eq!(map.by_name("/a").unwrap().response_encoding("json"), "json");
    }

    #[tokio::test]
    async fn blocking_handler_runs() {
        let service = echo("/echo");
        let out = service.handler.call(request(b"hi")).await.unwrap();
        assert_eq!(&out[..], b"hi");
    }

    #[tokio::test]
    async fn blocking_handler_panic_becomes_error() {
        let service = Service::from_fn("/boom", ServiceSchema::new("Boom"), |_| panic!("boom"));
        let err = service.handler.call(request(b"")).await.unwrap_err();
        assert!(err.contains("panicked"));
    }

    #[tokio::test]
    async fn async_handler_runs() {
        let service = Service::from_async_fn("/len", ServiceSchema::new("Len"), |req| async move {
            Ok(Bytes::from(req.payload.len().to_string()))
        });
        let out = service.handler.call(request(b"four")).await.unwrap();
        assert_eq!(&out[..], b"4");
    }
}
