//! Service call dispatch.
//!
//! A call is validated synchronously, then runs on its own task. The result
//! goes back on the caller's control queue unless the caller has gone away.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use metrics::{counter, histogram};
use tracing::{debug, warn};
use vigil_core::{CallId, ServiceId, VigilError};
use vigil_protocol::{AdvertisedService, ServerBinaryMessage, ServerMessage};

use crate::client::Client;
use crate::metrics::{VIGIL_SERVICE_CALLS_TOTAL, VIGIL_SERVICE_CALL_DURATION_SECONDS};
use crate::service::{RegisteredService, Service, ServiceMap, ServiceRequest};

/// Validates and runs service calls.
pub struct ServiceDispatcher {
    services: ServiceMap,
    supported_encodings: Vec<String>,
}

impl ServiceDispatcher {
    /// Register `services`. Calls without a declared request encoding must use
    /// one of `supported_encodings`.
    pub fn new(services: Vec<Service>, supported_encodings: Vec<String>) -> Result<Self, VigilError> {
        Ok(Self {
            services: ServiceMap::new(services)?,
            supported_encodings,
        })
    }

    /// Descriptors for `advertiseServices`.
    pub fn advertisements(&self) -> Vec<AdvertisedService> {
        self.services.advertisements()
    }

    /// Number of registered services.
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Whether no services are registered.
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Call a service by name.
    pub fn call(
        &self,
        client: &Arc<Client>,
        service_name: &str,
        call_id: CallId,
        encoding: &str,
        payload: Bytes,
    ) -> Result<(), VigilError> {
        let service = self
            .services
            .by_name(service_name)
            .ok_or_else(|| VigilError::UnknownService(service_name.to_string()))?;
        self.dispatch(client, service.clone(), call_id, encoding, payload)
    }

    /// Call a service by id, as carried in a binary request frame.
    pub fn call_by_id(
        &self,
        client: &Arc<Client>,
        service_id: ServiceId,
        call_id: CallId,
        encoding: &str,
        payload: Bytes,
    ) -> Result<(), VigilError> {
        let service = self
            .services
            .get(service_id)
            .ok_or_else(|| VigilError::UnknownService(format!("#{service_id}")))?;
        self.dispatch(client, service.clone(), call_id, encoding, payload)
    }

    fn check_encoding(&self, service: &RegisteredService, encoding: &str) -> Result<(), VigilError> {
        let accepted = match &service.schema.request {
            Some(request) => request.encoding == encoding,
            None => self.supported_encodings.iter().any(|e| e == encoding),
        };
        if accepted {
            Ok(())
        } else {
            Err(VigilError::UnsupportedEncoding(encoding.to_string()))
        }
    }

    fn dispatch(
        &self,
        client: &Arc<Client>,
        service: Arc<RegisteredService>,
        call_id: CallId,
        encoding: &str,
        payload: Bytes,
    ) -> Result<(), VigilError> {
        self.check_encoding(&service, encoding)?;
        client.begin_call(call_id)?;

        let request = ServiceRequest {
            client_id: client.id(),
            service_name: service.name.clone(),
            call_id,
            encoding: encoding.to_string(),
            payload,
        };
        let response_encoding = service.response_encoding(encoding).to_string();
        let client = client.clone();
        debug!(client_id = %client.id(), service = %service.name, call_id = %call_id, "service call");

        let _ = tokio::spawn(async move {
            let started = Instant::now();
            let handler = service.handler.clone();
            // Nested spawn so a panicking handler surfaces as a JoinError.
            let outcome = tokio::spawn(async move { handler.call(request).await }).await;
            histogram!(VIGIL_SERVICE_CALL_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

            let result = match outcome {
                Ok(Ok(body)) => Ok(body),
                Ok(Err(message)) => Err(VigilError::Handler(message)),
                Err(e) if e.is_panic() => Err(VigilError::Handler("service handler panicked".into())),
                Err(_) => Err(VigilError::Handler("service handler was cancelled".into())),
            };
            client.finish_call(call_id);

            if client.is_disconnecting() {
                debug!(client_id = %client.id(), call_id = %call_id, "caller gone, discarding result");
                return;
            }
            match result {
                Ok(body) => {
                    counter!(VIGIL_SERVICE_CALLS_TOTAL, "outcome" => "ok").increment(1);
                    let _ = client.send_binary(&ServerBinaryMessage::ServiceCallResponse {
                        service_id: service.id,
                        call_id,
                        encoding: response_encoding,
                        payload: body,
                    });
                }
                Err(error) => {
                    counter!(VIGIL_SERVICE_CALLS_TOTAL, "outcome" => "error").increment(1);
                    warn!(client_id = %client.id(), service = %service.name, %error, "service call failed");
                    let _ = client.send_message(&ServerMessage::ServiceCallFailure {
                        service_id: service.id,
                        call_id,
                        message: error.to_string(),
                    });
                }
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;
    use vigil_core::{ClientId, Schema};

    use super::*;
    use crate::client::OutboundFrame;
    use crate::service::{MessageSchema, ServiceSchema};

    fn client() -> Arc<Client> {
        Arc::new(Client::new(
            ClientId::new(1),
            "127.0.0.1:1".parse().unwrap(),
            8,
            8,
            CancellationToken::new(),
        ))
    }

    fn dispatcher() -> ServiceDispatcher {
        let typed = ServiceSchema::new("Typed")
            .with_request(MessageSchema::new("protobuf", Schema::new("Req", "protobuf", vec![0u8])));
        ServiceDispatcher::new(
            vec![
                Service::from_fn("/echo", ServiceSchema::new("Echo"), |req| Ok(req.payload)),
                Service::from_fn("/fail", ServiceSchema::new("Fail"), |_| Err("nope".into())),
                Service::from_fn("/panic", ServiceSchema::new("Panic"), |_| panic!("handler bug")),
                Service::from_fn("/typed", typed, |_| Ok(Bytes::new())),
                Service::from_async_fn("/slow", ServiceSchema::new("Slow"), |_| async {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(Bytes::from_static(b"late"))
                }),
            ],
            vec!["json".into()],
        )
        .unwrap()
    }

    async fn next_control(client: &Client) -> OutboundFrame {
        tokio::time::timeout(Duration::from_secs(2), client.control_queue().pop())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn echo_round_trip() {
        let d = dispatcher();
        let c = client();
        d.call(&c, "/echo", CallId::new(1), "json", Bytes::from_static(b"{\"a\":1}")).unwrap();
        let frame = next_control(&c).await.into_binary().unwrap();
        assert_eq!(
            ServerBinaryMessage::decode(frame).unwrap(),
            ServerBinaryMessage::ServiceCallResponse {
                service_id: ServiceId::new(1),
                call_id: CallId::new(1),
                encoding: "json".into(),
                payload: Bytes::from_static(b"{\"a\":1}"),
            }
        );
        assert_eq!(c.in_flight_calls(), 0);
    }

    #[tokio::test]
    async fn unknown_service() {
        let d = dispatcher();
        assert!(matches!(
            d.call(&client(), "/missing", CallId::new(1), "json", Bytes::new()),
            Err(VigilError::UnknownService(_))
        ));
        assert!(matches!(
            d.call_by_id(&client(), ServiceId::new(99), CallId::new(1), "json", Bytes::new()),
            Err(VigilError::UnknownService(_))
        ));
    }

    #[tokio::test]
    async fn unsupported_encoding() {
        let d = dispatcher();
        let c = client();
        assert!(matches!(
            d.call(&c, "/echo", CallId::new(1), "cbor", Bytes::new()),
            Err(VigilError::UnsupportedEncoding(e)) if e == "cbor"
        ));
        // Declared request encoding wins over the server list.
        assert!(d.call(&c, "/typed", CallId::new(2), "json", Bytes::new()).is_err());
        assert!(d.call(&c, "/typed", CallId::new(3), "protobuf", Bytes::new()).is_ok());
    }

    #[tokio::test]
    async fn duplicate_call_id_while_in_flight() {
        let d = dispatcher();
        let c = client();
        d.call(&c, "/slow", CallId::new(5), "json", Bytes::new()).unwrap();
        assert!(matches!(
            d.call(&c, "/slow", CallId::new(5), "json", Bytes::new()),
            Err(VigilError::DuplicateCallId(_))
        ));
        let _ = next_control(&c).await;
        assert!(d.call(&c, "/slow", CallId::new(5), "json", Bytes::new()).is_ok());
    }

    #[tokio::test]
    async fn handler_error_becomes_failure() {
        let d = dispatcher();
        let c = client();
        d.call(&c, "/fail", CallId::new(7), "json", Bytes::new()).unwrap();
        match next_control(&c).await {
            OutboundFrame::Text(json) => {
                let v: serde_json::Value = serde_json::from_str(&json).unwrap();
                assert_eq!(v["op"], "serviceCallFailure");
                assert_eq!(v["callId"], 7);
                assert!(v["message"].as_str().unwrap().contains("nope"));
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[tokio::test]
    async fn panic_is_contained() {
        let d = dispatcher();
        let c = client();
        d.call(&c, "/panic", CallId::new(1), "json", Bytes::new()).unwrap();
        assert!(matches!(next_control(&c).await, OutboundFrame::Text(t) if t.contains("panicked")));
        // The dispatcher still works afterwards.
        d.call(&c, "/echo", CallId::new(2), "json", Bytes::new()).unwrap();
        assert!(matches!(next_control(&c).await, OutboundFrame::Binary(_)));
    }

    #[tokio::test]
    async fn result_discarded_after_disconnect() {
        let d = dispatcher();
        let c = client();
        d.call(&c, "/slow", CallId::new(1), "json", Bytes::new()).unwrap();
        c.disconnect();
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(c.control_queue().is_empty());
        assert_eq!(c.in_flight_calls(), 0);
    }

    #[test]
    fn advertisements_listed() {
        let d = dispatcher();
        assert_eq!(d.len(), 5);
        let names: Vec<_> = d.advertisements().into_iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["/echo", "/fail", "/panic", "/typed", "/slow"]);
    }
}
