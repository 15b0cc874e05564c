//! Inbound frame dispatch.
//!
//! Every request is handled on the client's reader task. Anything slow
//! (service handlers, asset fetches) is spawned; everything else completes
//! before the next frame is read. Failures are reported to the client as an
//! error `status` and never close the connection.

use std::sync::Arc;

use bytes::Bytes;
use metrics::counter;
use tracing::{debug, instrument, warn};
use vigil_core::{
    Capability, ChannelId, ClientChannelId, Parameter, Status, SubscriptionId, VigilError,
};
use vigil_protocol::{
    ClientBinaryMessage, ClientChannelAdvertisement, ClientMessage, ServerMessage,
    ServiceCallRequest, WireParameter,
};

use crate::client::{Client, ClientChannel};
use crate::metrics::{VIGIL_REQUESTS_TOTAL, VIGIL_REQUEST_ERRORS_TOTAL};
use crate::notifier::ListenerEvent;
use crate::state::ServerState;

/// Handle a JSON text frame.
#[instrument(skip_all, fields(client_id = %client.id(), op))]
pub(crate) fn handle_text(state: &ServerState, client: &Arc<Client>, text: &str) {
    let message = match ClientMessage::parse(text) {
        Ok(message) => message,
        Err(error) => {
            warn!(%error, "invalid client message");
            report(client, "invalid", &error.into());
            return;
        }
    };
    let op = message.op();
    let _ = tracing::Span::current().record("op", op);
    counter!(VIGIL_REQUESTS_TOTAL, "op" => op).increment(1);

    if let Err(error) = dispatch(state, client, message) {
        report(client, op, &error);
    }
}

/// Handle a binary frame.
#[instrument(skip_all, fields(client_id = %client.id(), len = frame.len()))]
pub(crate) fn handle_binary(state: &ServerState, client: &Arc<Client>, frame: Bytes) {
    let message = match ClientBinaryMessage::decode(frame) {
        Ok(message) => message,
        Err(error) => {
            warn!(%error, "invalid binary frame");
            report(client, "invalid", &error.into());
            return;
        }
    };

    match message {
        ClientBinaryMessage::MessageData { channel_id, payload } => {
            counter!(VIGIL_REQUESTS_TOTAL, "op" => "messageData").increment(1);
            if let Err(error) = message_data(state, client, channel_id, &payload) {
                report(client, "messageData", &error);
            }
        }
        ClientBinaryMessage::ServiceCallRequest(request) => {
            counter!(VIGIL_REQUESTS_TOTAL, "op" => "serviceCallRequest").increment(1);
            service_call(state, client, request);
        }
    }
}

fn dispatch(state: &ServerState, client: &Arc<Client>, message: ClientMessage) -> Result<(), VigilError> {
    match message {
        ClientMessage::Subscribe { subscriptions } => {
            // Each entry stands alone: one bad id does not reject the rest.
            for request in subscriptions {
                if let Err(error) = subscribe(state, client, request.id, request.channel_id) {
                    report(client, "subscribe", &error);
                }
            }
            Ok(())
        }
        ClientMessage::Unsubscribe { subscription_ids } => {
            for id in subscription_ids {
                unsubscribe(state, client, id);
            }
            Ok(())
        }
        ClientMessage::Advertise { channels } => {
            state.require(Capability::ClientPublish)?;
            for advertisement in channels {
                if let Err(error) = client_advertise(state, client, advertisement) {
                    report(client, "advertise", &error);
                }
            }
            Ok(())
        }
        ClientMessage::Unadvertise { channel_ids } => {
            state.require(Capability::ClientPublish)?;
            for id in channel_ids {
                client_unadvertise(state, client, id);
            }
            Ok(())
        }
        ClientMessage::GetParameters { parameter_names, id } => {
            state.require(Capability::Parameters)?;
            let values = state.parameters.get(client.id(), &parameter_names, id.as_deref());
            let _ = client.send_message(&ServerMessage::ParameterValues {
                parameters: values.iter().map(WireParameter::from).collect(),
                id,
            });
            Ok(())
        }
        ClientMessage::SetParameters { parameters, id } => {
            state.require(Capability::Parameters)?;
            set_parameters(state, client, parameters, id)
        }
        ClientMessage::SubscribeParameterUpdates { parameter_names } => {
            state.require(Capability::ParametersSubscribe)?;
            let added = client.add_parameter_interest(&parameter_names);
            if !added.is_empty() {
                let _ = state.parameters.subscribe(&added);
            }
            Ok(())
        }
        ClientMessage::UnsubscribeParameterUpdates { parameter_names } => {
            state.require(Capability::ParametersSubscribe)?;
            let removed = client.remove_parameter_interest(&parameter_names);
            if !removed.is_empty() {
                let _ = state.parameters.unsubscribe(&removed);
            }
            Ok(())
        }
        ClientMessage::SubscribeConnectionGraph => {
            state.require(Capability::ConnectionGraph)?;
            subscribe_connection_graph(state, client);
            Ok(())
        }
        ClientMessage::UnsubscribeConnectionGraph => {
            state.require(Capability::ConnectionGraph)?;
            unsubscribe_connection_graph(state, client);
            Ok(())
        }
        ClientMessage::FetchAsset { uri, request_id } => {
            state.require(Capability::Assets)?;
            let resolver = state
                .assets
                .as_ref()
                .ok_or(VigilError::Capability(Capability::Assets))?;
            resolver.fetch(client, uri, request_id);
            Ok(())
        }
    }
}

/// Subscribe a client to a channel.
pub(crate) fn subscribe(
    state: &ServerState,
    client: &Client,
    id: SubscriptionId,
    channel_id: ChannelId,
) -> Result<(), VigilError> {
    if state.channels.get(channel_id).is_none() {
        return Err(VigilError::UnknownChannel(channel_id));
    }
    client.add_subscription(id, channel_id)?;
    match state.channels.subscribe(client.id(), id, channel_id) {
        Ok(channel) => {
            debug!(subscription_id = %id, channel_id = %channel_id, "subscribed");
            state.emit(ListenerEvent::Subscribed {
                client: client.id(),
                channel,
            });
            Ok(())
        }
        Err(error) => {
            // Withdrawn between the lookup and the registry insert.
            let _ = client.remove_subscription(id);
            Err(error)
        }
    }
}

/// Drop a subscription. Unknown ids are ignored.
pub(crate) fn unsubscribe(state: &ServerState, client: &Client, id: SubscriptionId) {
    let Some(channel_id) = client.remove_subscription(id) else {
        debug!(subscription_id = %id, "unsubscribe for unknown subscription");
        return;
    };
    if let Some(channel) = state.channels.unsubscribe(client.id(), channel_id) {
        state.emit(ListenerEvent::Unsubscribed {
            client: client.id(),
            channel,
        });
    }
}

fn client_advertise(
    state: &ServerState,
    client: &Client,
    advertisement: ClientChannelAdvertisement,
) -> Result<(), VigilError> {
    if !state
        .config
        .supported_encodings
        .iter()
        .any(|e| *e == advertisement.encoding)
    {
        return Err(VigilError::UnsupportedEncoding(advertisement.encoding));
    }
    let channel = client.add_client_channel(ClientChannel {
        id: advertisement.id,
        topic: advertisement.topic,
        encoding: advertisement.encoding,
        schema_name: advertisement.schema_name,
        schema: advertisement.schema,
        schema_encoding: advertisement.schema_encoding,
    })?;
    debug!(channel_id = %channel.id, topic = %channel.topic, "client advertised channel");
    if let Some(listener) = &state.listener {
        listener.on_client_advertise(client.id(), &channel);
    }
    Ok(())
}

fn client_unadvertise(state: &ServerState, client: &Client, id: ClientChannelId) {
    let Some(channel) = client.remove_client_channel(id) else {
        debug!(channel_id = %id, "unadvertise for unknown client channel");
        return;
    };
    if let Some(listener) = &state.listener {
        listener.on_client_unadvertise(client.id(), &channel);
    }
}

fn message_data(
    state: &ServerState,
    client: &Client,
    channel_id: ClientChannelId,
    payload: &[u8],
) -> Result<(), VigilError> {
    state.require(Capability::ClientPublish)?;
    let channel = client
        .client_channel(channel_id)
        .ok_or(VigilError::UnknownClientChannel(channel_id))?;
    if let Some(listener) = &state.listener {
        listener.on_message_data(client.id(), &channel, payload);
    }
    Ok(())
}

fn set_parameters(
    state: &ServerState,
    client: &Client,
    parameters: Vec<WireParameter>,
    id: Option<String>,
) -> Result<(), VigilError> {
    let parameters = parameters
        .into_iter()
        .map(WireParameter::into_parameter)
        .collect::<Result<Vec<Parameter>, _>>()?;
    let updated = state.parameters.set(client.id(), parameters, id.as_deref());

    // Only requests carrying an id get a direct reply; the others still see
    // the push if they are subscribed.
    let exclude = id.is_some().then(|| client.id());
    if id.is_some() {
        let _ = client.send_message(&ServerMessage::ParameterValues {
            parameters: updated.iter().map(WireParameter::from).collect(),
            id,
        });
    }
    let _ = state.push_parameter_values(&updated, exclude);
    Ok(())
}

fn service_call(state: &ServerState, client: &Arc<Client>, request: ServiceCallRequest) {
    let ServiceCallRequest {
        service_id,
        call_id,
        encoding,
        payload,
    } = request;
    let result = state
        .require(Capability::Services)
        .and_then(|()| state.services.call_by_id(client, service_id, call_id, &encoding, payload));
    if let Err(error) = result {
        counter!(VIGIL_REQUEST_ERRORS_TOTAL, "kind" => error.error_kind()).increment(1);
        debug!(service_id = %service_id, call_id = %call_id, %error, "service call rejected");
        let _ = client.send_message(&ServerMessage::ServiceCallFailure {
            service_id,
            call_id,
            message: error.to_string(),
        });
    }
}

fn subscribe_connection_graph(state: &ServerState, client: &Client) {
    if client.set_graph_subscribed(true) {
        return;
    }
    let _ = state.graph.add_subscriber(|| {
        if let Some(listener) = &state.listener {
            listener.on_connection_graph_subscribe();
        }
    });
    let _ = client.send_message(&ServerMessage::ConnectionGraphUpdate(state.graph.full()));
}

/// Drop a client's connection graph subscription, if any.
pub(crate) fn unsubscribe_connection_graph(state: &ServerState, client: &Client) {
    if !client.set_graph_subscribed(false) {
        return;
    }
    let _ = state.graph.remove_subscriber(|| {
        if let Some(listener) = &state.listener {
            listener.on_connection_graph_unsubscribe();
        }
    });
}

fn report(client: &Client, op: &str, error: &VigilError) {
    counter!(VIGIL_REQUEST_ERRORS_TOTAL, "kind" => error.error_kind()).increment(1);
    debug!(op, %error, "request failed");
    let _ = client.send_message(&ServerMessage::Status(Status::error(error.to_string())));
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parking_lot::Mutex;
    use serde_json::{Value, json};
    use tokio_util::sync::CancellationToken;
    use vigil_core::{CallId, ChannelInfo, ClientId, ServiceId};
    use vigil_protocol::ServerBinaryMessage;

    use super::*;
    use crate::client::{OutboundFrame, SessionState};
    use crate::config::ServerConfig;
    use crate::listener::ServerListener;
    use crate::service::{Service, ServiceSchema};

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl ServerListener for Recorder {
        fn on_client_advertise(&self, _: ClientId, channel: &ClientChannel) {
            self.calls.lock().push(format!("advertise {}", channel.topic));
        }
        fn on_client_unadvertise(&self, _: ClientId, channel: &ClientChannel) {
            self.calls.lock().push(format!("unadvertise {}", channel.topic));
        }
        fn on_message_data(&self, _: ClientId, channel: &ClientChannel, payload: &[u8]) {
            self.calls
                .lock()
                .push(format!("data {} {}", channel.topic, String::from_utf8_lossy(payload)));
        }
        fn on_get_parameters(&self, _: ClientId, _: &[String], _: Option<&str>) -> Vec<Parameter> {
            vec![Parameter::float64("speed", 1.5), Parameter::string("mode", "auto")]
        }
        fn on_connection_graph_subscribe(&self) {
            self.calls.lock().push("graph subscribe".into());
        }
        fn on_connection_graph_unsubscribe(&self) {
            self.calls.lock().push("graph unsubscribe".into());
        }
        fn on_subscribe(&self, _: ClientId, channel: &ChannelInfo) {
            self.calls.lock().push(format!("subscribe {}", channel.topic));
        }
    }

    fn all_capabilities() -> ServerConfig {
        Capability::ALL
            .into_iter()
            .fold(ServerConfig::default(), ServerConfig::with_capability)
    }

    fn state_with(config: ServerConfig, listener: &Arc<Recorder>, services: Vec<Service>) -> ServerState {
        let listener: Arc<dyn ServerListener> = listener.clone();
        ServerState::new(config, services, Some(listener), None, None).unwrap()
    }

    fn connect(state: &ServerState) -> Arc<Client> {
        let client = state.clients.register(
            "127.0.0.1:1".parse().unwrap(),
            16,
            16,
            CancellationToken::new(),
        );
        let _ = client.advance(SessionState::Active);
        client
    }

    fn texts(client: &Client) -> Vec<Value> {
        std::iter::from_fn(|| client.control_queue().try_pop())
            .filter_map(|f| match f {
                OutboundFrame::Text(t) => serde_json::from_str(&t).ok(),
                _ => None,
            })
            .collect()
    }

    fn send(state: &ServerState, client: &Arc<Client>, value: Value) {
        handle_text(state, client, &value.to_string());
    }

    #[test]
    fn invalid_json_reports_status() {
        let listener = Arc::new(Recorder::default());
        let state = state_with(ServerConfig::default(), &listener, Vec::new());
        let client = connect(&state);
        handle_text(&state, &client, "{nope");
        let msgs = texts(&client);
        assert_eq!(msgs[0]["op"], "status");
        assert_eq!(msgs[0]["level"], 2);
        assert!(!client.is_disconnecting());
    }

    #[test]
    fn subscribe_unknown_channel_reports_error() {
        let listener = Arc::new(Recorder::default());
        let state = state_with(ServerConfig::default(), &listener, Vec::new());
        let client = connect(&state);
        send(&state, &client, json!({"op": "subscribe", "subscriptions": [{"id": 1, "channelId": 99}]}));
        let msgs = texts(&client);
        assert!(msgs[0]["message"].as_str().unwrap().contains("unknown channel"));
        assert_eq!(client.subscription_count(), 0);
    }

    #[test]
    fn subscribe_then_unsubscribe_is_idempotent() {
        let listener = Arc::new(Recorder::default());
        let state = state_with(ServerConfig::default(), &listener, Vec::new());
        let client = connect(&state);
        let entry = state.advertise_channel("/imu", "json", None).unwrap();
        let _ = texts(&client);

        send(&state, &client, json!({"op": "subscribe", "subscriptions": [{"id": 7, "channelId": entry.id().get()}]}));
        assert_eq!(entry.subscriber_count(), 1);
        send(&state, &client, json!({"op": "unsubscribe", "subscriptionIds": [7]}));
        send(&state, &client, json!({"op": "unsubscribe", "subscriptionIds": [7, 8]}));
        assert_eq!(entry.subscriber_count(), 0);
        assert!(texts(&client).is_empty());
    }

    #[test]
    fn duplicate_subscription_rejected() {
        let listener = Arc::new(Recorder::default());
        let state = state_with(ServerConfig::default(), &listener, Vec::new());
        let client = connect(&state);
        let entry = state.advertise_channel("/imu", "json", None).unwrap();
        let _ = texts(&client);
        let id = entry.id().get();
        send(
            &state,
            &client,
            json!({"op": "subscribe", "subscriptions": [{"id": 1, "channelId": id}, {"id": 2, "channelId": id}]}),
        );
        assert_eq!(client.subscription_count(), 1);
        let msgs = texts(&client);
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0]["message"].as_str().unwrap().contains("already subscribed"));
    }

    #[test]
    fn client_publish_requires_capability() {
        let listener = Arc::new(Recorder::default());
        let state = state_with(ServerConfig::default(), &listener, Vec::new());
        let client = connect(&state);
        send(
            &state,
            &client,
            json!({"op": "advertise", "channels": [{"id": 1, "topic": "/cmd", "encoding": "json", "schemaName": "Cmd"}]}),
        );
        let msgs = texts(&client);
        assert!(msgs[0]["message"].as_str().unwrap().contains("clientPublish"));
        assert!(listener.calls.lock().is_empty());
        assert!(!client.is_disconnecting());
    }

    #[test]
    fn client_channel_lifecycle() {
        let listener = Arc::new(Recorder::default());
        let state = state_with(all_capabilities(), &listener, Vec::new());
        let client = connect(&state);
        send(
            &state,
            &client,
            json!({"op": "advertise", "channels": [{"id": 1, "topic": "/cmd", "encoding": "json", "schemaName": "Cmd"}]}),
        );
        let mut frame = vec![0x01];
        frame.extend_from_slice(&1u32.to_le_bytes());
        frame.extend_from_slice(b"go");
        handle_binary(&state, &client, Bytes::from(frame));
        send(&state, &client, json!({"op": "unadvertise", "channelIds": [1]}));

        assert_eq!(
            *listener.calls.lock(),
            vec!["advertise /cmd", "data /cmd go", "unadvertise /cmd"]
        );
        assert!(texts(&client).is_empty());
    }

    #[test]
    fn unsupported_client_encoding_rejected() {
        let listener = Arc::new(Recorder::default());
        let state = state_with(all_capabilities(), &listener, Vec::new());
        let client = connect(&state);
        send(
            &state,
            &client,
            json!({"op": "advertise", "channels": [{"id": 1, "topic": "/cmd", "encoding": "cdr", "schemaName": "Cmd"}]}),
        );
        assert!(texts(&client)[0]["message"].as_str().unwrap().contains("unsupported encoding"));
        assert!(client.client_channel(ClientChannelId::new(1)).is_none());
    }

    #[test]
    fn data_on_unknown_client_channel() {
        let listener = Arc::new(Recorder::default());
        let state = state_with(all_capabilities(), &listener, Vec::new());
        let client = connect(&state);
        let mut frame = vec![0x01];
        frame.extend_from_slice(&5u32.to_le_bytes());
        handle_binary(&state, &client, Bytes::from(frame));
        assert!(texts(&client)[0]["message"].as_str().unwrap().contains("unknown client channel"));
    }

    #[test]
    fn get_parameters_echoes_id() {
        let listener = Arc::new(Recorder::default());
        let state = state_with(all_capabilities(), &listener, Vec::new());
        let client = connect(&state);
        send(&state, &client, json!({"op": "getParameters", "parameterNames": ["speed"], "id": "req-1"}));
        let msgs = texts(&client);
        assert_eq!(msgs[0]["op"], "parameterValues");
        assert_eq!(msgs[0]["id"], "req-1");
        assert_eq!(msgs[0]["parameters"].as_array().unwrap().len(), 1);
        assert_eq!(msgs[0]["parameters"][0]["name"], "speed");
    }

    #[test]
    fn set_parameters_replies_and_pushes() {
        let listener = Arc::new(Recorder::default());
        let state = state_with(all_capabilities(), &listener, Vec::new());
        let setter = connect(&state);
        let watcher = connect(&state);
        send(&state, &watcher, json!({"op": "subscribeParameterUpdates", "parameterNames": ["speed"]}));
        send(&state, &setter, json!({"op": "subscribeParameterUpdates", "parameterNames": ["speed"]}));
        send(
            &state,
            &setter,
            json!({"op": "setParameters", "parameters": [{"name": "speed", "value": 3.0}], "id": "s1"}),
        );

        let reply = texts(&setter);
        assert_eq!(reply.len(), 1);
        assert_eq!(reply[0]["id"], "s1");
        assert_eq!(reply[0]["parameters"][0]["value"], 3.0);

        let pushed = texts(&watcher);
        assert_eq!(pushed.len(), 1);
        assert!(pushed[0].get("id").is_none());
        assert_eq!(pushed[0]["parameters"][0]["name"], "speed");
    }

    #[test]
    fn parameter_subscription_requires_capability() {
        let listener = Arc::new(Recorder::default());
        let config = ServerConfig::default().with_capability(Capability::Parameters);
        let state = state_with(config, &listener, Vec::new());
        let client = connect(&state);
        send(&state, &client, json!({"op": "subscribeParameterUpdates", "parameterNames": ["speed"]}));
        assert!(texts(&client)[0]["message"].as_str().unwrap().contains("parametersSubscribe"));
        assert!(!client.is_interested_in("speed"));
    }

    #[test]
    fn connection_graph_subscription() {
        let listener = Arc::new(Recorder::default());
        let state = state_with(all_capabilities(), &listener, Vec::new());
        let a = connect(&state);
        let b = connect(&state);
        send(&state, &a, json!({"op": "subscribeConnectionGraph"}));
        send(&state, &a, json!({"op": "subscribeConnectionGraph"}));
        send(&state, &b, json!({"op": "subscribeConnectionGraph"}));
        assert_eq!(state.graph.subscriber_count(), 2);
        assert_eq!(texts(&a).len(), 1);
        assert_eq!(texts(&b)[0]["op"], "connectionGraphUpdate");

        send(&state, &a, json!({"op": "unsubscribeConnectionGraph"}));
        send(&state, &b, json!({"op": "unsubscribeConnectionGraph"}));
        assert_eq!(*listener.calls.lock(), vec!["graph subscribe", "graph unsubscribe"]);
    }

    #[test]
    fn fetch_asset_without_handler_is_rejected() {
        let listener = Arc::new(Recorder::default());
        let state = state_with(ServerConfig::default(), &listener, Vec::new());
        let client = connect(&state);
        send(&state, &client, json!({"op": "fetchAsset", "uri": "package://a", "requestId": 1}));
        assert!(texts(&client)[0]["message"].as_str().unwrap().contains("assets"));
    }

    #[tokio::test]
    async fn service_call_round_trip() {
        let listener = Arc::new(Recorder::default());
        let echo = Service::from_fn("/echo", ServiceSchema::new("Echo"), |req| Ok(req.payload));
        let state = state_with(ServerConfig::default(), &listener, vec![echo]);
        let client = connect(&state);

        let mut frame = vec![0x02];
        frame.extend_from_slice(&1u32.to_le_bytes());
        frame.extend_from_slice(&9u32.to_le_bytes());
        frame.extend_from_slice(&4u32.to_le_bytes());
        frame.extend_from_slice(b"json");
        frame.extend_from_slice(b"{}");
        handle_binary(&state, &client, Bytes::from(frame));

        let response = tokio::time::timeout(Duration::from_secs(2), client.control_queue().pop())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            ServerBinaryMessage::decode(response.into_binary().unwrap()).unwrap(),
            ServerBinaryMessage::ServiceCallResponse {
                service_id: ServiceId::new(1),
                call_id: CallId::new(9),
                encoding: "json".into(),
                payload: Bytes::from_static(b"{}"),
            }
        );
    }

    #[test]
    fn unknown_service_sends_failure() {
        let listener = Arc::new(Recorder::default());
        let state = state_with(ServerConfig::default().with_capability(Capability::Services), &listener, Vec::new());
        let client = connect(&state);
        let mut frame = vec![0x02];
        frame.extend_from_slice(&42u32.to_le_bytes());
        frame.extend_from_slice(&1u32.to_le_bytes());
        frame.extend_from_slice(&4u32.to_le_bytes());
        frame.extend_from_slice(b"json");
        handle_binary(&state, &client, Bytes::from(frame));
        let msgs = texts(&client);
        assert_eq!(msgs[0]["op"], "serviceCallFailure");
        assert_eq!(msgs[0]["serviceId"], 42);
        assert_eq!(msgs[0]["callId"], 1);
    }

    #[test]
    fn truncated_binary_frame_reports_status() {
        let listener = Arc::new(Recorder::default());
        let state = state_with(all_capabilities(), &listener, Vec::new());
        let client = connect(&state);
        handle_binary(&state, &client, Bytes::from_static(&[0x01, 0x00]));
        assert_eq!(texts(&client)[0]["op"], "status");
    }
}
