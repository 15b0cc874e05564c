//! WebSocket session lifecycle: one connected client from upgrade through
//! disconnect.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tracing::{debug, info, instrument, warn};
use vigil_core::Status;
use vigil_protocol::{AdvertisedChannel, SUBPROTOCOL, ServerMessage};

use crate::client::{Client, OutboundFrame, SessionState};
use crate::handler::{handle_binary, handle_text, unsubscribe_connection_graph};
use crate::heartbeat::{Liveness, watch_liveness};
use crate::metrics::{
    VIGIL_CLIENTS_ACTIVE, VIGIL_CONNECTIONS_TOTAL, VIGIL_DISCONNECTIONS_TOTAL,
    VIGIL_HANDSHAKE_REJECTIONS_TOTAL, VIGIL_HEARTBEAT_TIMEOUTS_TOTAL,
    VIGIL_SESSION_DURATION_SECONDS,
};
use crate::notifier::ListenerEvent;
use crate::state::ServerState;

type WsSink = SplitSink<WebSocket, Message>;

/// Extra time the writer gets, beyond the drain grace, before it is aborted.
const WRITER_JOIN_SLACK: Duration = Duration::from_millis(500);

/// Run a WebSocket session for a connected client.
///
/// 1. Rejects the connection if the client did not offer the subprotocol
/// 2. Sends `serverInfo`, then the current channel and service advertisements
/// 3. Dispatches inbound frames until close, error, timeout or shutdown
/// 4. Releases everything the client held
#[instrument(skip_all, fields(%addr, client_id))]
pub(crate) async fn run_session(
    socket: WebSocket,
    state: Arc<ServerState>,
    addr: SocketAddr,
    subprotocol_accepted: bool,
) {
    if !subprotocol_accepted {
        reject(socket).await;
        return;
    }

    let client = state.clients.register(
        addr,
        state.config.message_backlog,
        state.config.control_backlog,
        state.shutdown.session_token(),
    );
    let _ = tracing::Span::current().record("client_id", client.id().get());
    let _ = client.advance(SessionState::Negotiating);

    info!("client connected");
    counter!(VIGIL_CONNECTIONS_TOTAL).increment(1);
    gauge!(VIGIL_CLIENTS_ACTIVE).increment(1.0);
    let connected_at = Instant::now();

    let (ws_tx, mut ws_rx) = socket.split();
    handshake(&state, &client);

    let writer = tokio::spawn(write_loop(
        ws_tx,
        client.clone(),
        state.config.heartbeat_interval(),
        state.config.shutdown_grace(),
    ));
    let heartbeat = tokio::spawn({
        let client = client.clone();
        let interval = state.config.heartbeat_interval();
        let timeout = state.config.heartbeat_timeout();
        async move {
            let cancel = client.cancel_token().clone();
            if watch_liveness(client.clone(), interval, timeout, cancel).await == Liveness::Expired {
                warn!(client_id = %client.id(), ?timeout, "client unresponsive, disconnecting");
                counter!(VIGIL_HEARTBEAT_TIMEOUTS_TOTAL).increment(1);
                client.disconnect();
            }
        }
    });

    let cancel = client.cancel_token().clone();
    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => break,
            frame = ws_rx.next() => frame,
        };
        let message = match frame {
            Some(Ok(message)) => message,
            Some(Err(error)) => {
                debug!(%error, "transport error");
                break;
            }
            None => break,
        };
        client.mark_alive();
        match message {
            Message::Text(text) => handle_text(&state, &client, text.as_str()),
            Message::Binary(data) => handle_binary(&state, &client, data),
            Message::Close(_) => {
                debug!("client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    let _ = client.advance(SessionState::Closing);
    client.disconnect();
    release(&state, &client);
    client.close_queues();
    heartbeat.abort();

    let join_within = state.config.shutdown_grace() + WRITER_JOIN_SLACK;
    let abort = writer.abort_handle();
    if tokio::time::timeout(join_within, writer).await.is_err() {
        warn!("writer did not finish draining, aborting");
        abort.abort();
    }

    let _ = client.advance(SessionState::Closed);
    let _ = state.clients.remove(client.id());
    info!(
        dropped_frames = client.drop_count(),
        duration_secs = connected_at.elapsed().as_secs(),
        "client disconnected"
    );
    counter!(VIGIL_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(VIGIL_CLIENTS_ACTIVE).decrement(1.0);
    histogram!(VIGIL_SESSION_DURATION_SECONDS).record(connected_at.elapsed().as_secs_f64());
}

/// Tell a client without the subprotocol why it is being closed.
async fn reject(mut socket: WebSocket) {
    warn!("client did not offer the {SUBPROTOCOL} subprotocol, closing");
    counter!(VIGIL_HANDSHAKE_REJECTIONS_TOTAL).increment(1);
    let status = ServerMessage::Status(Status::error(format!(
        "missing required subprotocol {SUBPROTOCOL}"
    )));
    if let Ok(json) = status.to_json() {
        let _ = socket.send(Message::Text(json.into())).await;
    }
    let _ = socket.send(Message::Close(None)).await;
}

/// Queue `serverInfo` and the advertisements, then go `Active`.
///
/// Activation and the channel snapshot happen under the announcement lock,
/// so every channel reaches the client exactly once: either in the snapshot
/// or as a later `advertise` broadcast.
fn handshake(state: &ServerState, client: &Client) {
    let _ = client.send_message(&state.server_info());
    {
        let _announce = state.channels.lock_announcements();
        let _ = client.advance(SessionState::Active);
        let channels: Vec<AdvertisedChannel> =
            state.channels.infos().iter().map(AdvertisedChannel::from).collect();
        if !channels.is_empty() {
            let _ = client.send_message(&ServerMessage::Advertise { channels });
        }
    }
    if !state.services.is_empty() {
        let _ = client.send_message(&ServerMessage::AdvertiseServices {
            services: state.services.advertisements(),
        });
    }
    debug!("handshake complete");
}

/// Forward queued frames to the socket, control frames first, pinging on
/// every heartbeat interval. On cancellation, drain for up to `grace` and
/// send a close frame.
async fn write_loop(mut ws_tx: WsSink, client: Arc<Client>, ping_every: Duration, grace: Duration) {
    let mut ping = tokio::time::interval(ping_every);
    // Skip the immediate first tick
    let _ = ping.tick().await;
    let cancel = client.cancel_token().clone();

    loop {
        let frame = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            Some(frame) = client.control_queue().pop() => frame,
            Some(frame) = client.data_queue().pop() => frame,
            _ = ping.tick() => {
                if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                    client.disconnect();
                    return;
                }
                continue;
            }
        };
        if send_frame(&mut ws_tx, frame).await.is_err() {
            client.disconnect();
            return;
        }
    }

    let drain = async {
        while let Some(frame) = client.next_pending() {
            if send_frame(&mut ws_tx, frame).await.is_err() {
                return;
            }
        }
        let _ = ws_tx.send(Message::Close(None)).await;
    };
    if tokio::time::timeout(grace, drain).await.is_err() {
        debug!(client_id = %client.id(), "drain grace period elapsed");
    }
}

async fn send_frame(ws_tx: &mut WsSink, frame: OutboundFrame) -> Result<(), axum::Error> {
    let message = match frame.into_binary() {
        Ok(bytes) => Message::Binary(bytes),
        Err(text) => Message::Text(text.as_ref().into()),
    };
    ws_tx.send(message).await
}

/// Release everything a departing client holds.
pub(crate) fn release(state: &ServerState, client: &Client) {
    for (_, channel_id) in client.drain_subscriptions() {
        if let Some(channel) = state.channels.unsubscribe(client.id(), channel_id) {
            state.emit(ListenerEvent::Unsubscribed {
                client: client.id(),
                channel,
            });
        }
    }

    let client_channels = client.drain_client_channels();
    if let Some(listener) = &state.listener {
        for channel in &client_channels {
            listener.on_client_unadvertise(client.id(), channel);
        }
    }

    let names = client.drain_parameter_interest();
    if !names.is_empty() {
        let _ = state.parameters.unsubscribe(&names);
    }

    unsubscribe_connection_graph(state, client);

    let in_flight = client.in_flight_calls();
    if in_flight > 0 {
        debug!(in_flight, "discarding results of in-flight service calls");
    }
}
