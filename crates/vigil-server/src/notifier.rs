//! Ordered delivery of subscription events to the listener.
//!
//! Subscribe and unsubscribe happen on many reader tasks at once. Funnelling
//! them through one queue gives the listener a single, ordered stream.
//!
//! The queue is unbounded. Its depth is exported as
//! `vigil_listener_events_pending`.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use metrics::gauge;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use vigil_core::{ChannelInfo, ClientId};

use crate::listener::ServerListener;
use crate::metrics::VIGIL_LISTENER_EVENTS_PENDING;

/// A subscription change to report to the listener.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ListenerEvent {
    /// A client subscribed to a channel.
    Subscribed {
        /// Subscribing client.
        client: ClientId,
        /// Channel subscribed to.
        channel: ChannelInfo,
    },
    /// A client stopped receiving a channel.
    Unsubscribed {
        /// Client.
        client: ClientId,
        /// Channel.
        channel: ChannelInfo,
    },
}

/// Sending half handed to sessions.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<ListenerEvent>,
    pending: Arc<AtomicUsize>,
}

impl EventSender {
    /// Queue an event. Dropped silently once the notifier has stopped.
    pub fn emit(&self, event: ListenerEvent) {
        // Counted before sending so the task never decrements first.
        let _ = self.pending.fetch_add(1, Ordering::Relaxed);
        gauge!(VIGIL_LISTENER_EVENTS_PENDING).increment(1.0);
        if self.tx.send(event).is_err() {
            let _ = self.pending.fetch_sub(1, Ordering::Relaxed);
            gauge!(VIGIL_LISTENER_EVENTS_PENDING).decrement(1.0);
        }
    }

    /// Events queued but not yet handed to the listener.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }
}

/// Owner's handle on the notifier task.
pub struct Notifier {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl Notifier {
    /// Deliver every event already queued, then end the task.
    ///
    /// Returns `false` if the listener did not drain within `limit`; the
    /// task is aborted in that case.
    pub async fn finish(self, limit: Duration) -> bool {
        self.stop.cancel();
        let abort = self.task.abort_handle();
        if tokio::time::timeout(limit, self.task).await.is_ok() {
            true
        } else {
            warn!(?limit, "listener did not drain its event queue");
            abort.abort();
            false
        }
    }
}

/// Spawn the task that feeds `listener`.
///
/// It runs until [`Notifier::finish`] is called or every sender is dropped.
pub fn spawn_notifier(listener: Arc<dyn ServerListener>) -> (EventSender, Notifier) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let pending = Arc::new(AtomicUsize::new(0));
    let stop = CancellationToken::new();

    let task = {
        let pending = pending.clone();
        let stop = stop.clone();
        tokio::spawn(async move {
            let deliver = |event: ListenerEvent| {
                dispatch(listener.as_ref(), &event);
                let _ = pending.fetch_sub(1, Ordering::Relaxed);
                gauge!(VIGIL_LISTENER_EVENTS_PENDING).decrement(1.0);
            };
            loop {
                tokio::select! {
                    biased;
                    event = rx.recv() => match event {
                        Some(event) => deliver(event),
                        None => break,
                    },
                    () = stop.cancelled() => {
                        rx.close();
                        while let Some(event) = rx.recv().await {
                            deliver(event);
                        }
                        break;
                    }
                }
            }
            debug!("listener notifier stopped");
        })
    };
    (EventSender { tx, pending }, Notifier { stop, task })
}

fn dispatch(listener: &dyn ServerListener, event: &ListenerEvent) {
    match event {
        ListenerEvent::Subscribed { client, channel } => listener.on_subscribe(*client, channel),
        ListenerEvent::Unsubscribed { client, channel } => {
            listener.on_unsubscribe(*client, channel);
        }
    }
}
