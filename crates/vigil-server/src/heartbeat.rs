//! Client liveness.
//!
//! The writer task pings on the heartbeat interval and the reader marks the
//! client alive on every inbound frame. [`watch_liveness`] samples that flag
//! once per interval and reports a client that stayed silent too long.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::client::Client;

/// Why [`watch_liveness`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// No frame arrived for the whole timeout.
    Expired,
    /// The session ended first.
    Stopped,
}

/// Silent samples tolerated before a client counts as gone.
///
/// Computed in milliseconds so sub-second intervals behave; never below one.
pub fn silent_sample_limit(interval: Duration, timeout: Duration) -> u32 {
    let per_sample = interval.as_millis().max(1);
    u32::try_from(timeout.as_millis() / per_sample)
        .unwrap_or(u32::MAX)
        .max(1)
}

/// Sample `client`'s alive flag every `interval` until it has been silent
/// for `timeout` or `cancel` fires.
pub async fn watch_liveness(
    client: Arc<Client>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> Liveness {
    let limit = silent_sample_limit(interval, timeout);
    let mut sampler = time::interval_at(time::Instant::now() + interval, interval);
    sampler.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut silent = 0u32;

    while silent < limit {
        tokio::select! {
            () = cancel.cancelled() => return Liveness::Stopped,
            _ = sampler.tick() => {
                silent = if client.check_alive() { 0 } else { silent + 1 };
            }
        }
    }
    Liveness::Expired
}
