//! Server-wide stop signal and session bookkeeping, built on tokio-util's
//! `CancellationToken` and `TaskTracker`.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// Owns the root stop token and tracks every session task.
///
/// Sessions get a [`session_token`](Self::session_token), so one
/// [`cancel`](Self::cancel) reaches all of them while a single client can
/// still be closed on its own.
#[derive(Default)]
pub struct SessionSupervisor {
    root: CancellationToken,
    sessions: TaskTracker,
}

impl SessionSupervisor {
    /// Fresh supervisor with no sessions.
    pub fn new() -> Self {
        Self::default()
    }

    /// The root token; cancelled once the server is stopping.
    pub fn root_token(&self) -> CancellationToken {
        self.root.clone()
    }

    /// Token for one session: cancelled with the root, cancellable alone.
    pub fn session_token(&self) -> CancellationToken {
        self.root.child_token()
    }

    /// Tracker session futures are registered on.
    pub fn sessions(&self) -> &TaskTracker {
        &self.sessions
    }

    /// Signal every session to stop. Idempotent.
    pub fn cancel(&self) {
        self.root.cancel();
    }

    /// `true` once [`cancel`](Self::cancel) has been called.
    pub fn is_stopping(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Cancel, refuse new sessions and wait up to `limit` for running ones.
    ///
    /// Returns `false` if sessions were still running at the deadline.
    pub async fn drain(&self, limit: Duration) -> bool {
        self.cancel();
        let _ = self.sessions.close();
        let running = self.sessions.len();
        if running == 0 {
            return true;
        }
        info!(running, ?limit, "draining sessions");

        let drained = tokio::time::timeout(limit, self.sessions.wait()).await.is_ok();
        if !drained {
            warn!(
                still_running = self.sessions.len(),
                "sessions outlived the drain limit"
            );
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_idempotent() {
        let supervisor = SessionSupervisor::new();
        assert!(!supervisor.is_stopping());
        supervisor.cancel();
        supervisor.cancel();
        assert!(supervisor.is_stopping());
        assert!(supervisor.root_token().is_cancelled());
    }

    #[test]
    fn closing_one_session_leaves_the_rest() {
        let supervisor = SessionSupervisor::new();
        let a = supervisor.session_token();
        let b = supervisor.session_token();
        a.cancel();
        assert!(!b.is_cancelled());
        assert!(!supervisor.is_stopping());

        supervisor.cancel();
        assert!(b.is_cancelled());
    }

    #[tokio::test]
    async fn drain_waits_for_cooperative_sessions() {
        let supervisor = SessionSupervisor::new();
        for _ in 0..3 {
            let token = supervisor.session_token();
            let _ = supervisor.sessions().spawn(async move { token.cancelled().await });
        }
        assert!(supervisor.drain(Duration::from_secs(5)).await);
        assert!(supervisor.sessions().is_empty());
        assert!(supervisor.sessions().is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn drain_gives_up_on_stuck_sessions() {
        let supervisor = SessionSupervisor::new();
        let _ = supervisor
            .sessions()
            .spawn(tokio::time::sleep(Duration::from_secs(600)));
        assert!(!supervisor.drain(Duration::from_millis(50)).await);
        assert_eq!(supervisor.sessions().len(), 1);
    }

    #[tokio::test]
    async fn drain_without_sessions_returns_immediately() {
        assert!(SessionSupervisor::new().drain(Duration::ZERO).await);
    }
}
