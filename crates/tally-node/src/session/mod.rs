//! Session state machines.
//!
//! Each handshake attempt runs as exactly one session: a [`listener`]
//! session on the side that accepted the connection, a [`dialer`] session on
//! the side that initiated it.  A session is an independent tokio task that
//! owns its connection exclusively and terminates into exactly one
//! [`SessionOutcome`].
//!
//! # Session lifecycle
//!
//! ```text
//! Listener: ProcessContact ──► SendResponse ──► [AwaitDatabase] ──► Done
//! Dialer:   SendContact ──► AwaitResponse ──► HandleResponse
//!                                               ──► [SendDatabase] ──► Done
//! ```
//!
//! `Failed` and `Timeout` are reachable from every non-terminal state.  A
//! step timeout cancels only the pending operation (one read, one write, or
//! one policy hook) and forces the session into `Timeout`; the session
//! deadline bounds the whole run and is applied by the caller that spawned
//! the session.

use std::future::Future;
use std::time::Duration;

use tally_core::{ProvisionResult, RejectReason};

pub mod dialer;
pub mod listener;

pub use dialer::DialerSession;
pub use listener::ListenerSession;

/// Which side of the handshake a session implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Listener,
    Dialer,
}

impl SessionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionKind::Listener => "listener",
            SessionKind::Dialer => "dialer",
        }
    }
}

impl std::fmt::Display for SessionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result of a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    /// The handshake completed with the provisioning result this session
    /// produced, received, or replayed from the idempotency cache.
    Done(ProvisionResult),
    /// The session failed with a terminal reason.
    Failed(RejectReason),
    /// A step or session deadline fired.  The reason distinguishes the two.
    TimedOut(RejectReason),
}

impl SessionOutcome {
    /// Coarse label for audit events.
    pub fn label(&self) -> &'static str {
        match self {
            SessionOutcome::Done(_) => "done",
            SessionOutcome::Failed(_) => "failed",
            SessionOutcome::TimedOut(_) => "timeout",
        }
    }

    /// The reject reason, when the outcome is not success.
    pub fn reason(&self) -> Option<RejectReason> {
        match self {
            SessionOutcome::Done(_) => None,
            SessionOutcome::Failed(r) | SessionOutcome::TimedOut(r) => Some(*r),
        }
    }
}

/// Runs one suspension point (an I/O operation or a policy hook) under the
/// step deadline.  `Err(StepTimeout)` when the deadline fires.
pub(crate) async fn step<T, F>(step_timeout: Duration, fut: F) -> Result<T, RejectReason>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(step_timeout, fut)
        .await
        .map_err(|_| RejectReason::StepTimeout)
}

/// Milliseconds since the Unix epoch, for token-expiry checks.
pub(crate) fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_step_passes_through_fast_futures() {
        let result = step(Duration::from_secs(1), async { 7u32 }).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn test_step_times_out_hung_futures() {
        let result: Result<(), _> = step(Duration::from_millis(20), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        })
        .await;
        assert_eq!(result, Err(RejectReason::StepTimeout));
    }

    #[test]
    fn test_outcome_labels() {
        let provision = ProvisionResult {
            tally_id: "tally-1".to_string(),
            created_by: tally_core::TallyRole::Stock,
            endpoint: "db.local:5432".to_string(),
            credentials_ref: "cred".to_string(),
        };
        assert_eq!(SessionOutcome::Done(provision.clone()).label(), "done");
        assert_eq!(SessionOutcome::Done(provision).reason(), None);
        assert_eq!(
            SessionOutcome::Failed(RejectReason::InvalidToken).label(),
            "failed"
        );
        assert_eq!(
            SessionOutcome::TimedOut(RejectReason::SessionTimeout).label(),
            "timeout"
        );
    }
}
