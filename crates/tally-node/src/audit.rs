//! Audit sink for session lifecycle events.
//!
//! The audit sink is an external collaborator: it receives session start,
//! every state transition, and the terminal outcome with its reason.  The
//! default implementation logs structured `tracing` events; tests install a
//! recording sink instead.

use std::net::SocketAddr;

use tracing::info;
use uuid::Uuid;

use crate::session::{SessionKind, SessionOutcome};

/// Receives session lifecycle events.
pub trait AuditSink: Send + Sync {
    fn session_started(&self, session_id: Uuid, kind: SessionKind, peer: Option<SocketAddr>);
    fn state_changed(&self, session_id: Uuid, state: &'static str);
    fn session_ended(&self, session_id: Uuid, outcome: &SessionOutcome);
}

/// Default sink: structured `tracing` events at info level.
pub struct TracingAudit;

impl AuditSink for TracingAudit {
    fn session_started(&self, session_id: Uuid, kind: SessionKind, peer: Option<SocketAddr>) {
        info!(%session_id, kind = kind.as_str(), ?peer, "session started");
    }

    fn state_changed(&self, session_id: Uuid, state: &'static str) {
        info!(%session_id, state, "session state");
    }

    fn session_ended(&self, session_id: Uuid, outcome: &SessionOutcome) {
        info!(
            %session_id,
            outcome = outcome.label(),
            reason = outcome.reason().map(|r| r.as_str()),
            "session ended"
        );
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records every audit event as a flat string, for assertions.
    #[derive(Default)]
    pub struct RecordingAudit {
        pub events: Mutex<Vec<String>>,
    }

    impl AuditSink for RecordingAudit {
        fn session_started(&self, session_id: Uuid, kind: SessionKind, _peer: Option<SocketAddr>) {
            self.events
                .lock()
                .unwrap()
                .push(format!("{session_id} started {kind}"));
        }

        fn state_changed(&self, session_id: Uuid, state: &'static str) {
            self.events
                .lock()
                .unwrap()
                .push(format!("{session_id} state {state}"));
        }

        fn session_ended(&self, session_id: Uuid, outcome: &SessionOutcome) {
            let reason = outcome
                .reason()
                .map(|r| format!(" {r}"))
                .unwrap_or_default();
            self.events
                .lock()
                .unwrap()
                .push(format!("{session_id} ended {}{reason}", outcome.label()));
        }
    }
}
