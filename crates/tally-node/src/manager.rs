//! Session ownership and connection routing.
//!
//! The [`SessionManager`] owns every resource sessions share: the policy,
//! the audit sink, the idempotency cache, the pending-delivery map, and the
//! session registry.  `serve` accepts inbound connections and spawns one
//! task per handshake; `initiate` runs an outbound handshake for the local
//! caller.  Admission control applies to inbound sessions only: beyond
//! `max_concurrent_sessions` a contact is answered with a `busy` rejection
//! and the connection is closed, never queued.
//!
//! The cap is applied when the opening `Contact` frame arrives, not at
//! accept time: a delivery connection carrying a `DatabaseResult` must stay
//! admissible even at capacity, since the sessions occupying the slots may
//! be the very ones waiting on it, and the frame type is not known before
//! the first read.  A connection that has not yet produced its opening
//! frame therefore occupies memory outside the cap, bounded per connection
//! by the step deadline, after which it is closed.
//!
//! Registry bookkeeping is tied to a drop guard, so a session is removed
//! from the active counts exactly once however its task ends — normal
//! return, timeout, or panic unwinding.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tally_core::protocol::messages::{ContactMessage, ContactResponseMessage};
use tally_core::{InvitationLink, ProvisionResult, RejectReason, TallyMessage};

use crate::audit::AuditSink;
use crate::config::SessionConfig;
use crate::delivery::PendingDeliveries;
use crate::hooks::{PartyProfile, TallyPolicy};
use crate::idempotency::IdempotencyStore;
use crate::net::{self, NetError};
use crate::session::{DialerSession, ListenerSession, SessionKind, SessionOutcome};

// ── Public result types ───────────────────────────────────────────────────────

/// Protocol-level result of an outbound handshake.
#[derive(Debug, Clone, PartialEq)]
pub enum InitiateOutcome {
    /// The handshake completed; the shared database is described here.
    Completed(ProvisionResult),
    /// The handshake reached a terminal refusal, including timeouts.
    Rejected(RejectReason),
}

/// Transport-level failure of an outbound handshake, where no protocol
/// verdict was reached.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No responder address in the invitation link could be reached.
    #[error("no responder address could be reached")]
    NoResponderAddress,

    /// The connection failed mid-handshake.
    #[error(transparent)]
    Net(#[from] NetError),
}

/// Point-in-time count of active sessions by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionCounts {
    pub listener: usize,
    pub dialer: usize,
}

impl SessionCounts {
    pub fn total(&self) -> usize {
        self.listener + self.dialer
    }
}

// ── Session registry ──────────────────────────────────────────────────────────

#[derive(Default)]
struct Registry {
    counts: Mutex<SessionCounts>,
}

impl Registry {
    /// Admits a session, or refuses when `limit` active sessions exist.
    fn try_admit(self: &Arc<Self>, kind: SessionKind, limit: Option<usize>) -> Option<Ticket> {
        let mut counts = self.counts.lock().expect("registry lock poisoned");
        if let Some(limit) = limit {
            if counts.total() >= limit {
                return None;
            }
        }
        match kind {
            SessionKind::Listener => counts.listener += 1,
            SessionKind::Dialer => counts.dialer += 1,
        }
        Some(Ticket {
            registry: Arc::clone(self),
            kind,
        })
    }

    fn snapshot(&self) -> SessionCounts {
        *self.counts.lock().expect("registry lock poisoned")
    }
}

/// Registry slot held for the lifetime of one session task.  Dropping it
/// releases the slot; that is the only decrement path.
struct Ticket {
    registry: Arc<Registry>,
    kind: SessionKind,
}

impl Drop for Ticket {
    fn drop(&mut self) {
        let mut counts = self.registry.counts.lock().expect("registry lock poisoned");
        match self.kind {
            SessionKind::Listener => counts.listener = counts.listener.saturating_sub(1),
            SessionKind::Dialer => counts.dialer = counts.dialer.saturating_sub(1),
        }
    }
}

// ── Session manager ───────────────────────────────────────────────────────────

/// Owns shared handshake state and runs sessions on both sides.
pub struct SessionManager {
    policy: Arc<dyn TallyPolicy>,
    audit: Arc<dyn AuditSink>,
    local: PartyProfile,
    identity_bundle: Option<Vec<u8>>,
    config: SessionConfig,
    idempotency: Arc<IdempotencyStore>,
    deliveries: Arc<PendingDeliveries>,
    registry: Arc<Registry>,
}

impl SessionManager {
    pub fn new(
        policy: Arc<dyn TallyPolicy>,
        audit: Arc<dyn AuditSink>,
        local: PartyProfile,
        config: SessionConfig,
    ) -> Self {
        let idempotency = Arc::new(IdempotencyStore::new(config.idempotency_ttl));
        Self {
            policy,
            audit,
            local,
            identity_bundle: None,
            config,
            idempotency,
            deliveries: Arc::new(PendingDeliveries::new()),
            registry: Arc::new(Registry::default()),
        }
    }

    /// Sets the identity bundle attached to outbound contacts.
    pub fn with_identity_bundle(mut self, bundle: Vec<u8>) -> Self {
        self.identity_bundle = Some(bundle);
        self
    }

    /// Active sessions by kind, right now.
    pub fn active_session_counts(&self) -> SessionCounts {
        self.registry.snapshot()
    }

    /// Accept loop.  Runs until the listener fails fatally; each accepted
    /// connection is handled on its own task.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        info!(addr = ?listener.local_addr().ok(), "handshake listener serving");
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let manager = Arc::clone(&self);
                    tokio::spawn(async move {
                        manager.handle_connection(stream, Some(peer)).await;
                    });
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                }
            }
        }
    }

    /// Handles one inbound connection: reads the opening frame, then either
    /// routes a delivery or runs a listener session.
    pub async fn handle_connection<S>(&self, mut stream: S, peer: Option<SocketAddr>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let first = match tokio::time::timeout(
            self.config.step_timeout,
            net::read_message(&mut stream),
        )
        .await
        {
            Ok(Ok(msg)) => msg,
            Ok(Err(NetError::Protocol(e))) => {
                debug!(?peer, error = %e, "malformed opening frame");
                self.send_rejection(&mut stream, Uuid::nil(), RejectReason::MalformedMessage)
                    .await;
                return;
            }
            Ok(Err(e)) => {
                debug!(?peer, error = %e, "connection lost before opening frame");
                return;
            }
            Err(_) => {
                debug!(?peer, "opening frame timed out");
                self.send_rejection(&mut stream, Uuid::nil(), RejectReason::StepTimeout)
                    .await;
                return;
            }
        };

        match first {
            TallyMessage::Contact(contact) => {
                self.run_listener_session(stream, peer, contact).await;
            }
            TallyMessage::DatabaseResult(msg) => {
                // Second-connection delivery for a waiting session.
                self.deliveries.deliver(msg);
            }
            TallyMessage::ContactResponse(_) => {
                warn!(?peer, "unsolicited response frame on inbound connection");
                self.send_rejection(&mut stream, Uuid::nil(), RejectReason::MalformedMessage)
                    .await;
            }
        }
    }

    async fn run_listener_session<S>(
        &self,
        mut stream: S,
        peer: Option<SocketAddr>,
        contact: ContactMessage,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let _ticket = match self.registry.try_admit(
            SessionKind::Listener,
            Some(self.config.max_concurrent_sessions),
        ) {
            Some(ticket) => ticket,
            None => {
                warn!(?peer, "at capacity, rejecting contact");
                self.send_rejection(&mut stream, Uuid::nil(), RejectReason::Busy)
                    .await;
                return;
            }
        };

        let session = ListenerSession::new(
            Arc::clone(&self.policy),
            Arc::clone(&self.audit),
            Arc::clone(&self.idempotency),
            Arc::clone(&self.deliveries),
            self.local.clone(),
            self.config.clone(),
            peer,
        );
        let session_id = session.session_id();
        let handshake_id = session.handshake_id();

        let outcome = match tokio::time::timeout(
            self.config.session_timeout,
            session.run(&mut stream, contact),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                // The session future was dropped mid-flight; release its
                // delivery registration and tell the peer, best effort.
                self.deliveries.cancel(handshake_id);
                self.send_rejection(&mut stream, handshake_id, RejectReason::SessionTimeout)
                    .await;
                let outcome = SessionOutcome::TimedOut(RejectReason::SessionTimeout);
                self.audit.session_ended(session_id, &outcome);
                outcome
            }
        };
        debug!(%session_id, outcome = outcome.label(), "listener session finished");
    }

    /// Runs an outbound handshake for `link`, bounded by the session
    /// deadline.
    pub async fn initiate(
        &self,
        link: &InvitationLink,
        idempotency_key: Option<String>,
    ) -> Result<InitiateOutcome, SessionError> {
        // Dialer sessions are caller-driven and not subject to the inbound
        // capacity limit; they still appear in the counts.
        let _ticket = self.registry.try_admit(SessionKind::Dialer, None);

        let session = DialerSession::new(
            Arc::clone(&self.policy),
            Arc::clone(&self.audit),
            self.local.clone(),
            self.identity_bundle.clone(),
            self.config.clone(),
        );
        let session_id = session.session_id();

        match tokio::time::timeout(
            self.config.session_timeout,
            session.run(link, idempotency_key),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                let outcome = SessionOutcome::TimedOut(RejectReason::SessionTimeout);
                self.audit.session_ended(session_id, &outcome);
                Ok(InitiateOutcome::Rejected(RejectReason::SessionTimeout))
            }
        }
    }

    async fn send_rejection<S>(&self, stream: &mut S, handshake_id: Uuid, reason: RejectReason)
    where
        S: AsyncWrite + Unpin + Send,
    {
        let msg =
            TallyMessage::ContactResponse(ContactResponseMessage::rejection(handshake_id, reason));
        match tokio::time::timeout(self.config.step_timeout, net::send_message(stream, &msg)).await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "failed to send rejection"),
            Err(_) => debug!("rejection send timed out"),
        }
    }
}
