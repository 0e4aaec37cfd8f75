//! Listener-side handshake session.
//!
//! Runs on the invitation issuer after the accept path has read the first
//! `Contact` frame.  The session validates the contact through the policy
//! hooks, then either provisions and answers in one response (two-message
//! flow, stock token) or answers without a provision and waits for the
//! dialer's `DatabaseResult` delivery (three-message flow, foil token).
//!
//! Every rejection sent to the wire is coarse: the reason string and nothing
//! else.  Cadre addresses, the local party id, and provisioning data are
//! disclosed only on approval.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};
use uuid::Uuid;

use tally_core::protocol::messages::{ContactMessage, ContactResponseMessage};
use tally_core::{ProvisionResult, RejectReason, TallyMessage, TallyRole};

use crate::audit::AuditSink;
use crate::config::SessionConfig;
use crate::delivery::PendingDeliveries;
use crate::hooks::{PartyProfile, TallyPolicy};
use crate::idempotency::IdempotencyStore;
use crate::net;
use crate::session::{now_ms, step, SessionKind, SessionOutcome};

/// One inbound handshake attempt.
pub struct ListenerSession {
    session_id: Uuid,
    handshake_id: Uuid,
    policy: Arc<dyn TallyPolicy>,
    audit: Arc<dyn AuditSink>,
    idempotency: Arc<IdempotencyStore>,
    deliveries: Arc<PendingDeliveries>,
    local: PartyProfile,
    config: SessionConfig,
    peer: Option<SocketAddr>,
}

impl ListenerSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        policy: Arc<dyn TallyPolicy>,
        audit: Arc<dyn AuditSink>,
        idempotency: Arc<IdempotencyStore>,
        deliveries: Arc<PendingDeliveries>,
        local: PartyProfile,
        config: SessionConfig,
        peer: Option<SocketAddr>,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            handshake_id: Uuid::new_v4(),
            policy,
            audit,
            idempotency,
            deliveries,
            local,
            config,
            peer,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn handshake_id(&self) -> Uuid {
        self.handshake_id
    }

    /// Drives the session to its terminal outcome.
    ///
    /// The caller has already read the `Contact` frame and applies the
    /// session deadline around this future; internally every suspension
    /// point is bounded by the step deadline.
    pub async fn run<S>(&self, stream: &mut S, contact: ContactMessage) -> SessionOutcome
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        self.audit
            .session_started(self.session_id, SessionKind::Listener, self.peer);
        let outcome = self.drive(stream, contact).await;
        self.audit.session_ended(self.session_id, &outcome);
        outcome
    }

    async fn drive<S>(&self, stream: &mut S, contact: ContactMessage) -> SessionOutcome
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        self.audit.state_changed(self.session_id, "process_contact");

        // Idempotent replay: a cached provision answers the retry without
        // touching any policy hook.
        if let Some(key) = contact.idempotency_key.as_deref() {
            if let Some(cached) = self.idempotency.get(key) {
                debug!(session_id = %self.session_id, key, "replaying cached provisioning result");
                self.audit.state_changed(self.session_id, "send_response");
                return self.send_approval(stream, cached).await;
            }
        }

        let token_info = match step(
            self.config.step_timeout,
            self.policy.validate_token(&contact.token, self.session_id),
        )
        .await
        {
            Ok(Ok(Some(info))) => info,
            Ok(Ok(None)) => return self.fail(stream, RejectReason::InvalidToken).await,
            Ok(Err(e)) => {
                warn!(session_id = %self.session_id, error = %e, "token validation hook failed");
                return self.fail(stream, RejectReason::InternalError).await;
            }
            Err(reason) => return self.fail(stream, reason).await,
        };

        // Expiry is checked here, against the hook's own clock domain, so a
        // policy cannot accidentally accept a stale token.
        if token_info.is_expired_at(now_ms()) {
            return self.fail(stream, RejectReason::InvalidToken).await;
        }

        if let Some(requirement) = token_info.identity_requirement.as_deref() {
            let verdict = step(
                self.config.step_timeout,
                self.policy.validate_identity(
                    contact.identity_bundle.as_deref(),
                    requirement,
                    self.session_id,
                ),
            )
            .await;
            match verdict {
                Ok(Ok(true)) => {}
                Ok(Ok(false)) => {
                    return self.fail(stream, RejectReason::IdentityInsufficient).await
                }
                Ok(Err(e)) => {
                    warn!(session_id = %self.session_id, error = %e, "identity hook failed");
                    return self.fail(stream, RejectReason::InternalError).await;
                }
                Err(reason) => return self.fail(stream, reason).await,
            }
        }

        let remote = PartyProfile {
            party_id: contact.party_id.clone(),
            cadre_peer_addrs: contact.cadre_peer_addrs.clone(),
        };

        if token_info.listener_is_builder() {
            self.provision_and_respond(stream, &contact, &remote).await
        } else {
            self.respond_and_await_database(stream).await
        }
    }

    /// Two-message flow: this side builds, the response carries the result.
    async fn provision_and_respond<S>(
        &self,
        stream: &mut S,
        contact: &ContactMessage,
        remote: &PartyProfile,
    ) -> SessionOutcome
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let provision = match step(
            self.config.step_timeout,
            self.policy
                .provision_database(TallyRole::Stock, &self.local, remote, self.session_id),
        )
        .await
        {
            Ok(Ok(p)) => p,
            Ok(Err(e)) => {
                warn!(session_id = %self.session_id, error = %e, "provisioning hook failed");
                return self.fail(stream, RejectReason::ProvisioningFailed).await;
            }
            Err(reason) => return self.fail(stream, reason).await,
        };

        if let Some(key) = contact.idempotency_key.as_deref() {
            self.idempotency.insert(key, provision.clone());
        }

        self.audit.state_changed(self.session_id, "send_response");
        self.send_approval(stream, provision).await
    }

    /// Three-message flow: answer without a provision, then wait for the
    /// dialer's delivery on a fresh connection.
    async fn respond_and_await_database<S>(&self, stream: &mut S) -> SessionOutcome
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        // Register before the approval goes out: the delivery may arrive
        // before this task reaches the await.
        let rx = self.deliveries.register(self.handshake_id);

        self.audit.state_changed(self.session_id, "send_response");
        let response = self.approval(None);
        match step(self.config.step_timeout, net::send_message(stream, &response)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(session_id = %self.session_id, error = %e, "failed to send response");
                self.deliveries.cancel(self.handshake_id);
                return SessionOutcome::Failed(RejectReason::InternalError);
            }
            Err(reason) => {
                self.deliveries.cancel(self.handshake_id);
                return SessionOutcome::TimedOut(reason);
            }
        }

        self.audit.state_changed(self.session_id, "await_database");
        let delivery = match step(self.config.step_timeout, rx).await {
            Ok(Ok(msg)) => msg,
            Ok(Err(_)) => {
                // Sender half dropped without a delivery: manager shut down.
                return SessionOutcome::Failed(RejectReason::InternalError);
            }
            Err(reason) => {
                self.deliveries.cancel(self.handshake_id);
                return SessionOutcome::TimedOut(reason);
            }
        };

        if delivery.provision.created_by != TallyRole::Foil {
            warn!(
                session_id = %self.session_id,
                created_by = %delivery.provision.created_by,
                "delivered result claims the wrong builder"
            );
            return SessionOutcome::Failed(RejectReason::ResultInvalid);
        }

        let verdict = step(
            self.config.step_timeout,
            self.policy.validate_result(&delivery.provision, self.session_id),
        )
        .await;
        match verdict {
            Ok(Ok(true)) => SessionOutcome::Done(delivery.provision),
            Ok(Ok(false)) => SessionOutcome::Failed(RejectReason::ResultInvalid),
            Ok(Err(e)) => {
                warn!(session_id = %self.session_id, error = %e, "result validation hook failed");
                SessionOutcome::Failed(RejectReason::InternalError)
            }
            Err(reason) => SessionOutcome::TimedOut(reason),
        }
    }

    fn approval(&self, provision: Option<ProvisionResult>) -> TallyMessage {
        TallyMessage::ContactResponse(ContactResponseMessage {
            handshake_id: self.handshake_id,
            approved: true,
            reason: None,
            party_id: Some(self.local.party_id.clone()),
            cadre_peer_addrs: Some(self.local.cadre_peer_addrs.clone()),
            provision,
        })
    }

    async fn send_approval<S>(&self, stream: &mut S, provision: ProvisionResult) -> SessionOutcome
    where
        S: AsyncWrite + Unpin + Send,
    {
        let response = self.approval(Some(provision.clone()));
        match step(self.config.step_timeout, net::send_message(stream, &response)).await {
            Ok(Ok(())) => SessionOutcome::Done(provision),
            Ok(Err(e)) => {
                warn!(session_id = %self.session_id, error = %e, "failed to send response");
                SessionOutcome::Failed(RejectReason::InternalError)
            }
            Err(reason) => SessionOutcome::TimedOut(reason),
        }
    }

    /// Sends a coarse rejection (best effort) and produces the terminal
    /// outcome for `reason`.
    async fn fail<S>(&self, stream: &mut S, reason: RejectReason) -> SessionOutcome
    where
        S: AsyncWrite + Unpin + Send,
    {
        let msg = TallyMessage::ContactResponse(ContactResponseMessage::rejection(
            self.handshake_id,
            reason,
        ));
        match tokio::time::timeout(self.config.step_timeout, net::send_message(stream, &msg)).await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(session_id = %self.session_id, error = %e, "failed to send rejection")
            }
            Err(_) => debug!(session_id = %self.session_id, "rejection send timed out"),
        }
        match reason {
            RejectReason::StepTimeout | RejectReason::SessionTimeout => {
                SessionOutcome::TimedOut(reason)
            }
            _ => SessionOutcome::Failed(reason),
        }
    }
}
