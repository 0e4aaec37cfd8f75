//! Dialer-side handshake session.
//!
//! Runs on the respondent holding an invitation link.  The session connects
//! to the first reachable responder address, sends the `Contact`, and
//! interprets the response.  When the link names the dialer as the builder,
//! an approving response triggers provisioning here, and the result is
//! delivered back on a *new* connection; the contact connection is a single
//! exchange and is never reused.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpStream;
use tracing::{debug, warn};
use uuid::Uuid;

use tally_core::protocol::messages::{ContactMessage, ContactResponseMessage, DatabaseResultMessage};
use tally_core::{InvitationLink, RejectReason, TallyMessage, TallyRole};

use crate::audit::AuditSink;
use crate::config::SessionConfig;
use crate::hooks::{PartyProfile, TallyPolicy};
use crate::manager::{InitiateOutcome, SessionError};
use crate::net::{self, NetError};
use crate::session::{step, SessionKind, SessionOutcome};

/// One outbound handshake attempt.
pub struct DialerSession {
    session_id: Uuid,
    policy: Arc<dyn TallyPolicy>,
    audit: Arc<dyn AuditSink>,
    local: PartyProfile,
    identity_bundle: Option<Vec<u8>>,
    config: SessionConfig,
}

impl DialerSession {
    pub fn new(
        policy: Arc<dyn TallyPolicy>,
        audit: Arc<dyn AuditSink>,
        local: PartyProfile,
        identity_bundle: Option<Vec<u8>>,
        config: SessionConfig,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            policy,
            audit,
            local,
            identity_bundle,
            config,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Drives the session to its terminal outcome.
    ///
    /// `Ok(Rejected(_))` covers every protocol-level refusal including step
    /// timeouts; `Err(_)` is reserved for transport failures where no
    /// protocol verdict was reached.
    pub async fn run(
        &self,
        link: &InvitationLink,
        idempotency_key: Option<String>,
    ) -> Result<InitiateOutcome, SessionError> {
        self.audit
            .session_started(self.session_id, SessionKind::Dialer, None);
        let result = self.drive(link, idempotency_key).await;
        self.audit
            .session_ended(self.session_id, &audit_outcome(&result));
        result
    }

    async fn drive(
        &self,
        link: &InvitationLink,
        idempotency_key: Option<String>,
    ) -> Result<InitiateOutcome, SessionError> {
        self.audit.state_changed(self.session_id, "send_contact");
        let (mut stream, addr) = self.connect_any(&link.responder_addrs).await?;

        let contact = TallyMessage::Contact(ContactMessage {
            token: link.token.clone(),
            party_id: self.local.party_id.clone(),
            identity_bundle: self.identity_bundle.clone(),
            cadre_peer_addrs: self.local.cadre_peer_addrs.clone(),
            idempotency_key,
        });
        match step(self.config.step_timeout, net::send_message(&mut stream, &contact)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(SessionError::Net(e)),
            Err(reason) => return Ok(InitiateOutcome::Rejected(reason)),
        }

        self.audit.state_changed(self.session_id, "await_response");
        let response = match step(self.config.step_timeout, net::read_message(&mut stream)).await {
            Ok(Ok(TallyMessage::ContactResponse(resp))) => resp,
            Ok(Ok(other)) => {
                warn!(
                    session_id = %self.session_id,
                    message_type = ?other.message_type(),
                    "unexpected message where a response was required"
                );
                return Ok(InitiateOutcome::Rejected(RejectReason::ResponseInvalid));
            }
            Ok(Err(NetError::Protocol(e))) => {
                warn!(session_id = %self.session_id, error = %e, "malformed response frame");
                return Ok(InitiateOutcome::Rejected(RejectReason::MalformedMessage));
            }
            Ok(Err(e)) => return Err(SessionError::Net(e)),
            Err(reason) => return Ok(InitiateOutcome::Rejected(reason)),
        };
        // The contact exchange is complete; the connection is done either way.
        drop(stream);

        self.audit.state_changed(self.session_id, "handle_response");
        if !response.approved {
            let reason = response.reason.unwrap_or(RejectReason::Rejected);
            debug!(session_id = %self.session_id, reason = reason.as_str(), "contact rejected");
            return Ok(InitiateOutcome::Rejected(reason));
        }

        let verdict = step(
            self.config.step_timeout,
            self.policy.validate_response(&response, self.session_id),
        )
        .await;
        match verdict {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => return Ok(InitiateOutcome::Rejected(RejectReason::ResponseInvalid)),
            Ok(Err(e)) => {
                warn!(session_id = %self.session_id, error = %e, "response validation hook failed");
                return Ok(InitiateOutcome::Rejected(RejectReason::InternalError));
            }
            Err(reason) => return Ok(InitiateOutcome::Rejected(reason)),
        }

        if link.dialer_is_builder() {
            self.build_and_deliver(&response, addr).await
        } else {
            match accept_issuer_provision(response) {
                Ok(outcome) => Ok(outcome),
                Err(reason) => Ok(InitiateOutcome::Rejected(reason)),
            }
        }
    }

    /// Foil flow tail: provision locally, then deliver the result on a new
    /// connection to the responder that approved us.
    async fn build_and_deliver(
        &self,
        response: &ContactResponseMessage,
        addr: SocketAddr,
    ) -> Result<InitiateOutcome, SessionError> {
        // A builder-side approval must not carry a provision, and must
        // disclose the issuer's profile for the provisioning hook.
        if response.provision.is_some() {
            return Ok(InitiateOutcome::Rejected(RejectReason::ResponseInvalid));
        }
        let issuer = match (&response.party_id, &response.cadre_peer_addrs) {
            (Some(party_id), Some(cadre)) => PartyProfile {
                party_id: party_id.clone(),
                cadre_peer_addrs: cadre.clone(),
            },
            _ => return Ok(InitiateOutcome::Rejected(RejectReason::ResponseInvalid)),
        };

        self.audit.state_changed(self.session_id, "send_database");
        let provision = match step(
            self.config.step_timeout,
            self.policy
                .provision_database(TallyRole::Foil, &issuer, &self.local, self.session_id),
        )
        .await
        {
            Ok(Ok(p)) => p,
            Ok(Err(e)) => {
                warn!(session_id = %self.session_id, error = %e, "provisioning hook failed");
                return Ok(InitiateOutcome::Rejected(RejectReason::ProvisioningFailed));
            }
            Err(reason) => return Ok(InitiateOutcome::Rejected(reason)),
        };

        let mut delivery_stream = match step(self.config.step_timeout, TcpStream::connect(addr)).await
        {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => return Err(SessionError::Net(NetError::Io(e))),
            Err(reason) => return Ok(InitiateOutcome::Rejected(reason)),
        };
        let delivery = TallyMessage::DatabaseResult(DatabaseResultMessage {
            handshake_id: response.handshake_id,
            provision: provision.clone(),
        });
        match step(
            self.config.step_timeout,
            net::send_message(&mut delivery_stream, &delivery),
        )
        .await
        {
            Ok(Ok(())) => Ok(InitiateOutcome::Completed(provision)),
            Ok(Err(e)) => Err(SessionError::Net(e)),
            Err(reason) => Ok(InitiateOutcome::Rejected(reason)),
        }
    }

    /// Tries each responder address in order, each attempt bounded by the
    /// step deadline.
    async fn connect_any(
        &self,
        addrs: &[SocketAddr],
    ) -> Result<(TcpStream, SocketAddr), SessionError> {
        for addr in addrs {
            match step(self.config.step_timeout, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => return Ok((stream, *addr)),
                Ok(Err(e)) => {
                    debug!(session_id = %self.session_id, %addr, error = %e, "connect failed")
                }
                Err(_) => {
                    debug!(session_id = %self.session_id, %addr, "connect timed out")
                }
            }
        }
        Err(SessionError::NoResponderAddress)
    }
}

/// Stock flow tail: the approving response must carry an issuer-built
/// provision.
fn accept_issuer_provision(
    response: ContactResponseMessage,
) -> Result<InitiateOutcome, RejectReason> {
    match response.provision {
        Some(provision) if provision.created_by == TallyRole::Stock => {
            Ok(InitiateOutcome::Completed(provision))
        }
        Some(_) => Err(RejectReason::ResponseInvalid),
        None => Err(RejectReason::ResponseInvalid),
    }
}

fn audit_outcome(result: &Result<InitiateOutcome, SessionError>) -> SessionOutcome {
    match result {
        Ok(InitiateOutcome::Completed(p)) => SessionOutcome::Done(p.clone()),
        Ok(InitiateOutcome::Rejected(reason)) => match reason {
            RejectReason::StepTimeout | RejectReason::SessionTimeout => {
                SessionOutcome::TimedOut(*reason)
            }
            _ => SessionOutcome::Failed(*reason),
        },
        Err(SessionError::NoResponderAddress) => {
            SessionOutcome::Failed(RejectReason::NoResponderAddress)
        }
        Err(_) => SessionOutcome::Failed(RejectReason::InternalError),
    }
}
