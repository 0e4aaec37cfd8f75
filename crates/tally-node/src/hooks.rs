//! The policy-hook boundary.
//!
//! Five hook functions constitute the entire policy surface of the handshake
//! core.  The protocol calls them in-line but treats every call as a
//! bounded-duration operation: each invocation is wrapped in the step
//! timeout by the calling session.  A hook returning `Err` is handled like a
//! negative verdict and terminates the session with `internal_error`
//! (`provisioning_failed` for the provisioning hook, which has no boolean
//! verdict of its own).
//!
//! Policy is always injected via constructor as an `Arc<dyn TallyPolicy>` —
//! never process-global state — so independent [`crate::SessionManager`]
//! instances (e.g. in tests) never share policy.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use tally_core::protocol::messages::ContactResponseMessage;
use tally_core::{ProvisionResult, TallyRole, TokenInfo};

/// Error returned by a policy hook.
///
/// The text is for local logs only; it is never sent to the counterparty.
#[derive(Debug, Error)]
#[error("policy hook failed: {0}")]
pub struct HookError(pub String);

impl HookError {
    pub fn new(msg: impl Into<String>) -> Self {
        HookError(msg.into())
    }
}

/// A party as seen by the provisioning hook: its identifier plus the peer
/// set it nominated to host/operate the shared resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartyProfile {
    pub party_id: String,
    pub cadre_peer_addrs: Vec<String>,
}

/// The five policy hooks the handshake core depends on.
///
/// `party_a` is always the invitation issuer (listener, stock) and `party_b`
/// the respondent (dialer, foil), regardless of which side performs the
/// provisioning.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TallyPolicy: Send + Sync {
    /// Validates a presented capability token.  `Ok(None)` means the token
    /// is unknown, spent, or otherwise refused.  Single-use consumption is
    /// owned by the implementation: a policy that marks tokens spent does so
    /// here.
    async fn validate_token(
        &self,
        token: &str,
        session_id: Uuid,
    ) -> Result<Option<TokenInfo>, HookError>;

    /// Checks an opaque identity bundle against the token's requirement.
    async fn validate_identity<'a>(
        &self,
        bundle: Option<&'a [u8]>,
        requirement: &[u8],
        session_id: Uuid,
    ) -> Result<bool, HookError>;

    /// Creates the shared database for a handshake.  Called exactly once per
    /// successful handshake, on whichever side holds `builder_role`.
    async fn provision_database(
        &self,
        builder_role: TallyRole,
        party_a: &PartyProfile,
        party_b: &PartyProfile,
        session_id: Uuid,
    ) -> Result<ProvisionResult, HookError>;

    /// Dialer-side check of an approving contact response.
    async fn validate_response(
        &self,
        response: &ContactResponseMessage,
        session_id: Uuid,
    ) -> Result<bool, HookError>;

    /// Listener-side check of a delivered provisioning result.
    async fn validate_result(
        &self,
        result: &ProvisionResult,
        session_id: Uuid,
    ) -> Result<bool, HookError>;
}
