//! Invitation links and token validation results.
//!
//! An [`InvitationLink`] is produced once, out of band, by the party that
//! wants to establish a tally (the issuer, who will act as the handshake
//! listener).  It names the issuer's reachable addresses, carries a
//! capability token, and flags which role is responsible for provisioning
//! the shared database.  The respondent feeds the link to a dialer session;
//! a link may be redeemed across many attempts if the issuer's token policy
//! allows (multi-use tokens).
//!
//! [`TokenInfo`] is what the issuer's token-validation policy reports back
//! about a presented token.  It is read-only within a session.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::domain::role::TallyRole;

/// Out-of-band invitation handed to the respondent.
///
/// Immutable once produced.  `identity_requirement` is an opaque blob the
/// issuer's identity-validation policy will interpret; the handshake core
/// never looks inside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvitationLink {
    /// Addresses where the issuer accepts handshake connections, in
    /// preference order.
    pub responder_addrs: Vec<SocketAddr>,
    /// Capability token presented in the contact message.
    pub token: String,
    /// Token expiry, milliseconds since the Unix epoch.
    pub token_expires_at_ms: u64,
    /// Which of the two roles provisions the shared database.
    pub builder_role: TallyRole,
    /// Opaque identity requirement the respondent must satisfy, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_requirement: Option<Vec<u8>>,
}

impl InvitationLink {
    /// True when the dialer side (the respondent, playing foil) is the
    /// builder for this handshake.
    pub fn dialer_is_builder(&self) -> bool {
        self.builder_role == TallyRole::Foil
    }
}

/// Result of validating a capability token, produced by the issuer's
/// token-validation policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    /// The builder role for the handshake this token authorises.  The
    /// listener (issuer, stock) builds iff this is [`TallyRole::Stock`].
    pub role: TallyRole,
    /// Expiry, milliseconds since the Unix epoch.
    pub expires_at_ms: u64,
    /// Opaque identity requirement the caller must satisfy, if any.
    pub identity_requirement: Option<Vec<u8>>,
}

impl TokenInfo {
    /// True when the listener side is responsible for provisioning.
    pub fn listener_is_builder(&self) -> bool {
        self.role == TallyRole::Stock
    }

    /// True when the token has expired relative to `now_ms`.
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }
}
