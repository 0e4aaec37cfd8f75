//! The three tally bootstrap handshake messages.
//!
//! A handshake exchanges two or three messages over single-exchange streams:
//!
//! ```text
//! Dialer (respondent, foil)          Listener (issuer, stock)
//! ─────────────────────────          ────────────────────────
//! Contact ──────────────────────────►
//!                                    validate token / identity
//! ◄────────────────────── ContactResponse
//!                                    (carries the provision when the
//!                                     listener is the builder)
//! DatabaseResult ───────────────────►   only when the dialer is the
//!   (on a NEW connection)               builder (3-message flow)
//! ```
//!
//! Rejections are a one-response flow: `approved = false` plus a coarse
//! reason, never cadre data, never a provision.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::provision::ProvisionResult;
use crate::domain::reason::RejectReason;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Current protocol version byte.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Total size of the common message header in bytes:
/// `[version:1][msg_type:1][reserved:2][payload_len:4]`.
pub const HEADER_SIZE: usize = 8;

/// Upper bound on a single payload.  Handshake messages are small; anything
/// larger is treated as malformed rather than buffered.
pub const MAX_PAYLOAD_LEN: usize = 64 * 1024;

// ── Message type codes ────────────────────────────────────────────────────────

/// All message type codes defined by the handshake protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    Contact = 0x01,
    ContactResponse = 0x02,
    DatabaseResult = 0x03,
}

impl TryFrom<u8> for MessageType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(MessageType::Contact),
            0x02 => Ok(MessageType::ContactResponse),
            0x03 => Ok(MessageType::DatabaseResult),
            _ => Err(()),
        }
    }
}

// ── Per-message payload structs ───────────────────────────────────────────────

/// CONTACT (0x01): sent by the dialer to open a handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactMessage {
    /// Capability token from the invitation link.
    pub token: String,
    /// The dialer's party identifier.
    pub party_id: String,
    /// Opaque identity bundle for the issuer's identity policy, if the
    /// invitation named a requirement.
    pub identity_bundle: Option<Vec<u8>>,
    /// Peer addresses the dialer nominates to host/operate the shared
    /// resource.  Disclosed up front; the listener's cadre is only disclosed
    /// after validation succeeds.
    pub cadre_peer_addrs: Vec<String>,
    /// Caller-supplied key making a retried contact side-effect free.
    pub idempotency_key: Option<String>,
}

/// CONTACT_RESPONSE (0x02): the listener's verdict.
///
/// `cadre_peer_addrs` and `provision` are present only when `approved` is
/// true; a rejection carries the reason and nothing else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactResponseMessage {
    /// Listener-generated id for this handshake; echoed in a follow-up
    /// [`DatabaseResultMessage`] so the listener can correlate the delivery
    /// arriving on a fresh connection.
    pub handshake_id: Uuid,
    /// Whether the contact was approved.
    pub approved: bool,
    /// Coarse reason when rejected.
    pub reason: Option<RejectReason>,
    /// The listener's party identifier (approved responses only).
    pub party_id: Option<String>,
    /// The listener's nominated peer set (approved responses only).
    pub cadre_peer_addrs: Option<Vec<String>>,
    /// Provisioning result when the listener is the builder.
    pub provision: Option<ProvisionResult>,
}

impl ContactResponseMessage {
    /// A rejection response: `approved = false`, coarse reason, no cadre
    /// data, no provision.
    pub fn rejection(handshake_id: Uuid, reason: RejectReason) -> Self {
        Self {
            handshake_id,
            approved: false,
            reason: Some(reason),
            party_id: None,
            cadre_peer_addrs: None,
            provision: None,
        }
    }
}

/// DATABASE_RESULT (0x03): the dialer delivers its provisioning result.
///
/// Always sent on a new connection; the connection that carried the contact
/// exchange is single-exchange and may already be writer-closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseResultMessage {
    /// Handshake id from the approving [`ContactResponseMessage`].
    pub handshake_id: Uuid,
    /// The provisioning result created by the dialer (the builder).
    pub provision: ProvisionResult,
}

// ── Top-level message enum ────────────────────────────────────────────────────

/// All valid handshake messages, discriminated by type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TallyMessage {
    Contact(ContactMessage),
    ContactResponse(ContactResponseMessage),
    DatabaseResult(DatabaseResultMessage),
}

impl TallyMessage {
    /// Returns the [`MessageType`] discriminant for this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            TallyMessage::Contact(_) => MessageType::Contact,
            TallyMessage::ContactResponse(_) => MessageType::ContactResponse,
            TallyMessage::DatabaseResult(_) => MessageType::DatabaseResult,
        }
    }
}
