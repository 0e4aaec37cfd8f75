//! The closed failure taxonomy for handshake sessions.
//!
//! Every terminal failure maps to exactly one [`RejectReason`].  The reason
//! is the only diagnostic detail ever sent to the counterparty: rejection
//! responses carry the coarse wire string and nothing else (no internal
//! error text, no cadre data).

use serde::{Deserialize, Serialize};

/// Why a handshake session ended without a provisioned database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    /// The presented token was unknown, spent, or expired.
    InvalidToken,
    /// The caller's identity bundle did not satisfy the token's requirement.
    IdentityInsufficient,
    /// The provisioning policy failed to create the shared database.
    ProvisioningFailed,
    /// The counterparty's response failed response validation.
    ResponseInvalid,
    /// The delivered provisioning result failed result validation.
    ResultInvalid,
    /// A wire message could not be decoded.
    MalformedMessage,
    /// A single step (one I/O operation or policy call) exceeded its deadline.
    StepTimeout,
    /// The session as a whole exceeded its deadline.
    SessionTimeout,
    /// A policy hook returned an error (as opposed to a negative verdict).
    InternalError,
    /// No responder address was reachable (or the invitation listed none).
    NoResponderAddress,
    /// The counterparty declined without a finer-grained reason.
    Rejected,
    /// The responder is at its concurrent-session capacity.
    Busy,
}

impl RejectReason {
    /// The coarse string carried on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::InvalidToken => "invalid_token",
            RejectReason::IdentityInsufficient => "identity_insufficient",
            RejectReason::ProvisioningFailed => "provisioning_failed",
            RejectReason::ResponseInvalid => "response_invalid",
            RejectReason::ResultInvalid => "result_invalid",
            RejectReason::MalformedMessage => "malformed_message",
            RejectReason::StepTimeout => "step_timeout",
            RejectReason::SessionTimeout => "session_timeout",
            RejectReason::InternalError => "internal_error",
            RejectReason::NoResponderAddress => "no_responder_address",
            RejectReason::Rejected => "rejected",
            RejectReason::Busy => "busy",
        }
    }

    /// Parses a wire string back into a reason.  Unknown strings collapse to
    /// [`RejectReason::Rejected`] so a newer counterparty cannot make an
    /// older node panic or misbehave.
    pub fn from_wire(s: &str) -> RejectReason {
        match s {
            "invalid_token" => RejectReason::InvalidToken,
            "identity_insufficient" => RejectReason::IdentityInsufficient,
            "provisioning_failed" => RejectReason::ProvisioningFailed,
            "response_invalid" => RejectReason::ResponseInvalid,
            "result_invalid" => RejectReason::ResultInvalid,
            "malformed_message" => RejectReason::MalformedMessage,
            "step_timeout" => RejectReason::StepTimeout,
            "session_timeout" => RejectReason::SessionTimeout,
            "internal_error" => RejectReason::InternalError,
            "no_responder_address" => RejectReason::NoResponderAddress,
            "busy" => RejectReason::Busy,
            _ => RejectReason::Rejected,
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
