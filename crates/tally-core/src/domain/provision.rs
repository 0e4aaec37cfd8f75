//! Provisioning results.
//!
//! Whichever side holds the builder role creates the shared database through
//! the provisioning policy and hands back a [`ProvisionResult`]: the
//! connection material the counterparty needs to join.  The result is
//! created exactly once per successful handshake and never mutated.

use serde::{Deserialize, Serialize};

use crate::domain::role::TallyRole;

/// Connection material for a freshly provisioned shared database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionResult {
    /// Identifier of the tally record the database was provisioned for.
    pub tally_id: String,
    /// Role of the side that performed the provisioning.  Always equal to
    /// the invitation's builder role.
    pub created_by: TallyRole,
    /// Connection endpoint for the shared database.
    pub endpoint: String,
    /// Reference to credentials the counterparty can redeem to connect.
    /// Opaque to the handshake core.
    pub credentials_ref: String,
}
