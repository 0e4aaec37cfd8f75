//! The stock/foil role pair.
//!
//! Every tally has exactly two fixed roles, named *stock* and *foil*
//! (inherited naming from the credit-tally domain).  During the bootstrap
//! handshake the roles decide one thing only: which side provisions the
//! shared database.  By convention the invitation issuer (the listener)
//! plays stock and the respondent (the dialer) plays foil, so an invitation
//! whose builder role is `Stock` selects the 2-message flow and one whose
//! builder role is `Foil` selects the 3-message flow.

use serde::{Deserialize, Serialize};

/// One of the two fixed roles a party plays in a tally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum TallyRole {
    Stock = 0x01,
    Foil = 0x02,
}

impl TryFrom<u8> for TallyRole {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(TallyRole::Stock),
            0x02 => Ok(TallyRole::Foil),
            _ => Err(()),
        }
    }
}

impl TallyRole {
    /// Returns the counterpart role.
    pub fn opposite(self) -> TallyRole {
        match self {
            TallyRole::Stock => TallyRole::Foil,
            TallyRole::Foil => TallyRole::Stock,
        }
    }

    /// Wire/display name, lowercase.
    pub fn as_str(self) -> &'static str {
        match self {
            TallyRole::Stock => "stock",
            TallyRole::Foil => "foil",
        }
    }
}

impl std::fmt::Display for TallyRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trips_through_byte() {
        for role in [TallyRole::Stock, TallyRole::Foil] {
            assert_eq!(TallyRole::try_from(role as u8), Ok(role));
        }
    }

    #[test]
    fn test_unknown_byte_is_rejected() {
        assert!(TallyRole::try_from(0x00).is_err());
        assert!(TallyRole::try_from(0x03).is_err());
    }

    #[test]
    fn test_opposite_is_involutive() {
        assert_eq!(TallyRole::Stock.opposite(), TallyRole::Foil);
        assert_eq!(TallyRole::Foil.opposite().opposite(), TallyRole::Foil);
    }

    #[test]
    fn test_display_uses_lowercase_names() {
        assert_eq!(TallyRole::Stock.to_string(), "stock");
        assert_eq!(TallyRole::Foil.to_string(), "foil");
    }
}
