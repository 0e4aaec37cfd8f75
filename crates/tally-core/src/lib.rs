//! # tally-core
//!
//! Shared library for the tally bootstrap handshake containing the wire
//! protocol codec, domain entities, and the reject-reason taxonomy.
//!
//! This crate is used by both sides of the handshake (the listener that
//! issued the invitation and the dialer that redeems it).  It has zero
//! dependencies on sockets, async runtimes, or policy implementations.
//!
//! # Architecture overview
//!
//! A *tally* is the eventual credit relationship record between two parties.
//! Before two previously-unacquainted parties can negotiate one, they need a
//! shared multi-party-writable database session.  This crate defines the
//! pieces both ends agree on:
//!
//! - **`protocol`** – How bytes travel over the network.  The three handshake
//!   messages are encoded into a compact binary format (8-byte header +
//!   payload) and decoded back into typed Rust structs on the other end.
//!
//! - **`domain`** – Pure business logic with no I/O dependencies: the
//!   stock/foil role pair, the out-of-band invitation link, the provisioning
//!   result produced by the builder side, and the closed set of reasons a
//!   handshake can fail with.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `tally_core::TallyRole` instead of `tally_core::domain::role::TallyRole`.
pub use domain::invitation::{InvitationLink, TokenInfo};
pub use domain::provision::ProvisionResult;
pub use domain::reason::RejectReason;
pub use domain::role::TallyRole;
pub use protocol::codec::{decode_message, encode_message, ProtocolError};
pub use protocol::messages::TallyMessage;
