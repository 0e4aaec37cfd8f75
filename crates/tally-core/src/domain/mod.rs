//! Domain entities for the tally bootstrap handshake.
//!
//! This module contains pure business logic with no infrastructure
//! dependencies: no sockets, no async runtime, no policy code.  Everything
//! here can be compiled and tested in isolation.
//!
//! The four concepts:
//!
//! - [`role::TallyRole`] – the stock/foil role pair.  Exactly one of the two
//!   roles is the *builder* for a given handshake: the side responsible for
//!   provisioning the shared database.
//! - [`invitation::InvitationLink`] – the out-of-band invitation handed to
//!   the respondent, and [`invitation::TokenInfo`] – what the issuer's
//!   token-validation policy reports back about a presented token.
//! - [`provision::ProvisionResult`] – connection material for the shared
//!   database, created exactly once per successful handshake.
//! - [`reason::RejectReason`] – the closed failure taxonomy carried on the
//!   wire when a handshake is declined.

pub mod invitation;
pub mod provision;
pub mod reason;
pub mod role;
