//! # tally-node
//!
//! The node-side implementation of the tally bootstrap handshake: the
//! session manager, the listener and dialer session state machines, the
//! policy-hook boundary, and the supporting infrastructure (idempotency
//! cache, pending-delivery routing, framed I/O, TOML configuration).
//!
//! # Architecture
//!
//! ```text
//! SessionManager
//!  ├─ serve(TcpListener)      -- accepts connections, spawns ListenerSessions
//!  ├─ initiate(link, key)     -- runs a DialerSession for the caller
//!  │
//!  ├─ Arc<dyn TallyPolicy>    -- the five policy hooks (injected)
//!  ├─ Arc<dyn AuditSink>      -- session lifecycle events (injected)
//!  ├─ IdempotencyStore        -- caller-keyed provisioning replay cache
//!  └─ PendingDeliveries       -- routes DatabaseResult frames arriving on
//!                                fresh connections back to waiting sessions
//! ```
//!
//! Every session is an independent tokio task.  The only shared mutable
//! state is the idempotency store, the pending-delivery map, and the session
//! registry, each behind its own lock; sessions never block one another and
//! every suspension point (network I/O, policy hook) carries a step deadline.

pub mod audit;
pub mod config;
pub mod delivery;
pub mod hooks;
pub mod idempotency;
pub mod manager;
pub mod net;
pub mod policy;
pub mod session;

pub use audit::{AuditSink, TracingAudit};
pub use config::{NodeConfig, SessionConfig};
pub use hooks::{HookError, PartyProfile, TallyPolicy};
pub use manager::{InitiateOutcome, SessionCounts, SessionError, SessionManager};
pub use policy::{StaticTokenPolicy, TokenEntry};
pub use session::{SessionKind, SessionOutcome};
