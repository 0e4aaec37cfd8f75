//! Routing of second-connection `DatabaseResult` deliveries.
//!
//! Connections are single-exchange: when the dialer is the builder, its
//! provisioning result arrives on a *fresh* connection with no transport
//! tie to the listener session that is waiting for it.  The waiting session
//! registers its handshake id here; the accept path routes an inbound
//! `DatabaseResult` frame to the matching entry and drops unknown ids with
//! a warning.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;
use tracing::warn;
use uuid::Uuid;

use tally_core::protocol::messages::DatabaseResultMessage;

/// Map from handshake id to the listener session waiting on that delivery.
///
/// Owned by the `SessionManager`; each entry is single-shot.
#[derive(Default)]
pub struct PendingDeliveries {
    inner: Mutex<HashMap<Uuid, oneshot::Sender<DatabaseResultMessage>>>,
}

impl PendingDeliveries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a waiter for `handshake_id`.  The returned receiver
    /// resolves when the delivery arrives; the caller bounds the wait with
    /// its step deadline and calls [`PendingDeliveries::cancel`] on timeout.
    pub fn register(&self, handshake_id: Uuid) -> oneshot::Receiver<DatabaseResultMessage> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .lock()
            .expect("delivery lock poisoned")
            .insert(handshake_id, tx);
        rx
    }

    /// Routes a delivery to its waiting session.  Returns `false` when no
    /// session is waiting (unknown id, duplicate delivery, or the waiter
    /// already timed out).
    pub fn deliver(&self, msg: DatabaseResultMessage) -> bool {
        let sender = self
            .inner
            .lock()
            .expect("delivery lock poisoned")
            .remove(&msg.handshake_id);
        match sender {
            Some(tx) => {
                let handshake_id = msg.handshake_id;
                if tx.send(msg).is_err() {
                    warn!(%handshake_id, "delivery waiter gone before send");
                    return false;
                }
                true
            }
            None => {
                warn!(handshake_id = %msg.handshake_id, "dropping delivery with no waiting session");
                false
            }
        }
    }

    /// Removes a registration that will never be fulfilled.
    pub fn cancel(&self, handshake_id: Uuid) {
        self.inner
            .lock()
            .expect("delivery lock poisoned")
            .remove(&handshake_id);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("delivery lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
