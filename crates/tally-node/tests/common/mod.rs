//! Shared fixtures for the integration tests: a configurable in-test policy
//! and helpers that stand up a serving node on an ephemeral port.
#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpListener;
use uuid::Uuid;

use tally_core::protocol::messages::ContactResponseMessage;
use tally_core::{InvitationLink, ProvisionResult, TallyRole, TokenInfo};
use tally_node::audit::TracingAudit;
use tally_node::hooks::{HookError, PartyProfile, TallyPolicy};
use tally_node::{SessionConfig, SessionManager};

pub const FAR_FUTURE_MS: u64 = u64::MAX / 2;

/// Test policy: fixed token table, byte-equality identity checks, counted
/// (optionally delayed) provisioning.
pub struct TestPolicy {
    tokens: HashMap<String, TokenInfo>,
    endpoint: String,
    provision_delay: Option<Duration>,
    provision_count: AtomicUsize,
    result_count: AtomicUsize,
}

impl TestPolicy {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            tokens: HashMap::new(),
            endpoint: endpoint.into(),
            provision_delay: None,
            provision_count: AtomicUsize::new(0),
            result_count: AtomicUsize::new(0),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>, info: TokenInfo) -> Self {
        self.tokens.insert(token.into(), info);
        self
    }

    /// Makes every provisioning call sleep first, for timeout tests.
    pub fn with_provision_delay(mut self, delay: Duration) -> Self {
        self.provision_delay = Some(delay);
        self
    }

    pub fn provision_count(&self) -> usize {
        self.provision_count.load(Ordering::SeqCst)
    }

    pub fn result_count(&self) -> usize {
        self.result_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TallyPolicy for TestPolicy {
    async fn validate_token(
        &self,
        token: &str,
        _session_id: Uuid,
    ) -> Result<Option<TokenInfo>, HookError> {
        Ok(self.tokens.get(token).cloned())
    }

    async fn validate_identity<'a>(
        &self,
        bundle: Option<&'a [u8]>,
        requirement: &[u8],
        _session_id: Uuid,
    ) -> Result<bool, HookError> {
        Ok(bundle == Some(requirement))
    }

    async fn provision_database(
        &self,
        builder_role: TallyRole,
        _party_a: &PartyProfile,
        _party_b: &PartyProfile,
        _session_id: Uuid,
    ) -> Result<ProvisionResult, HookError> {
        self.provision_count.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.provision_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(ProvisionResult {
            tally_id: format!("tally-{}", Uuid::new_v4().simple()),
            created_by: builder_role,
            endpoint: self.endpoint.clone(),
            credentials_ref: format!("cred-{}", Uuid::new_v4().simple()),
        })
    }

    async fn validate_response(
        &self,
        _response: &ContactResponseMessage,
        _session_id: Uuid,
    ) -> Result<bool, HookError> {
        Ok(true)
    }

    async fn validate_result(
        &self,
        _result: &ProvisionResult,
        _session_id: Uuid,
    ) -> Result<bool, HookError> {
        self.result_count.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
}

pub fn token_info(role: TallyRole) -> TokenInfo {
    TokenInfo {
        role,
        expires_at_ms: FAR_FUTURE_MS,
        identity_requirement: None,
    }
}

pub fn party(id: &str) -> PartyProfile {
    PartyProfile {
        party_id: id.to_string(),
        cadre_peer_addrs: vec![format!("{id}.cadre.local:4040")],
    }
}

/// Builds a manager around `policy` and serves it on an ephemeral local
/// port.  The serve task runs until the test's runtime shuts down.
pub async fn spawn_node(
    policy: Arc<dyn TallyPolicy>,
    local: PartyProfile,
    config: SessionConfig,
) -> (Arc<SessionManager>, SocketAddr) {
    let manager = Arc::new(SessionManager::new(
        policy,
        Arc::new(TracingAudit),
        local,
        config,
    ));
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(Arc::clone(&manager).serve(listener));
    (manager, addr)
}

pub fn make_link(addr: SocketAddr, token: &str, builder_role: TallyRole) -> InvitationLink {
    InvitationLink {
        responder_addrs: vec![addr],
        token: token.to_string(),
        token_expires_at_ms: FAR_FUTURE_MS,
        builder_role,
        identity_requirement: None,
    }
}
