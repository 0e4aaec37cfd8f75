//! A table-driven reference policy.
//!
//! [`StaticTokenPolicy`] backs the headless binary: tokens come from the
//! config file, identity checks are byte equality against the token's
//! requirement, and provisioning mints a fresh tally id against a fixed
//! database endpoint.  Deployments with real token issuance or directory
//! lookups supply their own [`TallyPolicy`] instead.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{info, warn};
use uuid::Uuid;

use tally_core::protocol::messages::ContactResponseMessage;
use tally_core::{ProvisionResult, TallyRole, TokenInfo};

use crate::config::TokenConfigEntry;
use crate::hooks::{HookError, PartyProfile, TallyPolicy};

/// One token in the static table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenEntry {
    pub info: TokenInfo,
    /// A single-use token is spent on its first successful validation and
    /// refused afterwards.
    pub single_use: bool,
}

struct TokenState {
    entry: TokenEntry,
    spent: bool,
}

/// Policy with a fixed token table and equality-based identity checks.
pub struct StaticTokenPolicy {
    database_endpoint: String,
    tokens: Mutex<HashMap<String, TokenState>>,
}

impl StaticTokenPolicy {
    pub fn new(database_endpoint: impl Into<String>) -> Self {
        Self {
            database_endpoint: database_endpoint.into(),
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Adds a token to the table.
    pub fn with_token(self, token: impl Into<String>, entry: TokenEntry) -> Self {
        self.tokens
            .lock()
            .expect("token table lock poisoned")
            .insert(token.into(), TokenState { entry, spent: false });
        self
    }

    /// Builds the table from config entries.  Entries with an unknown role
    /// string are skipped with a warning rather than failing startup.
    pub fn from_config(entries: &[TokenConfigEntry], database_endpoint: impl Into<String>) -> Self {
        let mut policy = Self::new(database_endpoint);
        for entry in entries {
            let role = match entry.role.as_str() {
                "stock" => TallyRole::Stock,
                "foil" => TallyRole::Foil,
                other => {
                    warn!(token = entry.token.as_str(), role = other, "skipping token with unknown role");
                    continue;
                }
            };
            policy = policy.with_token(
                entry.token.clone(),
                TokenEntry {
                    info: TokenInfo {
                        role,
                        expires_at_ms: entry.expires_at_ms,
                        identity_requirement: None,
                    },
                    single_use: entry.single_use,
                },
            );
        }
        policy
    }
}

#[async_trait]
impl TallyPolicy for StaticTokenPolicy {
    async fn validate_token(
        &self,
        token: &str,
        session_id: Uuid,
    ) -> Result<Option<TokenInfo>, HookError> {
        let mut tokens = self.tokens.lock().expect("token table lock poisoned");
        match tokens.get_mut(token) {
            Some(state) if state.spent => Ok(None),
            Some(state) => {
                if state.entry.single_use {
                    state.spent = true;
                    info!(%session_id, "single-use token spent");
                }
                Ok(Some(state.entry.info.clone()))
            }
            None => Ok(None),
        }
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
        party_a: &PartyProfile,
        party_b: &PartyProfile,
        session_id: Uuid,
    ) -> Result<ProvisionResult, HookError> {
        let tally_id = format!("tally-{}", Uuid::new_v4().simple());
        info!(
            %session_id,
            tally_id,
            builder = %builder_role,
            issuer = party_a.party_id.as_str(),
            respondent = party_b.party_id.as_str(),
            "provisioned shared database"
        );
        Ok(ProvisionResult {
            tally_id,
            created_by: builder_role,
            endpoint: self.database_endpoint.clone(),
            credentials_ref: format!("cred-{}", Uuid::new_v4().simple()),
        })
    }

    async fn validate_response(
        &self,
        response: &ContactResponseMessage,
        _session_id: Uuid,
    ) -> Result<bool, HookError> {
        Ok(response.approved)
    }

    async fn validate_result(
        &self,
        result: &ProvisionResult,
        _session_id: Uuid,
    ) -> Result<bool, HookError> {
        Ok(!result.tally_id.is_empty() && !result.endpoint.is_empty())
    }
}
