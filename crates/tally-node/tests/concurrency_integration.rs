//! Concurrency behavior across sessions: idempotent retries, isolated
//! parallel handshakes, hook-hang containment, and capacity admission.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::TcpStream;

use common::{make_link, party, spawn_node, token_info, TestPolicy};
use tally_core::protocol::messages::ContactMessage;
use tally_core::{RejectReason, TallyMessage, TallyRole};
use tally_node::audit::TracingAudit;
use tally_node::net;
use tally_node::{InitiateOutcome, SessionConfig, SessionManager};

fn dialer_manager(config: SessionConfig) -> SessionManager {
    SessionManager::new(
        Arc::new(TestPolicy::new("unused")),
        Arc::new(TracingAudit),
        party("party-b"),
        config,
    )
}

fn completed(result: Result<InitiateOutcome, tally_node::SessionError>) -> tally_core::ProvisionResult {
    match result.expect("transport must succeed") {
        InitiateOutcome::Completed(p) => p,
        other => panic!("expected completion, got {other:?}"),
    }
}

#[tokio::test]
async fn test_retried_contact_with_same_key_provisions_once() {
    let issuer_policy = Arc::new(
        TestPolicy::new("db.a.local:5432").with_token("stock-token", token_info(TallyRole::Stock)),
    );
    let (_issuer, addr) = spawn_node(
        issuer_policy.clone(),
        party("party-a"),
        SessionConfig::default(),
    )
    .await;

    let dialer = dialer_manager(SessionConfig::default());
    let link = make_link(addr, "stock-token", TallyRole::Stock);

    let first = completed(dialer.initiate(&link, Some("retry-1".to_string())).await);
    let second = completed(dialer.initiate(&link, Some("retry-1".to_string())).await);

    assert_eq!(first.tally_id, second.tally_id, "replay returns the cached result");
    assert_eq!(issuer_policy.provision_count(), 1, "provisioning ran exactly once");
}

#[tokio::test]
async fn test_distinct_keys_provision_independently() {
    let issuer_policy = Arc::new(
        TestPolicy::new("db.a.local:5432").with_token("stock-token", token_info(TallyRole::Stock)),
    );
    let (_issuer, addr) = spawn_node(
        issuer_policy.clone(),
        party("party-a"),
        SessionConfig::default(),
    )
    .await;

    let dialer = dialer_manager(SessionConfig::default());
    let link = make_link(addr, "stock-token", TallyRole::Stock);

    let first = completed(dialer.initiate(&link, Some("key-a".to_string())).await);
    let second = completed(dialer.initiate(&link, Some("key-b".to_string())).await);

    assert_ne!(first.tally_id, second.tally_id);
    assert_eq!(issuer_policy.provision_count(), 2);
}

#[tokio::test]
async fn test_concurrent_dialers_get_distinct_tallies() {
    let issuer_policy = Arc::new(
        TestPolicy::new("db.a.local:5432").with_token("stock-token", token_info(TallyRole::Stock)),
    );
    let (issuer, addr) = spawn_node(
        issuer_policy.clone(),
        party("party-a"),
        SessionConfig::default(),
    )
    .await;

    let link = make_link(addr, "stock-token", TallyRole::Stock);
    let dialers = [
        dialer_manager(SessionConfig::default()),
        dialer_manager(SessionConfig::default()),
        dialer_manager(SessionConfig::default()),
    ];

    let (a, b, c) = tokio::join!(
        dialers[0].initiate(&link, None),
        dialers[1].initiate(&link, None),
        dialers[2].initiate(&link, None),
    );

    let ids: HashSet<String> = [completed(a), completed(b), completed(c)]
        .into_iter()
        .map(|p| p.tally_id)
        .collect();
    assert_eq!(ids.len(), 3, "each handshake gets its own tally");
    assert_eq!(issuer_policy.provision_count(), 3);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(issuer.active_session_counts().total(), 0);
}

#[tokio::test]
async fn test_hung_provisioning_hook_is_contained_by_the_step_deadline() {
    // The issuer's hook sleeps far past the step deadline on the stock
    // token; the foil flow never provisions on the issuer, so a concurrent
    // handshake under it must be unaffected by the stuck one.
    let issuer_policy = Arc::new(
        TestPolicy::new("db.a.local:5432")
            .with_token("stock-token", token_info(TallyRole::Stock))
            .with_token("foil-token", token_info(TallyRole::Foil))
            .with_provision_delay(Duration::from_secs(15)),
    );
    let issuer_config = SessionConfig {
        step_timeout: Duration::from_millis(300),
        ..SessionConfig::default()
    };
    let (_issuer, addr) = spawn_node(issuer_policy, party("party-a"), issuer_config).await;

    let stuck_dialer = dialer_manager(SessionConfig::default());
    let fast_dialer = dialer_manager(SessionConfig::default());
    let started = Instant::now();
    let stuck_link = make_link(addr, "stock-token", TallyRole::Stock);
    let fast_link = make_link(addr, "foil-token", TallyRole::Foil);
    let (stuck, fast) = tokio::join!(
        stuck_dialer.initiate(&stuck_link, None),
        fast_dialer.initiate(&fast_link, None),
    );

    assert_eq!(
        stuck.expect("transport must succeed"),
        InitiateOutcome::Rejected(RejectReason::StepTimeout)
    );
    assert!(
        started.elapsed() < Duration::from_secs(3),
        "containment took {:?}",
        started.elapsed()
    );
    // The unrelated session completed despite the stuck one.
    let provision = completed(fast);
    assert_eq!(provision.created_by, TallyRole::Foil);
}

#[tokio::test]
async fn test_contact_beyond_capacity_is_rejected_busy_not_queued() {
    let issuer_policy = Arc::new(
        TestPolicy::new("db.a.local:5432")
            .with_token("stock-token", token_info(TallyRole::Stock))
            .with_provision_delay(Duration::from_secs(2)),
    );
    let issuer_config = SessionConfig {
        max_concurrent_sessions: 1,
        ..SessionConfig::default()
    };
    let (issuer, addr) = spawn_node(issuer_policy, party("party-a"), issuer_config).await;

    // First contact occupies the only slot while its provisioning sleeps.
    let mut occupant = TcpStream::connect(addr).await.expect("connect");
    let contact = TallyMessage::Contact(ContactMessage {
        token: "stock-token".to_string(),
        party_id: "party-c".to_string(),
        identity_bundle: None,
        cadre_peer_addrs: vec![],
        idempotency_key: None,
    });
    net::send_message(&mut occupant, &contact).await.expect("send");
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(issuer.active_session_counts().listener, 1);

    // Second contact is answered immediately with busy.
    let started = Instant::now();
    let dialer = dialer_manager(SessionConfig::default());
    let result = dialer
        .initiate(&make_link(addr, "stock-token", TallyRole::Stock), None)
        .await
        .expect("transport must succeed");
    assert_eq!(result, InitiateOutcome::Rejected(RejectReason::Busy));
    assert!(started.elapsed() < Duration::from_secs(1), "busy must not queue");

    // The occupant is unaffected and completes normally.
    let resp = match net::read_message(&mut occupant).await.expect("read") {
        TallyMessage::ContactResponse(resp) => resp,
        other => panic!("expected contact response, got {other:?}"),
    };
    assert!(resp.approved);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(issuer.active_session_counts().total(), 0);
}
