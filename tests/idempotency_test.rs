mod common;

use anyhow::Result;
use common::{StandardOwners, test_service, units_balance};
use unita::application::LedgerError;
use unita::domain::{RecordKind, TransferRequest};

fn request_with_key(key: &str) -> TransferRequest {
    TransferRequest::new("alice", "bob", 5000, "UNITS")
        .with_description("market purchase")
        .with_idempotency_key(key)
}

#[tokio::test]
async fn test_retried_request_applies_at_most_once() -> Result<()> {
    let (service, _temp) = test_service().await?;
    StandardOwners::create_basic(&service).await?;
    StandardOwners::fund_units(&service, "alice", 10000).await?;

    let first = service.transfer(request_with_key("order-77")).await?;
    let second = service.transfer(request_with_key("order-77")).await?;

    // The retry replays the committed record instead of applying again
    assert_eq!(first.id, second.id);
    assert_eq!(first.sequence, second.sequence);

    assert_eq!(units_balance(&service, "alice").await?, 5000);
    assert_eq!(units_balance(&service, "bob").await?, 5000);

    let transfers: Vec<_> = service
        .history("bob", None)
        .await?
        .into_iter()
        .filter(|r| r.kind == RecordKind::Transfer)
        .collect();
    assert_eq!(transfers.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_key_reuse_with_different_payload_conflicts() -> Result<()> {
    let (service, _temp) = test_service().await?;
    StandardOwners::create_basic(&service).await?;
    StandardOwners::fund_units(&service, "alice", 10000).await?;

    service.transfer(request_with_key("order-77")).await?;

    let tampered = TransferRequest::new("alice", "bob", 9999, "UNITS")
        .with_idempotency_key("order-77");
    let result = service.transfer(tampered).await;

    match result {
        Err(LedgerError::IdempotencyConflict(key)) => assert_eq!(key, "order-77"),
        other => panic!("expected IdempotencyConflict, got {:?}", other.map(|r| r.id)),
    }

    // The conflicting attempt changed nothing
    assert_eq!(units_balance(&service, "alice").await?, 5000);
    assert_eq!(units_balance(&service, "bob").await?, 5000);

    Ok(())
}

#[tokio::test]
async fn test_rejected_requests_do_not_consume_the_key() -> Result<()> {
    let (service, _temp) = test_service().await?;
    StandardOwners::create_basic(&service).await?;

    // First attempt fails validation: the key must not be stored
    let result = service.transfer(request_with_key("order-88")).await;
    assert!(matches!(
        result,
        Err(LedgerError::InsufficientFunds { .. })
    ));

    // After funding, the identical retry commits normally
    StandardOwners::fund_units(&service, "alice", 10000).await?;
    let record = service.transfer(request_with_key("order-88")).await?;
    assert_eq!(record.amount, 5000);
    assert_eq!(units_balance(&service, "bob").await?, 5000);

    Ok(())
}

#[tokio::test]
async fn test_distinct_keys_commit_distinct_transfers() -> Result<()> {
    let (service, _temp) = test_service().await?;
    StandardOwners::create_basic(&service).await?;
    StandardOwners::fund_units(&service, "alice", 10000).await?;

    let first = service.transfer(request_with_key("order-1")).await?;
    let second = service.transfer(request_with_key("order-2")).await?;

    assert_ne!(first.id, second.id);
    assert_eq!(units_balance(&service, "alice").await?, 0);
    assert_eq!(units_balance(&service, "bob").await?, 10000);

    Ok(())
}

#[tokio::test]
async fn test_requests_without_keys_are_not_deduplicated() -> Result<()> {
    let (service, _temp) = test_service().await?;
    StandardOwners::create_basic(&service).await?;
    StandardOwners::fund_units(&service, "alice", 10000).await?;

    let request = TransferRequest::new("alice", "bob", 2500, "UNITS");
    let first = service.transfer(request.clone()).await?;
    let second = service.transfer(request).await?;

    assert_ne!(first.id, second.id);
    assert_eq!(units_balance(&service, "alice").await?, 5000);

    Ok(())
}

#[tokio::test]
async fn test_replay_returns_the_full_original_record() -> Result<()> {
    let (service, _temp) = test_service().await?;
    StandardOwners::create_basic(&service).await?;
    StandardOwners::fund_units(&service, "alice", 10000).await?;

    let first = service.transfer(request_with_key("order-5")).await?;
    let replay = service.transfer(request_with_key("order-5")).await?;

    assert_eq!(replay.from_owner, first.from_owner);
    assert_eq!(replay.to_owner, first.to_owner);
    assert_eq!(replay.amount, first.amount);
    assert_eq!(replay.currency, first.currency);
    assert_eq!(replay.description, first.description);
    assert_eq!(replay.created_at, first.created_at);

    Ok(())
}
