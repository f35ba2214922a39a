mod common;

use anyhow::Result;
use common::{StandardOwners, test_service};
use unita::application::LedgerService;
use unita::domain::{RecordKind, TransferRequest};
use unita::io::Exporter;

async fn seed_activity(service: &LedgerService) -> Result<()> {
    StandardOwners::create_basic(service).await?;
    StandardOwners::fund_units(service, "alice", 20000).await?;

    service
        .transfer(TransferRequest::new("alice", "bob", 3000, "UNITS").with_description("first"))
        .await?;
    service
        .transfer(TransferRequest::new("alice", "carol", 2000, "UNITS").with_description("second"))
        .await?;
    service
        .transfer(TransferRequest::new("bob", "alice", 1000, "UNITS").with_description("third"))
        .await?;
    Ok(())
}

#[tokio::test]
async fn test_history_is_ordered_oldest_first() -> Result<()> {
    let (service, _temp) = test_service().await?;
    seed_activity(&service).await?;

    let history = service.history("alice", None).await?;

    // Funding issue plus the three transfers alice participated in
    assert_eq!(history.len(), 4);
    assert!(history.windows(2).all(|w| w[0].sequence < w[1].sequence));
    assert_eq!(history[0].kind, RecordKind::Issue);
    assert_eq!(history[1].description.as_deref(), Some("first"));
    assert_eq!(history[3].description.as_deref(), Some("third"));

    Ok(())
}

#[tokio::test]
async fn test_history_only_includes_participants() -> Result<()> {
    let (service, _temp) = test_service().await?;
    seed_activity(&service).await?;

    let history = service.history("carol", None).await?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].description.as_deref(), Some("second"));

    // Both sides of a transfer see the same record
    let bob_history = service.history("bob", None).await?;
    assert!(bob_history.iter().any(|r| r.description.as_deref() == Some("first")));
    assert!(bob_history.iter().any(|r| r.description.as_deref() == Some("third")));

    // Uninvolved owners see nothing
    service.register_owner("dave", None).await?;
    assert!(service.history("dave", None).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_history_limit_returns_the_oldest_records() -> Result<()> {
    let (service, _temp) = test_service().await?;
    seed_activity(&service).await?;

    let limited = service.history("alice", Some(2)).await?;
    assert_eq!(limited.len(), 2);
    assert_eq!(limited[0].kind, RecordKind::Issue);
    assert_eq!(limited[1].description.as_deref(), Some("first"));

    Ok(())
}

#[tokio::test]
async fn test_csv_export_covers_the_log() -> Result<()> {
    let (service, _temp) = test_service().await?;
    seed_activity(&service).await?;

    let exporter = Exporter::new(&service);
    let mut buffer = Vec::new();
    let count = exporter.export_records_csv(&mut buffer, None).await?;
    assert_eq!(count, 4);

    let csv = String::from_utf8(buffer)?;
    let mut lines = csv.lines();
    assert!(lines.next().unwrap().starts_with("id,sequence,kind"));
    assert_eq!(lines.count(), 4);
    assert!(csv.contains("issue"));
    assert!(csv.contains("transfer"));

    Ok(())
}

#[tokio::test]
async fn test_json_export_filters_by_participant() -> Result<()> {
    let (service, _temp) = test_service().await?;
    seed_activity(&service).await?;

    let exporter = Exporter::new(&service);
    let mut buffer = Vec::new();
    let snapshot = exporter
        .export_records_json(&mut buffer, Some("carol"))
        .await?;

    assert_eq!(snapshot.records.len(), 1);
    assert_eq!(snapshot.records[0].description.as_deref(), Some("second"));

    let parsed: serde_json::Value = serde_json::from_slice(&buffer)?;
    assert_eq!(parsed["records"].as_array().unwrap().len(), 1);

    Ok(())
}
