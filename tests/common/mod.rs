// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use anyhow::Result;
use tempfile::TempDir;
use unita::application::LedgerService;
use unita::domain::{Amount, Currency};

/// Helper to create a test service with a temporary database
pub async fn test_service() -> Result<(LedgerService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let service = LedgerService::init(&db_path).await?;
    Ok((service, temp_dir))
}

/// Test fixture: standard owner setup
pub struct StandardOwners;

impl StandardOwners {
    /// Register the basic owner set: alice, bob, carol
    pub async fn create_basic(service: &LedgerService) -> Result<()> {
        service.register_owner("alice", Some("Alice".into())).await?;
        service.register_owner("bob", Some("Bob".into())).await?;
        service.register_owner("carol", Some("Carol".into())).await?;
        Ok(())
    }

    /// Issue starting funds into an owner's UNITS account
    pub async fn fund_units(service: &LedgerService, owner: &str, amount: Amount) -> Result<()> {
        service
            .issue(owner, amount, "UNITS", Some("starting funds".into()), None)
            .await?;
        Ok(())
    }

    /// Issue starting funds into an owner's MERITOS account
    pub async fn fund_meritos(service: &LedgerService, owner: &str, amount: Amount) -> Result<()> {
        service
            .issue(owner, amount, "MERITOS", Some("starting funds".into()), None)
            .await?;
        Ok(())
    }
}

/// Current UNITS balance, for terse assertions
pub async fn units_balance(service: &LedgerService, owner: &str) -> Result<Amount> {
    Ok(service.balance(owner, Currency::Units).await?)
}
