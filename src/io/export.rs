use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;

use crate::application::LedgerService;
use crate::domain::TransactionRecord;

/// Audit snapshot of the transaction log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSnapshot {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub records: Vec<TransactionRecord>,
}

/// Exporter for the audit/reporting surface: renders the append-only
/// transaction log (whole, or one participant's slice) as CSV or JSON.
pub struct Exporter<'a> {
    service: &'a LedgerService,
}

impl<'a> Exporter<'a> {
    pub fn new(service: &'a LedgerService) -> Self {
        Self { service }
    }

    /// Export transaction records to CSV format. Records are in commit
    /// order, oldest first.
    pub async fn export_records_csv<W: Write>(
        &self,
        writer: W,
        owner_id: Option<&str>,
    ) -> Result<usize> {
        let records = self.load_records(owner_id).await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        // Write header
        csv_writer.write_record([
            "id",
            "sequence",
            "kind",
            "created_at",
            "from_owner",
            "to_owner",
            "amount",
            "currency",
            "description",
            "metadata",
        ])?;

        let mut count = 0;
        for record in &records {
            csv_writer.write_record([
                record.id.to_string(),
                record.sequence.to_string(),
                record.kind.as_str().to_string(),
                record.created_at.to_rfc3339(),
                record.from_owner.clone(),
                record.to_owner.clone(),
                record.amount.to_string(),
                record.currency.to_string(),
                record.description.clone().unwrap_or_default(),
                record
                    .metadata
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_default(),
            ])?;
            count += 1;
        }

        csv_writer.flush()?;
        Ok(count)
    }

    /// Export transaction records as a JSON snapshot.
    pub async fn export_records_json<W: Write>(
        &self,
        mut writer: W,
        owner_id: Option<&str>,
    ) -> Result<LogSnapshot> {
        let records = self.load_records(owner_id).await?;

        let snapshot = LogSnapshot {
            version: env!("CARGO_PKG_VERSION").to_string(),
            exported_at: Utc::now(),
            records,
        };

        let json = serde_json::to_string_pretty(&snapshot)?;
        writer.write_all(json.as_bytes())?;
        writer.flush()?;

        Ok(snapshot)
    }

    async fn load_records(&self, owner_id: Option<&str>) -> Result<Vec<TransactionRecord>> {
        let records = match owner_id {
            Some(owner_id) => self.service.history(owner_id, None).await?,
            None => self.service.full_log().await?,
        };
        Ok(records)
    }
}
