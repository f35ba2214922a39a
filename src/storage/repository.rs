use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool, Transaction};
use tracing::debug;
use uuid::Uuid;

use crate::domain::{Account, Amount, Currency, Owner, RecordKind, TransactionId, TransactionRecord};

use super::MIGRATION_001_INITIAL;

/// Storage-level counters used by integrity verification. Balance replay
/// happens in the domain layer; these are the checks best answered in SQL.
#[derive(Debug, Clone)]
pub struct IntegrityStats {
    pub owner_count: i64,
    pub invalid_amounts: i64,
    pub unknown_owner_refs: i64,
    pub has_sequence_gaps: bool,
}

/// A committed idempotency key row.
#[derive(Debug, Clone)]
pub struct IdempotencyRow {
    pub payload_hash: String,
    pub transaction_id: TransactionId,
}

/// Repository over SQLite holding the account store (balances), the
/// append-only transaction log, and the idempotency keys.
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a SQLite database at the given path. WAL mode and a busy
    /// timeout keep concurrent committers on disjoint accounts from
    /// surfacing spurious lock errors.
    pub async fn connect(database_path: impl AsRef<Path>, create: bool) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(create)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        debug!("migrations applied");
        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(database_path: impl AsRef<Path>) -> Result<Self> {
        let repo = Self::connect(database_path, true).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    /// Begin the transaction that forms a commit unit.
    pub(crate) async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        self.pool.begin().await.context("Failed to begin transaction")
    }

    // ========================
    // Owner operations
    // ========================

    /// Save a new owner.
    pub async fn save_owner(&self, owner: &Owner) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO owners (id, display_name, created_at)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(&owner.id)
        .bind(&owner.display_name)
        .bind(owner.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to save owner")?;
        Ok(())
    }

    /// Get an owner by id.
    pub async fn get_owner(&self, id: &str) -> Result<Option<Owner>> {
        let row = sqlx::query(
            r#"
            SELECT id, display_name, created_at
            FROM owners
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch owner")?;

        match row {
            Some(row) => Ok(Some(Self::row_to_owner(&row)?)),
            None => Ok(None),
        }
    }

    /// List all owners, ordered by id.
    pub async fn list_owners(&self) -> Result<Vec<Owner>> {
        let rows = sqlx::query("SELECT id, display_name, created_at FROM owners ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list owners")?;

        rows.iter().map(Self::row_to_owner).collect()
    }

    /// Whether an owner id is addressable, checked inside a commit unit.
    pub(crate) async fn owner_exists(&self, conn: &mut SqliteConnection, id: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM owners WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to check owner existence")?;
        Ok(row.is_some())
    }

    // ========================
    // Account store
    // ========================

    /// Current balance of an account; 0 if the row does not exist yet
    /// (accounts are created lazily).
    pub async fn get_balance(&self, owner_id: &str, currency: Currency) -> Result<Amount> {
        let row = sqlx::query(
            r#"
            SELECT balance FROM accounts
            WHERE owner_id = ? AND currency = ?
            "#,
        )
        .bind(owner_id)
        .bind(currency.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch balance")?;

        Ok(row.map(|r| r.get("balance")).unwrap_or(0))
    }

    /// `get_balance` against a commit-unit connection.
    pub(crate) async fn get_balance_tx(
        &self,
        conn: &mut SqliteConnection,
        owner_id: &str,
        currency: Currency,
    ) -> Result<Amount> {
        let row = sqlx::query(
            r#"
            SELECT balance FROM accounts
            WHERE owner_id = ? AND currency = ?
            "#,
        )
        .bind(owner_id)
        .bind(currency.as_str())
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to fetch balance")?;

        Ok(row.map(|r| r.get("balance")).unwrap_or(0))
    }

    /// The only balance mutation primitive. Adds `delta` under the
    /// condition that the result stays non-negative. Returns the new
    /// balance, or `None` (without mutating) if the result would be
    /// negative.
    ///
    /// The zero row is created lazily on the first credit; a debit
    /// against a missing row means balance 0 and is refused by the
    /// condition like any other overdraft.
    pub(crate) async fn apply_delta(
        &self,
        conn: &mut SqliteConnection,
        owner_id: &str,
        currency: Currency,
        delta: Amount,
    ) -> Result<Option<Amount>> {
        let now = Utc::now().to_rfc3339();

        if delta >= 0 {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO accounts (owner_id, currency, balance, updated_at)
                VALUES (?, ?, 0, ?)
                "#,
            )
            .bind(owner_id)
            .bind(currency.as_str())
            .bind(&now)
            .execute(&mut *conn)
            .await
            .context("Failed to create account row")?;
        }

        let row = sqlx::query(
            r#"
            UPDATE accounts
            SET balance = balance + ?, updated_at = ?
            WHERE owner_id = ? AND currency = ? AND balance + ? >= 0
            RETURNING balance
            "#,
        )
        .bind(delta)
        .bind(&now)
        .bind(owner_id)
        .bind(currency.as_str())
        .bind(delta)
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to apply balance delta")?;

        Ok(row.map(|r| r.get("balance")))
    }

    /// All account rows (integrity verification).
    pub async fn list_accounts(&self) -> Result<Vec<Account>> {
        let rows = sqlx::query(
            r#"
            SELECT owner_id, currency, balance, updated_at
            FROM accounts
            ORDER BY owner_id, currency
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list accounts")?;

        rows.iter().map(Self::row_to_account).collect()
    }

    /// Balances of one owner across every currency, missing rows reported
    /// as zero.
    pub async fn balances_for_owner(&self, owner_id: &str) -> Result<Vec<(Currency, Amount)>> {
        let rows = sqlx::query(
            r#"
            SELECT currency, balance FROM accounts
            WHERE owner_id = ?
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch balances")?;

        let mut balances: Vec<(Currency, Amount)> = Vec::new();
        for currency in Currency::ALL {
            let balance = rows
                .iter()
                .find(|r| r.get::<String, _>("currency") == currency.as_str())
                .map(|r| r.get("balance"))
                .unwrap_or(0);
            balances.push((currency, balance));
        }
        Ok(balances)
    }

    // ========================
    // Transaction log
    // ========================

    /// Reserve the next commit sequence number. Must be the first
    /// statement of every commit unit: being a write, it takes the
    /// database write lock for the whole span of the transaction, so the
    /// unit never has to upgrade a read snapshot mid-flight. Rolling the
    /// transaction back releases the number again, keeping the sequence
    /// dense.
    pub(crate) async fn reserve_sequence(&self, conn: &mut SqliteConnection) -> Result<i64> {
        let row = sqlx::query(
            r#"
            UPDATE sequence_counter
            SET value = value + 1
            WHERE name = 'transaction_sequence'
            RETURNING value
            "#,
        )
        .fetch_one(&mut *conn)
        .await
        .context("Failed to reserve sequence number")?;

        Ok(row.get("value"))
    }

    /// Append a record inside a commit unit. The sequence must already be
    /// reserved; the row is immutable from here on.
    pub(crate) async fn append_record(
        &self,
        conn: &mut SqliteConnection,
        record: &TransactionRecord,
    ) -> Result<()> {
        let metadata_json = record.metadata.as_ref().map(|m| m.to_string());

        sqlx::query(
            r#"
            INSERT INTO transactions (id, sequence, kind, from_owner, to_owner, amount, currency, description, metadata, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.sequence)
        .bind(record.kind.as_str())
        .bind(&record.from_owner)
        .bind(&record.to_owner)
        .bind(record.amount)
        .bind(record.currency.as_str())
        .bind(&record.description)
        .bind(&metadata_json)
        .bind(record.created_at.to_rfc3339())
        .execute(&mut *conn)
        .await
        .context("Failed to append transaction record")?;

        Ok(())
    }

    /// Get a record by id inside a commit unit (idempotent replay).
    pub(crate) async fn get_record_tx(
        &self,
        conn: &mut SqliteConnection,
        id: TransactionId,
    ) -> Result<Option<TransactionRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, sequence, kind, from_owner, to_owner, amount, currency, description, metadata, created_at
            FROM transactions
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to fetch transaction record")?;

        match row {
            Some(row) => Ok(Some(Self::row_to_record(&row)?)),
            None => Ok(None),
        }
    }

    /// Records in which the owner participated as sender or recipient,
    /// ordered by commit sequence (oldest first).
    pub async fn find_by_participant(
        &self,
        owner_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<TransactionRecord>> {
        let mut query = String::from(
            "SELECT id, sequence, kind, from_owner, to_owner, amount, currency, description, metadata, created_at \
             FROM transactions WHERE from_owner = ? OR to_owner = ? ORDER BY sequence",
        );
        if let Some(limit) = limit {
            query.push_str(&format!(" LIMIT {}", limit));
        }

        let rows = sqlx::query(&query)
            .bind(owner_id)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list records for participant")?;

        rows.iter().map(Self::row_to_record).collect()
    }

    /// The full log, ordered by commit sequence (integrity verification,
    /// export).
    pub async fn list_records(&self) -> Result<Vec<TransactionRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, sequence, kind, from_owner, to_owner, amount, currency, description, metadata, created_at
            FROM transactions
            ORDER BY sequence
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list records")?;

        rows.iter().map(Self::row_to_record).collect()
    }

    // ========================
    // Idempotency keys
    // ========================

    /// Look up an idempotency key inside a commit unit.
    pub(crate) async fn find_idempotency_key(
        &self,
        conn: &mut SqliteConnection,
        key: &str,
    ) -> Result<Option<IdempotencyRow>> {
        let row = sqlx::query(
            r#"
            SELECT payload_hash, transaction_id FROM idempotency_keys
            WHERE key = ?
            "#,
        )
        .bind(key)
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to fetch idempotency key")?;

        match row {
            Some(row) => {
                let transaction_id: String = row.get("transaction_id");
                Ok(Some(IdempotencyRow {
                    payload_hash: row.get("payload_hash"),
                    transaction_id: Uuid::parse_str(&transaction_id)
                        .context("Invalid transaction id on idempotency key")?,
                }))
            }
            None => Ok(None),
        }
    }

    /// Store an idempotency key in the same commit unit as its transaction.
    pub(crate) async fn save_idempotency_key(
        &self,
        conn: &mut SqliteConnection,
        key: &str,
        payload_hash: &str,
        transaction_id: TransactionId,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO idempotency_keys (key, payload_hash, transaction_id, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(key)
        .bind(payload_hash)
        .bind(transaction_id.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *conn)
        .await
        .context("Failed to save idempotency key")?;
        Ok(())
    }

    // ========================
    // Integrity
    // ========================

    /// Storage-level counters for integrity checking.
    pub async fn get_integrity_stats(&self) -> Result<IntegrityStats> {
        let owner_count: i64 = sqlx::query("SELECT COUNT(*) as count FROM owners")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count owners")?
            .get("count");

        let invalid_amounts: i64 = sqlx::query(
            r#"
            SELECT COUNT(*) as count FROM transactions WHERE amount <= 0
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to count invalid amounts")?
        .get("count");

        let unknown_owner_refs: i64 = sqlx::query(
            r#"
            SELECT COUNT(*) as count
            FROM transactions t
            WHERE NOT EXISTS (SELECT 1 FROM owners o WHERE o.id = t.from_owner)
               OR NOT EXISTS (SELECT 1 FROM owners o WHERE o.id = t.to_owner)
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to count unknown owner references")?
        .get("count");

        let sequence_check = sqlx::query(
            r#"
            SELECT MIN(sequence) as min_seq, MAX(sequence) as max_seq, COUNT(*) as count
            FROM transactions
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to check sequence continuity")?;

        let min_seq: Option<i64> = sequence_check.get("min_seq");
        let max_seq: Option<i64> = sequence_check.get("max_seq");
        let count: i64 = sequence_check.get("count");

        let has_sequence_gaps = match (min_seq, max_seq) {
            (Some(min), Some(max)) => (max - min + 1) != count,
            _ => false,
        };

        Ok(IntegrityStats {
            owner_count,
            invalid_amounts,
            unknown_owner_refs,
            has_sequence_gaps,
        })
    }

    // ========================
    // Row mapping
    // ========================

    fn row_to_owner(row: &SqliteRow) -> Result<Owner> {
        let created_at_str: String = row.get("created_at");
        Ok(Owner {
            id: row.get("id"),
            display_name: row.get("display_name"),
            created_at: Self::parse_timestamp(&created_at_str)?,
        })
    }

    fn row_to_account(row: &SqliteRow) -> Result<Account> {
        let currency_str: String = row.get("currency");
        let updated_at_str: String = row.get("updated_at");
        Ok(Account {
            owner_id: row.get("owner_id"),
            currency: Currency::parse(&currency_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid currency: {}", currency_str))?,
            balance: row.get("balance"),
            updated_at: Self::parse_timestamp(&updated_at_str)?,
        })
    }

    fn row_to_record(row: &SqliteRow) -> Result<TransactionRecord> {
        let id_str: String = row.get("id");
        let kind_str: String = row.get("kind");
        let currency_str: String = row.get("currency");
        let metadata_json: Option<String> = row.get("metadata");
        let created_at_str: String = row.get("created_at");

        Ok(TransactionRecord {
            id: Uuid::parse_str(&id_str).context("Invalid transaction ID")?,
            sequence: row.get("sequence"),
            kind: RecordKind::parse(&kind_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid record kind: {}", kind_str))?,
            from_owner: row.get("from_owner"),
            to_owner: row.get("to_owner"),
            amount: row.get("amount"),
            currency: Currency::parse(&currency_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid currency: {}", currency_str))?,
            description: row.get("description"),
            metadata: metadata_json
                .map(|s| serde_json::from_str(&s))
                .transpose()
                .context("Invalid metadata JSON")?,
            created_at: Self::parse_timestamp(&created_at_str)?,
        })
    }

    fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
        Ok(DateTime::parse_from_rfc3339(s)
            .context("Invalid timestamp")?
            .with_timezone(&Utc))
    }
}
