use std::path::Path;
use std::time::Duration;

use anyhow::{Context, anyhow};
use tracing::{debug, info, warn};

use crate::domain::{
    Account, Amount, Currency, IntegrityReport, Owner, TransactionRecord, TransferRequest,
    build_integrity_report,
};
use crate::storage::Repository;

use super::LedgerError;
use super::locks::AccountLocks;

/// How long a transfer may wait for its account locks before failing with
/// `LockTimeout`.
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// The ledger service: the sole entry point for moving value between
/// accounts. Validates, locks, commits, and records every movement; no
/// other component mutates balances.
pub struct LedgerService {
    repo: Repository,
    locks: AccountLocks,
}

impl LedgerService {
    /// Create a new ledger service with the given repository.
    pub fn new(repo: Repository) -> Self {
        Self {
            repo,
            locks: AccountLocks::new(DEFAULT_LOCK_TIMEOUT),
        }
    }

    /// Initialize a new database at the given path.
    pub async fn init(database_path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let repo = Repository::init(database_path).await?;
        Ok(Self::new(repo))
    }

    /// Connect to an existing database.
    pub async fn connect(database_path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let repo = Repository::connect(database_path, false).await?;
        Ok(Self::new(repo))
    }

    /// Override the lock acquisition timeout.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.locks = AccountLocks::new(timeout);
        self
    }

    // ========================
    // Owner operations
    // ========================

    /// Register a participant. Ids are opaque; duplicates are rejected.
    pub async fn register_owner(
        &self,
        id: &str,
        display_name: Option<String>,
    ) -> Result<Owner, LedgerError> {
        if self.repo.get_owner(id).await?.is_some() {
            return Err(LedgerError::OwnerAlreadyExists(id.to_string()));
        }

        let mut owner = Owner::new(id);
        if let Some(name) = display_name {
            owner = owner.with_display_name(name);
        }

        self.repo.save_owner(&owner).await?;
        Ok(owner)
    }

    /// Get a registered owner, if any.
    pub async fn get_owner(&self, id: &str) -> Result<Option<Owner>, LedgerError> {
        Ok(self.repo.get_owner(id).await?)
    }

    /// List all registered owners.
    pub async fn list_owners(&self) -> Result<Vec<Owner>, LedgerError> {
        Ok(self.repo.list_owners().await?)
    }

    // ========================
    // Transfers
    // ========================

    /// Move `amount` of one currency from the sender to the recipient.
    ///
    /// Validation order is fixed so rejections are deterministic: amount,
    /// currency, self-transfer, recipient, funds. An accepted request
    /// debits, credits, and appends its record in a single transaction
    /// while both account locks are held; a rejected request changes
    /// nothing and writes nothing.
    pub async fn transfer(
        &self,
        request: TransferRequest,
    ) -> Result<TransactionRecord, LedgerError> {
        if request.amount <= 0 {
            return Err(LedgerError::InvalidAmount(request.amount));
        }
        let currency = Currency::parse(&request.currency)
            .ok_or_else(|| LedgerError::InvalidCurrency(request.currency.clone()))?;
        if request.sender_id == request.recipient_id {
            return Err(LedgerError::SelfTransferForbidden(request.sender_id.clone()));
        }

        let keys = vec![
            Account::key(&request.sender_id, currency),
            Account::key(&request.recipient_id, currency),
        ];
        let _guards = self
            .locks
            .acquire(keys)
            .await
            .ok_or(LedgerError::LockTimeout)?;

        let payload_hash = request.payload_hash();
        let mut tx = self.repo.begin().await?;
        // First statement of the unit must be this write; see
        // reserve_sequence. A rollback releases the number again.
        let sequence = self.repo.reserve_sequence(&mut tx).await?;

        // A committed identical request replays its record instead of
        // applying twice
        if let Some(key) = &request.idempotency_key {
            if let Some(existing) = self.repo.find_idempotency_key(&mut tx, key).await? {
                if existing.payload_hash != payload_hash {
                    warn!(idempotency_key = %key, "idempotency key reused with different payload");
                    return Err(LedgerError::IdempotencyConflict(key.clone()));
                }
                let record = self
                    .repo
                    .get_record_tx(&mut tx, existing.transaction_id)
                    .await?
                    .ok_or_else(|| {
                        anyhow!("idempotency key {} references a missing transaction", key)
                    })?;
                debug!(transaction_id = %record.id, idempotency_key = %key, "replayed committed transfer");
                return Ok(record);
            }
        }

        if !self.repo.owner_exists(&mut tx, &request.recipient_id).await? {
            return Err(LedgerError::RecipientNotFound(request.recipient_id.clone()));
        }

        let debited = self
            .repo
            .apply_delta(&mut tx, &request.sender_id, currency, -request.amount)
            .await?;
        if debited.is_none() {
            let balance = self
                .repo
                .get_balance_tx(&mut tx, &request.sender_id, currency)
                .await?;
            warn!(
                sender = %request.sender_id,
                balance,
                required = request.amount,
                "transfer rejected: insufficient funds"
            );
            return Err(LedgerError::InsufficientFunds {
                owner_id: request.sender_id.clone(),
                balance,
                required: request.amount,
            });
        }

        self.repo
            .apply_delta(&mut tx, &request.recipient_id, currency, request.amount)
            .await?
            .ok_or_else(|| {
                anyhow!(
                    "credit of {} to {} was rejected",
                    request.amount,
                    request.recipient_id
                )
            })?;

        let mut record = TransactionRecord::transfer(&request, currency);
        record.sequence = sequence;
        self.repo.append_record(&mut tx, &record).await?;
        if let Some(key) = &request.idempotency_key {
            self.repo
                .save_idempotency_key(&mut tx, key, &payload_hash, record.id)
                .await?;
        }

        tx.commit().await.context("Failed to commit transfer")?;

        info!(
            transaction_id = %record.id,
            sequence = record.sequence,
            sender = %record.from_owner,
            recipient = %record.to_owner,
            amount = record.amount,
            currency = %record.currency,
            "transfer committed"
        );
        Ok(record)
    }

    /// Credit value entering the ledger from outside (system grants,
    /// top-ups). Appends an issue record and credits the one account in
    /// the same commit unit.
    pub async fn issue(
        &self,
        owner_id: &str,
        amount: Amount,
        currency: &str,
        description: Option<String>,
        metadata: Option<serde_json::Value>,
    ) -> Result<TransactionRecord, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        let currency =
            Currency::parse(currency).ok_or_else(|| LedgerError::InvalidCurrency(currency.to_string()))?;

        let _guards = self
            .locks
            .acquire(vec![Account::key(owner_id, currency)])
            .await
            .ok_or(LedgerError::LockTimeout)?;

        let mut tx = self.repo.begin().await?;
        let sequence = self.repo.reserve_sequence(&mut tx).await?;

        if !self.repo.owner_exists(&mut tx, owner_id).await? {
            return Err(LedgerError::RecipientNotFound(owner_id.to_string()));
        }

        self.repo
            .apply_delta(&mut tx, owner_id, currency, amount)
            .await?
            .ok_or_else(|| anyhow!("credit of {} to {} was rejected", amount, owner_id))?;

        let mut record = TransactionRecord::issue(owner_id, amount, currency, description, metadata);
        record.sequence = sequence;
        self.repo.append_record(&mut tx, &record).await?;

        tx.commit().await.context("Failed to commit issue")?;

        info!(
            transaction_id = %record.id,
            owner = %record.to_owner,
            amount = record.amount,
            currency = %record.currency,
            "value issued"
        );
        Ok(record)
    }

    // ========================
    // Reads
    // ========================

    /// Current balance of one account; 0 if never touched.
    pub async fn balance(&self, owner_id: &str, currency: Currency) -> Result<Amount, LedgerError> {
        Ok(self.repo.get_balance(owner_id, currency).await?)
    }

    /// Balances of one owner across every currency.
    pub async fn balances(&self, owner_id: &str) -> Result<Vec<(Currency, Amount)>, LedgerError> {
        Ok(self.repo.balances_for_owner(owner_id).await?)
    }

    /// Records in which the owner participated, oldest first.
    pub async fn history(
        &self,
        owner_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<TransactionRecord>, LedgerError> {
        Ok(self.repo.find_by_participant(owner_id, limit).await?)
    }

    /// The full transaction log, oldest first (audit export).
    pub async fn full_log(&self) -> Result<Vec<TransactionRecord>, LedgerError> {
        Ok(self.repo.list_records().await?)
    }

    /// Verify the ledger invariants against the durable state.
    pub async fn check_integrity(&self) -> Result<IntegrityReport, LedgerError> {
        let accounts = self.repo.list_accounts().await?;
        let records = self.repo.list_records().await?;
        let stats = self.repo.get_integrity_stats().await?;

        Ok(build_integrity_report(
            &accounts,
            &records,
            stats.owner_count,
            stats.invalid_amounts,
            stats.unknown_owner_refs,
            stats.has_sequence_gaps,
        ))
    }
}
