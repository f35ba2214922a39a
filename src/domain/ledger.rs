use std::collections::HashMap;

use super::{Account, Amount, Currency, RecordKind, TransactionRecord};

/// Compute the balance of a single account by replaying the log.
/// Transfers debit the sender and credit the recipient; issue records only
/// credit (they bring value in from outside the ledger).
pub fn compute_balance(owner_id: &str, currency: Currency, records: &[TransactionRecord]) -> Amount {
    records
        .iter()
        .filter(|r| r.currency == currency)
        .fold(0, |balance, record| match record.kind {
            RecordKind::Transfer => {
                if record.to_owner == owner_id {
                    balance + record.amount
                } else if record.from_owner == owner_id {
                    balance - record.amount
                } else {
                    balance
                }
            }
            RecordKind::Issue => {
                if record.to_owner == owner_id {
                    balance + record.amount
                } else {
                    balance
                }
            }
        })
}

/// Replay the whole log into per-account balances.
pub fn replay_balances(records: &[TransactionRecord]) -> HashMap<(String, Currency), Amount> {
    let mut balances: HashMap<(String, Currency), Amount> = HashMap::new();

    for record in records {
        match record.kind {
            RecordKind::Transfer => {
                *balances
                    .entry((record.from_owner.clone(), record.currency))
                    .or_insert(0) -= record.amount;
                *balances
                    .entry((record.to_owner.clone(), record.currency))
                    .or_insert(0) += record.amount;
            }
            RecordKind::Issue => {
                *balances
                    .entry((record.to_owner.clone(), record.currency))
                    .or_insert(0) += record.amount;
            }
        }
    }

    balances
}

/// A stored balance that disagrees with the log replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceMismatch {
    pub owner_id: String,
    pub currency: Currency,
    pub stored: Amount,
    pub replayed: Amount,
}

/// Result of verifying the ledger invariants against the durable state.
#[derive(Debug, Clone)]
pub struct IntegrityReport {
    pub owner_count: i64,
    pub account_count: i64,
    pub record_count: i64,
    /// Accounts whose stored balance is below zero. Must always be empty.
    pub negative_balances: Vec<(String, Currency, Amount)>,
    /// Stored balances that do not equal the log replay. Must always be empty.
    pub balance_mismatches: Vec<BalanceMismatch>,
    /// Records with a non-positive amount. Must always be zero.
    pub invalid_amounts: i64,
    /// Records referencing owners that were never registered.
    pub unknown_owner_refs: i64,
    /// True if the commit sequence has holes.
    pub has_sequence_gaps: bool,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.negative_balances.is_empty()
            && self.balance_mismatches.is_empty()
            && self.invalid_amounts == 0
            && self.unknown_owner_refs == 0
            && !self.has_sequence_gaps
    }
}

/// Build the integrity report from the stored accounts, the full log, and
/// the storage-level counters.
pub fn build_integrity_report(
    accounts: &[Account],
    records: &[TransactionRecord],
    owner_count: i64,
    invalid_amounts: i64,
    unknown_owner_refs: i64,
    has_sequence_gaps: bool,
) -> IntegrityReport {
    let negative_balances = accounts
        .iter()
        .filter(|a| a.balance < 0)
        .map(|a| (a.owner_id.clone(), a.currency, a.balance))
        .collect();

    let mut replayed = replay_balances(records);
    let mut balance_mismatches = Vec::new();
    for account in accounts {
        let replayed_balance = replayed
            .remove(&(account.owner_id.clone(), account.currency))
            .unwrap_or(0);
        if replayed_balance != account.balance {
            balance_mismatches.push(BalanceMismatch {
                owner_id: account.owner_id.clone(),
                currency: account.currency,
                stored: account.balance,
                replayed: replayed_balance,
            });
        }
    }
    // Anything left over was moved in the log but has no account row
    for ((owner_id, currency), replayed_balance) in replayed {
        if replayed_balance != 0 {
            balance_mismatches.push(BalanceMismatch {
                owner_id,
                currency,
                stored: 0,
                replayed: replayed_balance,
            });
        }
    }

    IntegrityReport {
        owner_count,
        account_count: accounts.len() as i64,
        record_count: records.len() as i64,
        negative_balances,
        balance_mismatches,
        invalid_amounts,
        unknown_owner_refs,
        has_sequence_gaps,
    }
}
