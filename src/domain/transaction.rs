use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::{Amount, Currency};

pub type TransactionId = Uuid;

/// An instruction to move value, submitted by a caller. Ephemeral: it is
/// constructed per call and never persisted directly; its accepted form
/// becomes a [`TransactionRecord`].
///
/// The currency arrives as a raw code string so the service can reject
/// unknown codes in its own validation sequence.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    /// Authenticated caller identity, supplied by the boundary layer.
    pub sender_id: String,
    pub recipient_id: String,
    /// Always strictly positive in a valid request.
    pub amount: Amount,
    pub currency: String,
    pub description: Option<String>,
    /// Opaque to the ledger; stored and returned verbatim.
    pub metadata: Option<serde_json::Value>,
    /// Makes a retried submission apply at most once.
    pub idempotency_key: Option<String>,
}

impl TransferRequest {
    pub fn new(
        sender_id: impl Into<String>,
        recipient_id: impl Into<String>,
        amount: Amount,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            sender_id: sender_id.into(),
            recipient_id: recipient_id.into(),
            amount,
            currency: currency.into(),
            description: None,
            metadata: None,
            idempotency_key: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Hex digest over a canonical encoding of the request payload. Two
    /// submissions under the same idempotency key must carry the same
    /// payload; the stored hash is how a mismatch is detected.
    pub fn payload_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.sender_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.recipient_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.amount.to_be_bytes());
        hasher.update(self.currency.to_uppercase().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.description.as_deref().unwrap_or("").as_bytes());
        hasher.update([0u8]);
        if let Some(metadata) = &self.metadata {
            // serde_json sorts object keys, so this encoding is canonical
            hasher.update(metadata.to_string().as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

/// How a record moved value. `Transfer` debits the sender and credits the
/// recipient; `Issue` credits value entering the ledger from outside
/// (system grants, top-ups) and has no debit side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Transfer,
    Issue,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Transfer => "transfer",
            RecordKind::Issue => "issue",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "transfer" => Some(RecordKind::Transfer),
            "issue" => Some(RecordKind::Issue),
            _ => None,
        }
    }
}

/// The durable, immutable result of a committed movement. Records are
/// append-only: once written they are never mutated or deleted, and
/// corrections are made by committing further movements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: TransactionId,
    /// Monotonically increasing commit order, assigned by the log
    pub sequence: i64,
    pub kind: RecordKind,
    /// Sender account owner (equals `to_owner` for issue records)
    pub from_owner: String,
    /// Recipient account owner
    pub to_owner: String,
    /// Always positive
    pub amount: Amount,
    pub currency: Currency,
    pub description: Option<String>,
    /// Caller-supplied opaque value, stored verbatim for audit only
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl TransactionRecord {
    /// Build the record for an accepted transfer request. Sequence is
    /// assigned by the log at append time.
    pub fn transfer(request: &TransferRequest, currency: Currency) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence: 0,
            kind: RecordKind::Transfer,
            from_owner: request.sender_id.clone(),
            to_owner: request.recipient_id.clone(),
            amount: request.amount,
            currency,
            description: request.description.clone(),
            metadata: request.metadata.clone(),
            created_at: Utc::now(),
        }
    }

    /// Build the record for value issued into an account from outside the
    /// ledger. Both owner columns carry the recipient so participant
    /// history queries stay uniform.
    pub fn issue(
        owner_id: &str,
        amount: Amount,
        currency: Currency,
        description: Option<String>,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence: 0,
            kind: RecordKind::Issue,
            from_owner: owner_id.to_string(),
            to_owner: owner_id.to_string(),
            amount,
            currency,
            description,
            metadata,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_builder() {
        let request = TransferRequest::new("alice", "bob", 5000, "UNITS")
            .with_description("lunch")
            .with_metadata(json!({"order": 42}))
            .with_idempotency_key("key-1");

        assert_eq!(request.sender_id, "alice");
        assert_eq!(request.recipient_id, "bob");
        assert_eq!(request.amount, 5000);
        assert_eq!(request.description, Some("lunch".to_string()));
        assert_eq!(request.idempotency_key, Some("key-1".to_string()));
    }

    #[test]
    fn test_payload_hash_is_stable() {
        let a = TransferRequest::new("alice", "bob", 5000, "UNITS");
        let b = TransferRequest::new("alice", "bob", 5000, "UNITS");
        assert_eq!(a.payload_hash(), b.payload_hash());
    }

    #[test]
    fn test_payload_hash_detects_changed_fields() {
        let base = TransferRequest::new("alice", "bob", 5000, "UNITS");
        let other_amount = TransferRequest::new("alice", "bob", 5001, "UNITS");
        let other_recipient = TransferRequest::new("alice", "carol", 5000, "UNITS");
        let other_currency = TransferRequest::new("alice", "bob", 5000, "MERITOS");

        assert_ne!(base.payload_hash(), other_amount.payload_hash());
        assert_ne!(base.payload_hash(), other_recipient.payload_hash());
        assert_ne!(base.payload_hash(), other_currency.payload_hash());
    }

    #[test]
    fn test_payload_hash_ignores_idempotency_key() {
        let a = TransferRequest::new("alice", "bob", 5000, "UNITS").with_idempotency_key("k1");
        let b = TransferRequest::new("alice", "bob", 5000, "UNITS").with_idempotency_key("k2");
        assert_eq!(a.payload_hash(), b.payload_hash());
    }

    #[test]
    fn test_transfer_record_copies_request_fields() {
        let request = TransferRequest::new("alice", "bob", 5000, "UNITS")
            .with_metadata(json!({"note": "x"}));
        let record = TransactionRecord::transfer(&request, Currency::Units);

        assert_eq!(record.kind, RecordKind::Transfer);
        assert_eq!(record.from_owner, "alice");
        assert_eq!(record.to_owner, "bob");
        assert_eq!(record.amount, 5000);
        assert_eq!(record.currency, Currency::Units);
        assert_eq!(record.metadata, Some(json!({"note": "x"})));
    }

    #[test]
    fn test_issue_record_is_self_referential() {
        let record = TransactionRecord::issue("alice", 2500, Currency::Meritos, None, None);
        assert_eq!(record.kind, RecordKind::Issue);
        assert_eq!(record.from_owner, record.to_owner);
    }

    #[test]
    fn test_record_kind_roundtrip() {
        for kind in [RecordKind::Transfer, RecordKind::Issue] {
            assert_eq!(RecordKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(RecordKind::parse("unknown"), None);
    }
}
