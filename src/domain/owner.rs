use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Amount, Currency};

/// A registered participant. The id is an opaque identifier supplied by the
/// surrounding product (it authenticates users; the ledger only resolves
/// that an id is addressable).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Owner {
    pub id: String,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Owner {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }
}

/// Snapshot of one (owner, currency) balance row. Accounts are created
/// lazily with balance 0 on first reference and are never deleted.
/// Invariant: balance >= 0 at all times.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub owner_id: String,
    pub currency: Currency,
    pub balance: Amount,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Lock/ordering key for this account. Transfers acquire their two
    /// account locks in lexicographic order of this key.
    pub fn key(owner_id: &str, currency: Currency) -> String {
        format!("{}:{}", owner_id, currency.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_builder() {
        let owner = Owner::new("alice").with_display_name("Alice");
        assert_eq!(owner.id, "alice");
        assert_eq!(owner.display_name, Some("Alice".to_string()));
    }

    #[test]
    fn test_account_key_orders_lexicographically() {
        let a = Account::key("alice", Currency::Units);
        let b = Account::key("bob", Currency::Units);
        assert!(a < b);

        // Same owner, different currency still yields distinct keys
        let m = Account::key("alice", Currency::Meritos);
        assert_ne!(a, m);
    }
}
