use serde::{Deserialize, Serialize};

/// The closed set of currencies the ledger recognizes. UNITS is the
/// circulating base unit; MERITOS is the recognition currency. The two are
/// fully independent balances and are never mixed in the same arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Units,
    Meritos,
}

impl Currency {
    pub const ALL: [Currency; 2] = [Currency::Units, Currency::Meritos];

    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Units => "UNITS",
            Currency::Meritos => "MERITOS",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "UNITS" => Some(Currency::Units),
            "MERITOS" => Some(Currency::Meritos),
            _ => None,
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
