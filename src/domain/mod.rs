mod currency;
mod ledger;
mod money;
mod owner;
mod transaction;

pub use currency::*;
pub use ledger::*;
pub use money::*;
pub use owner::*;
pub use transaction::*;
