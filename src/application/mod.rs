pub mod error;
mod locks;
mod service;

pub use error::*;
pub use service::*;
