pub mod error;
pub mod services;
pub mod transaction;

pub use error::{NegativeResponseCode, TransactionError};
pub use transaction::{LogCallback, LogDirection, LogEntry, TransactionEngine};
