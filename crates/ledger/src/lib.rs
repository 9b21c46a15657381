//! Storage for the saga's records.
//!
//! Each service owns one ledger and is its only writer. The traits in
//! [`store`] are the whole contract; [`InMemoryLedger`] backs tests and
//! single-process runs, [`PostgresLedger`] backs durable deployments.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{LedgerError, Result};
pub use memory::InMemoryLedger;
pub use postgres::PostgresLedger;
pub use store::{DeadLetterStore, OrderLedger, PaymentLedger, StoredDeadLetter};
