//! Ledger append-only de decisiones y trait `LedgerStore`.

mod store;

pub use store::{check_chain, Decide, InMemoryLedger, LedgerStore};
