pub use {
    cache::{CacheIndex, CacheIndexRow},
    tables::{NewTransaction, NewTransactionItem, TenantCreditsRow, TransactionItemRow, TransactionRow, TxKind},
    writer::{Ledger, Posted},
};

pub mod cache;
pub mod csvio;
pub mod tables;
pub mod writer;
