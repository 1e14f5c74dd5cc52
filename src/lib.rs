//! A minimal single-node ledger: signed value transfers, hash-linked blocks
//! and a proof-of-work mining loop, with balances derived by replaying the
//! chain.

pub mod blockchain;
pub mod config;

pub use blockchain::{Address, Amount, Block, Ledger, LedgerError, Transaction, Wallet};
pub use config::LedgerConfig;
