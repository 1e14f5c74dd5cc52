// Blockchain module
//
// This module contains the core ledger implementation including:
// - Cryptographic identities (addresses, signatures, wallets)
// - Fixed-point amounts
// - Transaction structure
// - Block structure
// - Proof of work strategies
// - The ledger node itself

pub mod amount;
pub mod block;
pub mod chain;
pub mod crypto;
pub mod pow;
pub mod transaction;

// Re-export main components for easier access
pub use amount::Amount;
pub use block::Block;
pub use chain::{ChainIntegrityError, IntegrityFailure, Ledger, LedgerError};
pub use crypto::{Address, DigitalSignature, Wallet};
pub use pow::{Difficulty, LeadingZeroBits, LeadingZeroChars, MiningError, ProofOfWork};
pub use transaction::{Transaction, TransactionError, TransactionKind};
