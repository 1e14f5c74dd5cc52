use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::amount::Amount;
use super::crypto::sha256_hex;
use super::pow::ProofOfWork;
use super::transaction::{Transaction, TransactionError};

/// Version byte prefixed to every block header encoding
pub const BLOCK_HEADER_VERSION: u8 = 1;

/// `previous_hash` of the genesis block
pub const GENESIS_PREVIOUS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Represents a block in the blockchain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    /// Position in the chain, 0 for genesis
    pub number: u64,

    pub timestamp: DateTime<Utc>,

    /// Transactions in mining order; the reward comes last
    pub transactions: Vec<Transaction>,

    pub previous_hash: String,

    /// Proof of work found by the miner
    pub nonce: u64,

    /// Header hash, cached once computed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

#[derive(Serialize)]
struct BlockHeader<'a> {
    version: u8,
    number: u64,
    timestamp: i64,
    previous_hash: &'a str,
    transactions: &'a [Transaction],
    nonce: u64,
}

impl Block {
    /// Creates an unmined candidate block with `nonce = 0`
    ///
    /// # Arguments
    ///
    /// * `number` - The index of the block in the chain
    /// * `transactions` - The transactions to include, in order
    /// * `previous_hash` - The hash of the previous block
    pub fn new(number: u64, transactions: Vec<Transaction>, previous_hash: String) -> Self {
        Block {
            number,
            timestamp: Utc::now(),
            transactions,
            previous_hash,
            nonce: 0,
            hash: None,
        }
    }

    /// Canonical encoding of every header field.
    ///
    /// Transactions are encoded whole and in order, signatures included, so a
    /// change to any of them changes the block hash.
    pub fn get_header(&self) -> Result<Vec<u8>, TransactionError> {
        let header = BlockHeader {
            version: BLOCK_HEADER_VERSION,
            number: self.number,
            timestamp: self.timestamp.timestamp_millis(),
            previous_hash: &self.previous_hash,
            transactions: &self.transactions,
            nonce: self.nonce,
        };

        Ok(bincode::serialize(&header)?)
    }

    /// Hashes the current field values without touching the cache.
    ///
    /// # Returns
    ///
    /// The SHA-256 hash of the header as a hexadecimal string
    pub fn calculate_hash(&self) -> Result<String, TransactionError> {
        Ok(sha256_hex(&self.get_header()?))
    }

    /// Returns the cached hash, computing and caching it on first use
    pub fn hash(&mut self) -> Result<String, TransactionError> {
        if let Some(hash) = &self.hash {
            return Ok(hash.clone());
        }

        let hash = self.calculate_hash()?;
        self.hash = Some(hash.clone());
        Ok(hash)
    }

    pub fn cached_hash(&self) -> Option<&str> {
        self.hash.as_deref()
    }

    /// Changes the nonce and drops the now stale cached hash
    pub fn set_nonce(&mut self, nonce: u64) {
        self.nonce = nonce;
        self.hash = None;
    }

    /// Stores a hash already known to match the current fields
    pub(crate) fn seal(&mut self, hash: String) {
        self.hash = Some(hash);
    }

    /// Checks that the block hash meets `proof_of_work` and still matches the
    /// block's contents, and that every transfer inside it is properly signed.
    pub fn validate(&self, proof_of_work: &dyn ProofOfWork) -> Result<bool, TransactionError> {
        let fresh = self.calculate_hash()?;
        let stored = self.cached_hash().unwrap_or(fresh.as_str());
        if stored != fresh || !proof_of_work.is_satisfied(stored) {
            return Ok(false);
        }

        for transaction in &self.transactions {
            if !transaction.validate()? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    pub fn coinbase_transactions(&self) -> impl Iterator<Item = &Transaction> {
        self.transactions.iter().filter(|transaction| transaction.is_coinbase())
    }

    /// Total value minted by this block
    pub fn reward(&self) -> Amount {
        self.coinbase_transactions().map(|transaction| transaction.value).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::crypto::Wallet;
    use crate::blockchain::pow::{LeadingZeroChars, ProofOfWork};

    fn sample_block() -> Block {
        let sender = Wallet::new();
        let recipient = Wallet::new();
        let mut transfer = Transaction::new(
            sender.address().clone(),
            recipient.address().clone(),
            Amount::from_coins(1.0),
        )
        .unwrap();
        transfer.sign(&sender).unwrap();

        let reward = Transaction::new_coinbase(recipient.address().clone(), Amount::from_coins(2.0));
        Block::new(1, vec![transfer, reward], "previous_hash".to_string())
    }

    #[test]
    fn test_new_block() {
        let block = sample_block();

        assert_eq!(block.number, 1);
        assert_eq!(block.nonce, 0);
        assert_eq!(block.previous_hash, "previous_hash");
        assert!(block.cached_hash().is_none());
        assert_eq!(block.reward(), Amount::from_coins(2.0));
    }

    #[test]
    fn test_hash_is_idempotent() {
        let mut block = sample_block();

        let first = block.hash().unwrap();
        let second = block.hash().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        assert_eq!(block.cached_hash(), Some(first.as_str()));
        assert_eq!(block.calculate_hash().unwrap(), first);
    }

    #[test]
    fn test_header_mutation_changes_hash() {
        let block = sample_block();
        let original = block.calculate_hash().unwrap();

        let mut changed = block.clone();
        changed.set_nonce(1);
        assert!(changed.cached_hash().is_none());
        assert_ne!(changed.calculate_hash().unwrap(), original);

        let mut changed = block.clone();
        changed.previous_hash = "other".to_string();
        assert_ne!(changed.calculate_hash().unwrap(), original);

        let mut changed = block.clone();
        changed.transactions.swap(0, 1);
        assert_ne!(changed.calculate_hash().unwrap(), original);

        let mut changed = block;
        changed.transactions[0].signature = None;
        assert_ne!(changed.calculate_hash().unwrap(), original);
    }

    #[test]
    fn test_validate_detects_tampering() {
        let proof_of_work = LeadingZeroChars::new(1);
        let mut block = sample_block();
        proof_of_work.execute(&mut block).unwrap();
        assert!(block.validate(&proof_of_work).unwrap());

        // Tampered value: cached hash no longer matches the contents
        let mut tampered = block.clone();
        tampered.transactions[0].value = Amount::from_coins(100.0);
        assert!(!tampered.validate(&proof_of_work).unwrap());

        // Even with a recomputed hash the broken signature is caught
        proof_of_work.execute(&mut tampered).unwrap();
        assert!(!tampered.validate(&proof_of_work).unwrap());
    }

    #[test]
    fn test_validate_requires_work() {
        let mut block = sample_block();
        // Find a nonce whose hash does not start with '0'
        while block.calculate_hash().unwrap().starts_with('0') {
            block.set_nonce(block.nonce + 1);
        }
        block.hash().unwrap();

        assert!(!block.validate(&LeadingZeroChars::new(1)).unwrap());
        assert!(block.validate(&LeadingZeroChars::new(0)).unwrap());
    }
}
