use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{debug, info, warn};
use thiserror::Error;

use super::amount::{Amount, UNITS_PER_COIN};
use super::block::{Block, GENESIS_PREVIOUS_HASH};
use super::crypto::Address;
use super::pow::{MiningError, ProofOfWork};
use super::transaction::{Transaction, TransactionError};
use crate::config::LedgerConfig;

/// Which check a block failed during chain validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityFailure {
    /// Block 0 is not a genesis block
    InvalidGenesis,
    /// `number` does not match the block's position
    NumberMismatch,
    /// `previous_hash` does not match the preceding block's hash
    BrokenLink,
    /// Stored hash does not match the block contents
    HashMismatch,
    /// Hash does not meet the difficulty target
    InsufficientWork,
    /// A transfer inside the block fails signature validation
    InvalidTransaction,
    /// Reward is misplaced, duplicated or of the wrong value
    InvalidCoinbase,
    /// A transaction moves a negative value
    NegativeValue,
}

impl fmt::Display for IntegrityFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let description = match self {
            IntegrityFailure::InvalidGenesis => "invalid genesis block",
            IntegrityFailure::NumberMismatch => "block number mismatch",
            IntegrityFailure::BrokenLink => "broken previous-hash link",
            IntegrityFailure::HashMismatch => "block hash mismatch",
            IntegrityFailure::InsufficientWork => "proof of work not satisfied",
            IntegrityFailure::InvalidTransaction => "invalid transaction signature",
            IntegrityFailure::InvalidCoinbase => "invalid coinbase transaction",
            IntegrityFailure::NegativeValue => "negative transaction value",
        };
        f.write_str(description)
    }
}

/// The first block that failed validation, and why
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Chain integrity violated at block {index}: {failure}")]
pub struct ChainIntegrityError {
    pub index: usize,
    pub failure: IntegrityFailure,
}

/// Errors that can occur during ledger operations
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Amount, available: Amount },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Balance of {0} overflows")]
    BalanceOverflow(Address),

    #[error(transparent)]
    ChainIntegrity(#[from] ChainIntegrityError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),

    #[error("Mining error: {0}")]
    Mining(#[from] MiningError),

    #[error("Ledger lock poisoned")]
    LockPoisoned,
}

/// Largest reward a ledger mints per block
pub const MAX_MINING_REWARD: Amount = Amount::from_units(1_000_000 * UNITS_PER_COIN);

/// A single authoritative node: the chain of mined blocks plus the pool of
/// admitted transactions waiting for the next block.
///
/// Readers (`get_balance`, `validate_chain`) share the chain; appending a block
/// excludes them. Only one mining run proceeds at a time.
#[derive(Debug)]
pub struct Ledger {
    /// Recipient of every block reward
    miner_address: Address,

    blocks: RwLock<Vec<Block>>,

    pending_transactions: Mutex<Vec<Transaction>>,

    /// Fixed for the lifetime of the ledger
    proof_of_work: Arc<dyn ProofOfWork>,

    mining_reward: Amount,

    mining_lock: Mutex<()>,

    cancel: AtomicBool,
}

impl Ledger {
    /// Creates a ledger and mines its genesis block
    ///
    /// # Arguments
    ///
    /// * `miner_address` - This node's address, credited with mining rewards
    /// * `proof_of_work` - The difficulty predicate applied to every block
    /// * `mining_reward` - Value minted by each block's coinbase transaction
    pub fn new(
        miner_address: Address,
        proof_of_work: Arc<dyn ProofOfWork>,
        mining_reward: Amount,
    ) -> Result<Self, LedgerError> {
        if mining_reward.is_negative() || mining_reward > MAX_MINING_REWARD {
            return Err(LedgerError::InvalidAmount(format!(
                "mining reward must be between 0 and {}, got {}",
                MAX_MINING_REWARD, mining_reward
            )));
        }

        let ledger = Ledger {
            miner_address,
            blocks: RwLock::new(Vec::new()),
            pending_transactions: Mutex::new(Vec::new()),
            proof_of_work,
            mining_reward,
            mining_lock: Mutex::new(()),
            cancel: AtomicBool::new(false),
        };

        ledger.create_genesis_block()?;
        Ok(ledger)
    }

    pub fn from_config(miner_address: Address, config: &LedgerConfig) -> Result<Self, LedgerError> {
        let proof_of_work: Arc<dyn ProofOfWork> = Arc::from(config.difficulty.build());
        Self::new(miner_address, proof_of_work, config.mining_reward_amount())
    }

    fn create_genesis_block(&self) -> Result<(), LedgerError> {
        let reward = Transaction::new_coinbase(self.miner_address.clone(), self.mining_reward);
        let mut genesis = Block::new(0, vec![reward], GENESIS_PREVIOUS_HASH.to_string());

        let attempts = self.proof_of_work.execute(&mut genesis)?;
        info!(
            "Mined genesis block {} after {} attempts",
            genesis.hash()?,
            attempts
        );

        self.write_blocks()?.push(genesis);
        Ok(())
    }

    /// Admits a signed transfer into the pending pool.
    ///
    /// The sender must be able to cover `value` from their mined balance less
    /// whatever they already have pending. On failure the pool is unchanged.
    pub fn submit_transaction(&self, transaction: Transaction) -> Result<(), LedgerError> {
        if transaction.value.is_negative() {
            warn!("Rejected transaction from {}: negative value", transaction.sender);
            return Err(LedgerError::InvalidAmount(format!(
                "value must not be negative, got {}",
                transaction.value
            )));
        }

        if transaction.is_coinbase() || !transaction.validate()? {
            warn!("Rejected transaction from {}: invalid signature", transaction.sender);
            return Err(LedgerError::InvalidSignature);
        }

        let mut pending = self.lock_pending()?;

        let overflow = || LedgerError::BalanceOverflow(transaction.sender.clone());
        let committed = pending
            .iter()
            .filter(|queued| queued.sender == transaction.sender)
            .try_fold(Amount::ZERO, |total, queued| total.checked_add(queued.value))
            .ok_or_else(overflow)?;
        let available = self
            .get_balance(&transaction.sender)?
            .checked_sub(committed)
            .ok_or_else(overflow)?;

        if transaction.value > available {
            warn!(
                "Rejected transaction from {}: needs {}, has {}",
                transaction.sender, transaction.value, available
            );
            return Err(LedgerError::InsufficientFunds {
                required: transaction.value,
                available,
            });
        }

        debug!(
            "Queued transfer of {} from {} to {}",
            transaction.value, transaction.sender, transaction.recipient
        );
        pending.push(transaction);
        Ok(())
    }

    /// Mines the pending pool plus a reward into a new block.
    ///
    /// Blocks the calling thread for the whole nonce search. Transactions
    /// submitted while the search runs stay pending for the next block. A
    /// cancellation requested before the search starts stops this run.
    ///
    /// # Returns
    ///
    /// The newly appended block
    pub fn mine_block(&self) -> Result<Block, LedgerError> {
        let _mining = self.mining_lock.lock().map_err(|_| LedgerError::LockPoisoned)?;

        let mut transactions = self.get_pending_transactions()?;
        let included = transactions.len();
        transactions.push(Transaction::new_coinbase(
            self.miner_address.clone(),
            self.mining_reward,
        ));

        let (number, previous_hash) = {
            let blocks = self.read_blocks()?;
            let tip = Self::tip(&blocks);
            (blocks.len() as u64, Self::stored_hash(tip)?)
        };

        let mut candidate = Block::new(number, transactions, previous_hash);
        debug!(
            "Mining block {} with {} pending transactions",
            number, included
        );

        let outcome = self
            .proof_of_work
            .execute_with_cancel(&mut candidate, &self.cancel);
        // Consumed by this run, whether it finished or was stopped
        self.cancel.store(false, Ordering::SeqCst);

        let attempts = outcome.map_err(|err| {
                warn!("Mining block {} stopped: {}", number, err);
                err
            })?;

        {
            // Same order as submit_transaction: pool, then chain
            let mut pending = self.lock_pending()?;
            let mut blocks = self.write_blocks()?;
            blocks.push(candidate.clone());
            pending.drain(..included);
        }

        info!(
            "Mined block {} ({}) after {} attempts",
            number,
            candidate.hash()?,
            attempts
        );
        Ok(candidate)
    }

    /// Asks [`Ledger::mine_block`] to give up.
    ///
    /// Stops the run in progress, or the next one if none is running.
    pub fn cancel_mining(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Replays the chain and checks every block.
    ///
    /// # Returns
    ///
    /// `Ok(true)` if every block passes, otherwise the first
    /// [`ChainIntegrityError`] found.
    pub fn validate_chain(&self) -> Result<bool, LedgerError> {
        let blocks = self.read_blocks()?;
        let proof_of_work = self.proof_of_work.as_ref();

        for (index, block) in blocks.iter().enumerate() {
            let fail = |failure: IntegrityFailure| {
                warn!("Chain validation failed at block {}: {}", index, failure);
                LedgerError::ChainIntegrity(ChainIntegrityError { index, failure })
            };

            if index == 0 {
                if block.number != 0
                    || block.previous_hash != GENESIS_PREVIOUS_HASH
                    || !block.transactions.iter().all(Transaction::is_coinbase)
                {
                    return Err(fail(IntegrityFailure::InvalidGenesis));
                }
            } else {
                if block.number != index as u64 {
                    return Err(fail(IntegrityFailure::NumberMismatch));
                }
                if block.previous_hash != Self::stored_hash(&blocks[index - 1])? {
                    return Err(fail(IntegrityFailure::BrokenLink));
                }
            }

            if !block.validate(proof_of_work)? {
                return Err(fail(Self::diagnose(block, proof_of_work)?));
            }

            if block.transactions.iter().any(|transaction| transaction.value.is_negative()) {
                return Err(fail(IntegrityFailure::NegativeValue));
            }

            if !self.is_valid_coinbase(block) {
                return Err(fail(IntegrityFailure::InvalidCoinbase));
            }
        }

        debug!("Validated chain of {} blocks", blocks.len());
        Ok(true)
    }

    /// Names the check behind a failed [`Block::validate`]
    fn diagnose(block: &Block, proof_of_work: &dyn ProofOfWork) -> Result<IntegrityFailure, LedgerError> {
        let fresh = block.calculate_hash()?;
        Ok(match block.cached_hash() {
            Some(stored) if stored != fresh => IntegrityFailure::HashMismatch,
            _ if !proof_of_work.is_satisfied(&fresh) => IntegrityFailure::InsufficientWork,
            _ => IntegrityFailure::InvalidTransaction,
        })
    }

    /// Exactly one reward, last in the block, paying the configured amount
    fn is_valid_coinbase(&self, block: &Block) -> bool {
        match block.transactions.split_last() {
            Some((last, rest)) => {
                last.is_coinbase()
                    && last.value == self.mining_reward
                    && !rest.iter().any(Transaction::is_coinbase)
            }
            None => false,
        }
    }

    /// Derives the balance of `address` by replaying every mined transaction.
    ///
    /// Pending transactions are not counted. Fails with `BalanceOverflow`
    /// rather than wrapping if the running total leaves the `i64` range.
    pub fn get_balance(&self, address: &Address) -> Result<Amount, LedgerError> {
        let blocks = self.read_blocks()?;
        let mut balance = Amount::ZERO;
        let overflow = || LedgerError::BalanceOverflow(address.clone());

        for transaction in blocks.iter().flat_map(|block| block.transactions.iter()) {
            if !transaction.is_coinbase() && transaction.sender == *address {
                balance = balance.checked_sub(transaction.value).ok_or_else(overflow)?;
            }
            if transaction.recipient == *address {
                balance = balance.checked_add(transaction.value).ok_or_else(overflow)?;
            }
        }

        Ok(balance)
    }

    pub fn get_chain(&self) -> Result<Vec<Block>, LedgerError> {
        Ok(self.read_blocks()?.clone())
    }

    pub fn get_last_block(&self) -> Result<Block, LedgerError> {
        Ok(Self::tip(&self.read_blocks()?).clone())
    }

    pub fn get_pending_transactions(&self) -> Result<Vec<Transaction>, LedgerError> {
        Ok(self.lock_pending()?.clone())
    }

    /// Number of blocks, genesis included
    pub fn len(&self) -> Result<usize, LedgerError> {
        Ok(self.read_blocks()?.len())
    }

    pub fn miner_address(&self) -> &Address {
        &self.miner_address
    }

    pub fn mining_reward(&self) -> Amount {
        self.mining_reward
    }

    pub fn proof_of_work(&self) -> &dyn ProofOfWork {
        self.proof_of_work.as_ref()
    }

    fn tip(blocks: &[Block]) -> &Block {
        // Genesis is pushed before the ledger is handed out
        &blocks[blocks.len() - 1]
    }

    /// Hash recorded for a mined block
    fn stored_hash(block: &Block) -> Result<String, LedgerError> {
        match block.cached_hash() {
            Some(hash) => Ok(hash.to_string()),
            None => Ok(block.calculate_hash()?),
        }
    }

    fn read_blocks(&self) -> Result<RwLockReadGuard<'_, Vec<Block>>, LedgerError> {
        self.blocks.read().map_err(|_| LedgerError::LockPoisoned)
    }

    fn write_blocks(&self) -> Result<RwLockWriteGuard<'_, Vec<Block>>, LedgerError> {
        self.blocks.write().map_err(|_| LedgerError::LockPoisoned)
    }

    fn lock_pending(&self) -> Result<MutexGuard<'_, Vec<Transaction>>, LedgerError> {
        self.pending_transactions.lock().map_err(|_| LedgerError::LockPoisoned)
    }
}
