use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};

use super::block::Block;

/// Errors that can occur while searching for a nonce
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MiningError {
    #[error("Mining cancelled after {attempts} attempts")]
    Cancelled { attempts: u64 },

    #[error("Nonce space exhausted")]
    NonceExhausted,

    #[error("Failed to hash block: {0}")]
    Hashing(String),
}

/// A difficulty predicate over hex block hashes, plus the nonce search that
/// satisfies it.
///
/// Checking a hash costs one comparison; finding one costs on the order of
/// `2^difficulty` hash computations.
pub trait ProofOfWork: Debug + Send + Sync {
    /// Returns true if `hash` meets the difficulty target
    fn is_satisfied(&self, hash: &str) -> bool;

    fn difficulty(&self) -> u32;

    /// Increments the block's nonce from its current value until the hash
    /// satisfies the predicate, then caches that hash on the block.
    ///
    /// # Returns
    ///
    /// The number of hashes computed
    fn execute(&self, block: &mut Block) -> Result<u64, MiningError> {
        self.execute_with_cancel(block, &AtomicBool::new(false))
    }

    /// Same as [`ProofOfWork::execute`], but gives up once `stop` is set.
    ///
    /// The flag is checked before every attempt. A cancelled block keeps the
    /// last nonce tried and no cached hash.
    fn execute_with_cancel(&self, block: &mut Block, stop: &AtomicBool) -> Result<u64, MiningError> {
        let mut attempts: u64 = 0;

        loop {
            if stop.load(Ordering::Relaxed) {
                debug!("Nonce search for block {} cancelled", block.number);
                return Err(MiningError::Cancelled { attempts });
            }

            let hash = block
                .calculate_hash()
                .map_err(|err| MiningError::Hashing(err.to_string()))?;
            attempts += 1;

            if self.is_satisfied(&hash) {
                block.seal(hash);
                return Ok(attempts);
            }

            let next = block.nonce.checked_add(1).ok_or(MiningError::NonceExhausted)?;
            block.set_nonce(next);
        }
    }
}

/// Requires the hex hash to start with `difficulty` '0' characters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeadingZeroChars {
    difficulty: u32,
}

impl LeadingZeroChars {
    pub fn new(difficulty: u32) -> Self {
        LeadingZeroChars { difficulty }
    }
}

impl ProofOfWork for LeadingZeroChars {
    fn is_satisfied(&self, hash: &str) -> bool {
        let required = self.difficulty as usize;
        hash.len() >= required && hash.bytes().take(required).all(|c| c == b'0')
    }

    fn difficulty(&self) -> u32 {
        self.difficulty
    }
}

/// Requires the decoded hash to start with `difficulty` zero bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeadingZeroBits {
    difficulty: u32,
}

impl LeadingZeroBits {
    pub fn new(difficulty: u32) -> Self {
        LeadingZeroBits { difficulty }
    }
}

impl ProofOfWork for LeadingZeroBits {
    fn is_satisfied(&self, hash: &str) -> bool {
        let bytes = match hex::decode(hash) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };

        let mut zeros = 0u32;
        for byte in bytes {
            if byte == 0 {
                zeros += 8;
                continue;
            }
            zeros += byte.leading_zeros();
            break;
        }

        zeros >= self.difficulty
    }

    fn difficulty(&self) -> u32 {
        self.difficulty
    }
}

/// Serializable choice of predicate, as found in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "level", rename_all = "snake_case")]
pub enum Difficulty {
    LeadingZeroChars(u32),
    LeadingZeroBits(u32),
}

impl Difficulty {
    pub fn level(&self) -> u32 {
        match self {
            Difficulty::LeadingZeroChars(level) | Difficulty::LeadingZeroBits(level) => *level,
        }
    }

    pub fn build(&self) -> Box<dyn ProofOfWork> {
        match *self {
            Difficulty::LeadingZeroChars(level) => Box::new(LeadingZeroChars::new(level)),
            Difficulty::LeadingZeroBits(level) => Box::new(LeadingZeroBits::new(level)),
        }
    }
}

impl Default for Difficulty {
    fn default() -> Self {
        Difficulty::LeadingZeroChars(4)
    }
}
