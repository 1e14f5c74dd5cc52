use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::amount::Amount;
use super::crypto::{sha256, sha256_hex, verify_signature, Address, CryptoError, DigitalSignature, Wallet};

/// Version byte prefixed to every transaction header encoding
pub const TRANSACTION_HEADER_VERSION: u8 = 1;

/// Errors that can occur during transaction operations
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Signing failed: {0}")]
    SigningError(String),

    #[error("Encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("Crypto error: {0}")]
    CryptoError(#[from] CryptoError),
}

/// Distinguishes ordinary transfers from newly minted value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    Transfer,
    Coinbase,
}

/// Represents a value transfer recorded on the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub kind: TransactionKind,

    /// Payer; also the key that must have produced `signature`
    pub sender: Address,

    pub recipient: Address,

    pub value: Amount,

    /// Absent until [`Transaction::sign`] succeeds; always absent on coinbase
    pub signature: Option<DigitalSignature>,
}

/// The fields covered by a signature, in their canonical order
#[derive(Serialize)]
struct TransactionHeader<'a> {
    version: u8,
    kind: TransactionKind,
    sender: &'a str,
    recipient: &'a str,
    value: i64,
}

impl Transaction {
    /// Creates a new unsigned transfer
    ///
    /// # Arguments
    ///
    /// * `sender` - The address paying `value`
    /// * `recipient` - The address receiving `value`
    /// * `value` - The amount to transfer, must not be negative
    pub fn new(sender: Address, recipient: Address, value: Amount) -> Result<Self, TransactionError> {
        if value.is_negative() {
            return Err(TransactionError::InvalidAmount(format!(
                "value must not be negative, got {}",
                value
            )));
        }

        Ok(Transaction {
            kind: TransactionKind::Transfer,
            sender,
            recipient,
            value,
            signature: None,
        })
    }

    /// Creates a reward transaction minting `value` to `recipient`
    pub fn new_coinbase(recipient: Address, value: Amount) -> Self {
        Transaction {
            kind: TransactionKind::Coinbase,
            sender: Address::coinbase(),
            recipient,
            value,
            signature: None,
        }
    }

    pub fn is_coinbase(&self) -> bool {
        self.kind == TransactionKind::Coinbase
    }

    /// Canonical byte encoding of `(sender, recipient, value)`.
    ///
    /// The signature is not part of the header.
    pub fn get_header(&self) -> Result<Vec<u8>, TransactionError> {
        let header = TransactionHeader {
            version: TRANSACTION_HEADER_VERSION,
            kind: self.kind,
            sender: &self.sender.0,
            recipient: &self.recipient.0,
            value: self.value.units(),
        };

        Ok(bincode::serialize(&header)?)
    }

    /// Signs the header digest with `wallet`, replacing any earlier signature.
    ///
    /// The new signature is checked against `sender` before returning; when the
    /// wallet does not own `sender` the previous signature is kept and
    /// `SigningError` is returned.
    pub fn sign(&mut self, wallet: &Wallet) -> Result<(), TransactionError> {
        if self.is_coinbase() {
            return Err(TransactionError::SigningError(
                "coinbase transactions are not signed".to_string(),
            ));
        }

        let digest = sha256(&self.get_header()?);
        let previous = self.signature.replace(wallet.sign(&digest));

        match self.validate() {
            Ok(true) => Ok(()),
            Ok(false) => {
                self.signature = previous;
                Err(TransactionError::SigningError(format!(
                    "wallet {} does not match sender {}",
                    wallet.address(),
                    self.sender
                )))
            }
            Err(err) => {
                self.signature = previous;
                Err(err)
            }
        }
    }

    /// Verifies the signature against `sender` over the current header.
    ///
    /// Coinbase transactions carry no signature and always pass. An unsigned
    /// transfer, or one whose sender is not a decodable key, fails.
    pub fn validate(&self) -> Result<bool, TransactionError> {
        if self.is_coinbase() {
            return Ok(true);
        }

        let signature = match &self.signature {
            Some(signature) => signature,
            None => return Ok(false),
        };

        let public_key = match self.sender.to_public_key() {
            Ok(key) => key,
            Err(_) => return Ok(false),
        };

        let digest = sha256(&self.get_header()?);
        match verify_signature(&digest, signature, &public_key) {
            Ok(valid) => Ok(valid),
            Err(CryptoError::DecodingError(_)) | Err(CryptoError::InvalidSignature(_)) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Identifier of the full transaction, signature included
    pub fn hash(&self) -> Result<String, TransactionError> {
        Ok(sha256_hex(&bincode::serialize(self)?))
    }
}
