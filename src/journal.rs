use serde::{Deserialize, Serialize};
use std::fmt;

/// Content-addressed key of a block or transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identifier(String);

impl Identifier {
    pub fn new(id: impl Into<String>) -> Self {
        Identifier(id.into())
    }

    /// BLAKE3 digest of `bytes`, hex encoded.
    pub fn digest(bytes: &[u8]) -> Self {
        Identifier(hex::encode(blake3::hash(bytes).as_bytes()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 characters, for log lines.
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identifier {
    fn from(s: &str) -> Self {
        Identifier(s.to_string())
    }
}

/// A transaction body. The journal never looks inside `payload`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Identifier,
    pub payload: Vec<u8>,
}

impl Transaction {
    pub fn new(payload: Vec<u8>) -> Self {
        Transaction { id: Identifier::digest(&payload), payload }
    }
}

/// An ordered group of committed transactions linked to its predecessor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub id: Identifier,
    pub previous: Option<Identifier>,
    pub transaction_ids: Vec<Identifier>,
}

impl Block {
    pub fn new(previous: Option<Identifier>, transaction_ids: Vec<Identifier>) -> Self {
        let id = Self::calculate_id(previous.as_ref(), &transaction_ids);
        Block { id, previous, transaction_ids }
    }

    /// Hash over the predecessor id followed by every transaction id in order.
    pub fn calculate_id(previous: Option<&Identifier>, transaction_ids: &[Identifier]) -> Identifier {
        let mut hasher = blake3::Hasher::new();
        if let Some(prev) = previous {
            hasher.update(prev.as_str().as_bytes());
        }
        for id in transaction_ids {
            hasher.update(b"/");
            hasher.update(id.as_str().as_bytes());
        }
        Identifier(hex::encode(hasher.finalize().as_bytes()))
    }
}
