//! Journal-transfer wire messages.
//!
//! Requests flow from the node being synchronized to its chosen peer; replies
//! come back tagged with the id of the request they answer. Block and
//! transaction bodies travel as [`TaggedBody`] so the receiving channel can
//! pick the decoder from the tag.

use crate::error::TransferError;
use crate::journal::{Block, Identifier, Transaction};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;

pub const BLOCK_TYPE_TAG: &str = "journal/block/v1";
pub const TRANSACTION_TYPE_TAG: &str = "journal/transaction/v1";

/// Correlates a reply with its request. Used for diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub u64);

impl MessageId {
    pub fn random() -> Self {
        MessageId(rand::random())
    }

    pub fn short(&self) -> String {
        format!("{:08x}", self.0 >> 32)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferRequest {
    BlockList { offset: usize },
    Block { id: Identifier },
    Transaction { id: Identifier },
    UncommittedList { offset: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferReply {
    BlockList { offset: usize, ids: Vec<Identifier> },
    Block { body: TaggedBody },
    Transaction { body: TaggedBody },
    UncommittedList { offset: usize, ids: Vec<Identifier> },
    Failed,
}

/// Reply kinds a transfer session subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    BlockListReply,
    BlockReply,
    UncommittedListReply,
    TransactionReply,
    TransferFailed,
}

impl MessageKind {
    pub const ALL: [MessageKind; 5] = [
        MessageKind::BlockListReply,
        MessageKind::BlockReply,
        MessageKind::UncommittedListReply,
        MessageKind::TransactionReply,
        MessageKind::TransferFailed,
    ];
}

impl TransferReply {
    pub fn kind(&self) -> MessageKind {
        match self {
            TransferReply::BlockList { .. } => MessageKind::BlockListReply,
            TransferReply::Block { .. } => MessageKind::BlockReply,
            TransferReply::Transaction { .. } => MessageKind::TransactionReply,
            TransferReply::UncommittedList { .. } => MessageKind::UncommittedListReply,
            TransferReply::Failed => MessageKind::TransferFailed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub id: MessageId,
    pub request: TransferRequest,
}

impl RequestEnvelope {
    pub fn new(request: TransferRequest) -> Self {
        RequestEnvelope { id: MessageId::random(), request }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    pub in_reply_to: MessageId,
    pub reply: TransferReply,
}

/// An embedded body carrying its own type tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedBody {
    pub type_tag: String,
    pub data: Vec<u8>,
}

/// A decoded [`TaggedBody`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Block(Block),
    Transaction(Transaction),
}

impl Body {
    pub fn name(&self) -> &'static str {
        match self {
            Body::Block(_) => "block",
            Body::Transaction(_) => "transaction",
        }
    }
}

impl TaggedBody {
    pub fn wrap_block(block: &Block) -> Result<Self, TransferError> {
        Ok(TaggedBody { type_tag: BLOCK_TYPE_TAG.to_string(), data: encode(block)? })
    }

    pub fn wrap_transaction(txn: &Transaction) -> Result<Self, TransferError> {
        Ok(TaggedBody { type_tag: TRANSACTION_TYPE_TAG.to_string(), data: encode(txn)? })
    }

    pub fn unpack(&self) -> Result<Body, TransferError> {
        match self.type_tag.as_str() {
            BLOCK_TYPE_TAG => Ok(Body::Block(decode(&self.data)?)),
            TRANSACTION_TYPE_TAG => Ok(Body::Transaction(decode(&self.data)?)),
            other => Err(TransferError::UnknownBodyType(other.to_string())),
        }
    }
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, TransferError> {
    Ok(bincode::serialize(value)?)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, TransferError> {
    Ok(bincode::deserialize(bytes)?)
}
