//! Serving side of the journal transfer protocol.

use crate::journal::Identifier;
use crate::ledger::LedgerSource;
use crate::messages::{ReplyEnvelope, RequestEnvelope, TaggedBody, TransferReply, TransferRequest};
use std::sync::{Arc, Mutex};

/// Answers transfer requests addressed to this node.
pub trait RequestHandler: Send + Sync {
    fn handle(&self, request: &RequestEnvelope) -> ReplyEnvelope;
}

/// Serves list pages and bodies out of a ledger.
pub struct Responder<L> {
    ledger: Arc<Mutex<L>>,
    page_size: usize,
}

impl<L: LedgerSource + Send> Responder<L> {
    pub fn new(ledger: Arc<Mutex<L>>, page_size: usize) -> Self {
        Responder { ledger, page_size: page_size.max(1) }
    }

    pub fn respond(&self, request: &TransferRequest) -> TransferReply {
        let Ok(ledger) = self.ledger.lock() else {
            tracing::error!("ledger lock poisoned; refusing transfer request");
            return TransferReply::Failed;
        };
        match request {
            TransferRequest::BlockList { offset } => TransferReply::BlockList {
                offset: *offset,
                ids: page(ledger.block_ids(), *offset, self.page_size),
            },
            TransferRequest::UncommittedList { offset } => TransferReply::UncommittedList {
                offset: *offset,
                ids: page(ledger.pending_ids(), *offset, self.page_size),
            },
            TransferRequest::Block { id } => match ledger.block(id).map(|b| TaggedBody::wrap_block(&b)) {
                Some(Ok(body)) => TransferReply::Block { body },
                Some(Err(e)) => {
                    tracing::warn!(block = %id.short(), error = %e, "could not encode block");
                    TransferReply::Failed
                }
                None => {
                    tracing::debug!(block = %id.short(), "requested block not found");
                    TransferReply::Failed
                }
            },
            TransferRequest::Transaction { id } => match ledger.transaction(id).map(|t| TaggedBody::wrap_transaction(&t)) {
                Some(Ok(body)) => TransferReply::Transaction { body },
                Some(Err(e)) => {
                    tracing::warn!(transaction = %id.short(), error = %e, "could not encode transaction");
                    TransferReply::Failed
                }
                None => {
                    tracing::debug!(transaction = %id.short(), "requested transaction not found");
                    TransferReply::Failed
                }
            },
        }
    }
}

impl<L: LedgerSource + Send> RequestHandler for Responder<L> {
    fn handle(&self, request: &RequestEnvelope) -> ReplyEnvelope {
        ReplyEnvelope { in_reply_to: request.id, reply: self.respond(&request.request) }
    }
}

fn page(ids: Vec<Identifier>, offset: usize, size: usize) -> Vec<Identifier> {
    ids.into_iter().skip(offset).take(size).collect()
}
