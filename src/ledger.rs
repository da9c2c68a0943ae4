//! Seams between the transfer machinery and the local journal.

use crate::error::CommitError;
use crate::journal::{Block, Identifier, Transaction};
use std::collections::{HashMap, HashSet};

/// Read-only lookups against locally known records.
pub trait LedgerView {
    fn has_block(&self, id: &Identifier) -> bool;
    fn block(&self, id: &Identifier) -> Option<Block>;
    fn has_transaction(&self, id: &Identifier) -> bool;
    fn transaction(&self, id: &Identifier) -> Option<Transaction>;
}

/// Ordered listings a node serves to peers that are transferring from it.
pub trait LedgerSource: LedgerView {
    /// Committed blocks, oldest first.
    fn block_ids(&self) -> Vec<Identifier>;
    /// Transactions not yet part of any block, in arrival order.
    fn pending_ids(&self) -> Vec<Identifier>;
}

/// Accepts transferred records. Each submission either applies or is
/// rejected on its own; callers decide what a rejection means for the rest.
pub trait JournalSink {
    fn stage_transaction(&mut self, txn: Transaction) -> Result<(), CommitError>;
    fn commit_block(&mut self, block: Block) -> Result<(), CommitError>;
    fn head(&self) -> Option<Identifier>;
    fn persisted_block_count(&self) -> usize;
}

/// In-memory journal with the same acceptance rules as the RocksDB store.
#[derive(Debug, Default, Clone)]
pub struct MemoryJournal {
    blocks: HashMap<Identifier, Block>,
    chain: Vec<Identifier>,
    transactions: HashMap<Identifier, Transaction>,
    pending: Vec<Identifier>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages `payload` as a new pending transaction.
    pub fn add_pending(&mut self, payload: Vec<u8>) -> Result<Transaction, CommitError> {
        let txn = Transaction::new(payload);
        self.stage_transaction(txn.clone())?;
        Ok(txn)
    }

    /// Builds a block on top of the current head from fresh payloads.
    pub fn append_block(&mut self, payloads: Vec<Vec<u8>>) -> Result<Block, CommitError> {
        let mut ids = Vec::with_capacity(payloads.len());
        for payload in payloads {
            ids.push(self.add_pending(payload)?.id);
        }
        let block = Block::new(self.head(), ids);
        self.commit_block(block.clone())?;
        Ok(block)
    }

    pub fn chain_len(&self) -> usize {
        self.chain.len()
    }
}

impl LedgerView for MemoryJournal {
    fn has_block(&self, id: &Identifier) -> bool {
        self.blocks.contains_key(id)
    }

    fn block(&self, id: &Identifier) -> Option<Block> {
        self.blocks.get(id).cloned()
    }

    fn has_transaction(&self, id: &Identifier) -> bool {
        self.transactions.contains_key(id)
    }

    fn transaction(&self, id: &Identifier) -> Option<Transaction> {
        self.transactions.get(id).cloned()
    }
}

impl LedgerSource for MemoryJournal {
    fn block_ids(&self) -> Vec<Identifier> {
        self.chain.clone()
    }

    fn pending_ids(&self) -> Vec<Identifier> {
        self.pending.clone()
    }
}

impl JournalSink for MemoryJournal {
    fn stage_transaction(&mut self, txn: Transaction) -> Result<(), CommitError> {
        if self.transactions.contains_key(&txn.id) {
            return Ok(());
        }
        self.pending.push(txn.id.clone());
        self.transactions.insert(txn.id.clone(), txn);
        Ok(())
    }

    fn commit_block(&mut self, block: Block) -> Result<(), CommitError> {
        if self.blocks.contains_key(&block.id) {
            return Ok(());
        }
        let head = self.head();
        if block.previous != head {
            return Err(CommitError::Violation(format!(
                "block {} does not extend head {}",
                block.id.short(),
                head.as_ref().map_or("<none>", |h| h.short())
            )));
        }
        if let Some(missing) = block.transaction_ids.iter().find(|t| !self.transactions.contains_key(t)) {
            return Err(CommitError::Violation(format!(
                "block {} references unknown transaction {}",
                block.id.short(),
                missing.short()
            )));
        }
        let included: HashSet<&Identifier> = block.transaction_ids.iter().collect();
        self.pending.retain(|id| !included.contains(id));
        self.chain.push(block.id.clone());
        self.blocks.insert(block.id.clone(), block);
        Ok(())
    }

    fn head(&self) -> Option<Identifier> {
        self.chain.last().cloned()
    }

    fn persisted_block_count(&self) -> usize {
        self.chain.len()
    }
}
