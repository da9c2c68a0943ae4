//! Journal transfer session state machine.
//!
//! The session is pure: it consumes reply events, consults the local ledger,
//! and tells the driver what to do next. All I/O (sending, timers, the
//! subscription lifecycle) is done by [`crate::sync`].
//!
//! Draining priority: after a block-list (or uncommitted-list) page ends, the
//! block queue is tried first and falls through to transactions. After any
//! body arrives, the transaction queue is tried first so transactions revealed
//! by a fresh block are fetched before the next block. Either way at most one
//! body fetch is outstanding and locally known ids never hit the network.

use crate::discovery::{Discovery, DiscoveryMap};
use crate::error::TransferError;
use crate::journal::{Block, Identifier, Transaction};
use crate::ledger::{JournalSink, LedgerView};
use crate::messages::TransferRequest;
use crate::peer::Peer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Starting,
    FetchingBlockList,
    Draining,
    FetchingUncommittedList,
    DrainingUncommitted,
    Committing,
    Done,
    Failed,
}

/// A decoded reply from the transfer peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    BlockList { offset: usize, ids: Vec<Identifier> },
    Block(Block),
    Transaction(Transaction),
    UncommittedList { offset: usize, ids: Vec<Identifier> },
    Failed,
}

/// What the driver must do after an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Send(TransferRequest),
    /// Discovery finished; apply results to the journal.
    Commit,
    /// Nothing to do until the next reply.
    Wait,
    /// The peer signalled failure; tear down and retry.
    Abort,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Outstanding {
    Block(Identifier),
    Transaction(Identifier),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub block_requests: u64,
    pub transaction_requests: u64,
    pub local_hits: u64,
}

#[derive(Debug, Default)]
pub struct CommitReport {
    pub staged: usize,
    pub committed: usize,
    pub error: Option<TransferError>,
}

pub struct TransferSession {
    peer: Peer,
    phase: Phase,
    blocks: Discovery<Block>,
    transactions: Discovery<Transaction>,
    uncommitted: Vec<Identifier>,
    processing_uncommitted: bool,
    outstanding: Option<Outstanding>,
    /// Offset of the list page currently being requested.
    page_offset: usize,
    stats: SessionStats,
}

impl TransferSession {
    pub fn new(peer: Peer) -> Self {
        TransferSession {
            peer,
            phase: Phase::Starting,
            blocks: Discovery::new(),
            transactions: Discovery::new(),
            uncommitted: Vec::new(),
            processing_uncommitted: false,
            outstanding: None,
            page_offset: 0,
            stats: SessionStats::default(),
        }
    }

    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn blocks(&self) -> &DiscoveryMap<Block> {
        self.blocks.map()
    }

    pub fn transactions(&self) -> &DiscoveryMap<Transaction> {
        self.transactions.map()
    }

    pub fn uncommitted(&self) -> &[Identifier] {
        &self.uncommitted
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn has_outstanding_fetch(&self) -> bool {
        self.outstanding.is_some()
    }

    /// First request of the session.
    pub fn begin(&mut self) -> Step {
        self.phase = Phase::FetchingBlockList;
        self.page_offset = 0;
        Step::Send(TransferRequest::BlockList { offset: 0 })
    }

    pub fn on_event<L: LedgerView + ?Sized>(&mut self, event: Event, ledger: &L) -> Step {
        if matches!(self.phase, Phase::Done | Phase::Failed) {
            return Step::Wait;
        }
        match event {
            Event::Failed => self.abort(),
            Event::BlockList { offset, ids } => self.on_block_list(offset, ids, ledger),
            Event::UncommittedList { offset, ids } => self.on_uncommitted_list(offset, ids, ledger),
            Event::Block(block) => self.on_block(block, ledger),
            Event::Transaction(txn) => self.on_transaction(txn, ledger),
        }
    }

    fn on_block_list<L: LedgerView + ?Sized>(&mut self, offset: usize, ids: Vec<Identifier>, ledger: &L) -> Step {
        if self.phase != Phase::FetchingBlockList {
            tracing::debug!(offset, phase = ?self.phase, "ignoring block list page outside pagination");
            return Step::Wait;
        }
        let Some(next) = self.next_page(offset, ids.len()) else {
            return self.abort();
        };
        let received = ids.len();
        for id in ids {
            self.blocks.discover(id);
        }
        if received > 0 {
            return Step::Send(TransferRequest::BlockList { offset: next });
        }

        tracing::debug!(blocks = self.blocks.map().len(), peer = %self.peer.name, "block list complete");
        self.phase = Phase::Draining;
        match self.next_block(ledger) {
            Some(request) => Step::Send(request),
            None => self.drained(ledger),
        }
    }

    /// Validates an echoed page offset and advances to the next one. A page
    /// that answers some other offset, or whose end does not fit in `usize`,
    /// yields `None`.
    fn next_page(&mut self, offset: usize, received: usize) -> Option<usize> {
        if offset != self.page_offset {
            tracing::warn!(requested = self.page_offset, echoed = offset, peer = %self.peer.name, "peer answered a different page");
            return None;
        }
        let Some(next) = offset.checked_add(received) else {
            tracing::warn!(offset, received, peer = %self.peer.name, "page offset overflow");
            return None;
        };
        self.page_offset = next;
        Some(next)
    }

    fn abort(&mut self) -> Step {
        self.phase = Phase::Failed;
        self.outstanding = None;
        Step::Abort
    }

    fn on_uncommitted_list<L: LedgerView + ?Sized>(&mut self, offset: usize, ids: Vec<Identifier>, ledger: &L) -> Step {
        if self.phase != Phase::FetchingUncommittedList {
            tracing::debug!(offset, phase = ?self.phase, "ignoring uncommitted list page outside pagination");
            return Step::Wait;
        }
        let Some(next) = self.next_page(offset, ids.len()) else {
            return self.abort();
        };
        let received = ids.len();
        self.uncommitted.extend(ids);
        if received > 0 {
            return Step::Send(TransferRequest::UncommittedList { offset: next });
        }
        self.handle_uncommitted(ledger)
    }

    fn on_block<L: LedgerView + ?Sized>(&mut self, block: Block, ledger: &L) -> Step {
        let requested = match self.outstanding.take() {
            Some(Outstanding::Block(id)) => id,
            other => {
                self.outstanding = other;
                tracing::debug!(block = %block.id.short(), "ignoring unsolicited block");
                return Step::Wait;
            }
        };
        if block.id != requested {
            tracing::warn!(requested = %requested.short(), received = %block.id.short(), "peer answered with a different block");
        }
        if self.blocks.map().contains(&block.id) {
            for txn_id in &block.transaction_ids {
                self.transactions.discover(txn_id.clone());
            }
            let id = block.id.clone();
            self.blocks.resolve(&id, block);
        } else {
            tracing::warn!(block = %block.id.short(), "received block that was never listed");
        }
        self.after_body(ledger)
    }

    fn on_transaction<L: LedgerView + ?Sized>(&mut self, txn: Transaction, ledger: &L) -> Step {
        let requested = match self.outstanding.take() {
            Some(Outstanding::Transaction(id)) => id,
            other => {
                self.outstanding = other;
                tracing::debug!(transaction = %txn.id.short(), "ignoring unsolicited transaction");
                return Step::Wait;
            }
        };
        if txn.id != requested {
            tracing::warn!(requested = %requested.short(), received = %txn.id.short(), "peer answered with a different transaction");
        }
        let id = txn.id.clone();
        if !self.transactions.resolve(&id, txn) {
            tracing::warn!(transaction = %id.short(), "received transaction that was never discovered");
        }
        self.after_body(ledger)
    }

    fn after_body<L: LedgerView + ?Sized>(&mut self, ledger: &L) -> Step {
        if let Some(request) = self.next_transaction(ledger) {
            return Step::Send(request);
        }
        if let Some(request) = self.next_block(ledger) {
            return Step::Send(request);
        }
        self.drained(ledger)
    }

    /// Both queues are empty and nothing is in flight.
    fn drained<L: LedgerView + ?Sized>(&mut self, ledger: &L) -> Step {
        if self.phase == Phase::Draining {
            self.phase = Phase::FetchingUncommittedList;
            self.page_offset = 0;
            return Step::Send(TransferRequest::UncommittedList { offset: 0 });
        }
        self.handle_uncommitted(ledger)
    }

    fn handle_uncommitted<L: LedgerView + ?Sized>(&mut self, ledger: &L) -> Step {
        tracing::debug!(uncommitted = self.uncommitted.len(), "transition to uncommitted transactions");
        if !self.processing_uncommitted && !self.uncommitted.is_empty() {
            self.processing_uncommitted = true;
            self.phase = Phase::DrainingUncommitted;
            for id in &self.uncommitted {
                self.transactions.discover(id.clone());
            }
            if let Some(request) = self.next_transaction(ledger) {
                return Step::Send(request);
            }
        }
        self.phase = Phase::Committing;
        Step::Commit
    }

    /// Drains the block queue, falling through to transactions once empty.
    fn next_block<L: LedgerView + ?Sized>(&mut self, ledger: &L) -> Option<TransferRequest> {
        while let Some(id) = self.blocks.pop_pending() {
            let local = if ledger.has_block(&id) { ledger.block(&id) } else { None };
            let Some(block) = local else {
                debug_assert!(self.outstanding.is_none(), "second fetch issued while one is outstanding");
                self.outstanding = Some(Outstanding::Block(id.clone()));
                self.stats.block_requests += 1;
                return Some(TransferRequest::Block { id });
            };
            self.stats.local_hits += 1;
            for txn_id in &block.transaction_ids {
                self.transactions.discover(txn_id.clone());
            }
            self.blocks.resolve(&id, block);
        }
        self.next_transaction(ledger)
    }

    fn next_transaction<L: LedgerView + ?Sized>(&mut self, ledger: &L) -> Option<TransferRequest> {
        while let Some(id) = self.transactions.pop_pending() {
            let local = if ledger.has_transaction(&id) { ledger.transaction(&id) } else { None };
            let Some(txn) = local else {
                debug_assert!(self.outstanding.is_none(), "second fetch issued while one is outstanding");
                self.outstanding = Some(Outstanding::Transaction(id.clone()));
                self.stats.transaction_requests += 1;
                return Some(TransferRequest::Transaction { id });
            };
            self.stats.local_hits += 1;
            self.transactions.resolve(&id, txn);
        }
        None
    }

    /// Stages every transaction then commits every block, both in discovery
    /// order. The first rejection abandons everything after it; what was
    /// already applied stays applied.
    pub fn commit<S: JournalSink + ?Sized>(&mut self, sink: &mut S) -> CommitReport {
        let mut report = CommitReport::default();
        if let Err(e) = self.apply(sink, &mut report) {
            tracing::error!(
                peer = %self.peer.name,
                staged = report.staged,
                committed = report.committed,
                error = %e,
                "journal transfer commit abandoned"
            );
            report.error = Some(e);
        }
        self.phase = Phase::Done;
        report
    }

    fn apply<S: JournalSink + ?Sized>(&self, sink: &mut S, report: &mut CommitReport) -> Result<(), TransferError> {
        for (id, txn) in self.transactions.map().iter() {
            let txn = txn.ok_or_else(|| {
                TransferError::LocalCommitViolation(format!("transaction {} was never resolved", id.short()))
            })?;
            sink.stage_transaction(txn.clone())?;
            report.staged += 1;
        }
        for (id, block) in self.blocks.map().iter() {
            let block = block.ok_or_else(|| {
                TransferError::LocalCommitViolation(format!("block {} was never resolved", id.short()))
            })?;
            sink.commit_block(block.clone())?;
            report.committed += 1;
        }
        Ok(())
    }
}
