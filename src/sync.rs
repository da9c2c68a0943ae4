//! Journal transfer driver.
//!
//! Runs one transfer to completion on a tokio task: picks a peer (backing off
//! while none are available), runs a [`TransferSession`] against it, and on a
//! remote failure discards the session and starts over with a fresh one after
//! the configured delay. The retry delay is awaited inside the task, so no
//! stale retry can fire once the transfer has completed.
//!
//! Precondition: one transfer per node. A second concurrent transfer on the
//! same channel is refused when it tries to subscribe.

use crate::channel::{MessageChannel, Subscription};
use crate::config;
use crate::error::TransferError;
use crate::ledger::{JournalSink, LedgerView};
use crate::messages::{Body, MessageKind, ReplyEnvelope, RequestEnvelope, TransferReply};
use crate::metrics::TransferMetrics;
use crate::peer::{Peer, PeerSelector};
use crate::session::{CommitReport, Event, Step, TransferSession};
use prometheus::IntCounter;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;

/// Starts a transfer into `journal`. `on_complete` runs once, after the
/// transfer commits (even if the commit was abandoned part-way).
///
/// Returns `None` when `restore` is set and the journal already holds a
/// persisted chain, in which case nothing is fetched.
pub fn start_journal_transfer<J, C, F>(
    journal: Arc<Mutex<J>>,
    channel: Arc<C>,
    cfg: config::Transfer,
    on_complete: F,
) -> Option<JoinHandle<()>>
where
    J: LedgerView + JournalSink + Send + 'static,
    C: MessageChannel + 'static,
    F: FnOnce() + Send + 'static,
{
    JournalTransfer::new(journal, channel, cfg).start(on_complete)
}

pub struct JournalTransfer<J, C> {
    journal: Arc<Mutex<J>>,
    channel: Arc<C>,
    cfg: config::Transfer,
    metrics: Option<TransferMetrics>,
}

impl<J, C> JournalTransfer<J, C>
where
    J: LedgerView + JournalSink + Send + 'static,
    C: MessageChannel + 'static,
{
    pub fn new(journal: Arc<Mutex<J>>, channel: Arc<C>, cfg: config::Transfer) -> Self {
        JournalTransfer { journal, channel, cfg, metrics: None }
    }

    pub fn with_metrics(mut self, metrics: TransferMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn start<F>(self, on_complete: F) -> Option<JoinHandle<()>>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.cfg.restore {
            let persisted = self.journal().persisted_block_count();
            if persisted > 1 {
                tracing::info!(blocks = persisted, "journal restored from persistence; not transferring");
                return None;
            }
            tracing::warn!("restoration from persistence layer not possible");
        }
        Some(tokio::spawn(self.run(on_complete)))
    }

    async fn run<F: FnOnce()>(self, on_complete: F) {
        let mut selector = PeerSelector::new(self.cfg.seed);
        loop {
            let Some(peer) = selector.select(&self.channel.peers()) else {
                self.count(|m| &m.peer_waits, 1);
                tracing::debug!(backoff_ms = self.cfg.peer_backoff_ms, "no peers available for journal transfer");
                tokio::time::sleep(self.cfg.peer_backoff()).await;
                continue;
            };

            match self.run_session(peer.clone()).await {
                Ok(_) => break,
                Err(e) => {
                    self.count(|m| &m.sessions_failed, 1);
                    tracing::warn!(peer = %peer.name, error = %e, retry_ms = self.cfg.retry_delay_ms, "journal transfer failed");
                    tokio::time::sleep(self.cfg.retry_delay()).await;
                }
            }
        }
        on_complete();
    }

    async fn run_session(&self, peer: Peer) -> Result<CommitReport, TransferError> {
        let mut subscription = self.channel.dispatcher().subscribe(&MessageKind::ALL)?;
        self.count(|m| &m.sessions_started, 1);
        tracing::info!(peer = %peer, "initiate journal transfer");

        let mut session = TransferSession::new(peer);
        let result = self.drive(&mut session, &mut subscription).await;

        let stats = session.stats();
        self.count(|m| &m.block_requests, stats.block_requests);
        self.count(|m| &m.transaction_requests, stats.transaction_requests);
        self.count(|m| &m.local_hits, stats.local_hits);
        subscription.revoke();
        result
    }

    async fn drive(
        &self,
        session: &mut TransferSession,
        subscription: &mut Subscription,
    ) -> Result<CommitReport, TransferError> {
        let mut step = session.begin();
        loop {
            match step {
                Step::Send(request) => self.channel.send(session.peer(), RequestEnvelope::new(request))?,
                Step::Commit => return Ok(self.commit(session)),
                Step::Abort => {
                    return Err(TransferError::RemoteTransferFailed { peer: session.peer().id.clone() })
                }
                Step::Wait => {}
            }
            let envelope = subscription.recv().await.ok_or(TransferError::ChannelClosed)?;
            let event = self.decode(session.peer(), envelope)?;
            step = self.apply(session, event);
        }
    }

    /// Locks the journal. A poisoned lock is taken over: every journal write
    /// is a single submission that either applied or did not, so the data
    /// behind it is still consistent.
    fn journal(&self) -> MutexGuard<'_, J> {
        self.journal.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("journal lock poisoned by another thread; recovering");
            poisoned.into_inner()
        })
    }

    fn apply(&self, session: &mut TransferSession, event: Event) -> Step {
        let journal = self.journal();
        session.on_event(event, &*journal)
    }

    fn commit(&self, session: &mut TransferSession) -> CommitReport {
        let mut journal = self.journal();
        let report = session.commit(&mut *journal);
        if report.error.is_some() {
            self.count(|m| &m.commit_errors, 1);
        }
        self.count(|m| &m.sessions_completed, 1);

        let head = journal.head();
        tracing::info!(
            peer = %session.peer(),
            transactions = session.transactions().len(),
            blocks = session.blocks().len(),
            head = %head.as_ref().map_or("<none>", |h| h.short()),
            "journal transferred"
        );
        report
    }

    fn decode(&self, peer: &Peer, envelope: ReplyEnvelope) -> Result<Event, TransferError> {
        let request = envelope.in_reply_to.short();
        let event = match envelope.reply {
            TransferReply::BlockList { offset, ids } => {
                tracing::debug!(%request, count = ids.len(), peer = %peer.name, "received block identifiers");
                Event::BlockList { offset, ids }
            }
            TransferReply::UncommittedList { offset, ids } => {
                tracing::debug!(%request, count = ids.len(), peer = %peer.name, "received uncommitted transactions");
                Event::UncommittedList { offset, ids }
            }
            TransferReply::Block { body } => match self.channel.unpack(&body)? {
                Body::Block(block) => {
                    tracing::info!(%request, block = %block.id.short(), peer = %peer.name, "received block");
                    Event::Block(block)
                }
                other => return Err(TransferError::UnexpectedBody { expected: "block", found: other.name() }),
            },
            TransferReply::Transaction { body } => match self.channel.unpack(&body)? {
                Body::Transaction(txn) => {
                    tracing::debug!(%request, transaction = %txn.id.short(), peer = %peer.name, "received transaction");
                    Event::Transaction(txn)
                }
                other => return Err(TransferError::UnexpectedBody { expected: "transaction", found: other.name() }),
            },
            TransferReply::Failed => {
                tracing::debug!(%request, peer = %peer.name, "peer reported transfer failure");
                Event::Failed
            }
        };
        Ok(event)
    }

    fn count(&self, counter: impl Fn(&TransferMetrics) -> &IntCounter, by: u64) {
        if let Some(m) = &self.metrics {
            counter(m).inc_by(by);
        }
    }
}
