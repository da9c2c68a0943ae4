// End-to-end journal transfer over the in-process gossip network.

use journalsync::{
    channel::MessageChannel,
    config,
    ledger::{JournalSink, LedgerSource, LedgerView, MemoryJournal},
    memory::{MemoryChannel, MemoryNetwork},
    messages::{MessageKind, ReplyEnvelope, RequestEnvelope, TransferReply, TransferRequest},
    metrics::TransferMetrics,
    responder::{RequestHandler, Responder},
    start_journal_transfer, JournalTransfer,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::timeout;

fn fast_cfg() -> config::Transfer {
    config::Transfer {
        retry_delay_ms: 20,
        peer_backoff_ms: 10,
        page_size: 3,
        seed: Some(1),
        ..Default::default()
    }
}

fn remote_chain(blocks: usize, txns: usize, uncommitted: usize) -> MemoryJournal {
    let mut j = MemoryJournal::new();
    for b in 0..blocks {
        j.append_block((0..txns).map(|t| format!("block{b}/tx{t}").into_bytes()).collect())
            .expect("append block");
    }
    for u in 0..uncommitted {
        j.add_pending(format!("pending{u}").into_bytes()).expect("add pending");
    }
    j
}

fn serving(net: &Arc<MemoryNetwork>, name: &str, source: &Arc<Mutex<MemoryJournal>>) -> MemoryChannel {
    let handler: Arc<dyn RequestHandler> = Arc::new(Responder::new(source.clone(), 3));
    net.join(name, Some(handler)).expect("join network")
}

/// Lets the spawned driver run until it parks again.
async fn settle() {
    for _ in 0..3 {
        tokio::task::yield_now().await;
    }
}

/// Fails the first block request it sees, then behaves.
struct FailFirstBlock {
    inner: Responder<MemoryJournal>,
    tripped: AtomicBool,
}

impl RequestHandler for FailFirstBlock {
    fn handle(&self, request: &RequestEnvelope) -> ReplyEnvelope {
        if matches!(request.request, TransferRequest::Block { .. }) && !self.tripped.swap(true, Ordering::SeqCst) {
            return ReplyEnvelope { in_reply_to: request.id, reply: TransferReply::Failed };
        }
        self.inner.handle(request)
    }
}

#[tokio::test]
async fn test_transfer_replicates_remote_journal() {
    let source = Arc::new(Mutex::new(remote_chain(7, 2, 4)));
    let net = MemoryNetwork::new();
    let _p1 = serving(&net, "p1", &source);
    let _p2 = serving(&net, "p2", &source);
    let channel = Arc::new(net.join("local", None).unwrap());
    let journal = Arc::new(Mutex::new(MemoryJournal::new()));

    let calls = Arc::new(AtomicUsize::new(0));
    let calls_cb = calls.clone();
    let handle = start_journal_transfer(journal.clone(), channel.clone(), fast_cfg(), move || {
        calls_cb.fetch_add(1, Ordering::SeqCst);
    })
    .expect("transfer should start");
    timeout(Duration::from_secs(5), handle).await.expect("transfer finished").unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1, "callback fires exactly once");
    let local = journal.lock().unwrap();
    let remote = source.lock().unwrap();
    assert_eq!(local.block_ids(), remote.block_ids());
    assert_eq!(local.pending_ids(), remote.pending_ids());
    assert_eq!(local.head(), remote.head());
    assert!(
        MessageKind::ALL.iter().all(|k| !channel.dispatcher().is_registered(*k)),
        "handlers are revoked after completion"
    );
}

#[tokio::test(start_paused = true)]
async fn test_no_requests_until_a_peer_appears() {
    let source = Arc::new(Mutex::new(remote_chain(2, 1, 0)));
    let net = MemoryNetwork::new();
    let channel = Arc::new(net.join("local", None).unwrap());
    let journal = Arc::new(Mutex::new(MemoryJournal::new()));
    let metrics = TransferMetrics::new().unwrap();

    let handle = JournalTransfer::new(journal.clone(), channel.clone(), fast_cfg())
        .with_metrics(metrics.clone())
        .start(|| {})
        .expect("transfer should start");

    // The clock is paused: each backoff elapses only when the time is advanced.
    settle().await;
    assert_eq!(metrics.peer_waits.get(), 1);
    for expected in 2..=4 {
        tokio::time::advance(Duration::from_millis(10)).await;
        settle().await;
        assert_eq!(metrics.peer_waits.get(), expected, "one re-check per backoff");
    }
    assert!(channel.sent().is_empty(), "nothing may be sent without peers");
    assert_eq!(metrics.sessions_started.get(), 0);

    let _p1 = serving(&net, "late", &source);
    timeout(Duration::from_secs(5), handle).await.expect("transfer finished").unwrap();
    assert_eq!(journal.lock().unwrap().chain_len(), 2);
}

#[tokio::test]
async fn test_remote_failure_restarts_with_fresh_session() {
    let source = Arc::new(Mutex::new(remote_chain(3, 1, 1)));
    let net = MemoryNetwork::new();
    let handler: Arc<dyn RequestHandler> = Arc::new(FailFirstBlock {
        inner: Responder::new(source.clone(), 3),
        tripped: AtomicBool::new(false),
    });
    let _flaky = net.join("flaky", Some(handler)).unwrap();
    let channel = Arc::new(net.join("local", None).unwrap());
    let journal = Arc::new(Mutex::new(MemoryJournal::new()));
    let metrics = TransferMetrics::new().unwrap();

    let handle = JournalTransfer::new(journal.clone(), channel.clone(), fast_cfg())
        .with_metrics(metrics.clone())
        .start(|| {})
        .expect("transfer should start");
    timeout(Duration::from_secs(5), handle).await.expect("transfer finished").unwrap();

    assert_eq!(metrics.sessions_failed.get(), 1);
    assert_eq!(metrics.sessions_started.get(), 2);
    assert_eq!(metrics.sessions_completed.get(), 1);

    let restarts = channel
        .sent()
        .iter()
        .filter(|(_, r)| *r == TransferRequest::BlockList { offset: 0 })
        .count();
    assert_eq!(restarts, 2, "the retry starts pagination from scratch");
    assert_eq!(journal.lock().unwrap().block_ids(), source.lock().unwrap().block_ids());
}

#[tokio::test]
async fn test_locally_known_blocks_are_not_requested() {
    let remote = remote_chain(6, 2, 0);
    let mut local = MemoryJournal::new();
    let preloaded: Vec<_> = remote.block_ids().into_iter().take(4).collect();
    for id in &preloaded {
        let block = remote.block(id).unwrap();
        for t in &block.transaction_ids {
            local.stage_transaction(remote.transaction(t).unwrap()).unwrap();
        }
        local.commit_block(block).unwrap();
    }

    let source = Arc::new(Mutex::new(remote));
    let net = MemoryNetwork::new();
    let _p = serving(&net, "p", &source);
    let channel = Arc::new(net.join("local", None).unwrap());
    let journal = Arc::new(Mutex::new(local));

    let handle = start_journal_transfer(journal.clone(), channel.clone(), fast_cfg(), || {}).unwrap();
    timeout(Duration::from_secs(5), handle).await.expect("transfer finished").unwrap();

    let block_requests: Vec<_> = channel
        .sent()
        .into_iter()
        .filter_map(|(_, r)| match r {
            TransferRequest::Block { id } => Some(id),
            _ => None,
        })
        .collect();
    assert_eq!(block_requests.len(), 2);
    assert!(block_requests.iter().all(|id| !preloaded.contains(id)));
    assert_eq!(journal.lock().unwrap().chain_len(), 6);
}

#[tokio::test]
async fn test_restore_skips_transfer_when_chain_is_persisted() {
    let net = MemoryNetwork::new();
    let channel = Arc::new(net.join("local", None).unwrap());
    let journal = Arc::new(Mutex::new(remote_chain(2, 1, 0)));
    let cfg = config::Transfer { restore: true, ..fast_cfg() };

    let handle = start_journal_transfer(journal, channel.clone(), cfg, || panic!("no transfer expected"));
    assert!(handle.is_none());
    assert!(channel.sent().is_empty());
}

#[tokio::test]
async fn test_restore_falls_back_to_transfer_for_short_chain() {
    let source = Arc::new(Mutex::new(remote_chain(3, 1, 0)));
    let net = MemoryNetwork::new();
    let _p = serving(&net, "p", &source);
    let channel = Arc::new(net.join("local", None).unwrap());
    let journal = Arc::new(Mutex::new(MemoryJournal::new()));
    let cfg = config::Transfer { restore: true, ..fast_cfg() };

    let handle = start_journal_transfer(journal.clone(), channel, cfg, || {}).expect("transfer should start");
    timeout(Duration::from_secs(5), handle).await.expect("transfer finished").unwrap();
    assert_eq!(journal.lock().unwrap().chain_len(), 3);
}

#[tokio::test]
async fn test_commit_violation_still_completes() {
    // The local journal has a different genesis, so the first transferred block
    // cannot extend it.
    let source = Arc::new(Mutex::new(remote_chain(2, 1, 0)));
    let mut local = MemoryJournal::new();
    local.append_block(vec![b"local genesis".to_vec()]).unwrap();
    let local_head = local.head();

    let net = MemoryNetwork::new();
    let _p = serving(&net, "p", &source);
    let channel = Arc::new(net.join("local", None).unwrap());
    let journal = Arc::new(Mutex::new(local));
    let metrics = TransferMetrics::new().unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let done_cb = done.clone();
    let handle = JournalTransfer::new(journal.clone(), channel, fast_cfg())
        .with_metrics(metrics.clone())
        .start(move || done_cb.store(true, Ordering::SeqCst))
        .unwrap();
    timeout(Duration::from_secs(5), handle).await.expect("transfer finished").unwrap();

    assert!(done.load(Ordering::SeqCst));
    assert_eq!(metrics.commit_errors.get(), 1);
    assert_eq!(metrics.sessions_failed.get(), 0, "commit errors are not retried");
    let j = journal.lock().unwrap();
    assert_eq!(j.head(), local_head, "no remote block was committed");
    assert_eq!(j.pending_ids().len(), 2, "transactions staged before the violation stay staged");
}

#[tokio::test]
async fn test_poisoned_journal_lock_does_not_stall_the_transfer() {
    let source = Arc::new(Mutex::new(remote_chain(2, 1, 1)));
    let net = MemoryNetwork::new();
    let _p = serving(&net, "p", &source);
    let channel = Arc::new(net.join("local", None).unwrap());
    let journal = Arc::new(Mutex::new(MemoryJournal::new()));

    let poisoner = journal.clone();
    let _ = std::thread::spawn(move || {
        let _guard = poisoner.lock().unwrap();
        panic!("writer died holding the journal lock");
    })
    .join();
    assert!(journal.is_poisoned());

    let metrics = TransferMetrics::new().unwrap();
    let handle = JournalTransfer::new(journal.clone(), channel, fast_cfg())
        .with_metrics(metrics.clone())
        .start(|| {})
        .expect("transfer should start");
    timeout(Duration::from_secs(5), handle).await.expect("transfer finished").unwrap();

    assert_eq!(metrics.sessions_failed.get(), 0);
    assert_eq!(metrics.sessions_completed.get(), 1);
    let local = journal.lock().unwrap_or_else(PoisonError::into_inner);
    assert_eq!(local.block_ids(), source.lock().unwrap().block_ids());
    assert_eq!(local.pending_ids().len(), 1);
}
