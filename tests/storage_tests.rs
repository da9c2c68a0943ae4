// RocksDB journal store tests: acceptance rules, persistence, and a transfer into it.

use journalsync::{
    error::CommitError,
    journal::{Block, Identifier, Transaction},
    ledger::{JournalSink, LedgerSource, LedgerView, MemoryJournal},
    memory::MemoryNetwork,
    responder::{RequestHandler, Responder},
    start_journal_transfer,
    storage::Store,
    config,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

fn open(dir: &TempDir) -> Store {
    let path = dir.path().join("journal");
    Store::open(path.to_str().expect("utf-8 path")).expect("Failed to open store")
}

#[test]
fn test_stage_and_commit_round_trip() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let mut store = open(&dir);

    let t1 = Transaction::new(b"one".to_vec());
    let t2 = Transaction::new(b"two".to_vec());
    let loose = Transaction::new(b"loose".to_vec());
    for t in [&t1, &t2, &loose] {
        store.stage_transaction(t.clone()).expect("stage");
    }
    assert_eq!(store.pending_ids(), vec![t1.id.clone(), t2.id.clone(), loose.id.clone()]);

    let block = Block::new(None, vec![t1.id.clone(), t2.id.clone()]);
    store.commit_block(block.clone()).expect("commit");

    assert_eq!(store.head(), Some(block.id.clone()));
    assert_eq!(store.block_ids(), vec![block.id.clone()]);
    assert_eq!(store.pending_ids(), vec![loose.id.clone()], "committed transactions leave pending");
    assert_eq!(store.block(&block.id), Some(block));
    assert_eq!(store.transaction(&t2.id), Some(t2));
    assert_eq!(store.persisted_block_count(), 1);
}

#[test]
fn test_rejections_are_violations() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let mut store = open(&dir);

    let unknown = Block::new(None, vec![Identifier::from("missing")]);
    let err = store.commit_block(unknown).unwrap_err();
    assert!(matches!(err, CommitError::Violation(ref m) if m.contains("unknown transaction")), "{err}");

    store.commit_block(Block::new(None, vec![])).expect("genesis");
    let fork = Block::new(Some(Identifier::from("elsewhere")), vec![]);
    assert!(matches!(store.commit_block(fork), Err(CommitError::Violation(_))));
    assert_eq!(store.persisted_block_count(), 1);
}

#[test]
fn test_resubmission_is_a_noop() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let mut store = open(&dir);
    let t = Transaction::new(b"t".to_vec());
    store.stage_transaction(t.clone()).unwrap();
    store.stage_transaction(t.clone()).unwrap();
    assert_eq!(store.pending_ids().len(), 1);

    let block = Block::new(None, vec![t.id.clone()]);
    store.commit_block(block.clone()).unwrap();
    store.commit_block(block).unwrap();
    store.stage_transaction(t).unwrap();
    assert_eq!(store.persisted_block_count(), 1);
    assert!(store.pending_ids().is_empty());
}

#[test]
fn test_journal_survives_reopen() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let head = {
        let mut store = open(&dir);
        let mut prev = None;
        for i in 0..3 {
            let t = Transaction::new(format!("tx{i}").into_bytes());
            store.stage_transaction(t.clone()).unwrap();
            let block = Block::new(prev.clone(), vec![t.id]);
            store.commit_block(block.clone()).unwrap();
            prev = Some(block.id);
        }
        store.flush().unwrap();
        prev
    };

    let store = open(&dir);
    assert_eq!(store.head(), head);
    assert_eq!(store.chain().unwrap().len(), 3);
}

#[tokio::test]
async fn test_transfer_into_store() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let mut remote = MemoryJournal::new();
    for b in 0..4 {
        remote.append_block(vec![format!("b{b}/a").into_bytes(), format!("b{b}/b").into_bytes()]).unwrap();
    }
    remote.add_pending(b"mempool".to_vec()).unwrap();
    let expected_chain = remote.block_ids();
    let expected_pending = remote.pending_ids();

    let source = Arc::new(Mutex::new(remote));
    let net = MemoryNetwork::new();
    let handler: Arc<dyn RequestHandler> = Arc::new(Responder::new(source, 2));
    let _peer = net.join("peer", Some(handler)).unwrap();
    let channel = Arc::new(net.join("local", None).unwrap());
    let journal = Arc::new(Mutex::new(open(&dir)));

    let cfg = config::Transfer { retry_delay_ms: 20, peer_backoff_ms: 10, ..Default::default() };
    let handle = start_journal_transfer(journal.clone(), channel, cfg, || {}).expect("transfer should start");
    tokio::time::timeout(Duration::from_secs(10), handle).await.expect("transfer finished").unwrap();

    let store = journal.lock().unwrap();
    assert_eq!(store.block_ids(), expected_chain);
    assert_eq!(store.pending_ids(), expected_pending);
}
