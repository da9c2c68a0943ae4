// Library interface for the journal transfer machinery.
// Tests and the node binaries use the modules below.

pub mod config;
pub mod error;
pub mod journal;
pub mod messages;
pub mod channel;
pub mod memory;
pub mod responder;
pub mod ledger;
pub mod storage;
pub mod discovery;
pub mod peer;
pub mod session;
pub mod sync;
pub mod metrics;

pub use error::{CommitError, TransferError};
pub use journal::{Block, Identifier, Transaction};
pub use ledger::{JournalSink, LedgerSource, LedgerView, MemoryJournal};
pub use session::TransferSession;
pub use storage::Store;
pub use sync::{start_journal_transfer, JournalTransfer};

/// Install the fmt subscriber. `RUST_LOG` wins over the default level.
pub fn init_logging(quiet: bool) {
    let default = if quiet { "warn" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
