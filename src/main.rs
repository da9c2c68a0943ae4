use anyhow::Context;
use clap::{Parser, Subcommand};
use journalsync::{
    config,
    ledger::{JournalSink, LedgerSource, LedgerView, MemoryJournal},
    memory::MemoryNetwork,
    metrics::{self, TransferMetrics},
    responder::{RequestHandler, Responder},
    storage::Store,
    JournalTransfer,
};
use std::sync::{Arc, Mutex};

#[derive(Parser)]
#[command(author, version, about = "journalsync node tools")]
struct Cli {
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Only log warnings and errors
    #[arg(long, default_value_t = false)]
    quiet: bool,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Transfer a generated chain from in-process peers into the local store
    Simulate {
        #[arg(long, default_value_t = 8)]
        blocks: usize,
        #[arg(long, default_value_t = 3)]
        txns_per_block: usize,
        /// Pending transactions held by the serving peers
        #[arg(long, default_value_t = 2)]
        uncommitted: usize,
        #[arg(long, default_value_t = 2)]
        peers: usize,
        /// Blocks already present locally before the transfer starts
        #[arg(long, default_value_t = 0)]
        preload: usize,
        /// Expose transfer counters on the configured metrics address
        #[arg(long, default_value_t = false)]
        metrics: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    journalsync::init_logging(cli.quiet);

    let cfg = match config::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(path = %cli.config, error = %e, "using default configuration");
            config::Config::default()
        }
    };

    match cli.cmd {
        Cmd::Simulate { blocks, txns_per_block, uncommitted, peers, preload, metrics } => {
            simulate(cfg, blocks, txns_per_block, uncommitted, peers, preload, metrics).await
        }
    }
}

async fn simulate(
    cfg: config::Config,
    blocks: usize,
    txns_per_block: usize,
    uncommitted: usize,
    peers: usize,
    preload: usize,
    serve_metrics: bool,
) -> anyhow::Result<()> {
    let mut source = MemoryJournal::new();
    for b in 0..blocks {
        source.append_block((0..txns_per_block).map(|t| format!("block-{b}/txn-{t}").into_bytes()).collect())?;
    }
    for u in 0..uncommitted {
        source.add_pending(format!("mempool-{u}").into_bytes())?;
    }

    let mut store = Store::open(&cfg.storage.path)?;
    for id in source.block_ids().into_iter().take(preload) {
        let block = source.block(&id).context("generated block vanished")?;
        for txn_id in &block.transaction_ids {
            store.stage_transaction(source.transaction(txn_id).context("generated transaction vanished")?)?;
        }
        store.commit_block(block)?;
    }
    println!("🗄️  Journal store at '{}' holds {} blocks", store.path(), store.chain_len()?);

    let source = Arc::new(Mutex::new(source));
    let net = MemoryNetwork::new();
    for p in 0..peers {
        let handler: Arc<dyn RequestHandler> = Arc::new(Responder::new(source.clone(), cfg.transfer.page_size));
        net.join(&format!("peer-{p}"), Some(handler))?;
    }
    let channel = Arc::new(net.join("local", None)?);
    let journal = Arc::new(Mutex::new(store));

    let mut transfer = JournalTransfer::new(journal.clone(), channel.clone(), cfg.transfer.clone());
    if serve_metrics {
        let registry = prometheus::Registry::new();
        let m = TransferMetrics::new()?;
        m.register(&registry)?;
        metrics::serve(cfg.metrics.clone(), registry)?;
        transfer = transfer.with_metrics(m);
    }

    match transfer.start(|| tracing::info!("journal transfer complete")) {
        Some(handle) => handle.await?,
        None => println!("♻️  Journal restored from persistence; nothing transferred"),
    }

    let store = journal.lock().map_err(|_| anyhow::anyhow!("journal lock poisoned"))?;
    println!("📊 Transfer summary:");
    println!("   Blocks:  {}", store.chain_len()?);
    println!("   Pending: {}", store.pending()?.len());
    println!("   Head:    {}", store.head().map_or("<none>".to_string(), |h| h.to_string()));
    println!("   Requests sent: {}", channel.sent().len());
    store.flush()?;
    Ok(())
}
