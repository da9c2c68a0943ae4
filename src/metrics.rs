use anyhow::Result;
use prometheus::{Encoder, IntCounter, Registry, TextEncoder};
use std::thread;

/// Counters describing journal transfer progress.
#[derive(Clone)]
pub struct TransferMetrics {
    pub sessions_started: IntCounter,
    pub sessions_failed: IntCounter,
    pub sessions_completed: IntCounter,
    pub peer_waits: IntCounter,
    pub block_requests: IntCounter,
    pub transaction_requests: IntCounter,
    pub local_hits: IntCounter,
    pub commit_errors: IntCounter,
}

impl TransferMetrics {
    /// Counters not attached to any registry.
    pub fn new() -> Result<Self> {
        // Prefix metrics with `journalsync_` for namespacing.
        Ok(TransferMetrics {
            sessions_started: IntCounter::new("journalsync_sessions_started", "Transfer sessions started")?,
            sessions_failed: IntCounter::new("journalsync_sessions_failed", "Sessions aborted by a peer failure")?,
            sessions_completed: IntCounter::new("journalsync_sessions_completed", "Sessions that reached commit")?,
            peer_waits: IntCounter::new("journalsync_peer_waits", "Peer selections deferred for lack of peers")?,
            block_requests: IntCounter::new("journalsync_block_requests", "Block bodies fetched from peers")?,
            transaction_requests: IntCounter::new("journalsync_transaction_requests", "Transaction bodies fetched from peers")?,
            local_hits: IntCounter::new("journalsync_local_hits", "Bodies resolved from the local ledger")?,
            commit_errors: IntCounter::new("journalsync_commit_errors", "Commits abandoned on a rejected item")?,
        })
    }

    pub fn register(&self, registry: &Registry) -> Result<()> {
        for c in [
            &self.sessions_started,
            &self.sessions_failed,
            &self.sessions_completed,
            &self.peer_waits,
            &self.block_requests,
            &self.transaction_requests,
            &self.local_hits,
            &self.commit_errors,
        ] {
            registry.register(Box::new(c.clone()))?;
        }
        Ok(())
    }
}

/// Serve `registry` in the text exposition format on `cfg.bind`.
pub fn serve(cfg: crate::config::Metrics, registry: Registry) -> Result<()> {
    let bind_addr = cfg.bind.clone();
    let header = "Content-Type: text/plain; version=0.0.4; charset=utf-8"
        .parse::<tiny_http::Header>()
        .map_err(|_| anyhow::anyhow!("invalid metrics content-type header"))?;

    thread::spawn(move || {
        let server = match tiny_http::Server::http(&bind_addr) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(bind = %bind_addr, error = %e, "could not start metrics server");
                return;
            }
        };
        tracing::info!(bind = %bind_addr, "metrics server listening");

        for request in server.incoming_requests() {
            let mut buffer = vec![];
            let encoder = TextEncoder::new();
            if encoder.encode(&registry.gather(), &mut buffer).is_err() {
                tracing::warn!("could not encode metrics");
                continue;
            }
            let response = tiny_http::Response::from_data(buffer).with_header(header.clone());
            let _ = request.respond(response);
        }
    });

    Ok(())
}
