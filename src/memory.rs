//! In-process gossip network.
//!
//! Every node owns a [`Dispatcher`] and may serve requests. Messages are put
//! through the bincode wire codec in both directions, and replies are queued
//! on the sender's dispatcher so a session never re-enters itself.

use crate::channel::{Dispatcher, MessageChannel};
use crate::error::TransferError;
use crate::messages::{self, ReplyEnvelope, RequestEnvelope, TransferRequest};
use crate::peer::{Peer, PeerId};
use crate::responder::RequestHandler;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

struct Node {
    peer: Peer,
    dispatcher: Arc<Dispatcher>,
    handler: Option<Arc<dyn RequestHandler>>,
}

#[derive(Default)]
pub struct MemoryNetwork {
    nodes: Mutex<BTreeMap<PeerId, Node>>,
}

impl MemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(MemoryNetwork::default())
    }

    /// Adds a node. Nodes without a handler can request but never serve.
    pub fn join(
        self: &Arc<Self>,
        name: &str,
        handler: Option<Arc<dyn RequestHandler>>,
    ) -> Result<MemoryChannel, TransferError> {
        let peer = Peer::new(format!("mem-{name}"), name);
        let dispatcher = Dispatcher::new();
        let mut nodes = self.nodes.lock().map_err(|_| TransferError::ChannelClosed)?;
        nodes.insert(peer.id.clone(), Node { peer: peer.clone(), dispatcher: dispatcher.clone(), handler });
        Ok(MemoryChannel { local: peer, network: self.clone(), dispatcher, sent: Mutex::new(Vec::new()) })
    }

    pub fn leave(&self, id: &PeerId) {
        if let Ok(mut nodes) = self.nodes.lock() {
            nodes.remove(id);
        }
    }

    fn serving_peers(&self, except: &PeerId) -> Vec<Peer> {
        let Ok(nodes) = self.nodes.lock() else { return Vec::new() };
        nodes
            .values()
            .filter(|n| &n.peer.id != except && n.handler.is_some())
            .map(|n| n.peer.clone())
            .collect()
    }

    fn handler_of(&self, id: &PeerId) -> Option<Arc<dyn RequestHandler>> {
        self.nodes.lock().ok()?.get(id)?.handler.clone()
    }
}

/// One node's view of a [`MemoryNetwork`].
pub struct MemoryChannel {
    local: Peer,
    network: Arc<MemoryNetwork>,
    dispatcher: Arc<Dispatcher>,
    sent: Mutex<Vec<(PeerId, TransferRequest)>>,
}

impl MemoryChannel {
    pub fn local_peer(&self) -> &Peer {
        &self.local
    }

    /// Every request this node has sent, oldest first.
    pub fn sent(&self) -> Vec<(PeerId, TransferRequest)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl MessageChannel for MemoryChannel {
    fn peers(&self) -> Vec<Peer> {
        self.network.serving_peers(&self.local.id)
    }

    fn send(&self, peer: &Peer, request: RequestEnvelope) -> Result<(), TransferError> {
        let handler = self
            .network
            .handler_of(&peer.id)
            .ok_or_else(|| TransferError::UnknownPeer(peer.id.clone()))?;
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((peer.id.clone(), request.request.clone()));
        }

        let wire = messages::encode(&request)?;
        let reply = handler.handle(&messages::decode(&wire)?);
        let wire = messages::encode(&reply)?;
        let reply: ReplyEnvelope = messages::decode(&wire)?;

        if !self.dispatcher.dispatch(reply) {
            tracing::debug!(peer = %peer.name, "reply arrived with no active subscription");
        }
        Ok(())
    }

    fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }
}
