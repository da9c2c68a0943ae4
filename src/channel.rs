//! Message channel seam and session-scoped reply routing.
//!
//! A transfer session never installs global handlers. It asks the channel's
//! [`Dispatcher`] for a [`Subscription`] covering the reply kinds it needs;
//! dropping (or revoking) the subscription removes exactly those routes.

use crate::error::TransferError;
use crate::messages::{Body, MessageKind, ReplyEnvelope, RequestEnvelope, TaggedBody};
use crate::peer::Peer;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Transport used by a transfer session.
pub trait MessageChannel: Send + Sync {
    /// Peers currently eligible to serve a transfer.
    fn peers(&self) -> Vec<Peer>;

    fn send(&self, peer: &Peer, request: RequestEnvelope) -> Result<(), TransferError>;

    /// Routes inbound replies to subscribers.
    fn dispatcher(&self) -> &Arc<Dispatcher>;

    /// Decodes an embedded body. Transports that need their own context to
    /// decode override this.
    fn unpack(&self, body: &TaggedBody) -> Result<Body, TransferError> {
        body.unpack()
    }
}

struct Route {
    token: u64,
    tx: mpsc::UnboundedSender<ReplyEnvelope>,
}

#[derive(Default)]
pub struct Dispatcher {
    routes: Mutex<HashMap<MessageKind, Route>>,
    next_token: AtomicU64,
}

impl Dispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Dispatcher::default())
    }

    /// Claims `kinds` for one session. Fails if any kind is already claimed.
    pub fn subscribe(self: &Arc<Self>, kinds: &[MessageKind]) -> Result<Subscription, TransferError> {
        let mut routes = self.routes.lock().map_err(|_| TransferError::ChannelClosed)?;
        if let Some(kind) = kinds.iter().find(|k| routes.contains_key(k)) {
            return Err(TransferError::SessionActive(*kind));
        }
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        for kind in kinds {
            routes.insert(*kind, Route { token, tx: tx.clone() });
        }
        Ok(Subscription { token, dispatcher: self.clone(), rx })
    }

    /// Delivers a reply to whichever subscription holds its kind.
    /// Returns false when nobody is listening.
    pub fn dispatch(&self, envelope: ReplyEnvelope) -> bool {
        let kind = envelope.reply.kind();
        let Ok(routes) = self.routes.lock() else { return false };
        match routes.get(&kind) {
            Some(route) => route.tx.send(envelope).is_ok(),
            None => {
                tracing::trace!(?kind, in_reply_to = %envelope.in_reply_to.short(), "dropping reply with no subscriber");
                false
            }
        }
    }

    pub fn is_registered(&self, kind: MessageKind) -> bool {
        self.routes.lock().map(|r| r.contains_key(&kind)).unwrap_or(false)
    }

    fn revoke(&self, token: u64) {
        if let Ok(mut routes) = self.routes.lock() {
            routes.retain(|_, route| route.token != token);
        }
    }
}

/// Reply stream owned by one transfer session.
pub struct Subscription {
    token: u64,
    dispatcher: Arc<Dispatcher>,
    rx: mpsc::UnboundedReceiver<ReplyEnvelope>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<ReplyEnvelope> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ReplyEnvelope> {
        self.rx.try_recv().ok()
    }

    /// Removes this session's routes. Queued replies are discarded.
    pub fn revoke(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispatcher.revoke(self.token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{MessageId, TransferReply};

    fn failed() -> ReplyEnvelope {
        ReplyEnvelope { in_reply_to: MessageId(1), reply: TransferReply::Failed }
    }

    #[test]
    fn second_session_is_refused_while_first_is_live() {
        let d = Dispatcher::new();
        let first = d.subscribe(&MessageKind::ALL).unwrap();
        assert!(matches!(d.subscribe(&[MessageKind::TransferFailed]), Err(TransferError::SessionActive(_))));
        first.revoke();
        assert!(d.subscribe(&MessageKind::ALL).is_ok());
    }

    #[test]
    fn revoking_clears_every_route() {
        let d = Dispatcher::new();
        let sub = d.subscribe(&MessageKind::ALL).unwrap();
        assert!(MessageKind::ALL.iter().all(|k| d.is_registered(*k)));
        drop(sub);
        assert!(MessageKind::ALL.iter().all(|k| !d.is_registered(*k)));
        assert!(!d.dispatch(failed()));
    }

    #[test]
    fn replies_reach_the_subscriber() {
        let d = Dispatcher::new();
        let mut sub = d.subscribe(&[MessageKind::TransferFailed]).unwrap();
        assert!(d.dispatch(failed()));
        assert_eq!(sub.try_recv(), Some(failed()));
    }
}
