//! The gossip hub. Fans inbound and outbound peer traffic into the
//! chain manager, and re-broadcasts anything the chain manager accepts back
//! out to every connected socket. Also hosts the inbound WebSocket route
//! peers dial into.

use crate::consensus::{ChainManager, ReplayMode};
use crate::network::protocol::GossipEnvelope;
use axum::extract::ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, warn};

const FANOUT_CAPACITY: usize = 1024;

pub struct GossipHub {
    chain: Arc<ChainManager>,
    fanout: broadcast::Sender<GossipEnvelope>,
    last_seen_block_hash: RwLock<Option<String>>,
    last_seen_push: RwLock<Option<String>>,
    stop_incoming: AtomicBool,
    connected_inbound: AtomicUsize,
}

impl GossipHub {
    pub fn new(chain: Arc<ChainManager>) -> Arc<Self> {
        let (fanout, _) = broadcast::channel(FANOUT_CAPACITY);
        Arc::new(Self {
            chain,
            fanout,
            last_seen_block_hash: RwLock::new(None),
            last_seen_push: RwLock::new(None),
            stop_incoming: AtomicBool::new(false),
            connected_inbound: AtomicUsize::new(0),
        })
    }

    /// Track one more/fewer connected inbound peer socket, reflecting the
    /// new count into the shared metrics snapshot.
    fn inbound_connected(&self) {
        let count = self.connected_inbound.fetch_add(1, Ordering::Relaxed) + 1;
        self.chain.metrics.set_connected_peers(count);
    }

    fn inbound_disconnected(&self) {
        let count = self.connected_inbound.fetch_sub(1, Ordering::Relaxed) - 1;
        self.chain.metrics.set_connected_peers(count);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GossipEnvelope> {
        self.fanout.subscribe()
    }

    /// Gate out all incoming gossip while a pull-sync rewind is underway, so
    /// we never interleave a bulk rebuild with piecemeal block ingest.
    pub fn stop_incoming(&self) {
        self.stop_incoming.store(true, Ordering::SeqCst);
    }

    pub fn resume_incoming(&self) {
        self.stop_incoming.store(false, Ordering::SeqCst);
    }

    fn is_accepting(&self) -> bool {
        !self.stop_incoming.load(Ordering::SeqCst)
    }

    /// Broadcast something produced locally (e.g. a transaction submitted
    /// through the HTTP API) to every connected peer.
    pub fn broadcast(&self, envelope: GossipEnvelope) {
        let _ = self.fanout.send(envelope);
    }

    /// Handle one envelope received from any peer socket, inbound or
    /// outbound, re-broadcasting it on acceptance so it propagates further.
    pub async fn handle_incoming(self: &Arc<Self>, envelope: GossipEnvelope) {
        if !self.is_accepting() {
            return;
        }
        match envelope {
            GossipEnvelope::Tx(tx) => {
                let now = chrono::Utc::now().timestamp_millis();
                match self.chain.submit_transaction(tx.clone(), now) {
                    Ok(()) => self.broadcast(GossipEnvelope::Tx(tx)),
                    Err(e) => {
                        self.chain.metrics.record_transaction_rejected();
                        debug!(error = %e, "rejected gossiped transaction");
                    }
                }
            }
            GossipEnvelope::Block(block) => {
                {
                    let mut last_seen = self.last_seen_block_hash.write().await;
                    if last_seen.as_deref() == Some(block.hash.as_str()) {
                        return;
                    }
                    *last_seen = Some(block.hash.clone());
                }
                let now = chrono::Utc::now().timestamp_millis();
                match self.chain.add_block(block.clone(), ReplayMode::Live { now_millis: now }) {
                    Ok(()) => self.broadcast(GossipEnvelope::Block(block)),
                    Err(e) => {
                        self.chain.metrics.record_block_rejected();
                        warn!(error = %e, "rejected gossiped block");
                    }
                }
            }
            GossipEnvelope::Push(sub_chain) => {
                let identity = hex::encode(crate::crypto::sha256(&crate::crypto::canonical_bytes(&sub_chain)));
                {
                    let mut last_seen = self.last_seen_push.write().await;
                    if last_seen.as_deref() == Some(identity.as_str()) {
                        return;
                    }
                    *last_seen = Some(identity);
                }
                // The isSyncing latch also guards incoming pushes, not just the
                // watchdog: a push landing mid pull-sync would race the rewind.
                if !self.chain.try_begin_sync() {
                    debug!("dropped gossiped push while a sync is already in progress");
                    return;
                }
                let result = self.chain.push_reorg(sub_chain.clone());
                self.chain.end_sync();
                match result {
                    Ok(()) => self.broadcast(GossipEnvelope::Push(sub_chain)),
                    Err(e) => debug!(error = %e, "rejected gossiped push"),
                }
            }
        }
    }
}

#[derive(Clone)]
struct WsState {
    hub: Arc<GossipHub>,
    incoming_tx: mpsc::UnboundedSender<GossipEnvelope>,
}

/// The inbound route peers connect to: `GET /ws`, upgraded to a socket that
/// both receives our fan-out and feeds whatever it sends us into
/// `incoming_tx` — the same serializing channel outbound peer connections
/// use, drained by the single task that calls `handle_incoming`. Inbound
/// sockets must never call `handle_incoming` directly: axum spawns one task
/// per connection, and concurrent calls from several inbound peers would
/// race each other's check-then-commit against the chain.
pub fn router(hub: Arc<GossipHub>, incoming_tx: mpsc::UnboundedSender<GossipEnvelope>) -> Router {
    Router::new().route("/ws", get(ws_upgrade)).with_state(WsState { hub, incoming_tx })
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<WsState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.hub, state.incoming_tx))
}

async fn handle_socket(socket: WebSocket, hub: Arc<GossipHub>, incoming_tx: mpsc::UnboundedSender<GossipEnvelope>) {
    hub.inbound_connected();
    let (mut sink, mut stream) = socket.split();
    let mut outgoing = hub.subscribe();

    let send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                envelope = outgoing.recv() => {
                    match envelope {
                        Ok(envelope) => {
                            let Ok(text) = serde_json::to_string(&envelope) else { continue };
                            if sink.send(AxumMessage::Text(text)).await.is_err() {
                                return;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => return,
                    }
                }
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        match message {
            AxumMessage::Text(text) => {
                if let Ok(envelope) = serde_json::from_str::<GossipEnvelope>(&text) {
                    let _ = incoming_tx.send(envelope);
                }
            }
            AxumMessage::Close(_) => break,
            _ => {}
        }
    }

    send_task.abort();
    hub.inbound_disconnected();
}
