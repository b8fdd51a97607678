//! Outbound peer connections: one `tokio-tungstenite` client per configured
//! peer URL, with a 10s ping heartbeat, reconnect-after-close, and
//! silencing after repeated failures.

use crate::network::protocol::GossipEnvelope;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
const MAX_MISSED_PINGS: u32 = 3;
const RECONNECT_DELAY: Duration = Duration::from_secs(10);
const SILENCE_AFTER_FAILURES: u32 = 3;

/// Shared reconnect/silence bookkeeping for one configured peer URL.
pub struct PeerHandle {
    pub url: String,
    silenced: AtomicBool,
    consecutive_failures: AtomicU32,
}

impl PeerHandle {
    pub fn new(url: String) -> Arc<Self> {
        Arc::new(Self {
            url,
            silenced: AtomicBool::new(false),
            consecutive_failures: AtomicU32::new(0),
        })
    }

    pub fn is_silenced(&self) -> bool {
        self.silenced.load(Ordering::Relaxed)
    }

    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= SILENCE_AFTER_FAILURES {
            self.silenced.store(true, Ordering::Relaxed);
        }
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.silenced.store(false, Ordering::Relaxed);
    }
}

/// Run the reconnect loop for one outbound peer forever (until `shutdown`
/// fires). `outgoing` is the hub's broadcast of envelopes to forward;
/// `on_incoming` is called for every envelope the peer sends us.
pub async fn run_outbound_peer(
    handle: Arc<PeerHandle>,
    mut outgoing: broadcast::Receiver<GossipEnvelope>,
    on_incoming: mpsc::UnboundedSender<GossipEnvelope>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            return;
        }

        match tokio_tungstenite::connect_async(&handle.url).await {
            Ok((stream, _response)) => {
                handle.record_success();
                info!(peer = %handle.url, "gossip peer connected");
                let reason = run_connection(stream, &mut outgoing, &on_incoming, &mut shutdown).await;
                if *shutdown.borrow() {
                    return;
                }
                debug!(peer = %handle.url, %reason, "gossip peer disconnected");
            }
            Err(e) => {
                handle.record_failure();
                if !handle.is_silenced() {
                    warn!(peer = %handle.url, error = %e, "failed to connect to gossip peer");
                }
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

async fn run_connection(
    stream: tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    outgoing: &mut broadcast::Receiver<GossipEnvelope>,
    on_incoming: &mpsc::UnboundedSender<GossipEnvelope>,
    shutdown: &mut tokio::sync::watch::Receiver<bool>,
) -> &'static str {
    let (mut sink, mut stream) = stream.split();
    let mut missed_pings = 0u32;
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if missed_pings >= MAX_MISSED_PINGS {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    return "missed too many pings";
                }
                missed_pings += 1;
                if sink.send(WsMessage::Ping(Vec::new())).await.is_err() {
                    return "ping send failed";
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(WsMessage::Pong(_))) => {
                        missed_pings = 0;
                    }
                    Some(Ok(WsMessage::Text(text))) => {
                        if let Ok(envelope) = serde_json::from_str::<GossipEnvelope>(&text) {
                            let _ = on_incoming.send(envelope);
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => return "peer closed",
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "gossip peer read error");
                        return "read error";
                    }
                }
            }
            envelope = outgoing.recv() => {
                match envelope {
                    Ok(envelope) => {
                        let Ok(text) = serde_json::to_string(&envelope) else { continue };
                        if sink.send(WsMessage::Text(text)).await.is_err() {
                            return "send failed";
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return "broadcast closed",
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    return "shutdown";
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silences_after_three_consecutive_failures() {
        let handle = PeerHandle::new("ws://example.invalid".to_string());
        for _ in 0..2 {
            handle.record_failure();
            assert!(!handle.is_silenced());
        }
        handle.record_failure();
        assert!(handle.is_silenced());
    }

    #[test]
    fn success_resets_silence_and_failure_count() {
        let handle = PeerHandle::new("ws://example.invalid".to_string());
        handle.record_failure();
        handle.record_failure();
        handle.record_failure();
        assert!(handle.is_silenced());
        handle.record_success();
        assert!(!handle.is_silenced());
        assert_eq!(handle.failure_count(), 0);
    }
}
