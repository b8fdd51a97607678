//! Post-commit event bus. The chain manager publishes here after every
//! successful `add_block`; webhook delivery (excluded from this system)
//! would be a subscriber with its own retry policy.

use crate::core::{Block, MintEntry};
use tokio::sync::broadcast;

#[derive(Clone, Debug)]
pub enum ChainEvent {
    BlockCommitted(Block),
    MintCreated { token: String, entry: MintEntry },
}

const EVENT_CHANNEL_CAPACITY: usize = 256;

pub struct EventBus {
    sender: broadcast::Sender<ChainEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.sender.subscribe()
    }

    /// Publish is best-effort: no receivers is not an error, it just means
    /// nobody is currently listening.
    pub fn publish(&self, event: ChainEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscriber_receives_published_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(ChainEvent::MintCreated {
            token: "FOO".to_string(),
            entry: MintEntry { mining_reward: 1, airdrop: 0 },
        });
        let received = rx.try_recv().unwrap();
        assert!(matches!(received, ChainEvent::MintCreated { token, .. } if token == "FOO"));
    }
}
