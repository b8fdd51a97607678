use crate::core::{Block, Transaction};
use serde::{Deserialize, Serialize};

/// The gossip wire format: a JSON envelope carrying one of three event
/// types, one document per WebSocket message.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum GossipEnvelope {
    Tx(Transaction),
    Block(Block),
    /// A short sub-chain proposing a reorg; length must be <= `TAIL`.
    Push(Vec<Block>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Sender;

    #[test]
    fn tx_envelope_matches_wire_shape() {
        let tx = Transaction {
            sender: Sender::Address("alice".to_string()),
            receiver: "bob".to_string(),
            amount: 1,
            signature: "sig".to_string(),
            nonce: 1,
            timestamp: 0,
            token: None,
            unlock: None,
            mint: None,
        };
        let envelope = GossipEnvelope::Tx(tx);
        let value: serde_json::Value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["event"], "tx");
        assert!(value["data"].is_object());
    }
}
