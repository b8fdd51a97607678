pub mod gossip;
pub mod peer;
pub mod protocol;

pub use gossip::GossipHub;
pub use peer::{run_outbound_peer, PeerHandle};
pub use protocol::GossipEnvelope;
