pub mod block;
pub mod mint;
pub mod transaction;

pub use block::Block;
pub use mint::{MintEntry, MintRegistry};
pub use transaction::{MintSpec, Sender, Transaction};
