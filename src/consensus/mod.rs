pub mod blockchain;
pub mod events;
pub mod mempool;
pub mod metrics;
pub mod params;
pub mod state;
pub mod validator;

pub use blockchain::{ChainError, ChainManager, ReplayMode};
pub use events::{ChainEvent, EventBus};
pub use mempool::{Mempool, MempoolError};
pub use metrics::{MetricsCollector, NodeMetrics};
pub use state::StateIndex;
pub use validator::{check_block, check_tx, BlockCheckContext, TxCheckFlags, ValidationError};
