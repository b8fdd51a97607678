pub mod handlers;

pub use handlers::{create_router, ApiState};
