pub mod db;

pub use db::{BlockStore, StorageError};
