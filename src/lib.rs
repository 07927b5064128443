pub mod bus;
pub mod collections;
pub mod config;
pub mod error;
pub mod hub;
pub mod kv;
mod legacy;
pub mod models;
pub mod poll;
pub mod store;
pub mod workflows;

pub use bus::{Change, Origin, Subscription};
pub use collections::Collection;
pub use config::Config;
pub use error::{ActionError, StoreError};
pub use hub::{Hub, Mount, Toast};
pub use kv::{Backend, MemoryBackend, SqliteBackend};
pub use store::Store;
