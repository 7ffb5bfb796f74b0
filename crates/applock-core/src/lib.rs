//! Core of the app locker: which apps are locked, how the user proves who
//! they are, and the monitor that decides when to ask.

pub mod config;
pub mod credentials;
pub mod crypto;
pub mod error;
pub mod grace;
pub mod locker;
pub mod monitor;
pub mod paths;
pub mod registry;
pub mod session;
pub mod settings;
pub mod store;
pub mod vault;
pub mod verifier;

pub use config::LockerConfig;
pub use error::{LockError, Result};
pub use locker::AppLocker;
pub use settings::AuthMethod;
pub use store::{MemoryStore, RecordStore};
pub use vault::Vault;
