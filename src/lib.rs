//! # kece - Line-Protocol Key-Value Front-End
//!
//! A concurrent TCP server that accepts many clients, frames their newline
//! delimited requests, enforces an optional shared-secret AUTH mode and
//! dispatches GET/SET/DEL to a pluggable storage engine. SET may carry a TTL,
//! in which case a timer deletes the key once it elapses.
//!
//! ## Modules
//! - **`config`**: Layered configuration (TOML file, `KECE_*` env, CLI)
//! - **`protocol`**: Frame grammar, commands and replies
//! - **`server`**: Listener, event loop, connection readers, dispatcher, expiry
//! - **`store`**: The `Storage` capability and its engines

pub mod config;
pub mod protocol;
pub mod server;
pub mod store;

pub use config::Config;
pub use protocol::{Command, ProtocolError, Reply};
pub use server::Server;
pub use store::{RwLockEngine, SledEngine, Storage, StoreError};
