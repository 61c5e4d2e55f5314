//! orca-core: configuration shared by every Orca crate.
//!
//! The orchestrator reads a single `orca.toml`. Each section has sane
//! defaults so an empty file (or no file at all) yields a working
//! single-node setup backed by a local redb store.

pub mod config;
pub mod duration;

pub use config::{
    ConfigError, Configuration, InfrastructureConfig, LockConfig, ServerConfig, StoreConfig,
};
pub use duration::parse_duration;
