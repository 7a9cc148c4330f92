//! tablekv Core Library
//!
//! This crate provides a key-value storage adapter over table-style storage.
//! Records are grouped into collections (the table partition) and addressed
//! by key (the row key). Every write is stamped with an opaque version token
//! used for optimistic concurrency.
//!
//! # Quick Start
//!
//! ```text
//! let config = Config::load()?;
//! let container = KeyValueContainer::from_config(&config.services())?;
//!
//! let record = container.create("devices", "d1", "{}").await?;
//! container.upsert("devices", "d1", "{\"on\":true}", Some(record.version())).await?;
//!
//! let all = container.list_all("devices").await?;
//! ```
//!
//! # Modules
//!
//! - `container`: The key-value container (main entry point)
//! - `model`: Records, version tokens and health status
//! - `error`: Domain error taxonomy
//! - `backend`: Table service traits, error classification and implementations
//! - `config`: Application configuration

pub mod backend;
pub mod config;
pub mod container;
pub mod error;
pub mod model;

pub use backend::{connect, BackendError, FailureKind, StorageBackend, Table, TableService};
pub use config::{Config, ServicesConfig};
pub use container::{sanitize_table_name, KeyValueContainer};
pub use error::{Error, Result};
pub use model::{Record, StatusResult, VersionToken};
