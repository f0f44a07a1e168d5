//! Sensa collector
//!
//! Server side of the snapshot ingestion pipeline:
//!
//! ```text
//! client ──frame──▶ Collector ─▶ Handler ─▶ Publisher ─┬─▶ raw_snapshot (fan-out) ─▶ parsers
//!                                                    └─▶ parse_results (topic) ──▶ saver
//! ```
//!
//! Parsers consume the fan-out and publish their projections back onto
//! `parse_results`, where the saver persists them by natural key.

pub mod broker;
pub mod config;
pub mod error;
pub mod handler;
pub mod parsers;
pub mod publisher;
pub mod records;
pub mod saver;
pub mod server;
pub mod signal;
pub mod store;
pub mod topics;

// Re-export commonly used types
pub use broker::{Broker, BrokerRegistry, BrokerUrl, Exchange, MemoryBroker};
pub use config::SensaConfig;
pub use error::{Error, Result};
pub use handler::{Disposition, Handler};
pub use parsers::{Parser, ParserConsumer, ParserRegistry};
pub use publisher::Publisher;
pub use saver::{FileStore, Saver, Store, Upsert};
pub use server::Collector;
pub use store::SnapshotStore;
