//! Core library for the arcon ingestion orchestrator.
//!
//! Sits between lifecycle-event producers on an AMQP broker and the
//! downstream queues driving archival, accessioning and dataset publication.
//! This crate contains the broker runtime, the three stage transformers, the
//! DOI and access-registry clients, schema validation and configuration;
//! the binaries in `arcon-consumers` wire one stage each to a queue.

pub mod broker;
pub mod config;
pub mod doi;
pub mod error;
pub mod identifier;
pub mod ids;
pub mod messages;
pub mod rems;
pub mod schema;
pub mod stages;

pub use error::*;

/// Returns the version of the arcon-core library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
