//! # Streamform Kafka
//!
//! [`ClusterAdmin`](streamform_core::ClusterAdmin) over
//! [rskafka](https://crates.io/crates/rskafka), a pure Rust Kafka client.
//!
//! | Operation | Support |
//! |-----------|---------|
//! | list/describe topics | metadata (replication factor not reported) |
//! | latest offsets | per-partition `ListOffsets` |
//! | create/delete topics | controller requests |
//! | configs, partition expansion | unsupported |
//! | ACLs, consumer groups, cluster id | unsupported |
//!
//! Unsupported reads leave the matching part of a run unplanned; unsupported
//! writes fail the affected operations.

pub mod admin;
pub mod config;

pub use admin::{transport_error, KafkaAdmin};
pub use config::{parse_brokers, KafkaAdminConfig, SaslPlain};
