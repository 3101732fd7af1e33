//! # Streamform Registry
//!
//! [`SchemaRegistryPort`](streamform_core::SchemaRegistryPort) over the
//! Confluent schema registry REST API. Works with Confluent Schema Registry
//! and compatible servers (Apicurio in Confluent mode, Redpanda).
//!
//! | Operation | Endpoint |
//! |-----------|----------|
//! | list subjects | `GET /subjects` |
//! | latest version | `GET /subjects/{subject}/versions/latest` |
//! | register | `POST /subjects/{subject}/versions` |
//! | delete subject | `DELETE /subjects/{subject}` |
//! | check compatibility | `POST /compatibility/subjects/{subject}/versions/latest` |
//! | subject compatibility | `GET`/`PUT /config/{subject}` |

pub mod client;
pub mod config;

pub use client::{status_error, HttpSchemaRegistry};
pub use config::RegistryClientConfig;
