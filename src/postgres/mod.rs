//! PostgreSQL access for extension management
//!
//! - `client`: the [`ExtensionClient`] and [`ClientFactory`] traits
//! - `connection`: pooled tokio-postgres implementation
//! - `sql`: statement builders and quoting

pub mod client;
pub mod connection;
pub mod sql;

pub use client::{ClientFactory, ExtensionClient, Observation};
pub use connection::{
    ConnectionDetails, KubeClientFactory, PgExtensionClient, PoolCache, PostgresClientError,
};
