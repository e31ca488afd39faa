//! Transactional repository layer for the multi-tenant data model.
//!
//! Every read goes through the [`query_builder`] and the [`rows`] scanner;
//! every write is a [`transaction::TransactionPlan`] that commits its rows
//! together with at least one audit log entry.

pub mod config;
pub mod error;
pub mod executor;
pub mod id_strategy;
pub mod migrate;
pub mod models;
pub mod postgres;
pub mod querier;
pub mod query_builder;
pub mod repositories;
pub mod rows;
pub mod schema;
pub mod transaction;

#[cfg(test)]
pub(crate) mod testing;

use sqlx::postgres::PgPoolOptions;

pub use config::{ConfigError, DatabaseConfig, TestUserConfig};
pub use error::{ErrorContext, RepoError, RepoResult};
pub use id_strategy::IdRetrievalStrategy;
pub use postgres::PostgresDatabase;
pub use querier::{Querier, QuerierConfig};

pub type DbPool = sqlx::PgPool;

/// Create a lazily-connecting pool; the readiness ping loop in
/// [`Querier::migrate`] is what waits for the server.
pub fn create_pool(config: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect_lazy(&config.url)
}
