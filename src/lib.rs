//! splitdb - one logical SQL database over a master and its replicas
//!
//! splitdb presents a master database and any number of read replicas as a
//! single handle:
//! - Writes, transactions and prepared-statement executes go to the master
//! - Reads are spread over the replicas by round robin
//! - Open, close, ping and prepare fan out to every physical database
//!   concurrently and succeed only if every one of them does
//!
//! The database client is [`sqlx`] (through its `Any` driver), so SQLite,
//! PostgreSQL and MySQL are all served by the same types.

// Enforce error handling best practices
#![cfg_attr(
    not(test),
    warn(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
    )
)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used,))]

pub mod error;
pub mod scatter;

// Master/replica routing layer
pub mod database;

pub use database::{
    ClusterConfig, ClusterConfigBuilder, Database, Driver, IsolationLevel, PhysicalConnection,
    PhysicalStatement, PoolSettings, QueryResult, Queryable, ReplicaSelector, Role, Route,
    SqlValue, Statement, TxOptions,
};
pub use error::{Error, Result};

pub mod prelude {
    pub use crate::*;
    pub use crate::error::{ErrorChain, ErrorContext};
    pub use crate::params;
    pub use sqlx::Row;
}
