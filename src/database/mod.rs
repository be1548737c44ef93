//! Master/replica routing over sqlx pools

pub mod config;
pub mod connection;
pub mod driver;
pub mod logical;
pub mod queryable;
pub mod selector;
pub mod statement;
pub mod transaction;
pub mod value;

pub use config::{ClusterConfig, ClusterConfigBuilder, PoolSettings};
pub use connection::{PhysicalConnection, QueryResult, Role};
pub use driver::{sanitize_url, split_data_source_names, Driver, DSN_SEPARATOR};
pub use logical::{Database, QueryRowRouter};
pub use queryable::Queryable;
pub use selector::ReplicaSelector;
pub use statement::{PhysicalStatement, Route, Statement};
pub use transaction::{IsolationLevel, TxOptions};
pub use value::SqlValue;
