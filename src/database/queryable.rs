//! Common query surface of a logical database and a single physical one

use crate::database::connection::{PhysicalConnection, QueryResult};
use crate::database::logical::Database;
use crate::database::value::SqlValue;
use crate::error::Result;
use async_trait::async_trait;
use sqlx::any::AnyRow;

/// Something SQL can be sent to
///
/// [`Database`] routes each call (writes to the master, reads to a replica);
/// [`PhysicalConnection`] runs it where it is.
#[async_trait]
pub trait Queryable: Send + Sync {
    /// Execute a statement that returns no rows
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult>;

    /// Fetch every row of a query
    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<AnyRow>>;

    /// Fetch at most one row of a query
    async fn query_row(&self, sql: &str, params: &[SqlValue]) -> Result<Option<AnyRow>>;
}

#[async_trait]
impl Queryable for Database {
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult> {
        Database::execute(self, sql, params).await
    }

    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<AnyRow>> {
        Database::query(self, sql, params).await
    }

    async fn query_row(&self, sql: &str, params: &[SqlValue]) -> Result<Option<AnyRow>> {
        Database::query_row(self, sql, params).await
    }
}

#[async_trait]
impl Queryable for PhysicalConnection {
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult> {
        PhysicalConnection::execute(self, sql, params).await
    }

    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<AnyRow>> {
        PhysicalConnection::query(self, sql, params).await
    }

    async fn query_row(&self, sql: &str, params: &[SqlValue]) -> Result<Option<AnyRow>> {
        PhysicalConnection::query_row(self, sql, params).await
    }
}
