//! Prepared statements replicated over every physical connection
//!
//! [`Database::prepare`](crate::Database::prepare) compiles the same SQL on
//! the master and on every replica. The resulting [`Statement`] follows the
//! facade's routing rules: executes go to the master's copy, queries to a
//! replica's copy unless the caller asks for the master.

use crate::database::connection::{PhysicalConnection, QueryResult};
use crate::database::logical::Database;
use crate::database::value::{bind_all, SqlValue};
use crate::error::{Error, Result};
use crate::scatter;
use sqlx::any::{AnyRow, AnyStatement};
use sqlx::Statement as _;
use std::sync::atomic::{AtomicBool, Ordering};

/// Where a read should be served from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Route {
    /// A replica picked by round robin (the master when there are none)
    #[default]
    PreferReplica,
    /// The master, for reads that must observe the caller's own writes
    RequireMaster,
}

/// A statement prepared on one physical connection
pub struct PhysicalStatement {
    index: usize,
    statement: AnyStatement<'static>,
    closed: AtomicBool,
}

impl PhysicalStatement {
    pub(crate) fn new(index: usize, statement: AnyStatement<'static>) -> Self {
        Self {
            index,
            statement,
            closed: AtomicBool::new(false),
        }
    }

    /// Index of the physical connection this statement was prepared on
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn sql(&self) -> &str {
        self.statement.sql()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Release the statement; closing twice is not an error
    ///
    /// sqlx pools cache prepared statements per connection and offer no way
    /// to release one, so closing only stops this handle from being used.
    pub async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::StatementClosed);
        }
        Ok(())
    }

    pub async fn execute(
        &self,
        conn: &PhysicalConnection,
        params: &[SqlValue],
    ) -> Result<QueryResult> {
        self.ensure_open()?;
        let result = bind_all(self.statement.query(), params)
            .execute(&conn.pool())
            .await?;
        Ok(result.into())
    }

    pub async fn query(&self, conn: &PhysicalConnection, params: &[SqlValue]) -> Result<Vec<AnyRow>> {
        self.ensure_open()?;
        let rows = bind_all(self.statement.query(), params)
            .fetch_all(&conn.pool())
            .await?;
        Ok(rows)
    }

    pub async fn query_row(
        &self,
        conn: &PhysicalConnection,
        params: &[SqlValue],
    ) -> Result<Option<AnyRow>> {
        self.ensure_open()?;
        let row = bind_all(self.statement.query(), params)
            .fetch_optional(&conn.pool())
            .await?;
        Ok(row)
    }
}

/// Aggregate prepared statement
///
/// Holds one [`PhysicalStatement`] per physical connection of the database
/// it was prepared on, in the same order.
pub struct Statement<'db> {
    db: &'db Database,
    handles: Vec<PhysicalStatement>,
}

impl<'db> Statement<'db> {
    pub(crate) fn new(db: &'db Database, handles: Vec<PhysicalStatement>) -> Self {
        debug_assert_eq!(handles.len(), db.len());
        debug_assert!(handles.iter().enumerate().all(|(i, h)| h.index() == i));
        Self { db, handles }
    }

    pub fn sql(&self) -> &str {
        self.handles[0].sql()
    }

    /// Per-connection statements, master first
    pub fn handles(&self) -> &[PhysicalStatement] {
        &self.handles
    }

    /// Close every per-connection statement concurrently
    ///
    /// All handles are closed even if one fails; one of the errors is
    /// returned.
    pub async fn close(&self) -> Result<()> {
        scatter::scatter(self.handles.len(), |i| self.handles[i].close()).await?;
        Ok(())
    }

    /// Execute on the master
    pub async fn execute(&self, params: &[SqlValue]) -> Result<QueryResult> {
        self.handles[0].execute(self.db.master(), params).await
    }

    /// Query a replica
    pub async fn query(&self, params: &[SqlValue]) -> Result<Vec<AnyRow>> {
        self.query_on(Route::PreferReplica, params).await
    }

    /// Query at most one row from a replica
    pub async fn query_row(&self, params: &[SqlValue]) -> Result<Option<AnyRow>> {
        self.query_row_on(Route::PreferReplica, params).await
    }

    /// Query the connection chosen by `route`
    pub async fn query_on(&self, route: Route, params: &[SqlValue]) -> Result<Vec<AnyRow>> {
        let (handle, conn) = self.target(route);
        handle.query(conn, params).await
    }

    /// Query at most one row from the connection chosen by `route`
    pub async fn query_row_on(&self, route: Route, params: &[SqlValue]) -> Result<Option<AnyRow>> {
        let (handle, conn) = self.target(route);
        handle.query_row(conn, params).await
    }

    fn target(&self, route: Route) -> (&PhysicalStatement, &'db PhysicalConnection) {
        let index = match route {
            Route::RequireMaster => 0,
            Route::PreferReplica => self.db.replica_index(),
        };
        log::debug!("Routing prepared query {:?} to connection #{}", route, index);
        (&self.handles[index], &self.db.connections()[index])
    }
}

impl std::fmt::Debug for Statement<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Statement")
            .field("sql", &self.sql())
            .field("handles", &self.handles.len())
            .finish()
    }
}
