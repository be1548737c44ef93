//! Logical database: one master, any number of replicas
//!
//! [`Database`] presents several physical databases as one. Writes,
//! transactions and prepared-statement executes go to the master; reads go to
//! a replica picked by round robin. Bulk operations (open, close, ping,
//! prepare) fan out to every physical connection concurrently.
//!
//! ```no_run
//! # async fn demo() -> splitdb::Result<()> {
//! use splitdb::{params, Database};
//!
//! let db = Database::open(
//!     "postgres",
//!     "postgres://app@primary/app;postgres://app@replica-1/app;postgres://app@replica-2/app",
//! )
//! .await?;
//!
//! db.execute("UPDATE users SET active = $1 WHERE id = $2", &params![true, 7i64]).await?;
//! let rows = db.query("SELECT id FROM users WHERE active = $1", &params![true]).await?;
//! # let _ = rows;
//! db.close().await?;
//! # Ok(())
//! # }
//! ```

use crate::database::config::{ClusterConfig, PoolSettings};
use crate::database::connection::{PhysicalConnection, QueryResult};
use crate::database::driver::{split_data_source_names, Driver};
use crate::database::selector::ReplicaSelector;
use crate::database::statement::{PhysicalStatement, Route, Statement};
use crate::database::transaction::TxOptions;
use crate::database::value::SqlValue;
use crate::error::{Error, ErrorChain, Result};
use crate::scatter::{self, PartialFailure};
use sqlx::any::{Any, AnyRow};
use sqlx::Transaction;
use std::time::Duration;
use tokio::time::Instant;

/// Caller-supplied routing for [`Database::query_row`]
pub type QueryRowRouter = Box<dyn Fn(&str) -> Route + Send + Sync>;

/// A logical database over one master and zero or more replicas
pub struct Database {
    connections: Vec<PhysicalConnection>,
    selector: ReplicaSelector,
    query_row_router: Option<QueryRowRouter>,
}

impl Database {
    /// Open every physical database concurrently
    ///
    /// `data_source_names` is a `;`-separated list; the first entry is the
    /// master, the rest are replicas in routing order. If any connection
    /// fails to open, the ones that did open are closed again and one of the
    /// errors is returned.
    pub async fn open(driver: &str, data_source_names: &str) -> Result<Self> {
        let driver = driver.parse::<Driver>()?;
        Self::open_with(driver, data_source_names, PoolSettings::default()).await
    }

    /// Open the topology described by `config`
    pub async fn open_with_config(config: &ClusterConfig) -> Result<Self> {
        Self::open_with(config.driver, &config.data_source_names(), config.pool.clone()).await
    }

    /// Open with explicit pool settings for every physical connection
    pub async fn open_with(
        driver: Driver,
        data_source_names: &str,
        settings: PoolSettings,
    ) -> Result<Self> {
        let urls = split_data_source_names(driver, data_source_names)?;
        log::info!(
            "Opening logical {} database with {} connection(s) (1 master, {} replica(s))",
            driver,
            urls.len(),
            urls.len() - 1
        );

        let outcomes = scatter::gather(urls.len(), |i| {
            PhysicalConnection::open(i, driver, &urls[i], settings.clone())
        })
        .await;
        Self::from_outcomes(outcomes).await
    }

    /// Assemble the per-connection open outcomes, master first
    ///
    /// Any failure closes the connections that did open.
    async fn from_outcomes(outcomes: Vec<Result<PhysicalConnection>>) -> Result<Self> {
        let total = outcomes.len();
        match scatter::settle(outcomes) {
            Ok(connections) => {
                for conn in &connections {
                    log::info!("  #{} {:?}: {}", conn.index(), conn.role(), conn.url());
                }
                Self::from_connections(connections)
            }
            Err(PartialFailure {
                error,
                failed,
                succeeded,
            }) => {
                log::error!(
                    "Failed to open {} of {} connection(s): {}",
                    failed,
                    total,
                    ErrorChain::new(&error)
                );
                if !succeeded.is_empty() {
                    log::warn!("Closing {} connection(s) that did open", succeeded.len());
                    let _ = scatter::gather(succeeded.len(), |i| succeeded[i].close()).await;
                }
                Err(error)
            }
        }
    }

    /// Build a logical database from already-open connections, master first
    pub fn from_connections(connections: Vec<PhysicalConnection>) -> Result<Self> {
        if connections.is_empty() {
            return Err(Error::invalid_input(
                "a logical database needs at least a master connection",
            ));
        }
        if let Some(i) = connections.iter().enumerate().position(|(i, c)| c.index() != i) {
            return Err(Error::invalid_input(format!(
                "connection at position {} reports index {}",
                i,
                connections[i].index()
            )));
        }

        Ok(Self {
            connections,
            selector: ReplicaSelector::new(),
            query_row_router: None,
        })
    }

    /// Close every physical database concurrently
    ///
    /// Every connection is closed even when one of them fails.
    pub async fn close(&self) -> Result<()> {
        log::info!("Closing logical database ({} connection(s))", self.len());
        scatter::scatter(self.len(), |i| self.connections[i].close()).await?;
        Ok(())
    }

    /// Check that every physical database answers
    pub async fn ping(&self) -> Result<()> {
        scatter::scatter(self.len(), |i| self.connections[i].ping()).await?;
        Ok(())
    }

    /// Like [`ping`](Self::ping), with one deadline shared by every branch
    pub async fn ping_timeout(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        scatter::scatter_until(deadline, self.len(), |i| self.connections[i].ping()).await?;
        Ok(())
    }

    /// Start a transaction on the master
    pub async fn begin(&self) -> Result<Transaction<'static, Any>> {
        self.master().begin(&TxOptions::default()).await
    }

    /// Start a transaction on the master with explicit options
    pub async fn begin_with(&self, options: TxOptions) -> Result<Transaction<'static, Any>> {
        self.master().begin(&options).await
    }

    /// Execute a statement on the master
    pub async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult> {
        self.master().execute(sql, params).await
    }

    /// Run a query on a replica
    pub async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<AnyRow>> {
        self.replica().query(sql, params).await
    }

    /// Fetch at most one row
    ///
    /// Served by a replica unless a router installed with
    /// [`set_query_row_router`](Self::set_query_row_router) sends `sql` to
    /// the master.
    pub async fn query_row(&self, sql: &str, params: &[SqlValue]) -> Result<Option<AnyRow>> {
        let route = self
            .query_row_router
            .as_ref()
            .map(|router| router(sql))
            .unwrap_or_default();

        let conn = match route {
            Route::RequireMaster => self.master(),
            Route::PreferReplica => self.replica(),
        };
        conn.query_row(sql, params).await
    }

    /// Decide per query text where [`query_row`](Self::query_row) is served
    pub fn set_query_row_router<F>(&mut self, router: F)
    where
        F: Fn(&str) -> Route + Send + Sync + 'static,
    {
        self.query_row_router = Some(Box::new(router));
    }

    /// Prepare `sql` on every physical database concurrently
    ///
    /// Succeeds only if every connection compiles the statement; otherwise
    /// the copies that did compile are released and one error is returned.
    pub async fn prepare(&self, sql: &str) -> Result<Statement<'_>> {
        let outcomes = scatter::gather(self.len(), |i| self.connections[i].prepare(sql)).await;
        self.assemble(sql, outcomes).await
    }

    /// Like [`prepare`](Self::prepare), with one deadline shared by every
    /// branch
    pub async fn prepare_timeout(&self, sql: &str, timeout: Duration) -> Result<Statement<'_>> {
        let deadline = Instant::now() + timeout;
        let outcomes =
            scatter::gather_until(deadline, self.len(), |i| self.connections[i].prepare(sql))
                .await;
        self.assemble(sql, outcomes).await
    }

    async fn assemble(
        &self,
        sql: &str,
        outcomes: Vec<Result<PhysicalStatement>>,
    ) -> Result<Statement<'_>> {
        match scatter::settle(outcomes) {
            Ok(handles) => Ok(Statement::new(self, handles)),
            Err(PartialFailure {
                error,
                failed,
                succeeded,
            }) => {
                log::warn!(
                    "Prepare failed on {} of {} connection(s), releasing {} prepared cop(ies): {}",
                    failed,
                    self.len(),
                    succeeded.len(),
                    sql
                );
                let _ = scatter::gather(succeeded.len(), |i| succeeded[i].close()).await;
                Err(error)
            }
        }
    }

    /// Maximum open connections, applied to every physical database
    pub fn set_max_connections(&self, max: u32) {
        for conn in &self.connections {
            conn.set_max_connections(max);
        }
    }

    /// Idle connections kept open, applied to every physical database
    pub fn set_min_connections(&self, min: u32) {
        for conn in &self.connections {
            conn.set_min_connections(min);
        }
    }

    pub fn set_idle_timeout(&self, timeout: Option<Duration>) {
        for conn in &self.connections {
            conn.set_idle_timeout(timeout);
        }
    }

    pub fn set_max_lifetime(&self, lifetime: Option<Duration>) {
        for conn in &self.connections {
            conn.set_max_lifetime(lifetime);
        }
    }

    /// The master physical database
    pub fn master(&self) -> &PhysicalConnection {
        &self.connections[0]
    }

    /// A replica chosen by round robin (the master if there are none)
    pub fn replica(&self) -> &PhysicalConnection {
        &self.connections[self.replica_index()]
    }

    pub(crate) fn replica_index(&self) -> usize {
        self.selector.next(self.len())
    }

    /// Every physical database, master first
    pub fn connections(&self) -> &[PhysicalConnection] {
        &self.connections
    }

    /// Number of physical databases, master included
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Always false: there is at least a master
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Physical database at `index`; 0 is the master
    pub fn connection(&self, index: usize) -> Option<&PhysicalConnection> {
        self.connections.get(index)
    }

    /// Backend of the master
    pub fn backend(&self) -> Driver {
        self.master().driver()
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("connections", &self.connections)
            .field("selections", &self.selector.count())
            .field("query_row_router", &self.query_row_router.is_some())
            .finish()
    }
}
