//! One physical database behind a logical database
//!
//! A [`PhysicalConnection`] wraps one sqlx pool. It is the only place the
//! routing layer talks to the database client: open, close, ping, prepare,
//! plus the pass-through execute/query/begin calls.

use crate::database::config::PoolSettings;
use crate::database::driver::{sanitize_url, Driver};
use crate::database::statement::PhysicalStatement;
use crate::database::transaction::{self, TxOptions};
use crate::database::value::{bind_all, SqlValue};
use crate::error::Result;
use sqlx::any::{Any, AnyConnectOptions, AnyRow};
use sqlx::{AnyPool, Connection, Executor, Transaction};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::Duration;

/// Result type for statements that modify data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryResult {
    /// Number of rows affected by the query
    pub rows_affected: u64,
    /// Last inserted ID (if the backend reports one)
    pub last_insert_id: Option<i64>,
}

impl From<sqlx::any::AnyQueryResult> for QueryResult {
    fn from(result: sqlx::any::AnyQueryResult) -> Self {
        Self {
            rows_affected: result.rows_affected(),
            last_insert_id: result.last_insert_id(),
        }
    }
}

/// Role of a physical connection inside its logical database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Master,
    Replica,
}

/// A single pooled database, master or replica
pub struct PhysicalConnection {
    index: usize,
    driver: Driver,
    url: String,
    connect_options: AnyConnectOptions,
    settings: Mutex<PoolSettings>,
    pool: RwLock<AnyPool>,
    in_memory: bool,
    closed: AtomicBool,
}

impl PhysicalConnection {
    /// Connect a pool to `url`
    ///
    /// The pool establishes its first connection before this returns, so an
    /// unreachable database fails here rather than on first use. An
    /// in-memory SQLite database is held on a single connection that is
    /// never recycled, whatever `settings` ask for.
    pub async fn open(
        index: usize,
        driver: Driver,
        url: &str,
        settings: PoolSettings,
    ) -> Result<Self> {
        sqlx::any::install_default_drivers();

        let connect_options = AnyConnectOptions::from_str(url)?;
        let in_memory = driver.is_in_memory(url);
        let effective = if in_memory {
            settings.single_connection()
        } else {
            settings.clone()
        };
        let pool = effective
            .pool_options()
            .connect_with(connect_options.clone())
            .await?;

        let connection = Self {
            index,
            driver,
            url: sanitize_url(url),
            connect_options,
            settings: Mutex::new(settings),
            pool: RwLock::new(pool),
            in_memory,
            closed: AtomicBool::new(false),
        };
        log::debug!(
            "Opened {} #{} ({}): {}",
            connection.role_name(),
            index,
            driver,
            connection.url
        );
        Ok(connection)
    }

    /// Position in the logical database; 0 is the master
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn role(&self) -> Role {
        if self.index == 0 {
            Role::Master
        } else {
            Role::Replica
        }
    }

    fn role_name(&self) -> &'static str {
        match self.role() {
            Role::Master => "master",
            Role::Replica => "replica",
        }
    }

    pub fn driver(&self) -> Driver {
        self.driver
    }

    /// Connection URL with the password masked
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Handle to the current underlying pool
    pub fn pool(&self) -> AnyPool {
        self.pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Current pool settings
    pub fn settings(&self) -> PoolSettings {
        self.settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Whether this is an in-memory database pinned to one connection
    pub fn is_in_memory(&self) -> bool {
        self.in_memory
    }

    /// Close the pool, waiting for checked-out connections to be returned
    pub async fn close(&self) -> Result<()> {
        // Marked under the write lock so a concurrent setter cannot swap in
        // a fresh pool after this point.
        let pool = {
            let pool = self.pool.write().unwrap_or_else(PoisonError::into_inner);
            self.closed.store(true, Ordering::SeqCst);
            pool.clone()
        };
        pool.close().await;
        log::debug!("Closed {} #{}", self.role_name(), self.index);
        Ok(())
    }

    /// Check that the database answers, connecting if needed
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.pool().acquire().await?;
        conn.ping().await?;
        Ok(())
    }

    /// Compile `sql` on this database
    pub async fn prepare(&self, sql: &str) -> Result<PhysicalStatement> {
        let pool = self.pool();
        let statement = pool.prepare(sql).await?;
        Ok(PhysicalStatement::new(
            self.index,
            sqlx::Statement::to_owned(&statement),
        ))
    }

    /// Execute a statement that returns no rows
    pub async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult> {
        #[cfg(debug_assertions)]
        log::debug!("EXECUTE on {} #{}: {}", self.role_name(), self.index, sql);

        let result = bind_all(sqlx::query(sql), params)
            .execute(&self.pool())
            .await?;
        Ok(result.into())
    }

    /// Fetch every row of a query
    pub async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<AnyRow>> {
        #[cfg(debug_assertions)]
        log::debug!("QUERY on {} #{}: {}", self.role_name(), self.index, sql);

        let rows = bind_all(sqlx::query(sql), params)
            .fetch_all(&self.pool())
            .await?;
        Ok(rows)
    }

    /// Fetch at most one row of a query
    pub async fn query_row(&self, sql: &str, params: &[SqlValue]) -> Result<Option<AnyRow>> {
        #[cfg(debug_assertions)]
        log::debug!("QUERY_ROW on {} #{}: {}", self.role_name(), self.index, sql);

        let row = bind_all(sqlx::query(sql), params)
            .fetch_optional(&self.pool())
            .await?;
        Ok(row)
    }

    /// Start a transaction on this database
    pub async fn begin(&self, options: &TxOptions) -> Result<Transaction<'static, Any>> {
        transaction::begin_on(&self.pool(), self.driver, options).await
    }

    /// Maximum number of open connections
    pub fn set_max_connections(&self, max: u32) {
        self.retune(|settings| settings.max_connections = max);
    }

    /// Number of idle connections kept open
    pub fn set_min_connections(&self, min: u32) {
        self.retune(|settings| settings.min_connections = min);
    }

    /// How long a connection may sit idle; `None` keeps it forever
    pub fn set_idle_timeout(&self, timeout: Option<Duration>) {
        self.retune(|settings| settings.idle_timeout = timeout.map(|d| d.as_secs()));
    }

    /// How long a connection may be reused; `None` reuses forever
    pub fn set_max_lifetime(&self, lifetime: Option<Duration>) {
        self.retune(|settings| settings.max_lifetime = lifetime.map(|d| d.as_secs()));
    }

    /// Apply new pool settings
    ///
    /// sqlx pools are configured at construction, so a lazily-connected pool
    /// built from the new settings replaces the current one, which is closed
    /// in the background. A closed connection only records the settings, and
    /// so does an in-memory one: replacing its pool would drop the database.
    fn retune(&self, apply: impl FnOnce(&mut PoolSettings)) {
        let settings = {
            let mut guard = self.settings.lock().unwrap_or_else(PoisonError::into_inner);
            apply(&mut guard);
            guard.clone()
        };

        let mut pool = self.pool.write().unwrap_or_else(PoisonError::into_inner);
        if self.is_closed() || self.in_memory {
            log::debug!(
                "Pool settings for {} {} #{} recorded but not applied",
                if self.in_memory { "in-memory" } else { "closed" },
                self.role_name(),
                self.index
            );
            return;
        }

        let fresh = settings
            .pool_options()
            .connect_lazy_with(self.connect_options.clone());
        let previous = std::mem::replace(&mut *pool, fresh);
        drop(pool);

        log::debug!(
            "Retuned {} #{}: max={} min={} idle={:?}s lifetime={:?}s",
            self.role_name(),
            self.index,
            settings.max_connections,
            settings.min_connections,
            settings.idle_timeout,
            settings.max_lifetime
        );

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { previous.close().await });
            }
            Err(_) => drop(previous),
        }
    }
}

impl std::fmt::Debug for PhysicalConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicalConnection")
            .field("index", &self.index)
            .field("driver", &self.driver)
            .field("url", &self.url)
            .field("in_memory", &self.in_memory)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Row;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn memory(index: usize) -> PhysicalConnection {
        PhysicalConnection::open(index, Driver::Sqlite, "sqlite::memory:", PoolSettings::default())
            .await
            .unwrap()
    }

    async fn file(dir: &TempDir, index: usize) -> PhysicalConnection {
        let path = dir.path().join(format!("conn{}.sqlite", index));
        let url = format!("sqlite://{}?mode=rwc", path.display());
        PhysicalConnection::open(index, Driver::Sqlite, &url, PoolSettings::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_open_ping_close() {
        let conn = memory(0).await;
        assert_eq!(conn.role(), Role::Master);
        conn.ping().await.unwrap();

        conn.close().await.unwrap();
        assert!(conn.is_closed());
        let err = conn.ping().await.unwrap_err();
        assert!(err.is_closed());
    }

    #[tokio::test]
    async fn test_execute_and_query_pass_through() {
        let conn = memory(1).await;
        assert_eq!(conn.role(), Role::Replica);

        conn.execute("CREATE TABLE kv (k TEXT, v INTEGER)", &[])
            .await
            .unwrap();
        let result = conn
            .execute(
                "INSERT INTO kv (k, v) VALUES (?, ?)",
                &[SqlValue::from("a"), SqlValue::from(1i64)],
            )
            .await
            .unwrap();
        assert_eq!(result.rows_affected, 1);

        let row = conn
            .query_row("SELECT v FROM kv WHERE k = ?", &[SqlValue::from("a")])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.try_get::<i64, _>("v").unwrap(), 1);

        let missing = conn
            .query_row("SELECT v FROM kv WHERE k = ?", &[SqlValue::from("zz")])
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_in_memory_database_lives_on_one_connection() {
        let conn = memory(0).await;
        assert!(conn.is_in_memory());
        assert_eq!(conn.pool().options().get_max_connections(), 1);

        conn.execute("CREATE TABLE t (x INTEGER)", &[]).await.unwrap();
        conn.execute("INSERT INTO t (x) VALUES (1)", &[]).await.unwrap();

        conn.set_max_connections(8);
        conn.set_idle_timeout(Some(Duration::from_secs(1)));
        assert_eq!(conn.settings().max_connections, 8);
        assert_eq!(conn.pool().options().get_max_connections(), 1);

        let rows = conn.query("SELECT x FROM t", &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_retune_swaps_pool_settings() {
        let dir = TempDir::new().unwrap();
        let conn = file(&dir, 0).await;
        assert!(!conn.is_in_memory());
        conn.execute("CREATE TABLE t (x INTEGER)", &[]).await.unwrap();

        conn.set_max_connections(3);
        conn.set_max_lifetime(Some(Duration::from_secs(60)));

        let settings = conn.settings();
        assert_eq!(settings.max_connections, 3);
        assert_eq!(settings.max_lifetime, Some(60));
        assert_eq!(conn.pool().options().get_max_connections(), 3);
        assert!(conn.query("SELECT x FROM t", &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retune_does_not_reopen_closed_pool() {
        let dir = TempDir::new().unwrap();
        let conn = file(&dir, 0).await;
        conn.close().await.unwrap();

        conn.set_max_connections(4);
        assert_eq!(conn.settings().max_connections, 4);
        assert!(conn.pool().is_closed());
        assert!(conn.ping().await.unwrap_err().is_closed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_close_racing_setters_stays_closed() {
        let dir = TempDir::new().unwrap();
        let conn = Arc::new(file(&dir, 0).await);

        let setters: Vec<_> = (0..4u32)
            .map(|t| {
                let conn = Arc::clone(&conn);
                tokio::task::spawn_blocking(move || {
                    for i in 0..200 {
                        conn.set_max_connections(2 + (t + i) % 4);
                    }
                })
            })
            .collect();
        conn.close().await.unwrap();
        for setter in setters {
            setter.await.unwrap();
        }

        assert!(conn.is_closed());
        assert!(conn.pool().is_closed());
        assert!(conn.ping().await.unwrap_err().is_closed());
    }

    #[tokio::test]
    async fn test_open_rejects_bad_url() {
        let result =
            PhysicalConnection::open(0, Driver::Sqlite, "nosuchscheme://x", PoolSettings::default())
                .await;
        assert!(result.is_err());
    }
}
