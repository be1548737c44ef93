//! Transaction options
//!
//! Transactions always run on the master; this module only knows how to
//! start one with the requested characteristics.

use crate::database::driver::Driver;
use crate::error::{Error, Result};
use sqlx::any::Any;
use sqlx::{AnyPool, Transaction};
use std::fmt;

/// SQL standard isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        })
    }
}

/// Options for [`Database::begin_with`](crate::Database::begin_with)
///
/// The default leaves isolation and access mode to the driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxOptions {
    pub isolation: Option<IsolationLevel>,
    pub read_only: bool,
}

impl TxOptions {
    pub fn isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation = Some(level);
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn is_default(&self) -> bool {
        self.isolation.is_none() && !self.read_only
    }

    /// `SET TRANSACTION` statement for these options, if any are set
    fn set_transaction_sql(&self) -> Option<String> {
        if self.is_default() {
            return None;
        }

        let mut modes = Vec::new();
        if let Some(level) = self.isolation {
            modes.push(format!("ISOLATION LEVEL {}", level));
        }
        if self.read_only {
            modes.push("READ ONLY".to_string());
        }
        Some(format!("SET TRANSACTION {}", modes.join(", ")))
    }
}

/// Begin a transaction on `pool` with `options`
///
/// Non-default options are applied with `SET TRANSACTION` as the first
/// statement of the transaction, which only PostgreSQL accepts; other
/// drivers reject them before a transaction is opened.
pub(crate) async fn begin_on(
    pool: &AnyPool,
    driver: Driver,
    options: &TxOptions,
) -> Result<Transaction<'static, Any>> {
    let Some(sql) = options.set_transaction_sql() else {
        return Ok(pool.begin().await?);
    };

    if driver != Driver::Postgres {
        return Err(Error::unsupported(format!(
            "transaction options {:?} are not supported by the {} driver",
            options, driver
        )));
    }

    let mut tx = pool.begin().await?;
    sqlx::query(&sql).execute(&mut *tx).await?;
    Ok(tx)
}
