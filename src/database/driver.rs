//! Driver identifiers and data source names
//!
//! A logical database is opened from a driver identifier and a `;`-separated
//! list of data source names. This module turns those two strings into one
//! connection URL per physical connection, master first.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Separator between data source names; the first entry is the master
pub const DSN_SEPARATOR: char = ';';

/// Database backend served by a driver identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    #[serde(alias = "sqlite3")]
    Sqlite,
    #[serde(alias = "postgresql", alias = "pg")]
    Postgres,
    #[serde(alias = "mariadb")]
    MySql,
}

impl Driver {
    /// Canonical identifier
    pub fn name(&self) -> &'static str {
        match self {
            Driver::Sqlite => "sqlite",
            Driver::Postgres => "postgres",
            Driver::MySql => "mysql",
        }
    }

    /// URL schemes this driver accepts
    pub fn schemes(&self) -> &'static [&'static str] {
        match self {
            Driver::Sqlite => &["sqlite"],
            Driver::Postgres => &["postgres", "postgresql"],
            Driver::MySql => &["mysql", "mariadb"],
        }
    }

    /// Turn one data source name into a connection URL for this driver
    ///
    /// A name carrying one of the driver's schemes is used verbatim. A bare
    /// SQLite name (`:memory:`, a file path) gets the `sqlite:` prefix.
    pub fn url_for(&self, dsn: &str) -> Result<String> {
        let dsn = dsn.trim();
        if dsn.is_empty() {
            return Err(Error::invalid_input("empty data source name"));
        }

        if let Some(scheme) = scheme_of(dsn) {
            if self.schemes().contains(&scheme.as_str()) {
                return Ok(dsn.to_string());
            }
            if Driver::for_scheme(&scheme).is_some() {
                return Err(Error::invalid_input(format!(
                    "data source '{}' does not belong to driver '{}'",
                    sanitize_url(dsn),
                    self
                )));
            }
        }

        match self {
            Driver::Sqlite => Ok(format!("sqlite:{}", dsn)),
            Driver::Postgres | Driver::MySql => Err(Error::invalid_input(format!(
                "data source '{}' is not a {} URL",
                sanitize_url(dsn),
                self
            ))),
        }
    }

    /// Whether `url` names an in-memory database
    ///
    /// Each new connection to a private in-memory SQLite database starts
    /// empty, so such a database must live on exactly one connection.
    pub fn is_in_memory(&self, url: &str) -> bool {
        *self == Driver::Sqlite && (url.contains(":memory:") || url.contains("mode=memory"))
    }

    fn for_scheme(scheme: &str) -> Option<Driver> {
        [Driver::Sqlite, Driver::Postgres, Driver::MySql]
            .into_iter()
            .find(|driver| driver.schemes().contains(&scheme))
    }
}

impl FromStr for Driver {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Driver::Sqlite),
            "postgres" | "postgresql" | "pg" => Ok(Driver::Postgres),
            "mysql" | "mariadb" => Ok(Driver::MySql),
            _ => Err(Error::unknown_driver(s)),
        }
    }
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Split a `;`-separated list into connection URLs, master first
pub fn split_data_source_names(driver: Driver, data_source_names: &str) -> Result<Vec<String>> {
    data_source_names
        .split(DSN_SEPARATOR)
        .enumerate()
        .map(|(i, dsn)| {
            driver.url_for(dsn).map_err(|e| {
                e.with_context(format!("data source #{} of '{}'", i, driver))
            })
        })
        .collect()
}

/// Mask the password of a connection URL for logging
pub fn sanitize_url(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("***"));
            }
            parsed.to_string()
        }
        Err(_) if !url.contains('@') => url.to_string(),
        Err(_) => "[invalid URL]".to_string(),
    }
}

fn scheme_of(dsn: &str) -> Option<String> {
    let (scheme, _) = dsn.split_once(':')?;
    let valid = !scheme.is_empty()
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.');
    valid.then(|| scheme.to_ascii_lowercase())
}
