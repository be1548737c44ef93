use thiserror::Error;

pub mod context;

pub type Result<T> = std::result::Result<T, Error>;

// Re-export context helpers
pub use context::{ErrorChain, ErrorContext};

/// Main error type for splitdb
///
/// Errors produced by the database client are carried unmodified in
/// [`Error::Database`]; every other variant is raised by the routing layer
/// itself (bad input, deadlines, panicking fan-out branches).
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error("Unknown database driver: {0}")]
    UnknownDriver(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Fan-out branch {index} panicked: {message}")]
    TaskPanicked { index: usize, message: String },

    #[error("Statement is closed")]
    StatementClosed,

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Error with context chain
    #[error("{message}")]
    WithContext {
        message: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn unknown_driver(name: impl Into<String>) -> Self {
        Self::UnknownDriver(name.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    // Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            message: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether the error reports use of a closed pool or statement
    pub fn is_closed(&self) -> bool {
        match self {
            Error::Database(sqlx::Error::PoolClosed) => true,
            Error::StatementClosed => true,
            Error::WithContext { source, .. } => source.is_closed(),
            _ => false,
        }
    }

    /// Whether the error reports an elapsed deadline
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Timeout(_) | Error::Database(sqlx::Error::PoolTimedOut) => true,
            Error::WithContext { source, .. } => source.is_timeout(),
            _ => false,
        }
    }

    /// Get a stable error code for logs and callers
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Database(sqlx::Error::PoolClosed) => "E_DB_CLOSED",
            Error::Database(sqlx::Error::PoolTimedOut) => "E_DB_POOL_TIMEOUT",
            Error::Database(sqlx::Error::RowNotFound) => "E_DB_NO_ROWS",
            Error::Database(sqlx::Error::Configuration(_)) => "E_DB_CONFIG",
            Error::Database(sqlx::Error::Io(_)) | Error::Database(sqlx::Error::Tls(_)) => {
                "E_DB_CONNECTION"
            }
            Error::Database(_) => "E_DB_QUERY",
            Error::UnknownDriver(_) => "E_UNKNOWN_DRIVER",
            Error::InvalidInput(_) => "E_INVALID_INPUT",
            Error::Config(_) => "E_CONFIG",
            Error::Timeout(_) => "E_TIMEOUT",
            Error::TaskPanicked { .. } => "E_TASK_PANICKED",
            Error::StatementClosed => "E_STMT_CLOSED",
            Error::Unsupported(_) => "E_UNSUPPORTED",
            Error::Io(_) => "E_IO",
            Error::WithContext { source, .. } => source.error_code(),
        }
    }
}
