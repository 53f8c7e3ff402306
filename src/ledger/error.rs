use std::fmt;

/// Ledger store error kinds.
#[derive(Debug, Clone)]
pub enum LedgerErrorKind {
    /// Connection pool is exhausted
    PoolExhausted,
    /// Connection timeout
    ConnectionTimeout,
    /// Record not found
    NotFound {
        entity: String,
        id: String,
    },
    /// Unique constraint violation (e.g., duplicate key)
    UniqueConstraintViolation {
        column: String,
        value: String,
    },
    /// Foreign key constraint violation
    ForeignKeyViolation {
        table: String,
        column: String,
    },
    /// Query execution error
    QueryError {
        message: String,
    },
    /// Transaction error
    TransactionError {
        message: String,
    },
    /// Database connection error
    ConnectionError {
        message: String,
    },
    /// Configuration error
    ConfigError {
        message: String,
    },
    /// Unknown error
    Unknown {
        message: String,
    },
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Clone)]
pub struct LedgerError {
    pub kind: LedgerErrorKind,
    pub context: Option<String>,
    pub is_retryable: bool,
}

impl LedgerError {
    pub fn new(kind: LedgerErrorKind) -> Self {
        let is_retryable = matches!(
            kind,
            LedgerErrorKind::ConnectionTimeout
                | LedgerErrorKind::PoolExhausted
                | LedgerErrorKind::ConnectionError { .. }
        );

        Self {
            kind,
            context: None,
            is_retryable,
        }
    }

    pub fn with_context<S: Into<String>>(mut self, context: S) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.is_retryable
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.kind, LedgerErrorKind::NotFound { .. })
    }

    /// Map a SQLx error to our own error type.
    pub fn from_sqlx(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::RowNotFound => Self::new(LedgerErrorKind::NotFound {
                entity: "Record".to_string(),
                id: "unknown".to_string(),
            }),
            sqlx::Error::PoolTimedOut => Self::new(LedgerErrorKind::PoolExhausted),
            sqlx::Error::PoolClosed => Self::new(LedgerErrorKind::ConnectionError {
                message: "Connection pool is closed".to_string(),
            }),
            sqlx::Error::Configuration(msg) => Self::new(LedgerErrorKind::ConfigError {
                message: msg.to_string(),
            }),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code();
                match code.as_deref() {
                    Some("23505") => {
                        // Unique constraint violation (Postgres code)
                        Self::new(LedgerErrorKind::UniqueConstraintViolation {
                            column: "unknown".to_string(),
                            value: "provided value".to_string(),
                        })
                    }
                    Some("23503") => {
                        // Foreign key constraint violation (Postgres code)
                        Self::new(LedgerErrorKind::ForeignKeyViolation {
                            table: "unknown".to_string(),
                            column: "unknown".to_string(),
                        })
                    }
                    _ => Self::new(LedgerErrorKind::QueryError {
                        message: db_err.message().to_string(),
                    }),
                }
            }
            sqlx::Error::Io(io_err) => Self::new(LedgerErrorKind::ConnectionError {
                message: io_err.to_string(),
            }),
            _ => Self::new(LedgerErrorKind::Unknown {
                message: error.to_string(),
            }),
        }
    }
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match &self.kind {
            LedgerErrorKind::PoolExhausted => {
                "Ledger connection pool exhausted. Please try again.".to_string()
            }
            LedgerErrorKind::ConnectionTimeout => {
                "Ledger connection timed out. Please try again.".to_string()
            }
            LedgerErrorKind::NotFound { entity, id } => {
                format!("{} with ID '{}' not found", entity, id)
            }
            LedgerErrorKind::UniqueConstraintViolation { column, value } => {
                format!("A record with {} '{}' already exists", column, value)
            }
            LedgerErrorKind::ForeignKeyViolation { table, column } => {
                format!(
                    "Cannot perform operation: referenced {} in {} does not exist",
                    column, table
                )
            }
            LedgerErrorKind::QueryError { message } => {
                format!("Ledger query failed: {}", message)
            }
            LedgerErrorKind::TransactionError { message } => {
                format!("Transaction failed: {}", message)
            }
            LedgerErrorKind::ConnectionError { message } => {
                format!("Ledger connection error: {}", message)
            }
            LedgerErrorKind::ConfigError { message } => {
                format!("Ledger configuration error: {}", message)
            }
            LedgerErrorKind::Unknown { message } => {
                format!("Unknown ledger error: {}", message)
            }
        };

        if let Some(context) = &self.context {
            write!(f, "{} ({})", message, context)
        } else {
            write!(f, "{}", message)
        }
    }
}

impl std::error::Error for LedgerError {}

impl PartialEq for LedgerError {
    fn eq(&self, other: &Self) -> bool {
        // For testing purposes
        format!("{:?}", self.kind) == format!("{:?}", other.kind)
    }
}
