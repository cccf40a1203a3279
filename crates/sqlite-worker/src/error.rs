use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database already initialized")]
    AlreadyInitialized,

    #[error("database not initialized")]
    NotInitialized,

    #[error("failed to start database worker: {0}")]
    StartupFailed(String),

    #[error("query failed: {0}")]
    QueryFailed(String),

    #[error("execute failed: {0}")]
    ExecuteFailed(String),

    #[error("transaction failed: {0}")]
    TransactionFailed(String),

    #[error("db worker unavailable")]
    WorkerUnavailable,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl DbError {
    pub fn code(&self) -> &'static str {
        match self {
            DbError::AlreadyInitialized => "ALREADY_INITIALIZED",
            DbError::NotInitialized => "NOT_INITIALIZED",
            DbError::StartupFailed(_) => "STARTUP_FAILED",
            DbError::QueryFailed(_) => "QUERY_FAILED",
            DbError::ExecuteFailed(_) => "EXECUTE_FAILED",
            DbError::TransactionFailed(_) => "TRANSACTION_FAILED",
            DbError::WorkerUnavailable => "WORKER_UNAVAILABLE",
            DbError::InvalidRequest(_) => "INVALID_REQUEST",
            DbError::Io(_) => "IO_ERROR",
            DbError::Json(_) => "JSON_ERROR",
            DbError::Internal(_) => "INTERNAL",
        }
    }
}

pub type DbResult<T> = Result<T, DbError>;
