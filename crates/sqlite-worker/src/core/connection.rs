use std::{
    future::Future,
    sync::atomic::{AtomicBool, Ordering},
};

use secrecy::SecretString;
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::{
    core::{
        envelope::{Payload, Request, Response},
        options::{DbPath, EngineOptions},
        types::{ExecResult, Row, Value},
        worker::WorkerHandle,
    },
    error::{DbError, DbResult},
};

/// Caller-facing handle to the database worker.
///
/// A `Database` starts out uninitialized. `initialize` spawns the worker that
/// owns the SQLite connection, and `close` stops it again; the same value can
/// be initialized again afterwards. All other operations are `&self` and may
/// be called from many tasks at once.
///
/// ```ignore
/// let db = Database::new();
/// db.initialize(":memory:", None).await?;
/// db.execute("CREATE TABLE t(id INTEGER PRIMARY KEY, v INTEGER)", vec![]).await?;
/// let rows = db.query("SELECT v FROM t", vec![]).await?;
/// db.close().await;
/// ```
#[derive(Debug)]
pub struct Database {
    options: EngineOptions,
    worker: Mutex<Option<WorkerHandle>>,
    in_transaction: AtomicBool,
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

impl Database {
    pub fn new() -> Self {
        Self::with_options(EngineOptions::default())
    }

    pub fn with_options(options: EngineOptions) -> Self {
        Self {
            options,
            worker: Mutex::new(None),
            in_transaction: AtomicBool::new(false),
        }
    }

    /// Opens `path` (or `:memory:`) on a fresh worker thread.
    ///
    /// With an `encryption_key` the worker applies it and verifies that a cipher
    /// is active; startup fails instead of falling back to plaintext.
    pub async fn initialize(&self, path: &str, encryption_key: Option<&str>) -> DbResult<()> {
        let mut guard = self.worker.lock().await;
        if guard.is_some() {
            return Err(DbError::AlreadyInitialized);
        }

        let encrypted = encryption_key.is_some();
        let key = encryption_key.map(|k| SecretString::from(k.to_owned()));
        let handle = WorkerHandle::spawn(DbPath::parse(path), key, &self.options).await?;
        *guard = Some(handle);
        self.in_transaction.store(false, Ordering::SeqCst);

        tracing::info!(path, encrypted, "database initialized");
        Ok(())
    }

    pub async fn is_initialized(&self) -> bool {
        self.worker.lock().await.is_some()
    }

    /// Whether a `with_transaction` call currently holds the native transaction.
    pub fn in_transaction(&self) -> bool {
        self.in_transaction.load(Ordering::SeqCst)
    }

    pub async fn query(&self, sql: impl Into<String>, params: Vec<Value>) -> DbResult<Vec<Row>> {
        let tx = self.sender().await?;
        let (req, rx) = Request::query(sql.into(), params);
        match round_trip(tx, req, rx).await?.into_result() {
            Ok(Some(Payload::Rows(rows))) => Ok(rows),
            Ok(other) => Err(unexpected("query", other)),
            Err(e) => Err(DbError::QueryFailed(e)),
        }
    }

    /// Returns the number of rows changed by the statement.
    pub async fn execute(&self, sql: impl Into<String>, params: Vec<Value>) -> DbResult<u64> {
        self.execute_with_rowid(sql, params).await.map(|r| r.changes)
    }

    pub async fn execute_with_rowid(
        &self,
        sql: impl Into<String>,
        params: Vec<Value>,
    ) -> DbResult<ExecResult> {
        let tx = self.sender().await?;
        let (req, rx) = Request::execute(sql.into(), params);
        match round_trip(tx, req, rx).await?.into_result() {
            Ok(Some(Payload::Changes(res))) => Ok(res),
            Ok(other) => Err(unexpected("execute", other)),
            Err(e) => Err(DbError::ExecuteFailed(e)),
        }
    }

    /// Runs `statements` in order inside one native transaction on the worker.
    /// On failure the worker has already rolled back.
    pub async fn transaction<I, S>(&self, statements: I) -> DbResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tx = self.sender().await?;
        let statements = statements.into_iter().map(Into::into).collect();
        let (req, rx) = Request::transaction_batch(statements);
        round_trip(tx, req, rx)
            .await?
            .into_result()
            .map(|_| ())
            .map_err(DbError::TransactionFailed)
    }

    /// Runs `body` inside a native transaction.
    ///
    /// Calls made while another `with_transaction` is open run `body` directly
    /// and share the outer transaction, so an inner failure that propagates
    /// rolls back the outer work too. A failure from `body` is returned
    /// unchanged after the rollback; a failed `ROLLBACK` is only logged.
    ///
    /// The flag is controller-wide, not per task: any concurrent caller that
    /// enters `with_transaction` while one is open joins it.
    ///
    /// ```ignore
    /// let db = &db;
    /// db.with_transaction(move || async move {
    ///     db.execute("INSERT INTO t(v) VALUES (1)", vec![]).await?;
    ///     Ok::<_, DbError>(())
    /// })
    /// .await?;
    /// ```
    pub async fn with_transaction<T, E, F, Fut>(&self, body: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<DbError>,
    {
        if self
            .in_transaction
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return body().await;
        }
        let mut guard = TransactionGuard {
            flag: &self.in_transaction,
            rollback_via: None,
        };
        guard.rollback_via = Some(self.sender().await.map_err(E::from)?);

        if let Err(e) = self.execute("BEGIN TRANSACTION", vec![]).await {
            guard.disarm();
            return Err(E::from(as_transaction_failure(e)));
        }

        let outcome = match body().await {
            Ok(value) => match self.execute("COMMIT", vec![]).await {
                Ok(_) => Ok(value),
                Err(e) => Err(E::from(as_transaction_failure(e))),
            },
            Err(e) => Err(e),
        };
        guard.disarm();
        drop(guard);

        if outcome.is_err() {
            if let Err(e) = self.execute("ROLLBACK", vec![]).await {
                tracing::warn!(error = %e, "rollback after failed transaction also failed");
            }
        }
        outcome
    }

    /// Stops the worker. Never fails; calling it when not initialized is a no-op.
    pub async fn close(&self) {
        // Release the lock before waiting on the worker so other callers see
        // `NotInitialized` right away.
        let Some(handle) = self.worker.lock().await.take() else {
            return;
        };
        handle.shutdown(self.options.close_timeout).await;
        self.in_transaction.store(false, Ordering::SeqCst);
        tracing::info!("database closed");
    }

    /// `close` plus clearing every piece of controller state. For test teardown.
    pub async fn reset(&self) {
        self.close().await;
        self.in_transaction.store(false, Ordering::SeqCst);
    }

    async fn sender(&self) -> DbResult<mpsc::Sender<Request>> {
        self.worker
            .lock()
            .await
            .as_ref()
            .map(WorkerHandle::sender)
            .ok_or(DbError::NotInitialized)
    }
}

async fn round_trip(
    tx: mpsc::Sender<Request>,
    req: Request,
    rx: oneshot::Receiver<Response>,
) -> DbResult<Response> {
    tx.send(req).await.map_err(|_| DbError::WorkerUnavailable)?;
    rx.await.map_err(|_| DbError::WorkerUnavailable)
}

fn unexpected(op: &str, payload: Option<Payload>) -> DbError {
    DbError::Internal(format!("unexpected {op} payload from worker: {payload:?}"))
}

fn as_transaction_failure(e: DbError) -> DbError {
    match e {
        DbError::ExecuteFailed(detail) => DbError::TransactionFailed(detail),
        other => other,
    }
}

/// Clears the transaction flag when dropped. While armed it also queues a
/// `ROLLBACK`, which covers a `with_transaction` future that was dropped or
/// panicked before reaching its own COMMIT/ROLLBACK.
struct TransactionGuard<'a> {
    flag: &'a AtomicBool,
    rollback_via: Option<mpsc::Sender<Request>>,
}

impl TransactionGuard<'_> {
    fn disarm(&mut self) {
        self.rollback_via = None;
    }
}

impl Drop for TransactionGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
        let Some(tx) = self.rollback_via.take() else {
            return;
        };
        // Nobody waits for the reply; the worker runs it after anything already queued.
        let (req, _rx) = Request::execute("ROLLBACK".into(), vec![]);
        if let Err(e) = tx.try_send(req) {
            tracing::warn!(error = %e, "could not queue rollback for abandoned transaction");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn operations_before_initialize_fail_locally() {
        let db = Database::new();
        assert!(matches!(
            db.query("SELECT 1", vec![]).await,
            Err(DbError::NotInitialized)
        ));
        assert!(matches!(
            db.execute("SELECT 1", vec![]).await,
            Err(DbError::NotInitialized)
        ));
        assert!(matches!(
            db.transaction(["SELECT 1"]).await,
            Err(DbError::NotInitialized)
        ));
        assert!(!db.is_initialized().await);
    }

    #[tokio::test]
    async fn second_initialize_is_rejected() {
        let db = Database::new();
        db.initialize(":memory:", None).await.unwrap();
        assert!(matches!(
            db.initialize(":memory:", None).await,
            Err(DbError::AlreadyInitialized)
        ));
        db.close().await;
    }

    #[tokio::test]
    async fn failed_startup_leaves_controller_uninitialized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("nested").join("db.sqlite");

        let db = Database::new();
        let err = db.initialize(path.to_str().unwrap(), None).await.unwrap_err();
        assert!(matches!(err, DbError::StartupFailed(_)));
        assert!(!db.is_initialized().await);

        db.initialize(":memory:", None).await.unwrap();
        db.close().await;
    }

    #[tokio::test]
    async fn begin_failure_surfaces_as_transaction_failure() {
        let db = Database::new();
        db.initialize(":memory:", None).await.unwrap();
        // A native transaction opened outside with_transaction makes BEGIN fail.
        db.execute("BEGIN", vec![]).await.unwrap();

        let res: Result<(), DbError> = db.with_transaction(|| async { Ok(()) }).await;
        assert!(matches!(res, Err(DbError::TransactionFailed(_))));
        assert!(!db.in_transaction());

        db.execute("ROLLBACK", vec![]).await.unwrap();
        db.close().await;
    }
}
