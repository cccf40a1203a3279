//! The background thread that owns the SQLite handle.
//!
//! Nothing outside this module ever touches the `rusqlite::Connection`. The
//! controller talks to the thread through a bounded request queue, and every
//! request carries its own oneshot reply sender.

use std::{
    thread::{self, JoinHandle},
    time::Duration,
};

use rusqlite::{Connection, OpenFlags};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{mpsc, oneshot};

use crate::{
    core::{
        envelope::{Payload, Request, RequestKind, Response},
        options::{DbPath, EngineOptions},
        query,
        types::Value,
    },
    error::{DbError, DbResult},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerState {
    Starting,
    Ready,
    Busy,
    Closing,
    Stopped,
}

#[derive(Debug)]
pub(crate) struct WorkerHandle {
    tx: mpsc::Sender<Request>,
    thread: JoinHandle<()>,
}

impl WorkerHandle {
    /// Starts the worker thread and waits for its startup handshake.
    pub(crate) async fn spawn(
        path: DbPath,
        key: Option<SecretString>,
        opts: &EngineOptions,
    ) -> DbResult<Self> {
        let (tx, rx) = mpsc::channel::<Request>(opts.queue_capacity.max(1));
        let (ready_tx, ready_rx) = oneshot::channel::<Response>();
        let busy_timeout = opts.busy_timeout;

        let thread = thread::Builder::new()
            .name("sqlite-worker".into())
            .spawn(move || db_worker_main(path, key, busy_timeout, rx, ready_tx))
            .map_err(|e| DbError::StartupFailed(format!("failed to spawn worker thread: {e}")))?;

        let handshake = ready_rx
            .await
            .map_err(|_| DbError::StartupFailed("worker exited during startup".into()))?;
        if let Some(e) = handshake.error {
            return Err(DbError::StartupFailed(e));
        }
        Ok(Self { tx, thread })
    }

    pub(crate) fn sender(&self) -> mpsc::Sender<Request> {
        self.tx.clone()
    }

    /// Asks the worker to close, then lets go of it whatever the answer was.
    pub(crate) async fn shutdown(self, close_timeout: Duration) {
        let Self { tx, thread } = self;
        let (req, rx) = Request::close();

        let outcome = tokio::time::timeout(close_timeout, async {
            tx.send(req).await.map_err(|_| DbError::WorkerUnavailable)?;
            rx.await.map_err(|_| DbError::WorkerUnavailable)
        })
        .await;
        drop(tx);

        let exited = match outcome {
            Ok(Ok(resp)) => {
                if let Some(e) = resp.error {
                    tracing::warn!(error = %e, "db worker reported an error while closing");
                }
                true
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "db worker went away before acknowledging close");
                true
            }
            Err(_) => {
                tracing::warn!(timeout = ?close_timeout, "db worker did not acknowledge close in time; detaching");
                false
            }
        };

        if exited {
            match tokio::task::spawn_blocking(move || thread.join()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => tracing::warn!("db worker thread panicked"),
                Err(e) => tracing::warn!(error = %e, "failed to join db worker thread"),
            }
        }
    }
}

fn db_worker_main(
    db_path: DbPath,
    key: Option<SecretString>,
    busy_timeout: Duration,
    mut rx: mpsc::Receiver<Request>,
    ready: oneshot::Sender<Response>,
) {
    transition(WorkerState::Starting);
    let conn = match open_conn(&db_path, key.as_ref(), busy_timeout) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, path = %db_path.display(), "failed to open db in worker");
            let _ = ready.send(Response::err(e));
            transition(WorkerState::Stopped);
            return;
        }
    };
    drop(key);

    if ready.send(Response::done()).is_err() {
        tracing::warn!("initializer went away during startup; closing db");
        close_conn(conn);
        transition(WorkerState::Stopped);
        return;
    }
    transition(WorkerState::Ready);

    while let Some(req) = rx.blocking_recv() {
        let Request {
            kind,
            sql,
            parameters,
            statements,
            reply,
        } = req;

        if kind == RequestKind::Close {
            transition(WorkerState::Closing);
            let resp = match conn.close() {
                Ok(()) => Response::done(),
                Err((_, e)) => Response::err(e.to_string()),
            };
            let _ = reply.send(resp);
            rx.close();
            transition(WorkerState::Stopped);
            return;
        }

        transition(WorkerState::Busy);
        let resp = dispatch(&conn, kind, sql, parameters, statements);
        if reply.send(resp).is_err() {
            tracing::debug!(kind = kind.as_str(), "caller dropped before reply");
        }
        transition(WorkerState::Ready);
    }

    // Every sender is gone without an explicit close.
    tracing::debug!("request channel closed; closing db");
    close_conn(conn);
    transition(WorkerState::Stopped);
}

fn dispatch(
    conn: &Connection,
    kind: RequestKind,
    sql: Option<String>,
    parameters: Option<Vec<Value>>,
    statements: Option<Vec<String>>,
) -> Response {
    let params = parameters.unwrap_or_default();
    match kind {
        RequestKind::Query => {
            let Some(sql) = sql else {
                return Response::err("malformed query request: missing sql");
            };
            match query::run_query(conn, &sql, &params) {
                Ok(rows) => Response::ok(Payload::Rows(rows)),
                Err(e) => Response::err(e.to_string()),
            }
        }
        RequestKind::Execute => {
            let Some(sql) = sql else {
                return Response::err("malformed execute request: missing sql");
            };
            match query::run_execute(conn, &sql, &params) {
                Ok(res) => Response::ok(Payload::Changes(res)),
                Err(e) => Response::err(e.to_string()),
            }
        }
        RequestKind::TransactionBatch => {
            let Some(statements) = statements else {
                return Response::err("malformed transaction request: missing statements");
            };
            match query::run_batch(conn, &statements) {
                Ok(()) => Response::done(),
                Err(e) => Response::err(e.to_string()),
            }
        }
        RequestKind::Close => Response::err("close request reached the statement dispatcher"),
    }
}

fn open_conn(
    path: &DbPath,
    key: Option<&SecretString>,
    busy_timeout: Duration,
) -> Result<Connection, String> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = match path {
        DbPath::Memory => Connection::open_in_memory_with_flags(flags),
        DbPath::File(p) => Connection::open_with_flags(p, flags),
    }
    .map_err(|e| format!("failed to open database {}: {e}", path.display()))?;

    if let Some(key) = key {
        apply_key(&conn, key)?;
    }

    conn.execute_batch("PRAGMA foreign_keys = ON")
        .map_err(|e| format!("failed to enable foreign keys: {e}"))?;
    conn.busy_timeout(busy_timeout)
        .map_err(|e| format!("failed to set busy timeout: {e}"))?;
    Ok(conn)
}

/// Applies the key and confirms a cipher is actually linked in. Plain SQLite
/// ignores `PRAGMA key`, so an empty `cipher_version` means no encryption.
fn apply_key(conn: &Connection, key: &SecretString) -> Result<(), String> {
    conn.pragma_update(None, "key", key.expose_secret())
        .map_err(|e| format!("failed to apply encryption key: {e}"))?;

    let mut stmt = conn
        .prepare("PRAGMA cipher_version")
        .map_err(|e| format!("failed to probe cipher status: {e}"))?;
    let has_cipher = stmt
        .query([])
        .and_then(|mut rows| rows.next().map(|r| r.is_some()))
        .map_err(|e| format!("failed to probe cipher status: {e}"))?;
    if !has_cipher {
        return Err("encryption key supplied but cipher_version returned no rows".into());
    }
    Ok(())
}

fn close_conn(conn: Connection) {
    if let Err((_, e)) = conn.close() {
        tracing::warn!(error = %e, "failed to close db cleanly");
    }
}

fn transition(state: WorkerState) {
    tracing::debug!(?state, "db worker state");
}
