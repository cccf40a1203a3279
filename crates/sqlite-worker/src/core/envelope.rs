//! Messages exchanged between the controller and the worker thread.

use tokio::sync::oneshot;

use crate::core::types::{ExecResult, Row, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Query,
    Execute,
    TransactionBatch,
    Close,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Query => "query",
            RequestKind::Execute => "execute",
            RequestKind::TransactionBatch => "transaction_batch",
            RequestKind::Close => "close",
        }
    }
}

/// One outstanding ask. `reply` is consumed by the single response sent for it.
#[derive(Debug)]
pub struct Request {
    pub kind: RequestKind,
    pub sql: Option<String>,
    pub parameters: Option<Vec<Value>>,
    pub statements: Option<Vec<String>>,
    pub reply: oneshot::Sender<Response>,
}

impl Request {
    pub fn query(
        sql: String,
        parameters: Vec<Value>,
    ) -> (Self, oneshot::Receiver<Response>) {
        Self::build(RequestKind::Query, Some(sql), Some(parameters), None)
    }

    pub fn execute(
        sql: String,
        parameters: Vec<Value>,
    ) -> (Self, oneshot::Receiver<Response>) {
        Self::build(RequestKind::Execute, Some(sql), Some(parameters), None)
    }

    pub fn transaction_batch(statements: Vec<String>) -> (Self, oneshot::Receiver<Response>) {
        Self::build(RequestKind::TransactionBatch, None, None, Some(statements))
    }

    pub fn close() -> (Self, oneshot::Receiver<Response>) {
        Self::build(RequestKind::Close, None, None, None)
    }

    pub(crate) fn build(
        kind: RequestKind,
        sql: Option<String>,
        parameters: Option<Vec<Value>>,
        statements: Option<Vec<String>>,
    ) -> (Self, oneshot::Receiver<Response>) {
        let (reply, rx) = oneshot::channel();
        let req = Self {
            kind,
            sql,
            parameters,
            statements,
            reply,
        };
        (req, rx)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Rows(Vec<Row>),
    Changes(ExecResult),
}

/// The worker's answer. At most one of `result`/`error` is set.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Response {
    pub result: Option<Payload>,
    pub error: Option<String>,
}

impl Response {
    pub fn ok(result: Payload) -> Self {
        Self {
            result: Some(result),
            error: None,
        }
    }

    pub fn done() -> Self {
        Self::default()
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn into_result(self) -> Result<Option<Payload>, String> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.result),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_wins_over_payload() {
        let resp = Response {
            result: Some(Payload::Rows(vec![])),
            error: Some("boom".into()),
        };
        assert_eq!(resp.into_result(), Err("boom".to_string()));
    }

    #[test]
    fn done_carries_no_payload() {
        assert_eq!(Response::done().into_result(), Ok(None));
    }

    #[test]
    fn constructors_fill_only_their_fields() {
        let (req, _rx) = Request::transaction_batch(vec!["SELECT 1".into()]);
        assert_eq!(req.kind, RequestKind::TransactionBatch);
        assert!(req.sql.is_none());
        assert!(req.parameters.is_none());
        assert_eq!(req.statements.as_deref(), Some(&["SELECT 1".to_string()][..]));
    }
}
