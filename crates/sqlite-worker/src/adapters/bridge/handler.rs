use serde::de::DeserializeOwned;

use crate::{
    core::{connection::Database, options::EngineOptions},
    error::DbError,
};

use super::protocol::*;

pub struct BridgeHandler {
    db: Database,
}

impl BridgeHandler {
    pub fn new(options: EngineOptions) -> Self {
        Self {
            db: Database::with_options(options),
        }
    }

    pub async fn handle(&self, req: BridgeRequest) -> BridgeResponse<serde_json::Value> {
        if req.v != PROTOCOL_VERSION {
            let msg = format!("unsupported protocol version: {}", req.v);
            return err(req, DbError::InvalidRequest(msg));
        }

        match req.cmd.as_str() {
            "initialize" => self.handle_initialize(req).await,
            "query" => self.handle_query(req).await,
            "execute" => self.handle_execute(req).await,
            "transaction" => self.handle_transaction(req).await,
            "status" => {
                let data = StatusData {
                    initialized: self.db.is_initialized().await,
                    in_transaction: self.db.in_transaction(),
                };
                reply(req, Ok(data))
            }
            "close" => {
                self.db.close().await;
                ok(req, serde_json::Value::Bool(true))
            }
            "reset" => {
                self.db.reset().await;
                ok(req, serde_json::Value::Bool(true))
            }
            other => {
                let msg = format!("unknown cmd: {other}");
                err(req, DbError::InvalidRequest(msg))
            }
        }
    }

    pub async fn shutdown(&self) {
        self.db.close().await;
    }

    async fn handle_initialize(&self, mut req: BridgeRequest) -> BridgeResponse<serde_json::Value> {
        let p: InitializePayload = match payload(&mut req) {
            Ok(v) => v,
            Err(e) => return err(req, e),
        };
        let res = self.db.initialize(&p.path, p.key.as_deref()).await;
        reply(req, res.map(|()| true))
    }

    async fn handle_query(&self, mut req: BridgeRequest) -> BridgeResponse<serde_json::Value> {
        let p: StatementPayload = match payload(&mut req) {
            Ok(v) => v,
            Err(e) => return err(req, e),
        };
        let res = self.db.query(p.sql, p.params).await;
        reply(req, res)
    }

    async fn handle_execute(&self, mut req: BridgeRequest) -> BridgeResponse<serde_json::Value> {
        let p: StatementPayload = match payload(&mut req) {
            Ok(v) => v,
            Err(e) => return err(req, e),
        };
        let res = self.db.execute_with_rowid(p.sql, p.params).await;
        reply(req, res)
    }

    async fn handle_transaction(&self, mut req: BridgeRequest) -> BridgeResponse<serde_json::Value> {
        let p: TransactionPayload = match payload(&mut req) {
            Ok(v) => v,
            Err(e) => return err(req, e),
        };
        let res = self.db.transaction(p.statements).await;
        reply(req, res.map(|()| true))
    }
}

fn payload<T: DeserializeOwned>(req: &mut BridgeRequest) -> Result<T, DbError> {
    serde_json::from_value(req.payload.take()).map_err(|e| DbError::InvalidRequest(e.to_string()))
}

fn reply<T: serde::Serialize>(
    req: BridgeRequest,
    res: Result<T, DbError>,
) -> BridgeResponse<serde_json::Value> {
    match res.and_then(|v| serde_json::to_value(v).map_err(DbError::from)) {
        Ok(data) => ok(req, data),
        Err(e) => err(req, e),
    }
}

fn ok(req: BridgeRequest, data: serde_json::Value) -> BridgeResponse<serde_json::Value> {
    BridgeResponse::ok(req.v, req.id, data)
}

fn err(req: BridgeRequest, e: DbError) -> BridgeResponse<serde_json::Value> {
    BridgeResponse::err(req.v, req.id, e.code(), e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(id: &str, cmd: &str, payload: serde_json::Value) -> BridgeRequest {
        BridgeRequest {
            v: PROTOCOL_VERSION,
            id: id.to_string(),
            cmd: cmd.to_string(),
            payload,
        }
    }

    #[tokio::test]
    async fn failed_batch_reports_transaction_code() {
        let h = BridgeHandler::new(EngineOptions::default());
        h.handle(request("1", "initialize", serde_json::json!({ "path": ":memory:" })))
            .await;

        let resp = h
            .handle(request(
                "2",
                "transaction",
                serde_json::json!({ "statements": ["CREATE TABLE a(x)", "INSERT INTO nope VALUES (1)"] }),
            ))
            .await;
        assert_eq!(resp.status, "error");
        assert_eq!(resp.code, Some("TRANSACTION_FAILED"));
        assert!(resp.error.unwrap().contains("no such table"));

        let tables = h
            .handle(request(
                "3",
                "query",
                serde_json::json!({ "sql": "SELECT name FROM sqlite_master WHERE name = 'a'" }),
            ))
            .await;
        assert_eq!(tables.data, Some(serde_json::json!([])));
        h.shutdown().await;
    }

    #[tokio::test]
    async fn missing_payload_fields_are_invalid_requests() {
        let h = BridgeHandler::new(EngineOptions::default());
        let resp = h.handle(request("1", "initialize", serde_json::Value::Null)).await;
        assert_eq!(resp.code, Some("INVALID_REQUEST"));
    }

    #[tokio::test]
    async fn status_tracks_lifecycle() {
        let h = BridgeHandler::new(EngineOptions::default());
        let before = h.handle(request("1", "status", serde_json::Value::Null)).await;
        assert_eq!(before.data.unwrap()["initialized"], false);

        h.handle(request("2", "initialize", serde_json::json!({ "path": ":memory:" })))
            .await;
        let after = h.handle(request("3", "status", serde_json::Value::Null)).await;
        assert_eq!(after.data.unwrap()["initialized"], true);

        h.handle(request("4", "reset", serde_json::Value::Null)).await;
        let reset = h.handle(request("5", "status", serde_json::Value::Null)).await;
        assert_eq!(reset.data.unwrap()["initialized"], false);
    }
}
