//! NDJSON stdio bridge that lets an out-of-process host drive a [`Database`].
//!
//! [`Database`]: crate::core::connection::Database

mod handler;
mod io;
pub mod protocol;

use tokio::io::{AsyncBufRead, AsyncWrite};

use crate::{core::options::EngineOptions, error::DbResult};

pub use handler::BridgeHandler;
use io::NdjsonIo;
use protocol::BridgeRequest;

/// Serves requests until `reader` hits EOF, then closes the database.
pub async fn run<R, W>(options: EngineOptions, reader: R, writer: W) -> DbResult<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut io = NdjsonIo::new(reader, writer);
    let handler = BridgeHandler::new(options);

    let served = serve(&mut io, &handler).await;
    handler.shutdown().await;
    served
}

async fn serve<R, W>(io: &mut NdjsonIo<R, W>, handler: &BridgeHandler) -> DbResult<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let Some(line) = io.read_line().await? else { break };
        if line.is_empty() {
            continue;
        }

        let req: BridgeRequest = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(error = %e, "unparseable bridge request");
                io.protocol_error(e.to_string()).await?;
                continue;
            }
        };

        let resp = handler.handle(req).await;
        io.write_json_line(&resp).await?;
    }
    Ok(())
}
