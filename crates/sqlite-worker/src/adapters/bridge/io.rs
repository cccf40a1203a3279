use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{DbError, DbResult};

use super::protocol::{BridgeResponse, PROTOCOL_VERSION};

/// Newline-delimited JSON over any async reader/writer pair.
pub struct NdjsonIo<R, W> {
    reader: R,
    writer: W,
    line: String,
}

impl<R, W> NdjsonIo<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            line: String::new(),
        }
    }

    /// `None` at EOF; blank lines come back as an empty string.
    pub async fn read_line(&mut self) -> DbResult<Option<String>> {
        self.line.clear();
        let n = self.reader.read_line(&mut self.line).await?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(self.line.trim().to_string()))
    }

    pub async fn write_json_line<T: serde::Serialize>(&mut self, v: &T) -> DbResult<()> {
        let mut buf = serde_json::to_vec(v)?;
        buf.push(b'\n');
        self.writer.write_all(&buf).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn protocol_error(&mut self, msg: String) -> DbResult<()> {
        let code = DbError::InvalidRequest(String::new()).code();
        let resp = BridgeResponse::<()>::err(PROTOCOL_VERSION, String::new(), code, msg);
        self.write_json_line(&resp).await
    }
}
