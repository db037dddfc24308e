//! Native-messaging framing
//!
//! Each message is a 32-bit length in native byte order followed by that
//! many bytes of UTF-8 JSON.

use super::protocol::ProtocolError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Browsers refuse host messages larger than this
pub const MAX_OUTGOING_MESSAGE: usize = 1024 * 1024;

/// Upper bound accepted from the browser
pub const MAX_INCOMING_MESSAGE: usize = 64 * 1024 * 1024;

/// Read one message; `None` once the browser closes the pipe
pub async fn read_message<R, T>(reader: &mut R) -> Result<Option<T>, ProtocolError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let size = u32::from_ne_bytes(header) as usize;
    if size > MAX_INCOMING_MESSAGE {
        return Err(ProtocolError::TooLarge {
            size,
            limit: MAX_INCOMING_MESSAGE,
        });
    }

    let mut body = vec![0u8; size];
    reader.read_exact(&mut body).await?;
    Ok(Some(serde_json::from_slice(&body)?))
}

/// Serialize and write one message
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(message)?;
    if body.len() > MAX_OUTGOING_MESSAGE {
        return Err(ProtocolError::TooLarge {
            size: body.len(),
            limit: MAX_OUTGOING_MESSAGE,
        });
    }

    writer.write_all(&(body.len() as u32).to_ne_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[tokio::test]
    async fn test_framing() {
        let mut wire = Vec::new();
        write_message(&mut wire, &json!({"action": "get-status"})).await.unwrap();

        let length = u32::from_ne_bytes([wire[0], wire[1], wire[2], wire[3]]) as usize;
        assert_eq!(length, wire.len() - 4);

        let mut reader = wire.as_slice();
        let message: Value = read_message(&mut reader).await.unwrap().unwrap();
        assert_eq!(message["action"], "get-status");

        let end: Option<Value> = read_message(&mut reader).await.unwrap();
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn test_oversized_outgoing_message_is_rejected() {
        let mut wire = Vec::new();
        let big = "x".repeat(MAX_OUTGOING_MESSAGE);
        let err = write_message(&mut wire, &json!({ "data": big })).await.unwrap_err();
        assert!(matches!(err, ProtocolError::TooLarge { .. }));
        assert!(wire.is_empty());
    }

    #[tokio::test]
    async fn test_truncated_body_is_an_error() {
        let mut wire = 10u32.to_ne_bytes().to_vec();
        wire.extend_from_slice(b"{}");
        let mut reader = wire.as_slice();
        assert!(read_message::<_, Value>(&mut reader).await.is_err());
    }
}
