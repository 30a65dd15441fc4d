//! Length-prefixed JSON frames for the local trust service channel.
//!
//! Each frame is a big-endian `u32` byte length followed by a JSON document.
//! A call is one [`RequestFrame`] answered by one [`ResponseFrame`] with the
//! same id.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{CoreError, Result};

/// Largest frame either side accepts (4 MiB).
pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

/// A method call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub id: u64,
    pub method: String,
    pub body: Value,
}

/// Outcome half of a [`ResponseFrame`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameResult {
    Ok(Value),
    Error(String),
}

/// Reply to a [`RequestFrame`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub id: u64,
    pub result: FrameResult,
}

impl ResponseFrame {
    pub const fn ok(id: u64, body: Value) -> Self {
        Self {
            id,
            result: FrameResult::Ok(body),
        }
    }

    pub fn error(id: u64, message: impl Into<String>) -> Self {
        Self {
            id,
            result: FrameResult::Error(message.into()),
        }
    }
}

/// Serialize `frame` and write it with its length prefix.
pub async fn write_frame<W, T>(writer: &mut W, frame: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = serde_json::to_vec(frame)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(CoreError::FrameTooLarge {
            len: payload.len(),
            max: MAX_FRAME_LEN,
        });
    }
    // bounded by MAX_FRAME_LEN above
    #[allow(clippy::cast_possible_truncation)]
    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame and deserialize it.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_LEN {
        return Err(CoreError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(serde_json::from_slice(&payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_frame_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let req = RequestFrame {
            id: 7,
            method: "trust.Status".into(),
            body: json!({}),
        };
        write_frame(&mut a, &req).await.unwrap();
        let got: RequestFrame = read_frame(&mut b).await.unwrap();
        assert_eq!(got, req);
    }

    #[tokio::test]
    async fn test_response_encoding() {
        let frame = ResponseFrame::error(3, "boom");
        let mut buf = Vec::new();
        write_frame(&mut buf, &frame).await.unwrap();
        let json = &buf[4..];
        assert_eq!(
            u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize,
            json.len()
        );
        assert_eq!(json, br#"{"id":3,"result":{"error":"boom"}}"#);
    }

    #[tokio::test]
    async fn test_frame_split_across_reads() {
        let body = br#"{"id":1,"method":"trust.Status","body":null}"#;
        let len = u32::try_from(body.len()).unwrap().to_be_bytes();
        let mut reader = tokio_test::io::Builder::new()
            .read(&len[..2])
            .read(&len[2..])
            .read(&body[..10])
            .read(&body[10..])
            .build();
        let got: RequestFrame = read_frame(&mut reader).await.unwrap();
        assert_eq!(got.id, 1);
        assert_eq!(got.body, Value::Null);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(u32::MAX).to_be_bytes());
        let mut reader = buf.as_slice();
        let err = read_frame::<_, Value>(&mut reader).await.unwrap_err();
        assert!(matches!(err, CoreError::FrameTooLarge { .. }));
    }

    #[tokio::test]
    async fn test_truncated_frame_is_io_error() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&10u32.to_be_bytes());
        buf.extend_from_slice(b"{}");
        let mut reader = buf.as_slice();
        let err = read_frame::<_, Value>(&mut reader).await.unwrap_err();
        assert!(matches!(err, CoreError::Io(_)));
    }
}
