//! Length-prefixed JSON framing for protocol messages.
//!
//! Works over any `AsyncRead`/`AsyncWrite`, which keeps sessions
//! testable over in-memory duplex streams.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum message size (16 MB).
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Reads a length-prefixed JSON message.
pub async fn read_message<T, M>(io: &mut T) -> io::Result<M>
where
    T: AsyncRead + Unpin,
    M: DeserializeOwned,
{
    let mut len_bytes = [0u8; 4];
    io.read_exact(&mut len_bytes).await?;
    let len = u32::from_be_bytes(len_bytes) as usize;

    if len > MAX_MESSAGE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("message too large: {len} bytes"),
        ));
    }

    let mut buf = vec![0u8; len];
    io.read_exact(&mut buf).await?;

    serde_json::from_slice(&buf).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("JSON decode error: {e}"),
        )
    })
}

/// Writes a length-prefixed JSON message.
pub async fn write_message<T, M>(io: &mut T, message: &M) -> io::Result<()>
where
    T: AsyncWrite + Unpin,
    M: Serialize,
{
    let data = serde_json::to_vec(message).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("JSON encode error: {e}"),
        )
    })?;

    if data.len() > MAX_MESSAGE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("message too large: {} bytes", data.len()),
        ));
    }

    let len_bytes = (data.len() as u32).to_be_bytes();
    io.write_all(&len_bytes).await?;
    io.write_all(&data).await?;
    io.flush().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SyncMessage;
    use haven_types::{DeviceId, SpaceId};

    #[tokio::test]
    async fn round_trip_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);

        let sent = SyncMessage::hello(DeviceId::new(), SpaceId::new(), vec![0xFF, 0x00, 0x7F]);
        write_message(&mut client, &sent).await.unwrap();

        let received: SyncMessage = read_message(&mut server).await.unwrap();
        assert_eq!(received.kind(), "hello");
        if let SyncMessage::Hello { session_salt, .. } = received {
            assert_eq!(session_salt, vec![0xFF, 0x00, 0x7F]);
        }
    }

    #[tokio::test]
    async fn several_messages_in_sequence() {
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);

        write_message(&mut client, &SyncMessage::BatchAck { batch_number: 1 })
            .await
            .unwrap();
        write_message(&mut client, &SyncMessage::Complete { pushed: 2, pulled: 3 })
            .await
            .unwrap();

        let first: SyncMessage = read_message(&mut server).await.unwrap();
        let second: SyncMessage = read_message(&mut server).await.unwrap();
        assert_eq!(first.kind(), "batch_ack");
        assert_eq!(second.kind(), "complete");
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        let huge = ((MAX_MESSAGE_SIZE + 1) as u32).to_be_bytes();
        tokio::io::AsyncWriteExt::write_all(&mut client, &huge)
            .await
            .unwrap();

        let result: io::Result<SyncMessage> = read_message(&mut server).await;
        assert!(result.is_err());
    }
}
