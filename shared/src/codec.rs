//! Length-prefixed framing for [`Message`] values.
//!
//! A frame is a 4-byte big-endian payload length followed by the
//! bincode-serialized message. There is no version byte and no checksum.

use crate::Message;
use bincode::{deserialize, serialize};
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest payload a peer may announce before the frame is rejected
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// The bytes on the wire do not form a valid frame
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },
    #[error("malformed payload: {0}")]
    Malformed(#[from] bincode::Error),
}

/// Everything that can go wrong reading or writing a frame.
/// Both kinds are fatal to the connection they happened on.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
}

/// Serializes a message into one complete frame
pub fn encode(message: &Message) -> Result<Vec<u8>, WireError> {
    let payload = serialize(message).map_err(ProtocolError::from)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            len: payload.len(),
            max: MAX_FRAME_LEN,
        }
        .into());
    }

    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Reads exactly one frame.
///
/// Returns `Ok(None)` once the peer has closed the stream, whether that
/// happens between frames or part-way through one.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Message>, WireError>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        }
        .into());
    }

    // Grows with the bytes that actually arrive, not with the announced length
    let mut payload = Vec::new();
    (&mut *reader)
        .take(len as u64)
        .read_to_end(&mut payload)
        .await?;
    if payload.len() < len {
        return Ok(None);
    }

    let message = deserialize::<Message>(&payload).map_err(ProtocolError::from)?;
    Ok(Some(message))
}

/// Encodes `message` and writes the whole frame before flushing
pub async fn write_frame<W>(writer: &mut W, message: &Message) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    fn sample() -> Message {
        Message::chat("hello there", "alice")
    }

    #[test]
    fn test_encode_prefixes_big_endian_length() {
        let frame = encode(&sample()).unwrap();
        let payload_len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;

        assert_eq!(payload_len, frame.len() - 4);
        let decoded: Message = bincode::deserialize(&frame[4..]).unwrap();
        assert_eq!(decoded, sample());
    }

    #[tokio::test]
    async fn test_absent_fields_survive_the_wire() {
        let messages = vec![
            Message::default(),
            Message::text("only text"),
            Message::command("<login:?>").with_user("bob"),
            Message {
                text: Some("all".to_string()),
                command: Some("/RENAME".to_string()),
                user: Some("carol".to_string()),
            },
        ];

        let mut bytes = Vec::new();
        for message in &messages {
            bytes.extend(encode(message).unwrap());
        }

        let mut reader = &bytes[..];
        for expected in &messages {
            let decoded = read_frame(&mut reader).await.unwrap();
            assert_eq!(decoded.as_ref(), Some(expected));
        }
        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_frame_split_across_reads() {
        let frame = encode(&sample()).unwrap();
        let mut mock = Builder::new()
            .read(&frame[..2])
            .read(&frame[2..7])
            .read(&frame[7..])
            .build();

        let decoded = read_frame(&mut mock).await.unwrap();
        assert_eq!(decoded, Some(sample()));
    }

    #[tokio::test]
    async fn test_clean_close_is_end_of_stream() {
        let mut empty: &[u8] = &[];
        assert!(read_frame(&mut empty).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_close_mid_frame_is_end_of_stream() {
        let frame = encode(&sample()).unwrap();

        let mut inside_length = &frame[..3];
        assert!(read_frame(&mut inside_length).await.unwrap().is_none());

        let mut inside_payload = &frame[..frame.len() - 1];
        assert!(read_frame(&mut inside_payload).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_large_header_then_close_is_end_of_stream() {
        let mut bytes = (MAX_FRAME_LEN as u32).to_be_bytes().to_vec();
        bytes.extend_from_slice(&[1, 2, 3]);
        let mut mock = Builder::new().read(&bytes[..4]).read(&bytes[4..]).build();

        assert!(read_frame(&mut mock).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_length_is_protocol_error() {
        let bytes = ((MAX_FRAME_LEN + 1) as u32).to_be_bytes();
        let mut reader = &bytes[..];

        match read_frame(&mut reader).await {
            Err(WireError::Protocol(ProtocolError::FrameTooLarge { len, max })) => {
                assert_eq!(len, MAX_FRAME_LEN + 1);
                assert_eq!(max, MAX_FRAME_LEN);
            }
            other => panic!("expected FrameTooLarge, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_garbage_payload_is_protocol_error() {
        // 2 is not a valid Option tag
        let bytes = [0u8, 0, 0, 1, 2];
        let mut reader = &bytes[..];
        assert!(matches!(
            read_frame(&mut reader).await,
            Err(WireError::Protocol(ProtocolError::Malformed(_)))
        ));

        // Some(..) with the string cut off inside the declared length
        let bytes = [0u8, 0, 0, 1, 1];
        let mut reader = &bytes[..];
        assert!(matches!(
            read_frame(&mut reader).await,
            Err(WireError::Protocol(ProtocolError::Malformed(_)))
        ));
    }

    #[tokio::test]
    async fn test_socket_failure_is_transport_error() {
        let mut mock = Builder::new()
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();

        assert!(matches!(
            read_frame(&mut mock).await,
            Err(WireError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_write_frame_emits_whole_frame() {
        let frame = encode(&sample()).unwrap();
        let mut mock = Builder::new().write(&frame).build();

        write_frame(&mut mock, &sample()).await.unwrap();
    }
}
