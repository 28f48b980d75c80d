use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::common::{CodecError, Message, Payload};

/// Largest frame body we accept or produce.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const LEN_PREFIX: usize = 4;

/// Encodes `message` as a complete frame: big-endian length, then body.
pub fn encode_frame(message: &Message) -> Result<Vec<u8>, CodecError> {
    let body = bincode::serialize(message).map_err(CodecError::Encode)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge {
            len: body.len(),
            max: MAX_FRAME_LEN,
        });
    }
    let mut frame = Vec::with_capacity(LEN_PREFIX + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

pub fn decode(body: &[u8]) -> Result<Message, CodecError> {
    bincode::deserialize(body).map_err(CodecError::Decode)
}

/// Decodes a frame body that must be a network envelope.
pub fn decode_envelope(body: &[u8]) -> Result<Message, CodecError> {
    let message = decode(body)?;
    match message.payload {
        Payload::NetworkMessage { .. } => Ok(message),
        ref other => Err(CodecError::NotANetworkMessage(other.name())),
    }
}

/// Reads one frame body. `Ok(None)` means the peer closed the connection
/// cleanly between frames.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, CodecError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LEN_PREFIX];
    match reader.read_exact(&mut prefix).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}
