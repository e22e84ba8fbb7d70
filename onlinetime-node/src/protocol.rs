//! Binary frames exchanged between a dependent node and its upstream.
//!
//! Layout: `[16 byte identifier][u16 tag length][utf-8 tag][payload]`, all
//! integers big-endian. `get` has no payload, `add` and `send` carry one i64.

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::ProtocolError;

/// Channel carrying liveness/AFK signals.
pub const AFK_CHANNEL: &str = "onlinetime:afk";
/// Channel carrying storage sync frames.
pub const STORAGE_CHANNEL: &str = "onlinetime:storage";

/// Sending half of a duplex message channel.
pub type Outbound = mpsc::UnboundedSender<Vec<u8>>;
/// Receiving half of a duplex message channel.
pub type Inbound = mpsc::UnboundedReceiver<Vec<u8>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Ask upstream for the current total.
    Get,
    /// Credit seconds upstream.
    Add(i64),
    /// Upstream's current total.
    Send(i64),
}

impl Command {
    pub fn tag(&self) -> &'static str {
        match self {
            Command::Get => "get",
            Command::Add(_) => "add",
            Command::Send(_) => "send",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncMessage {
    pub id: Uuid,
    pub command: Command,
}

impl SyncMessage {
    pub fn get(id: Uuid) -> Self {
        Self {
            id,
            command: Command::Get,
        }
    }

    pub fn add(id: Uuid, delta: i64) -> Self {
        Self {
            id,
            command: Command::Add(delta),
        }
    }

    pub fn send(id: Uuid, seconds: i64) -> Self {
        Self {
            id,
            command: Command::Send(seconds),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let tag = self.command.tag().as_bytes();
        let mut out = Vec::with_capacity(16 + 2 + tag.len() + 8);
        out.extend_from_slice(self.id.as_bytes());
        out.extend_from_slice(&(tag.len() as u16).to_be_bytes());
        out.extend_from_slice(tag);
        match self.command {
            Command::Get => {}
            Command::Add(value) | Command::Send(value) => {
                out.extend_from_slice(&value.to_be_bytes());
            }
        }
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        let mut offset = 0usize;

        let id = Uuid::from_bytes(read_array::<16>(buf, &mut offset, "identifier")?);
        let tag_len = u16::from_be_bytes(read_array::<2>(buf, &mut offset, "tag length")?) as usize;
        let tag = read_slice(buf, &mut offset, tag_len, "tag")?;
        let tag = std::str::from_utf8(tag).map_err(|_| ProtocolError::InvalidTag)?;

        let command = match tag {
            "get" => Command::Get,
            "add" => Command::Add(read_i64(buf, &mut offset)?),
            "send" => Command::Send(read_i64(buf, &mut offset)?),
            other => return Err(ProtocolError::UnknownCommand(other.to_string())),
        };

        if offset != buf.len() {
            return Err(ProtocolError::TrailingBytes(buf.len() - offset));
        }
        Ok(Self { id, command })
    }
}

fn read_slice<'a>(
    buf: &'a [u8],
    offset: &mut usize,
    len: usize,
    what: &'static str,
) -> Result<&'a [u8], ProtocolError> {
    let end = offset
        .checked_add(len)
        .filter(|end| *end <= buf.len())
        .ok_or(ProtocolError::Truncated(what))?;
    let slice = &buf[*offset..end];
    *offset = end;
    Ok(slice)
}

fn read_array<const N: usize>(
    buf: &[u8],
    offset: &mut usize,
    what: &'static str,
) -> Result<[u8; N], ProtocolError> {
    let mut out = [0u8; N];
    out.copy_from_slice(read_slice(buf, offset, N, what)?);
    Ok(out)
}

fn read_i64(buf: &[u8], offset: &mut usize) -> Result<i64, ProtocolError> {
    Ok(i64::from_be_bytes(read_array::<8>(buf, offset, "payload")?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_layout() {
        let id = Uuid::from_u128(0x0102_0304_0506_0708_090a_0b0c_0d0e_0f10);
        let frame = SyncMessage::add(id, 5).encode();

        assert_eq!(&frame[..16], id.as_bytes());
        assert_eq!(&frame[16..18], &[0, 3]);
        assert_eq!(&frame[18..21], b"add");
        assert_eq!(&frame[21..], &5i64.to_be_bytes());

        let get = SyncMessage::get(id).encode();
        assert_eq!(get.len(), 16 + 2 + 3);
    }

    #[test]
    fn test_decode_each_command() {
        let id = Uuid::from_u128(7);
        for message in [
            SyncMessage::get(id),
            SyncMessage::add(id, -30),
            SyncMessage::send(id, 86_400),
        ] {
            assert_eq!(SyncMessage::decode(&message.encode()), Ok(message));
        }
    }

    #[test]
    fn test_truncated_frames() {
        let frame = SyncMessage::send(Uuid::from_u128(7), 99).encode();

        assert_eq!(
            SyncMessage::decode(&frame[..10]),
            Err(ProtocolError::Truncated("identifier"))
        );
        assert_eq!(
            SyncMessage::decode(&frame[..17]),
            Err(ProtocolError::Truncated("tag length"))
        );
        assert_eq!(
            SyncMessage::decode(&frame[..20]),
            Err(ProtocolError::Truncated("tag"))
        );
        assert_eq!(
            SyncMessage::decode(&frame[..frame.len() - 1]),
            Err(ProtocolError::Truncated("payload"))
        );
    }

    #[test]
    fn test_unknown_tag_and_trailing_bytes() {
        let id = Uuid::from_u128(7);
        let mut frame = id.as_bytes().to_vec();
        frame.extend_from_slice(&4u16.to_be_bytes());
        frame.extend_from_slice(b"drop");
        assert_eq!(
            SyncMessage::decode(&frame),
            Err(ProtocolError::UnknownCommand("drop".to_string()))
        );

        let mut frame = SyncMessage::get(id).encode();
        frame.push(0);
        assert_eq!(
            SyncMessage::decode(&frame),
            Err(ProtocolError::TrailingBytes(1))
        );

        let mut frame = id.as_bytes().to_vec();
        frame.extend_from_slice(&2u16.to_be_bytes());
        frame.extend_from_slice(&[0xff, 0xfe]);
        assert_eq!(SyncMessage::decode(&frame), Err(ProtocolError::InvalidTag));
    }
}
