//! Head → display tile framing.
//!
//! Two framings are supported, selected per deployment:
//!
//! **Length-prefixed** (default):
//! ```text
//! len:      u32 BE  (4)   bytes that follow
//! frame_id: u32 BE  (4)
//! payload:  [u8]          len - 4 bytes
//! ```
//!
//! **Delimited** (legacy displays):
//! ```text
//! frame_id: decimal ASCII
//! payload:  [u8]
//! MSG_DELIMITER
//! ```
//! The delimited form cannot escape the delimiter, so it is only safe
//! while no payload contains [`MSG_DELIMITER`]. It also assumes payloads
//! never start with an ASCII digit, which holds for JPEG and for the zstd
//! tile header of any sane resolution.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::VwallError;

/// Terminator of a delimited message.
pub const MSG_DELIMITER: &[u8] = b"\r\n--vwall-tile--\r\n";

/// Largest message either side will buffer.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

const LEN_PREFIX: usize = 4;
const FRAME_ID_LEN: usize = 4;
const MAX_FRAME_ID_DIGITS: usize = 10;

// ── Framing ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Framing {
    #[default]
    LengthPrefixed,
    Delimited,
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Framing::LengthPrefixed => write!(f, "length-prefixed"),
            Framing::Delimited => write!(f, "delimited"),
        }
    }
}

// ── TileMessage ──────────────────────────────────────────────────

/// One tile as it travels over the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileMessage {
    pub frame_id: u32,
    pub payload: Bytes,
}

impl TileMessage {
    pub fn new(frame_id: u32, payload: Bytes) -> Self {
        Self { frame_id, payload }
    }
}

/// What the decoder produced from one message boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Tile(TileMessage),
    /// Framing was intact but the header was not; the bytes were skipped.
    Malformed { len: usize, reason: &'static str },
}

// ── TileFrameCodec ───────────────────────────────────────────────

/// `tokio_util` codec for [`TileMessage`]s.
#[derive(Debug, Clone)]
pub struct TileFrameCodec {
    framing: Framing,
    max_size: usize,
    /// Where the next delimiter search starts.
    scanned: usize,
}

impl TileFrameCodec {
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            max_size: MAX_MESSAGE_SIZE,
            scanned: 0,
        }
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    fn decode_length_prefixed(&mut self, src: &mut BytesMut) -> Result<Option<Inbound>, VwallError> {
        if src.len() < LEN_PREFIX {
            return Ok(None);
        }
        let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if len > self.max_size {
            return Err(VwallError::MessageTooLarge {
                size: len,
                max: self.max_size,
            });
        }
        if src.len() < LEN_PREFIX + len {
            src.reserve(LEN_PREFIX + len - src.len());
            return Ok(None);
        }

        src.advance(LEN_PREFIX);
        let mut body = src.split_to(len);
        if len < FRAME_ID_LEN {
            return Ok(Some(Inbound::Malformed {
                len,
                reason: "message shorter than frame id",
            }));
        }
        let frame_id = body.get_u32();
        Ok(Some(Inbound::Tile(TileMessage {
            frame_id,
            payload: body.freeze(),
        })))
    }

    fn decode_delimited(&mut self, src: &mut BytesMut) -> Result<Option<Inbound>, VwallError> {
        let Some(at) = find(&src[self.scanned..], MSG_DELIMITER).map(|i| i + self.scanned) else {
            if src.len() > self.max_size {
                return Err(VwallError::MessageTooLarge {
                    size: src.len(),
                    max: self.max_size,
                });
            }
            // A delimiter may straddle the end of what has arrived so far.
            self.scanned = src.len().saturating_sub(MSG_DELIMITER.len() - 1);
            return Ok(None);
        };
        self.scanned = 0;

        let message = src.split_to(at);
        src.advance(MSG_DELIMITER.len());
        Ok(Some(parse_delimited(message)))
    }
}

fn parse_delimited(mut message: BytesMut) -> Inbound {
    let digits = message.iter().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 || digits > MAX_FRAME_ID_DIGITS {
        return Inbound::Malformed {
            len: message.len(),
            reason: "missing frame id",
        };
    }
    let frame_id = std::str::from_utf8(&message[..digits])
        .ok()
        .and_then(|s| s.parse::<u32>().ok());
    match frame_id {
        Some(frame_id) => {
            message.advance(digits);
            Inbound::Tile(TileMessage {
                frame_id,
                payload: message.freeze(),
            })
        }
        None => Inbound::Malformed {
            len: message.len(),
            reason: "frame id out of range",
        },
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

impl Decoder for TileFrameCodec {
    type Item = Inbound;
    type Error = VwallError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.framing {
            Framing::LengthPrefixed => self.decode_length_prefixed(src),
            Framing::Delimited => self.decode_delimited(src),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(item) = self.decode(src)? {
            return Ok(Some(item));
        }
        if src.is_empty() {
            return Ok(None);
        }
        // Peer went away mid-message.
        let len = src.len();
        src.clear();
        self.scanned = 0;
        Ok(Some(Inbound::Malformed {
            len,
            reason: "stream ended mid-message",
        }))
    }
}

impl Encoder<TileMessage> for TileFrameCodec {
    type Error = VwallError;

    fn encode(&mut self, item: TileMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let size = FRAME_ID_LEN + item.payload.len();
        if size > self.max_size {
            return Err(VwallError::MessageTooLarge {
                size,
                max: self.max_size,
            });
        }
        match self.framing {
            Framing::LengthPrefixed => {
                dst.reserve(LEN_PREFIX + size);
                dst.put_u32(size as u32);
                dst.put_u32(item.frame_id);
                dst.extend_from_slice(&item.payload);
            }
            Framing::Delimited => {
                let id = item.frame_id.to_string();
                dst.reserve(id.len() + item.payload.len() + MSG_DELIMITER.len());
                dst.extend_from_slice(id.as_bytes());
                dst.extend_from_slice(&item.payload);
                dst.extend_from_slice(MSG_DELIMITER);
            }
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_all(framing: Framing, msgs: &[TileMessage]) -> BytesMut {
        let mut codec = TileFrameCodec::new(framing);
        let mut buf = BytesMut::new();
        for m in msgs {
            codec.encode(m.clone(), &mut buf).unwrap();
        }
        buf
    }

    /// Feed `wire` one byte at a time, collecting everything decoded.
    fn trickle(framing: Framing, wire: &[u8]) -> Vec<Inbound> {
        let mut codec = TileFrameCodec::new(framing);
        let mut buf = BytesMut::new();
        let mut out = Vec::new();
        for &b in wire {
            buf.put_u8(b);
            while let Some(item) = codec.decode(&mut buf).unwrap() {
                out.push(item);
            }
        }
        out
    }

    fn msgs() -> Vec<TileMessage> {
        vec![
            TileMessage::new(0, Bytes::from_static(&[0xFF, 0xD8, 1, 2, 3])),
            TileMessage::new(17, Bytes::new()),
            TileMessage::new(4_000_000_000, Bytes::from_static(b"\xFFtail")),
        ]
    }

    #[test]
    fn both_framings_survive_partial_reads() {
        for framing in [Framing::LengthPrefixed, Framing::Delimited] {
            let wire = encode_all(framing, &msgs());
            let decoded = trickle(framing, &wire);
            let expected: Vec<Inbound> = msgs().into_iter().map(Inbound::Tile).collect();
            assert_eq!(decoded, expected, "{framing}");
        }
    }

    #[test]
    fn length_prefixed_layout() {
        let wire = encode_all(Framing::LengthPrefixed, &[TileMessage::new(5, Bytes::from_static(b"ab"))]);
        assert_eq!(&wire[..], &[0, 0, 0, 6, 0, 0, 0, 5, b'a', b'b']);
    }

    #[test]
    fn delimited_layout_is_ascii_id_then_payload() {
        let wire = encode_all(Framing::Delimited, &[TileMessage::new(42, Bytes::from_static(b"\xFFx"))]);
        let mut expected = b"42\xFFx".to_vec();
        expected.extend_from_slice(MSG_DELIMITER);
        assert_eq!(&wire[..], &expected[..]);
    }

    #[test]
    fn delimited_message_without_id_is_skipped() {
        let mut wire = BytesMut::new();
        wire.extend_from_slice(b"\xFFgarbage");
        wire.extend_from_slice(MSG_DELIMITER);
        wire.extend_from_slice(&encode_all(
            Framing::Delimited,
            &[TileMessage::new(3, Bytes::from_static(b"\xFFok"))],
        ));

        let decoded = trickle(Framing::Delimited, &wire);
        assert!(matches!(decoded[0], Inbound::Malformed { reason: "missing frame id", .. }));
        assert_eq!(
            decoded[1],
            Inbound::Tile(TileMessage::new(3, Bytes::from_static(b"\xFFok")))
        );
    }

    #[test]
    fn oversized_length_is_fatal() {
        let mut codec = TileFrameCodec::new(Framing::LengthPrefixed).with_max_size(16);
        let mut buf = BytesMut::from(&[0u8, 0, 1, 0][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(VwallError::MessageTooLarge { size: 256, max: 16 })
        ));

        let err = codec
            .encode(TileMessage::new(0, Bytes::from(vec![0; 32])), &mut BytesMut::new())
            .unwrap_err();
        assert!(matches!(err, VwallError::MessageTooLarge { .. }));
    }

    #[test]
    fn runt_length_prefixed_message_is_skipped() {
        let mut wire = BytesMut::from(&[0u8, 0, 0, 2, 9, 9][..]);
        wire.extend_from_slice(&encode_all(
            Framing::LengthPrefixed,
            &[TileMessage::new(1, Bytes::from_static(b"x"))],
        ));
        let decoded = trickle(Framing::LengthPrefixed, &wire);
        assert!(matches!(decoded[0], Inbound::Malformed { len: 2, .. }));
        assert!(matches!(decoded[1], Inbound::Tile(ref t) if t.frame_id == 1));
    }

    #[test]
    fn eof_mid_message_yields_malformed_once() {
        let wire = encode_all(
            Framing::LengthPrefixed,
            &[TileMessage::new(1, Bytes::from_static(b"abcdef"))],
        );
        let mut codec = TileFrameCodec::new(Framing::LengthPrefixed);
        let mut buf = BytesMut::from(&wire[..wire.len() - 2]);
        assert!(matches!(
            codec.decode_eof(&mut buf).unwrap(),
            Some(Inbound::Malformed { .. })
        ));
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
    }
}
