//! RFC 6455 WebSocket framing.
//!
//! Covers frame parsing and serialization, masking, fragmentation
//! reassembly, control-frame rules, close-code validation, and the opening
//! handshake (`Sec-WebSocket-Accept`). Compression extensions are not
//! negotiated (spec.md §1 non-goal); `RSV1`/`RSV2`/`RSV3` are always
//! rejected.

use crate::scope::WsMessage;
use base64::{engine::general_purpose::STANDARD, Engine};
use sha1::{Digest, Sha1};

const HANDSHAKE_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Computes `Sec-WebSocket-Accept` from the client's `Sec-WebSocket-Key`.
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(HANDSHAKE_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Generates a random masking key for an outbound client-role frame.
///
/// The core itself never needs this (server frames are unmasked per
/// spec.md §4.2), but it is kept for test round-trips that simulate the
/// client side of the handshake.
pub fn random_mask() -> [u8; 4] {
    rand::random()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    const fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x0 => Some(OpCode::Continuation),
            0x1 => Some(OpCode::Text),
            0x2 => Some(OpCode::Binary),
            0x8 => Some(OpCode::Close),
            0x9 => Some(OpCode::Ping),
            0xA => Some(OpCode::Pong),
            _ => None,
        }
    }

    const fn as_byte(self) -> u8 {
        match self {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }

    const fn is_control(self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

/// A protocol violation observed while decoding inbound frames. Carries its
/// own close code/reason so the bridge can emit the matching close frame
/// without a separate lookup table (spec.md §4.2/§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsError {
    /// RSV bits set, reserved opcode, masking violation, bad close payload.
    ProtocolError,
    /// A completed text message failed UTF-8 validation.
    InvalidUtf8,
    /// A frame payload exceeded `max_ws_frame_size`.
    MessageTooLarge,
    /// The bounded receive queue overflowed (raised by the bridge, not the
    /// frame parser, but the close code/reason live alongside the rest of
    /// this taxonomy).
    QueueOverflow,
}

impl WsError {
    pub const fn close_code(self) -> u16 {
        match self {
            WsError::ProtocolError => 1002,
            WsError::InvalidUtf8 => 1007,
            WsError::MessageTooLarge => 1009,
            WsError::QueueOverflow => 1008,
        }
    }

    pub const fn reason(self) -> &'static str {
        match self {
            WsError::ProtocolError => "Protocol error",
            WsError::InvalidUtf8 => "Invalid UTF-8",
            WsError::MessageTooLarge => "Message too large",
            WsError::QueueOverflow => "Message queue overflow",
        }
    }
}

/// One decoded frame, payload already unmasked.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: OpCode,
    pub payload: Vec<u8>,
}

/// Result of attempting to parse one frame out of the front of a buffer.
pub enum ParseOutcome {
    /// Not enough bytes buffered yet; read more and retry.
    NeedMore,
    /// A complete frame, plus the number of bytes it consumed.
    Frame(Frame, usize),
    Error(WsError),
}

/// Validates and decodes exactly one frame from the front of `buf`, per
/// spec.md §4.2: RSV bits must be zero, opcode must be known, control
/// frames must be unfragmented and ≤125 bytes, client frames must be
/// masked, and close payloads must carry a valid code.
pub fn parse_frame(buf: &[u8], max_frame_size: usize) -> ParseOutcome {
    if buf.len() < 2 {
        return ParseOutcome::NeedMore;
    }

    let b0 = buf[0];
    let b1 = buf[1];

    if b0 & 0x70 != 0 {
        return ParseOutcome::Error(WsError::ProtocolError);
    }
    let fin = b0 & 0x80 != 0;
    let opcode = match OpCode::from_byte(b0 & 0x0F) {
        Some(opcode) => opcode,
        None => return ParseOutcome::Error(WsError::ProtocolError),
    };

    let masked = b1 & 0x80 != 0;
    if !masked {
        return ParseOutcome::Error(WsError::ProtocolError);
    }

    let mut pos = 2;
    let mut len = (b1 & 0x7F) as u64;
    if len == 126 {
        if buf.len() < pos + 2 {
            return ParseOutcome::NeedMore;
        }
        len = u16::from_be_bytes([buf[pos], buf[pos + 1]]) as u64;
        pos += 2;
    } else if len == 127 {
        if buf.len() < pos + 8 {
            return ParseOutcome::NeedMore;
        }
        len = u64::from_be_bytes(buf[pos..pos + 8].try_into().unwrap());
        pos += 8;
    }

    if opcode.is_control() && (len > 125 || !fin) {
        return ParseOutcome::Error(WsError::ProtocolError);
    }
    if len as usize > max_frame_size {
        return ParseOutcome::Error(WsError::MessageTooLarge);
    }

    if buf.len() < pos + 4 {
        return ParseOutcome::NeedMore;
    }
    let mask = [buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]];
    pos += 4;

    let total = pos + len as usize;
    if buf.len() < total {
        return ParseOutcome::NeedMore;
    }

    let mut payload = buf[pos..total].to_vec();
    apply_mask(&mut payload, mask);

    if opcode == OpCode::Close && !payload.is_empty() {
        if payload.len() < 2 {
            return ParseOutcome::Error(WsError::ProtocolError);
        }
        let code = u16::from_be_bytes([payload[0], payload[1]]);
        if !is_valid_close_code(code) {
            return ParseOutcome::Error(WsError::ProtocolError);
        }
        if simdutf8::basic::from_utf8(&payload[2..]).is_err() {
            return ParseOutcome::Error(WsError::ProtocolError);
        }
    }

    ParseOutcome::Frame(Frame { fin, opcode, payload }, total)
}

/// XORs `payload` in place with the repeating 4-byte mask (self-inverse:
/// the same call both masks and unmasks).
pub fn apply_mask(payload: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

/// Close codes 0-999 and {1004, 1005, 1006, 1015} are never valid on the
/// wire (spec.md §4.2); 1012-2999 are reserved for future protocol use;
/// 3000-4999 are available to libraries/applications.
pub const fn is_valid_close_code(code: u16) -> bool {
    match code {
        0..=999 => false,
        1004 | 1005 | 1006 | 1015 => false,
        1000..=1011 => true,
        1012..=2999 => false,
        3000..=4999 => true,
        _ => false,
    }
}

fn write_frame_header(fin: bool, opcode: OpCode, len: usize, out: &mut Vec<u8>) {
    let mut b0 = opcode.as_byte();
    if fin {
        b0 |= 0x80;
    }
    out.push(b0);

    if len <= 125 {
        out.push(len as u8);
    } else if len <= u16::MAX as usize {
        out.push(126);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(127);
        out.extend_from_slice(&(len as u64).to_be_bytes());
    }
}

/// Serializes one unmasked server-to-client frame.
pub fn serialize_frame(fin: bool, opcode: OpCode, payload: &[u8], out: &mut Vec<u8>) {
    write_frame_header(fin, opcode, payload.len(), out);
    out.extend_from_slice(payload);
}

pub fn serialize_text(text: &str, out: &mut Vec<u8>) {
    serialize_frame(true, OpCode::Text, text.as_bytes(), out);
}

pub fn serialize_binary(data: &[u8], out: &mut Vec<u8>) {
    serialize_frame(true, OpCode::Binary, data, out);
}

pub fn serialize_close(code: u16, reason: &str, out: &mut Vec<u8>) {
    let mut payload = Vec::with_capacity(2 + reason.len());
    payload.extend_from_slice(&code.to_be_bytes());
    payload.extend_from_slice(reason.as_bytes());
    serialize_frame(true, OpCode::Close, &payload, out);
}

pub fn serialize_ping(payload: &[u8], out: &mut Vec<u8>) {
    serialize_frame(true, OpCode::Ping, payload, out);
}

pub fn serialize_pong(payload: &[u8], out: &mut Vec<u8>) {
    serialize_frame(true, OpCode::Pong, payload, out);
}

/// Serializes a masked client-role frame; used only by tests that simulate
/// the client side of a round trip.
#[cfg(test)]
fn serialize_masked_frame(fin: bool, opcode: OpCode, payload: &[u8], mask: [u8; 4], out: &mut Vec<u8>) {
    write_frame_header(fin, opcode, payload.len(), out);
    let start = out.len() - 1;
    out[start] |= 0x80;
    out.extend_from_slice(&mask);
    let body_start = out.len();
    out.extend_from_slice(payload);
    apply_mask(&mut out[body_start..], mask);
}

/// Reassembles fragmented text/binary messages. Control frames are not fed
/// through this type — the connection handles them as soon as they are
/// parsed, interleaved or not, per spec.md §4.2.
#[derive(Debug, Default)]
pub struct FragmentAssembler {
    opcode: Option<OpCode>,
    buffer: Vec<u8>,
}

impl FragmentAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one data frame (`Text`/`Binary` to start a message,
    /// `Continuation` to extend one). Returns the assembled message once
    /// the final fragment arrives.
    pub fn push(&mut self, frame: Frame) -> Result<Option<WsMessage>, WsError> {
        match (self.opcode, frame.opcode) {
            (None, OpCode::Text) | (None, OpCode::Binary) => {
                self.opcode = Some(frame.opcode);
                self.buffer = frame.payload;
            }
            (Some(_), OpCode::Continuation) => {
                self.buffer.extend_from_slice(&frame.payload);
            }
            _ => return Err(WsError::ProtocolError),
        }

        if !frame.fin {
            return Ok(None);
        }

        let opcode = self.opcode.take().expect("set above on first fragment");
        let payload = std::mem::take(&mut self.buffer);
        match opcode {
            OpCode::Text => {
                // simdutf8 validates in one pass over the full reassembled
                // payload instead of per-fragment; the bytes are already
                // known-valid UTF-8 once this returns, so building the
                // `String` doesn't re-check them.
                simdutf8::basic::from_utf8(&payload).map_err(|_| WsError::InvalidUtf8)?;
                let text = unsafe { String::from_utf8_unchecked(payload) };
                Ok(Some(WsMessage::Text(text)))
            }
            OpCode::Binary => Ok(Some(WsMessage::Bytes(payload))),
            _ => unreachable!("only Text/Binary ever open a fragment sequence"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_key_matches_rfc_example() {
        // RFC 6455 §1.3 worked example.
        assert_eq!(accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn round_trips_masked_text_frame() {
        let mut buf = Vec::new();
        serialize_masked_frame(true, OpCode::Text, b"hello", [0x12, 0x34, 0x56, 0x78], &mut buf);

        match parse_frame(&buf, 65536) {
            ParseOutcome::Frame(frame, consumed) => {
                assert_eq!(consumed, buf.len());
                assert_eq!(frame.opcode, OpCode::Text);
                assert_eq!(frame.payload, b"hello");
                assert!(frame.fin);
            }
            _ => panic!("expected a complete frame"),
        }
    }

    #[test]
    fn rejects_unmasked_client_frame() {
        let mut buf = Vec::new();
        serialize_frame(true, OpCode::Text, b"hi", &mut buf);
        assert!(matches!(parse_frame(&buf, 65536), ParseOutcome::Error(WsError::ProtocolError)));
    }

    #[test]
    fn rejects_fragmented_control_frame() {
        let mut buf = Vec::new();
        serialize_masked_frame(false, OpCode::Ping, b"x", [0, 0, 0, 0], &mut buf);
        assert!(matches!(parse_frame(&buf, 65536), ParseOutcome::Error(WsError::ProtocolError)));
    }

    #[test]
    fn rejects_oversized_control_frame() {
        let payload = vec![0u8; 126];
        let mut buf = Vec::new();
        serialize_masked_frame(true, OpCode::Ping, &payload, [1, 2, 3, 4], &mut buf);
        assert!(matches!(parse_frame(&buf, 65536), ParseOutcome::Error(WsError::ProtocolError)));
    }

    #[test]
    fn enforces_max_frame_size() {
        let payload = vec![0u8; 200];
        let mut buf = Vec::new();
        serialize_masked_frame(true, OpCode::Binary, &payload, [9, 8, 7, 6], &mut buf);
        assert!(matches!(parse_frame(&buf, 100), ParseOutcome::Error(WsError::MessageTooLarge)));
    }

    #[test]
    fn close_code_validation_matches_table() {
        assert!(!is_valid_close_code(999));
        assert!(is_valid_close_code(1000));
        assert!(!is_valid_close_code(1005));
        assert!(is_valid_close_code(1011));
        assert!(!is_valid_close_code(1012));
        assert!(is_valid_close_code(3000));
        assert!(is_valid_close_code(4999));
        assert!(!is_valid_close_code(5000));
    }

    #[test]
    fn fragment_assembler_reassembles_text() {
        let mut assembler = FragmentAssembler::new();
        let first = Frame { fin: false, opcode: OpCode::Text, payload: b"hel".to_vec() };
        let second = Frame { fin: true, opcode: OpCode::Continuation, payload: b"lo".to_vec() };

        assert!(assembler.push(first).unwrap().is_none());
        let message = assembler.push(second).unwrap().unwrap();
        assert_eq!(message, WsMessage::Text("hello".to_string()));
    }

    #[test]
    fn fragment_assembler_rejects_invalid_utf8() {
        let mut assembler = FragmentAssembler::new();
        let frame = Frame { fin: true, opcode: OpCode::Text, payload: vec![0xFF] };
        assert!(matches!(assembler.push(frame), Err(WsError::InvalidUtf8)));
    }
}
