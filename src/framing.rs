//! SLIP-style byte framing for the fixed-size serial links
//!
//! Frame format: `[FRAME_START] [frame type] [escaped payload] [FRAME_END]`,
//! zero-padded to the fixed link buffer length. Payload bytes that collide
//! with a marker are sent as `ESCAPE` followed by `byte ^ XOR_MASK`. The
//! frame-type byte itself is sent unescaped; frame types are allocated
//! outside the reserved range.

/// Start-of-frame marker
pub const FRAME_START: u8 = 0x7E;
/// End-of-frame marker
pub const FRAME_END: u8 = 0x7F;
/// Escape marker
pub const ESCAPE: u8 = 0x7D;
/// XOR mask applied to escaped bytes
pub const XOR_MASK: u8 = 0x20;

/// Unescaped payload budget per frame, in bytes
pub const CHUNK_PAYLOAD_LEN: usize = 256;
/// On-the-wire frame length: worst-case escaped payload plus markers,
/// padded so every link read is the same size
pub const LINK_FRAME_LEN: usize = 515;

/// Escape `payload` and wrap it into a fixed-length link frame
pub fn encode(frame_type: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(LINK_FRAME_LEN);
    out.push(FRAME_START);
    out.push(frame_type);

    for &b in payload {
        if b == FRAME_START || b == FRAME_END || b == ESCAPE {
            out.push(ESCAPE);
            out.push(b ^ XOR_MASK);
        } else {
            out.push(b);
        }
    }

    out.push(FRAME_END);

    // Every link transfer is exactly LINK_FRAME_LEN bytes
    if out.len() > LINK_FRAME_LEN {
        out.truncate(LINK_FRAME_LEN);
    } else {
        out.resize(LINK_FRAME_LEN, 0);
    }
    out
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Accept,
    Escape,
}

/// Unwrap a link frame, returning `(frame_type, payload)`
///
/// Returns `None` if the buffer does not start with `FRAME_START`, or if a
/// bare `FRAME_START` appears mid-frame (a resync error on the wire). The
/// escape state machine consumes exactly one byte after each `ESCAPE`.
pub fn decode(buf: &[u8]) -> Option<(u8, Vec<u8>)> {
    let mut bytes = buf.iter().copied();
    if bytes.next()? != FRAME_START {
        return None;
    }
    let frame_type = bytes.next()?;

    let mut payload = Vec::new();
    let mut state = DecodeState::Accept;

    for b in bytes {
        match state {
            DecodeState::Accept => match b {
                FRAME_START => return None,
                FRAME_END => return Some((frame_type, payload)),
                ESCAPE => state = DecodeState::Escape,
                _ => payload.push(b),
            },
            DecodeState::Escape => {
                payload.push(b ^ XOR_MASK);
                state = DecodeState::Accept;
            }
        }
    }

    // Ran out of input before FRAME_END
    None
}

/// Number of link chunks needed to carry `byte_len` bytes
///
/// Ceiling division throughout: an exact multiple of the budget gets no
/// extra chunk.
pub fn chunk_count(byte_len: usize, budget: usize) -> usize {
    byte_len.div_ceil(budget)
}

/// Split a sample buffer into encoded link frames
///
/// Samples are serialized little-endian and cut into `CHUNK_PAYLOAD_LEN`
/// pieces, each wrapped in its own frame. The receiver prunes the final
/// chunk back to the advertised length.
pub fn chunk(frame_type: u8, samples: &[u16]) -> Vec<Vec<u8>> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        bytes.extend_from_slice(&s.to_le_bytes());
    }

    bytes
        .chunks(CHUNK_PAYLOAD_LEN)
        .map(|c| encode(frame_type, c))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_plain() {
        let payload = b"sonar frame payload";
        let encoded = encode(0x01, payload);
        assert_eq!(encoded.len(), LINK_FRAME_LEN);
        let (ftype, decoded) = decode(&encoded).unwrap();
        assert_eq!(ftype, 0x01);
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_round_trip_reserved_bytes() {
        // Every reserved marker must survive the trip
        let payload = [FRAME_START, ESCAPE, FRAME_END, 0x00, FRAME_START, 0xFF];
        let encoded = encode(0x02, &payload);
        let (ftype, decoded) = decode(&encoded).unwrap();
        assert_eq!(ftype, 0x02);
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_round_trip_all_byte_values() {
        let payload: Vec<u8> = (0..=255).collect();
        let encoded = encode(0x03, &payload);
        let (_, decoded) = decode(&encoded).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_decode_rejects_bad_start() {
        let mut encoded = encode(0x01, b"abc");
        encoded[0] = 0x00;
        assert!(decode(&encoded).is_none());
    }

    #[test]
    fn test_decode_rejects_bare_start_mid_frame() {
        // Hand-build a corrupt frame with an unescaped start marker
        let frame = [FRAME_START, 0x01, 0x41, FRAME_START, 0x42, FRAME_END];
        assert!(decode(&frame).is_none());
    }

    #[test]
    fn test_decode_missing_end() {
        let frame = [FRAME_START, 0x01, 0x41, 0x42];
        assert!(decode(&frame).is_none());
    }

    #[test]
    fn test_escape_consumes_one_byte() {
        // ESCAPE followed by an (escaped) FRAME_END must not terminate
        let frame = [
            FRAME_START,
            0x01,
            ESCAPE,
            FRAME_END ^ XOR_MASK,
            0x10,
            FRAME_END,
        ];
        let (_, decoded) = decode(&frame).unwrap();
        assert_eq!(decoded, [FRAME_END, 0x10]);
    }

    #[test]
    fn test_chunk_count_ceiling() {
        // 64 does not divide 2*30000: floor(60000/64) + 1
        assert_eq!(chunk_count(60_000, 64), 938);
        // 64 divides 2*60000 exactly: no extra chunk
        assert_eq!(chunk_count(120_000, 64), 1875);
        assert_eq!(chunk_count(0, 64), 0);
        assert_eq!(chunk_count(1, 64), 1);
    }

    #[test]
    fn test_chunk_splits_to_budget() {
        let samples: Vec<u16> = (0..400).collect();
        let frames = chunk(0x05, &samples);
        // 800 bytes over a 256-byte budget
        assert_eq!(frames.len(), chunk_count(800, CHUNK_PAYLOAD_LEN));
        assert_eq!(frames.len(), 4);
        for f in &frames {
            assert_eq!(f.len(), LINK_FRAME_LEN);
        }

        // Reassemble and compare
        let mut bytes = Vec::new();
        for f in &frames {
            let (ftype, payload) = decode(f).unwrap();
            assert_eq!(ftype, 0x05);
            bytes.extend_from_slice(&payload);
        }
        let rebuilt: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|p| u16::from_le_bytes([p[0], p[1]]))
            .collect();
        assert_eq!(rebuilt, samples);
    }
}
