//! Wire format for STCP segments: a fixed header plus an optional payload.
//!
//! Unlike the real TCP header the prior art borrowed from `etherparse`,
//! this header carries no ports, checksum, or urgent pointer — the
//! `Facade` already identifies which connection a segment belongs to, and
//! corruption is explicitly outside this layer's remit (see spec.md §1).
//! Data offset is still fixed at 5 32-bit words so the header is 20 bytes,
//! matching the source's `th_off = 5` and keeping `MAX_SEGMENT_LEN` at the
//! spec's 536 octets.

use std::fmt;

/// Size of the fixed STCP header, in bytes.
pub const HEADER_LEN: usize = 20;
/// Maximum STCP segment length on the wire, header included.
pub const MAX_SEGMENT_LEN: usize = 536;
/// Maximum payload a single segment may carry.
pub const MAX_PAYLOAD: usize = MAX_SEGMENT_LEN - HEADER_LEN;
/// Fixed data-offset value, in 32-bit words.
const DATA_OFFSET_WORDS: u8 = 5;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("segment shorter than the {HEADER_LEN}-byte header ({0} bytes)")]
    Truncated(usize),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags {
    pub syn: bool,
    pub ack: bool,
    pub fin: bool,
}

impl Flags {
    pub const SYN: Flags = Flags { syn: true, ack: false, fin: false };
    pub const ACK: Flags = Flags { syn: false, ack: true, fin: false };
    pub const FIN: Flags = Flags { syn: false, ack: false, fin: true };
    pub const SYN_ACK: Flags = Flags { syn: true, ack: true, fin: false };
    pub const FIN_ACK: Flags = Flags { syn: false, ack: true, fin: true };

    fn to_bits(self) -> u8 {
        (self.syn as u8) << 2 | (self.ack as u8) << 1 | (self.fin as u8)
    }

    fn from_bits(bits: u8) -> Flags {
        Flags {
            syn: bits & 0b100 != 0,
            ack: bits & 0b010 != 0,
            fin: bits & 0b001 != 0,
        }
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (set, name) in [(self.syn, "SYN"), (self.ack, "ACK"), (self.fin, "FIN")] {
            if set {
                if !first {
                    write!(f, "+")?;
                }
                write!(f, "{name}")?;
                first = false;
            }
        }
        if first {
            write!(f, "-")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub seq: u32,
    pub ack: u32,
    pub flags: Flags,
    pub window: u16,
}

impl Header {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&self.seq.to_be_bytes());
        buf[4..8].copy_from_slice(&self.ack.to_be_bytes());
        // data-offset (4 bits) | reserved (3 bits) | flags (9 bits, we use 3)
        let offset_reserved_flags: u16 = (DATA_OFFSET_WORDS as u16) << 12 | self.flags.to_bits() as u16;
        buf[8..10].copy_from_slice(&offset_reserved_flags.to_be_bytes());
        buf[10..12].copy_from_slice(&self.window.to_be_bytes());
        // bytes 12..20 are reserved/unused and left zero.
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Header, CodecError> {
        if bytes.len() < HEADER_LEN {
            return Err(CodecError::Truncated(bytes.len()));
        }
        let seq = u32::from_be_bytes(bytes[0..4].try_into().unwrap());
        let ack = u32::from_be_bytes(bytes[4..8].try_into().unwrap());
        let offset_reserved_flags = u16::from_be_bytes(bytes[8..10].try_into().unwrap());
        let flags = Flags::from_bits((offset_reserved_flags & 0x1ff) as u8);
        let window = u16::from_be_bytes(bytes[10..12].try_into().unwrap());
        Ok(Header { seq, ack, flags, window })
    }
}

/// A segment: header plus payload. `payload.len()` never exceeds
/// [`MAX_PAYLOAD`]; callers that build segments (the send pipeline) are
/// responsible for chunking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Segment {
    pub fn new(header: Header, payload: Vec<u8>) -> Segment {
        Segment { header, payload }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.payload.len());
        bytes.extend_from_slice(&self.header.encode());
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Result<Segment, CodecError> {
        let header = Header::decode(bytes)?;
        Ok(Segment { header, payload: bytes[HEADER_LEN..].to_vec() })
    }

    /// Wire length, header included.
    pub fn len(&self) -> u32 {
        HEADER_LEN as u32 + self.payload.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty() && !self.header.flags.syn && !self.header.flags.fin
    }

    /// Number of sequence numbers this segment consumes. A bare handshake
    /// SYN/SYN+ACK (no payload, not FIN) occupies exactly one, like a real
    /// TCP SYN. Everything else that consumes sequence space — a
    /// data-bearing segment (the overloaded SYN flag with a payload) or a
    /// FIN — consumes its full wire length, header included, matching the
    /// source's `ackNum = seqNum + packetLen` where `packetLen` is the
    /// total packet length rather than just the payload. A pure ACK
    /// consumes none.
    pub fn seq_len(&self) -> u32 {
        if self.header.flags.fin || !self.payload.is_empty() {
            HEADER_LEN as u32 + self.payload.len() as u32
        } else if self.header.flags.syn {
            1
        } else {
            0
        }
    }

    /// The sequence number the peer will ACK once this segment is fully
    /// accepted: `seq + seq_len`.
    pub fn ack_expected(&self) -> u32 {
        self.header.seq.wrapping_add(self.seq_len())
    }

    /// Whether this segment carries application data or a control flag
    /// that advances the receive sequence space (SYN-flagged data, or
    /// FIN) — as opposed to a pure ACK.
    pub fn is_control_or_data(&self) -> bool {
        self.header.flags.syn || self.header.flags.fin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let h = Header { seq: 0xdead_beef, ack: 12345, flags: Flags::SYN_ACK, window: 3072 };
        let encoded = h.encode();
        assert_eq!(encoded.len(), HEADER_LEN);
        let decoded = Header::decode(&encoded).unwrap();
        assert_eq!(h, decoded);
    }

    #[test]
    fn segment_round_trips_with_payload() {
        let seg = Segment::new(
            Header { seq: 100, ack: 0, flags: Flags::SYN, window: 3072 },
            b"hello world".to_vec(),
        );
        let encoded = seg.encode();
        assert_eq!(encoded.len(), HEADER_LEN + 11);
        let decoded = Segment::decode(&encoded).unwrap();
        assert_eq!(seg, decoded);
        // Data-bearing segment: full wire length, header included.
        assert_eq!(decoded.seq_len(), HEADER_LEN as u32 + 11);
        assert_eq!(decoded.ack_expected(), 100 + HEADER_LEN as u32 + 11);
    }

    #[test]
    fn bare_syn_consumes_exactly_one_sequence_number() {
        let syn = Segment::new(Header { seq: 100, ack: 0, flags: Flags::SYN, window: 3072 }, Vec::new());
        assert_eq!(syn.seq_len(), 1);
        assert_eq!(syn.ack_expected(), 101);
    }

    #[test]
    fn fin_consumes_full_header_length() {
        let fin = Segment::new(Header { seq: 200, ack: 50, flags: Flags::FIN, window: 3072 }, Vec::new());
        assert_eq!(fin.seq_len(), HEADER_LEN as u32);
        assert_eq!(fin.ack_expected(), 200 + HEADER_LEN as u32);
    }

    #[test]
    fn decode_rejects_truncated_input() {
        let err = Header::decode(&[0u8; 4]).unwrap_err();
        assert_eq!(err, CodecError::Truncated(4));
    }

    #[test]
    fn pure_ack_consumes_no_sequence_space() {
        let seg = Segment::new(Header { seq: 50, ack: 10, flags: Flags::ACK, window: 100 }, vec![]);
        assert_eq!(seg.seq_len(), 0);
        assert!(!seg.is_control_or_data());
        assert!(seg.is_empty());
    }

    #[test]
    fn flags_display_lists_set_bits() {
        assert_eq!(Flags::SYN_ACK.to_string(), "SYN+ACK");
        assert_eq!(Flags::default().to_string(), "-");
    }
}
