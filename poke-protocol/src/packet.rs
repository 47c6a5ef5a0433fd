//! Wire format for protocol datagrams.
//!
//! Every datagram exchanged between peers is one [`Packet`].  This module
//! only turns packets into bytes and back; it does no I/O and knows nothing
//! about what the payload means.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Kind      |        Payload Length         |  Payload ...  |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+               +
//! |                          ... Payload                          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                     CRC-32 (all preceding)                    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Header: [`HEADER_LEN`] = 7 bytes, seq(4) + kind(1) + payload_len(2).
//! Trailer: [`TRAILER_LEN`] = 4 bytes of CRC-32 (IEEE, reflected).

pub use crate::error::PacketError;

/// Byte length of the fixed header.
pub const HEADER_LEN: usize = 7;
/// Byte length of the checksum trailer.
pub const TRAILER_LEN: usize = 4;
/// Largest payload [`Packet::encode`] accepts; keeps datagrams under a
/// typical path MTU.
pub const MAX_PAYLOAD: usize = 1200;

const OFF_SEQ: usize = 0;
const OFF_KIND: usize = 4;
const OFF_PAYLOAD_LEN: usize = 5;

/// Message kind tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Kind {
    Hello = 1,
    HelloAck = 2,
    Ack = 3,
    Attack = 4,
    Chat = 5,
    Status = 6,
    Bye = 7,
    Error = 8,
}

impl Kind {
    /// Whether datagrams of this kind carry a sequence number and go through
    /// retransmission.  ACK and BYE are fire-and-forget with `seq = 0`.
    pub fn is_sequenced(self) -> bool {
        !matches!(self, Kind::Ack | Kind::Bye)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Hello => "HELLO",
            Kind::HelloAck => "HELLO_ACK",
            Kind::Ack => "ACK",
            Kind::Attack => "ATTACK",
            Kind::Chat => "CHAT",
            Kind::Status => "STATUS",
            Kind::Bye => "BYE",
            Kind::Error => "ERROR",
        }
    }
}

impl TryFrom<u8> for Kind {
    type Error = PacketError;

    fn try_from(b: u8) -> Result<Self, PacketError> {
        Ok(match b {
            1 => Kind::Hello,
            2 => Kind::HelloAck,
            3 => Kind::Ack,
            4 => Kind::Attack,
            5 => Kind::Chat,
            6 => Kind::Status,
            7 => Kind::Bye,
            8 => Kind::Error,
            other => return Err(PacketError::UnknownKind(other)),
        })
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A complete protocol datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub seq: u32,
    pub kind: Kind,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(seq: u32, kind: Kind, payload: Vec<u8>) -> Self {
        Self { seq, kind, payload }
    }

    /// Acknowledgement of `acked`.
    pub fn ack(acked: u32) -> Self {
        Self::new(0, Kind::Ack, acked.to_be_bytes().to_vec())
    }

    /// The sequence number an ACK acknowledges, or `None` for any other
    /// kind or a malformed ACK body.
    pub fn acked_seq(&self) -> Option<u32> {
        if self.kind != Kind::Ack {
            return None;
        }
        let bytes: [u8; 4] = self.payload.as_slice().try_into().ok()?;
        Some(u32::from_be_bytes(bytes))
    }

    /// Serialise into a newly allocated buffer.
    ///
    /// The length field and checksum are computed here.
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let payload_len = self.payload.len();
        if payload_len > MAX_PAYLOAD {
            return Err(PacketError::PayloadTooLarge(payload_len));
        }

        let mut buf = Vec::with_capacity(HEADER_LEN + payload_len + TRAILER_LEN);
        buf.extend_from_slice(&self.seq.to_be_bytes());
        buf.push(self.kind as u8);
        buf.extend_from_slice(&(payload_len as u16).to_be_bytes());
        buf.extend_from_slice(&self.payload);

        let crc = crc32(&buf);
        buf.extend_from_slice(&crc.to_be_bytes());
        Ok(buf)
    }

    /// Parse a packet from a raw datagram.
    ///
    /// Returns [`Err`] if the buffer is shorter than header + trailer, the
    /// `payload_len` field disagrees with the buffer, the checksum does not
    /// verify, or the kind is unknown.  The checksum is checked before the
    /// kind so that line noise reports as corruption.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_LEN + TRAILER_LEN {
            return Err(PacketError::BufferTooShort);
        }

        let declared = usize::from(u16::from_be_bytes([
            buf[OFF_PAYLOAD_LEN],
            buf[OFF_PAYLOAD_LEN + 1],
        ]));
        let actual = buf.len() - HEADER_LEN - TRAILER_LEN;
        if declared != actual {
            return Err(PacketError::LengthMismatch { declared, actual });
        }

        let (body, trailer) = buf.split_at(buf.len() - TRAILER_LEN);
        let stored = u32::from_be_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        if crc32(body) != stored {
            return Err(PacketError::ChecksumFailed);
        }

        let seq = u32::from_be_bytes([
            buf[OFF_SEQ],
            buf[OFF_SEQ + 1],
            buf[OFF_SEQ + 2],
            buf[OFF_SEQ + 3],
        ]);
        let kind = Kind::try_from(buf[OFF_KIND])?;

        Ok(Packet {
            seq,
            kind,
            payload: body[HEADER_LEN..].to_vec(),
        })
    }
}

// ---------------------------------------------------------------------------
// CRC-32
// ---------------------------------------------------------------------------

/// CRC-32 (IEEE 802.3) over `data`; the packet trailer.
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let pkt = Packet::new(42, Kind::Chat, br#"{"text":"hi"}"#.to_vec());
        let decoded = Packet::decode(&pkt.encode().unwrap()).unwrap();
        assert_eq!(decoded, pkt);
    }

    #[test]
    fn crc32_check_value() {
        // Standard check value for "123456789".
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(crc32(b""), 0);
    }

    #[test]
    fn layout_is_big_endian() {
        let bytes = Packet::new(0x0102_0304, Kind::Attack, b"xy".to_vec())
            .encode()
            .unwrap();
        assert_eq!(&bytes[OFF_SEQ..OFF_SEQ + 4], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(bytes[OFF_KIND], 4);
        assert_eq!(&bytes[OFF_PAYLOAD_LEN..OFF_PAYLOAD_LEN + 2], &[0, 2]);
        assert_eq!(bytes.len(), HEADER_LEN + 2 + TRAILER_LEN);
    }

    #[test]
    fn ack_carries_sequence_number() {
        let ack = Packet::ack(77);
        assert_eq!(ack.seq, 0);
        assert_eq!(ack.payload, 77u32.to_be_bytes());
        let back = Packet::decode(&ack.encode().unwrap()).unwrap();
        assert_eq!(back.acked_seq(), Some(77));
        assert_eq!(Packet::new(0, Kind::Ack, vec![1]).acked_seq(), None);
        assert_eq!(Packet::new(5, Kind::Chat, vec![0; 4]).acked_seq(), None);
    }

    #[test]
    fn decode_short_buffer() {
        assert_eq!(Packet::decode(&[]), Err(PacketError::BufferTooShort));
        assert_eq!(
            Packet::decode(&[0u8; HEADER_LEN + TRAILER_LEN - 1]),
            Err(PacketError::BufferTooShort)
        );
    }

    #[test]
    fn decode_truncated_payload() {
        let mut bytes = Packet::new(1, Kind::Chat, b"data".to_vec()).encode().unwrap();
        bytes.remove(HEADER_LEN);
        assert_eq!(
            Packet::decode(&bytes),
            Err(PacketError::LengthMismatch {
                declared: 4,
                actual: 3
            })
        );
    }

    #[test]
    fn any_flipped_bit_is_caught() {
        let bytes = Packet::new(9, Kind::Status, b"payload".to_vec()).encode().unwrap();
        for i in 0..bytes.len() {
            let mut corrupt = bytes.clone();
            corrupt[i] ^= 0x10;
            assert!(Packet::decode(&corrupt).is_err(), "flip at byte {i} accepted");
        }
    }

    #[test]
    fn unknown_kind_with_valid_checksum() {
        let mut body = vec![0, 0, 0, 1, 0xEE, 0, 0];
        let crc = crc32(&body);
        body.extend_from_slice(&crc.to_be_bytes());
        assert_eq!(Packet::decode(&body), Err(PacketError::UnknownKind(0xEE)));
    }

    #[test]
    fn oversized_payload_rejected() {
        let pkt = Packet::new(1, Kind::Chat, vec![b'a'; MAX_PAYLOAD + 1]);
        assert_eq!(pkt.encode(), Err(PacketError::PayloadTooLarge(MAX_PAYLOAD + 1)));
        assert!(Packet::new(1, Kind::Chat, vec![b'a'; MAX_PAYLOAD]).encode().is_ok());
    }

    #[test]
    fn only_ack_and_bye_are_unsequenced() {
        for k in 1..=8u8 {
            let kind = Kind::try_from(k).unwrap();
            assert_eq!(kind.is_sequenced(), !matches!(kind, Kind::Ack | Kind::Bye));
        }
    }
}
