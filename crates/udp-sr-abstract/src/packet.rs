use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Fixed payload capacity of every data frame.
pub const PAYLOAD_CAPACITY: usize = 500;
/// Sequence number + payload length.
pub const DATA_HEADER_LEN: usize = 8;
/// Every data frame has exactly this size on the wire, whatever its payload length.
pub const DATA_FRAME_LEN: usize = DATA_HEADER_LEN + PAYLOAD_CAPACITY;
pub const ACK_FRAME_LEN: usize = 4;
pub const PREAMBLE_LEN: usize = 8;

/// `payload_len` value marking the end of the stream.
pub const EOF_SENTINEL: i32 = -1;
/// Acknowledgment sequence number reserved for the stream preamble.
pub const PREAMBLE_ACK: i32 = -1;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("datagram of {0} bytes is not a preamble, data or ack frame")]
    FrameSize(usize),
    #[error("payload length {0} is outside [-1, 500]")]
    PayloadLength(i32),
    #[error("payload of {0} bytes exceeds the frame capacity")]
    PayloadTooLarge(usize),
    #[error("negative sequence number {0}")]
    Sequence(i32),
}

/// One slot's worth of stream data.
///
/// Only the meaningful bytes are kept in memory; [`DataPacket::encode`] pads
/// them to [`PAYLOAD_CAPACITY`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    /// Round-relative slot index.
    pub seq: i32,
    /// Number of meaningful payload bytes, or [`EOF_SENTINEL`].
    pub payload_len: i32,
    pub payload: Bytes,
}

impl DataPacket {
    pub fn new(seq: i32, payload: Bytes) -> Result<Self, CodecError> {
        if seq < 0 {
            return Err(CodecError::Sequence(seq));
        }
        if payload.len() > PAYLOAD_CAPACITY {
            return Err(CodecError::PayloadTooLarge(payload.len()));
        }
        Ok(Self {
            seq,
            payload_len: payload.len() as i32,
            payload,
        })
    }

    /// The end-of-stream marker occupying slot `seq`.
    pub fn eof(seq: i32) -> Self {
        Self {
            seq,
            payload_len: EOF_SENTINEL,
            payload: Bytes::new(),
        }
    }

    pub fn is_eof(&self) -> bool {
        self.payload_len == EOF_SENTINEL
    }

    /// Meaningful payload bytes (empty for the sentinel).
    pub fn data(&self) -> &[u8] {
        &self.payload
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(DATA_FRAME_LEN);
        buf.put_i32_le(self.seq);
        buf.put_i32_le(self.payload_len);
        buf.put_slice(&self.payload);
        buf.resize(DATA_FRAME_LEN, 0);
        buf.freeze()
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, CodecError> {
        if buf.len() != DATA_FRAME_LEN {
            return Err(CodecError::FrameSize(buf.len()));
        }
        let seq = buf.get_i32_le();
        let payload_len = buf.get_i32_le();
        if seq < 0 {
            return Err(CodecError::Sequence(seq));
        }
        if payload_len == EOF_SENTINEL {
            return Ok(Self::eof(seq));
        }
        if payload_len < 0 || payload_len as usize > PAYLOAD_CAPACITY {
            return Err(CodecError::PayloadLength(payload_len));
        }
        Ok(Self {
            seq,
            payload_len,
            payload: Bytes::copy_from_slice(&buf[..payload_len as usize]),
        })
    }
}

/// Acknowledgment of one slot in the current round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub seq: i32,
}

impl Ack {
    pub fn new(seq: i32) -> Self {
        Self { seq }
    }

    pub fn preamble() -> Self {
        Self { seq: PREAMBLE_ACK }
    }

    pub fn is_preamble(&self) -> bool {
        self.seq == PREAMBLE_ACK
    }

    pub fn encode(&self) -> Bytes {
        Bytes::copy_from_slice(&self.seq.to_le_bytes())
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, CodecError> {
        if buf.len() != ACK_FRAME_LEN {
            return Err(CodecError::FrameSize(buf.len()));
        }
        let seq = buf.get_i32_le();
        if seq < PREAMBLE_ACK {
            return Err(CodecError::Sequence(seq));
        }
        Ok(Self { seq })
    }
}

/// Total stream length, sent once before round 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preamble {
    pub total_len: u64,
}

impl Preamble {
    pub fn encode(&self) -> Bytes {
        Bytes::copy_from_slice(&self.total_len.to_le_bytes())
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, CodecError> {
        if buf.len() != PREAMBLE_LEN {
            return Err(CodecError::FrameSize(buf.len()));
        }
        Ok(Self {
            total_len: buf.get_u64_le(),
        })
    }
}

/// Any datagram the protocol exchanges, classified by its exact size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Preamble(Preamble),
    Data(DataPacket),
    Ack(Ack),
}

impl Frame {
    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        match buf.len() {
            PREAMBLE_LEN => Preamble::decode(buf).map(Frame::Preamble),
            DATA_FRAME_LEN => DataPacket::decode(buf).map(Frame::Data),
            ACK_FRAME_LEN => Ack::decode(buf).map(Frame::Ack),
            other => Err(CodecError::FrameSize(other)),
        }
    }

    pub fn encode(&self) -> Bytes {
        match self {
            Frame::Preamble(p) => p.encode(),
            Frame::Data(d) => d.encode(),
            Frame::Ack(a) => a.encode(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Preamble(_) => "preamble",
            Frame::Data(_) => "data",
            Frame::Ack(_) => "ack",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_frame_is_fixed_size() {
        let short = DataPacket::new(3, Bytes::from_static(b"abc")).unwrap();
        let eof = DataPacket::eof(4);
        assert_eq!(short.encode().len(), DATA_FRAME_LEN);
        assert_eq!(eof.encode().len(), DATA_FRAME_LEN);
    }

    #[test]
    fn data_layout_is_little_endian() {
        let packet = DataPacket::new(2, Bytes::from_static(b"xy")).unwrap();
        let wire = packet.encode();
        assert_eq!(&wire[..4], &[2, 0, 0, 0]);
        assert_eq!(&wire[4..8], &[2, 0, 0, 0]);
        assert_eq!(&wire[8..10], b"xy");

        let eof = DataPacket::eof(1).encode();
        assert_eq!(&eof[4..8], &[0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn decode_ignores_padding() {
        let mut wire = BytesMut::from(&DataPacket::new(0, Bytes::from_static(b"hi")).unwrap().encode()[..]);
        wire[20] = 0xAA;
        let packet = DataPacket::decode(&wire).unwrap();
        assert_eq!(packet.data(), b"hi");
        assert_eq!(packet.payload_len, 2);
    }

    #[test]
    fn decode_sentinel() {
        let packet = DataPacket::decode(&DataPacket::eof(4).encode()).unwrap();
        assert!(packet.is_eof());
        assert_eq!(packet.seq, 4);
        assert!(packet.data().is_empty());
    }

    #[test]
    fn decode_rejects_bad_lengths() {
        let mut wire = BytesMut::zeroed(DATA_FRAME_LEN);
        wire[4..8].copy_from_slice(&501i32.to_le_bytes());
        assert_eq!(DataPacket::decode(&wire), Err(CodecError::PayloadLength(501)));

        wire[4..8].copy_from_slice(&(-2i32).to_le_bytes());
        assert_eq!(DataPacket::decode(&wire), Err(CodecError::PayloadLength(-2)));

        assert_eq!(DataPacket::decode(&wire[..100]), Err(CodecError::FrameSize(100)));
    }

    #[test]
    fn oversized_payload_rejected() {
        let err = DataPacket::new(0, Bytes::from(vec![0u8; PAYLOAD_CAPACITY + 1])).unwrap_err();
        assert_eq!(err, CodecError::PayloadTooLarge(PAYLOAD_CAPACITY + 1));
    }

    #[test]
    fn frames_classified_by_size() {
        let preamble = Preamble { total_len: 1600 }.encode();
        assert_eq!(Frame::decode(&preamble).unwrap(), Frame::Preamble(Preamble { total_len: 1600 }));

        let ack = Ack::new(3).encode();
        assert_eq!(ack.len(), ACK_FRAME_LEN);
        assert_eq!(Frame::decode(&ack).unwrap(), Frame::Ack(Ack::new(3)));

        let preamble_ack = Frame::decode(&Ack::preamble().encode()).unwrap();
        assert!(matches!(preamble_ack, Frame::Ack(a) if a.is_preamble()));

        assert_eq!(Frame::decode(&[0u8; 12]), Err(CodecError::FrameSize(12)));
    }
}
