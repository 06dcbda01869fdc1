/// TAIFEX market-data framing
///
/// Every frame on the multicast feed is laid out as:
///   [ESC(1)] [header-remaining(18)] [body(body_length)] [checksum(1)] [terminator(2)]
/// The 19-byte common header is:
///   - escape byte (literal 0x1B)
///   - transmission code: X(1), feed partition
///   - message kind: X(1), sub-type within the partition
///   - information time: 9(12) packed BCD, HHMMSSmmmuuu
///   - channel id: 9(4) packed BCD
///   - channel sequence: 9(10) packed BCD
///   - version: 9(2) packed BCD
///   - body length: 9(4) packed BCD
///
/// The checksum is the XOR of all bytes between ESC and the checksum byte.
/// The terminator is 0x0D 0x0A by convention but is not verified.

use crate::bcd;
use crate::checksum::xor_checksum;
use crate::error::{FeedError, FeedResult};

pub const ESC: u8 = 0x1B;
pub const HEADER_SIZE: usize = 19;
/// Checksum byte plus two terminator bytes.
pub const TRAILER_SIZE: usize = 3;
pub const MIN_FRAME_SIZE: usize = HEADER_SIZE + TRAILER_SIZE;

/// Logical message family, derived from (transmission code, message kind).
///
/// The same logical message appears on the futures and options partitions
/// under different transmission codes, so several pairs map to one tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageId {
    Heartbeat,
    SequenceReset,
    ProductBasic,
    OrderBookSnapshot,
    OrderBookUpdate,
    /// Recognized feed partition but a message family this crate does not
    /// interpret; carried so callers can count and skip it.
    Other(u8, u8),
}

impl MessageId {
    /// Map a (transmission code, message kind) pair from the reference
    /// manual's message table onto a logical tag.
    pub fn from_codes(tc: u8, mk: u8) -> Self {
        match (tc, mk) {
            (b'0', b'1') => MessageId::Heartbeat,
            (b'0', b'2') => MessageId::SequenceReset,
            // Futures partitions ('1' basics, '2' realtime quotes).
            (b'1', b'1') => MessageId::ProductBasic,
            (b'2', b'A') => MessageId::OrderBookUpdate,
            (b'2', b'B') => MessageId::OrderBookSnapshot,
            // Options partitions ('4' basics, '5' realtime quotes).
            (b'4', b'1') => MessageId::ProductBasic,
            (b'5', b'A') => MessageId::OrderBookUpdate,
            (b'5', b'B') => MessageId::OrderBookSnapshot,
            _ => MessageId::Other(tc, mk),
        }
    }
}

/// Parsed common header.
///
/// The fixed single-byte fields are decoded eagerly; BCD fields keep their
/// raw bytes and convert on access, so a frame with a corrupt numeric
/// field can still be classified and logged before being dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommonHeader {
    pub transmission_code: u8,
    pub message_kind: u8,
    information_time_bcd: [u8; 6],
    channel_id_bcd: [u8; 2],
    channel_seq_bcd: [u8; 5],
    version_bcd: u8,
    body_length_bcd: [u8; 2],
}

impl CommonHeader {
    /// Parse the 19-byte common header from the start of `buf`.
    pub fn parse(buf: &[u8]) -> FeedResult<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(FeedError::TooShort {
                need: HEADER_SIZE,
                have: buf.len(),
            });
        }
        if buf[0] != ESC {
            return Err(FeedError::MalformedHeader);
        }

        let mut information_time_bcd = [0u8; 6];
        information_time_bcd.copy_from_slice(&buf[3..9]);
        let mut channel_id_bcd = [0u8; 2];
        channel_id_bcd.copy_from_slice(&buf[9..11]);
        let mut channel_seq_bcd = [0u8; 5];
        channel_seq_bcd.copy_from_slice(&buf[11..16]);
        let mut body_length_bcd = [0u8; 2];
        body_length_bcd.copy_from_slice(&buf[17..19]);

        Ok(CommonHeader {
            transmission_code: buf[1],
            message_kind: buf[2],
            information_time_bcd,
            channel_id_bcd,
            channel_seq_bcd,
            version_bcd: buf[16],
            body_length_bcd,
        })
    }

    pub fn message_id(&self) -> MessageId {
        MessageId::from_codes(self.transmission_code, self.message_kind)
    }

    /// INFORMATION-TIME as a 12-digit HHMMSSmmmuuu string.
    pub fn information_time(&self) -> FeedResult<String> {
        bcd::bcd_to_ascii(&self.information_time_bcd, 12)
    }

    /// CHANNEL-ID, range 0..=9999.
    pub fn channel_id(&self) -> FeedResult<u32> {
        bcd::bcd_to_u64(&self.channel_id_bcd).map(|v| v as u32)
    }

    /// CHANNEL-SEQ, range 0..=9_999_999_999.
    pub fn channel_seq(&self) -> FeedResult<u64> {
        bcd::bcd_to_u64(&self.channel_seq_bcd)
    }

    /// VERSION-NO, range 0..=99.
    pub fn version(&self) -> FeedResult<u8> {
        bcd::bcd_to_u64(&[self.version_bcd]).map(|v| v as u8)
    }

    /// BODY-LENGTH, range 0..=9999.
    pub fn body_length(&self) -> FeedResult<u16> {
        bcd::bcd_to_u64(&self.body_length_bcd).map(|v| v as u16)
    }
}

/// A validated frame: the parsed header plus a borrowed view of the body.
#[derive(Debug)]
pub struct Frame<'a> {
    pub header: CommonHeader,
    pub body: &'a [u8],
}

impl<'a> Frame<'a> {
    /// Validate one complete frame held in `buf`.
    ///
    /// Checks total length against the declared body length and verifies
    /// the XOR checksum over transmission code through the last body byte.
    /// Terminator bytes are not inspected.
    pub fn parse(buf: &'a [u8]) -> FeedResult<Frame<'a>> {
        if buf.len() < MIN_FRAME_SIZE {
            return Err(FeedError::TooShort {
                need: MIN_FRAME_SIZE,
                have: buf.len(),
            });
        }

        let header = CommonHeader::parse(buf)?;
        let body_len = header
            .body_length()
            .map_err(|_| FeedError::MalformedHeader)? as usize;

        let expected = HEADER_SIZE + body_len + TRAILER_SIZE;
        if buf.len() != expected {
            return Err(FeedError::LengthMismatch {
                expected,
                actual: buf.len(),
            });
        }

        let checksum_at = HEADER_SIZE + body_len;
        let computed = xor_checksum(&buf[1..checksum_at]);
        let carried = buf[checksum_at];
        if computed != carried {
            return Err(FeedError::BadChecksum { computed, carried });
        }

        Ok(Frame {
            header,
            body: &buf[HEADER_SIZE..checksum_at],
        })
    }
}
