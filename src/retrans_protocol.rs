/// Retransmission service wire protocol
///
/// A TCP request/response protocol, entirely separate from the multicast
/// framing. Every message is:
///
///   [msg_size u16] [msg_type u16] [msg_seq u32] [epoch_s u32] [nanos u32]
///   [payload ...] [checksum u8]
///
/// All integers big-endian. `msg_size` counts the bytes from just after
/// itself through the last pre-checksum byte, so a full message occupies
/// `2 + msg_size + 1` bytes. The checksum is the byte-wise sum of
/// everything before it, modulo 256.
///
/// A 102 DataResponse is followed on the stream by the recovered
/// market-data frames themselves; they are not wrapped by this protocol.

use byteorder::{BigEndian, ByteOrder};

use crate::error::{FeedError, FeedResult};

pub const MSG_HEADER_SIZE: usize = 16;
/// Portion of `msg_size` contributed by the header fields after the
/// `msg_size` field itself.
pub const MSG_SIZE_BASE: usize = MSG_HEADER_SIZE - 2;
/// Smallest complete message: header plus checksum, empty payload.
pub const MIN_MESSAGE_SIZE: usize = MSG_HEADER_SIZE + 1;

pub const TYPE_ERROR_NOTIFICATION: u16 = 10;
pub const TYPE_LOGIN_REQUEST: u16 = 20;
pub const TYPE_LOGIN_RESPONSE: u16 = 30;
pub const TYPE_RETRANSMISSION_READY: u16 = 50;
pub const TYPE_DATA_REQUEST: u16 = 101;
pub const TYPE_DATA_RESPONSE: u16 = 102;
pub const TYPE_SERVER_HEARTBEAT: u16 = 104;
pub const TYPE_CLIENT_HEARTBEAT: u16 = 105;

/// Seconds-plus-nanoseconds wall-clock stamp carried in every header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MsgTime {
    pub epoch_s: u32,
    pub nanos: u32,
}

impl MsgTime {
    pub fn now() -> Self {
        let elapsed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        MsgTime {
            epoch_s: elapsed.as_secs() as u32,
            nanos: elapsed.subsec_nanos(),
        }
    }

    /// The 8-byte wire block as one integer: seconds in the high word,
    /// nanoseconds in the low. Big-endian u64 on the wire is identical
    /// to the two big-endian u32s it packs.
    fn to_wire(self) -> u64 {
        ((self.epoch_s as u64) << 32) | self.nanos as u64
    }

    fn from_wire(raw: u64) -> Self {
        MsgTime {
            epoch_s: (raw >> 32) as u32,
            nanos: raw as u32,
        }
    }
}

/// Decoded message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgHeader {
    pub msg_size: u16,
    pub msg_type: u16,
    pub msg_seq: u32,
    pub time: MsgTime,
}

/// Typed payload of one retransmission-protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetransMessage {
    /// 10: the server reports a fatal condition and will close.
    ErrorNotification { status: u8 },
    /// 20: client login. `check_code` proves password knowledge.
    LoginRequest {
        multiplication_operator: u16,
        check_code: u8,
        session_id: u16,
    },
    /// 30: one per channel the session is subscribed to.
    LoginResponse { channel_id: u16 },
    /// 50: login fully complete, requests may be sent.
    RetransmissionReady,
    /// 101: recover `recover_num` messages starting at `begin_seq`.
    DataRequest {
        channel_id: u16,
        begin_seq: u32,
        recover_num: u16,
    },
    /// 102: request outcome; status 0 means the recovered frames follow
    /// on the stream (some servers embed them directly in `data`).
    DataResponse {
        channel_id: u16,
        status: u8,
        begin_seq: u32,
        recover_num: u16,
        data: Vec<u8>,
    },
    /// 104: must be answered with a 105.
    ServerHeartbeat,
    /// 105: client liveness reply.
    ClientHeartbeat,
}

impl RetransMessage {
    pub fn msg_type(&self) -> u16 {
        match self {
            RetransMessage::ErrorNotification { .. } => TYPE_ERROR_NOTIFICATION,
            RetransMessage::LoginRequest { .. } => TYPE_LOGIN_REQUEST,
            RetransMessage::LoginResponse { .. } => TYPE_LOGIN_RESPONSE,
            RetransMessage::RetransmissionReady => TYPE_RETRANSMISSION_READY,
            RetransMessage::DataRequest { .. } => TYPE_DATA_REQUEST,
            RetransMessage::DataResponse { .. } => TYPE_DATA_RESPONSE,
            RetransMessage::ServerHeartbeat => TYPE_SERVER_HEARTBEAT,
            RetransMessage::ClientHeartbeat => TYPE_CLIENT_HEARTBEAT,
        }
    }

    fn payload_len(&self) -> usize {
        match self {
            RetransMessage::ErrorNotification { .. } => 1,
            RetransMessage::LoginRequest { .. } => 5,
            RetransMessage::LoginResponse { .. } => 2,
            RetransMessage::RetransmissionReady => 0,
            RetransMessage::DataRequest { .. } => 8,
            RetransMessage::DataResponse { data, .. } => 9 + data.len(),
            RetransMessage::ServerHeartbeat => 0,
            RetransMessage::ClientHeartbeat => 0,
        }
    }
}

/// Byte-wise sum modulo 256.
pub fn additive_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u32, |acc, &b| acc + b as u32) as u8
}

/// CHECK-CODE for a login request:
/// `((operator * password) / 100) mod 100`.
pub fn login_check_code(multiplication_operator: u16, password: u32) -> u8 {
    let product = multiplication_operator as u64 * password as u64;
    ((product / 100) % 100) as u8
}

/// Serialize one message with the given sender sequence and timestamp.
pub fn encode(msg: &RetransMessage, msg_seq: u32, time: MsgTime) -> Vec<u8> {
    let payload_len = msg.payload_len();
    let msg_size = (MSG_SIZE_BASE + payload_len) as u16;
    let mut buf = Vec::with_capacity(2 + msg_size as usize + 1);

    let mut scratch = [0u8; 8];
    BigEndian::write_u16(&mut scratch[..2], msg_size);
    buf.extend_from_slice(&scratch[..2]);
    BigEndian::write_u16(&mut scratch[..2], msg.msg_type());
    buf.extend_from_slice(&scratch[..2]);
    BigEndian::write_u32(&mut scratch[..4], msg_seq);
    buf.extend_from_slice(&scratch[..4]);
    BigEndian::write_u64(&mut scratch, time.to_wire());
    buf.extend_from_slice(&scratch);

    match msg {
        RetransMessage::ErrorNotification { status } => buf.push(*status),
        RetransMessage::LoginRequest {
            multiplication_operator,
            check_code,
            session_id,
        } => {
            BigEndian::write_u16(&mut scratch[..2], *multiplication_operator);
            buf.extend_from_slice(&scratch[..2]);
            buf.push(*check_code);
            BigEndian::write_u16(&mut scratch[..2], *session_id);
            buf.extend_from_slice(&scratch[..2]);
        }
        RetransMessage::LoginResponse { channel_id } => {
            BigEndian::write_u16(&mut scratch[..2], *channel_id);
            buf.extend_from_slice(&scratch[..2]);
        }
        RetransMessage::DataRequest {
            channel_id,
            begin_seq,
            recover_num,
        } => {
            BigEndian::write_u16(&mut scratch[..2], *channel_id);
            buf.extend_from_slice(&scratch[..2]);
            BigEndian::write_u32(&mut scratch[..4], *begin_seq);
            buf.extend_from_slice(&scratch[..4]);
            BigEndian::write_u16(&mut scratch[..2], *recover_num);
            buf.extend_from_slice(&scratch[..2]);
        }
        RetransMessage::DataResponse {
            channel_id,
            status,
            begin_seq,
            recover_num,
            data,
        } => {
            BigEndian::write_u16(&mut scratch[..2], *channel_id);
            buf.extend_from_slice(&scratch[..2]);
            buf.push(*status);
            BigEndian::write_u32(&mut scratch[..4], *begin_seq);
            buf.extend_from_slice(&scratch[..4]);
            BigEndian::write_u16(&mut scratch[..2], *recover_num);
            buf.extend_from_slice(&scratch[..2]);
            buf.extend_from_slice(data);
        }
        RetransMessage::RetransmissionReady
        | RetransMessage::ServerHeartbeat
        | RetransMessage::ClientHeartbeat => {}
    }

    let checksum = additive_checksum(&buf);
    buf.push(checksum);
    buf
}

/// Deserialize one complete message occupying exactly `buf`.
///
/// An unrecognized `msg_type` is a protocol violation here: unlike the
/// multicast side there is no safe way to skip content on a stream whose
/// peer is already confused.
pub fn decode(buf: &[u8]) -> FeedResult<(MsgHeader, RetransMessage)> {
    if buf.len() < MIN_MESSAGE_SIZE {
        return Err(FeedError::TooShort {
            need: MIN_MESSAGE_SIZE,
            have: buf.len(),
        });
    }

    let msg_size = BigEndian::read_u16(&buf[0..2]);
    let total = 2 + msg_size as usize + 1;
    if buf.len() != total {
        return Err(FeedError::LengthMismatch {
            expected: total,
            actual: buf.len(),
        });
    }

    let carried = buf[total - 1];
    let computed = additive_checksum(&buf[..total - 1]);
    if carried != computed {
        return Err(FeedError::BadChecksum { computed, carried });
    }

    let header = MsgHeader {
        msg_size,
        msg_type: BigEndian::read_u16(&buf[2..4]),
        msg_seq: BigEndian::read_u32(&buf[4..8]),
        time: MsgTime::from_wire(BigEndian::read_u64(&buf[8..16])),
    };

    let payload = &buf[MSG_HEADER_SIZE..total - 1];
    let need = |n: usize| -> FeedResult<()> {
        if payload.len() < n {
            Err(FeedError::Protocol(format!(
                "payload of type {} too short: {} < {}",
                header.msg_type,
                payload.len(),
                n
            )))
        } else {
            Ok(())
        }
    };

    let msg = match header.msg_type {
        TYPE_ERROR_NOTIFICATION => {
            need(1)?;
            RetransMessage::ErrorNotification { status: payload[0] }
        }
        TYPE_LOGIN_REQUEST => {
            need(5)?;
            RetransMessage::LoginRequest {
                multiplication_operator: BigEndian::read_u16(&payload[0..2]),
                check_code: payload[2],
                session_id: BigEndian::read_u16(&payload[3..5]),
            }
        }
        TYPE_LOGIN_RESPONSE => {
            need(2)?;
            RetransMessage::LoginResponse {
                channel_id: BigEndian::read_u16(&payload[0..2]),
            }
        }
        TYPE_RETRANSMISSION_READY => RetransMessage::RetransmissionReady,
        TYPE_DATA_REQUEST => {
            need(8)?;
            RetransMessage::DataRequest {
                channel_id: BigEndian::read_u16(&payload[0..2]),
                begin_seq: BigEndian::read_u32(&payload[2..6]),
                recover_num: BigEndian::read_u16(&payload[6..8]),
            }
        }
        TYPE_DATA_RESPONSE => {
            need(9)?;
            RetransMessage::DataResponse {
                channel_id: BigEndian::read_u16(&payload[0..2]),
                status: payload[2],
                begin_seq: BigEndian::read_u32(&payload[3..7]),
                recover_num: BigEndian::read_u16(&payload[7..9]),
                data: payload[9..].to_vec(),
            }
        }
        TYPE_SERVER_HEARTBEAT => RetransMessage::ServerHeartbeat,
        TYPE_CLIENT_HEARTBEAT => RetransMessage::ClientHeartbeat,
        other => return Err(FeedError::Protocol(format!("unknown message type {other}"))),
    };

    Ok((header, msg))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(msg: RetransMessage) {
        let bytes = encode(&msg, 7, MsgTime { epoch_s: 1_700_000_000, nanos: 123 });
        let (header, decoded) = decode(&bytes).unwrap();
        assert_eq!(header.msg_type, msg.msg_type());
        assert_eq!(header.msg_seq, 7);
        assert_eq!(header.time.epoch_s, 1_700_000_000);
        assert_eq!(header.time.nanos, 123);
        assert_eq!(decoded, msg);
        assert_eq!(bytes.len(), 2 + header.msg_size as usize + 1);
    }

    #[test]
    fn test_round_trips() {
        round_trip(RetransMessage::ErrorNotification { status: 3 });
        round_trip(RetransMessage::LoginRequest {
            multiplication_operator: 168,
            check_code: 73,
            session_id: 12,
        });
        round_trip(RetransMessage::LoginResponse { channel_id: 4 });
        round_trip(RetransMessage::RetransmissionReady);
        round_trip(RetransMessage::DataRequest {
            channel_id: 3,
            begin_seq: 1000,
            recover_num: 2,
        });
        round_trip(RetransMessage::DataResponse {
            channel_id: 3,
            status: 0,
            begin_seq: 1000,
            recover_num: 2,
            data: vec![0x1B, 0x01, 0x02],
        });
        round_trip(RetransMessage::ServerHeartbeat);
        round_trip(RetransMessage::ClientHeartbeat);
    }

    #[test]
    fn test_empty_payload_msg_size() {
        let bytes = encode(&RetransMessage::ServerHeartbeat, 0, MsgTime::default());
        assert_eq!(bytes.len(), MIN_MESSAGE_SIZE);
        assert_eq!(BigEndian::read_u16(&bytes[0..2]), MSG_SIZE_BASE as u16);
    }

    #[test]
    fn test_checksum_rejected() {
        let mut bytes = encode(&RetransMessage::ClientHeartbeat, 1, MsgTime::default());
        let last = bytes.len() - 1;
        bytes[last] = bytes[last].wrapping_add(1);
        assert!(matches!(
            decode(&bytes),
            Err(FeedError::BadChecksum { .. })
        ));
    }

    #[test]
    fn test_additive_checksum_wraps() {
        assert_eq!(additive_checksum(&[0xFF, 0x02]), 0x01);
        assert_eq!(additive_checksum(&[]), 0);
    }

    #[test]
    fn test_unknown_type_is_protocol_error() {
        let mut bytes = encode(&RetransMessage::ClientHeartbeat, 1, MsgTime::default());
        BigEndian::write_u16(&mut bytes[2..4], 999);
        let last = bytes.len() - 1;
        bytes[last] = additive_checksum(&bytes[..last]);
        assert!(matches!(decode(&bytes), Err(FeedError::Protocol(_))));
    }

    #[test]
    fn test_login_check_code() {
        // 168 * 1234 = 207312; (207312 / 100) % 100 = 73.
        assert_eq!(login_check_code(168, 1234), 73);
        assert_eq!(login_check_code(2, 50), 1);
        assert_eq!(login_check_code(1, 0), 0);
    }

    #[test]
    fn test_data_response_carries_embedded_bytes() {
        let frames = vec![0x1Bu8; 44];
        let msg = RetransMessage::DataResponse {
            channel_id: 9,
            status: 0,
            begin_seq: 55,
            recover_num: 2,
            data: frames.clone(),
        };
        let bytes = encode(&msg, 3, MsgTime::default());
        let (_, decoded) = decode(&bytes).unwrap();
        match decoded {
            RetransMessage::DataResponse { data, .. } => assert_eq!(data, frames),
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
