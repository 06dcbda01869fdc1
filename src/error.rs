/// Crate-wide error taxonomy
///
/// Every fallible operation in the pipeline returns one of these variants.
/// Frame-level errors cause the frame to be dropped and logged; recovery
/// errors terminate the current TCP session and hand control back to the
/// supervisor loop.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("buffer too short: need {need} bytes, have {have}")]
    TooShort { need: usize, have: usize },

    #[error("malformed common header")]
    MalformedHeader,

    #[error("frame length mismatch: expected {expected} bytes, have {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("checksum mismatch: computed {computed:#04x}, carried {carried:#04x}")]
    BadChecksum { computed: u8, carried: u8 },

    #[error("invalid BCD nibble")]
    InvalidBcd,

    #[error("body parse failed at field {0}")]
    Parse(&'static str),

    #[error("unknown message type: tc={tc:#04x} mk={mk:#04x}")]
    UnknownMessageType { tc: u8, mk: u8 },

    #[error("no product basic data for short id {0:?}")]
    MissingProductInfo(String),

    #[error("recovery protocol violation: {0}")]
    Protocol(String),

    #[error("recovery connection lost: {0}")]
    ConnectionLost(String),
}

pub type FeedResult<T> = Result<T, FeedError>;
