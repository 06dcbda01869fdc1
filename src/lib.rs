/// TAIFEX Feed - Realtime Market Data SDK
///
/// Client-side processing for the Taiwan Futures Exchange multicast feed.
/// Features include:
/// - Frame validation (length and XOR checksum) and common-header decoding
/// - Packed-BCD codecs for every numeric wire field
/// - Per-channel sequence tracking with gap and replay classification
/// - Per-product limit order book reconstruction from snapshots and
///   differential updates, including derived quotes
/// - TCP retransmission client that recovers missed sequence ranges and
///   feeds them back through the same pipeline
///
/// Feed bytes enter through `TaifexSdk::process_frame`; how they reach
/// the process (multicast sockets, dual-feed arbitration, file replay)
/// is the embedding application's concern.

pub mod bcd;
pub mod book_builder;
pub mod checksum;
pub mod config;
pub mod decoder;
pub mod error;
pub mod gap_detector;
pub mod protocol;
pub mod recovery;
pub mod retrans_protocol;
pub mod sdk;
pub mod stats;

pub use book_builder::{OrderBook, Price, PriceLevel, Quantity};
pub use config::{RecoveryConfig, RecoveryServerConfig};
pub use decoder::{BookEntry, BookSnapshot, BookUpdate, EntryType, ProductBasic, UpdateAction};
pub use error::{FeedError, FeedResult};
pub use gap_detector::{GapDetector, SeqStatus};
pub use protocol::{CommonHeader, Frame, MessageId};
pub use recovery::RecoveryClient;
pub use sdk::TaifexSdk;
pub use stats::FeedStats;
