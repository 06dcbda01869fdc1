/// SDK facade
///
/// Owns the whole component graph: product basic data, order books,
/// per-channel sequence tracking, feed statistics, and the optional
/// retransmission client. `process_frame` runs one frame through
/// validation, header decode, sequence classification, body parsing, and
/// book mutation; errors are logged, counted, and the frame dropped.
///
/// Single-threaded by contract: the caller delivers frames serially. The
/// only cross-thread traffic is the recovered-frame channel drained by
/// `poll_recovered` on the caller's thread.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crossbeam_channel::Receiver;
use log::{debug, info, warn};

use crate::book_builder::OrderBook;
use crate::config::RecoveryConfig;
use crate::decoder::{parse_empty_body, BookSnapshot, BookUpdate, ProductBasic};
use crate::error::{FeedError, FeedResult};
use crate::gap_detector::{GapDetector, SeqStatus};
use crate::protocol::{Frame, MessageId};
use crate::recovery::RecoveryClient;
use crate::stats::FeedStats;

/// Capacity of the recovered-frame queue. The retransmission thread
/// blocks when it fills, which is the intended back-pressure.
const RECOVERED_QUEUE_DEPTH: usize = 1024;

pub struct TaifexSdk {
    /// Product basic data keyed by trimmed short product id.
    products: HashMap<String, ProductBasic>,
    /// Books keyed by the full 20-char product id as carried on the wire.
    books: HashMap<String, OrderBook>,
    tracker: GapDetector,
    stats: FeedStats,
    recovery: Option<RecoveryClient>,
    recovered_rx: Option<Receiver<Vec<u8>>>,
}

impl TaifexSdk {
    /// Facade without a retransmission client: gaps are logged and
    /// counted but nothing is recovered.
    pub fn new() -> Self {
        TaifexSdk {
            products: HashMap::new(),
            books: HashMap::new(),
            tracker: GapDetector::new(),
            stats: FeedStats::new(),
            recovery: None,
            recovered_rx: None,
        }
    }

    /// Facade with a live retransmission client. Fails when the
    /// configuration names no server endpoint.
    pub fn with_recovery(config: RecoveryConfig) -> FeedResult<Self> {
        let (frame_tx, frame_rx) = crossbeam_channel::bounded(RECOVERED_QUEUE_DEPTH);
        let client = RecoveryClient::start(config, frame_tx)?;
        let mut sdk = Self::new();
        sdk.recovery = Some(client);
        sdk.recovered_rx = Some(frame_rx);
        Ok(sdk)
    }

    /// Run one market-data frame through the pipeline.
    ///
    /// All errors are swallowed into the log sink and the statistics; a
    /// failing frame leaves every book untouched.
    pub fn process_frame(&mut self, raw: &[u8]) {
        if let Err(e) = self.process_frame_inner(raw) {
            self.stats.record_error(&e);
            warn!("frame dropped: {e}");
        }
    }

    /// Drain recovered frames queued by the retransmission thread and run
    /// each through the pipeline. Returns the number of frames processed.
    pub fn poll_recovered(&mut self) -> usize {
        let Some(rx) = self.recovered_rx.take() else {
            return 0;
        };
        let mut processed = 0;
        while let Ok(frame) = rx.try_recv() {
            self.stats.record_recovered_frame();
            self.process_frame(&frame);
            processed += 1;
        }
        self.recovered_rx = Some(rx);
        processed
    }

    pub fn get_product_info(&self, short_id: &str) -> Option<&ProductBasic> {
        self.products.get(short_id)
    }

    /// Read-only view of one book, keyed by the full wire product id.
    /// Valid until the next `process_frame` call.
    pub fn get_order_book(&self, product_id: &str) -> Option<&OrderBook> {
        self.books.get(product_id)
    }

    pub fn stats(&self) -> &FeedStats {
        &self.stats
    }

    fn process_frame_inner(&mut self, raw: &[u8]) -> FeedResult<()> {
        let frame = Frame::parse(raw)?;
        let channel = frame.header.channel_id()?;
        let seq = frame.header.channel_seq()?;
        let msg_id = frame.header.message_id();

        // A sequence reset bypasses classification: whatever the channel
        // was expecting no longer applies.
        if msg_id == MessageId::SequenceReset {
            parse_empty_body(frame.body)?;
            self.handle_sequence_reset(channel, raw.len());
            return Ok(());
        }

        match self.tracker.observe(channel, seq) {
            SeqStatus::FirstSeen(s) => {
                debug!("channel {channel}: first sequence {s}");
            }
            SeqStatus::InOrder => {}
            SeqStatus::GapFill => {
                debug!("channel {channel}: sequence {seq} fills a reported gap");
            }
            SeqStatus::Replay => {
                debug!("channel {channel}: replayed sequence {seq}, dropped");
                self.stats.record_replay();
                return Ok(());
            }
            SeqStatus::Gap {
                expected,
                got,
                count,
            } => {
                warn!(
                    "channel {channel}: gap, expected {expected} got {got} \
                     ({count} missing)"
                );
                self.stats.record_gap(count);
                self.request_recovery(channel, expected, count);
            }
        }

        self.dispatch_body(msg_id, frame.body)?;
        self.stats.record_accepted(raw.len());
        Ok(())
    }

    fn dispatch_body(&mut self, msg_id: MessageId, body: &[u8]) -> FeedResult<()> {
        match msg_id {
            MessageId::Heartbeat => {
                parse_empty_body(body)?;
                self.stats.record_heartbeat();
                Ok(())
            }
            // Handled before sequence classification.
            MessageId::SequenceReset => Ok(()),
            MessageId::ProductBasic => {
                let record = ProductBasic::parse(body)?;
                let key = record.trimmed_id().to_string();
                debug!(
                    "product basic data for {key:?}, decimal locator {}",
                    record.decimal_locator
                );
                self.products.insert(key, record);
                self.stats.record_product_basic();
                Ok(())
            }
            MessageId::OrderBookSnapshot => {
                let snap = BookSnapshot::parse(body)?;
                let book = get_or_create_book(&mut self.books, &self.products, &snap.prod_id)?;
                book.apply_snapshot(&snap);
                self.stats.record_snapshot();
                Ok(())
            }
            MessageId::OrderBookUpdate => {
                let update = BookUpdate::parse(body)?;
                let book = get_or_create_book(&mut self.books, &self.products, &update.prod_id)?;
                if book.apply_update(&update) {
                    self.stats.record_update();
                } else {
                    debug!(
                        "stale update for {:?} at sequence {}, dropped",
                        update.prod_id.trim_end(),
                        update.prod_msg_seq
                    );
                    self.stats.record_stale_update();
                }
                Ok(())
            }
            MessageId::Other(tc, mk) => {
                debug!(
                    "uninterpreted message tc={:?} mk={:?}, skipped",
                    tc as char, mk as char
                );
                self.stats.record_unknown_message();
                Ok(())
            }
        }
    }

    fn handle_sequence_reset(&mut self, channel: u32, frame_len: usize) {
        info!("sequence reset on channel {channel}: clearing books");
        self.tracker.reset_channel(channel);
        for book in self.books.values_mut() {
            book.reset();
        }
        self.stats.record_accepted(frame_len);
        self.stats.record_sequence_reset();
    }

    fn request_recovery(&mut self, channel: u32, begin_seq: u64, count: u64) {
        let Some(client) = &self.recovery else {
            return;
        };
        client.recover(
            channel as u16,
            begin_seq as u32,
            count.min(u16::MAX as u64) as u16,
        );
        self.stats.record_recovery_request();
    }
}

impl Default for TaifexSdk {
    fn default() -> Self {
        Self::new()
    }
}

/// Book lookup with lazy creation.
///
/// A book may only come into existence once the product basic data for
/// its short id has been seen, because the decimal locator lives there.
fn get_or_create_book<'a>(
    books: &'a mut HashMap<String, OrderBook>,
    products: &HashMap<String, ProductBasic>,
    prod_id: &str,
) -> FeedResult<&'a mut OrderBook> {
    match books.entry(prod_id.to_string()) {
        Entry::Occupied(entry) => Ok(entry.into_mut()),
        Entry::Vacant(entry) => {
            let short = short_product_id(prod_id);
            let info = products
                .get(short)
                .ok_or_else(|| FeedError::MissingProductInfo(short.to_string()))?;
            debug!(
                "creating book for {:?} (short id {short:?}, locator {})",
                prod_id.trim_end(),
                info.decimal_locator
            );
            Ok(entry.insert(OrderBook::new(prod_id, info.decimal_locator)))
        }
    }
}

/// Short id used for product-info lookups: the leg before a '/' for
/// composite products, else the leading 10 characters, trailing spaces
/// trimmed.
fn short_product_id(prod_id: &str) -> &str {
    let base = match prod_id.find('/') {
        Some(pos) => &prod_id[..pos],
        None => {
            let end = prod_id.len().min(10);
            &prod_id[..end]
        }
    };
    base.trim_end()
}
