/// Message-body decoders
///
/// Each decoder takes the body slice of a validated frame and produces a
/// typed record, or a `Parse` error naming the field that failed. Decoders
/// validate structure only; semantics (sign merging, size-zero handling)
/// belong to the book engine.
///
/// Body layouts (widths in bytes, numeric fields packed BCD):
///   product basic  : id(10) ref-price(5) kind(1) dec-loc(1) strike-loc(1)
///                    begin(4) end(4) flow-group(1) delivery(4) banding(1)
///   snapshot       : id(20) seq(5) calculated-flag(1) count(1), then
///                    count x [type(1) sign(1) price(5) size(4) level(1)]
///   update         : id(20) seq(5) count(1), then
///                    count x [action(1) type(1) sign(1) price(5) size(4) level(1)]
///   heartbeat/reset: empty, or 3 bytes when a feed counts its trailer as body

use crate::bcd;
use crate::error::{FeedError, FeedResult};

pub const PRODUCT_BASIC_BODY_LEN: usize = 32;
pub const SNAPSHOT_PREFIX_LEN: usize = 27;
pub const SNAPSHOT_ENTRY_LEN: usize = 12;
pub const UPDATE_PREFIX_LEN: usize = 26;
pub const UPDATE_ENTRY_LEN: usize = 13;

/// Sequential field reader over a message body.
///
/// Failing reads report the name of the field being read, which is the
/// only context worth logging for a malformed body.
struct BodyReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BodyReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        BodyReader { buf, pos: 0 }
    }

    fn bytes(&mut self, n: usize, field: &'static str) -> FeedResult<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(FeedError::Parse(field));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn byte(&mut self, field: &'static str) -> FeedResult<u8> {
        Ok(self.bytes(1, field)?[0])
    }

    fn ascii(&mut self, n: usize, field: &'static str) -> FeedResult<String> {
        let raw = self.bytes(n, field)?;
        Ok(String::from_utf8_lossy(raw).into_owned())
    }

    fn bcd_u64(&mut self, n: usize, field: &'static str) -> FeedResult<u64> {
        let raw = self.bytes(n, field)?;
        bcd::bcd_to_u64(raw).map_err(|_| FeedError::Parse(field))
    }

    fn bcd_digits(&mut self, n: usize, digits: usize, field: &'static str) -> FeedResult<String> {
        let raw = self.bytes(n, field)?;
        bcd::bcd_to_ascii(raw, digits).map_err(|_| FeedError::Parse(field))
    }
}

/// Product basic data (I010 family).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductBasic {
    /// Short product id, X(10), space padded on the wire.
    pub prod_id_short: String,
    /// Reference price as a scaled integer; interpret with `decimal_locator`.
    pub reference_price: i64,
    pub prod_kind: char,
    /// Number of decimal places in every price field of this product.
    pub decimal_locator: u8,
    pub strike_price_decimal_locator: u8,
    /// Listing date, YYYYMMDD.
    pub begin_date: String,
    /// Delisting date, YYYYMMDD.
    pub end_date: String,
    pub flow_group: u8,
    /// Final settlement date, YYYYMMDD.
    pub delivery_date: String,
    /// 'Y' when dynamic price banding applies.
    pub dynamic_banding: char,
}

impl ProductBasic {
    pub fn parse(body: &[u8]) -> FeedResult<Self> {
        if body.len() < PRODUCT_BASIC_BODY_LEN {
            return Err(FeedError::Parse("prod_id_short"));
        }
        let mut r = BodyReader::new(body);
        Ok(ProductBasic {
            prod_id_short: r.ascii(10, "prod_id_short")?,
            reference_price: r.bcd_u64(5, "reference_price")? as i64,
            prod_kind: r.byte("prod_kind")? as char,
            decimal_locator: r.bcd_u64(1, "decimal_locator")? as u8,
            strike_price_decimal_locator: r.bcd_u64(1, "strike_price_decimal_locator")? as u8,
            begin_date: r.bcd_digits(4, 8, "begin_date")?,
            end_date: r.bcd_digits(4, 8, "end_date")?,
            flow_group: r.bcd_u64(1, "flow_group")? as u8,
            delivery_date: r.bcd_digits(4, 8, "delivery_date")?,
            dynamic_banding: r.byte("dynamic_banding")? as char,
        })
    }

    /// Short id with trailing padding removed, the key product info is
    /// cached under.
    pub fn trimmed_id(&self) -> &str {
        self.prod_id_short.trim_end()
    }
}

/// Side/kind of one order-book entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    Buy,
    Sell,
    DerivedBuy,
    DerivedSell,
    Other(u8),
}

impl EntryType {
    fn from_byte(b: u8) -> Self {
        match b {
            b'0' => EntryType::Buy,
            b'1' => EntryType::Sell,
            b'E' => EntryType::DerivedBuy,
            b'F' => EntryType::DerivedSell,
            other => EntryType::Other(other),
        }
    }
}

/// How an update entry mutates its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateAction {
    New,
    Change,
    Delete,
    /// Whole-slot replacement, only meaningful for derived entries.
    Overlay,
    Other(u8),
}

impl UpdateAction {
    fn from_byte(b: u8) -> Self {
        match b {
            b'0' => UpdateAction::New,
            b'1' => UpdateAction::Change,
            b'2' => UpdateAction::Delete,
            b'5' => UpdateAction::Overlay,
            other => UpdateAction::Other(other),
        }
    }
}

/// One price/size observation inside a snapshot or update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookEntry {
    /// `UpdateAction::New` for snapshot entries, which carry no action byte.
    pub action: UpdateAction,
    pub entry_type: EntryType,
    /// '0' positive, '-' negative; applied to `price_magnitude` by the
    /// book engine.
    pub sign: char,
    /// Unsigned price as carried, 9 BCD digits.
    pub price_magnitude: i64,
    pub size: u64,
    /// 1-indexed disclosed price level.
    pub level: u8,
}

impl BookEntry {
    /// Price with the sign byte merged in. The reserved market-order
    /// magnitude 999,999,999 passes through untouched.
    pub fn signed_price(&self) -> i64 {
        if self.sign == '-' && self.price_magnitude > 0 {
            -self.price_magnitude
        } else {
            self.price_magnitude
        }
    }
}

/// Order-book snapshot (I083 family).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookSnapshot {
    /// Full product id, X(20), as carried on the wire.
    pub prod_id: String,
    pub prod_msg_seq: u64,
    /// '0' regular disclosure, '1' post-call-auction remainder.
    pub calculated_flag: char,
    pub entries: Vec<BookEntry>,
}

impl BookSnapshot {
    pub fn parse(body: &[u8]) -> FeedResult<Self> {
        if body.len() < SNAPSHOT_PREFIX_LEN {
            return Err(FeedError::Parse("prod_id"));
        }
        let mut r = BodyReader::new(body);
        let prod_id = r.ascii(20, "prod_id")?;
        let prod_msg_seq = r.bcd_u64(5, "prod_msg_seq")?;
        let calculated_flag = r.byte("calculated_flag")? as char;
        let count = r.bcd_u64(1, "entry_count")? as usize;

        if body.len() < SNAPSHOT_PREFIX_LEN + count * SNAPSHOT_ENTRY_LEN {
            return Err(FeedError::Parse("entry_count"));
        }

        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            entries.push(BookEntry {
                action: UpdateAction::New,
                entry_type: EntryType::from_byte(r.byte("md_entry_type")?),
                sign: r.byte("sign")? as char,
                price_magnitude: r.bcd_u64(5, "md_entry_px")? as i64,
                size: r.bcd_u64(4, "md_entry_size")?,
                level: r.bcd_u64(1, "md_price_level")? as u8,
            });
        }
        Ok(BookSnapshot {
            prod_id,
            prod_msg_seq,
            calculated_flag,
            entries,
        })
    }
}

/// Differential order-book update (I081 family).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookUpdate {
    /// Full product id, X(20), as carried on the wire.
    pub prod_id: String,
    pub prod_msg_seq: u64,
    pub entries: Vec<BookEntry>,
}

impl BookUpdate {
    pub fn parse(body: &[u8]) -> FeedResult<Self> {
        if body.len() < UPDATE_PREFIX_LEN {
            return Err(FeedError::Parse("prod_id"));
        }
        let mut r = BodyReader::new(body);
        let prod_id = r.ascii(20, "prod_id")?;
        let prod_msg_seq = r.bcd_u64(5, "prod_msg_seq")?;
        let count = r.bcd_u64(1, "entry_count")? as usize;

        if body.len() < UPDATE_PREFIX_LEN + count * UPDATE_ENTRY_LEN {
            return Err(FeedError::Parse("entry_count"));
        }

        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            entries.push(BookEntry {
                action: UpdateAction::from_byte(r.byte("md_update_action")?),
                entry_type: EntryType::from_byte(r.byte("md_entry_type")?),
                sign: r.byte("sign")? as char,
                price_magnitude: r.bcd_u64(5, "md_entry_px")? as i64,
                size: r.bcd_u64(4, "md_entry_size")?,
                level: r.bcd_u64(1, "md_price_level")? as u8,
            });
        }
        Ok(BookUpdate {
            prod_id,
            prod_msg_seq,
            entries,
        })
    }
}

/// Heartbeat and sequence-reset bodies carry no data. Some feeds report
/// their 3-byte trailer as body, so both 0 and 3 are accepted.
pub fn parse_empty_body(body: &[u8]) -> FeedResult<()> {
    match body.len() {
        0 | 3 => Ok(()),
        _ => Err(FeedError::Parse("body_length")),
    }
}
