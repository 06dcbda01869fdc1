/// Per-product limit order book
///
/// Maintains bid/ask price levels in BTreeMaps keyed by signed scaled
/// price, plus single-slot derived quotes for composite instruments.
/// State is driven by snapshot and differential update records; a
/// sequence reset clears everything but the book's identity.

use std::collections::BTreeMap;

use crate::decoder::{BookEntry, BookSnapshot, BookUpdate, EntryType, UpdateAction};

/// Scaled integer price. The magnitudes 999,999,999 and -999,999,999 are
/// reserved market-buy/market-sell markers and are stored untouched.
pub type Price = i64;
pub type Quantity = u64;

/// One disclosed price level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceLevel {
    pub price: Price,
    pub quantity: Quantity,
}

/// Limit order book for a single product.
#[derive(Debug, Clone)]
pub struct OrderBook {
    product_id: String,
    /// Decimal places for rendering prices; copied from the product's
    /// basic-data record and never used in book arithmetic.
    decimal_locator: u8,
    last_prod_msg_seq: u64,
    bids: BTreeMap<Price, Quantity>,
    asks: BTreeMap<Price, Quantity>,
    derived_bid: Option<PriceLevel>,
    derived_ask: Option<PriceLevel>,
}

impl OrderBook {
    pub fn new(product_id: impl Into<String>, decimal_locator: u8) -> Self {
        OrderBook {
            product_id: product_id.into(),
            decimal_locator,
            last_prod_msg_seq: 0,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            derived_bid: None,
            derived_ask: None,
        }
    }

    /// Rebuild the whole book from a snapshot.
    ///
    /// Zero-size regular entries are skipped. Derived entries are honored
    /// only on regular disclosures: a post-call-auction snapshot
    /// (`calculated_flag == '1'`) carries none by protocol, and any that
    /// do appear are ignored.
    pub fn apply_snapshot(&mut self, snap: &BookSnapshot) {
        self.clear_levels();
        self.last_prod_msg_seq = snap.prod_msg_seq;

        let honor_derived = snap.calculated_flag == '0';
        for entry in &snap.entries {
            let price = entry.signed_price();
            match entry.entry_type {
                EntryType::Buy => {
                    if entry.size > 0 {
                        self.bids.insert(price, entry.size);
                    }
                }
                EntryType::Sell => {
                    if entry.size > 0 {
                        self.asks.insert(price, entry.size);
                    }
                }
                EntryType::DerivedBuy => {
                    if honor_derived {
                        self.derived_bid = derived_slot(price, entry.size);
                    }
                }
                EntryType::DerivedSell => {
                    if honor_derived {
                        self.derived_ask = derived_slot(price, entry.size);
                    }
                }
                EntryType::Other(_) => {}
            }
        }
    }

    /// Apply a differential update.
    ///
    /// Updates at or below the last applied product-message sequence are
    /// stale (duplicates or already-covered recoveries) and leave the book
    /// untouched; returns false in that case.
    ///
    /// Entries are applied strictly in message order: the exchange
    /// documents that the second entry of a message must see the book as
    /// left by the first.
    pub fn apply_update(&mut self, update: &BookUpdate) -> bool {
        if update.prod_msg_seq <= self.last_prod_msg_seq {
            return false;
        }
        self.last_prod_msg_seq = update.prod_msg_seq;

        for entry in &update.entries {
            match entry.entry_type {
                EntryType::Buy => apply_level_action(&mut self.bids, entry),
                EntryType::Sell => apply_level_action(&mut self.asks, entry),
                EntryType::DerivedBuy => {
                    if entry.action == UpdateAction::Overlay {
                        self.derived_bid = derived_slot(entry.signed_price(), entry.size);
                    }
                }
                EntryType::DerivedSell => {
                    if entry.action == UpdateAction::Overlay {
                        self.derived_ask = derived_slot(entry.signed_price(), entry.size);
                    }
                }
                EntryType::Other(_) => {}
            }
        }
        true
    }

    /// Clear all levels and restart the product-message sequence, keeping
    /// the book's identity.
    pub fn reset(&mut self) {
        self.clear_levels();
        self.last_prod_msg_seq = 0;
    }

    fn clear_levels(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.derived_bid = None;
        self.derived_ask = None;
    }

    pub fn product_id(&self) -> &str {
        &self.product_id
    }

    pub fn decimal_locator(&self) -> u8 {
        self.decimal_locator
    }

    pub fn last_prod_msg_seq(&self) -> u64 {
        self.last_prod_msg_seq
    }

    /// Best `n` bids, highest price first.
    pub fn top_bids(&self, n: usize) -> Vec<PriceLevel> {
        self.bids
            .iter()
            .rev()
            .take(n)
            .map(|(&price, &quantity)| PriceLevel { price, quantity })
            .collect()
    }

    /// Best `n` asks, lowest price first.
    pub fn top_asks(&self, n: usize) -> Vec<PriceLevel> {
        self.asks
            .iter()
            .take(n)
            .map(|(&price, &quantity)| PriceLevel { price, quantity })
            .collect()
    }

    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids
            .iter()
            .next_back()
            .map(|(&price, &quantity)| PriceLevel { price, quantity })
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks
            .iter()
            .next()
            .map(|(&price, &quantity)| PriceLevel { price, quantity })
    }

    pub fn derived_bid(&self) -> Option<PriceLevel> {
        self.derived_bid
    }

    pub fn derived_ask(&self) -> Option<PriceLevel> {
        self.derived_ask
    }

    pub fn bid_levels(&self) -> usize {
        self.bids.len()
    }

    pub fn ask_levels(&self) -> usize {
        self.asks.len()
    }
}

/// An overlay with zero size and zero price clears the slot; anything
/// else replaces it wholesale.
fn derived_slot(price: Price, quantity: Quantity) -> Option<PriceLevel> {
    if quantity > 0 || price != 0 {
        Some(PriceLevel { price, quantity })
    } else {
        None
    }
}

fn apply_level_action(side: &mut BTreeMap<Price, Quantity>, entry: &BookEntry) {
    let price = entry.signed_price();
    match entry.action {
        UpdateAction::New => {
            if entry.size > 0 {
                side.insert(price, entry.size);
            }
        }
        UpdateAction::Change => {
            if entry.size == 0 {
                side.remove(&price);
            } else {
                // A change for an unknown level is inserted: mid-recovery
                // the level may simply not have been seen yet.
                side.insert(price, entry.size);
            }
        }
        UpdateAction::Delete => {
            side.remove(&price);
        }
        // Overlay addresses derived slots only.
        UpdateAction::Overlay | UpdateAction::Other(_) => {}
    }
}
