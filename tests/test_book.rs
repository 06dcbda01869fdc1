/// Order book reconstruction tests through the SDK facade

use taifex_feed::bcd::ascii_to_bcd;
use taifex_feed::checksum::xor_checksum;
use taifex_feed::protocol::ESC;
use taifex_feed::TaifexSdk;

fn push_bcd(buf: &mut Vec<u8>, digits: &str) {
    buf.extend_from_slice(&ascii_to_bcd(digits).unwrap());
}

fn build_frame(tc: u8, mk: u8, channel: u32, seq: u64, body: &[u8]) -> Vec<u8> {
    let mut frame = vec![ESC, tc, mk];
    push_bcd(&mut frame, "090000000000");
    push_bcd(&mut frame, &format!("{channel:04}"));
    push_bcd(&mut frame, &format!("{seq:010}"));
    frame.push(0x01);
    push_bcd(&mut frame, &format!("{:04}", body.len()));
    frame.extend_from_slice(body);
    let cs = xor_checksum(&frame[1..]);
    frame.push(cs);
    frame.extend_from_slice(&[0x0D, 0x0A]);
    frame
}

fn product_basic_frame(channel: u32, seq: u64, short_id: &str, decimal_locator: u8) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("{short_id:<10}").as_bytes());
    push_bcd(&mut body, "0000100000");
    body.push(b'F');
    body.push(decimal_locator);
    body.push(0x00);
    push_bcd(&mut body, "20240101");
    push_bcd(&mut body, "20241231");
    body.push(0x01);
    push_bcd(&mut body, "20241218");
    body.push(b'N');
    build_frame(b'1', b'1', channel, seq, &body)
}

/// entries: (entry_type, sign, price, size)
fn snapshot_frame(
    channel: u32,
    seq: u64,
    prod_id: &str,
    prod_msg_seq: u64,
    calculated: u8,
    entries: &[(u8, u8, u64, u64)],
) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("{prod_id:<20}").as_bytes());
    push_bcd(&mut body, &format!("{prod_msg_seq:010}"));
    body.push(calculated);
    push_bcd(&mut body, &format!("{:02}", entries.len()));
    for &(ty, sign, px, size) in entries {
        body.push(ty);
        body.push(sign);
        push_bcd(&mut body, &format!("{px:010}"));
        push_bcd(&mut body, &format!("{size:08}"));
        push_bcd(&mut body, "01");
    }
    build_frame(b'2', b'B', channel, seq, &body)
}

/// entries: (action, entry_type, sign, price, size)
fn update_frame(
    channel: u32,
    seq: u64,
    prod_id: &str,
    prod_msg_seq: u64,
    entries: &[(u8, u8, u8, u64, u64)],
) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("{prod_id:<20}").as_bytes());
    push_bcd(&mut body, &format!("{prod_msg_seq:010}"));
    push_bcd(&mut body, &format!("{:02}", entries.len()));
    for &(action, ty, sign, px, size) in entries {
        body.push(action);
        body.push(ty);
        body.push(sign);
        push_bcd(&mut body, &format!("{px:010}"));
        push_bcd(&mut body, &format!("{size:08}"));
        push_bcd(&mut body, "01");
    }
    build_frame(b'2', b'A', channel, seq, &body)
}

fn heartbeat_frame(channel: u32, seq: u64) -> Vec<u8> {
    build_frame(b'0', b'1', channel, seq, &[])
}

fn sequence_reset_frame(channel: u32, seq: u64) -> Vec<u8> {
    build_frame(b'0', b'2', channel, seq, &[])
}

const PID: &str = "X                   ";

#[test]
fn test_snapshot_then_update() {
    let mut sdk = TaifexSdk::new();
    sdk.process_frame(&product_basic_frame(1, 1, "X", 2));
    sdk.process_frame(&snapshot_frame(
        1,
        2,
        "X",
        100,
        b'0',
        &[
            (b'0', b'0', 10025, 10),
            (b'0', b'0', 10000, 5),
            (b'1', b'0', 10050, 12),
            (b'1', b'0', 10075, 8),
        ],
    ));

    let book = sdk.get_order_book(PID).expect("book created by snapshot");
    assert_eq!(book.last_prod_msg_seq(), 100);
    let best_bid = book.best_bid().unwrap();
    assert_eq!((best_bid.price, best_bid.quantity), (10025, 10));
    let best_ask = book.best_ask().unwrap();
    assert_eq!((best_ask.price, best_ask.quantity), (10050, 12));

    // New bid crossing the book, and the touched ask removed by a
    // zero-size change.
    sdk.process_frame(&update_frame(
        1,
        3,
        "X",
        101,
        &[(b'0', b'0', b'0', 10050, 3), (b'1', b'1', b'0', 10050, 0)],
    ));

    let book = sdk.get_order_book(PID).unwrap();
    assert_eq!(book.last_prod_msg_seq(), 101);
    let best_bid = book.best_bid().unwrap();
    assert_eq!((best_bid.price, best_bid.quantity), (10050, 3));
    let best_ask = book.best_ask().unwrap();
    assert_eq!((best_ask.price, best_ask.quantity), (10075, 8));
    assert_eq!(sdk.stats().snapshots(), 1);
    assert_eq!(sdk.stats().updates(), 1);
}

#[test]
fn test_book_not_created_without_product_info() {
    let mut sdk = TaifexSdk::new();
    sdk.process_frame(&snapshot_frame(1, 1, "X", 100, b'0', &[(b'0', b'0', 10, 1)]));
    assert!(sdk.get_order_book(PID).is_none());
    assert_eq!(sdk.stats().missing_product_info(), 1);

    // Once product info arrives the next message builds the book.
    sdk.process_frame(&product_basic_frame(1, 2, "X", 2));
    sdk.process_frame(&snapshot_frame(1, 3, "X", 101, b'0', &[(b'0', b'0', 10, 1)]));
    assert!(sdk.get_order_book(PID).is_some());
}

#[test]
fn test_composite_product_uses_leading_leg() {
    let mut sdk = TaifexSdk::new();
    sdk.process_frame(&product_basic_frame(1, 1, "TXFF3", 2));
    sdk.process_frame(&snapshot_frame(
        1,
        2,
        "TXFF3/I3",
        50,
        b'0',
        &[(b'0', b'-', 150, 9)],
    ));
    let book = sdk
        .get_order_book("TXFF3/I3            ")
        .expect("spread book keyed by full id");
    assert_eq!(book.best_bid().unwrap().price, -150);
}

#[test]
fn test_replayed_frame_dropped() {
    let mut sdk = TaifexSdk::new();
    sdk.process_frame(&product_basic_frame(1, 1, "X", 2));
    sdk.process_frame(&snapshot_frame(1, 2, "X", 100, b'0', &[(b'0', b'0', 10, 1)]));
    // Same channel sequence again with different content.
    sdk.process_frame(&snapshot_frame(1, 2, "X", 200, b'0', &[]));
    assert_eq!(sdk.get_order_book(PID).unwrap().last_prod_msg_seq(), 100);
    assert_eq!(sdk.stats().replays_dropped(), 1);
}

#[test]
fn test_stale_update_dropped_by_book() {
    let mut sdk = TaifexSdk::new();
    sdk.process_frame(&product_basic_frame(1, 1, "X", 2));
    sdk.process_frame(&snapshot_frame(1, 2, "X", 100, b'0', &[(b'0', b'0', 10, 1)]));
    // Fresh channel sequence but an already-applied product sequence.
    sdk.process_frame(&update_frame(1, 3, "X", 100, &[(b'2', b'0', b'0', 10, 0)]));
    let book = sdk.get_order_book(PID).unwrap();
    assert_eq!(book.best_bid().unwrap().price, 10);
    assert_eq!(sdk.stats().stale_updates(), 1);
}

#[test]
fn test_derived_overlay_through_sdk() {
    let mut sdk = TaifexSdk::new();
    sdk.process_frame(&product_basic_frame(1, 1, "X", 2));
    sdk.process_frame(&snapshot_frame(1, 2, "X", 10, b'0', &[(b'0', b'0', 100, 1)]));
    sdk.process_frame(&update_frame(1, 3, "X", 11, &[(b'5', b'E', b'0', 95, 4)]));
    let book = sdk.get_order_book(PID).unwrap();
    let derived = book.derived_bid().unwrap();
    assert_eq!((derived.price, derived.quantity), (95, 4));

    // Overlay with zero price and size clears the slot.
    sdk.process_frame(&update_frame(1, 4, "X", 12, &[(b'5', b'E', b'0', 0, 0)]));
    assert!(sdk.get_order_book(PID).unwrap().derived_bid().is_none());
}

#[test]
fn test_call_auction_snapshot_drops_derived() {
    let mut sdk = TaifexSdk::new();
    sdk.process_frame(&product_basic_frame(1, 1, "X", 2));
    sdk.process_frame(&snapshot_frame(
        1,
        2,
        "X",
        10,
        b'1',
        &[(b'0', b'0', 999_999_999, 2), (b'E', b'0', 95, 4)],
    ));
    let book = sdk.get_order_book(PID).unwrap();
    assert_eq!(book.best_bid().unwrap().price, 999_999_999);
    assert!(book.derived_bid().is_none());
}

#[test]
fn test_sequence_reset_clears_books_and_reanchors() {
    let mut sdk = TaifexSdk::new();
    sdk.process_frame(&product_basic_frame(1, 1, "X", 2));
    sdk.process_frame(&snapshot_frame(1, 2, "X", 100, b'0', &[(b'0', b'0', 10, 1)]));

    sdk.process_frame(&sequence_reset_frame(1, 3));
    let book = sdk.get_order_book(PID).unwrap();
    assert_eq!(book.best_bid(), None);
    assert_eq!(book.last_prod_msg_seq(), 0);
    assert_eq!(sdk.stats().sequence_resets(), 1);

    // Feed restarts the channel at sequence 1: no gap, books rebuild.
    sdk.process_frame(&snapshot_frame(1, 1, "X", 1, b'0', &[(b'1', b'0', 20, 2)]));
    assert_eq!(sdk.stats().gap_events(), 0);
    assert_eq!(
        sdk.get_order_book(PID).unwrap().best_ask().unwrap().price,
        20
    );
}

#[test]
fn test_gap_counted_and_current_frame_still_applied() {
    let mut sdk = TaifexSdk::new();
    sdk.process_frame(&product_basic_frame(3, 1, "X", 2));
    sdk.process_frame(&snapshot_frame(3, 2, "X", 100, b'0', &[(b'0', b'0', 10, 1)]));
    // Sequences 3 and 4 lost; frame 5 must still mutate the book.
    sdk.process_frame(&update_frame(3, 5, "X", 103, &[(b'0', b'0', b'0', 11, 2)]));
    assert_eq!(sdk.stats().gap_events(), 1);
    assert_eq!(sdk.stats().messages_missed(), 2);
    let book = sdk.get_order_book(PID).unwrap();
    assert_eq!(book.best_bid().unwrap().price, 11);
    assert_eq!(book.last_prod_msg_seq(), 103);
}

#[test]
fn test_corrupt_frames_do_not_touch_state() {
    let mut sdk = TaifexSdk::new();
    sdk.process_frame(&product_basic_frame(1, 1, "X", 2));
    sdk.process_frame(&snapshot_frame(1, 2, "X", 100, b'0', &[(b'0', b'0', 10, 1)]));

    let mut bad = update_frame(1, 3, "X", 101, &[(b'2', b'0', b'0', 10, 0)]);
    let cs_at = bad.len() - 3;
    bad[cs_at] ^= 0xFF;
    sdk.process_frame(&bad);

    let book = sdk.get_order_book(PID).unwrap();
    assert_eq!(book.best_bid().unwrap().price, 10);
    assert_eq!(book.last_prod_msg_seq(), 100);
    assert_eq!(sdk.stats().checksum_errors(), 1);

    // A parse failure after sequence acceptance also leaves books alone.
    let mut truncated_body = snapshot_frame(1, 3, "X", 200, b'0', &[(b'0', b'0', 99, 9)]);
    // Claim two entries but carry one: rebuild with a lying count byte.
    let count_at = 19 + 26;
    truncated_body[count_at] = 0x02;
    let cs_at = truncated_body.len() - 3;
    truncated_body[cs_at] = xor_checksum(&truncated_body[1..cs_at]);
    sdk.process_frame(&truncated_body);

    assert_eq!(sdk.get_order_book(PID).unwrap().last_prod_msg_seq(), 100);
    assert_eq!(sdk.stats().parse_errors(), 1);
}

#[test]
fn test_random_update_storm_keeps_invariants() {
    use rand::{Rng, SeedableRng};
    let mut rng = rand::rngs::StdRng::seed_from_u64(0xFEED);

    let mut sdk = TaifexSdk::new();
    sdk.process_frame(&product_basic_frame(1, 1, "X", 2));
    sdk.process_frame(&snapshot_frame(1, 2, "X", 1, b'0', &[(b'0', b'0', 500, 5)]));

    for i in 0..500u64 {
        let action = [b'0', b'1', b'2'][rng.gen_range(0..3)];
        let ty = [b'0', b'1'][rng.gen_range(0..2)];
        let price = rng.gen_range(1..1000u64);
        let size = rng.gen_range(0..50u64);
        sdk.process_frame(&update_frame(
            1,
            3 + i,
            "X",
            2 + i,
            &[(action, ty, b'0', price, size)],
        ));
    }

    let book = sdk.get_order_book(PID).unwrap();
    // No zero-size level may survive, and iteration stays ordered.
    let bids = book.top_bids(usize::MAX);
    let asks = book.top_asks(usize::MAX);
    for level in bids.iter().chain(asks.iter()) {
        assert!(level.quantity > 0);
    }
    for w in bids.windows(2) {
        assert!(w[0].price > w[1].price);
    }
    for w in asks.windows(2) {
        assert!(w[0].price < w[1].price);
    }
    assert_eq!(book.last_prod_msg_seq(), 501);
}

#[test]
fn test_unknown_message_is_skipped_not_fatal() {
    let mut sdk = TaifexSdk::new();
    sdk.process_frame(&build_frame(b'3', b'3', 1, 1, &[0x01, 0x02]));
    assert_eq!(sdk.stats().unknown_messages(), 1);
    // Channel sequence advanced normally.
    sdk.process_frame(&heartbeat_frame(1, 2));
    assert_eq!(sdk.stats().gap_events(), 0);
    assert_eq!(sdk.stats().heartbeats(), 1);
}
