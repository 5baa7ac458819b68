//! Boundary behaviors at the engine API.

use std::time::Duration;
use tradecore_rs::prelude::*;

fn engine() -> std::sync::Arc<MatchingEngine> {
    MatchingEngine::new(EngineConfig {
        cleanup_interval: Duration::from_secs(3600),
        ..EngineConfig::default()
    })
}

#[test]
fn test_zero_quantity_is_invalid_input() {
    let engine = engine();
    let mut request = OrderRequest::limit("FX", Side::Buy, 100, 1, "a");
    request.quantity = 0;
    assert!(matches!(
        engine.place_order(&request).unwrap_err(),
        EngineError::InvalidInput(_)
    ));
}

#[test]
fn test_zero_price_is_invalid_input() {
    let engine = engine();
    let request = OrderRequest::limit("FX", Side::Buy, 0, 1, "a");
    assert!(matches!(
        engine.place_order(&request).unwrap_err(),
        EngineError::InvalidInput(_)
    ));
}

#[test]
fn test_missing_stop_price_is_invalid_input() {
    let engine = engine();
    let mut request = OrderRequest::stop("FX", Side::Buy, 100, None, 1, "a");
    request.stop_price = None;
    assert!(matches!(
        engine.place_order(&request).unwrap_err(),
        EngineError::InvalidInput(_)
    ));
}

#[test]
fn test_market_buy_empty_asks_rejected_without_state_change() {
    let engine = engine();
    // Seed only a bid so the book exists with a non-empty side.
    engine
        .place_order(&OrderRequest::limit("FX", Side::Buy, 90, 5, "a"))
        .unwrap();
    let before = engine.snapshot("FX", 10).unwrap();

    let response = engine
        .place_order(&OrderRequest::market("FX", Side::Buy, 5, "t"))
        .unwrap();
    assert_eq!(response.status, OrderStatus::Rejected);
    assert_eq!(response.filled_quantity, 0);
    assert!(response.reject_reason.is_some());

    assert_eq!(engine.snapshot("FX", 10).unwrap(), before);
}

#[test]
fn test_limit_crossing_multiple_levels_fills_best_to_worst() {
    let engine = engine();
    let trades = engine.trades();

    engine
        .place_order(&OrderRequest::limit("FX", Side::Sell, 103, 2, "m"))
        .unwrap();
    engine
        .place_order(&OrderRequest::limit("FX", Side::Sell, 101, 2, "m"))
        .unwrap();
    engine
        .place_order(&OrderRequest::limit("FX", Side::Sell, 102, 2, "m"))
        .unwrap();

    let response = engine
        .place_order(&OrderRequest::limit("FX", Side::Buy, 103, 6, "t"))
        .unwrap();
    assert_eq!(response.status, OrderStatus::Filled);

    let mut prices = Vec::new();
    while let Ok(trade) = trades.recv_timeout(Duration::from_millis(200)) {
        prices.push(trade.price);
    }
    assert_eq!(prices, vec![101, 102, 103]);
}

#[test]
fn test_duplicate_client_submission_gets_distinct_ids() {
    let engine = engine();
    let request = OrderRequest::limit("FX", Side::Buy, 100, 1, "a");
    let first = engine.place_order(&request).unwrap();
    let second = engine.place_order(&request).unwrap();
    assert_ne!(first.order_id, second.order_id);
}

#[test]
fn test_get_order_returns_value_copy() {
    let engine = engine();
    let placed = engine
        .place_order(&OrderRequest::limit("FX", Side::Buy, 100, 5, "a"))
        .unwrap();

    let mut copy = engine.get_order(placed.order_id).unwrap();
    copy.remaining = 0;

    // Mutating the copy does not touch the book.
    assert_eq!(engine.get_order(placed.order_id).unwrap().remaining, 5);
}

#[test]
fn test_ioc_market_remainder_cancelled() {
    let engine = engine();
    engine
        .place_order(&OrderRequest::limit("FX", Side::Sell, 100, 3, "m"))
        .unwrap();

    let mut request = OrderRequest::market("FX", Side::Buy, 10, "t");
    request.time_in_force = Some(TimeInForce::Ioc);
    let response = engine.place_order(&request).unwrap();

    assert_eq!(response.status, OrderStatus::Cancelled);
    assert_eq!(response.filled_quantity, 3);
}

#[test]
fn test_fok_limit_all_or_nothing() {
    let engine = engine();
    engine
        .place_order(&OrderRequest::limit("FX", Side::Sell, 100, 3, "m"))
        .unwrap();

    let mut request = OrderRequest::limit("FX", Side::Buy, 100, 10, "t");
    request.time_in_force = Some(TimeInForce::Fok);
    let response = engine.place_order(&request).unwrap();
    assert_eq!(response.status, OrderStatus::Rejected);
    assert_eq!(response.filled_quantity, 0);

    // The resting ask was untouched by the simulation.
    let snapshot = engine.snapshot("FX", 5).unwrap();
    assert_eq!(snapshot.best_ask(), Some((100, 3)));
}
