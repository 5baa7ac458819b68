//! End-to-end scenarios through the engine and resilience layers.

use std::time::Duration;
use tradecore_rs::prelude::*;

fn engine() -> std::sync::Arc<MatchingEngine> {
    MatchingEngine::new(EngineConfig {
        cleanup_interval: Duration::from_secs(3600),
        ..EngineConfig::default()
    })
}

#[test]
fn scenario_partial_fill_rests_remainder() {
    // Empty book. LIMIT BUY 1.00 × 10, then LIMIT SELL 0.99 × 4:
    // one trade at 1.00 × 4, buyer rests with 6, seller filled.
    let engine = engine();
    let trades = engine.trades();

    let buy = engine
        .place_order(&OrderRequest::limit("FX", Side::Buy, 100, 10, "a"))
        .unwrap();
    let sell = engine
        .place_order(&OrderRequest::limit("FX", Side::Sell, 99, 4, "b"))
        .unwrap();

    assert_eq!(sell.status, OrderStatus::Filled);
    assert_eq!(sell.filled_quantity, 4);

    let trade = trades.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(trade.price, 100, "maker price wins");
    assert_eq!(trade.quantity, 4);
    assert_eq!(trade.maker_order_id, buy.order_id);

    let resting = engine.get_order(buy.order_id).unwrap();
    assert_eq!(resting.remaining, 6);
    assert_eq!(resting.status, OrderStatus::PartiallyFilled);
    assert_eq!(resting.price, Some(100));
}

#[test]
fn scenario_market_buy_walks_two_levels() {
    // Asks 2.00 × 5 and 2.10 × 5; MARKET BUY × 8 fills 5 @ 2.00 and
    // 3 @ 2.10, leaving 2 on the second level.
    let engine = engine();

    let first = engine
        .place_order(&OrderRequest::limit("FX", Side::Sell, 200, 5, "c"))
        .unwrap();
    let second = engine
        .place_order(&OrderRequest::limit("FX", Side::Sell, 210, 5, "d"))
        .unwrap();

    let market = engine
        .place_order(&OrderRequest::market("FX", Side::Buy, 8, "t"))
        .unwrap();
    assert_eq!(market.status, OrderStatus::Filled);
    assert_eq!(market.filled_quantity, 8);
    let avg = market.avg_fill_price.unwrap();
    assert!((avg - (200.0 * 5.0 + 210.0 * 3.0) / 8.0).abs() < 1e-9);

    assert!(engine.get_order(first.order_id).is_err(), "level 1 is gone");
    let remaining = engine.get_order(second.order_id).unwrap();
    assert_eq!(remaining.remaining, 2);
}

#[test]
fn scenario_stop_market_triggers_on_unrelated_match() {
    // STOP_MARKET BUY stop 10.00; last trade moves 9.50 → 10.00 via an
    // unrelated match; the stop drains and executes as a market buy.
    let engine = engine();

    engine
        .place_order(&OrderRequest::stop("FX", Side::Buy, 1000, None, 1, "s"))
        .unwrap();

    // Ask liquidity for the triggered stop.
    engine
        .place_order(&OrderRequest::limit("FX", Side::Sell, 1010, 3, "m"))
        .unwrap();

    // Move last trade to 9.50, below the stop.
    engine
        .place_order(&OrderRequest::limit("FX", Side::Sell, 950, 1, "m"))
        .unwrap();
    engine
        .place_order(&OrderRequest::limit("FX", Side::Buy, 950, 1, "t"))
        .unwrap();
    let snapshot = engine.snapshot("FX", 5).unwrap();
    assert_eq!(snapshot.last_trade_price, Some(950));

    // Move last trade to 10.00: the stop fires and sweeps the ask.
    engine
        .place_order(&OrderRequest::limit("FX", Side::Sell, 1000, 1, "m"))
        .unwrap();
    engine
        .place_order(&OrderRequest::limit("FX", Side::Buy, 1000, 1, "t"))
        .unwrap();

    let snapshot = engine.snapshot("FX", 5).unwrap();
    assert_eq!(snapshot.last_trade_price, Some(1010));
    // The stop consumed 1 of the 3 resting at 10.10.
    assert_eq!(snapshot.best_ask(), Some((1010, 2)));
}

#[test]
fn scenario_breaker_trips_on_sixth_consecutive_failure() {
    let breakers = CircuitBreakers::with_config(BreakerConfig {
        open_timeout: Duration::from_millis(50),
        ..BreakerConfig::default()
    });

    for i in 0..5 {
        let result = breakers.execute("unstable", || Err::<(), _>("boom"));
        assert!(matches!(result, Err(BreakerError::Inner(_))), "call {i}");
        assert_eq!(
            breakers.state("unstable"),
            Some(CircuitState::Closed),
            "call {i} must not trip yet"
        );
    }

    // Sixth consecutive failure trips the breaker.
    let _ = breakers.execute("unstable", || Err::<(), _>("boom"));
    assert_eq!(breakers.state("unstable"), Some(CircuitState::Open));

    // Seventh call is denied without invoking the closure.
    let mut invoked = false;
    let result = breakers.execute("unstable", || {
        invoked = true;
        Ok::<_, &str>(())
    });
    assert!(matches!(result, Err(BreakerError::Open { .. })));
    assert!(!invoked);

    // After the open timeout the next call is admitted as a probe.
    std::thread::sleep(Duration::from_millis(60));
    assert_eq!(breakers.state("unstable"), Some(CircuitState::HalfOpen));
    assert!(breakers.execute("unstable", || Ok::<_, &str>(())).is_ok());
}

#[test]
fn scenario_mean_reversion_sell_after_spike() {
    // Lookback 20, entry 2.0, exit 0.5: twenty quiet prices around
    // 100.0 then a spike to 110.0 emits exactly one SELL until the
    // position is confirmed.
    let engine = engine();
    let provider = StaticAccountProvider::new();
    provider.set_account("quant", 10_000_000.0, 10_000_000.0);
    let gateway = OrderGateway::new(
        std::sync::Arc::clone(&engine),
        std::sync::Arc::new(MarginRiskValidator::new(provider)),
        "quant",
        1.0,
    );

    // Bid liquidity so the strategy's market sell can fill.
    engine
        .place_order(&OrderRequest::limit("FX", Side::Buy, 109, 50, "mm"))
        .unwrap();

    let config = MeanReversionConfig {
        symbol: "FX".to_string(),
        lookback: 20,
        entry_threshold: 2.0,
        exit_threshold: 0.5,
        update_interval: Duration::ZERO,
        order_quantity: 1.0,
        price_scale: 1.0,
    };
    let strategy = MeanReversionStrategy::new("mr", config, gateway);
    let ctx = CancelToken::new();
    strategy.initialize(&ctx).unwrap();
    strategy.start(&ctx).unwrap();

    for i in 0..20 {
        let noise = if i % 2 == 0 { 0.01 } else { -0.01 };
        strategy
            .on_market_data(&ctx, &MarketDataEvent::new("FX", 100.0 + noise, i))
            .unwrap();
    }
    assert_eq!(strategy.metrics()["signals_emitted"], 0);

    strategy
        .on_market_data(&ctx, &MarketDataEvent::new("FX", 110.0, 21))
        .unwrap();
    assert_eq!(strategy.metrics()["signals_emitted"], 1);

    // Further spikes do not re-signal while unconfirmed.
    strategy
        .on_market_data(&ctx, &MarketDataEvent::new("FX", 111.0, 22))
        .unwrap();
    assert_eq!(strategy.metrics()["signals_emitted"], 1);

    // Deliver the engine's fill confirmation; the position goes short.
    let updates = engine.order_updates();
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while strategy.position() == 0.0 && std::time::Instant::now() < deadline {
        match updates.recv_timeout(Duration::from_millis(100)) {
            Ok(update) => {
                strategy.on_order_update(&ctx, &update).unwrap();
            }
            Err(_) => break,
        }
    }
    assert_eq!(strategy.position(), -1.0);
}
