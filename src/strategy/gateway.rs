//! The opaque order-submission handle strategies hold.
//!
//! Strategies never see the engine or the registry: they submit
//! through [`OrderSubmitter`], whose production implementation runs the
//! risk validator and forwards to the matching engine. This one-way
//! reference is what keeps the strategy ↔ runtime graph acyclic.

use super::contract::StrategyError;
use crate::engine::{MatchingEngine, OrderRequest, OrderResponse};
use crate::orderbook::{OrderKind, Side, TimeInForce};
use crate::risk::{OrderCheck, RiskValidator};
use std::sync::Arc;
use tracing::{debug, warn};

/// An order as a strategy expresses it, in display units.
#[derive(Debug, Clone)]
pub struct StrategyOrder {
    /// Trading symbol
    pub symbol: String,
    /// Buy or Sell
    pub side: Side,
    /// Order kind
    pub kind: OrderKind,
    /// Time-in-force; `None` defaults to GTC
    pub time_in_force: Option<TimeInForce>,
    /// Quantity in units
    pub quantity: f64,
    /// Limit price in display units, if the kind needs one
    pub price: Option<f64>,
    /// Current mark, used for risk sizing of market orders
    pub mark: f64,
}

impl StrategyOrder {
    /// A market order marked at `mark`.
    #[must_use]
    pub fn market(symbol: &str, side: Side, quantity: f64, mark: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            kind: OrderKind::Market,
            time_in_force: None,
            quantity,
            price: None,
            mark,
        }
    }
}

/// Order submission boundary between strategies and the platform.
pub trait OrderSubmitter: Send + Sync {
    /// Validates and submits one order.
    fn submit(&self, order: &StrategyOrder) -> Result<OrderResponse, StrategyError>;
}

/// Production submitter: risk validation, unit conversion, engine
/// placement.
pub struct OrderGateway {
    engine: Arc<MatchingEngine>,
    validator: Arc<dyn RiskValidator>,
    account_id: String,
    /// Display-price units per minimum price increment, e.g. 100 for
    /// cent-priced symbols
    price_scale: f64,
}

impl OrderGateway {
    /// Wires a gateway to an engine and validator for one account.
    pub fn new(
        engine: Arc<MatchingEngine>,
        validator: Arc<dyn RiskValidator>,
        account_id: &str,
        price_scale: f64,
    ) -> Arc<Self> {
        Arc::new(Self {
            engine,
            validator,
            account_id: account_id.to_string(),
            price_scale: if price_scale > 0.0 { price_scale } else { 1.0 },
        })
    }

    /// Converts a display price to integer increments.
    #[must_use]
    pub fn to_increments(&self, price: f64) -> u128 {
        (price * self.price_scale).round().max(0.0) as u128
    }

    /// Converts integer increments back to a display price.
    #[must_use]
    pub fn to_display(&self, price: u128) -> f64 {
        price as f64 / self.price_scale
    }
}

impl OrderSubmitter for OrderGateway {
    fn submit(&self, order: &StrategyOrder) -> Result<OrderResponse, StrategyError> {
        let reference_price = order.price.unwrap_or(order.mark);
        let assessment = self.validator.validate(&OrderCheck {
            account_id: &self.account_id,
            symbol: &order.symbol,
            side: order.side,
            kind: order.kind,
            quantity: order.quantity,
            price: reference_price,
        });
        if !assessment.allowed {
            let reason = assessment
                .reason
                .unwrap_or_else(|| "risk check failed".to_string());
            warn!(
                symbol = %order.symbol,
                side = %order.side,
                quantity = order.quantity,
                %reason,
                "order refused by risk validator"
            );
            return Err(StrategyError::RiskRejected(reason));
        }
        debug!(
            symbol = %order.symbol,
            side = %order.side,
            risk = %assessment.risk_level,
            required_margin = assessment.required_margin,
            "order passed risk validation"
        );

        let request = OrderRequest {
            client_order_id: None,
            symbol: order.symbol.clone(),
            side: order.side,
            kind: order.kind,
            time_in_force: order.time_in_force,
            quantity: order.quantity.round().max(0.0) as u64,
            price: order.price.map(|p| self.to_increments(p)),
            stop_price: None,
            user_id: self.account_id.clone(),
        };
        Ok(self.engine.place_order(&request)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::orderbook::OrderStatus;
    use crate::risk::{MarginRiskValidator, StaticAccountProvider};

    fn gateway(balance: f64) -> Arc<OrderGateway> {
        let engine = MatchingEngine::new(EngineConfig {
            cleanup_interval: std::time::Duration::from_secs(3600),
            ..EngineConfig::default()
        });
        let provider = StaticAccountProvider::new();
        provider.set_account("strategy-acct", balance, balance);
        OrderGateway::new(
            engine,
            Arc::new(MarginRiskValidator::new(provider)),
            "strategy-acct",
            100.0,
        )
    }

    #[test]
    fn test_price_scale_round_trip() {
        let gateway = gateway(1_000_000.0);
        assert_eq!(gateway.to_increments(100.25), 10_025);
        assert!((gateway.to_display(10_025) - 100.25).abs() < 1e-9);
    }

    #[test]
    fn test_submit_passes_risk_and_places() {
        let gateway = gateway(1_000_000.0);
        let response = gateway
            .submit(&StrategyOrder {
                symbol: "BTC/USD".to_string(),
                side: Side::Buy,
                kind: OrderKind::Limit,
                time_in_force: None,
                quantity: 5.0,
                price: Some(100.0),
                mark: 100.0,
            })
            .unwrap();
        assert_eq!(response.status, OrderStatus::New);
    }

    #[test]
    fn test_submit_rejected_by_risk() {
        let gateway = gateway(10.0);
        let result = gateway.submit(&StrategyOrder::market("BTC/USD", Side::Buy, 1_000.0, 500.0));
        assert!(matches!(result, Err(StrategyError::RiskRejected(_))));
    }
}
