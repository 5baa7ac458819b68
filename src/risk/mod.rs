//! Pre-trade risk validation.
//!
//! The validator is pure and synchronous: callers run it before handing
//! an order to the matching engine. The default implementation checks
//! margin sufficiency against an [`AccountProvider`] and grades each
//! order LOW/MEDIUM/HIGH.

use crate::orderbook::{OrderKind, Side};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;
use tracing::debug;

/// Risk grade attached to every assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    /// Comfortable margin headroom
    Low,
    /// Notable but acceptable exposure
    Medium,
    /// Near the margin or concentration limits
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "LOW"),
            RiskLevel::Medium => write!(f, "MEDIUM"),
            RiskLevel::High => write!(f, "HIGH"),
        }
    }
}

/// The order attributes a validator examines.
#[derive(Debug, Clone)]
pub struct OrderCheck<'a> {
    /// Account submitting the order
    pub account_id: &'a str,
    /// Trading symbol
    pub symbol: &'a str,
    /// Buy or Sell
    pub side: Side,
    /// Order kind
    pub kind: OrderKind,
    /// Quantity in units
    pub quantity: f64,
    /// Reference price (limit price, or mark for market orders)
    pub price: f64,
}

/// Outcome of a pre-trade check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Whether the order may proceed
    pub allowed: bool,
    /// Populated when `allowed` is false
    pub reason: Option<String>,
    /// Margin the order would consume
    pub required_margin: f64,
    /// Margin level (percent of balance) after the order
    pub margin_level_after: f64,
    /// Grade of the order
    pub risk_level: RiskLevel,
}

impl RiskAssessment {
    fn denied(reason: String, required_margin: f64, margin_level_after: f64) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            required_margin,
            margin_level_after,
            risk_level: RiskLevel::High,
        }
    }
}

/// Pre-trade check interface; implementations must be pure and
/// synchronous.
pub trait RiskValidator: Send + Sync {
    /// Validates one order request.
    fn validate(&self, check: &OrderCheck<'_>) -> RiskAssessment;
}

/// Account state consulted by the default validator.
pub trait AccountProvider: Send + Sync {
    /// Total account balance.
    fn balance(&self, account_id: &str) -> f64;
    /// Margin currently available.
    fn available_margin(&self, account_id: &str) -> f64;
    /// Initial margin rate for a symbol (fraction of notional).
    fn margin_rate(&self, symbol: &str) -> f64;
}

/// In-memory account provider.
#[derive(Debug, Default)]
pub struct StaticAccountProvider {
    balances: RwLock<HashMap<String, f64>>,
    margins: RwLock<HashMap<String, f64>>,
    rates: RwLock<HashMap<String, f64>>,
    default_rate: f64,
}

impl StaticAccountProvider {
    /// Provider with a default margin rate of 10% of notional.
    #[must_use]
    pub fn new() -> Self {
        Self {
            default_rate: 0.1,
            ..Self::default()
        }
    }

    /// Sets an account's balance and available margin.
    pub fn set_account(&self, account_id: &str, balance: f64, available_margin: f64) {
        self.balances
            .write()
            .expect("account lock poisoned")
            .insert(account_id.to_string(), balance);
        self.margins
            .write()
            .expect("account lock poisoned")
            .insert(account_id.to_string(), available_margin);
    }

    /// Sets a per-symbol margin rate.
    pub fn set_margin_rate(&self, symbol: &str, rate: f64) {
        self.rates
            .write()
            .expect("account lock poisoned")
            .insert(symbol.to_string(), rate);
    }
}

impl AccountProvider for StaticAccountProvider {
    fn balance(&self, account_id: &str) -> f64 {
        *self
            .balances
            .read()
            .expect("account lock poisoned")
            .get(account_id)
            .unwrap_or(&0.0)
    }

    fn available_margin(&self, account_id: &str) -> f64 {
        *self
            .margins
            .read()
            .expect("account lock poisoned")
            .get(account_id)
            .unwrap_or(&0.0)
    }

    fn margin_rate(&self, symbol: &str) -> f64 {
        *self
            .rates
            .read()
            .expect("account lock poisoned")
            .get(symbol)
            .unwrap_or(&self.default_rate)
    }
}

/// Default margin-based validator.
///
/// `requiredMargin = quantity · price · marginRate(symbol)`; the order
/// is denied when available margin cannot cover it. HIGH when the
/// post-order margin level drops below 50% or the order exceeds half
/// the account balance; MEDIUM at half that severity (margin level
/// below 75%, or more than a quarter of the balance); LOW otherwise.
pub struct MarginRiskValidator<P> {
    provider: P,
}

impl<P: AccountProvider> MarginRiskValidator<P> {
    /// Wraps an account provider.
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// Access the underlying provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }
}

impl<P: AccountProvider> RiskValidator for MarginRiskValidator<P> {
    fn validate(&self, check: &OrderCheck<'_>) -> RiskAssessment {
        if check.quantity <= 0.0 || !check.quantity.is_finite() {
            return RiskAssessment::denied(
                format!("invalid quantity {}", check.quantity),
                0.0,
                0.0,
            );
        }
        if check.price <= 0.0 || !check.price.is_finite() {
            return RiskAssessment::denied(format!("invalid price {}", check.price), 0.0, 0.0);
        }

        let order_value = check.quantity * check.price;
        let rate = self.provider.margin_rate(check.symbol);
        let required_margin = order_value * rate;
        let available = self.provider.available_margin(check.account_id);
        let balance = self.provider.balance(check.account_id);

        if available < required_margin {
            debug!(
                account = check.account_id,
                symbol = check.symbol,
                required_margin,
                available,
                "order denied: insufficient margin"
            );
            return RiskAssessment::denied(
                format!(
                    "insufficient margin: required {required_margin:.2}, available {available:.2}"
                ),
                required_margin,
                0.0,
            );
        }

        let margin_level_after = if balance > 0.0 {
            (available - required_margin) / balance * 100.0
        } else {
            0.0
        };
        let balance_share = if balance > 0.0 {
            order_value / balance
        } else {
            1.0
        };

        let risk_level = if margin_level_after < 50.0 || balance_share > 0.5 {
            RiskLevel::High
        } else if margin_level_after < 75.0 || balance_share > 0.25 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };

        RiskAssessment {
            allowed: true,
            reason: None,
            required_margin,
            margin_level_after,
            risk_level,
        }
    }
}
