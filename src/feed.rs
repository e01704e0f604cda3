//! Market data boundary.
//!
//! Price and volatility readings come from external feed adapters that live
//! outside this crate. Agents treat feed failures as hard failures for the
//! task at hand; no default value is ever substituted for a missing reading.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::error::{MarshalError, Result};

/// External market-data source.
#[async_trait]
pub trait MarketFeed: Send + Sync {
    /// Annualized volatility for a symbol, in percent.
    async fn volatility(&self, symbol: &str) -> Result<Decimal>;

    /// Current mid price for a symbol, in USD.
    async fn mid_price(&self, symbol: &str) -> Result<Decimal>;
}

/// In-memory feed with fixed readings. Used for dry runs and tests; an
/// unknown symbol fails the same way a live adapter would.
#[derive(Debug, Default)]
pub struct FixedFeed {
    quotes: HashMap<String, (Decimal, Decimal)>, // symbol -> (volatility_pct, mid_price)
}

impl FixedFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quote(
        mut self,
        symbol: impl Into<String>,
        volatility_pct: Decimal,
        mid_price: Decimal,
    ) -> Self {
        self.quotes
            .insert(symbol.into(), (volatility_pct, mid_price));
        self
    }
}

#[async_trait]
impl MarketFeed for FixedFeed {
    async fn volatility(&self, symbol: &str) -> Result<Decimal> {
        self.quotes
            .get(symbol)
            .map(|(vol, _)| *vol)
            .ok_or_else(|| MarshalError::MarketDataUnavailable(format!("no quote for {}", symbol)))
    }

    async fn mid_price(&self, symbol: &str) -> Result<Decimal> {
        self.quotes
            .get(symbol)
            .map(|(_, price)| *price)
            .ok_or_else(|| MarshalError::MarketDataUnavailable(format!("no quote for {}", symbol)))
    }
}
