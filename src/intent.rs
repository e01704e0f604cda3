//! Structured intents consumed by the orchestrator.
//!
//! Intents arrive from an external natural-language parser; this module only
//! defines the boundary contract. The orchestrator never parses free text.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::agent::AgentKind;

/// What the caller wants done
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentAction {
    /// Analysis only, no funds move
    Analyze,
    /// Open a new (possibly leveraged) position
    OpenPosition,
    /// Adjust an existing position
    AdjustPosition,
    /// Close out a position
    ClosePosition,
    /// Move funds between accounts
    TransferFunds,
}

impl IntentAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentAction::Analyze => "analyze",
            IntentAction::OpenPosition => "open_position",
            IntentAction::AdjustPosition => "adjust_position",
            IntentAction::ClosePosition => "close_position",
            IntentAction::TransferFunds => "transfer_funds",
        }
    }
}

impl std::fmt::Display for IntentAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for IntentAction {
    type Err = &'static str;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "analyze" => Ok(IntentAction::Analyze),
            "open_position" => Ok(IntentAction::OpenPosition),
            "adjust_position" => Ok(IntentAction::AdjustPosition),
            "close_position" => Ok(IntentAction::ClosePosition),
            "transfer_funds" => Ok(IntentAction::TransferFunds),
            _ => Err("invalid action; expected analyze|open_position|adjust_position|close_position|transfer_funds"),
        }
    }
}

/// Caller's appetite for risk, used when sizing the execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTolerance {
    Conservative,
    Balanced,
    Aggressive,
}

impl RiskTolerance {
    /// Deterministic sizing multiplier applied to the requested amount.
    pub fn sizing_factor(&self) -> Decimal {
        match self {
            RiskTolerance::Conservative => Decimal::new(5, 1), // 0.5
            RiskTolerance::Balanced => Decimal::ONE,
            RiskTolerance::Aggressive => Decimal::new(15, 1), // 1.5
        }
    }
}

impl Default for RiskTolerance {
    fn default() -> Self {
        RiskTolerance::Balanced
    }
}

/// Objective parameters of an intent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentParams {
    /// Requested notional in USD (zero for pure analysis)
    pub amount_usd: Decimal,
    /// Market symbol the strategy operates on (e.g. "BTC-USD")
    pub symbol: String,
    /// Desired yield, if the caller stated one
    #[serde(default)]
    pub target_apy: Option<Decimal>,
    #[serde(default)]
    pub risk_tolerance: RiskTolerance,
    /// Requested leverage multiple
    #[serde(default)]
    pub leverage: Option<Decimal>,
    /// Slippage the caller is willing to accept, in percent
    #[serde(default)]
    pub max_slippage_pct: Option<Decimal>,
}

/// Structured intent, produced by the excluded NL parser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeIntent {
    pub action: IntentAction,
    /// Target portfolio identifier
    pub target: String,
    /// Requested strategy label (opaque to the core)
    pub strategy: String,
    pub params: IntentParams,
    #[serde(default)]
    pub constraints: Vec<String>,
    /// Agent kinds this intent needs; drives delegation and consensus voting
    #[serde(default)]
    pub required_agents: Vec<AgentKind>,
    /// Explicit read-only marker decided by the caller. Read-only intents
    /// with zero size bypass the inter-execution cooldown.
    #[serde(default)]
    pub read_only: bool,
}

impl TradeIntent {
    pub fn new(
        action: IntentAction,
        target: impl Into<String>,
        strategy: impl Into<String>,
        params: IntentParams,
    ) -> Self {
        Self {
            action,
            target: target.into(),
            strategy: strategy.into(),
            params,
            constraints: Vec::new(),
            required_agents: Vec::new(),
            read_only: false,
        }
    }

    /// Analysis-only intent: zero size, read-only, risk agent only.
    pub fn analysis(target: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            action: IntentAction::Analyze,
            target: target.into(),
            strategy: "analysis".to_string(),
            params: IntentParams {
                amount_usd: Decimal::ZERO,
                symbol: symbol.into(),
                target_apy: None,
                risk_tolerance: RiskTolerance::Balanced,
                leverage: None,
                max_slippage_pct: None,
            },
            constraints: Vec::new(),
            required_agents: vec![AgentKind::Risk],
            read_only: true,
        }
    }

    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraints.push(constraint.into());
        self
    }

    pub fn with_agents(mut self, kinds: impl IntoIterator<Item = AgentKind>) -> Self {
        self.required_agents.extend(kinds);
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn requires(&self, kind: AgentKind) -> bool {
        self.required_agents.contains(&kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_round_trip() {
        assert_eq!(
            "open_position".parse::<IntentAction>().unwrap(),
            IntentAction::OpenPosition
        );
        assert!("buy the dip".parse::<IntentAction>().is_err());
    }

    #[test]
    fn analysis_intent_is_read_only_and_zero_sized() {
        let intent = TradeIntent::analysis("portfolio-1", "BTC-USD");
        assert!(intent.read_only);
        assert_eq!(intent.params.amount_usd, Decimal::ZERO);
        assert!(intent.requires(AgentKind::Risk));
        assert!(!intent.requires(AgentKind::Hedging));
    }

    #[test]
    fn sizing_factor_orders_by_appetite() {
        assert!(
            RiskTolerance::Conservative.sizing_factor()
                < RiskTolerance::Aggressive.sizing_factor()
        );
    }
}
