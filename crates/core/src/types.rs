use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountClass {
    Stock,
    Futures,
    Overseas,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Transition {
    Entry,
    Exit,
    Reverse,
}

/// Broker market session, a pure function of wallclock time (see `kis::session`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Session {
    Day,
    Night,
    Closed,
}

/// Canonical order status the adapter projects broker-specific vocabularies onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    PartialFilled,
    Filled,
    Rejected,
    Cancelled,
    NotFound,
    Invalid,
    Error,
    Unknown,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Rejected | OrderStatus::Cancelled
        )
    }
}

/// The KIS TR-ID action family a request falls under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TrAction {
    Order,
    Cancel,
    Balance,
    Inquiry,
    Orderable,
}

/// One inbound webhook payload, transient for the life of a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub action: Side,
    pub quantity: i64,
    pub webhook_token: String,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

/// Raw, unvalidated webhook body — field types mirror what a client actually sends
/// (string action, before normalization) so validation failures are reported precisely.
#[derive(Debug, Clone, Deserialize)]
pub struct RawSignal {
    pub symbol: Option<String>,
    pub action: Option<String>,
    pub quantity: Option<i64>,
    pub webhook_token: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
}

/// A Signal translated against a resolved Account, ready for the broker adapter.
#[derive(Debug, Clone, Serialize)]
pub struct NormalizedOrder {
    pub account_ref: String,
    pub symbol: String,
    pub original_symbol: String,
    pub side: Side,
    pub quantity: i64,
    pub price: Option<f64>,
    pub transition: Transition,
}

/// Read-through position snapshot, cached by the Broker Adapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub symbol: String,
    pub quantity: i64,
    pub avg_price: f64,
    pub current_value: f64,
    pub unrealized_pnl: f64,
}

impl PositionSnapshot {
    pub fn flat(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            ..Default::default()
        }
    }
}

/// Read-through account balance, cached by the Broker Adapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub total_balance: f64,
    pub available_balance: f64,
    pub portfolio_value: f64,
    pub daily_realized_pnl: f64,
}

/// The `status` tag read-through fetches carry, per the cache/fallback design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    Success,
    Cached,
    ErrorFallback,
    ErrorSafe,
}

#[derive(Debug, Clone, Serialize)]
pub struct CachedReading<T> {
    pub value: T,
    pub status: FetchStatus,
    pub cache_age_secs: Option<i64>,
    pub error: Option<String>,
}

/// The taxonomy the executor classifies every failure into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    Validation,
    EmergencyStop,
    Risk,
    Broker,
    System,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ExecutionResult {
    pub success: bool,
    pub order_id: Option<String>,
    pub close_order_id: Option<String>,
    pub filled: bool,
    pub transition: Option<Transition>,
    pub error_type: Option<ErrorType>,
    pub message: Option<String>,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl ExecutionResult {
    pub fn failure(error_type: ErrorType, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_type: Some(error_type),
            message: Some(message.into()),
            ..Default::default()
        }
    }

    /// Same as `failure`, plus a machine-readable `reason` in `details` so
    /// the HTTP Surface can pick a status code finer-grained than the five
    /// `error_type` buckets (unknown token vs. inactive account both being
    /// `validation`, per the distilled error taxonomy).
    pub fn failure_with_reason(
        error_type: ErrorType,
        reason: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            error_type: Some(error_type),
            message: Some(message.into()),
            details: serde_json::json!({ "reason": reason }),
            ..Default::default()
        }
    }
}
