use async_trait::async_trait;

use crate::credentials::Account;
use crate::error::RouterError;
use crate::types::{BalanceSnapshot, CachedReading, NormalizedOrder, OrderStatus, PositionSnapshot};

/// The flat operation set the Signal Executor needs from a broker protocol
/// adapter. The executor holds this behind `Arc<dyn BrokerAdapter>` and never
/// knows about session detection, TR IDs, or wire formats (§9, "shared state
/// without inheritance").
#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    /// Places `order` against `account`, returning the broker's order id.
    async fn place_order(
        &self,
        account: &Account,
        order: &NormalizedOrder,
    ) -> Result<String, RouterError>;

    /// Cancels a previously placed order. Never cached, never falls back.
    async fn cancel_order(&self, account: &Account, order_id: &str) -> Result<(), RouterError>;

    /// Polls the canonical status of `order_id`.
    async fn poll_status(
        &self,
        account: &Account,
        order_id: &str,
    ) -> Result<OrderStatus, RouterError>;

    /// Fetches the current position for `symbol`, read-through cached (§4.3.6).
    async fn get_position(
        &self,
        account: &Account,
        symbol: &str,
    ) -> CachedReading<PositionSnapshot>;

    /// Fetches account balance/portfolio figures, read-through cached (§4.3.6).
    async fn get_balance(&self, account: &Account) -> CachedReading<BalanceSnapshot>;

    /// Fetches the orderable quantity/notional for `symbol`, read-through
    /// cached with a 10s TTL and `error_safe` fallback (§4.3.6).
    async fn get_orderable_quantity(&self, account: &Account, symbol: &str) -> CachedReading<i64>;

    /// Resolves an abstract signal symbol through the futures translation
    /// table (§4.3.7); a no-op for non-futures classes or unmapped symbols.
    fn translate_symbol(&self, account: &Account, symbol: &str) -> String;

    /// Current traded price for `symbol`, used for notional sizing (§4.3.9).
    async fn get_current_price(&self, account: &Account, symbol: &str) -> Result<f64, RouterError>;

    /// Contract multiplier for a translated futures base code (§4.3.8).
    fn get_multiplier(&self, base_code: &str) -> i64;
}
