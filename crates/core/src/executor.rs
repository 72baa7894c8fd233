use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::broker::BrokerAdapter;
use crate::credentials::{Account, CredentialStore};
use crate::error::RouterError;
use crate::types::{
    AccountClass, ErrorType, ExecutionResult, FetchStatus, NormalizedOrder, RawSignal, Side,
    Signal, Transition,
};

const FILL_POLL_SLEEP_BEFORE: Duration = Duration::from_secs(1);
const FILL_POLL_SLEEP_AFTER: Duration = Duration::from_secs(4);
const SIGNAL_FILL_TIMEOUT: Duration = Duration::from_secs(30);
const REVERSE_CLOSE_TIMEOUT: Duration = Duration::from_secs(120);
const REVERSE_ENTRY_TIMEOUT: Duration = Duration::from_secs(60);

/// Process-wide halt, toggled by the administrative surface and checked as
/// Stage 1 of every execution (§4.4, §9 "global state").
#[derive(Debug, Default)]
pub struct EmergencyStop(AtomicBool);

impl EmergencyStop {
    pub fn engaged(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// The orchestrator composing a Credential Store and a Broker Adapter without
/// inheritance (§9).
pub struct SignalExecutor {
    store: Arc<CredentialStore>,
    broker: Arc<dyn BrokerAdapter>,
    emergency: Arc<EmergencyStop>,
}

impl SignalExecutor {
    pub fn new(
        store: Arc<CredentialStore>,
        broker: Arc<dyn BrokerAdapter>,
        emergency: Arc<EmergencyStop>,
    ) -> Self {
        Self {
            store,
            broker,
            emergency,
        }
    }

    pub fn emergency_stop(&self) {
        self.emergency.stop();
    }

    pub fn resume(&self) {
        self.emergency.resume();
    }

    /// Runs the full ten-stage pipeline for one inbound signal.
    pub async fn execute(&self, raw: RawSignal) -> ExecutionResult {
        // Stage 1 — emergency gate.
        if self.emergency.engaged() {
            tracing::warn!("execution blocked: emergency stop engaged");
            return ExecutionResult::failure(ErrorType::EmergencyStop, "emergency stop engaged");
        }

        // Stage 2 — validation.
        let signal = match validate(raw) {
            Ok(signal) => signal,
            Err(err) => {
                return ExecutionResult::failure_with_reason(ErrorType::Validation, "validation", err)
            }
        };

        // Stage 3 — routing.
        let account = match self.store.load_by_token(&signal.webhook_token) {
            Some(account) if !account.is_active => {
                return ExecutionResult::failure_with_reason(
                    ErrorType::Validation,
                    "inactive_account",
                    format!("account {} is inactive", account.id),
                );
            }
            Some(account) if !account.is_strategy_active => {
                return ExecutionResult::failure_with_reason(
                    ErrorType::Validation,
                    "inactive_account",
                    format!("strategy for account {} is inactive", account.id),
                );
            }
            Some(account) => account.clone(),
            None => {
                return ExecutionResult::failure_with_reason(
                    ErrorType::Validation,
                    "unknown_token",
                    "unknown webhook token",
                )
            }
        };

        match self.execute_for_account(&account, signal).await {
            Ok(result) => result,
            Err(err) => ExecutionResult::failure(err.error_type(), err.to_string()),
        }
    }

    async fn execute_for_account(
        &self,
        account: &Account,
        signal: Signal,
    ) -> Result<ExecutionResult, RouterError> {
        // Stage 4 — symbol translation.
        let translated_symbol = self.broker.translate_symbol(account, &signal.symbol);

        // Stage 5 — current position.
        let position = self.broker.get_position(account, &translated_symbol).await;
        let current_qty = position.value.quantity;

        // Stage 6 — quantity resolution.
        let resolved_qty = self
            .resolve_quantity(account, &signal, &translated_symbol, current_qty)
            .await?;

        // Stage 7 — transition inference.
        let transition = transition_for(current_qty, signal.action, resolved_qty);

        let order = NormalizedOrder {
            account_ref: account.id.clone(),
            symbol: translated_symbol.clone(),
            original_symbol: signal.symbol.clone(),
            side: signal.action,
            quantity: resolved_qty,
            price: signal.price,
            transition,
        };

        // Stage 8 — risk gate.
        self.run_risk_gate(account, &order, &translated_symbol, current_qty)
            .await?;

        // Stage 9 & 10 — placement and fill wait.
        match transition {
            Transition::Entry | Transition::Exit => {
                let order_id = self.broker.place_order(account, &order).await?;
                let status = self
                    .wait_for_fill(account, &order_id, SIGNAL_FILL_TIMEOUT)
                    .await;
                Ok(ExecutionResult {
                    success: status.is_terminal() && status == crate::types::OrderStatus::Filled,
                    order_id: Some(order_id),
                    filled: status == crate::types::OrderStatus::Filled,
                    transition: Some(transition),
                    ..Default::default()
                })
            }
            Transition::Reverse => self.execute_reverse(account, &order, current_qty).await,
        }
    }

    async fn execute_reverse(
        &self,
        account: &Account,
        order: &NormalizedOrder,
        current_qty: i64,
    ) -> Result<ExecutionResult, RouterError> {
        let close_side = if current_qty > 0 {
            Side::Sell
        } else {
            Side::Buy
        };
        let close_order = NormalizedOrder {
            account_ref: account.id.clone(),
            symbol: order.symbol.clone(),
            original_symbol: order.original_symbol.clone(),
            side: close_side,
            quantity: current_qty.abs(),
            price: None,
            transition: Transition::Exit,
        };

        let close_order_id = self.broker.place_order(account, &close_order).await?;
        let close_status = self
            .wait_for_fill(account, &close_order_id, REVERSE_CLOSE_TIMEOUT)
            .await;

        if close_status != crate::types::OrderStatus::Filled {
            // P7: the close leg did not reach FILLED — never place the entry.
            return Err(RouterError::Broker(format!(
                "reverse close leg {close_order_id} did not fill (status: {close_status:?})"
            )));
        }

        tokio::time::sleep(Duration::from_secs(1)).await;

        let entry_qty = (order.quantity - current_qty.abs()).max(1);
        let entry_order = NormalizedOrder {
            quantity: entry_qty,
            ..order.clone()
        };
        let entry_order_id = self.broker.place_order(account, &entry_order).await?;
        let entry_status = self
            .wait_for_fill(account, &entry_order_id, REVERSE_ENTRY_TIMEOUT)
            .await;

        Ok(ExecutionResult {
            success: entry_status == crate::types::OrderStatus::Filled,
            order_id: Some(entry_order_id),
            close_order_id: Some(close_order_id),
            filled: entry_status == crate::types::OrderStatus::Filled,
            transition: Some(Transition::Reverse),
            ..Default::default()
        })
    }

    async fn resolve_quantity(
        &self,
        account: &Account,
        signal: &Signal,
        symbol: &str,
        current_qty: i64,
    ) -> Result<i64, RouterError> {
        if signal.quantity > 0 {
            return Ok(signal.quantity);
        }

        match (signal.action, current_qty) {
            (Side::Sell, qty) if qty > 0 => Ok(qty),
            (Side::Sell, qty) if qty < 0 => Err(RouterError::Validation(
                "already short, cannot add via full-trade semantics".to_string(),
            )),
            (Side::Sell, _) => {
                if account.account_class() == AccountClass::Futures {
                    self.default_futures_size(account, symbol).await
                } else {
                    Err(RouterError::Validation(
                        "cannot open a short via full-trade semantics on a non-futures account"
                            .to_string(),
                    ))
                }
            }
            (Side::Buy, qty) if qty < 0 => Ok(qty.abs()),
            (Side::Buy, _) => {
                if account.account_class() == AccountClass::Futures {
                    self.default_futures_size(account, symbol).await
                } else {
                    self.default_non_futures_size(account, symbol).await
                }
            }
        }
    }

    async fn default_futures_size(
        &self,
        account: &Account,
        symbol: &str,
    ) -> Result<i64, RouterError> {
        let balance = self.broker.get_balance(account).await;
        let price = self.broker.get_current_price(account, symbol).await?;
        let base_code = &symbol[..symbol.len().saturating_sub(2).max(0)];
        let multiplier = self.broker.get_multiplier(base_code).max(1);

        if price <= 0.0 {
            return Err(RouterError::System(anyhow::anyhow!(
                "non-positive current price for {symbol}"
            )));
        }

        let notional_capacity =
            balance.value.total_balance * account.leverage * account.max_position_ratio;
        let size = (notional_capacity / (price * multiplier as f64)).floor() as i64;
        Ok(size.max(1))
    }

    async fn default_non_futures_size(
        &self,
        account: &Account,
        symbol: &str,
    ) -> Result<i64, RouterError> {
        let orderable = self.broker.get_orderable_quantity(account, symbol).await;
        if orderable.status == FetchStatus::ErrorSafe {
            return Err(RouterError::Risk(
                "orderable amount unavailable, refusing full-trade size".to_string(),
            ));
        }
        let size = ((orderable.value as f64) * 0.1).floor() as i64;
        Ok(size.max(1))
    }

    async fn run_risk_gate(
        &self,
        account: &Account,
        order: &NormalizedOrder,
        symbol: &str,
        _current_qty: i64,
    ) -> Result<(), RouterError> {
        // Check 1: account active.
        if !account.is_active {
            return Err(RouterError::Risk("account_inactive".to_string()));
        }

        let price = self
            .broker
            .get_current_price(account, symbol)
            .await
            .unwrap_or(0.0);
        let notional = order.quantity as f64 * price;

        let balance = self.broker.get_balance(account).await;

        // Check 2: balance reliable and sufficient when there's real notional at stake.
        if notional > 0.0 {
            if balance.status == FetchStatus::ErrorFallback {
                return Err(RouterError::Risk(
                    "unreliable_balance_for_trading".to_string(),
                ));
            }
            if balance.value.available_balance < notional && account.account_class() != AccountClass::Futures {
                return Err(RouterError::Risk(
                    "unreliable_balance_for_trading".to_string(),
                ));
            }
        }

        // Check 3: position ratio vs strategy limit.
        if balance.value.portfolio_value > 0.0 {
            let ratio = notional / balance.value.portfolio_value;
            if ratio > account.max_position_ratio {
                return Err(RouterError::Risk("position_limit_exceeded".to_string()));
            }
        }

        // Check 4: daily realized P&L vs strategy limit.
        if balance.value.daily_realized_pnl <= -account.max_daily_loss {
            return Err(RouterError::Risk("daily_loss_limit_exceeded".to_string()));
        }

        Ok(())
    }

    async fn wait_for_fill(
        &self,
        account: &Account,
        order_id: &str,
        timeout: Duration,
    ) -> crate::types::OrderStatus {
        let deadline = Instant::now() + timeout;
        loop {
            tokio::time::sleep(FILL_POLL_SLEEP_BEFORE).await;
            match self.broker.poll_status(account, order_id).await {
                Ok(status) if status.is_terminal() => return status,
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(order_id, error = %err, "status poll failed, retrying");
                }
            }
            if Instant::now() >= deadline {
                tracing::warn!(order_id, "fill wait timed out");
                return crate::types::OrderStatus::Unknown;
            }
            tokio::time::sleep(FILL_POLL_SLEEP_AFTER).await;
            if Instant::now() >= deadline {
                return crate::types::OrderStatus::Unknown;
            }
        }
    }
}

/// Stage 2 validation: required fields, normalized action, quantity bound.
fn validate(raw: RawSignal) -> Result<Signal, String> {
    let symbol = raw
        .symbol
        .filter(|s| !s.trim().is_empty())
        .ok_or("symbol is required")?
        .trim()
        .to_uppercase();

    let webhook_token = raw
        .webhook_token
        .filter(|t| !t.trim().is_empty())
        .ok_or("webhook_token is required")?
        .trim()
        .to_string();

    let action_raw = raw.action.filter(|a| !a.trim().is_empty()).ok_or("action is required")?;
    let action = match action_raw.trim().to_uppercase().as_str() {
        "BUY" => Side::Buy,
        "SELL" => Side::Sell,
        other => return Err(format!("action must be BUY or SELL, got '{other}'")),
    };

    let quantity = raw.quantity.ok_or("quantity is required")?;
    if quantity < -1 {
        return Err(format!("quantity must be >= -1, got {quantity}"));
    }

    Ok(Signal {
        symbol,
        action,
        quantity,
        webhook_token,
        price: raw.price,
        received_at: chrono::Utc::now(),
    })
}

/// Pure function of `(current_qty, action, resolved signal_qty)` per §4.4
/// Stage 7 / P6.
pub fn transition_for(current_qty: i64, action: Side, signal_qty: i64) -> Transition {
    let current_abs = current_qty.abs();
    match (current_qty, action) {
        (0, _) => Transition::Entry,
        (qty, Side::Buy) if qty > 0 => Transition::Entry,
        (qty, Side::Sell) if qty > 0 => {
            if signal_qty > current_abs {
                Transition::Reverse
            } else {
                Transition::Exit
            }
        }
        (qty, Side::Sell) if qty < 0 => Transition::Entry,
        (qty, Side::Buy) if qty < 0 => {
            if signal_qty > current_abs {
                Transition::Reverse
            } else {
                Transition::Exit
            }
        }
        _ => Transition::Entry,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerAdapter;
    use crate::types::{BalanceSnapshot, CachedReading, OrderStatus, PositionSnapshot};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[test]
    fn transition_table_matches_spec() {
        assert_eq!(transition_for(0, Side::Buy, 1), Transition::Entry);
        assert_eq!(transition_for(0, Side::Sell, 1), Transition::Entry);
        assert_eq!(transition_for(5, Side::Buy, 1), Transition::Entry);
        assert_eq!(transition_for(5, Side::Sell, 3), Transition::Exit);
        assert_eq!(transition_for(5, Side::Sell, 5), Transition::Exit);
        assert_eq!(transition_for(5, Side::Sell, 8), Transition::Reverse);
        assert_eq!(transition_for(-5, Side::Sell, 1), Transition::Entry);
        assert_eq!(transition_for(-5, Side::Buy, 3), Transition::Exit);
        assert_eq!(transition_for(-5, Side::Buy, 5), Transition::Exit);
        assert_eq!(transition_for(-5, Side::Buy, 8), Transition::Reverse);
    }

    #[test]
    fn validate_rejects_bad_quantity() {
        let raw = RawSignal {
            symbol: Some("usdkrw".to_string()),
            action: Some("buy".to_string()),
            quantity: Some(-2),
            webhook_token: Some("tok".to_string()),
            price: None,
        };
        assert!(validate(raw).is_err());
    }

    #[test]
    fn validate_normalizes_symbol_and_action() {
        let raw = RawSignal {
            symbol: Some(" usdkrw ".to_string()),
            action: Some("buy".to_string()),
            quantity: Some(1),
            webhook_token: Some("tok".to_string()),
            price: None,
        };
        let signal = validate(raw).unwrap();
        assert_eq!(signal.symbol, "USDKRW");
        assert_eq!(signal.action, Side::Buy);
    }

    struct MockBroker {
        position: PositionSnapshot,
        balance: BalanceSnapshot,
        orderable: i64,
        price: f64,
        multiplier: i64,
        close_status: Mutex<OrderStatus>,
        placed: Mutex<Vec<NormalizedOrder>>,
    }

    #[async_trait]
    impl BrokerAdapter for MockBroker {
        async fn place_order(
            &self,
            _account: &Account,
            order: &NormalizedOrder,
        ) -> Result<String, RouterError> {
            self.placed.lock().unwrap().push(order.clone());
            Ok(format!("ord-{}", self.placed.lock().unwrap().len()))
        }

        async fn cancel_order(&self, _account: &Account, _order_id: &str) -> Result<(), RouterError> {
            Ok(())
        }

        async fn poll_status(
            &self,
            _account: &Account,
            _order_id: &str,
        ) -> Result<OrderStatus, RouterError> {
            Ok(*self.close_status.lock().unwrap())
        }

        async fn get_position(
            &self,
            _account: &Account,
            _symbol: &str,
        ) -> CachedReading<PositionSnapshot> {
            CachedReading {
                value: self.position.clone(),
                status: FetchStatus::Success,
                cache_age_secs: None,
                error: None,
            }
        }

        async fn get_balance(&self, _account: &Account) -> CachedReading<BalanceSnapshot> {
            CachedReading {
                value: self.balance.clone(),
                status: FetchStatus::Success,
                cache_age_secs: None,
                error: None,
            }
        }

        async fn get_orderable_quantity(&self, _account: &Account, _symbol: &str) -> CachedReading<i64> {
            CachedReading {
                value: self.orderable,
                status: FetchStatus::Success,
                cache_age_secs: None,
                error: None,
            }
        }

        fn translate_symbol(&self, _account: &Account, symbol: &str) -> String {
            symbol.to_string()
        }

        async fn get_current_price(&self, _account: &Account, _symbol: &str) -> Result<f64, RouterError> {
            Ok(self.price)
        }

        fn get_multiplier(&self, _base_code: &str) -> i64 {
            self.multiplier
        }
    }

    fn sample_account() -> Account {
        Account {
            id: "acc1".to_string(),
            webhook_token: "tok_a".to_string(),
            app_key: "k".to_string(),
            app_secret: "s".to_string(),
            account_number: "12345678".to_string(),
            account_product: "03".to_string(),
            account_type: Some("FUTURES".to_string()),
            is_virtual: true,
            is_active: true,
            real_account_reference: None,
            max_position_ratio: 1.0,
            max_daily_loss: 5_000_000.0,
            is_strategy_active: true,
            leverage: 1.0,
        }
    }

    #[tokio::test]
    async fn emergency_stop_short_circuits() {
        let store = Arc::new(CredentialStore::from_accounts(vec![sample_account()]));
        let broker = Arc::new(MockBroker {
            position: PositionSnapshot::flat("175W09"),
            balance: BalanceSnapshot {
                total_balance: 1_000_000.0,
                available_balance: 1_000_000.0,
                portfolio_value: 1_000_000.0,
                daily_realized_pnl: 0.0,
            },
            orderable: 10,
            price: 1380.0,
            multiplier: 10000,
            close_status: Mutex::new(OrderStatus::Filled),
            placed: Mutex::new(Vec::new()),
        });
        let emergency = Arc::new(EmergencyStop::default());
        emergency.stop();
        let executor = SignalExecutor::new(store, broker, emergency);

        let result = executor
            .execute(RawSignal {
                symbol: Some("USDKRW".to_string()),
                action: Some("BUY".to_string()),
                quantity: Some(1),
                webhook_token: Some("tok_a".to_string()),
                price: None,
            })
            .await;

        assert_eq!(result.error_type, Some(ErrorType::EmergencyStop));
    }

    #[tokio::test]
    async fn unknown_token_yields_validation_error_no_broker_call() {
        let store = Arc::new(CredentialStore::from_accounts(vec![sample_account()]));
        let placed = Arc::new(Mutex::new(Vec::new()));
        let broker = Arc::new(MockBroker {
            position: PositionSnapshot::flat("175W09"),
            balance: BalanceSnapshot::default(),
            orderable: 10,
            price: 1380.0,
            multiplier: 10000,
            close_status: Mutex::new(OrderStatus::Filled),
            placed: Mutex::new(Vec::new()),
        });
        let emergency = Arc::new(EmergencyStop::default());
        let executor = SignalExecutor::new(store, broker.clone(), emergency);

        let result = executor
            .execute(RawSignal {
                symbol: Some("USDKRW".to_string()),
                action: Some("BUY".to_string()),
                quantity: Some(1),
                webhook_token: Some("nope".to_string()),
                price: None,
            })
            .await;

        assert!(!result.success);
        assert!(broker.placed.lock().unwrap().is_empty());
        let _ = placed;
    }

    #[tokio::test]
    async fn full_close_sell_resolves_current_quantity() {
        let store = Arc::new(CredentialStore::from_accounts(vec![sample_account()]));
        let broker = Arc::new(MockBroker {
            position: PositionSnapshot {
                symbol: "175W09".to_string(),
                quantity: 3,
                avg_price: 1380.0,
                current_value: 4140.0,
                unrealized_pnl: 0.0,
            },
            balance: BalanceSnapshot {
                total_balance: 1_000_000.0,
                available_balance: 1_000_000.0,
                portfolio_value: 1_000_000.0,
                daily_realized_pnl: 0.0,
            },
            orderable: 10,
            price: 1380.0,
            multiplier: 10000,
            close_status: Mutex::new(OrderStatus::Filled),
            placed: Mutex::new(Vec::new()),
        });
        let emergency = Arc::new(EmergencyStop::default());
        let executor = SignalExecutor::new(store, broker.clone(), emergency);

        let result = executor
            .execute(RawSignal {
                symbol: Some("USDKRW".to_string()),
                action: Some("SELL".to_string()),
                quantity: Some(0),
                webhook_token: Some("tok_a".to_string()),
                price: None,
            })
            .await;

        assert!(result.success);
        let placed = broker.placed.lock().unwrap();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].quantity, 3);
        assert_eq!(result.transition, Some(Transition::Exit));
    }

    #[tokio::test]
    async fn risk_block_on_position_ratio_places_no_order() {
        let mut account = sample_account();
        account.max_position_ratio = 0.1;
        let store = Arc::new(CredentialStore::from_accounts(vec![account]));
        let broker = Arc::new(MockBroker {
            position: PositionSnapshot::flat("175W09"),
            balance: BalanceSnapshot {
                total_balance: 1_000_000.0,
                available_balance: 1_000_000.0,
                portfolio_value: 1_000_000.0,
                daily_realized_pnl: 0.0,
            },
            orderable: 10,
            price: 500_000.0,
            multiplier: 1,
            close_status: Mutex::new(OrderStatus::Filled),
            placed: Mutex::new(Vec::new()),
        });
        let emergency = Arc::new(EmergencyStop::default());
        let executor = SignalExecutor::new(store, broker.clone(), emergency);

        let result = executor
            .execute(RawSignal {
                symbol: Some("USDKRW".to_string()),
                action: Some("BUY".to_string()),
                quantity: Some(1),
                webhook_token: Some("tok_a".to_string()),
                price: None,
            })
            .await;

        assert_eq!(result.error_type, Some(ErrorType::Risk));
        assert!(broker.placed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn reverse_close_failure_blocks_entry_order() {
        let store = Arc::new(CredentialStore::from_accounts(vec![sample_account()]));
        let broker = Arc::new(MockBroker {
            position: PositionSnapshot {
                symbol: "175W09".to_string(),
                quantity: 2,
                avg_price: 1380.0,
                current_value: 2760.0,
                unrealized_pnl: 0.0,
            },
            balance: BalanceSnapshot {
                total_balance: 1_000_000.0,
                available_balance: 1_000_000.0,
                portfolio_value: 1_000_000.0,
                daily_realized_pnl: 0.0,
            },
            orderable: 10,
            price: 1380.0,
            multiplier: 10000,
            close_status: Mutex::new(OrderStatus::Rejected),
            placed: Mutex::new(Vec::new()),
        });
        let emergency = Arc::new(EmergencyStop::default());
        let executor = SignalExecutor::new(store, broker.clone(), emergency);

        let result = executor
            .execute(RawSignal {
                symbol: Some("USDKRW".to_string()),
                action: Some("SELL".to_string()),
                quantity: Some(5),
                webhook_token: Some("tok_a".to_string()),
                price: None,
            })
            .await;

        assert_eq!(result.error_type, Some(ErrorType::Broker));
        // Only the close leg was placed; the entry leg must not be.
        assert_eq!(broker.placed.lock().unwrap().len(), 1);
    }
}
