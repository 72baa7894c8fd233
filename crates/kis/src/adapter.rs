use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use router_core::broker::BrokerAdapter;
use router_core::credentials::Account;
use router_core::error::RouterError;
use router_core::types::{
    AccountClass, BalanceSnapshot, CachedReading, FetchStatus, NormalizedOrder, OrderStatus,
    PositionSnapshot, Session, Side, TrAction,
};

use crate::cache::TtlCache;
use crate::client::{KisRestClient, ProxyOptions};
use crate::error::KisError;
use crate::models::{
    self, FuturesOrderRequest, OrderResponse, OrderableResponse, OverseasOrderRequest,
    PriceResponse, StatusQueryResponse, StockOrderRequest,
};
use crate::session;
use crate::symbol;
use crate::token::TokenManager;
use crate::tr_id;

const POSITION_TTL: Duration = Duration::from_secs(30);
const BALANCE_TTL: Duration = Duration::from_secs(30);
const ORDERABLE_TTL: Duration = Duration::from_secs(10);

/// Ties session detection, TR-ID selection, per-class request shaping, and
/// response caching together behind the `BrokerAdapter` seam (§4.3).
pub struct KisBrokerAdapter {
    client: KisRestClient,
    tokens: TokenManager,
    positions: TtlCache<PositionSnapshot>,
    balances: TtlCache<BalanceSnapshot>,
    orderable: TtlCache<i64>,
    /// Overrides session detection for deterministic tests; production code
    /// leaves this `None` and lets `session::detect` read the wallclock.
    forced_session: Option<Session>,
}

impl KisBrokerAdapter {
    pub fn new(proxy: ProxyOptions) -> Result<Self, KisError> {
        Ok(Self {
            client: KisRestClient::new_with_proxy(proxy)?,
            tokens: TokenManager::new(reqwest::Client::new()),
            positions: TtlCache::new(POSITION_TTL),
            balances: TtlCache::new(BALANCE_TTL),
            orderable: TtlCache::new(ORDERABLE_TTL),
            forced_session: None,
        })
    }

    pub fn with_forced_session(mut self, session: Session) -> Self {
        self.forced_session = Some(session);
        self
    }

    fn base_url(&self, account: &Account) -> &'static str {
        KisRestClient::base_url(account.is_virtual)
    }

    fn effective_session(&self) -> Session {
        let detected = session::detect(Utc::now());
        tr_id::effective_session(detected, self.forced_session)
    }

    async fn token_for(&self, account: &Account) -> Result<String, RouterError> {
        self.tokens
            .get_token(
                self.base_url(account),
                &account.id,
                &account.app_key,
                &account.app_secret,
            )
            .await
            .map_err(|e| RouterError::Broker(e.to_string()))
    }

    fn tr(&self, account: &Account, action: TrAction, side: Option<Side>) -> Result<String, RouterError> {
        tr_id::select(
            account.account_class(),
            self.effective_session(),
            account.is_virtual,
            action,
            side,
        )
        .map_err(|e| RouterError::Broker(e.to_string()))
    }

    async fn fetch_futures_balance(
        &self,
        account: &Account,
    ) -> Result<models::FuturesBalanceResponse, KisError> {
        let token = self
            .tokens
            .get_token(
                self.base_url(account),
                &account.id,
                &account.app_key,
                &account.app_secret,
            )
            .await?;
        let tr = tr_id::select(
            AccountClass::Futures,
            self.effective_session(),
            account.is_virtual,
            TrAction::Balance,
            None,
        )?;
        let query = [
            ("CANO", account.account_number.as_str()),
            ("ACNT_PRDT_CD", account.account_product.as_str()),
        ];
        let value = self
            .client
            .get(
                self.base_url(account),
                "/uapi/domestic-futureoption/v1/trading/inquire-balance",
                &query,
                &token,
                &account.app_key,
                &account.app_secret,
                &tr,
            )
            .await?;
        let parsed: models::FuturesBalanceResponse = serde_json::from_value(value)?;
        parsed.envelope.ensure_success()?;
        Ok(parsed)
    }

    async fn fetch_stock_balance(
        &self,
        account: &Account,
    ) -> Result<models::StockBalanceResponse, KisError> {
        let token = self
            .tokens
            .get_token(
                self.base_url(account),
                &account.id,
                &account.app_key,
                &account.app_secret,
            )
            .await?;
        let tr = tr_id::select(
            AccountClass::Stock,
            self.effective_session(),
            account.is_virtual,
            TrAction::Balance,
            None,
        )?;
        let query = [
            ("CANO", account.account_number.as_str()),
            ("ACNT_PRDT_CD", account.account_product.as_str()),
        ];
        let value = self
            .client
            .get(
                self.base_url(account),
                "/uapi/domestic-stock/v1/trading/inquire-balance",
                &query,
                &token,
                &account.app_key,
                &account.app_secret,
                &tr,
            )
            .await?;
        let parsed: models::StockBalanceResponse = serde_json::from_value(value)?;
        parsed.envelope.ensure_success()?;
        Ok(parsed)
    }

    async fn fetch_overseas_balance(
        &self,
        account: &Account,
    ) -> Result<models::OverseasBalanceResponse, KisError> {
        let token = self
            .tokens
            .get_token(
                self.base_url(account),
                &account.id,
                &account.app_key,
                &account.app_secret,
            )
            .await?;
        let tr = tr_id::select(
            AccountClass::Overseas,
            self.effective_session(),
            account.is_virtual,
            TrAction::Balance,
            None,
        )?;
        let query = [
            ("CANO", account.account_number.as_str()),
            ("ACNT_PRDT_CD", account.account_product.as_str()),
        ];
        let value = self
            .client
            .get(
                self.base_url(account),
                "/uapi/overseas-stock/v1/trading/inquire-balance",
                &query,
                &token,
                &account.app_key,
                &account.app_secret,
                &tr,
            )
            .await?;
        let parsed: models::OverseasBalanceResponse = serde_json::from_value(value)?;
        parsed.envelope.ensure_success()?;
        Ok(parsed)
    }

    fn overseas_exchange_code(symbol: &str) -> &'static str {
        if symbol.contains('.') || symbol.contains('-') {
            "NYSE"
        } else if (4..=5).contains(&symbol.len()) {
            "NASD"
        } else if (1..=3).contains(&symbol.len()) {
            "NYSE"
        } else {
            "NASD"
        }
    }
}

#[async_trait]
impl BrokerAdapter for KisBrokerAdapter {
    async fn place_order(
        &self,
        account: &Account,
        order: &NormalizedOrder,
    ) -> Result<String, RouterError> {
        let token = self.token_for(account).await?;
        let tr = self.tr(account, TrAction::Order, Some(order.side))?;
        let base = self.base_url(account);

        let value = match account.account_class() {
            AccountClass::Futures => {
                let body = FuturesOrderRequest {
                    cano: account.account_number.clone(),
                    acnt_prdt_cd: account.account_product.clone(),
                    shtn_pdno: order.symbol.clone(),
                    sll_buy_dvsn_cd: if order.side == Side::Buy { "02" } else { "01" }.to_string(),
                    ord_dvsn_cd: if order.price.is_some() { "01" } else { "02" }.to_string(),
                    ord_qty: order.quantity.to_string(),
                    unit_price: order.price.map(|p| p.to_string()).unwrap_or_default(),
                };
                self.client
                    .post(
                        base,
                        "/uapi/domestic-futureoption/v1/trading/order",
                        &body,
                        &token,
                        &account.app_key,
                        &account.app_secret,
                        &tr,
                    )
                    .await
            }
            AccountClass::Stock => {
                let body = StockOrderRequest {
                    cano: account.account_number.clone(),
                    acnt_prdt_cd: account.account_product.clone(),
                    pdno: order.symbol.clone(),
                    ord_dvsn: if order.price.is_some() { "00" } else { "01" }.to_string(),
                    ord_qty: order.quantity.to_string(),
                    ord_unpr: order.price.map(|p| p.to_string()).unwrap_or_else(|| "0".to_string()),
                };
                self.client
                    .post(
                        base,
                        "/uapi/domestic-stock/v1/trading/order-cash",
                        &body,
                        &token,
                        &account.app_key,
                        &account.app_secret,
                        &tr,
                    )
                    .await
            }
            AccountClass::Overseas => {
                let body = OverseasOrderRequest {
                    cano: account.account_number.clone(),
                    acnt_prdt_cd: account.account_product.clone(),
                    ovrs_excg_cd: Self::overseas_exchange_code(&order.symbol).to_string(),
                    pdno: order.symbol.clone(),
                    ord_qty: order.quantity.to_string(),
                    ovrs_ord_unpr: order.price.map(|p| p.to_string()).unwrap_or_else(|| "0".to_string()),
                    ord_dvsn: "00".to_string(),
                };
                self.client
                    .post(
                        base,
                        "/uapi/overseas-stock/v1/trading/order",
                        &body,
                        &token,
                        &account.app_key,
                        &account.app_secret,
                        &tr,
                    )
                    .await
            }
        }
        .map_err(|e| RouterError::Broker(e.to_string()))?;

        let response: OrderResponse =
            serde_json::from_value(value).map_err(|e| RouterError::Broker(e.to_string()))?;
        response
            .order_id(account.account_class())
            .map_err(|e| RouterError::Broker(e.to_string()))
    }

    async fn cancel_order(&self, account: &Account, order_id: &str) -> Result<(), RouterError> {
        let token = self.token_for(account).await?;
        let tr = self.tr(account, TrAction::Cancel, None)?;
        let (org_no, odno) = order_id.split_once('-').unwrap_or(("", order_id));
        let path = match account.account_class() {
            AccountClass::Futures | AccountClass::Stock => {
                "/uapi/domestic-stock/v1/trading/order-rvsecncl"
            }
            AccountClass::Overseas => "/uapi/overseas-stock/v1/trading/order-rvsecncl",
        };
        let body = serde_json::json!({
            "CANO": account.account_number,
            "ACNT_PRDT_CD": account.account_product,
            "KRX_FWDG_ORD_ORGNO": org_no,
            "ORGN_ODNO": odno,
            "RVSE_CNCL_DVSN_CD": "02",
        });
        self.client
            .post(
                self.base_url(account),
                path,
                &body,
                &token,
                &account.app_key,
                &account.app_secret,
                &tr,
            )
            .await
            .map_err(|e| RouterError::Broker(e.to_string()))?;
        Ok(())
    }

    async fn poll_status(&self, account: &Account, order_id: &str) -> Result<OrderStatus, RouterError> {
        let token = self.token_for(account).await?;
        let tr = self.tr(account, TrAction::Inquiry, None)?;
        let (_, odno) = order_id.split_once('-').unwrap_or(("", order_id));

        let (path, night_path) = match account.account_class() {
            AccountClass::Futures => (
                "/uapi/domestic-futureoption/v1/trading/inquire-ccnl",
                "/uapi/domestic-futureoption/v1/trading/inquire-ngt-ccnl",
            ),
            AccountClass::Stock => (
                "/uapi/domestic-stock/v1/trading/inquire-daily-ccld",
                "/uapi/domestic-stock/v1/trading/inquire-daily-ccld",
            ),
            AccountClass::Overseas => (
                "/uapi/overseas-stock/v1/trading/inquire-ccnl",
                "/uapi/overseas-stock/v1/trading/inquire-ccnl",
            ),
        };
        let path = if self.effective_session() == Session::Night {
            night_path
        } else {
            path
        };

        let query = [
            ("CANO", account.account_number.as_str()),
            ("ACNT_PRDT_CD", account.account_product.as_str()),
        ];
        let value = self
            .client
            .get(
                self.base_url(account),
                path,
                &query,
                &token,
                &account.app_key,
                &account.app_secret,
                &tr,
            )
            .await
            .map_err(|e| RouterError::Broker(e.to_string()))?;

        let parsed: StatusQueryResponse =
            serde_json::from_value(value).map_err(|e| RouterError::Broker(e.to_string()))?;
        parsed
            .envelope
            .ensure_success()
            .map_err(|e| RouterError::Broker(e.to_string()))?;
        Ok(parsed.status_for(odno))
    }

    async fn get_position(&self, account: &Account, symbol: &str) -> CachedReading<PositionSnapshot> {
        let key = format!("{}:position:{}", account.id, symbol);
        let symbol_owned = symbol.to_string();
        self.positions
            .read_through(
                &key,
                move || async move {
                    match account.account_class() {
                        AccountClass::Futures => {
                            let resp = self.fetch_futures_balance(account).await?;
                            let record = resp.output1.iter().find(|r| r.symbol == symbol_owned);
                            Ok(match record {
                                Some(r) => PositionSnapshot {
                                    symbol: r.symbol.clone(),
                                    quantity: models::parse_qty(&r.quantity),
                                    avg_price: models::parse_money(&r.avg_price),
                                    current_value: models::parse_money(&r.current_value),
                                    unrealized_pnl: models::parse_money(&r.unrealized_pnl),
                                },
                                None => PositionSnapshot::flat(symbol_owned.clone()),
                            })
                        }
                        AccountClass::Stock => {
                            let resp = self.fetch_stock_balance(account).await?;
                            let record = resp.output1.iter().find(|r| r.symbol == symbol_owned);
                            Ok(match record {
                                Some(r) => PositionSnapshot {
                                    symbol: r.symbol.clone(),
                                    quantity: models::parse_qty(&r.quantity),
                                    avg_price: models::parse_money(&r.avg_price),
                                    current_value: models::parse_money(&r.current_value),
                                    unrealized_pnl: models::parse_money(&r.unrealized_pnl),
                                },
                                None => PositionSnapshot::flat(symbol_owned.clone()),
                            })
                        }
                        AccountClass::Overseas => {
                            let resp = self.fetch_overseas_balance(account).await?;
                            let record = resp.output1.iter().find(|r| r.symbol == symbol_owned);
                            Ok(match record {
                                Some(r) => PositionSnapshot {
                                    symbol: r.symbol.clone(),
                                    quantity: models::parse_qty(&r.quantity),
                                    avg_price: models::parse_money(&r.avg_price),
                                    current_value: models::parse_money(&r.current_value),
                                    unrealized_pnl: models::parse_money(&r.unrealized_pnl),
                                },
                                None => PositionSnapshot::flat(symbol_owned.clone()),
                            })
                        }
                    }
                },
                || PositionSnapshot::flat(symbol),
            )
            .await
    }

    async fn get_balance(&self, account: &Account) -> CachedReading<BalanceSnapshot> {
        let key = format!("{}:balance", account.id);
        self.balances
            .read_through(
                &key,
                move || async move {
                    match account.account_class() {
                        AccountClass::Futures => {
                            let resp = self.fetch_futures_balance(account).await?;
                            let summary = resp.output2.first();
                            Ok(summary
                                .map(|s| BalanceSnapshot {
                                    total_balance: models::parse_money(&s.cash_balance),
                                    available_balance: models::parse_money(&s.cash_balance),
                                    portfolio_value: models::parse_money(&s.portfolio_value),
                                    daily_realized_pnl: models::parse_money(&s.realized_pnl),
                                })
                                .unwrap_or_default())
                        }
                        AccountClass::Stock => {
                            let resp = self.fetch_stock_balance(account).await?;
                            let summary = resp.output2.first();
                            Ok(summary
                                .map(|s| BalanceSnapshot {
                                    total_balance: models::parse_money(&s.cash_balance),
                                    available_balance: models::parse_money(&s.cash_balance),
                                    portfolio_value: models::parse_money(&s.portfolio_value),
                                    daily_realized_pnl: models::parse_money(&s.realized_pnl),
                                })
                                .unwrap_or_default())
                        }
                        AccountClass::Overseas => {
                            let resp = self.fetch_overseas_balance(account).await?;
                            let summary = resp.output2.first();
                            Ok(summary
                                .map(|s| BalanceSnapshot {
                                    total_balance: models::parse_money(&s.cash_balance),
                                    available_balance: models::parse_money(&s.cash_balance),
                                    portfolio_value: models::parse_money(&s.portfolio_value),
                                    daily_realized_pnl: models::parse_money(&s.realized_pnl),
                                })
                                .unwrap_or_default())
                        }
                    }
                },
                BalanceSnapshot::default,
            )
            .await
    }

    async fn get_orderable_quantity(&self, account: &Account, symbol: &str) -> CachedReading<i64> {
        let key = format!("{}:orderable:{}", account.id, symbol);
        let symbol_owned = symbol.to_string();
        let reading = self
            .orderable
            .read_through(
                &key,
                move || async move {
                    let token = self
                        .tokens
                        .get_token(
                            self.base_url(account),
                            &account.id,
                            &account.app_key,
                            &account.app_secret,
                        )
                        .await?;
                    let tr = tr_id::select(
                        account.account_class(),
                        self.effective_session(),
                        account.is_virtual,
                        TrAction::Orderable,
                        None,
                    )?;
                    let path = match account.account_class() {
                        AccountClass::Futures => {
                            "/uapi/domestic-futureoption/v1/trading/inquire-psbl-order"
                        }
                        AccountClass::Stock => "/uapi/domestic-stock/v1/trading/inquire-psbl-order",
                        AccountClass::Overseas => "/uapi/overseas-stock/v1/trading/inquire-nccs",
                    };
                    let query = [
                        ("CANO", account.account_number.as_str()),
                        ("ACNT_PRDT_CD", account.account_product.as_str()),
                        ("PDNO", symbol_owned.as_str()),
                    ];
                    let value = self
                        .client
                        .get(
                            self.base_url(account),
                            path,
                            &query,
                            &token,
                            &account.app_key,
                            &account.app_secret,
                            &tr,
                        )
                        .await?;
                    let parsed: OrderableResponse = serde_json::from_value(value)?;
                    parsed.envelope.ensure_success()?;
                    Ok(parsed
                        .output
                        .map(|o| models::parse_qty(&o.orderable_qty))
                        .unwrap_or(0))
                },
                || 0,
            )
            .await;

        // Orderable amount governs order sizing, unlike balance/position: a
        // stale or fallback value here can size a full-trade order wrong, so
        // any non-success read zeroes out as `error_safe` rather than serving
        // a cached or fallback quantity.
        if reading.status == FetchStatus::Success {
            reading
        } else {
            CachedReading {
                value: 0,
                status: FetchStatus::ErrorSafe,
                cache_age_secs: None,
                error: reading.error,
            }
        }
    }

    fn translate_symbol(&self, account: &Account, symbol: &str) -> String {
        if account.account_class() == AccountClass::Futures {
            symbol::translate(symbol, Utc::now().date_naive())
        } else {
            symbol.to_string()
        }
    }

    async fn get_current_price(&self, account: &Account, symbol: &str) -> Result<f64, RouterError> {
        match account.account_class() {
            AccountClass::Futures => {
                let token = self.token_for(account).await?;
                let tr = self.tr(account, TrAction::Inquiry, None)?;
                let query = [("FID_COND_MRKT_DIV_CODE", "F"), ("FID_INPUT_ISCD", symbol)];
                let value = self
                    .client
                    .get(
                        self.base_url(account),
                        "/uapi/domestic-futureoption/v1/quotations/inquire-price",
                        &query,
                        &token,
                        &account.app_key,
                        &account.app_secret,
                        &tr,
                    )
                    .await
                    .map_err(|e| RouterError::Broker(e.to_string()))?;
                let parsed: PriceResponse =
                    serde_json::from_value(value).map_err(|e| RouterError::Broker(e.to_string()))?;
                parsed
                    .envelope
                    .ensure_success()
                    .map_err(|e| RouterError::Broker(e.to_string()))?;
                Ok(parsed.output.map(|o| models::parse_money(&o.price)).unwrap_or(0.0))
            }
            _ => {
                let position = self.get_position(account, symbol).await;
                if position.value.quantity != 0 {
                    Ok(position.value.avg_price)
                } else {
                    Ok(0.0)
                }
            }
        }
    }

    fn get_multiplier(&self, base_code: &str) -> i64 {
        symbol::multiplier_for_base(base_code)
    }
}
