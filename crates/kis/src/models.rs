use serde::{Deserialize, Serialize};

use crate::error::KisError;
use router_core::types::{AccountClass, OrderStatus};

fn parse_f64(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok()
}

fn parse_i64(raw: &str) -> Option<i64> {
    raw.trim().parse::<i64>().ok()
}

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(rename = "access_token_token_expired")]
    pub expires_at: String,
}

/// The `rt_cd`/`msg_cd`/`msg1` envelope every broker response carries
/// (§4.3.4). Embedded by value rather than `#[serde(flatten)]` so each
/// response struct can name its own `output` shape.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    pub rt_cd: String,
    pub msg_cd: String,
    pub msg1: String,
}

impl Envelope {
    pub fn ensure_success(&self) -> Result<(), KisError> {
        if self.rt_cd != "0" {
            return Err(KisError::Api {
                rt_cd: self.rt_cd.clone(),
                msg_cd: self.msg_cd.clone(),
                msg: self.msg1.clone(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct OrderOutput {
    #[serde(rename = "KRX_FWDG_ORD_ORGNO")]
    pub krx_fwdg_ord_orgno: String,
    #[serde(rename = "ODNO")]
    pub odno: String,
}

#[derive(Debug, Deserialize)]
pub struct OrderResponse {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub output: Option<OrderOutput>,
}

impl OrderResponse {
    /// STOCK cash orders compose `"<org>-<odno>"`; futures and overseas
    /// orders carry the bare `ODNO`, with no org-number prefix.
    pub fn order_id(&self, class: AccountClass) -> Result<String, KisError> {
        self.envelope.ensure_success()?;
        let output = self
            .output
            .as_ref()
            .ok_or_else(|| KisError::EmptyResponse("order response missing output".to_string()))?;
        Ok(match class {
            AccountClass::Stock => format!("{}-{}", output.krx_fwdg_ord_orgno, output.odno),
            AccountClass::Futures | AccountClass::Overseas => output.odno.clone(),
        })
    }
}

/// One order-status record, field names as KIS's `output1[]` shape uses them.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusRecordV1 {
    #[serde(rename = "odno")]
    pub odno: String,
    #[serde(rename = "ord_qty")]
    pub order_qty: String,
    #[serde(rename = "tot_ccld_qty")]
    pub total_filled_qty: String,
    #[serde(rename = "rjct_qty", default)]
    pub rejected_qty: String,
    #[serde(rename = "cncl_yn", default)]
    pub cancel_flag: String,
    #[serde(rename = "cncl_cfrm_qty", default)]
    pub cancel_confirmed_qty: String,
}

/// The alternate `output[]` shape per §9's field-shape ambiguity note.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusRecordV2 {
    #[serde(rename = "odno")]
    pub odno: String,
    #[serde(rename = "ord_qty")]
    pub order_qty: String,
    #[serde(rename = "ccld_qty")]
    pub total_filled_qty: String,
    #[serde(rename = "rjct_qty", default)]
    pub rejected_qty: String,
    #[serde(rename = "cncl_yn", default)]
    pub cancel_flag: String,
    #[serde(rename = "cncl_cfrm_qty", default)]
    pub cancel_confirmed_qty: String,
}

#[derive(Debug, Deserialize)]
pub struct StatusQueryResponse {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(default)]
    pub output1: Vec<StatusRecordV1>,
    #[serde(default)]
    pub output: Vec<StatusRecordV2>,
}

struct NumericStatus {
    order_qty: Option<i64>,
    total_filled_qty: Option<i64>,
    rejected_qty: Option<i64>,
    cancel_flag: String,
    cancel_confirmed_qty: Option<i64>,
}

impl From<&StatusRecordV1> for NumericStatus {
    fn from(r: &StatusRecordV1) -> Self {
        Self {
            order_qty: parse_i64(&r.order_qty),
            total_filled_qty: parse_i64(&r.total_filled_qty),
            rejected_qty: parse_i64(&r.rejected_qty),
            cancel_flag: r.cancel_flag.clone(),
            cancel_confirmed_qty: parse_i64(&r.cancel_confirmed_qty),
        }
    }
}

impl From<&StatusRecordV2> for NumericStatus {
    fn from(r: &StatusRecordV2) -> Self {
        Self {
            order_qty: parse_i64(&r.order_qty),
            total_filled_qty: parse_i64(&r.total_filled_qty),
            rejected_qty: parse_i64(&r.rejected_qty),
            cancel_flag: r.cancel_flag.clone(),
            cancel_confirmed_qty: parse_i64(&r.cancel_confirmed_qty),
        }
    }
}

impl StatusQueryResponse {
    /// Tries both response shapes, preferring whichever produces a
    /// numerically matching order id for `order_id`. Compared numerically,
    /// not lexically: placement and status records pad `odno` with leading
    /// zeros inconsistently (`"0000123"` vs. `"123"`).
    pub fn status_for(&self, order_id: &str) -> OrderStatus {
        let Some(target) = parse_i64(order_id) else {
            return OrderStatus::NotFound;
        };
        if let Some(record) = self.output1.iter().find(|r| parse_i64(&r.odno) == Some(target)) {
            return canonicalize(&NumericStatus::from(record));
        }
        if let Some(record) = self.output.iter().find(|r| parse_i64(&r.odno) == Some(target)) {
            return canonicalize(&NumericStatus::from(record));
        }
        OrderStatus::NotFound
    }
}

fn canonicalize(status: &NumericStatus) -> OrderStatus {
    let (order_qty, total_filled_qty) = match (status.order_qty, status.total_filled_qty) {
        (Some(o), Some(t)) => (o, t),
        _ => return OrderStatus::Unknown,
    };

    if status.cancel_flag == "Y" || status.cancel_confirmed_qty.unwrap_or(0) > 0 {
        return OrderStatus::Cancelled;
    }
    if status.rejected_qty.unwrap_or(0) > 0 {
        return OrderStatus::Rejected;
    }
    if total_filled_qty == 0 {
        return OrderStatus::Pending;
    }
    if total_filled_qty < order_qty {
        return OrderStatus::PartialFilled;
    }
    OrderStatus::Filled
}

#[derive(Debug, Serialize)]
pub struct FuturesOrderRequest {
    #[serde(rename = "CANO")]
    pub cano: String,
    #[serde(rename = "ACNT_PRDT_CD")]
    pub acnt_prdt_cd: String,
    #[serde(rename = "SHTN_PDNO")]
    pub shtn_pdno: String,
    #[serde(rename = "SLL_BUY_DVSN_CD")]
    pub sll_buy_dvsn_cd: String,
    #[serde(rename = "ORD_DVSN_CD")]
    pub ord_dvsn_cd: String,
    #[serde(rename = "ORD_QTY")]
    pub ord_qty: String,
    #[serde(rename = "UNIT_PRICE")]
    pub unit_price: String,
}

#[derive(Debug, Serialize)]
pub struct StockOrderRequest {
    #[serde(rename = "CANO")]
    pub cano: String,
    #[serde(rename = "ACNT_PRDT_CD")]
    pub acnt_prdt_cd: String,
    #[serde(rename = "PDNO")]
    pub pdno: String,
    #[serde(rename = "ORD_DVSN")]
    pub ord_dvsn: String,
    #[serde(rename = "ORD_QTY")]
    pub ord_qty: String,
    #[serde(rename = "ORD_UNPR")]
    pub ord_unpr: String,
}

#[derive(Debug, Serialize)]
pub struct OverseasOrderRequest {
    #[serde(rename = "CANO")]
    pub cano: String,
    #[serde(rename = "ACNT_PRDT_CD")]
    pub acnt_prdt_cd: String,
    #[serde(rename = "OVRS_EXCG_CD")]
    pub ovrs_excg_cd: String,
    #[serde(rename = "PDNO")]
    pub pdno: String,
    #[serde(rename = "ORD_QTY")]
    pub ord_qty: String,
    #[serde(rename = "OVRS_ORD_UNPR")]
    pub ovrs_ord_unpr: String,
    #[serde(rename = "ORD_DVSN")]
    pub ord_dvsn: String,
}

#[derive(Debug, Deserialize)]
pub struct StockPositionRecord {
    #[serde(rename = "pdno")]
    pub symbol: String,
    #[serde(rename = "hldg_qty")]
    pub quantity: String,
    #[serde(rename = "pchs_avg_pric")]
    pub avg_price: String,
    #[serde(rename = "evlu_amt")]
    pub current_value: String,
    #[serde(rename = "evlu_pfls_amt")]
    pub unrealized_pnl: String,
}

#[derive(Debug, Deserialize)]
pub struct StockBalanceSummary {
    #[serde(rename = "dnca_tot_amt")]
    pub cash_balance: String,
    #[serde(rename = "tot_evlu_amt")]
    pub portfolio_value: String,
    #[serde(rename = "evlu_pfls_smtl_amt")]
    pub unrealized_pnl: String,
    #[serde(rename = "rlzt_pfls_amt", default)]
    pub realized_pnl: String,
}

#[derive(Debug, Deserialize)]
pub struct StockBalanceResponse {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(default)]
    pub output1: Vec<StockPositionRecord>,
    #[serde(default)]
    pub output2: Vec<StockBalanceSummary>,
}

#[derive(Debug, Deserialize)]
pub struct FuturesPositionRecord {
    #[serde(rename = "shtn_pdno")]
    pub symbol: String,
    #[serde(rename = "cblc_qty")]
    pub quantity: String,
    #[serde(rename = "pchs_avg_pric")]
    pub avg_price: String,
    #[serde(rename = "evlu_amt")]
    pub current_value: String,
    #[serde(rename = "evlu_pfls_amt")]
    pub unrealized_pnl: String,
}

#[derive(Debug, Deserialize)]
pub struct FuturesBalanceSummary {
    #[serde(rename = "dnca_tot_amt")]
    pub cash_balance: String,
    #[serde(rename = "tot_evlu_amt")]
    pub portfolio_value: String,
    #[serde(rename = "evlu_pfls_smtl_amt")]
    pub unrealized_pnl: String,
    #[serde(rename = "thdt_rlzt_pfls", default)]
    pub realized_pnl: String,
}

#[derive(Debug, Deserialize)]
pub struct FuturesBalanceResponse {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(default)]
    pub output1: Vec<FuturesPositionRecord>,
    #[serde(default)]
    pub output2: Vec<FuturesBalanceSummary>,
}

#[derive(Debug, Deserialize)]
pub struct OverseasPositionRecord {
    #[serde(rename = "ovrs_pdno")]
    pub symbol: String,
    #[serde(rename = "ovrs_cblc_qty")]
    pub quantity: String,
    #[serde(rename = "pchs_avg_pric")]
    pub avg_price: String,
    #[serde(rename = "ovrs_stck_evlu_amt")]
    pub current_value: String,
    #[serde(rename = "frcr_evlu_pfls_amt")]
    pub unrealized_pnl: String,
}

#[derive(Debug, Deserialize)]
pub struct OverseasBalanceSummary {
    #[serde(rename = "tot_dncl_amt")]
    pub cash_balance: String,
    #[serde(rename = "tot_evlu_amt")]
    pub portfolio_value: String,
    #[serde(rename = "evlu_pfls_smtl_amt")]
    pub unrealized_pnl: String,
    #[serde(rename = "rlzt_pfls_amt", default)]
    pub realized_pnl: String,
}

#[derive(Debug, Deserialize)]
pub struct OverseasBalanceResponse {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(default)]
    pub output1: Vec<OverseasPositionRecord>,
    #[serde(default)]
    pub output2: Vec<OverseasBalanceSummary>,
}

#[derive(Debug, Deserialize)]
pub struct OrderableOutput {
    #[serde(rename = "nrml_prcs_psbl_qty", alias = "ord_psbl_qty")]
    pub orderable_qty: String,
}

#[derive(Debug, Deserialize)]
pub struct OrderableResponse {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub output: Option<OrderableOutput>,
}

#[derive(Debug, Deserialize)]
pub struct PriceOutput {
    #[serde(rename = "futs_prpr", alias = "stck_prpr")]
    pub price: String,
}

#[derive(Debug, Deserialize)]
pub struct PriceResponse {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub output: Option<PriceOutput>,
}

pub fn parse_money(raw: &str) -> f64 {
    parse_f64(raw).unwrap_or(0.0)
}

pub fn parse_qty(raw: &str) -> i64 {
    parse_i64(raw).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(order_qty: &str, filled: &str, rejected: &str, cancel_flag: &str, cancel_qty: &str) -> NumericStatus {
        NumericStatus {
            order_qty: parse_i64(order_qty),
            total_filled_qty: parse_i64(filled),
            rejected_qty: parse_i64(rejected),
            cancel_flag: cancel_flag.to_string(),
            cancel_confirmed_qty: parse_i64(cancel_qty),
        }
    }

    #[test]
    fn pending_when_nothing_filled() {
        assert_eq!(canonicalize(&record("10", "0", "0", "N", "0")), OrderStatus::Pending);
    }

    #[test]
    fn partial_then_filled() {
        assert_eq!(
            canonicalize(&record("10", "4", "0", "N", "0")),
            OrderStatus::PartialFilled
        );
        assert_eq!(canonicalize(&record("10", "10", "0", "N", "0")), OrderStatus::Filled);
    }

    #[test]
    fn rejected_and_cancelled_take_priority() {
        assert_eq!(canonicalize(&record("10", "0", "3", "N", "0")), OrderStatus::Rejected);
        assert_eq!(canonicalize(&record("10", "0", "0", "Y", "0")), OrderStatus::Cancelled);
        assert_eq!(canonicalize(&record("10", "0", "0", "N", "5")), OrderStatus::Cancelled);
    }

    #[test]
    fn unparsable_quantity_is_unknown() {
        assert_eq!(canonicalize(&record("", "4", "0", "N", "0")), OrderStatus::Unknown);
    }

    #[test]
    fn status_lookup_matches_across_leading_zero_padding() {
        let response = StatusQueryResponse {
            envelope: Envelope {
                rt_cd: "0".to_string(),
                msg_cd: "OK".to_string(),
                msg1: "".to_string(),
            },
            output1: vec![StatusRecordV1 {
                odno: "123".to_string(),
                order_qty: "10".to_string(),
                total_filled_qty: "10".to_string(),
                rejected_qty: String::new(),
                cancel_flag: String::new(),
                cancel_confirmed_qty: String::new(),
            }],
            output: Vec::new(),
        };

        assert_eq!(response.status_for("0000123"), OrderStatus::Filled);
    }
}
