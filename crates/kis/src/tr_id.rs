use router_core::types::{AccountClass, Session, Side, TrAction};

use crate::error::KisError;

/// If the detected session is CLOSED and the caller did not force a session,
/// the effective session for TR-ID selection purposes is DAY (§4.3.2).
pub fn effective_session(detected: Session, forced: Option<Session>) -> Session {
    match forced {
        Some(s) => s,
        None if detected == Session::Closed => Session::Day,
        None => detected,
    }
}

/// Selects the TR ID for a request, applying the DAY fallback on a table
/// miss, then the virtual rewrite (first char in {T, J, C} becomes V).
pub fn select(
    class: AccountClass,
    session: Session,
    is_virtual: bool,
    action: TrAction,
    side: Option<Side>,
) -> Result<String, KisError> {
    let raw = match class {
        AccountClass::Futures => futures_tr(session, is_virtual, action)
            .or_else(|| futures_tr(Session::Day, is_virtual, action)),
        AccountClass::Stock => stock_tr(is_virtual, action),
        AccountClass::Overseas => overseas_tr(is_virtual, action, side),
    };

    raw.map(|tr| apply_virtual_rewrite(tr, is_virtual))
        .ok_or(KisError::NoTrId)
}

/// §4.2's rewrite: applies after selection, not before. A no-op when the
/// table already returned a `V`-prefixed id.
fn apply_virtual_rewrite(tr: &'static str, is_virtual: bool) -> String {
    if is_virtual && matches!(tr.chars().next(), Some('T') | Some('J') | Some('C')) {
        let mut rewritten = String::with_capacity(tr.len());
        rewritten.push('V');
        rewritten.push_str(&tr[1..]);
        rewritten
    } else {
        tr.to_string()
    }
}

fn futures_tr(session: Session, is_virtual: bool, action: TrAction) -> Option<&'static str> {
    use Session::*;
    use TrAction::*;
    Some(match (session, is_virtual, action) {
        (Day, false, Order) => "TTTO1101U",
        (Night, false, Order) => "TTTN1101U",
        (Day, true, Order) => "VTTO1101U",
        (Day, false, Cancel) => "TTTO1103U",
        (Night, false, Cancel) => "TTTN1103U",
        (Day, true, Cancel) => "VTTO1103U",
        (Day, false, Balance) => "CTFO6118R",
        (Night, false, Balance) => "CTFN6118R",
        (Day, true, Balance) => "VTFO6118R",
        (Day, false, Inquiry) => "TTTO5201R",
        (Night, false, Inquiry) => "STTN5201R",
        (Day, true, Inquiry) => "VTTO5201R",
        (Day, false, Orderable) => "TTTO5105R",
        (Night, false, Orderable) => "STTN5105R",
        (Day, true, Orderable) => "VTTO5105R",
        _ => return None,
    })
}

/// Domestic cash orders: side is carried in the request body, not the TR ID
/// (§4.3.2); session has no bearing on these, unlike FUTURES.
fn stock_tr(is_virtual: bool, action: TrAction) -> Option<&'static str> {
    use TrAction::*;
    Some(match (is_virtual, action) {
        (false, Order) => "TTTC0012U",
        (true, Order) => "VTTC0012U",
        (false, Balance) => "TTTC8434R",
        (true, Balance) => "VTTC8434R",
        (false, Orderable) => "TTTC8908R",
        (true, Orderable) => "VTTC8908R",
        (false, Inquiry) => "TTTC8001R",
        (true, Inquiry) => "VTTC8001R",
        (false, Cancel) => "TTTC0803U",
        (true, Cancel) => "VTTC0803U",
    })
}

fn overseas_tr(is_virtual: bool, action: TrAction, side: Option<Side>) -> Option<&'static str> {
    use TrAction::*;
    Some(match (is_virtual, action, side) {
        (false, Order, Some(Side::Sell)) => "TTTT1006U",
        (true, Order, Some(Side::Sell)) => "VTTT1001U",
        (false, Order, _) => "TTTT1002U",
        (true, Order, _) => "VTTT1002U",
        (false, Balance, _) => "TTTS3012R",
        (true, Balance, _) => "VTTS3012R",
        (false, Orderable, _) => "TTTS3007R",
        (true, Orderable, _) => "VTTS3007R",
        (false, Inquiry, _) => "TTTS3012R",
        (true, Inquiry, _) => "VTTS3012R",
        (false, Cancel, _) => "TTTT1004U",
        (true, Cancel, _) => "VTTT1004U",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn futures_night_virtual_order_falls_back_to_day() {
        let tr = select(
            AccountClass::Futures,
            Session::Night,
            true,
            TrAction::Order,
            None,
        )
        .unwrap();
        assert_eq!(tr, "VTTO1101U");
    }

    #[test]
    fn futures_table_is_total_on_documented_domain() {
        for session in [Session::Day, Session::Night] {
            for is_virtual in [false, true] {
                for action in [
                    TrAction::Order,
                    TrAction::Cancel,
                    TrAction::Balance,
                    TrAction::Inquiry,
                    TrAction::Orderable,
                ] {
                    let result = select(AccountClass::Futures, session, is_virtual, action, None);
                    assert!(result.is_ok(), "{session:?} {is_virtual} {action:?} must resolve");
                }
            }
        }
    }

    #[test]
    fn virtual_rewrite_only_touches_t_j_c_prefixes() {
        let tr = select(
            AccountClass::Stock,
            Session::Day,
            true,
            TrAction::Order,
            None,
        )
        .unwrap();
        assert_eq!(tr, "VTTC0012U");
    }

    #[test]
    fn overseas_sell_has_distinct_virtual_id() {
        let tr = select(
            AccountClass::Overseas,
            Session::Day,
            true,
            TrAction::Order,
            Some(Side::Sell),
        )
        .unwrap();
        assert_eq!(tr, "VTTT1001U");
    }

    #[test]
    fn effective_session_closed_without_force_is_day() {
        assert_eq!(effective_session(Session::Closed, None), Session::Day);
        assert_eq!(
            effective_session(Session::Closed, Some(Session::Night)),
            Session::Night
        );
        assert_eq!(effective_session(Session::Day, None), Session::Day);
    }
}
