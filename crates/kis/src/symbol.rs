use chrono::{Datelike, NaiveDate, Weekday};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryRule {
    ThirdThursday,
    SecondThursday,
    MonthEnd,
}

struct FuturesCode {
    symbol: &'static str,
    base: &'static str,
    rule: ExpiryRule,
    multiplier: i64,
}

const FUTURES_TABLE: &[FuturesCode] = &[
    FuturesCode {
        symbol: "USDKRW",
        base: "175W",
        rule: ExpiryRule::ThirdThursday,
        multiplier: 10000,
    },
    FuturesCode {
        symbol: "KOSPI200",
        base: "101",
        rule: ExpiryRule::SecondThursday,
        multiplier: 250000,
    },
    FuturesCode {
        symbol: "MINIKOSPI200",
        base: "106",
        rule: ExpiryRule::SecondThursday,
        multiplier: 50000,
    },
    FuturesCode {
        symbol: "3YKTB",
        base: "102",
        rule: ExpiryRule::MonthEnd,
        multiplier: 1000000,
    },
];

/// Translates an abstract signal symbol to a dated futures code
/// (`<base><MM>`), per §4.3.7. Symbols with no table entry pass through
/// unchanged.
pub fn translate(symbol: &str, today: NaiveDate) -> String {
    match FUTURES_TABLE.iter().find(|c| c.symbol == symbol) {
        None => symbol.to_string(),
        Some(code) => {
            let month = resolve_contract_month(today, code.rule);
            format!("{}{:02}", code.base, month)
        }
    }
}

pub fn multiplier_for_base(base_code: &str) -> i64 {
    FUTURES_TABLE
        .iter()
        .find(|c| base_code.starts_with(c.base))
        .map(|c| c.multiplier)
        .unwrap_or(10_000)
}

fn resolve_contract_month(today: NaiveDate, rule: ExpiryRule) -> u32 {
    let expiry_this_month = expiry_date(today.year(), today.month(), rule);
    if today >= expiry_this_month {
        if today.month() == 12 {
            1
        } else {
            today.month() + 1
        }
    } else {
        today.month()
    }
}

fn expiry_date(year: i32, month: u32, rule: ExpiryRule) -> NaiveDate {
    match rule {
        ExpiryRule::ThirdThursday => nth_weekday(year, month, Weekday::Thu, 3),
        ExpiryRule::SecondThursday => nth_weekday(year, month, Weekday::Thu, 2),
        ExpiryRule::MonthEnd => month_end(year, month),
    }
}

fn nth_weekday(year: i32, month: u32, weekday: Weekday, n: u32) -> NaiveDate {
    let first = NaiveDate::from_ymd_opt(year, month, 1).unwrap();
    let offset = (7 + weekday.num_days_from_monday() as i64
        - first.weekday().num_days_from_monday() as i64)
        % 7;
    let first_match = first + chrono::Duration::days(offset);
    first_match + chrono::Duration::weeks((n - 1) as i64)
}

fn month_end(year: i32, month: u32) -> NaiveDate {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1).unwrap() - chrono::Duration::days(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmapped_symbol_passes_through() {
        assert_eq!(translate("AAPL", NaiveDate::from_ymd_opt(2026, 7, 1).unwrap()), "AAPL");
    }

    #[test]
    fn before_expiry_uses_current_month() {
        // third Thursday of July 2026 is 2026-07-16.
        let before = NaiveDate::from_ymd_opt(2026, 7, 10).unwrap();
        assert_eq!(translate("USDKRW", before), "175W07");
    }

    #[test]
    fn on_or_after_expiry_rolls_to_next_month() {
        let on_expiry = NaiveDate::from_ymd_opt(2026, 7, 16).unwrap();
        assert_eq!(translate("USDKRW", on_expiry), "175W08");
    }

    #[test]
    fn december_rolls_to_january() {
        let expiry = expiry_date(2026, 12, ExpiryRule::ThirdThursday);
        assert_eq!(translate("USDKRW", expiry), "175W01");
    }

    #[test]
    fn multiplier_defaults_when_unknown() {
        assert_eq!(multiplier_for_base("999"), 10_000);
        assert_eq!(multiplier_for_base("10108"), 250_000);
    }
}
