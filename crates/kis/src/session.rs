use chrono::{DateTime, Datelike, NaiveTime, Timelike, Utc, Weekday};
use router_core::types::Session;

/// Pure function of wallclock time, KST, per the session-detection rules
/// (§4.3.1). Callers pass an already-KST `DateTime` — conversion from UTC is
/// the caller's concern (the broker adapter does it once at the entry point).
pub fn detect(now: DateTime<Utc>) -> Session {
    if matches!(now.weekday(), Weekday::Sat | Weekday::Sun) {
        return Session::Closed;
    }

    let t = now.time();
    let day_start = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
    let day_end = NaiveTime::from_hms_opt(15, 30, 0).unwrap();
    let night_start = NaiveTime::from_hms_opt(18, 0, 0).unwrap();
    let night_end = NaiveTime::from_hms_opt(6, 0, 0).unwrap();

    if t >= day_start && t <= day_end {
        return Session::Day;
    }
    if t >= night_start || t <= night_end {
        return Session::Night;
    }
    Session::Closed
}

pub fn hour_minute_second(now: DateTime<Utc>) -> (u32, u32, u32) {
    (now.hour(), now.minute(), now.second())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn kst(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .unwrap()
    }

    #[test]
    fn weekend_is_closed() {
        // 2026-08-01 is a Saturday.
        let t = kst(2026, 8, 1, 10, 0, 0);
        assert_eq!(detect(t), Session::Closed);
    }

    #[test]
    fn day_boundary_exact_is_day_one_second_later_is_closed() {
        // 2026-07-27 is a Monday.
        let at_boundary = kst(2026, 7, 27, 15, 30, 0);
        assert_eq!(detect(at_boundary), Session::Day);
        let past_boundary = kst(2026, 7, 27, 15, 30, 1);
        assert_eq!(detect(past_boundary), Session::Closed);
    }

    #[test]
    fn night_boundaries() {
        let evening = kst(2026, 7, 27, 18, 0, 0);
        assert_eq!(detect(evening), Session::Night);
        let dawn_boundary = kst(2026, 7, 27, 6, 0, 0);
        assert_eq!(detect(dawn_boundary), Session::Night);
        let just_past_dawn = kst(2026, 7, 27, 6, 0, 1);
        assert_eq!(detect(just_past_dawn), Session::Closed);
    }

    #[test]
    fn morning_before_day_open_is_closed() {
        let t = kst(2026, 7, 27, 8, 0, 0);
        assert_eq!(detect(t), Session::Closed);
    }
}
