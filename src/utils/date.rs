//! UTC 日界线工具，配额窗口和 IP 计数都按 UTC 自然日切换

use chrono::{DateTime, Duration, NaiveTime, Utc};

/// 当天 00:00:00 UTC
pub fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}

/// 次日 00:00:00 UTC
pub fn start_of_next_day(now: DateTime<Utc>) -> DateTime<Utc> {
    start_of_day(now) + Duration::days(1)
}
