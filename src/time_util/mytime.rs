use chrono::{DateTime, Local, TimeZone, Timelike, Utc};

pub trait TimeProvider: Send + Sync {
    fn get_utc_time(&self) -> DateTime<Utc>;

    fn get_local_time(&self) -> DateTime<Local>;
}

#[derive(Default, Clone)]
pub struct RealTimeProvider {}

impl TimeProvider for RealTimeProvider {
    fn get_utc_time(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn get_local_time(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Unix timestamp of the most recent local midnight.
pub fn start_of_local_day(now: &DateTime<Local>) -> i64 {
    let midnight = now.date_naive().and_hms_opt(0, 0, 0).unwrap_or_default();
    Local
        .from_local_datetime(&midnight)
        .earliest()
        .map(|midnight| midnight.timestamp())
        // Midnight skipped by a DST change, fall back to counting back the seconds.
        .unwrap_or_else(|| now.timestamp() - i64::from(now.time().num_seconds_from_midnight()))
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::time_util::test_utils::{date, time, DummyTimeProvider};

    #[test]
    fn dummy_clones_share_time() {
        let provider = DummyTimeProvider::at_local(date(2024, 11, 28).and_time(time(10, 15, 0)));
        let handle = provider.clone();
        handle.advance(Duration::minutes(50));
        assert_eq!(provider.get_local_time().hour(), 11);
        assert_eq!(provider.get_local_time().minute(), 5);
    }

    #[test]
    fn midnight_is_start_of_day() {
        let provider = DummyTimeProvider::at_local(date(2024, 11, 28).and_time(time(13, 45, 10)));
        let midnight = start_of_local_day(&provider.get_local_time());
        let expected = Local
            .from_local_datetime(&date(2024, 11, 28).and_time(time(0, 0, 0)))
            .earliest()
            .unwrap()
            .timestamp();
        assert_eq!(midnight, expected);
        assert_eq!(provider.get_utc_time().timestamp() - midnight, 13 * 3600 + 45 * 60 + 10);
    }
}
