use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

use super::mytime::TimeProvider;

pub fn time(hour: u32, minute: u32, second: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, second).unwrap_or_else(|| panic!("Expected {:0>2}:{:0>2}:{:0>2} to be a valid time", hour, minute, second))
}

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or_else(|| panic!("Expected {:0>4}-{:0>2}-{:0>2} to be a valid date", year, month, day))
}

/// A settable clock. Clones share the same time, so a test can keep a handle
/// and move time forward after giving the provider away.
#[derive(Debug, Clone)]
pub struct DummyTimeProvider {
    utc_time: Arc<Mutex<DateTime<Utc>>>,
}

impl DummyTimeProvider {
    pub fn new(utc_time: DateTime<Utc>) -> Self {
        Self {
            utc_time: Arc::new(Mutex::new(utc_time)),
        }
    }

    /// Create a provider whose local wall clock reads the given time.
    pub fn at_local(local: NaiveDateTime) -> Self {
        let utc_time = Local
            .from_local_datetime(&local)
            .earliest()
            .unwrap_or_else(|| panic!("No local time exists for {}", local))
            .with_timezone(&Utc);
        Self::new(utc_time)
    }

    /// Move the time returned by this dummy time provider forward by the given duration
    pub fn advance(&self, duration: Duration) {
        *self.utc_time.lock().unwrap() += duration;
    }
}

impl TimeProvider for DummyTimeProvider {
    fn get_utc_time(&self) -> DateTime<Utc> {
        *self.utc_time.lock().unwrap()
    }

    fn get_local_time(&self) -> DateTime<Local> {
        Local.from_utc_datetime(&self.get_utc_time().naive_utc())
    }
}
