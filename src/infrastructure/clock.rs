use chrono::{DateTime, Datelike, Local, NaiveDate, TimeZone, Timelike, Utc};
use std::sync::Mutex;

/// Injectable wall-clock source. Every date/weekday/minute the engine reads
/// comes through here so tests can pin time; the split logic in the run
/// ledger also derives midnights through this trait, which keeps
/// midnight-crossing behavior deterministic under a fixed clock.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;

    fn today(&self) -> NaiveDate {
        self.date_of(self.now_ms())
    }

    /// Weekday index of today, 0 (Sunday) .. 6 (Saturday).
    fn weekday_index(&self) -> u8 {
        self.today().weekday().num_days_from_sunday() as u8
    }

    fn date_of(&self, ms: i64) -> NaiveDate;

    /// Minutes past local midnight for the given instant.
    fn minute_of_day(&self, ms: i64) -> u32;

    /// Epoch ms of the first instant of the calendar day after `ms`.
    fn next_midnight(&self, ms: i64) -> i64;

    /// Epoch ms of the given local date at the given minute of day.
    fn date_time_ms(&self, date: NaiveDate, minute: u32) -> i64;
}

/// Local wall-clock implementation backed by `chrono::Local`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }

    fn date_of(&self, ms: i64) -> NaiveDate {
        local_datetime(ms).date_naive()
    }

    fn minute_of_day(&self, ms: i64) -> u32 {
        let time = local_datetime(ms).time();
        time.hour() * 60 + time.minute()
    }

    fn next_midnight(&self, ms: i64) -> i64 {
        let next_day = self.date_of(ms).succ_opt().unwrap_or_else(|| self.date_of(ms));
        self.date_time_ms(next_day, 0)
    }

    fn date_time_ms(&self, date: NaiveDate, minute: u32) -> i64 {
        let time = date
            .and_hms_opt(minute / 60, minute % 60, 0)
            .unwrap_or_else(|| date.and_hms_opt(0, 0, 0).expect("midnight exists"));
        match Local.from_local_datetime(&time) {
            chrono::LocalResult::Single(value) => value.timestamp_millis(),
            chrono::LocalResult::Ambiguous(earliest, _) => earliest.timestamp_millis(),
            // DST gap: fall back to the UTC reading of the same wall time.
            chrono::LocalResult::None => time.and_utc().timestamp_millis(),
        }
    }
}

fn local_datetime(ms: i64) -> DateTime<Local> {
    Local
        .timestamp_millis_opt(ms)
        .single()
        .unwrap_or_else(|| Local.timestamp_millis_opt(0).single().expect("epoch exists"))
}

/// UTC-anchored clock with a settable "now", for deterministic tests and
/// embedders that replay history.
#[derive(Debug, Default)]
pub struct FixedClock {
    now_ms: Mutex<i64>,
}

impl FixedClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms: Mutex::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        *self.now_ms.lock().expect("fixed clock lock poisoned") = now_ms;
    }

    pub fn advance_minutes(&self, minutes: i64) {
        let mut now = self.now_ms.lock().expect("fixed clock lock poisoned");
        *now += minutes * 60_000;
    }

    fn utc(&self, ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms)
            .single()
            .unwrap_or_else(|| Utc.timestamp_millis_opt(0).single().expect("epoch exists"))
    }
}

impl Clock for FixedClock {
    fn now_ms(&self) -> i64 {
        *self.now_ms.lock().expect("fixed clock lock poisoned")
    }

    fn date_of(&self, ms: i64) -> NaiveDate {
        self.utc(ms).date_naive()
    }

    fn minute_of_day(&self, ms: i64) -> u32 {
        let time = self.utc(ms).time();
        time.hour() * 60 + time.minute()
    }

    fn next_midnight(&self, ms: i64) -> i64 {
        let next_day = self.date_of(ms).succ_opt().unwrap_or_else(|| self.date_of(ms));
        self.date_time_ms(next_day, 0)
    }

    fn date_time_ms(&self, date: NaiveDate, minute: u32) -> i64 {
        let time = date
            .and_hms_opt(minute / 60, minute % 60, 0)
            .unwrap_or_else(|| date.and_hms_opt(0, 0, 0).expect("midnight exists"));
        time.and_utc().timestamp_millis()
    }
}
