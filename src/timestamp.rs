use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::bcl;

/// Issues the logical timestamps that order directory updates.
///
/// Timestamps are UTC wall-clock readings at tick (100 ns) resolution,
/// strictly increasing per provider: two successive calls never return equal
/// values, even when the clock does not advance between them.
#[derive(Debug, Default)]
pub struct UniqueTimestampProvider {
    last_ticks: Mutex<i64>,
}

impl UniqueTimestampProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> DateTime<Utc> {
        let mut last = self.last_ticks.lock().unwrap();

        let mut ticks = bcl::ticks(Utc::now());
        if ticks <= *last {
            ticks = *last + 1;
        }
        *last = ticks;

        bcl::from_ticks(ticks).expect("tick count out of range")
    }
}
