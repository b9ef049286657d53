//! Counter snapshots
//!
//! A snapshot is one accumulation bucket: the cumulative total, the rolling
//! partial that resets every flush period, and each per-message bucket are
//! all instances of the same structure.

use std::collections::BTreeMap;
use std::time::Instant;

/// Counters and response-time aggregates for one accumulation bucket
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub sent: i64,
    pub responded_ok: i64,
    pub timed_out: i64,
    /// Arithmetic incremental mean of response times, microseconds
    pub avg_rt_us: f64,
    /// Minimum response time in microseconds; 0 until the first measurement
    pub min_rt_us: i64,
    pub max_rt_us: i64,
    /// status code → count for expected responses
    pub response_codes_ok: BTreeMap<u16, i64>,
    /// status code → count for unexpected responses and synthetic errors
    pub response_codes_nok: BTreeMap<u16, i64>,
    pub init_time: Instant,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            sent: 0,
            responded_ok: 0,
            timed_out: 0,
            avg_rt_us: 0.0,
            min_rt_us: 0,
            max_rt_us: 0,
            response_codes_ok: BTreeMap::new(),
            response_codes_nok: BTreeMap::new(),
            init_time: Instant::now(),
        }
    }
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one response under its status code
    pub fn record_code(&mut self, code: u16, is_error: bool) {
        let codes = if is_error {
            &mut self.response_codes_nok
        } else {
            &mut self.response_codes_ok
        };
        *codes.entry(code).or_insert(0) += 1;
    }

    /// Folds one response time into the running aggregates
    ///
    /// The average is the arithmetic incremental mean over the responses
    /// seen so far; `responded_ok` must already count this sample.
    pub fn record_rt(&mut self, elapsed_us: i64) {
        if self.responded_ok > 1 {
            self.avg_rt_us += (elapsed_us as f64 - self.avg_rt_us) / self.responded_ok as f64;
        } else {
            self.avg_rt_us = elapsed_us as f64;
        }

        if self.min_rt_us > elapsed_us || self.min_rt_us == 0 {
            self.min_rt_us = elapsed_us;
        }
        if self.max_rt_us < elapsed_us {
            self.max_rt_us = elapsed_us;
        }
    }

    /// Records one expected response: count, response time, status code
    pub fn add_measurement(&mut self, elapsed_us: i64, code: u16) {
        self.responded_ok += 1;
        self.record_rt(elapsed_us);
        self.record_code(code, false);
    }

    /// Total expected responses across status codes
    pub fn ok_count(&self) -> i64 {
        self.response_codes_ok.values().sum()
    }

    /// Total unexpected responses across status codes
    pub fn nok_count(&self) -> i64 {
        self.response_codes_nok.values().sum()
    }
}
