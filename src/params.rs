//! Runtime pacing parameters
//!
//! Captured once at startup: the inter-request wait derived from the target
//! rate, the traffic window duration, and the anchor instant every
//! scheduled tick is computed from.

use std::time::Duration;

/// Pacing parameters for one run
#[derive(Debug, Clone)]
pub struct Params {
    /// Microseconds between scheduled sends (`1_000_000 / rate`)
    pub wait_time_us: u64,
    /// Length of the traffic window
    pub duration: Duration,
    /// Anchor for the tick schedule, captured at construction
    pub init_time: tokio::time::Instant,
}

impl Params {
    /// Derives the pacing from the requested rate and duration
    pub fn new(rate: u32, duration_s: u64) -> Self {
        Self {
            wait_time_us: 1_000_000 / u64::from(rate.max(1)),
            duration: Duration::from_secs(duration_s),
            init_time: tokio::time::Instant::now(),
        }
    }
}
