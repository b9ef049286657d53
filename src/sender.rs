//! Rate-paced dispatcher
//!
//! The sender fires one `send` per tick for the duration of the traffic
//! window, then keeps ticking without instantiating new work until every
//! outstanding script instance has drained. Tick `N` is scheduled at
//! `init_time + N · wait_time`, anchored to the start instant rather than
//! the previous fire, so a slow tick is absorbed by the next one instead
//! of accumulating drift.

use std::sync::Arc;
use std::time::Duration;

use crate::client::TrafficClient;
use crate::params::Params;

/// Drives the traffic client at the configured rate
pub struct Sender {
    client: Arc<dyn TrafficClient>,
    params: Params,
    counter: i64,
    window_close_signalled: bool,
}

impl Sender {
    pub fn new(client: Arc<dyn TrafficClient>, params: Params) -> Self {
        Self {
            client,
            params,
            counter: 0,
            window_close_signalled: false,
        }
    }

    /// Runs to completion: window expiry plus in-flight drain
    ///
    /// Returning from this future is the completion signal the caller
    /// awaits.
    pub async fn run(mut self) {
        loop {
            if !self.continue_sending() {
                return;
            }

            self.counter += 1;
            let next = self.params.init_time
                + Duration::from_micros(self.params.wait_time_us * self.counter as u64);

            self.client.send().await;
            // A `next` already in the past returns immediately
            tokio::time::sleep_until(next).await;
        }
    }

    fn still_in_window(&mut self) -> bool {
        let in_window = self.params.init_time.elapsed() < self.params.duration;
        if !in_window && !self.window_close_signalled {
            self.client.close_window();
            self.window_close_signalled = true;
        }
        in_window
    }

    fn continue_sending(&mut self) -> bool {
        self.still_in_window() || !self.client.has_finished()
    }
}
