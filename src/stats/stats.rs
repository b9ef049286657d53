//! Concurrent statistics aggregation and periodic reporting
//!
//! Three writer paths feed the aggregator (response, timeout, client
//! error) while a periodic flusher appends snapshot lines to the output
//! artifacts and the console. One artifact receives the rolling partial
//! deltas, one the cumulative totals, one the cumulative error-code table,
//! and each message identifier gets its own file.
//!
//! The writers also emit through the `metrics` facade so an exporter
//! installed at process start sees the same counters.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use metrics::{histogram, increment_counter};
use tokio::sync::Notify;

use crate::error::StampedeError;
use crate::stats::snapshot::Snapshot;

struct StatsInner {
    total: Snapshot,
    partial: Snapshot,
    per_message: BTreeMap<String, Snapshot>,
}

/// Thread-safe statistics aggregator with periodic flushing
pub struct Stats {
    inner: RwLock<StatsInner>,
    print_period: Duration,
    file_prefix: String,
    accum_filename: String,
    partial_filename: String,
    err_filename: String,
    finished: Notify,
}

impl Stats {
    /// Creates the aggregator and its output artifacts
    ///
    /// One snapshot bucket and one artifact file are registered per unique
    /// message identifier, plus the partial, cumulative, and error files.
    /// Column headers go to every artifact and to the console.
    pub fn new(
        print_period_s: u64,
        output_prefix: &str,
        message_names: &[String],
    ) -> Result<Self, StampedeError> {
        let mut per_message = BTreeMap::new();
        for name in message_names {
            per_message.entry(name.clone()).or_insert_with(Snapshot::new);
        }

        let stats = Self {
            inner: RwLock::new(StatsInner {
                total: Snapshot::new(),
                partial: Snapshot::new(),
                per_message,
            }),
            print_period: Duration::from_secs(print_period_s),
            file_prefix: output_prefix.to_string(),
            accum_filename: format!("{output_prefix}.accum"),
            partial_filename: format!("{output_prefix}.partial"),
            err_filename: format!("{output_prefix}.err"),
            finished: Notify::new(),
        };

        stats.create_artifact(&stats.accum_filename)?;
        stats.create_artifact(&stats.partial_filename)?;
        {
            let inner = stats.inner.read().expect("stats lock poisoned");
            for name in inner.per_message.keys() {
                stats.create_artifact(&format!("{}.{name}", stats.file_prefix))?;
            }
        }

        let mut err_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&stats.err_filename)?;
        writeln!(err_file, "Traffic started at:  {}\n", started_at())?;
        writeln!(err_file, "{:<10}{:>10}{:>10}", "Time (s)", "Code", "Count")?;

        print!("{}", headers_line());
        Ok(stats)
    }

    fn create_artifact(&self, filename: &str) -> Result<(), StampedeError> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(filename)?;
        writeln!(file, "Traffic started at:  {}\n", started_at())?;
        write!(file, "{}", headers_line())?;
        Ok(())
    }

    /// Counts one submitted request
    pub fn increase_sent(&self, id: &str) {
        let mut inner = self.inner.write().expect("stats lock poisoned");
        inner.total.sent += 1;
        inner.partial.sent += 1;
        inner.per_message.entry(id.to_string()).or_default().sent += 1;

        increment_counter!("stampede_requests_sent", "id" => id.to_string());
    }

    /// Records one expected response and its latency in microseconds
    pub fn add_measurement(&self, id: &str, elapsed_us: i64, code: u16) {
        let mut inner = self.inner.write().expect("stats lock poisoned");
        inner.total.add_measurement(elapsed_us, code);
        inner.partial.add_measurement(elapsed_us, code);
        inner
            .per_message
            .entry(id.to_string())
            .or_default()
            .add_measurement(elapsed_us, code);

        increment_counter!(
            "stampede_responses_ok",
            "id" => id.to_string(),
            "response_code" => code.to_string()
        );
        histogram!(
            "stampede_response_time_ok_ms",
            elapsed_us as f64 / 1000.0,
            "id" => id.to_string(),
            "response_code" => code.to_string()
        );
    }

    /// Records one request that timed out before answering
    pub fn add_timeout(&self, id: &str) {
        let mut inner = self.inner.write().expect("stats lock poisoned");
        inner.total.timed_out += 1;
        inner.partial.timed_out += 1;
        inner
            .per_message
            .entry(id.to_string())
            .or_default()
            .timed_out += 1;

        increment_counter!("stampede_timeouts", "id" => id.to_string());
    }

    /// Records one unexpected response code (the request was already
    /// counted as sent on the submit path)
    pub fn add_error(&self, id: &str, code: u16) {
        let mut inner = self.inner.write().expect("stats lock poisoned");
        inner.total.record_code(code, true);
        inner.partial.record_code(code, true);
        inner
            .per_message
            .entry(id.to_string())
            .or_default()
            .record_code(code, true);

        increment_counter!(
            "stampede_responses_err",
            "id" => id.to_string(),
            "response_code" => code.to_string()
        );
    }

    /// Records one request that failed before reaching the wire: the send
    /// is counted here together with the synthetic error code
    pub fn add_client_error(&self, id: &str, code: u16) {
        let mut inner = self.inner.write().expect("stats lock poisoned");
        inner.total.sent += 1;
        inner.partial.sent += 1;
        inner.total.record_code(code, true);
        inner.partial.record_code(code, true);
        let msg = inner.per_message.entry(id.to_string()).or_default();
        msg.sent += 1;
        msg.record_code(code, true);

        increment_counter!("stampede_requests_sent", "id" => id.to_string());
        increment_counter!(
            "stampede_responses_err",
            "id" => id.to_string(),
            "response_code" => code.to_string()
        );
    }

    /// Cumulative snapshot
    pub fn total_snapshot(&self) -> Snapshot {
        self.inner.read().expect("stats lock poisoned").total.clone()
    }

    /// Rolling snapshot since the last flush
    pub fn partial_snapshot(&self) -> Snapshot {
        self.inner.read().expect("stats lock poisoned").partial.clone()
    }

    /// Snapshot for one message identifier
    pub fn message_snapshot(&self, id: &str) -> Option<Snapshot> {
        self.inner
            .read()
            .expect("stats lock poisoned")
            .per_message
            .get(id)
            .cloned()
    }

    /// Runs the periodic flush loop until `end` is called
    ///
    /// Fire instants are anchored to the aggregate's creation time so a
    /// slow flush does not accumulate drift.
    pub async fn run_flusher(self: Arc<Self>) {
        let anchor = tokio::time::Instant::now();
        let mut counter: u32 = 0;
        loop {
            counter += 1;
            let next = anchor + self.print_period * counter;
            tokio::select! {
                _ = tokio::time::sleep_until(next) => self.flush(),
                _ = self.finished.notified() => {
                    self.final_flush();
                    return;
                }
            }
        }
    }

    /// Stops the flush loop; the flusher performs one final report
    pub fn end(&self) {
        tracing::info!("execution finished, printing stats");
        self.finished.notify_one();
    }

    fn flush(&self) {
        let mut inner = self.inner.write().expect("stats lock poisoned");
        let init_time = inner.total.init_time;

        if let Some(line) = snapshot_line(&inner.partial, init_time) {
            append_to(&self.partial_filename, &line);
        }
        if let Some(line) = snapshot_line(&inner.total, init_time) {
            append_to(&self.accum_filename, &line);
            print!("{line}");
        }
        for (name, snap) in &inner.per_message {
            if let Some(line) = snapshot_line(snap, init_time) {
                append_to(&format!("{}.{name}", self.file_prefix), &line);
            }
        }
        self.write_errors(&inner.total);

        inner.partial = Snapshot::new();
    }

    fn final_flush(&self) {
        print!("{}", headers_line());
        {
            let inner = self.inner.read().expect("stats lock poisoned");
            let init_time = inner.total.init_time;
            for (name, snap) in &inner.per_message {
                println!(">>>{name}<<<");
                if let Some(line) = snapshot_line(snap, init_time) {
                    print!("{line}");
                }
            }
            println!(">>>Total<<<");
        }
        self.flush();
    }

    fn write_errors(&self, total: &Snapshot) {
        let elapsed_s = total.init_time.elapsed().as_millis() as f64 * 0.001;
        let mut table = String::new();
        for (code, count) in &total.response_codes_nok {
            table.push_str(&format!(
                "{:<10.1}{:>10}{:>10}\n",
                elapsed_s, code, count
            ));
        }
        if !table.is_empty() {
            append_to(&self.err_filename, &table);
        }
    }
}

fn started_at() -> String {
    chrono::Local::now().format("%a %b %e %H:%M:%S %Y").to_string()
}

fn headers_line() -> String {
    format!(
        "{:<10}{:>10}{:>10}{:>15}{:>15}{:>15}{:>15}{:>15}{:>15}{:>15}\n",
        "Time (s)",
        "Sent/s",
        "Recv/s",
        "RT (ms)",
        "minRT (ms)",
        "maxRT (ms)",
        "Sent",
        "Success",
        "Errors",
        "Timeouts"
    )
}

/// Formats one report line; a bucket younger than a millisecond is skipped
fn snapshot_line(snap: &Snapshot, init_time: Instant) -> Option<String> {
    let now = Instant::now();
    let partial_ms = now.duration_since(snap.init_time).as_millis() as f64;
    if partial_ms == 0.0 {
        return None;
    }
    let total_s = now.duration_since(init_time).as_millis() as f64 * 0.001;

    Some(format!(
        "{:<10.1}{:>10.1}{:>10.1}{:>15.3}{:>15.3}{:>15.3}{:>15}{:>15}{:>15}{:>15}\n",
        total_s,
        snap.sent as f64 / partial_ms * 1000.0,
        snap.responded_ok as f64 / partial_ms * 1000.0,
        snap.avg_rt_us / 1000.0,
        snap.min_rt_us as f64 / 1000.0,
        snap.max_rt_us as f64 / 1000.0,
        snap.sent,
        snap.ok_count(),
        snap.nok_count(),
        snap.timed_out
    ))
}

fn append_to(filename: &str, content: &str) {
    let result = OpenOptions::new()
        .create(true)
        .append(true)
        .open(filename)
        .and_then(|mut file| file.write_all(content.as_bytes()));
    if let Err(e) = result {
        tracing::warn!(file = %filename, error = %e, "failed to append statistics");
    }
}
