//! stampede - scripted HTTP/2 load generator library
//!
//! This library provides the traffic engine behind the stampede binary:
//! the script model and queue, the managed HTTP/2 client session, the
//! rate-paced dispatcher, and the statistics aggregator.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `script`: traffic script parsing, the per-instance execution model,
//!   and the queue producing dispatchable instances
//! - `client`: the managed HTTP/2 connection and the traffic client that
//!   submits requests and arbitrates response/timeout races
//! - `sender`: the rate-paced dispatch loop
//! - `stats`: concurrent statistics aggregation and periodic reporting
//! - `params`: runtime pacing parameters
//! - `cli`: command-line interface definition
//! - `error`: error types and result aliases
//! - `o11y`: telemetry exporter lifecycle
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use stampede::{Http2Client, Params, Script, Sender, Stats};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let script = Script::from_text(r#"{
//!         "dns": "localhost", "port": "8686", "timeout": 2000,
//!         "flow": ["ping"],
//!         "messages": {"ping": {
//!             "url": "v1/ping", "method": "GET", "response": {"code": 200}
//!         }}
//!     }"#)?;
//!
//!     let params = Params::new(10, 60);
//!     let stats = Arc::new(Stats::new(10, "stampede.out", &script.message_names())?);
//!     let client = Http2Client::connect(Arc::clone(&stats), script).await?;
//!
//!     Sender::new(Arc::new(client), params).run().await;
//!     stats.end();
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod client;
pub mod error;
pub mod o11y;
pub mod params;
pub mod script;
pub mod sender;
pub mod stats;

// Re-export commonly used types
pub use client::{Http2Client, TrafficClient};
pub use error::{Result, StampedeError};
pub use params::Params;
pub use script::{Script, ScriptQueue};
pub use sender::Sender;
pub use stats::Stats;
