//! HTTP/2 client session management
//!
//! The client wraps one long-lived HTTP/2 session: it pulls ready script
//! instances from the queue, multiplexes their requests onto the session,
//! arbitrates the race between each response and its timeout, and performs
//! a single best-effort reconnection when the session is lost.
//!
//! Failures that happen before a request reaches the wire are recorded
//! with synthetic status codes so they stay distinguishable from server
//! responses in the statistics.

pub mod connection;
pub mod http2;

pub use connection::{Connection, Status};
pub use http2::Http2Client;

use async_trait::async_trait;

/// The session was not open when the request was about to be submitted
pub const CODE_NOT_CONNECTED: u16 = 466;
/// The session lock was contended by a reconnection attempt
pub const CODE_LOCK_CONTENDED: u16 = 467;
/// The submit itself failed
pub const CODE_SUBMIT_ERROR: u16 = 468;
/// The timeout timer lost its cancellation race against the response
pub const CODE_LOST_CANCEL_RACE: u16 = 469;

/// The dispatcher's view of the traffic client
#[async_trait]
pub trait TrafficClient: Send + Sync {
    /// Pulls the next ready script instance and submits its request
    ///
    /// Returns once the request is on the wire (or accounted as a client
    /// error); response handling continues in the background.
    async fn send(&self);

    /// Whether every outstanding script instance has drained
    fn has_finished(&self) -> bool;

    /// Stops the creation of new script instances
    fn close_window(&self);

    /// Whether the session is currently open
    fn is_connected(&self) -> bool;
}
