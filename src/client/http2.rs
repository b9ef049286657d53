//! The HTTP/2 traffic client
//!
//! `Http2Client` owns the script queue and the managed connection. Each
//! `send` pulls one instance, submits its front message on the shared
//! session, and spawns two tasks sharing a small arbitration record: one
//! waiting for the response, one for the timeout. Exactly one of the
//! recording paths (measurement, code-mismatch error, timeout, lost-race
//! error, client error) runs per submitted request.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use tokio_util::sync::CancellationToken;

use crate::client::connection::{Connection, Status};
use crate::client::{
    TrafficClient, CODE_LOCK_CONTENDED, CODE_LOST_CANCEL_RACE, CODE_NOT_CONNECTED,
    CODE_SUBMIT_ERROR,
};
use crate::error::StampedeError;
use crate::script::model::Answer;
use crate::script::{Script, ScriptQueue, ServerInfo};
use crate::stats::Stats;

/// Arbitration record shared by the response and timeout paths; the first
/// side to set its flag under the mutex wins
#[derive(Debug, Default)]
struct RaceControl {
    timed_out: bool,
    answered: bool,
}

/// One long-lived HTTP/2 session driving a script queue
pub struct Http2Client {
    stats: Arc<Stats>,
    queue: Arc<ScriptQueue>,
    server: ServerInfo,
    /// Shared mode for submits, exclusive (try-lock) for reconnection
    session: tokio::sync::RwLock<Arc<Connection>>,
}

impl Http2Client {
    /// Opens the session and wraps the script in its queue
    ///
    /// # Errors
    ///
    /// Returns `StampedeError::Connection` when the initial connection
    /// cannot be established within the wait bound; the caller treats this
    /// as fatal.
    pub async fn connect(stats: Arc<Stats>, script: Script) -> Result<Self, StampedeError> {
        let server = script.server().clone();
        let queue = Arc::new(ScriptQueue::new(script));

        let connection = Connection::open(&server);
        if !connection.wait_to_be_connected().await {
            return Err(StampedeError::Connection(format!(
                "could not connect to {}:{}",
                server.dns, server.port
            )));
        }

        Ok(Self {
            stats,
            queue,
            server,
            session: tokio::sync::RwLock::new(connection),
        })
    }

    /// Replaces the lost session with a fresh connection
    ///
    /// The exclusive lock is only tried: when another task is already
    /// reconnecting this returns immediately. A fresh connection that does
    /// not open within the wait bound is dropped.
    async fn open_new_connection(&self) {
        let Ok(mut session) = self.session.try_write() else {
            return;
        };
        tracing::warn!(
            dns = %self.server.dns,
            port = %self.server.port,
            "reopening connection"
        );

        let fresh = Connection::open(&self.server);
        if fresh.wait_to_be_connected().await {
            *session = fresh;
        }
    }

    fn spawn_race(
        &self,
        script: Script,
        name: String,
        response_future: impl std::future::Future<
                Output = hyper::Result<hyper::Response<hyper::body::Incoming>>,
            > + Send
            + 'static,
    ) {
        let control = Arc::new(Mutex::new(RaceControl::default()));
        let cancel = CancellationToken::new();
        let timeout = Duration::from_millis(script.timeout_ms());
        let init_time = Instant::now();

        {
            let control = Arc::clone(&control);
            let cancel = cancel.clone();
            let stats = Arc::clone(&self.stats);
            let queue = Arc::clone(&self.queue);
            let name = name.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(timeout) => {
                        handle_timeout(&control, &stats, &queue, &name);
                    }
                    _ = cancel.cancelled() => {
                        handle_timeout_cancelled(&control, &stats, &queue, &name);
                    }
                }
            });
        }

        let stats = Arc::clone(&self.stats);
        let queue = Arc::clone(&self.queue);
        tokio::spawn(async move {
            let response = match response_future.await {
                Ok(response) => response,
                Err(e) => {
                    // The session died under the stream: no answer will
                    // come, the timeout path accounts for the request.
                    tracing::debug!(id = %name, error = %e, "request ended without response");
                    return;
                }
            };
            let elapsed_us = init_time.elapsed().as_micros() as i64;

            {
                let mut ctl = control.lock().expect("race control lock poisoned");
                if ctl.timed_out {
                    return;
                }
                ctl.answered = true;
            }
            cancel.cancel();

            let status = response.status().as_u16();
            let headers: BTreeMap<String, String> = response
                .headers()
                .iter()
                .filter_map(|(k, v)| {
                    v.to_str()
                        .ok()
                        .map(|value| (k.as_str().to_string(), value.to_string()))
                })
                .collect();

            let body = match response.into_body().collect().await {
                Ok(collected) => {
                    String::from_utf8_lossy(&collected.to_bytes()).into_owned()
                }
                Err(e) => {
                    tracing::debug!(id = %name, error = %e, "failed to read response body");
                    stats.add_error(&name, status);
                    queue.cancel();
                    return;
                }
            };

            let answer = Answer {
                status,
                body,
                headers,
            };
            if script.validate_answer(&answer) {
                stats.add_measurement(&name, elapsed_us, status);
                queue.enqueue(script, &answer);
            } else {
                stats.add_error(&name, status);
                queue.cancel();
            }
        });
    }
}

#[async_trait]
impl TrafficClient for Http2Client {
    async fn send(&self) {
        let Some(script) = self.queue.get_next() else {
            return;
        };
        let name = script.next_name().to_string();

        let request = match build_request(&self.server, &script) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(id = %name, error = %e, "cannot build request");
                self.stats.add_client_error(&name, CODE_SUBMIT_ERROR);
                self.queue.cancel();
                return;
            }
        };

        if !self.is_connected() {
            self.stats.add_client_error(&name, CODE_NOT_CONNECTED);
            self.queue.cancel();
            self.open_new_connection().await;
            return;
        }

        let Ok(session) = self.session.try_read() else {
            self.stats.add_client_error(&name, CODE_LOCK_CONTENDED);
            self.queue.cancel();
            return;
        };
        let connection = Arc::clone(&session);
        drop(session);

        let sender = match connection.request_sender() {
            Some(sender) if !sender.is_closed() => sender,
            _ => {
                tracing::warn!(id = %name, "submit failed, closing connection");
                connection.close();
                self.stats.add_client_error(&name, CODE_SUBMIT_ERROR);
                self.queue.cancel();
                return;
            }
        };

        self.stats.increase_sent(&name);

        let mut sender = sender;
        let response_future = async move { sender.send_request(request).await };
        self.spawn_race(script, name, response_future);
    }

    fn has_finished(&self) -> bool {
        !self.queue.has_pending()
    }

    fn close_window(&self) {
        self.queue.close_window();
    }

    fn is_connected(&self) -> bool {
        match self.session.try_read() {
            Ok(connection) => connection.status() == Status::Open,
            Err(_) => false,
        }
    }
}

fn handle_timeout(
    control: &Mutex<RaceControl>,
    stats: &Stats,
    queue: &ScriptQueue,
    name: &str,
) {
    let mut ctl = control.lock().expect("race control lock poisoned");
    if ctl.answered {
        return;
    }
    ctl.timed_out = true;
    stats.add_timeout(name);
    queue.cancel();
}

/// The timer was cancelled; normally the response has already claimed the
/// race, but a cancellation arriving without `answered` set means the race
/// was lost in flight
fn handle_timeout_cancelled(
    control: &Mutex<RaceControl>,
    stats: &Stats,
    queue: &ScriptQueue,
    name: &str,
) {
    if let Ok(mut ctl) = control.try_lock() {
        if !ctl.answered {
            ctl.timed_out = true;
            stats.add_error(name, CODE_LOST_CANCEL_RACE);
            queue.cancel();
        }
    }
}

/// Builds the hyper request for the script's front message
///
/// The target is `scheme://dns:port/` plus the message url; the generated
/// content headers are added before the script's own headers.
fn build_request(
    server: &ServerInfo,
    script: &Script,
) -> Result<hyper::Request<Full<Bytes>>, StampedeError> {
    let scheme = if server.secure { "https" } else { "http" };
    let uri = format!(
        "{scheme}://{}:{}/{}",
        server.dns,
        server.port,
        script.next_url()
    );

    let method = hyper::Method::from_bytes(script.next_method().as_bytes())
        .map_err(|e| StampedeError::Connection(format!("invalid method: {e}")))?;
    let body = Bytes::from(script.next_body().to_string());

    let mut builder = hyper::Request::builder()
        .method(method)
        .uri(uri)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .header(hyper::header::CONTENT_LENGTH, body.len());
    for (name, value) in script.next_headers() {
        builder = builder.header(name.as_str(), value.as_str());
    }

    builder
        .body(Full::new(body))
        .map_err(|e| StampedeError::Connection(format!("invalid request: {e}")))
}
