//! Managed HTTP/2 connection
//!
//! One `Connection` is one attempt at a long-lived HTTP/2 session: a
//! spawned task resolves the endpoint, performs the TCP (and, for secure
//! endpoints, TLS with `h2` ALPN) connect and the HTTP/2 handshake,
//! publishes the multiplexed request handle, and then drives the session
//! until it ends. The state machine is strictly
//! `NotOpen → Open → Closed`; a closed connection is never reused and
//! recovery means constructing a new one.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::client::conn::http2::SendRequest;
use hyper_util::rt::{TokioExecutor, TokioIo};
use rustls_pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;

use crate::error::StampedeError;
use crate::script::ServerInfo;

/// How long a waiter blocks for the session to leave `NotOpen`
const CONNECT_WAIT: Duration = Duration::from_secs(2);

/// Connection lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    NotOpen,
    Open,
    Closed,
}

type RequestSender = SendRequest<Full<Bytes>>;

/// A single HTTP/2 session with an observable lifecycle
pub struct Connection {
    status: Arc<watch::Sender<Status>>,
    sender: Arc<Mutex<Option<RequestSender>>>,
    driver: JoinHandle<()>,
}

impl Connection {
    /// Starts connecting to the endpoint; returns immediately
    ///
    /// Use `wait_to_be_connected` to block until the handshake settles.
    pub fn open(server: &ServerInfo) -> Arc<Self> {
        let (status_tx, _) = watch::channel(Status::NotOpen);
        let status = Arc::new(status_tx);
        let sender = Arc::new(Mutex::new(None));

        let driver = tokio::spawn(run_session(
            server.clone(),
            Arc::clone(&status),
            Arc::clone(&sender),
        ));

        Arc::new(Self {
            status,
            sender,
            driver,
        })
    }

    /// Current lifecycle state
    pub fn status(&self) -> Status {
        *self.status.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.status() == Status::Open
    }

    /// Blocks up to two seconds for the session to leave `NotOpen`;
    /// returns whether it is `Open` at wake
    pub async fn wait_to_be_connected(&self) -> bool {
        let mut rx = self.status.subscribe();
        let result = match tokio::time::timeout(CONNECT_WAIT, rx.wait_for(|s| *s != Status::NotOpen)).await {
            Ok(Ok(status)) => *status == Status::Open,
            _ => false,
        };
        result
    }

    /// Clones the multiplexed request handle, if the session is open
    pub fn request_sender(&self) -> Option<RequestSender> {
        if !self.is_open() {
            return None;
        }
        self.sender
            .lock()
            .expect("connection sender lock poisoned")
            .clone()
    }

    /// Terminates the session
    pub fn close(&self) {
        self.driver.abort();
        self.status.send_replace(Status::Closed);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

/// Connects, handshakes, and drives one HTTP/2 session to completion
async fn run_session(
    server: ServerInfo,
    status: Arc<watch::Sender<Status>>,
    sender: Arc<Mutex<Option<RequestSender>>>,
) {
    let authority = format!("{}:{}", server.dns, server.port);
    let stream = match TcpStream::connect(&authority).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(endpoint = %authority, error = %e, "connect failed");
            status.send_replace(Status::Closed);
            return;
        }
    };

    if server.secure {
        let connector = match tls_connector() {
            Ok(connector) => connector,
            Err(e) => {
                tracing::warn!(error = %e, "TLS setup failed");
                status.send_replace(Status::Closed);
                return;
            }
        };
        let domain = match ServerName::try_from(server.dns.clone()) {
            Ok(domain) => domain,
            Err(e) => {
                tracing::warn!(dns = %server.dns, error = %e, "invalid server name");
                status.send_replace(Status::Closed);
                return;
            }
        };
        match connector.connect(domain, stream).await {
            Ok(tls_stream) => drive_session(tls_stream, &authority, status, sender).await,
            Err(e) => {
                tracing::warn!(endpoint = %authority, error = %e, "TLS handshake failed");
                status.send_replace(Status::Closed);
            }
        }
    } else {
        drive_session(stream, &authority, status, sender).await;
    }
}

async fn drive_session<S>(
    stream: S,
    authority: &str,
    status: Arc<watch::Sender<Status>>,
    sender: Arc<Mutex<Option<RequestSender>>>,
) where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    match hyper::client::conn::http2::handshake(TokioExecutor::new(), TokioIo::new(stream)).await {
        Ok((request_sender, session)) => {
            *sender.lock().expect("connection sender lock poisoned") = Some(request_sender);
            tracing::info!(endpoint = %authority, "connected");
            status.send_replace(Status::Open);

            if let Err(e) = session.await {
                tracing::warn!(endpoint = %authority, error = %e, "session ended with error");
            }
            status.send_replace(Status::Closed);
        }
        Err(e) => {
            tracing::warn!(endpoint = %authority, error = %e, "HTTP/2 handshake failed");
            status.send_replace(Status::Closed);
        }
    }
}

/// Builds a TLS connector restricted to HTTP/2 over the platform roots
fn tls_connector() -> Result<TlsConnector, StampedeError> {
    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_native_certs::load_native_certs().certs {
        // Unusable platform certificates are skipped, not fatal
        let _ = roots.add(cert);
    }

    let mut config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = vec![b"h2".to_vec()];
    Ok(TlsConnector::from(Arc::new(config)))
}
