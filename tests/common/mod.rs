//! Shared helpers for the integration suites
//!
//! Provides an in-process HTTP/2 cleartext server bound to an ephemeral
//! port, plus builders for the traffic scripts the scenarios use.

#![allow(dead_code)]

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use stampede::script::JsonDoc;
use stampede::Script;

/// An in-process HTTP/2 prior-knowledge server
pub struct TestServer {
    pub port: u16,
    accept_task: JoinHandle<()>,
    conn_tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl TestServer {
    /// Starts a server on an ephemeral port with the given handler
    pub async fn start<F, Fut>(handler: F) -> Self
    where
        F: Fn(Request<Incoming>) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Response<Full<Bytes>>> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("local addr").port();
        Self::from_listener(port, listener, handler)
    }

    /// Starts a server on a specific port (used to simulate a restart)
    pub async fn start_on_port<F, Fut>(port: u16, handler: F) -> Self
    where
        F: Fn(Request<Incoming>) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Response<Full<Bytes>>> + Send + 'static,
    {
        let listener = TcpListener::bind(("127.0.0.1", port)).await.expect("rebind");
        Self::from_listener(port, listener, handler)
    }

    fn from_listener<F, Fut>(port: u16, listener: TcpListener, handler: F) -> Self
    where
        F: Fn(Request<Incoming>) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Response<Full<Bytes>>> + Send + 'static,
    {
        let conn_tasks: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::new(Mutex::new(Vec::new()));
        let accept_task = spawn_accept_loop(listener, handler, Arc::clone(&conn_tasks));
        Self {
            port,
            accept_task,
            conn_tasks,
        }
    }

    /// Stops accepting and tears down all server tasks, freeing the port
    pub fn stop(&self) {
        self.accept_task.abort();
        for task in self.conn_tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_accept_loop<F, Fut>(
    listener: TcpListener,
    handler: F,
    conn_tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
) -> JoinHandle<()>
where
    F: Fn(Request<Incoming>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Response<Full<Bytes>>> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let handler = handler.clone();
            let task = tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let handler = handler.clone();
                    async move { Ok::<_, std::convert::Infallible>(handler(req).await) }
                });
                let _ = hyper::server::conn::http2::Builder::new(TokioExecutor::new())
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
            conn_tasks.lock().unwrap().push(task);
        }
    })
}

/// Responds 200 with a fixed body to every request
pub async fn start_echo_server(body: &'static str) -> TestServer {
    TestServer::start(move |_req| async move {
        Response::builder()
            .status(200)
            .body(Full::new(Bytes::from_static(body.as_bytes())))
            .expect("response")
    })
    .await
}

/// Collects the request body as text
pub async fn read_body(req: Request<Incoming>) -> String {
    let bytes = req
        .into_body()
        .collect()
        .await
        .expect("request body")
        .to_bytes();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// A single-message script against the local test server
pub fn single_message_script(
    port: u16,
    url: &str,
    method: &str,
    pass_code: u16,
    timeout_ms: u64,
) -> Script {
    let doc = JsonDoc::from_value(json!({
        "dns": "127.0.0.1",
        "port": port.to_string(),
        "timeout": timeout_ms,
        "flow": ["m1"],
        "messages": {
            "m1": {
                "url": url,
                "method": method,
                "response": {"code": pass_code}
            }
        }
    }));
    Script::from_doc(doc).expect("valid script")
}

/// Builds a script from an arbitrary document value
pub fn script_from(value: serde_json::Value) -> Script {
    Script::from_doc(JsonDoc::from_value(value)).expect("valid script")
}

/// Statistics wired to a temporary output prefix
pub fn temp_stats(
    message_names: &[String],
) -> (tempfile::TempDir, std::sync::Arc<stampede::Stats>) {
    let dir = tempfile::tempdir().expect("tempdir");
    let prefix = dir.path().join("stats.out").to_string_lossy().to_string();
    let stats = stampede::Stats::new(60, &prefix, message_names).expect("stats");
    (dir, std::sync::Arc::new(stats))
}

/// Polls a condition until it holds or the timeout elapses
pub async fn wait_until<F>(condition: F, timeout_ms: u64) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Shared recorder for observed requests
pub type Recorded = Arc<Mutex<Vec<(String, String)>>>;

pub fn recorder() -> Recorded {
    Arc::new(Mutex::new(Vec::new()))
}
