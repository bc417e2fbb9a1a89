use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use nanoserde::DeJson;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use url::Url;

use crate::backoff::Backoff;
use crate::diagnostics::{Diagnostics, Event, EventKind};
use crate::engine::FlushReason;
use crate::record::Record;
use crate::transport::http::PutRecordBatchRequest;
use crate::transport::{BatchOutcome, RecordOutcome, Transport, TransportError};

pub fn payload(i: usize) -> Bytes {
    Bytes::from(format!("record-{i}"))
}

pub fn payloads(records: &[Record]) -> Vec<String> {
    records
        .iter()
        .map(|r| String::from_utf8_lossy(r.data()).into_owned())
        .collect()
}

/// What a scripted transport answers to one submit call.
pub enum Reply {
    Delivered,
    /// Partial failure: the records at these positions fail.
    FailAt(Vec<usize>),
    /// The submit call itself fails.
    Error,
    Outcome(BatchOutcome),
}

/// Answers submit calls from a script, then delivers everything once the
/// script runs out. Every batch it sees is recorded.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    calls: Arc<Mutex<Vec<Vec<Record>>>>,
    replies: Arc<Mutex<VecDeque<Reply>>>,
}

impl ScriptedTransport {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            calls: Arc::default(),
            replies: Arc::new(Mutex::new(replies.into())),
        }
    }

    pub fn calls(&self) -> Vec<Vec<Record>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_sizes(&self) -> Vec<usize> {
        self.calls.lock().unwrap().iter().map(Vec::len).collect()
    }
}

impl Transport for ScriptedTransport {
    async fn submit_batch(&self, records: &[Record]) -> Result<BatchOutcome, TransportError> {
        self.calls.lock().unwrap().push(records.to_vec());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Reply::Delivered);

        match reply {
            Reply::Delivered => Ok(BatchOutcome::delivered(records.len())),
            Reply::FailAt(positions) => {
                let entries = (0..records.len())
                    .map(|i| {
                        if positions.contains(&i) {
                            RecordOutcome::Failed {
                                error_code: "ServiceUnavailableException".into(),
                                error_message: None,
                            }
                        } else {
                            RecordOutcome::Delivered { record_id: None }
                        }
                    })
                    .collect();
                Ok(BatchOutcome {
                    failed_count: positions.len(),
                    entries,
                })
            }
            Reply::Error => Err(TransportError::Other("connection reset".into())),
            Reply::Outcome(outcome) => Ok(outcome),
        }
    }
}

/// Blocks every submit call until a permit is released with [`GatedTransport::open`].
#[derive(Clone)]
pub struct GatedTransport {
    gate: Arc<Semaphore>,
    inner: ScriptedTransport,
}

impl GatedTransport {
    pub fn new() -> Self {
        Self {
            gate: Arc::new(Semaphore::new(0)),
            inner: ScriptedTransport::default(),
        }
    }

    /// Let `n` more submit calls through.
    pub fn open(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn call_sizes(&self) -> Vec<usize> {
        self.inner.call_sizes()
    }
}

impl Transport for GatedTransport {
    async fn submit_batch(&self, records: &[Record]) -> Result<BatchOutcome, TransportError> {
        self.gate
            .acquire()
            .await
            .expect("gate semaphore closed")
            .forget();
        self.inner.submit_batch(records).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffCall {
    Next,
    Reset,
}

/// Fixed 10ms delay; records every call.
#[derive(Clone, Default)]
pub struct RecordingBackoff {
    calls: Arc<Mutex<Vec<BackoffCall>>>,
}

impl RecordingBackoff {
    pub const DELAY: Duration = Duration::from_millis(10);

    pub fn calls(&self) -> Vec<BackoffCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl Backoff for RecordingBackoff {
    fn next_delay(&mut self) -> Duration {
        self.calls.lock().unwrap().push(BackoffCall::Next);
        Self::DELAY
    }

    fn reset(&mut self) {
        self.calls.lock().unwrap().push(BackoffCall::Reset);
    }
}

/// Owned copy of an [`Event`].
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub kind: EventKind,
    pub reason: Option<FlushReason>,
    pub record_count: usize,
    pub backlog_depth: usize,
    pub backoff: Option<Duration>,
    pub error: Option<String>,
}

#[derive(Clone, Default)]
pub struct RecordingDiagnostics {
    events: Arc<Mutex<Vec<RecordedEvent>>>,
}

impl RecordingDiagnostics {
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn of_kind(&self, kind: EventKind) -> Vec<RecordedEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.kind == kind)
            .collect()
    }

    /// `(reason, record_count)` of every flush attempt, in order.
    pub fn flushes(&self) -> Vec<(FlushReason, usize)> {
        self.of_kind(EventKind::Flush)
            .into_iter()
            .map(|e| (e.reason.expect("flush event without reason"), e.record_count))
            .collect()
    }

    pub fn backoffs(&self) -> Vec<Duration> {
        self.of_kind(EventKind::Retry)
            .into_iter()
            .filter_map(|e| e.backoff)
            .collect()
    }
}

impl Diagnostics for RecordingDiagnostics {
    fn emit(&self, event: &Event<'_>) {
        self.events.lock().unwrap().push(RecordedEvent {
            kind: event.kind,
            reason: event.reason,
            record_count: event.record_count,
            backlog_depth: event.backlog_depth,
            backoff: event.backoff,
            error: event.error.map(|e| e.to_string()),
        });
    }
}

pub fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Bind to port 0 and return the OS-assigned port.
/// The listener is dropped, freeing the port for the caller to rebind.
pub async fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub headers: HashMap<String, String>,
    pub stream_name: String,
    /// Decoded record payloads.
    pub payloads: Vec<String>,
}

impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

type Replies = Arc<Mutex<VecDeque<(StatusCode, String)>>>;
type Captured = Arc<Mutex<Vec<CapturedRequest>>>;

/// A local `PutRecordBatch` endpoint. Answers with the scripted replies in
/// order, then reports every record delivered.
pub struct MockEndpoint {
    pub url: Url,
    captured: Captured,
}

impl MockEndpoint {
    pub async fn start(replies: Vec<(StatusCode, String)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = Url::parse(&format!("http://{}/", listener.local_addr().unwrap())).unwrap();
        let captured: Captured = Arc::default();
        let replies: Replies = Arc::new(Mutex::new(replies.into()));

        let store = captured.clone();
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.expect("failed to accept connection");
                let store = store.clone();
                let replies = replies.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req| handle(req, store.clone(), replies.clone()));
                    let _ = Builder::new(TokioExecutor::new())
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        Self { url, captured }
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.captured.lock().unwrap().clone()
    }
}

async fn handle<B>(
    req: Request<B>,
    store: Captured,
    replies: Replies,
) -> Result<Response<Full<Bytes>>, Infallible>
where
    B: hyper::body::Body<Data = Bytes> + Send + 'static,
{
    let headers = req
        .headers()
        .iter()
        .filter_map(|(k, v)| Some((k.as_str().to_owned(), v.to_str().ok()?.to_owned())))
        .collect();

    let body = req
        .collect()
        .await
        .map(|c| c.to_bytes())
        .unwrap_or_default();
    let request: PutRecordBatchRequest =
        DeJson::deserialize_json(&String::from_utf8_lossy(&body)).expect("malformed request body");

    let record_count = request.records.len();
    store.lock().unwrap().push(CapturedRequest {
        headers,
        stream_name: request.delivery_stream_name,
        payloads: request
            .records
            .iter()
            .map(|r| String::from_utf8(BASE64.decode(&r.data).unwrap()).unwrap())
            .collect(),
    });

    let (status, body) = replies.lock().unwrap().pop_front().unwrap_or_else(|| {
        let entries = vec![r#"{"RecordId":"id"}"#; record_count].join(",");
        (
            StatusCode::OK,
            format!(r#"{{"FailedPutCount":0,"RequestResponses":[{entries}]}}"#),
        )
    });

    Ok(Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(body)))
        .unwrap())
}
