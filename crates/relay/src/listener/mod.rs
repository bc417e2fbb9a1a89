use std::convert::Infallible;

use bytes::Bytes;
use firehose_producer::{MAX_RECORD_SIZE, ProducerError, RecordSender};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const RECORDS_PATH: &str = "/records";

fn response(status: StatusCode) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::default())
        .unwrap()
}

/// Check route and method, then read the body up to the record size limit.
async fn validate<B>(req: Request<B>) -> Result<Bytes, (StatusCode, String)>
where
    B: hyper::body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let path = req.uri().path().to_owned();
    let method = req.method().clone();

    if path != RECORDS_PATH {
        return Err((StatusCode::NOT_FOUND, format!("unknown path: {path}")));
    }
    if method != Method::POST {
        return Err((StatusCode::METHOD_NOT_ALLOWED, format!("{method} {path}")));
    }

    Limited::new(req.into_body(), MAX_RECORD_SIZE)
        .collect()
        .await
        .map(|c| c.to_bytes())
        .map_err(|e| {
            if e.is::<LengthLimitError>() {
                (
                    StatusCode::PAYLOAD_TOO_LARGE,
                    format!("POST {path}: body exceeds {MAX_RECORD_SIZE} bytes"),
                )
            } else {
                (StatusCode::BAD_REQUEST, format!("POST {path}: failed to read body"))
            }
        })
}

/// Enqueue the request body as one record.
///
/// Waits while the producer backlog is full, so slow delivery slows clients down.
async fn handle<B>(req: Request<B>, sender: RecordSender) -> Result<Response<Full<Bytes>>, Infallible>
where
    B: hyper::body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let body = match validate(req).await {
        Ok(body) => body,
        Err((status, reason)) => {
            warn!(reason, "record request rejected");
            return Ok(response(status));
        }
    };

    let size = body.len();
    match sender.put(body).await {
        Ok(()) => {
            debug!(size, "record accepted");
            Ok(response(StatusCode::ACCEPTED))
        }
        Err(ProducerError::RecordTooLarge { size }) => {
            warn!(size, "record too large");
            Ok(response(StatusCode::PAYLOAD_TOO_LARGE))
        }
        // The producer is draining; nothing accepted now would be delivered.
        Err(e) => {
            warn!(error = %e, "record refused");
            Ok(response(StatusCode::SERVICE_UNAVAILABLE))
        }
    }
}

/// Accept connections until `cancel` fires.
pub async fn serve(listener: TcpListener, sender: RecordSender, cancel: CancellationToken) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                let stream = match result {
                    Ok((stream, _)) => stream,
                    Err(e) => {
                        warn!(error = %e, "failed to accept connection");
                        continue;
                    }
                };
                let sender = sender.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req| handle(req, sender.clone()));
                    let _ = Builder::new(TokioExecutor::new())
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
            _ = cancel.cancelled() => break,
        }
    }
}
