#![allow(clippy::question_mark)] // nanoserde DeJson derive

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use nanoserde::{DeJson, SerJson};
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use url::Url;

use super::{BatchOutcome, RecordOutcome, Transport, TransportError};
use crate::config::Config;
use crate::record::Record;

const CONTENT_TYPE: &str = "application/x-amz-json-1.1";
const TARGET: &str = "Firehose_20150804.PutRecordBatch";

#[derive(SerJson, DeJson)]
pub struct PutRecordBatchRequest {
    #[nserde(rename = "DeliveryStreamName")]
    pub delivery_stream_name: String,
    #[nserde(rename = "Records")]
    pub records: Vec<WireRecord>,
}

#[derive(SerJson, DeJson)]
pub struct WireRecord {
    /// Base64-encoded payload.
    #[nserde(rename = "Data")]
    pub data: String,
}

#[derive(DeJson)]
struct PutRecordBatchResponse {
    #[nserde(rename = "FailedPutCount")]
    failed_put_count: u64,
    #[nserde(rename = "RequestResponses")]
    request_responses: Vec<ResponseEntry>,
}

#[derive(DeJson)]
struct ResponseEntry {
    #[nserde(rename = "RecordId")]
    record_id: Option<String>,
    #[nserde(rename = "ErrorCode")]
    error_code: Option<String>,
    #[nserde(rename = "ErrorMessage")]
    error_message: Option<String>,
}

/// Speaks the `PutRecordBatch` JSON protocol over HTTPS.
///
/// Requests are not signed; any auth the endpoint needs goes in `Config::headers`.
pub struct HttpTransport {
    client: Client,
    endpoint: Url,
    stream_name: String,
}

impl HttpTransport {
    /// Fails on headers that are not valid HTTP, so no submit call is ever
    /// attempted with them.
    pub fn new(config: &Config, endpoint: Url) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .default_headers(header_map(&config.headers)?)
            .build()?;

        Ok(Self {
            client,
            endpoint,
            stream_name: config.stream_name.clone(),
        })
    }

    fn encode(&self, records: &[Record]) -> String {
        PutRecordBatchRequest {
            delivery_stream_name: self.stream_name.clone(),
            records: records
                .iter()
                .map(|r| WireRecord {
                    data: BASE64.encode(r.data()),
                })
                .collect(),
        }
        .serialize_json()
    }
}

impl Transport for HttpTransport {
    async fn submit_batch(&self, records: &[Record]) -> Result<BatchOutcome, TransportError> {
        let resp = self
            .client
            .post(self.endpoint.clone())
            .header("content-type", CONTENT_TYPE)
            .header("x-amz-target", TARGET)
            .body(self.encode(records))
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(TransportError::Rejected { status, body });
        }

        parse_response(&body)
    }
}

fn header_map(headers: &[(String, String)]) -> Result<HeaderMap, TransportError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let invalid = || TransportError::InvalidHeader(name.clone());
        let key = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
        let value = HeaderValue::from_str(value).map_err(|_| invalid())?;
        map.append(key, value);
    }
    Ok(map)
}

fn parse_response(body: &str) -> Result<BatchOutcome, TransportError> {
    let raw: PutRecordBatchResponse = DeJson::deserialize_json(body)?;

    let entries = raw
        .request_responses
        .into_iter()
        .map(|entry| match entry.error_code {
            Some(error_code) => RecordOutcome::Failed {
                error_code,
                error_message: entry.error_message,
            },
            None => RecordOutcome::Delivered {
                record_id: entry.record_id,
            },
        })
        .collect();

    Ok(BatchOutcome {
        failed_count: raw.failed_put_count as usize,
        entries,
    })
}
