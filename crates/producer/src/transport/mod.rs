use std::future::Future;
use std::sync::Arc;

use thiserror::Error;

use crate::record::Record;

pub(crate) mod http;

pub use http::HttpTransport;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("endpoint rejected batch: {status} {body}")]
    Rejected {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("failed to parse response: {0}")]
    Parse(#[from] nanoserde::DeJsonErr),

    #[error("header {0:?} is not a valid HTTP header")]
    InvalidHeader(String),

    #[error("{0}")]
    Other(String),
}

/// Delivery result for one record, positionally matched to the submitted batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Delivered {
        record_id: Option<String>,
    },
    Failed {
        error_code: String,
        error_message: Option<String>,
    },
}

impl RecordOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, RecordOutcome::Failed { .. })
    }
}

/// Response to a batch submit that the endpoint accepted at the protocol level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub failed_count: usize,
    pub entries: Vec<RecordOutcome>,
}

impl BatchOutcome {
    /// Every record in a batch of `len` delivered.
    pub fn delivered(len: usize) -> Self {
        Self {
            failed_count: 0,
            entries: vec![RecordOutcome::Delivered { record_id: None }; len],
        }
    }
}

/// Submits batches to the remote ingestion endpoint.
///
/// `Err` means the whole call failed; `Ok` may still report per-record
/// failures in the outcome's entries.
pub trait Transport {
    fn submit_batch(
        &self,
        records: &[Record],
    ) -> impl Future<Output = Result<BatchOutcome, TransportError>> + Send;
}

impl<T: Transport> Transport for Arc<T> {
    fn submit_batch(
        &self,
        records: &[Record],
    ) -> impl Future<Output = Result<BatchOutcome, TransportError>> + Send {
        (**self).submit_batch(records)
    }
}
