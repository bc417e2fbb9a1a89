use bytes::Bytes;

/// Largest payload a single record may carry (1 MiB).
pub const MAX_RECORD_SIZE: usize = 1 << 20;

/// Largest request the endpoint accepts (5 MiB). Not enforced here; a batch of
/// `MAX_BATCH_SIZE` large records can exceed it and the endpoint will reject it.
pub const MAX_REQUEST_SIZE: usize = 5 << 20;

/// Most records the endpoint accepts in one batch call.
pub const MAX_BATCH_SIZE: usize = 500;

/// An opaque payload accepted by the producer.
///
/// Construction goes through [`Record::new`], so every `Record` in the queue is
/// within `MAX_RECORD_SIZE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record(Bytes);

impl Record {
    /// Wrap a payload, returning it back as the error if it is oversized.
    pub fn new(payload: impl Into<Bytes>) -> Result<Self, usize> {
        let payload = payload.into();
        if payload.len() > MAX_RECORD_SIZE {
            return Err(payload.len());
        }
        Ok(Self(payload))
    }

    pub fn data(&self) -> &Bytes {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}
