use std::collections::HashMap;
use std::env;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::record::MAX_BATCH_SIZE;

const ENV_PREFIX: &str = "FIREHOSE_PRODUCER_";

const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_BUFFER_SIZE: usize = MAX_BATCH_SIZE;
const DEFAULT_BACKLOG_SIZE: usize = MAX_BATCH_SIZE;
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_BACKOFF_MIN: Duration = Duration::from_millis(100);
const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(10);
const DEFAULT_BACKOFF_FACTOR: u32 = 2;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("stream name is required but not set")]
    StreamNameMissing,

    #[error("endpoint is required by the HTTP transport but not set")]
    EndpointMissing,

    #[error("endpoint is not a valid URL: {0}")]
    EndpointInvalidUrl(String),

    #[error("buffer size {0} exceeds the endpoint limit of {MAX_BATCH_SIZE}")]
    BufferSizeTooLarge(usize),

    #[error("backoff minimum {min:?} is greater than maximum {max:?}")]
    BackoffRange { min: Duration, max: Duration },

    #[error("{0} has invalid value: {1}")]
    InvalidNumeric(String, String),
}

/// Parameters for the default [`ExponentialBackoff`](crate::ExponentialBackoff).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub min: Duration,
    pub max: Duration,
    pub factor: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min: DEFAULT_BACKOFF_MIN,
            max: DEFAULT_BACKOFF_MAX,
            factor: DEFAULT_BACKOFF_FACTOR,
        }
    }
}

/// Producer settings.
///
/// Zero values for `flush_interval`, `buffer_size` and `backlog_size` (and for
/// the backoff parameters) mean "use the default"; they are filled in when the
/// producer is built.
#[derive(Debug, Clone)]
pub struct Config {
    /// Destination delivery stream.
    pub stream_name: String,
    /// Endpoint URL for the default HTTP transport. Unused when a transport is injected.
    pub endpoint: Option<Url>,
    /// Longest a record waits in a partially filled batch.
    pub flush_interval: Duration,
    /// Records per batch, at most `MAX_BATCH_SIZE`.
    pub buffer_size: usize,
    /// Capacity of the record queue.
    pub backlog_size: usize,
    pub request_timeout: Duration,
    /// Static headers sent with every HTTP submit call.
    pub headers: Vec<(String, String)>,
    pub backoff: BackoffConfig,
}

impl Config {
    pub fn new(stream_name: impl Into<String>) -> Self {
        Self {
            stream_name: stream_name.into(),
            endpoint: None,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            buffer_size: DEFAULT_BUFFER_SIZE,
            backlog_size: DEFAULT_BACKLOG_SIZE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            headers: Vec::new(),
            backoff: BackoffConfig::default(),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = env::vars()
            .filter(|(k, _)| k.starts_with(ENV_PREFIX))
            .collect();
        Self::parse(&vars)
    }

    fn parse(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let stream_name = vars
            .get("FIREHOSE_PRODUCER_STREAM_NAME")
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::StreamNameMissing)?
            .clone();

        let config = Self {
            stream_name,
            endpoint: parse_endpoint(vars)?,
            flush_interval: parse_duration_ms(
                vars,
                "FIREHOSE_PRODUCER_FLUSH_INTERVAL_MS",
                DEFAULT_FLUSH_INTERVAL,
            )?,
            buffer_size: parse_numeric(vars, "FIREHOSE_PRODUCER_BUFFER_SIZE", DEFAULT_BUFFER_SIZE)?,
            backlog_size: parse_numeric(
                vars,
                "FIREHOSE_PRODUCER_BACKLOG_SIZE",
                DEFAULT_BACKLOG_SIZE,
            )?,
            request_timeout: parse_duration_ms(
                vars,
                "FIREHOSE_PRODUCER_REQUEST_TIMEOUT_MS",
                DEFAULT_REQUEST_TIMEOUT,
            )?,
            headers: parse_headers(vars),
            backoff: BackoffConfig {
                min: parse_duration_ms(vars, "FIREHOSE_PRODUCER_BACKOFF_MIN_MS", DEFAULT_BACKOFF_MIN)?,
                max: parse_duration_ms(vars, "FIREHOSE_PRODUCER_BACKOFF_MAX_MS", DEFAULT_BACKOFF_MAX)?,
                factor: parse_numeric(
                    vars,
                    "FIREHOSE_PRODUCER_BACKOFF_FACTOR",
                    DEFAULT_BACKOFF_FACTOR,
                )?,
            },
        };

        config.normalized()
    }

    /// Fill zero values with defaults and check the limits the endpoint imposes.
    pub(crate) fn normalized(mut self) -> Result<Self, ConfigError> {
        if self.stream_name.is_empty() {
            return Err(ConfigError::StreamNameMissing);
        }

        if self.flush_interval.is_zero() {
            self.flush_interval = DEFAULT_FLUSH_INTERVAL;
        }
        if self.buffer_size == 0 {
            self.buffer_size = DEFAULT_BUFFER_SIZE;
        }
        if self.buffer_size > MAX_BATCH_SIZE {
            return Err(ConfigError::BufferSizeTooLarge(self.buffer_size));
        }
        if self.backlog_size == 0 {
            self.backlog_size = DEFAULT_BACKLOG_SIZE;
        }
        if self.request_timeout.is_zero() {
            self.request_timeout = DEFAULT_REQUEST_TIMEOUT;
        }

        let backoff = &mut self.backoff;
        if backoff.min.is_zero() {
            backoff.min = DEFAULT_BACKOFF_MIN;
        }
        if backoff.max.is_zero() {
            backoff.max = DEFAULT_BACKOFF_MAX;
        }
        if backoff.factor == 0 {
            backoff.factor = DEFAULT_BACKOFF_FACTOR;
        }
        if backoff.min > backoff.max {
            return Err(ConfigError::BackoffRange {
                min: backoff.min,
                max: backoff.max,
            });
        }

        Ok(self)
    }
}

fn parse_endpoint(vars: &HashMap<String, String>) -> Result<Option<Url>, ConfigError> {
    match vars
        .get("FIREHOSE_PRODUCER_ENDPOINT")
        .filter(|s| !s.is_empty())
    {
        Some(raw) => Url::parse(raw)
            .map(Some)
            .map_err(|_| ConfigError::EndpointInvalidUrl(raw.clone())),
        None => Ok(None),
    }
}

fn parse_numeric<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(name) {
        Some(val) => val
            .parse()
            .map_err(|_| ConfigError::InvalidNumeric(name.to_owned(), val.clone())),
        None => Ok(default),
    }
}

fn parse_duration_ms(
    vars: &HashMap<String, String>,
    name: &str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match vars.get(name) {
        Some(val) => {
            let ms: u64 = val
                .parse()
                .map_err(|_| ConfigError::InvalidNumeric(name.to_owned(), val.clone()))?;
            Ok(Duration::from_millis(ms))
        }
        None => Ok(default),
    }
}

fn parse_headers(vars: &HashMap<String, String>) -> Vec<(String, String)> {
    vars.get("FIREHOSE_PRODUCER_HEADERS")
        .filter(|s| !s.is_empty())
        .map(|raw| {
            raw.split(',')
                .filter_map(|pair| {
                    let (k, v) = pair.split_once('=')?;
                    let k = k.trim();
                    if k.is_empty() {
                        return None;
                    }
                    Some((k.to_owned(), v.trim().to_owned()))
                })
                .collect()
        })
        .unwrap_or_default()
}
