use std::collections::HashMap;
use std::env;

use thiserror::Error;

const ENV_PREFIX: &str = "FIREHOSE_RELAY_";
const DEFAULT_LISTENER_PORT: u16 = 4480;

#[derive(Debug, Error)]
pub enum RelayConfigError {
    #[error("FIREHOSE_RELAY_LISTENER_PORT has invalid value: {0}")]
    InvalidPort(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub listener_port: u16,
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, RelayConfigError> {
        let vars: HashMap<String, String> = env::vars()
            .filter(|(k, _)| k.starts_with(ENV_PREFIX))
            .collect();
        Self::parse(&vars)
    }

    fn parse(vars: &HashMap<String, String>) -> Result<Self, RelayConfigError> {
        let listener_port = match vars.get("FIREHOSE_RELAY_LISTENER_PORT") {
            Some(val) => val
                .parse()
                .ok()
                .filter(|port| *port != 0)
                .ok_or_else(|| RelayConfigError::InvalidPort(val.clone()))?,
            None => DEFAULT_LISTENER_PORT,
        };

        Ok(Self { listener_port })
    }
}
