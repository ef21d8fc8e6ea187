use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No API key provided; pass --api-key or set BUSTIME_API_KEY")]
    MissingApiKey,

    #[error("No route ids provided")]
    NoRoutes,

    #[error("{0} route ids provided, the vehicles endpoint accepts at most 10 per request")]
    TooManyRoutes(usize),

    #[error("--flush-every must be at least 1")]
    ZeroFlushCadence,

    #[error("Cannot use output directory {path:?}: {source}")]
    OutputDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Call budget of {limit} requests exhausted")]
    QuotaExceeded { limit: u64 },

    #[error("HTTP {status} from {endpoint}: {body}")]
    Transport {
        endpoint: &'static str,
        status: u16,
        body: String,
    },

    #[error("Request failed: {message}")]
    Connect { message: String },

    #[error("Response from {endpoint} has no 'bustime-response' envelope")]
    EnvelopeMissing { endpoint: &'static str },

    #[error("Malformed {kind} entry: {source}")]
    Mapping {
        kind: &'static str,
        source: serde_json::Error,
    },
}

#[derive(Error, Debug)]
pub enum CollectError {
    #[error("Cannot write checkpoint {path:?}: {source}")]
    Flush { path: PathBuf, source: csv::Error },
}
