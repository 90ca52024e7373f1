use async_trait::async_trait;
use thiserror::Error;

use crate::config::FetchBackend;

mod http;
pub use http::{create_client, HttpFetcher};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP error: {0}")]
    HttpStatus(u16),
    #[error("fetch backend '{0}' is not supported")]
    UnsupportedBackend(FetchBackend),
}

/// Retrieves the raw bytes of a watched resource.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, backend: FetchBackend) -> Result<Vec<u8>, FetchError>;

    fn supports(&self, backend: FetchBackend) -> bool;
}
