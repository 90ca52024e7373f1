use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::{FetchError, Fetcher};
use crate::config::{FetchBackend, Settings};

pub fn create_client(user_agent: &str, timeout: Duration) -> Result<Client, FetchError> {
    ClientBuilder::new()
        .user_agent(user_agent)
        .timeout(timeout)
        .pool_max_idle_per_host(6)
        .build()
        .map_err(|e| FetchError::Network(e.to_string()))
}

/// Plain HTTP GET backend (`html_requests`).
pub struct HttpFetcher {
    client: Client,
    attempts: u32,
    retry_base_delay: Duration,
}

impl HttpFetcher {
    pub fn new(client: Client, attempts: u32) -> Self {
        Self {
            client,
            attempts: attempts.max(1),
            retry_base_delay: Duration::from_secs(2),
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, FetchError> {
        let client = create_client(&settings.user_agent, settings.request_timeout())?;
        Ok(Self::new(client, settings.fetch_attempts))
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    async fn get_once(&self, url: &reqwest::Url) -> Result<Vec<u8>, FetchError> {
        let response = self.client.get(url.clone()).send().await.map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            warn!("HTTP error {}: {}", status, url);
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        let body = response.bytes().await.map_err(map_reqwest_error)?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    /// All attempts happen inside one check cycle; the caller sees a single
    /// failure once they are exhausted.
    async fn fetch(&self, url: &str, backend: FetchBackend) -> Result<Vec<u8>, FetchError> {
        if !self.supports(backend) {
            return Err(FetchError::UnsupportedBackend(backend));
        }

        let parsed = reqwest::Url::parse(url).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.get_once(&parsed).await {
                Ok(body) => {
                    debug!("Fetched {} bytes from {}", body.len(), url);
                    return Ok(body);
                }
                Err(e) if attempt < self.attempts => {
                    let delay = self.retry_base_delay * 2u32.pow(attempt - 1);
                    warn!(
                        "Fetch of {} failed ({}), retrying in {:?} (attempt {}/{})",
                        url,
                        e,
                        delay,
                        attempt + 1,
                        self.attempts
                    );
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn supports(&self, backend: FetchBackend) -> bool {
        backend == FetchBackend::HtmlRequests
    }
}

fn map_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else if let Some(status) = err.status() {
        FetchError::HttpStatus(status.as_u16())
    } else {
        FetchError::Network(err.to_string())
    }
}
