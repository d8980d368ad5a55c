use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::{fmt, fmt::Debug, time::Duration};
use tracing::{debug, instrument};

use crate::model::{Coordinate, Units, WeatherResponse};

pub const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org/data/2.5";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP status of a failed weather request, reduced to the cases the
/// pipeline tells apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpStatus {
    BadRequest,
    NotFound,
    Other(u16),
}

impl HttpStatus {
    pub fn from_code(code: u16) -> Self {
        match code {
            400 => HttpStatus::BadRequest,
            404 => HttpStatus::NotFound,
            other => HttpStatus::Other(other),
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            HttpStatus::BadRequest => 400,
            HttpStatus::NotFound => 404,
            HttpStatus::Other(code) => *code,
        }
    }
}

impl fmt::Display for HttpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpStatus::BadRequest => f.write_str("400 Bad Request"),
            HttpStatus::NotFound => f.write_str("404 Not Found"),
            HttpStatus::Other(code) => write!(f, "HTTP {code}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("weather request failed with {status}")]
    Http { status: HttpStatus },

    /// 2xx answer whose body is not a usable weather payload.
    #[error("weather response could not be used: {0}")]
    Malformed(String),

    /// Timeout, DNS failure, refused connection or a broken body stream.
    #[error("weather request did not complete: {0}")]
    Transport(String),
}

#[async_trait]
pub trait WeatherClient: Send + Sync + Debug {
    async fn fetch_weather(
        &self,
        coord: Coordinate,
        units: Units,
    ) -> Result<WeatherResponse, FetchError>;
}

#[derive(Debug, Clone)]
pub struct OpenWeatherClient {
    api_key: String,
    base_url: String,
    http: Client,
}

impl OpenWeatherClient {
    pub fn new(api_key: String) -> Result<Self> {
        Self::with_endpoint(api_key, DEFAULT_BASE_URL, DEFAULT_TIMEOUT)
    }

    pub fn with_endpoint(api_key: String, base_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client for the weather API")?;

        Ok(Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl WeatherClient for OpenWeatherClient {
    #[instrument(skip(self), fields(lat = %coord.latitude, lon = %coord.longitude))]
    async fn fetch_weather(
        &self,
        coord: Coordinate,
        units: Units,
    ) -> Result<WeatherResponse, FetchError> {
        let url = format!("{}/weather", self.base_url);
        debug!(url = %url, units = %units, "Requesting current weather");

        let res = self
            .http
            .get(&url)
            .query(&[
                ("lat", coord.latitude.to_string()),
                ("lon", coord.longitude.to_string()),
                ("units", units.as_str().to_string()),
                ("appid", self.api_key.clone()),
            ])
            .send()
            .await
            .map_err(|e| FetchError::Transport(describe_transport(e)))?;

        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|e| FetchError::Transport(describe_transport(e)))?;

        if !status.is_success() {
            debug!(status = %status, body = %truncate_body(&body), "Weather API rejected request");
            return Err(FetchError::Http { status: HttpStatus::from_code(status.as_u16()) });
        }

        let parsed: WeatherResponse = serde_json::from_str(&body)
            .map_err(|e| FetchError::Malformed(format!("{e}; body: {}", truncate_body(&body))))?;
        parsed.validate().map_err(|e| FetchError::Malformed(e.to_string()))?;

        Ok(parsed)
    }
}

// reqwest puts the full URL, API key included, into its Display output.
fn describe_transport(err: reqwest::Error) -> String {
    let err = err.without_url();
    if err.is_timeout() {
        format!("timed out ({err})")
    } else if err.is_connect() {
        format!("connection failed ({err})")
    } else {
        err.to_string()
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
