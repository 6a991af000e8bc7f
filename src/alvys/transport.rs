use std::time::Duration;

use reqwest::{
    blocking::Client,
    header::{ACCEPT, CONTENT_TYPE, RETRY_AFTER},
};
use serde_json::Value;
use thiserror::Error;

use crate::error::IngestError;

#[derive(Clone, Debug, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    /// Seconds hint from a `Retry-After` header.
    pub retry_after: Option<Duration>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        HttpResponse {
            status,
            retry_after: None,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Statuses worth another attempt: request timeout, throttling and
    /// server side errors.
    pub fn is_transient(&self) -> bool {
        self.status == 408 || self.status == 429 || (500..600).contains(&self.status)
    }

    /// The start of the body, for log and error messages.
    pub fn snippet(&self) -> &str {
        let mut end = self.body.len().min(200);
        while !self.body.is_char_boundary(end) {
            end -= 1;
        }
        &self.body[..end]
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Timeout(_) | TransportError::Connect(_))
    }
}

/// The HTTP seam used by the token manager and the exporter.
pub trait Transport {
    /// POST a JSON body with a bearer token.
    fn post_json(&self, url: &str, bearer: &str, body: &Value)
        -> Result<HttpResponse, TransportError>;

    /// POST a form-encoded body.
    fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<HttpResponse, TransportError>;
}

/// Blocking reqwest client with a client-wide timeout.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, IngestError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IngestError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(ReqwestTransport { client })
    }

    fn read(response: reqwest::blocking::Response) -> Result<HttpResponse, TransportError> {
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.text().map_err(classify)?;
        Ok(HttpResponse {
            status,
            retry_after,
            body,
        })
    }
}

fn classify(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else {
        TransportError::Other(e.to_string())
    }
}

impl Transport for ReqwestTransport {
    fn post_json(
        &self,
        url: &str,
        bearer: &str,
        body: &Value,
    ) -> Result<HttpResponse, TransportError> {
        let response = self
            .client
            .post(url)
            .bearer_auth(bearer)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/*+json")
            .body(body.to_string())
            .send()
            .map_err(classify)?;
        ReqwestTransport::read(response)
    }

    fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<HttpResponse, TransportError> {
        let response = self
            .client
            .post(url)
            .header(ACCEPT, "application/json")
            .form(form)
            .send()
            .map_err(classify)?;
        ReqwestTransport::read(response)
    }
}
