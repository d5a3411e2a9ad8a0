use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;

use crate::error::HarvestError;
use crate::source::retry::Attempt;

/// Blocking JSON GET client shared by the adapters.
#[derive(Clone)]
pub struct HttpJson {
    client: Client,
}

impl HttpJson {
    pub fn new(timeout: Duration) -> Result<Self, HarvestError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("occ-harvest/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| HarvestError::SourceHttp(err.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| HarvestError::SourceHttp(err.to_string()))?;
        Ok(Self { client })
    }

    pub fn get_json(&self, url: &str, query: &[(&str, String)]) -> Attempt<Value> {
        let response = match self.client.get(url).query(query).send() {
            Ok(response) => response,
            Err(err) if is_retryable_error(&err) => {
                return Attempt::Retry(HarvestError::TransientSource(err.to_string()));
            }
            Err(err) => return Attempt::Fail(HarvestError::SourceHttp(err.to_string())),
        };

        let status = response.status().as_u16();
        if is_retryable_status(status) {
            return Attempt::Retry(HarvestError::TransientSource(format!(
                "{url} returned status {status}"
            )));
        }
        if !response.status().is_success() {
            let message = response
                .text()
                .unwrap_or_else(|_| "request failed".to_string());
            return Attempt::Fail(HarvestError::SourceStatus { status, message });
        }

        let body = match response.text() {
            Ok(body) => body,
            Err(err) => return Attempt::Retry(HarvestError::TransientSource(err.to_string())),
        };
        match serde_json::from_str(&body) {
            Ok(value) => Attempt::Done(value),
            Err(err) => Attempt::Retry(HarvestError::TransientSource(format!(
                "malformed payload from {url}: {err}"
            ))),
        }
    }
}

pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request() || err.is_body()
}
