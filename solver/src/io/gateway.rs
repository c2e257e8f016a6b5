//! Stage gateway: the three game API calls the solver needs.
//!
//! Each call is a single request/response with no retry. Tests use scripted
//! gateways that replay canned replies without touching the network.

use std::time::Duration;

use reqwest::blocking::{Client, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::core::types::{GuessOutcome, StageInfo};

/// Sent with every guess. The service requires it; its meaning is undocumented.
pub const TRIAL_LEVELS_FLAG: &str = "false";

/// Any failure talking to the game API.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{operation} request failed: {source}")]
    Request {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{operation} returned HTTP {status}: {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("{operation} returned an API error: {message}")]
    Api {
        operation: &'static str,
        message: String,
    },

    #[error("{operation} returned an undecodable body: {reason}")]
    Decode {
        operation: &'static str,
        reason: String,
    },
}

/// Reply to a prompt submission.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PromptReply {
    pub answer: String,
    #[serde(default, rename = "defender")]
    pub stage: String,
    #[serde(default)]
    pub prompt: String,
}

/// Abstraction over the game service.
pub trait StageGateway {
    /// Fetch a fresh snapshot of `stage`.
    fn fetch_stage(&self, stage: &str) -> Result<StageInfo, TransportError>;

    /// Send `prompt` to the defender of `stage`.
    fn submit_prompt(&self, stage: &str, prompt: &str) -> Result<PromptReply, TransportError>;

    /// Guess the secret for `stage`, citing the exchange that revealed it.
    fn submit_guess(
        &self,
        stage: &str,
        secret: &str,
        prompt: &str,
        answer: &str,
    ) -> Result<GuessOutcome, TransportError>;
}

#[derive(Debug, Deserialize)]
struct StageResponse {
    description: String,
    level: u32,
}

/// Gateway backed by the public HTTP API.
pub struct HttpGateway {
    base_url: String,
    http: Client,
}

impl HttpGateway {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| TransportError::Request {
                operation: "build client",
                source,
            })?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

impl StageGateway for HttpGateway {
    #[instrument(skip(self))]
    fn fetch_stage(&self, stage: &str) -> Result<StageInfo, TransportError> {
        let operation = "fetch stage";
        let response = self
            .http
            .get(self.url("defender"))
            .query(&[("defender", stage)])
            .send()
            .map_err(|source| TransportError::Request { operation, source })?;
        let body: StageResponse = decode(operation, response)?;
        debug!(level = body.level, "stage fetched");
        Ok(StageInfo {
            key: stage.to_string(),
            level: body.level,
            description: body.description,
        })
    }

    #[instrument(skip(self, prompt), fields(prompt_len = prompt.len()))]
    fn submit_prompt(&self, stage: &str, prompt: &str) -> Result<PromptReply, TransportError> {
        let operation = "send message";
        let response = self
            .http
            .post(self.url("send-message"))
            .form(&[("defender", stage), ("prompt", prompt)])
            .send()
            .map_err(|source| TransportError::Request { operation, source })?;
        decode(operation, response)
    }

    #[instrument(skip(self, prompt, answer))]
    fn submit_guess(
        &self,
        stage: &str,
        secret: &str,
        prompt: &str,
        answer: &str,
    ) -> Result<GuessOutcome, TransportError> {
        let operation = "guess password";
        let response = self
            .http
            .post(self.url("guess-password"))
            .form(&[
                ("defender", stage),
                ("password", secret),
                ("prompt", prompt),
                ("answer", answer),
                ("trial_levels", TRIAL_LEVELS_FLAG),
            ])
            .send()
            .map_err(|source| TransportError::Request { operation, source })?;
        decode(operation, response)
    }
}

fn decode<T: DeserializeOwned>(
    operation: &'static str,
    response: Response,
) -> Result<T, TransportError> {
    let status = response.status();
    let body = response
        .text()
        .map_err(|source| TransportError::Request { operation, source })?;
    if !status.is_success() {
        warn!(operation, status = status.as_u16(), "game API returned error status");
        return Err(TransportError::Status {
            operation,
            status: status.as_u16(),
            body,
        });
    }
    parse_body(operation, &body)
}

/// Parse a 2xx body, surfacing `{"error": ...}` payloads as API errors.
pub(crate) fn parse_body<T: DeserializeOwned>(
    operation: &'static str,
    body: &str,
) -> Result<T, TransportError> {
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|err| TransportError::Decode {
            operation,
            reason: err.to_string(),
        })?;
    if let Some(error) = value.get("error") {
        let message = error
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(TransportError::Api { operation, message });
    }
    serde_json::from_value(value).map_err(|err| TransportError::Decode {
        operation,
        reason: err.to_string(),
    })
}
