//! Retrying HTTP transport for the Machines API
//!
//! The Machines API is occasionally unstable: requests time out, and machine
//! deletes answer 409/412 even with the force flag. `Transport` retries those
//! conditions a bounded number of times and hands every other response back to
//! the caller untouched. Status-to-error translation lives in the client.

use crate::error::TransportError;
use async_trait::async_trait;
use futures::FutureExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error};

/// Per-request timeout of the underlying HTTP client
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything needed to issue one API call
#[derive(Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<Vec<u8>>,
    pub token: String,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            body: None,
            token: token.into(),
        }
    }

    /// Attach a JSON body
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    fn body_text(&self) -> String {
        self.body
            .as_deref()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_else(|| "nil".to_string())
    }
}

impl std::fmt::Debug for ApiRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("body_len", &self.body.as_ref().map(Vec::len))
            .finish_non_exhaustive()
    }
}

/// A fully-read HTTP response
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// True for any status above 299
    pub fn is_failure(&self) -> bool {
        self.status.as_u16() > 299
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Outcome of a single send that produced no response
#[derive(Debug, Error)]
pub enum SendError {
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("invalid request: {0}")]
    Build(String),
    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for SendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SendError::Timeout(e.to_string())
        } else if e.is_builder() {
            SendError::Build(e.to_string())
        } else {
            SendError::Other(e.to_string())
        }
    }
}

/// A single, non-retrying HTTP exchange.
///
/// Abstracted so the retry policy can be exercised without a network.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpSend: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, SendError>;
}

/// `HttpSend` backed by a shared reqwest client
#[derive(Debug, Clone)]
pub struct ReqwestSender {
    client: reqwest::Client,
}

impl ReqwestSender {
    pub fn new() -> Result<Self, TransportError> {
        Self::with_timeout(DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Build(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpSend for ReqwestSender {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, SendError> {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .bearer_auth(&request.token)
            .header(CONTENT_TYPE, "application/json; charset=UTF-8")
            .header(ACCEPT, "application/json");

        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        Ok(ApiResponse {
            status,
            body: body.to_vec(),
        })
    }
}

/// Attempt budget and back-off delays for `Transport`
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first
    pub max_attempts: u32,
    /// Delay after a network timeout
    pub timeout_delay: Duration,
    /// Delay after a 409 or 412 response
    pub conflict_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            timeout_delay: Duration::from_secs(1),
            conflict_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Same attempt budget, no sleeping between attempts
    pub fn without_delays() -> Self {
        Self {
            timeout_delay: Duration::ZERO,
            conflict_delay: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// Retrying transport over an `HttpSend`
pub struct Transport<S = ReqwestSender> {
    sender: S,
    policy: RetryPolicy,
}

impl Transport<ReqwestSender> {
    /// Transport over a fresh reqwest client with the default policy
    pub fn new() -> Result<Self, TransportError> {
        Ok(Self::with_sender(ReqwestSender::new()?, RetryPolicy::default()))
    }
}

impl<S: HttpSend> Transport<S> {
    pub fn with_sender(sender: S, policy: RetryPolicy) -> Self {
        Self { sender, policy }
    }

    /// Execute a request, retrying timeouts, 409 and 412.
    ///
    /// Any response that is not retried is returned as-is, including error
    /// statuses. A panic while sending is caught and reported as
    /// `TransportError::Panicked`.
    pub async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let outcome = AssertUnwindSafe(self.execute_with_retries(request))
            .catch_unwind()
            .await;

        let response = match outcome {
            Ok(result) => result?,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(
                    method = %request.method,
                    url = %request.url,
                    panic = %message,
                    "API request panicked"
                );
                return Err(TransportError::Panicked(message));
            }
        };

        if response.is_failure() {
            error!(
                status = response.status.as_u16(),
                method = %request.method,
                url = %request.url,
                "API request returned unsuccessful status"
            );
        }

        Ok(response)
    }

    async fn execute_with_retries(
        &self,
        request: &ApiRequest,
    ) -> Result<ApiResponse, TransportError> {
        let max_attempts = self.policy.max_attempts;

        for attempt in 1..=max_attempts {
            debug!(
                attempt,
                method = %request.method,
                url = %request.url,
                "Making API request"
            );

            let delay = match self.sender.send(request).await {
                Err(SendError::Timeout(reason)) => {
                    debug!(
                        attempt,
                        method = %request.method,
                        url = %request.url,
                        body = %request.body_text(),
                        reason = %reason,
                        "Client timeout, retrying soon"
                    );
                    self.policy.timeout_delay
                }
                Err(SendError::Build(reason)) => return Err(TransportError::Build(reason)),
                Err(SendError::Other(reason)) => return Err(TransportError::Http(reason)),
                Ok(response) => match response.status {
                    StatusCode::CONFLICT => {
                        debug!(method = %request.method, url = %request.url, "Conflict response, retrying soon");
                        self.policy.conflict_delay
                    }
                    StatusCode::PRECONDITION_FAILED => {
                        debug!(method = %request.method, url = %request.url, "Precondition failed response, retrying soon");
                        self.policy.conflict_delay
                    }
                    status => {
                        if status == StatusCode::BAD_REQUEST {
                            debug!(
                                method = %request.method,
                                url = %request.url,
                                body = %response.body_text(),
                                "Bad request response"
                            );
                        }
                        debug!(
                            attempt,
                            method = %request.method,
                            url = %request.url,
                            status = status.as_u16(),
                            "Made API request"
                        );
                        return Ok(response);
                    }
                },
            };

            if attempt < max_attempts {
                tokio::time::sleep(delay).await;
            }
        }

        Err(TransportError::TooManyAttempts {
            method: request.method.to_string(),
            url: request.url.clone(),
            attempts: max_attempts,
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
