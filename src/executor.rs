use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::debug;

use crate::error::GeoError;
use crate::rate_limit::RateLimiter;
use crate::retry::{self, RetryPolicy, Sleeper, ThreadSleeper};

/// One logical GET against the search API: endpoint URL plus query pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSpec {
    pub url: String,
    pub query: Vec<(String, String)>,
}

impl RequestSpec {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            query: Vec::new(),
        }
    }

    pub fn param(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn param_opt(self, key: &str, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(value) => self.param(key, value),
            None => self,
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends a single request; no retries, no rate limiting.
pub trait Transport {
    fn send(&self, request: &RequestSpec) -> Result<RawResponse, GeoError>;
}

#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, GeoError> {
        Ok(Self {
            client: build_client(user_agent, timeout)?,
        })
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: &RequestSpec) -> Result<RawResponse, GeoError> {
        let response = self
            .client
            .get(&request.url)
            .query(&request.query)
            .send()
            .map_err(classify_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response.text().map_err(classify_reqwest_error)?;
        Ok(RawResponse { status, body })
    }
}

pub(crate) fn build_client(user_agent: &str, timeout: Duration) -> Result<Client, GeoError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(user_agent)
            .map_err(|err| GeoError::InvalidCredential(err.to_string()))?,
    );
    Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()
        .map_err(|err| GeoError::InvalidRequest(err.to_string()))
}

pub(crate) fn classify_reqwest_error(err: reqwest::Error) -> GeoError {
    if err.is_timeout() {
        GeoError::Timeout(err.to_string())
    } else if err.is_connect() || err.is_request() || err.is_body() {
        GeoError::Transport(err.to_string())
    } else if err.is_builder() {
        GeoError::InvalidRequest(err.to_string())
    } else {
        GeoError::MalformedResponse(err.to_string())
    }
}

/// Rate-limited, retrying front of a [`Transport`].
pub struct RetryingExecutor<T: Transport, S: Sleeper = ThreadSleeper> {
    transport: T,
    limiter: RateLimiter,
    policy: RetryPolicy,
    sleeper: S,
}

impl<T: Transport> RetryingExecutor<T> {
    pub fn new(transport: T, limiter: RateLimiter, policy: RetryPolicy) -> Self {
        Self::with_sleeper(transport, limiter, policy, ThreadSleeper)
    }
}

impl<T: Transport, S: Sleeper> RetryingExecutor<T, S> {
    pub fn with_sleeper(transport: T, limiter: RateLimiter, policy: RetryPolicy, sleeper: S) -> Self {
        Self {
            transport,
            limiter,
            policy,
            sleeper,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn sleeper(&self) -> &S {
        &self.sleeper
    }

    /// Every attempt takes a rate-limiter slot, including failed ones.
    pub fn execute(&mut self, request: &RequestSpec) -> Result<RawResponse, GeoError> {
        let transport = &self.transport;
        let limiter = &mut self.limiter;
        retry::run(&self.policy, &self.sleeper, &request.url, |attempt| {
            limiter.acquire();
            debug!(url = %request.url, attempt, "dispatching request");
            let response = transport.send(request)?;
            if response.is_success() {
                return Ok(response);
            }
            Err(GeoError::from_status(
                response.status,
                truncate_message(&response.body),
                &request.url,
            ))
        })
    }
}

fn truncate_message(body: &str) -> String {
    const LIMIT: usize = 200;
    let trimmed = body.trim();
    match trimmed.char_indices().nth(LIMIT) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
