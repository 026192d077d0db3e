//! HTTP transport: the single `send` primitive.
//!
//! `Transport::send` is the only path to the network. It applies the rate
//! limiter, issues the GET, decodes and parses the body, and classifies
//! failures — retrying where the classification allows, with per-class
//! attempt counters. The in-body STATUS drives classification whenever the
//! body parses; the HTTP status line only matters for throttling (429),
//! forbidden (403), and unparseable bodies.
//!
//! The [`HttpExchange`] seam exists so the whole engine can run against a
//! scripted exchange in tests; [`ReqwestExchange`] is the production
//! implementation.

use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, warn};

use crate::catalog::MESSAGE_ID_NO_DATA;
use crate::config::RetryConfig;
use crate::error::{ApiFault, BojError, BojResult, TransportKind};
use crate::parse::{parse_response, ParsedResponse, EXCERPT_LIMIT};
use crate::shutdown::SharedShutdown;
use crate::{Format, Lang};

pub mod rate_limit;
pub mod retry;

pub use rate_limit::RateLimiter;
pub use retry::{WaitDecision, WaitSource};

/// A raw HTTP response before body parsing.
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// HTTP status code
    pub status: u16,
    /// Retry-After header, verbatim
    pub retry_after: Option<String>,
    /// Response body bytes
    pub body: Vec<u8>,
    /// Fully resolved request URL
    pub final_url: String,
}

/// A transport-level failure with its retry classification.
#[derive(Debug, Clone)]
pub struct TransportFailure {
    /// Failure class
    pub kind: TransportKind,
    /// Underlying error description
    pub message: String,
    /// Request URL when known
    pub url: Option<String>,
}

/// Minimal HTTP capability the engine needs: one GET.
pub trait HttpExchange: Send + Sync {
    /// Issue a GET to `endpoint` with the given query parameters.
    fn get(
        &self,
        endpoint: &str,
        params: &[(String, String)],
    ) -> impl Future<Output = Result<RawResponse, TransportFailure>> + Send;
}

/// Production exchange backed by a pooled [`reqwest::Client`].
#[derive(Debug, Clone)]
pub struct ReqwestExchange {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestExchange {
    /// Wrap a configured client targeting `base_url`.
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

fn classify_reqwest_error(error: &reqwest::Error) -> TransportKind {
    if error.is_timeout() {
        return TransportKind::Timeout;
    }
    if error.is_builder() {
        return TransportKind::InvalidUrl;
    }
    if error.is_connect() {
        let mut source = std::error::Error::source(error);
        while let Some(inner) = source {
            let text = inner.to_string().to_ascii_lowercase();
            if text.contains("certificate") || text.contains("tls") || text.contains("handshake") {
                return TransportKind::TlsTrust;
            }
            source = inner.source();
        }
        return TransportKind::Connect;
    }
    if error.is_body() || error.is_decode() {
        return TransportKind::Read;
    }
    if error.is_request() {
        return TransportKind::LocalProtocol;
    }
    TransportKind::RemoteProtocol
}

impl HttpExchange for ReqwestExchange {
    async fn get(
        &self,
        endpoint: &str,
        params: &[(String, String)],
    ) -> Result<RawResponse, TransportFailure> {
        let url = format!("{}{}", self.base_url, endpoint);
        let response = self
            .client
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(|e| TransportFailure {
                kind: classify_reqwest_error(&e),
                message: e.to_string(),
                url: Some(url.clone()),
            })?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .map(String::from);
        let final_url = response.url().to_string();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportFailure {
                kind: TransportKind::Read,
                message: e.to_string(),
                url: Some(final_url.clone()),
            })?
            .to_vec();

        Ok(RawResponse {
            status,
            retry_after,
            body,
            final_url,
        })
    }
}

/// A successfully classified response.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    /// The parsed page
    pub parsed: ParsedResponse,
    /// Fully resolved request URL
    pub request_url: String,
    /// Decoded body text
    pub raw_text: String,
}

/// The send pipeline: limiter, GET, parse, classify, retry.
pub struct Transport<E> {
    exchange: E,
    limiter: Arc<RateLimiter>,
    retry: RetryConfig,
    shutdown: Option<SharedShutdown>,
    capture_full_response: bool,
    rng: StdMutex<StdRng>,
}

impl<E: HttpExchange> Transport<E> {
    /// Build a transport over the given exchange and shared limiter.
    pub fn new(exchange: E, limiter: Arc<RateLimiter>, retry: RetryConfig) -> Self {
        Self {
            exchange,
            limiter,
            retry,
            shutdown: None,
            capture_full_response: false,
            rng: StdMutex::new(StdRng::from_entropy()),
        }
    }

    /// Observe a cancellation signal at every suspension point.
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Retain the complete response body in API errors.
    pub fn with_capture_full_response(mut self, capture: bool) -> Self {
        self.capture_full_response = capture;
        self
    }

    /// Seed the backoff RNG deterministically (tests).
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = StdMutex::new(StdRng::seed_from_u64(seed));
        self
    }

    /// The limiter shared by every caller of this transport.
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    fn cancelled(&self) -> bool {
        self.shutdown
            .as_ref()
            .map(|handle| handle.is_requested())
            .unwrap_or(false)
    }

    async fn sleep_or_cancel(&self, wait: Duration) -> BojResult<()> {
        match &self.shutdown {
            Some(shutdown) => tokio::select! {
                _ = tokio::time::sleep(wait) => Ok(()),
                _ = shutdown.wait() => Err(BojError::Cancelled),
            },
            None => {
                tokio::time::sleep(wait).await;
                Ok(())
            }
        }
    }

    fn backoff(&self, class_attempt: u32) -> Duration {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        retry::full_jitter_backoff(&mut *rng, class_attempt, &self.retry)
    }

    async fn wait_before_retry(
        &self,
        class_attempt: u32,
        retry_after: Option<&str>,
        endpoint: &str,
        reason: &str,
    ) -> BojResult<()> {
        let decision = retry::decide_wait(
            retry::parse_retry_after(retry_after),
            self.limiter.remaining().await,
            self.backoff(class_attempt),
        );
        warn!(
            endpoint,
            reason,
            wait_secs = decision.duration.as_secs_f64(),
            source = decision.source.as_str(),
            "retrying request"
        );
        self.sleep_or_cancel(decision.duration).await
    }

    fn api_error(&self, parsed: ParsedResponse, request_url: String, raw_text: &str) -> BojError {
        let fault = ApiFault {
            status: Some(parsed.status),
            message_id: parsed.message_id,
            message: parsed.message,
            request_url,
            raw_response_excerpt: parsed.raw_response_excerpt,
            raw_response: self.capture_full_response.then(|| raw_text.to_string()),
        };
        match fault.status {
            Some(400) => BojError::BadRequest(fault),
            Some(500) => BojError::ServerError(fault),
            Some(503) => BojError::Unavailable(fault),
            _ => BojError::Api(fault),
        }
    }

    fn gateway_error(&self, raw: &RawResponse, detail: &str, raw_text: &str) -> BojError {
        BojError::Gateway(ApiFault {
            status: Some(raw.status),
            message_id: "UNPARSEABLE_RESPONSE".to_string(),
            message: format!("response body could not be parsed: {detail}"),
            request_url: raw.final_url.clone(),
            raw_response_excerpt: raw_text.chars().take(EXCERPT_LIMIT).collect(),
            raw_response: self.capture_full_response.then(|| raw_text.to_string()),
        })
    }

    /// Execute one logical request, retrying per the classification rules.
    ///
    /// Returns the first successfully classified page. Exhausted retries
    /// surface the last observed failure unchanged.
    pub async fn send(
        &self,
        endpoint: &str,
        params: &[(String, String)],
        lang: Lang,
        format: Format,
    ) -> BojResult<SendOutcome> {
        let transport_cap = self.retry.effective_transport_attempts();
        let mut transport_attempts: u32 = 0;
        let mut response_attempts: u32 = 0;
        let mut forbidden_attempts: u32 = 0;

        loop {
            if self.cancelled() {
                return Err(BojError::Cancelled);
            }
            let waited = match &self.shutdown {
                Some(shutdown) => tokio::select! {
                    waited = self.limiter.acquire() => waited,
                    _ = shutdown.wait() => return Err(BojError::Cancelled),
                },
                None => self.limiter.acquire().await,
            };
            debug!(
                endpoint,
                waited_secs = waited.as_secs_f64(),
                "issuing request"
            );

            let result = match &self.shutdown {
                Some(shutdown) => tokio::select! {
                    result = self.exchange.get(endpoint, params) => result,
                    _ = shutdown.wait() => return Err(BojError::Cancelled),
                },
                None => self.exchange.get(endpoint, params).await,
            };

            let raw = match result {
                Ok(raw) => raw,
                Err(failure) => {
                    transport_attempts += 1;
                    if failure.kind.is_retriable() && transport_attempts < transport_cap {
                        warn!(
                            endpoint,
                            kind = failure.kind.as_str(),
                            attempt = transport_attempts,
                            "transport failure"
                        );
                        self.sleep_or_cancel(self.backoff(transport_attempts - 1))
                            .await?;
                        continue;
                    }
                    return Err(BojError::Transport {
                        url: failure.url,
                        kind: failure.kind,
                        message: failure.message,
                    });
                }
            };

            let raw_text = String::from_utf8_lossy(&raw.body).into_owned();
            match parse_response(&raw.body, format, lang) {
                Ok(parsed) => {
                    // "No data" is a successful empty page, never an error.
                    if parsed.message_id == MESSAGE_ID_NO_DATA {
                        return Ok(SendOutcome {
                            parsed,
                            request_url: raw.final_url,
                            raw_text,
                        });
                    }

                    if parsed.status != 200 {
                        response_attempts += 1;
                        if retry::body_status_retriable(parsed.status)
                            && response_attempts < self.retry.max_attempts
                        {
                            self.wait_before_retry(
                                response_attempts - 1,
                                raw.retry_after.as_deref(),
                                endpoint,
                                "retriable body status",
                            )
                            .await?;
                            continue;
                        }
                        return Err(self.api_error(parsed, raw.final_url, &raw_text));
                    }

                    // Body says 200; the HTTP status may still demand
                    // throttling or forbidden handling.
                    if raw.status == 429 {
                        response_attempts += 1;
                        if response_attempts < self.retry.max_attempts {
                            self.wait_before_retry(
                                response_attempts - 1,
                                raw.retry_after.as_deref(),
                                endpoint,
                                "http 429",
                            )
                            .await?;
                            continue;
                        }
                        return Err(self.gateway_error(&raw, "throttled (HTTP 429)", &raw_text));
                    }
                    if raw.status == 403 {
                        forbidden_attempts += 1;
                        if self.retry.retry_on_403
                            && raw.retry_after.is_some()
                            && forbidden_attempts < self.retry.retry_on_403_max_attempts
                        {
                            self.wait_before_retry(
                                forbidden_attempts - 1,
                                raw.retry_after.as_deref(),
                                endpoint,
                                "http 403",
                            )
                            .await?;
                            continue;
                        }
                        return Err(self.gateway_error(&raw, "forbidden (HTTP 403)", &raw_text));
                    }

                    return Ok(SendOutcome {
                        parsed,
                        request_url: raw.final_url,
                        raw_text,
                    });
                }
                Err(parse_failure) => {
                    // Unparseable body: the HTTP status line is all there is.
                    response_attempts += 1;
                    let retriable = matches!(raw.status, 429 | 503);
                    if retriable && response_attempts < self.retry.max_attempts {
                        self.wait_before_retry(
                            response_attempts - 1,
                            raw.retry_after.as_deref(),
                            endpoint,
                            "unparseable body with retriable http status",
                        )
                        .await?;
                        continue;
                    }
                    if raw.status == 403
                        && self.retry.retry_on_403
                        && raw.retry_after.is_some()
                    {
                        forbidden_attempts += 1;
                        if forbidden_attempts < self.retry.retry_on_403_max_attempts {
                            self.wait_before_retry(
                                forbidden_attempts - 1,
                                raw.retry_after.as_deref(),
                                endpoint,
                                "http 403",
                            )
                            .await?;
                            continue;
                        }
                    }
                    return Err(self.gateway_error(&raw, &parse_failure.to_string(), &raw_text));
                }
            }
        }
    }
}
