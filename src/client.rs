//! Async client: wiring of transport, services, cache, and limiter.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::FileCache;
use crate::catalog::MessageCatalog;
use crate::config::{ClientConfig, RetryConfig};
use crate::error::{BojError, BojResult, TransportKind};
use crate::service::data::DataService;
use crate::service::metadata::MetadataService;
use crate::shutdown::{ShutdownCoordinator, SharedShutdown};
use crate::transport::{RateLimiter, ReqwestExchange, Transport};
use crate::validation::validate_strict_auto_split;
use crate::{CacheMode, ConflictResolution, ConsistencyMode, Format, Lang, OutputOrder};

/// Async client for the BOJ Time-Series Statistical Data API.
///
/// One client owns one HTTP connection pool, one rate limiter, and one
/// cache; every call through it shares all three. Clone-free sharing goes
/// through `Arc<BojClient>` or by handing out the service references.
pub struct BojClient {
    data: DataService<ReqwestExchange>,
    metadata: MetadataService<ReqwestExchange>,
    catalog: MessageCatalog,
    shutdown: SharedShutdown,
}

impl BojClient {
    /// Start configuring a client.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// A client with default configuration.
    pub fn new() -> BojResult<Self> {
        Self::builder().build()
    }

    /// The data service (`getDataCode`, `getDataLayer`).
    pub fn data(&self) -> &DataService<ReqwestExchange> {
        &self.data
    }

    /// The metadata service (`getMetadata`).
    pub fn metadata(&self) -> &MetadataService<ReqwestExchange> {
        &self.metadata
    }

    /// Classifier for server MESSAGEID values.
    pub fn catalog(&self) -> &MessageCatalog {
        &self.catalog
    }

    /// Handle that cancels every in-flight and future call of this client.
    pub fn shutdown_handle(&self) -> SharedShutdown {
        self.shutdown.clone()
    }
}

/// Builder for [`BojClient`].
#[derive(Debug, Clone, Default)]
pub struct ClientBuilder {
    config: ClientConfig,
    retry: RetryConfig,
    proxy: Option<String>,
    http2: bool,
    pool_max_idle_per_host: Option<usize>,
    shutdown: Option<SharedShutdown>,
}

impl ClientBuilder {
    /// API origin (host + path + version).
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.base_url = base_url.into();
        self
    }

    /// Overall request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// TCP connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Default request language.
    pub fn lang(mut self, lang: Lang) -> Self {
        self.config.lang = lang;
        self
    }

    /// Default response format.
    pub fn format(mut self, format: Format) -> Self {
        self.config.format = format;
        self
    }

    /// User-Agent header value.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Maximum request rate, shared across all callers of the client.
    pub fn rate_limit_per_sec(mut self, rate: f64) -> Self {
        self.config.rate_limit_per_sec = rate;
        self
    }

    /// Enable the file cache under this directory.
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.cache.dir = Some(dir.into());
        self
    }

    /// Cache lookup mode.
    pub fn cache_mode(mut self, mode: CacheMode) -> Self {
        self.config.cache.mode = mode;
        self
    }

    /// Cache entry time-to-live.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache.ttl = ttl;
        self
    }

    /// Pass requests through exactly as given.
    pub fn strict_api(mut self, strict: bool) -> Self {
        self.config.strict_api = strict;
        self
    }

    /// Partition large code lists automatically.
    pub fn auto_split_codes(mut self, split: bool) -> Self {
        self.config.auto_split_codes = split;
        self
    }

    /// Consistency policy for update hazards.
    pub fn consistency_mode(mut self, mode: ConsistencyMode) -> Self {
        self.config.consistency_mode = mode;
        self
    }

    /// Conflict resolution rule.
    pub fn conflict_resolution(mut self, rule: ConflictResolution) -> Self {
        self.config.conflict_resolution = rule;
        self
    }

    /// Output ordering.
    pub fn output_order(mut self, order: OutputOrder) -> Self {
        self.config.output_order = order;
        self
    }

    /// Permit non-core raw_params.
    pub fn allow_raw_override(mut self, allow: bool) -> Self {
        self.config.allow_raw_override = allow;
        self
    }

    /// Turn DATE parse warnings into hard errors.
    pub fn metadata_freshness_strict(mut self, strict: bool) -> Self {
        self.config.metadata_freshness_strict = strict;
        self
    }

    /// Retain complete response bodies in API errors.
    pub fn capture_full_response(mut self, capture: bool) -> Self {
        self.config.capture_full_response = capture;
        self
    }

    /// Retry configuration.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Route requests through a proxy.
    pub fn proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Negotiate HTTP/2.
    pub fn http2(mut self, enable: bool) -> Self {
        self.http2 = enable;
        self
    }

    /// Cap idle pooled connections per host.
    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.pool_max_idle_per_host = Some(max);
        self
    }

    /// Observe an external cancellation signal.
    pub fn shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Validate the configuration and construct the client.
    pub fn build(self) -> BojResult<BojClient> {
        validate_strict_auto_split(self.config.strict_api, self.config.auto_split_codes)?;
        if self.retry.max_attempts < 1 {
            return Err(BojError::validation(
                "invalid_retry_config",
                "max_attempts must be at least 1",
            ));
        }
        if self.retry.jitter_ratio <= 0.0 {
            return Err(BojError::validation(
                "invalid_retry_config",
                "jitter_ratio must be positive",
            ));
        }

        let mut http = reqwest::Client::builder()
            .timeout(self.config.timeout)
            .connect_timeout(self.config.connect_timeout)
            .user_agent(self.config.user_agent.clone())
            .gzip(true);
        if let Some(proxy) = &self.proxy {
            let proxy = reqwest::Proxy::all(proxy.as_str()).map_err(|e| BojError::Transport {
                url: None,
                kind: TransportKind::InvalidUrl,
                message: format!("invalid proxy: {e}"),
            })?;
            http = http.proxy(proxy);
        }
        if self.http2 {
            http = http.http2_prior_knowledge();
        }
        if let Some(max) = self.pool_max_idle_per_host {
            http = http.pool_max_idle_per_host(max);
        }
        let http = http.build().map_err(|e| BojError::Transport {
            url: None,
            kind: TransportKind::LocalProtocol,
            message: format!("failed to build HTTP client: {e}"),
        })?;

        let shutdown = self
            .shutdown
            .or_else(crate::shutdown::get_global_shutdown)
            .unwrap_or_else(ShutdownCoordinator::shared);

        let limiter = Arc::new(RateLimiter::new(self.config.rate_limit_per_sec));
        let exchange = ReqwestExchange::new(http, self.config.base_url.clone());
        let transport = Arc::new(
            Transport::new(exchange, limiter, self.retry)
                .with_shutdown(shutdown.clone())
                .with_capture_full_response(self.config.capture_full_response),
        );
        let config = Arc::new(self.config);
        let cache = Arc::new(FileCache::new(config.cache.clone()));

        Ok(BojClient {
            data: DataService::new(transport.clone(), config.clone(), cache.clone()),
            metadata: MetadataService::new(transport, config, cache),
            catalog: MessageCatalog,
            shutdown,
        })
    }
}
