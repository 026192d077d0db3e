//! Metadata service: `getMetadata` pass-through with its own freshness
//! rule.
//!
//! Metadata responses are not paginated. Their DATE field reflects when the
//! server's catalog was generated, so the cache treats a metadata entry
//! observed before the most recent publish window as stale regardless of
//! TTL.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info};

use crate::cache::{CacheEndpoint, FileCache};
use crate::config::{ClientConfig, NORMALIZER_VERSION, PARSER_VERSION, SCHEMA_VERSION};
use crate::error::{BojError, BojResult};
use crate::models::{MetadataFrame, ResponseMeta};
use crate::normalize::normalize_metadata_rows;
use crate::resume::build_request_fingerprint;
use crate::transport::{HttpExchange, Transport};
use crate::validation::{canonical_params, normalize_db, normalize_raw_params};
use crate::{ConflictResolution, Format, Lang};

const METADATA_ENDPOINT: &str = "/getMetadata";
const METADATA_DATE_SEMANTICS: &str = "system_data_created_at";

/// Parameters for a `getMetadata` call.
#[derive(Debug, Clone)]
pub struct MetadataQuery {
    /// DB identifier
    pub db: String,
    /// Language override
    pub lang: Option<Lang>,
    /// Format override
    pub format: Option<Format>,
    /// Extra raw query parameters
    pub raw_params: BTreeMap<String, String>,
}

impl MetadataQuery {
    /// Query the catalog of `db`.
    pub fn new(db: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            lang: None,
            format: None,
            raw_params: BTreeMap::new(),
        }
    }

    /// Override the language.
    pub fn lang(mut self, lang: Lang) -> Self {
        self.lang = Some(lang);
        self
    }

    /// Override the format.
    pub fn format(mut self, format: Format) -> Self {
        self.format = Some(format);
        self
    }

    /// Attach one raw query parameter.
    pub fn raw_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.raw_params.insert(key.into(), value.into());
        self
    }
}

/// Fetches series catalogs.
pub struct MetadataService<E> {
    transport: Arc<Transport<E>>,
    config: Arc<ClientConfig>,
    cache: Arc<FileCache>,
}

impl<E: HttpExchange> MetadataService<E> {
    /// Wire a service over a transport, configuration, and cache.
    pub fn new(transport: Arc<Transport<E>>, config: Arc<ClientConfig>, cache: Arc<FileCache>) -> Self {
        Self {
            transport,
            config,
            cache,
        }
    }

    /// Fetch the metadata catalog for a DB.
    pub async fn get(&self, query: MetadataQuery) -> BojResult<MetadataFrame> {
        let config = &self.config;
        let db = normalize_db(&query.db)?;
        let lang = query.lang.unwrap_or(config.lang);
        let format = query.format.unwrap_or(config.format);
        let raw = normalize_raw_params(&query.raw_params, config.allow_raw_override)?;

        let mut components = BTreeMap::new();
        components.insert("api_origin".to_string(), json!(config.base_url));
        components.insert("endpoint".to_string(), json!(METADATA_ENDPOINT));
        components.insert("db".to_string(), json!(db));
        components.insert("lang".to_string(), json!(lang.as_str()));
        components.insert("format".to_string(), json!(format.as_str()));
        components.insert("raw_params".to_string(), json!(canonical_params(&raw)));
        components.insert("parser_version".to_string(), json!(PARSER_VERSION));
        components.insert("normalizer_version".to_string(), json!(NORMALIZER_VERSION));
        components.insert("schema_version".to_string(), json!(SCHEMA_VERSION));
        let fingerprint = build_request_fingerprint(&components);

        let cache_key = format!(
            "api=metadata|origin={origin}|lang={lang}|format={format}|parser={parser}|\
             normalizer={normalizer}|schema={schema}|fp={fingerprint}",
            origin = config.base_url,
            lang = lang.as_str(),
            format = format.as_str(),
            parser = PARSER_VERSION,
            normalizer = NORMALIZER_VERSION,
            schema = SCHEMA_VERSION,
        );

        if let Some(hit) =
            self.cache
                .get(&cache_key, config.cache.mode, false, CacheEndpoint::Metadata)
        {
            if !hit.stale {
                debug!(%fingerprint, "serving metadata from cache");
                return MetadataFrame::from_cache_payload(hit.envelope.payload);
            }
        }

        let mut params: Vec<(String, String)> = vec![
            ("DB".to_string(), db.clone()),
            ("LANG".to_string(), lang.as_str().to_string()),
            ("FORMAT".to_string(), format.as_str().to_string()),
        ];
        for (key, value) in &raw {
            params.push((key.clone(), value.clone()));
        }

        let outcome = self
            .transport
            .send(METADATA_ENDPOINT, &params, lang, format)
            .await?;

        if let Some(warning) = &outcome.parsed.date_parse_warning {
            if config.metadata_freshness_strict {
                return Err(BojError::DateParse {
                    raw: outcome
                        .parsed
                        .date_raw
                        .clone()
                        .unwrap_or_else(|| warning.clone()),
                });
            }
        }

        let records = normalize_metadata_rows(&outcome.parsed.rows);
        let mut parameters = outcome.parsed.parameters.clone();
        if let Some(db_echo) = &outcome.parsed.db {
            parameters
                .entry("DB".to_string())
                .or_insert_with(|| Some(db_echo.clone()));
        }

        let meta = ResponseMeta {
            status: outcome.parsed.status,
            message_id: outcome.parsed.message_id.clone(),
            message: outcome.parsed.message.clone(),
            date_raw: outcome.parsed.date_raw.clone(),
            date_parsed: outcome.parsed.date_parsed,
            date_parse_warning: outcome.parsed.date_parse_warning.clone(),
            date_semantics: METADATA_DATE_SEMANTICS.to_string(),
            next_position: None,
            parameters,
            request_url: outcome.request_url.clone(),
            schema_version: SCHEMA_VERSION.to_string(),
            parser_version: PARSER_VERSION.to_string(),
            normalizer_version: NORMALIZER_VERSION.to_string(),
            resume_token: None,
            consistency_signal: None,
            consistency_details: serde_json::Value::Null,
            conflict_resolution: ConflictResolution::LatestLastUpdate,
            conflicts_count: 0,
            conflicts_sample: Vec::new(),
            warnings: Vec::new(),
        };

        let frame = MetadataFrame { records, meta };
        let api_date = frame.meta.date_raw.clone();
        let snapshot = frame
            .records
            .iter()
            .filter_map(|record| record.last_update.as_deref())
            .max()
            .map(String::from);
        self.cache
            .put(&cache_key, frame.to_cache_payload(), true, api_date, snapshot);
        info!(records = frame.records.len(), %db, "metadata call complete");
        Ok(frame)
    }
}
