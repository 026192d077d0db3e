//! Data services: the pagination driver for `getDataCode` and
//! `getDataLayer`.
//!
//! One call runs: fingerprint → cache lookup → chunk plan → per-chunk
//! cursor loop (send → consistency guard → accumulate → advance) →
//! finalize (sort, attach meta) → cache store. Per-call progress is
//! strictly sequential; concurrency across calls shares the rate limiter
//! and cache underneath.
//!
//! On a pagination stall, a strict consistency failure, or cancellation at
//! a chunk boundary, a `complete=false` cache entry embedding the freshest
//! resume token is written before the error propagates, so a later call can
//! continue from where this one stopped.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info, warn};

use crate::cache::{CacheEndpoint, FileCache};
use crate::config::{ClientConfig, NORMALIZER_VERSION, PARSER_VERSION, SCHEMA_VERSION};
use crate::consistency::ConsistencyGuard;
use crate::error::{BojError, BojResult};
use crate::models::{ResponseMeta, TimeSeriesFrame};
use crate::normalize::expand_timeseries_rows;
use crate::pager::{
    advance_code_position, advance_layer_position, CodePagerState, LayerPagerState,
    LAYER_SERIES_CEILING,
};
use crate::resume::{
    build_request_fingerprint, create_resume_token, decode_resume_token, validate_resume_token,
    ResumeTokenState,
};
use crate::service::RecordAccumulator;
use crate::transport::{HttpExchange, SendOutcome, Transport};
use crate::validation::{
    canonical_params, normalize_code_periods, normalize_codes, normalize_db, normalize_layer,
    normalize_periods, normalize_raw_params, normalize_start_position,
    split_codes_by_frequency_and_size, validate_strict_auto_split,
};
use crate::{ConsistencyMode, Format, Frequency, Lang, OutputOrder};

const CODE_ENDPOINT: &str = "/getDataCode";
const LAYER_ENDPOINT: &str = "/getDataLayer";
const DATA_DATE_SEMANTICS: &str = "output_file_created_at";

/// Parameters for a `getDataCode` call.
#[derive(Debug, Clone)]
pub struct CodeQuery {
    /// DB identifier
    pub db: String,
    /// Series codes, order preserved
    pub codes: Vec<String>,
    /// Start period (YYYY or YYYYMM)
    pub start: Option<String>,
    /// End period (YYYY or YYYYMM)
    pub end: Option<String>,
    /// Explicit initial STARTPOSITION
    pub start_position: Option<u64>,
    /// Language override
    pub lang: Option<Lang>,
    /// Format override
    pub format: Option<Format>,
    /// strict_api override
    pub strict_api: Option<bool>,
    /// auto_split_codes override
    pub auto_split_codes: Option<bool>,
    /// Extra raw query parameters
    pub raw_params: BTreeMap<String, String>,
    /// Continuation token from an earlier interrupted call
    pub resume_token: Option<String>,
    /// Output ordering override
    pub output_order: Option<OutputOrder>,
}

impl CodeQuery {
    /// Query for `db` and the given codes.
    pub fn new<D, I>(db: D, codes: I) -> Self
    where
        D: Into<String>,
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            db: db.into(),
            codes: codes.into_iter().map(Into::into).collect(),
            start: None,
            end: None,
            start_position: None,
            lang: None,
            format: None,
            strict_api: None,
            auto_split_codes: None,
            raw_params: BTreeMap::new(),
            resume_token: None,
            output_order: None,
        }
    }

    /// Restrict to the period `[start, end]`.
    pub fn period(mut self, start: impl Into<String>, end: impl Into<String>) -> Self {
        self.start = Some(start.into());
        self.end = Some(end.into());
        self
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

    /// Override strict_api.
    pub fn strict_api(mut self, strict: bool) -> Self {
        self.strict_api = Some(strict);
        self
    }

    /// Override auto_split_codes.
    pub fn auto_split_codes(mut self, split: bool) -> Self {
        self.auto_split_codes = Some(split);
        self
    }

    /// Start pagination from an explicit position.
    pub fn start_position(mut self, position: u64) -> Self {
        self.start_position = Some(position);
        self
    }

    /// Attach one raw query parameter.
    pub fn raw_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.raw_params.insert(key.into(), value.into());
        self
    }

    /// Continue from a resume token.
    pub fn resume_token(mut self, token: impl Into<String>) -> Self {
        self.resume_token = Some(token.into());
        self
    }
}

/// Parameters for a `getDataLayer` call.
#[derive(Debug, Clone)]
pub struct LayerQuery {
    /// DB identifier
    pub db: String,
    /// Frequency filter (required by the endpoint)
    pub frequency: Frequency,
    /// Layer path, 1–5 elements, digits or `*`
    pub layer: Vec<String>,
    /// Start period
    pub start: Option<String>,
    /// End period
    pub end: Option<String>,
    /// Explicit initial STARTPOSITION
    pub start_position: Option<u64>,
    /// Language override
    pub lang: Option<Lang>,
    /// Format override
    pub format: Option<Format>,
    /// Follow NEXTPOSITION automatically (default true)
    pub auto_paginate: bool,
    /// Extra raw query parameters
    pub raw_params: BTreeMap<String, String>,
    /// Continuation token from an earlier interrupted call
    pub resume_token: Option<String>,
}

impl LayerQuery {
    /// Query for `db`, `frequency`, and the given layer path.
    pub fn new<D, I>(db: D, frequency: Frequency, layer: I) -> Self
    where
        D: Into<String>,
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            db: db.into(),
            frequency,
            layer: layer.into_iter().map(Into::into).collect(),
            start: None,
            end: None,
            start_position: None,
            lang: None,
            format: None,
            auto_paginate: true,
            raw_params: BTreeMap::new(),
            resume_token: None,
        }
    }

    /// Restrict to the period `[start, end]`.
    pub fn period(mut self, start: impl Into<String>, end: impl Into<String>) -> Self {
        self.start = Some(start.into());
        self.end = Some(end.into());
        self
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

    /// Fetch a single page only.
    pub fn single_page(mut self) -> Self {
        self.auto_paginate = false;
        self
    }

    /// Start pagination from an explicit position.
    pub fn start_position(mut self, position: u64) -> Self {
        self.start_position = Some(position);
        self
    }

    /// Continue from a resume token.
    pub fn resume_token(mut self, token: impl Into<String>) -> Self {
        self.resume_token = Some(token.into());
        self
    }
}

/// Fetches and paginates time-series data.
pub struct DataService<E> {
    transport: Arc<Transport<E>>,
    config: Arc<ClientConfig>,
    cache: Arc<FileCache>,
}

struct ResolvedModes {
    lang: Lang,
    format: Format,
    strict_api: bool,
    auto_split_codes: bool,
    output_order: OutputOrder,
}

#[allow(clippy::too_many_arguments)]
fn fingerprint_components(
    config: &ClientConfig,
    endpoint: &str,
    db: &str,
    codes: &[String],
    layer: &[String],
    frequency: Option<&str>,
    start: Option<&str>,
    end: Option<&str>,
    modes: &ResolvedModes,
    raw: &BTreeMap<String, String>,
) -> BTreeMap<String, serde_json::Value> {
    let mut components = BTreeMap::new();
    components.insert("api_origin".to_string(), json!(config.base_url));
    components.insert("endpoint".to_string(), json!(endpoint));
    components.insert("db".to_string(), json!(db));
    components.insert("code".to_string(), json!(codes));
    components.insert("layer".to_string(), json!(layer));
    components.insert("frequency".to_string(), json!(frequency));
    components.insert("start".to_string(), json!(start));
    components.insert("end".to_string(), json!(end));
    components.insert("strict_api".to_string(), json!(modes.strict_api));
    components.insert(
        "auto_split_codes".to_string(),
        json!(modes.auto_split_codes),
    );
    components.insert(
        "consistency_mode".to_string(),
        json!(config.consistency_mode.as_str()),
    );
    components.insert(
        "conflict_resolution".to_string(),
        json!(config.conflict_resolution.as_str()),
    );
    components.insert(
        "output_order".to_string(),
        json!(modes.output_order.as_str()),
    );
    components.insert("lang".to_string(), json!(modes.lang.as_str()));
    components.insert("format".to_string(), json!(modes.format.as_str()));
    components.insert("raw_params".to_string(), json!(canonical_params(raw)));
    components.insert("parser_version".to_string(), json!(PARSER_VERSION));
    components.insert("normalizer_version".to_string(), json!(NORMALIZER_VERSION));
    components.insert("schema_version".to_string(), json!(SCHEMA_VERSION));
    components
}

fn build_cache_key(
    api: &str,
    config: &ClientConfig,
    modes: &ResolvedModes,
    fingerprint: &str,
) -> String {
    format!(
        "api={api}|origin={origin}|lang={lang}|format={format}|parser={parser}|\
         normalizer={normalizer}|schema={schema}|strict_api={strict}|auto_split={split}|\
         consistency={consistency}|conflict={conflict}|output_order={order}|fp={fingerprint}",
        origin = config.base_url,
        lang = modes.lang.as_str(),
        format = modes.format.as_str(),
        parser = PARSER_VERSION,
        normalizer = NORMALIZER_VERSION,
        schema = SCHEMA_VERSION,
        strict = modes.strict_api,
        split = modes.auto_split_codes,
        consistency = config.consistency_mode.as_str(),
        conflict = config.conflict_resolution.as_str(),
        order = modes.output_order.as_str(),
    )
}

fn meta_from_outcome(
    outcome: &SendOutcome,
    config: &ClientConfig,
    resume_token: Option<String>,
    guard: &ConsistencyGuard,
    accumulator: &RecordAccumulator,
) -> ResponseMeta {
    ResponseMeta {
        status: outcome.parsed.status,
        message_id: outcome.parsed.message_id.clone(),
        message: outcome.parsed.message.clone(),
        date_raw: outcome.parsed.date_raw.clone(),
        date_parsed: outcome.parsed.date_parsed,
        date_parse_warning: outcome.parsed.date_parse_warning.clone(),
        date_semantics: DATA_DATE_SEMANTICS.to_string(),
        next_position: outcome.parsed.next_position,
        parameters: outcome.parsed.parameters.clone(),
        request_url: outcome.request_url.clone(),
        schema_version: SCHEMA_VERSION.to_string(),
        parser_version: PARSER_VERSION.to_string(),
        normalizer_version: NORMALIZER_VERSION.to_string(),
        resume_token,
        consistency_signal: guard.signal().map(String::from),
        consistency_details: if guard.crossed() {
            guard.details()
        } else {
            serde_json::Value::Null
        },
        conflict_resolution: config.conflict_resolution,
        conflicts_count: accumulator.conflicts_count(),
        conflicts_sample: accumulator.conflicts_sample().to_vec(),
        warnings: Vec::new(),
    }
}

impl<E: HttpExchange> DataService<E> {
    /// Wire a service over a transport, configuration, and cache.
    pub fn new(transport: Arc<Transport<E>>, config: Arc<ClientConfig>, cache: Arc<FileCache>) -> Self {
        Self {
            transport,
            config,
            cache,
        }
    }

    fn embedded_token(&self, cache_key: &str, endpoint: CacheEndpoint) -> Option<ResumeTokenState> {
        let hit = self
            .cache
            .get(cache_key, self.config.cache.mode, true, endpoint)?;
        if hit.envelope.complete {
            return None;
        }
        let token = hit
            .envelope
            .payload
            .get("meta")
            .and_then(|meta| meta.get("resume_token"))
            .and_then(|token| token.as_str())?;
        match decode_resume_token(token) {
            Ok(state) => Some(state),
            Err(error) => {
                warn!(%error, "ignoring undecodable token in incomplete cache entry");
                None
            }
        }
    }

    /// Pick the continuation point: the caller's token wins unless the
    /// embedded one has progressed to a later chunk.
    fn reconcile_tokens(
        caller: Option<ResumeTokenState>,
        embedded: Option<ResumeTokenState>,
    ) -> Option<ResumeTokenState> {
        match (caller, embedded) {
            (Some(caller), Some(embedded)) => {
                if embedded.chunk_index > caller.chunk_index {
                    Some(embedded)
                } else {
                    Some(caller)
                }
            }
            (caller, embedded) => caller.or(embedded),
        }
    }

    fn write_incomplete(
        &self,
        cache_key: &str,
        accumulator: &RecordAccumulator,
        base_meta: Option<&ResponseMeta>,
        token: Option<String>,
        order: OutputOrder,
    ) {
        let Some(token) = token else {
            return;
        };
        let mut meta = base_meta
            .cloned()
            .unwrap_or_else(|| ResponseMeta::empty(""));
        meta.resume_token = Some(token);
        let frame = TimeSeriesFrame {
            records: accumulator.sorted_records(order),
            meta,
        };
        let api_date = frame.meta.date_raw.clone();
        let snapshot = frame.last_update_snapshot();
        self.cache
            .put(cache_key, frame.to_cache_payload(), false, api_date, snapshot);
        debug!(cache_key, "stored incomplete entry with resume token");
    }

    fn abort(
        &self,
        error: BojError,
        cache_key: &str,
        accumulator: &RecordAccumulator,
        base_meta: Option<&ResponseMeta>,
        current_token: Option<String>,
        boundary_token: Option<String>,
        order: OutputOrder,
    ) -> BojError {
        // On cancellation only a crossed chunk boundary may be persisted;
        // everything else persists the freshest per-page token.
        let token = match &error {
            BojError::Cancelled => boundary_token,
            _ => current_token.or(boundary_token),
        };
        self.write_incomplete(cache_key, accumulator, base_meta, token, order);
        error
    }

    /// Fetch time-series data by explicit series codes.
    pub async fn get_data_code(&self, query: CodeQuery) -> BojResult<TimeSeriesFrame> {
        let config = &self.config;
        let strict_api = query.strict_api.unwrap_or(config.strict_api);
        let auto_split_codes = query.auto_split_codes.unwrap_or(config.auto_split_codes);
        validate_strict_auto_split(strict_api, auto_split_codes)?;

        let modes = ResolvedModes {
            lang: query.lang.unwrap_or(config.lang),
            format: query.format.unwrap_or(config.format),
            strict_api,
            auto_split_codes,
            output_order: query.output_order.unwrap_or(config.output_order),
        };
        let db = normalize_db(&query.db)?;
        let codes = normalize_codes(&query.codes)?;
        let raw = normalize_raw_params(&query.raw_params, config.allow_raw_override)?;
        let (start, end) = normalize_code_periods(query.start.as_deref(), query.end.as_deref())?;
        let explicit_position = normalize_start_position(query.start_position)?;

        let chunks: Vec<Vec<String>> = if strict_api || !auto_split_codes {
            vec![codes.clone()]
        } else {
            split_codes_by_frequency_and_size(&codes)
        };
        let mut code_order_map: BTreeMap<String, usize> = codes
            .iter()
            .enumerate()
            .map(|(index, code)| (code.clone(), index))
            .collect();

        let components = fingerprint_components(
            config,
            CODE_ENDPOINT,
            &db,
            &codes,
            &[],
            None,
            start.as_deref(),
            end.as_deref(),
            &modes,
            &raw,
        );
        let fingerprint = build_request_fingerprint(&components);
        let cache_key = build_cache_key("code", config, &modes, &fingerprint);

        if let Some(hit) =
            self.cache
                .get(&cache_key, config.cache.mode, false, CacheEndpoint::Code)
        {
            if !hit.stale {
                debug!(%fingerprint, "serving code call from cache");
                return TimeSeriesFrame::from_cache_payload(hit.envelope.payload);
            }
        }

        let caller_token = match &query.resume_token {
            Some(token) => {
                let state = decode_resume_token(token)?;
                validate_resume_token(
                    &state,
                    &fingerprint,
                    chunks.len(),
                    "code",
                    &config.base_url,
                    PARSER_VERSION,
                    NORMALIZER_VERSION,
                )?;
                Some(state)
            }
            None => None,
        };
        let embedded_token = self
            .embedded_token(&cache_key, CacheEndpoint::Code)
            .filter(|state| {
                validate_resume_token(
                    state,
                    &fingerprint,
                    chunks.len(),
                    "code",
                    &config.base_url,
                    PARSER_VERSION,
                    NORMALIZER_VERSION,
                )
                .is_ok()
            });

        let mut start_chunk_index = 0usize;
        let mut resume_position = explicit_position.unwrap_or(1);
        if let Some(state) = Self::reconcile_tokens(caller_token, embedded_token) {
            info!(
                chunk_index = state.chunk_index,
                next_position = state.next_position,
                "resuming code call from token"
            );
            start_chunk_index = state.chunk_index;
            resume_position = state.next_position;
            code_order_map = state.code_order_map;
        }

        let mut accumulator = RecordAccumulator::new();
        let mut guard = ConsistencyGuard::new(config.cache.publish_window);
        let mut last_meta: Option<ResponseMeta> = None;
        let mut current_token: Option<String> = None;
        let mut boundary_token: Option<String> = None;

        for (chunk_index, chunk) in chunks.iter().enumerate() {
            if chunk_index < start_chunk_index {
                continue;
            }
            let mut pager = if chunk_index == start_chunk_index {
                CodePagerState::resumed(chunk_index, resume_position)
            } else {
                CodePagerState::new(chunk_index)
            };
            let mut page_index = 0usize;

            loop {
                let params = code_params(&db, chunk, &modes, &pager, &start, &end, &raw);
                let outcome = match self
                    .transport
                    .send(CODE_ENDPOINT, &params, modes.lang, modes.format)
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(error) => {
                        return Err(self.abort(
                            error,
                            &cache_key,
                            &accumulator,
                            last_meta.as_ref(),
                            current_token.clone(),
                            boundary_token.clone(),
                            modes.output_order,
                        ));
                    }
                };

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

                if guard.observe(outcome.parsed.date_parsed.as_ref())
                    && config.consistency_mode == ConsistencyMode::Strict
                {
                    let error = BojError::Consistency {
                        signal: crate::consistency::SIGNAL_WINDOW_CROSSED.to_string(),
                        details: guard.details(),
                    };
                    return Err(self.abort(
                        error,
                        &cache_key,
                        &accumulator,
                        last_meta.as_ref(),
                        current_token.clone(),
                        boundary_token.clone(),
                        modes.output_order,
                    ));
                }

                let records =
                    expand_timeseries_rows(&outcome.parsed.rows, page_index, &code_order_map);
                debug!(
                    chunk_index,
                    page_index,
                    rows = records.len(),
                    next_position = ?outcome.parsed.next_position,
                    "absorbed code page"
                );
                if let Err(error) = accumulator.absorb(records, config.consistency_mode) {
                    return Err(self.abort(
                        error,
                        &cache_key,
                        &accumulator,
                        last_meta.as_ref(),
                        current_token.clone(),
                        boundary_token.clone(),
                        modes.output_order,
                    ));
                }

                let next_position = outcome.parsed.next_position;
                // Continuation points at the furthest progress: mid-chunk
                // that is the next cursor position, on natural completion
                // it is the start of the following chunk.
                let (token_chunk, token_position) = match next_position {
                    Some(next) if next > 0 => (chunk_index, next),
                    _ => (chunk_index + 1, 1),
                };
                let token = create_resume_token(
                    "code",
                    &config.base_url,
                    &fingerprint,
                    token_chunk,
                    token_position,
                    modes.lang.as_str(),
                    modes.format.as_str(),
                    PARSER_VERSION,
                    NORMALIZER_VERSION,
                    SCHEMA_VERSION,
                    &code_order_map,
                );
                current_token = Some(token.clone());
                last_meta = Some(meta_from_outcome(
                    &outcome,
                    config,
                    Some(token),
                    &guard,
                    &accumulator,
                ));
                page_index += 1;

                match advance_code_position(&mut pager, next_position) {
                    Ok(true) => continue,
                    Ok(false) => break,
                    Err(stall) => {
                        return Err(self.abort(
                            stall,
                            &cache_key,
                            &accumulator,
                            last_meta.as_ref(),
                            current_token.clone(),
                            boundary_token.clone(),
                            modes.output_order,
                        ));
                    }
                }
            }

            // The inner loop only breaks on natural completion, where the
            // freshest token is already the (i + 1, position 1) boundary.
            boundary_token = current_token.clone();
        }

        let frame = self.finalize(
            accumulator,
            guard,
            last_meta,
            &cache_key,
            modes.output_order,
        );
        Ok(frame)
    }

    /// Fetch time-series data by hierarchy position.
    pub async fn get_data_layer(&self, query: LayerQuery) -> BojResult<TimeSeriesFrame> {
        let config = &self.config;
        let modes = ResolvedModes {
            lang: query.lang.unwrap_or(config.lang),
            format: query.format.unwrap_or(config.format),
            strict_api: config.strict_api,
            auto_split_codes: config.auto_split_codes,
            output_order: config.output_order,
        };
        let db = normalize_db(&query.db)?;
        let layer = normalize_layer(&query.layer)?;
        let (start, end) =
            normalize_periods(query.start.as_deref(), query.end.as_deref(), query.frequency)?;
        let raw = normalize_raw_params(&query.raw_params, config.allow_raw_override)?;
        let explicit_position = normalize_start_position(query.start_position)?;

        let components = fingerprint_components(
            config,
            LAYER_ENDPOINT,
            &db,
            &[],
            &layer,
            Some(query.frequency.as_str()),
            start.as_deref(),
            end.as_deref(),
            &modes,
            &raw,
        );
        let fingerprint = build_request_fingerprint(&components);
        let cache_key = build_cache_key("layer", config, &modes, &fingerprint);

        if let Some(hit) =
            self.cache
                .get(&cache_key, config.cache.mode, false, CacheEndpoint::Layer)
        {
            if !hit.stale {
                debug!(%fingerprint, "serving layer call from cache");
                return TimeSeriesFrame::from_cache_payload(hit.envelope.payload);
            }
        }

        let caller_token = match &query.resume_token {
            Some(token) => {
                let state = decode_resume_token(token)?;
                validate_resume_token(
                    &state,
                    &fingerprint,
                    1,
                    "layer",
                    &config.base_url,
                    PARSER_VERSION,
                    NORMALIZER_VERSION,
                )?;
                Some(state)
            }
            None => None,
        };
        let embedded_token = self
            .embedded_token(&cache_key, CacheEndpoint::Layer)
            .filter(|state| {
                validate_resume_token(
                    state,
                    &fingerprint,
                    1,
                    "layer",
                    &config.base_url,
                    PARSER_VERSION,
                    NORMALIZER_VERSION,
                )
                .is_ok()
            });

        let mut pager = LayerPagerState::new(explicit_position.unwrap_or(1));
        let mut code_order_map: BTreeMap<String, usize> = BTreeMap::new();
        if let Some(state) = Self::reconcile_tokens(caller_token, embedded_token) {
            info!(
                next_position = state.next_position,
                "resuming layer call from token"
            );
            pager = LayerPagerState::new(state.next_position);
            code_order_map = state.code_order_map;
        }

        let mut accumulator = RecordAccumulator::new();
        let mut guard = ConsistencyGuard::new(config.cache.publish_window);
        let mut last_meta: Option<ResponseMeta> = None;
        let mut current_token: Option<String> = None;
        let mut page_index = 0usize;

        loop {
            let params = layer_params(&db, query.frequency, &layer, &modes, &pager, &start, &end, &raw);
            let outcome = match self
                .transport
                .send(LAYER_ENDPOINT, &params, modes.lang, modes.format)
                .await
            {
                Ok(outcome) => outcome,
                Err(error) => {
                    return Err(self.abort(
                        error,
                        &cache_key,
                        &accumulator,
                        last_meta.as_ref(),
                        current_token.clone(),
                        None,
                        modes.output_order,
                    ));
                }
            };

            if guard.observe(outcome.parsed.date_parsed.as_ref())
                && config.consistency_mode == ConsistencyMode::Strict
            {
                let error = BojError::Consistency {
                    signal: crate::consistency::SIGNAL_WINDOW_CROSSED.to_string(),
                    details: guard.details(),
                };
                return Err(self.abort(
                    error,
                    &cache_key,
                    &accumulator,
                    last_meta.as_ref(),
                    current_token.clone(),
                    None,
                    modes.output_order,
                ));
            }

            // A page at the series ceiling cannot be continued by cursor
            // arithmetic; the layer path itself must be narrowed.
            if outcome.parsed.rows.len() >= LAYER_SERIES_CEILING {
                let error = BojError::LayerOverflow {
                    row_count: outcome.parsed.rows.len(),
                    ceiling: LAYER_SERIES_CEILING,
                };
                return Err(self.abort(
                    error,
                    &cache_key,
                    &accumulator,
                    last_meta.as_ref(),
                    current_token.clone(),
                    None,
                    modes.output_order,
                ));
            }

            let mut records =
                expand_timeseries_rows(&outcome.parsed.rows, page_index, &code_order_map);
            // Layer results have no request order; series rank by first
            // appearance in the stream.
            for record in &mut records {
                let next_rank = code_order_map.len();
                let rank = *code_order_map
                    .entry(record.series_code.clone())
                    .or_insert(next_rank);
                record.original_code_index = Some(rank);
            }
            debug!(
                page_index,
                rows = records.len(),
                next_position = ?outcome.parsed.next_position,
                "absorbed layer page"
            );
            if let Err(error) = accumulator.absorb(records, config.consistency_mode) {
                return Err(self.abort(
                    error,
                    &cache_key,
                    &accumulator,
                    last_meta.as_ref(),
                    current_token.clone(),
                    None,
                    modes.output_order,
                ));
            }

            let next_position = outcome.parsed.next_position;
            let token = create_resume_token(
                "layer",
                &config.base_url,
                &fingerprint,
                0,
                next_position.unwrap_or(1),
                modes.lang.as_str(),
                modes.format.as_str(),
                PARSER_VERSION,
                NORMALIZER_VERSION,
                SCHEMA_VERSION,
                &code_order_map,
            );
            current_token = Some(token.clone());
            last_meta = Some(meta_from_outcome(
                &outcome,
                config,
                Some(token),
                &guard,
                &accumulator,
            ));
            page_index += 1;

            if !query.auto_paginate {
                break;
            }
            match advance_layer_position(&mut pager, next_position) {
                Ok(true) => continue,
                Ok(false) => break,
                Err(stall) => {
                    return Err(self.abort(
                        stall,
                        &cache_key,
                        &accumulator,
                        last_meta.as_ref(),
                        current_token.clone(),
                        None,
                        modes.output_order,
                    ));
                }
            }
        }

        let frame = self.finalize(
            accumulator,
            guard,
            last_meta,
            &cache_key,
            modes.output_order,
        );
        Ok(frame)
    }

    fn finalize(
        &self,
        accumulator: RecordAccumulator,
        guard: ConsistencyGuard,
        last_meta: Option<ResponseMeta>,
        cache_key: &str,
        order: OutputOrder,
    ) -> TimeSeriesFrame {
        let conflicts_count = accumulator.conflicts_count();
        let conflicts_sample = accumulator.conflicts_sample().to_vec();
        let records = accumulator.into_sorted(order);

        let mut meta = last_meta.unwrap_or_else(|| ResponseMeta::empty(""));
        meta.conflicts_count = conflicts_count;
        meta.conflicts_sample = conflicts_sample;
        meta.consistency_signal = guard.signal().map(String::from);
        if guard.crossed() {
            meta.consistency_details = guard.details();
        }

        let frame = TimeSeriesFrame { records, meta };
        let api_date = frame.meta.date_raw.clone();
        let snapshot = frame.last_update_snapshot();
        self.cache
            .put(cache_key, frame.to_cache_payload(), true, api_date, snapshot);
        info!(records = frame.records.len(), "call complete");
        frame
    }
}

fn code_params(
    db: &str,
    chunk: &[String],
    modes: &ResolvedModes,
    pager: &CodePagerState,
    start: &Option<String>,
    end: &Option<String>,
    raw: &BTreeMap<String, String>,
) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = vec![("DB".to_string(), db.to_string())];
    for code in chunk {
        params.push(("CODE".to_string(), code.clone()));
    }
    params.push(("LANG".to_string(), modes.lang.as_str().to_string()));
    params.push(("FORMAT".to_string(), modes.format.as_str().to_string()));
    if pager.start_position > 1 {
        params.push(("STARTPOSITION".to_string(), pager.start_position.to_string()));
    }
    if let Some(start) = start {
        params.push(("STARTDATE".to_string(), start.clone()));
    }
    if let Some(end) = end {
        params.push(("ENDDATE".to_string(), end.clone()));
    }
    for (key, value) in raw {
        params.push((key.clone(), value.clone()));
    }
    params
}

#[allow(clippy::too_many_arguments)]
fn layer_params(
    db: &str,
    frequency: Frequency,
    layer: &[String],
    modes: &ResolvedModes,
    pager: &LayerPagerState,
    start: &Option<String>,
    end: &Option<String>,
    raw: &BTreeMap<String, String>,
) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = vec![
        ("DB".to_string(), db.to_string()),
        ("FREQUENCY".to_string(), frequency.as_str().to_string()),
    ];
    for (index, value) in layer.iter().enumerate() {
        params.push((format!("LAYER{}", index + 1), value.clone()));
    }
    params.push(("LANG".to_string(), modes.lang.as_str().to_string()));
    params.push(("FORMAT".to_string(), modes.format.as_str().to_string()));
    if pager.start_position > 1 {
        params.push(("STARTPOSITION".to_string(), pager.start_position.to_string()));
    }
    if let Some(start) = start {
        params.push(("STARTDATE".to_string(), start.clone()));
    }
    if let Some(end) = end {
        params.push(("ENDDATE".to_string(), end.clone()));
    }
    for (key, value) in raw {
        params.push((key.clone(), value.clone()));
    }
    params
}
