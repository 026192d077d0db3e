//! Blocking client adapter.
//!
//! Same engine, second entry point: a [`Client`] owns a private
//! current-thread runtime and drives the async services to completion on
//! the calling thread. The rate limiter, cache, and connection pool are the
//! ones inside the wrapped async client, so blocking and async callers
//! sharing a configuration can also share a limiter by sharing the client.

use crate::client::ClientBuilder;
use crate::error::{BojError, BojResult};
use crate::models::{MetadataFrame, TimeSeriesFrame};
use crate::service::data::{CodeQuery, LayerQuery};
use crate::service::metadata::MetadataQuery;
use crate::shutdown::SharedShutdown;

/// Blocking client for the BOJ Time-Series Statistical Data API.
pub struct Client {
    inner: crate::BojClient,
    runtime: tokio::runtime::Runtime,
}

impl Client {
    /// Build a blocking client from the shared builder.
    pub fn from_builder(builder: ClientBuilder) -> BojResult<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| {
                BojError::validation("runtime_unavailable", format!("failed to start runtime: {e}"))
            })?;
        // reqwest's pool needs a live runtime context during construction.
        let inner = runtime.block_on(async { builder.build() })?;
        Ok(Self { inner, runtime })
    }

    /// A blocking client with default configuration.
    pub fn new() -> BojResult<Self> {
        Self::from_builder(crate::BojClient::builder())
    }

    /// Fetch time-series data by explicit series codes.
    pub fn get_data_code(&self, query: CodeQuery) -> BojResult<TimeSeriesFrame> {
        self.runtime.block_on(self.inner.data().get_data_code(query))
    }

    /// Fetch time-series data by hierarchy position.
    pub fn get_data_layer(&self, query: LayerQuery) -> BojResult<TimeSeriesFrame> {
        self.runtime.block_on(self.inner.data().get_data_layer(query))
    }

    /// Fetch the metadata catalog for a DB.
    pub fn get_metadata(&self, query: MetadataQuery) -> BojResult<MetadataFrame> {
        self.runtime.block_on(self.inner.metadata().get(query))
    }

    /// Handle that cancels every in-flight and future call of this client.
    pub fn shutdown_handle(&self) -> SharedShutdown {
        self.inner.shutdown_handle()
    }
}
