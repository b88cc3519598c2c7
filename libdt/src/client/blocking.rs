//! Blocking facade over [`AsyncClient`], backed by an owned multi-thread
//! runtime.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Runtime;

use crate::config::WorkerConfig;
use crate::error::DtError;

use super::{AsyncClient, ClientOptions};

/// Synchronous client to the data transfer worker.
///
/// Wraps an [`AsyncClient`] and drives it on a dedicated runtime, so it can
/// be used from plain threads. Must not be created inside an async context.
#[derive(Clone)]
pub struct Client {
    inner: AsyncClient,
    rt: Arc<Runtime>,
}

impl Client {
    pub fn new(config: WorkerConfig) -> Result<Self, DtError> {
        Self::with_options(config, ClientOptions::default())
    }

    pub fn with_options(config: WorkerConfig, options: ClientOptions) -> Result<Self, DtError> {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        Ok(Client {
            inner: AsyncClient::with_options(config, options),
            rt: Arc::new(rt),
        })
    }

    pub fn config(&self) -> &WorkerConfig {
        self.inner.config()
    }

    pub fn base_api_url(&self) -> String {
        self.inner.base_api_url()
    }

    /// The underlying async client, for callers that mix styles.
    pub fn async_client(&self) -> &AsyncClient {
        &self.inner
    }

    pub fn is_started(&self) -> bool {
        self.block_on(self.inner.is_started())
    }

    pub fn start(&self) -> Result<(), DtError> {
        self.block_on(self.inner.start())
    }

    pub fn stop(&self, grace: Duration) {
        self.block_on(self.inner.stop(grace))
    }

    pub fn stop_default(&self) {
        self.block_on(self.inner.stop_default())
    }

    pub fn wait(&self, timeout: Duration, interval: Duration) -> Result<(), DtError> {
        self.block_on(self.inner.wait(timeout, interval))
    }

    pub(crate) fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.rt.block_on(fut)
    }
}
