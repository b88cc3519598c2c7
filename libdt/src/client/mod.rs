//! Client types owning the HTTP session, the worker supervisor and the
//! background health monitor.

mod blocking;
mod download;

pub use blocking::Client;

use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::Duration;

use log::debug;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigEvent, WorkerConfig};
use crate::error::DtError;
use crate::models::Status;
use crate::monitor::MonitorState;
use crate::utils::full_jitter;
use crate::worker::Worker;

const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

/// Construction options for a client.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Directory the worker binary is downloaded into.
    pub download_dir: PathBuf,
    /// Remove the download directory on start.
    pub clean: bool,
    /// Per-request timeout of the HTTP session.
    pub timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            download_dir: PathBuf::from("dt_download"),
            clean: false,
            timeout: Duration::from_secs(60),
        }
    }
}

struct ClientInner {
    config: Arc<WorkerConfig>,
    options: ClientOptions,
    session: StdRwLock<Option<reqwest::Client>>,
    monitor_state: StdMutex<MonitorState>,
    worker: Mutex<Option<Worker>>,
    tasks: StdMutex<CancellationToken>,
}

/// Asynchronous client to the data transfer worker.
///
/// Owns the shared [`WorkerConfig`], the supervised [`Worker`] and a cached
/// HTTP session bound to the worker's local API; reacts to port and token
/// changes announced by the config. Cheap to clone.
#[derive(Clone)]
pub struct AsyncClient {
    inner: Arc<ClientInner>,
}

impl AsyncClient {
    pub fn new(config: WorkerConfig) -> Self {
        Self::with_options(config, ClientOptions::default())
    }

    pub fn with_options(config: WorkerConfig, options: ClientOptions) -> Self {
        AsyncClient {
            inner: Arc::new(ClientInner {
                config: Arc::new(config),
                options,
                session: StdRwLock::new(None),
                monitor_state: StdMutex::new(MonitorState::new()),
                worker: Mutex::new(None),
                tasks: StdMutex::new(CancellationToken::new()),
            }),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.inner.config
    }

    /// Base URL of the worker's local API.
    pub fn base_api_url(&self) -> String {
        self.inner.config.url()
    }

    /// Whether the worker process is up and running.
    pub async fn is_started(&self) -> bool {
        match self.inner.worker.lock().await.as_ref() {
            Some(w) => w.is_started().await,
            None => false,
        }
    }

    /// The HTTP session, created lazily and rebuilt whenever the port or
    /// token changes.
    pub fn session(&self) -> Result<reqwest::Client, DtError> {
        if let Some(s) = self
            .inner
            .session
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            return Ok(s.clone());
        }
        let session = build_session(&self.inner.config, self.inner.options.timeout)?;
        *self
            .inner
            .session
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(session.clone());
        Ok(session)
    }

    /// Locate (downloading if needed) and launch the worker, then start the
    /// health monitor and configuration listener. Returns immediately when
    /// already started.
    pub async fn start(&self) -> Result<(), DtError> {
        let inner = &self.inner;
        let mut worker_slot = inner.worker.lock().await;
        if worker_slot.is_some() {
            return Ok(());
        }

        if inner.options.clean && inner.options.download_dir.exists() {
            if let Err(e) = tokio::fs::remove_dir_all(&inner.options.download_dir).await {
                debug!("Failed to clean download dir: {e}");
            }
        }

        self.lock_state().reset();
        download::prepare_platform_binary(
            &inner.config,
            &inner.options.download_dir,
            inner.options.timeout,
        )
        .await?;

        let worker = Worker::new(inner.config.clone());
        worker.start().await?;

        let tasks = CancellationToken::new();
        *inner.tasks.lock().unwrap_or_else(|e| e.into_inner()) = tasks.clone();
        tokio::spawn(event_listener(self.clone(), tasks.clone()));
        tokio::spawn(health_monitor(self.clone(), worker.clone(), tasks));

        *worker_slot = Some(worker);
        Ok(())
    }

    /// Tear everything down in reverse order: best-effort worker shutdown
    /// request, background tasks, then the process with a bounded grace
    /// period. No-op when not started.
    pub async fn stop(&self, grace: Duration) {
        let inner = &self.inner;
        let mut worker_slot = inner.worker.lock().await;
        let Some(worker) = worker_slot.take() else {
            return;
        };

        let cached = inner
            .session
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(session) = cached {
            let url = format!("{}/shutdown", inner.config.url());
            if let Err(e) = session.post(url).send().await {
                debug!("Shutdown request failed: {e}");
            }
        }

        inner
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .cancel();
        worker.stop(grace).await;
        *inner.session.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// [`AsyncClient::stop`] with the default five second grace period.
    pub async fn stop_default(&self) {
        self.stop(DEFAULT_STOP_GRACE).await;
    }

    /// Block until the worker responds with HTTP 200 or `timeout` elapses.
    pub async fn wait(&self, timeout: Duration, interval: Duration) -> Result<(), DtError> {
        let start = Instant::now();
        loop {
            if start.elapsed() > timeout {
                return Err(DtError::Timeout(
                    "timeout waiting for worker to start".to_string(),
                ));
            }
            match self.session()?.get(self.base_api_url()).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(_) => debug!("Waiting for worker to start"),
                Err(e) => {
                    if self.inner.config.debug() {
                        debug!("Error waiting for worker to start: {e}");
                    }
                }
            }
            sleep(full_jitter(interval)).await;
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, MonitorState> {
        self.inner
            .monitor_state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn cached_session(&self) -> Option<reqwest::Client> {
        self.inner
            .session
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn drop_session(&self) {
        *self
            .inner
            .session
            .write()
            .unwrap_or_else(|e| e.into_inner()) = None;
    }
}

fn build_session(config: &WorkerConfig, timeout: Duration) -> Result<reqwest::Client, DtError> {
    let mut headers = HeaderMap::new();
    if let Some(bearer) = config.bearer() {
        let value = HeaderValue::from_str(&bearer)
            .map_err(|e| DtError::InvalidArgument(format!("invalid token: {e}")))?;
        headers.insert(AUTHORIZATION, value);
    }
    let client = reqwest::Client::builder()
        .default_headers(headers)
        .danger_accept_invalid_certs(config.insecure())
        .timeout(timeout)
        .build()?;
    Ok(client)
}

/// Reacts to configuration changes: rebuilds the session on port changes,
/// refreshes the auth header and round-trips a request on token updates, and
/// resets the health state when the worker process dies.
async fn event_listener(client: AsyncClient, stop: CancellationToken) {
    let mut events = client.inner.config.subscribe();
    loop {
        let event = tokio::select! {
            _ = stop.cancelled() => break,
            ev = events.recv() => ev,
        };
        match event {
            Ok(ConfigEvent::PortChanged(port)) => {
                debug!("Port changed to {port}");
                client.drop_session();
            }
            Ok(ConfigEvent::TokenUpdated) => {
                client.drop_session();
                // Round-trip a request so the worker observes the new
                // credential before subsequent business calls.
                match client.session() {
                    Ok(session) => {
                        if let Err(e) = session.get(client.base_api_url()).send().await {
                            debug!("Error updating token: {e}");
                        }
                    }
                    Err(e) => debug!("Error updating token: {e}"),
                }
            }
            Ok(ConfigEvent::ProcessDied(_)) => {
                client.lock_state().reset();
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
    debug!("Config listener stopped");
}

/// Periodically probes the worker's readiness endpoint and classifies it as
/// ready / not-ready / failed. Purely diagnostic; restarts are the
/// supervisor's job and the two may disagree for an iteration.
async fn health_monitor(client: AsyncClient, worker: Worker, stop: CancellationToken) {
    loop {
        let interval = client.lock_state().sleep_for();
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = sleep(interval) => {}
        }

        let Some(session) = client.cached_session() else {
            continue;
        };
        let url = client.base_api_url();
        match session.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                let ready = resp.json::<Status>().await.map(|s| s.ready).unwrap_or(false);
                client.lock_state().mark_ready(ready);
                continue;
            }
            Ok(_) => {}
            Err(e) => {
                if client.inner.config.debug() {
                    debug!("URL: {url}");
                }
                let alive = worker.is_started().await;
                client.lock_state().mark_failed(Some(e.to_string()), alive);
                continue;
            }
        }
        let alive = worker.is_started().await;
        client.lock_state().report(alive);
    }
    debug!("Worker status monitor stopped");
}
