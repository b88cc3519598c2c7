use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Port used when neither a selected nor a detected port is available.
pub const DEFAULT_PORT: u16 = 1091;
/// Default remote data transfer service URL.
pub const DEFAULT_DT_URL: &str = "https://localhost:8443/dt/api/v1";
const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_millis(500);

/// Notifications emitted when shared configuration changes at runtime.
///
/// Dependents register with [`WorkerConfig::subscribe`]; handlers are expected
/// to be fast since senders may sit on the request hot path.
#[derive(Debug, Clone)]
pub enum ConfigEvent {
    /// A new local port was discovered for the worker; cached sessions must
    /// be rebuilt.
    PortChanged(u16),
    /// The bearer token was replaced; the Authorization header must be
    /// refreshed and round-tripped to the worker.
    TokenUpdated,
    /// The worker process exited with the given code and is being restarted.
    ProcessDied(i32),
}

#[derive(Debug, Clone)]
struct ConfigValues {
    data_transfer_url: String,
    host: String,
    selected_port: Option<u16>,
    detected_port: Option<u16>,
    token: Option<String>,
    token_modified: DateTime<Utc>,
    insecure: bool,
    verbosity: u8,
    debug: bool,
    monitor_interval: Duration,
    log: bool,
    log_to_file: bool,
    path: Option<PathBuf>,
}

impl Default for ConfigValues {
    fn default() -> Self {
        ConfigValues {
            data_transfer_url: DEFAULT_DT_URL.to_string(),
            host: "127.0.0.1".to_string(),
            selected_port: None,
            detected_port: None,
            token: None,
            token_modified: Utc::now(),
            insecure: false,
            verbosity: 1,
            debug: false,
            monitor_interval: DEFAULT_MONITOR_INTERVAL,
            log: true,
            log_to_file: false,
            path: None,
        }
    }
}

/// Shared configuration describing how to launch and reach the worker.
///
/// One instance is owned per logical client and shared read-only with the
/// supervisor, the session layer and the health monitor. Mutation happens
/// through the enumerated setters only; port and token changes are announced
/// over a broadcast channel.
pub struct WorkerConfig {
    values: RwLock<ConfigValues>,
    events: broadcast::Sender<ConfigEvent>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerConfig {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        WorkerConfig {
            values: RwLock::new(ConfigValues::default()),
            events,
        }
    }

    /// Register for configuration change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigEvent> {
        self.events.subscribe()
    }

    pub fn data_transfer_url(&self) -> String {
        self.read().data_transfer_url.clone()
    }

    pub fn set_data_transfer_url(&self, url: impl Into<String>) {
        self.write().data_transfer_url = url.into();
    }

    pub fn host(&self) -> String {
        self.read().host.clone()
    }

    pub fn set_host(&self, host: impl Into<String>) {
        self.write().host = host.into();
    }

    /// Effective port: the user-selected port if pinned, otherwise the
    /// runtime-detected one, otherwise [`DEFAULT_PORT`].
    pub fn port(&self) -> u16 {
        let v = self.read();
        v.selected_port.or(v.detected_port).unwrap_or(DEFAULT_PORT)
    }

    pub fn selected_port(&self) -> Option<u16> {
        self.read().selected_port
    }

    /// Pin the local worker port instead of discovering one.
    pub fn set_port(&self, port: u16) {
        self.write().selected_port = Some(port);
    }

    pub fn detected_port(&self) -> Option<u16> {
        self.read().detected_port
    }

    /// Record a runtime-discovered port and announce it so cached sessions
    /// get rebuilt.
    pub(crate) fn set_detected_port(&self, port: u16) {
        self.write().detected_port = Some(port);
        let _ = self.events.send(ConfigEvent::PortChanged(port));
    }

    /// Forget the discovered port so the next supervisor lifetime re-runs
    /// discovery.
    pub(crate) fn clear_detected_port(&self) {
        self.write().detected_port = None;
    }

    /// Local worker API base URL built from the effective host and port.
    pub fn url(&self) -> String {
        format!("http://{}:{}/api/v1", self.host(), self.port())
    }

    pub fn token(&self) -> Option<String> {
        self.read().token.clone()
    }

    /// Replace the bearer credential. Stamps the modification time and
    /// announces the change so live sessions refresh their auth header.
    pub fn set_token(&self, token: impl Into<String>) {
        let token = token.into();
        {
            let mut v = self.write();
            if v.debug {
                let skip = token.chars().count().saturating_sub(10);
                let tail: String = token.chars().skip(skip).collect();
                debug!("Setting token to ...{tail}");
            }
            v.token = Some(token);
            v.token_modified = Utc::now();
        }
        let _ = self.events.send(ConfigEvent::TokenUpdated);
    }

    pub fn token_modified(&self) -> DateTime<Utc> {
        self.read().token_modified
    }

    /// Current token in `Bearer ...` header form.
    pub fn bearer(&self) -> Option<String> {
        self.read().token.as_ref().map(|t| prepare_token(t))
    }

    pub fn insecure(&self) -> bool {
        self.read().insecure
    }

    pub fn set_insecure(&self, insecure: bool) {
        self.write().insecure = insecure;
    }

    pub fn verbosity(&self) -> u8 {
        self.read().verbosity
    }

    pub fn set_verbosity(&self, verbosity: u8) {
        self.write().verbosity = verbosity;
    }

    pub fn debug(&self) -> bool {
        self.read().debug
    }

    pub fn set_debug(&self, debug: bool) {
        self.write().debug = debug;
    }

    pub fn monitor_interval(&self) -> Duration {
        self.read().monitor_interval
    }

    pub fn set_monitor_interval(&self, interval: Duration) {
        self.write().monitor_interval = interval;
    }

    pub fn log_enabled(&self) -> bool {
        self.read().log
    }

    pub fn set_log_enabled(&self, log: bool) {
        self.write().log = log;
    }

    pub fn log_to_file(&self) -> bool {
        self.read().log_to_file
    }

    pub fn set_log_to_file(&self, log_to_file: bool) {
        self.write().log_to_file = log_to_file;
    }

    /// Path to the worker executable, if located or pinned.
    pub fn path(&self) -> Option<PathBuf> {
        self.read().path.clone()
    }

    pub fn set_path(&self, path: impl AsRef<Path>) {
        self.write().path = Some(path.as_ref().to_path_buf());
    }

    pub(crate) fn notify_process_died(&self, code: i32) {
        let _ = self.events.send(ConfigEvent::ProcessDied(code));
    }

    /// Serializable view of the configuration values.
    ///
    /// The detected port is deliberately left out: it belongs to a worker
    /// process lifetime and is rediscovered on resume, never revived.
    pub fn snapshot(&self) -> ConfigSnapshot {
        let v = self.read();
        ConfigSnapshot {
            data_transfer_url: v.data_transfer_url.clone(),
            host: v.host.clone(),
            selected_port: v.selected_port,
            token: v.token.clone(),
            token_modified: v.token_modified,
            insecure: v.insecure,
            verbosity: v.verbosity,
            debug: v.debug,
            monitor_interval_secs: v.monitor_interval.as_secs_f64(),
            log: v.log,
            log_to_file: v.log_to_file,
            path: v.path.clone(),
        }
    }

    pub fn from_snapshot(s: ConfigSnapshot) -> Self {
        let config = WorkerConfig::new();
        {
            let mut v = config.write();
            v.data_transfer_url = s.data_transfer_url;
            v.host = s.host;
            v.selected_port = s.selected_port;
            v.token = s.token;
            v.token_modified = s.token_modified;
            v.insecure = s.insecure;
            v.verbosity = s.verbosity;
            v.debug = s.debug;
            v.monitor_interval = Duration::from_secs_f64(s.monitor_interval_secs);
            v.log = s.log;
            v.log_to_file = s.log_to_file;
            v.path = s.path;
        }
        config
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ConfigValues> {
        self.values.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ConfigValues> {
        self.values.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Persistable configuration values, excluding anything tied to a live
/// process or connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub data_transfer_url: String,
    pub host: String,
    pub selected_port: Option<u16>,
    pub token: Option<String>,
    pub token_modified: DateTime<Utc>,
    pub insecure: bool,
    pub verbosity: u8,
    pub debug: bool,
    pub monitor_interval_secs: f64,
    pub log: bool,
    pub log_to_file: bool,
    pub path: Option<PathBuf>,
}

/// Prefix a raw token with `Bearer ` unless it already carries the scheme.
pub fn prepare_token(token: &str) -> String {
    if token.starts_with("Bearer") {
        token.to_string()
    } else {
        format!("Bearer {token}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_port_resolution() {
        let config = WorkerConfig::new();
        assert_eq!(config.port(), DEFAULT_PORT);
        config.set_detected_port(4101);
        assert_eq!(config.port(), 4101);
        config.set_port(9000);
        assert_eq!(config.port(), 9000, "selected port wins over detected");
        assert_eq!(config.url(), "http://127.0.0.1:9000/api/v1");
    }

    #[test]
    fn token_update_stamps_and_notifies() {
        let config = WorkerConfig::new();
        let mut events = config.subscribe();
        let before = config.token_modified();
        config.set_token("abc123");
        assert!(config.token_modified() >= before);
        assert_eq!(config.bearer().as_deref(), Some("Bearer abc123"));
        match events.try_recv() {
            Ok(ConfigEvent::TokenUpdated) => {}
            other => panic!("expected TokenUpdated, got {other:?}"),
        }
    }

    #[test]
    fn multibyte_token_survives_debug_logging() {
        let config = WorkerConfig::new();
        config.set_debug(true);
        // 3-byte chars put the 10-bytes-from-the-end mark inside a char.
        config.set_token("€€€€");
        assert_eq!(config.token().as_deref(), Some("€€€€"));
    }

    #[test]
    fn bearer_prefix_is_not_doubled() {
        assert_eq!(prepare_token("Bearer xyz"), "Bearer xyz");
        assert_eq!(prepare_token("xyz"), "Bearer xyz");
    }

    #[test]
    fn snapshot_excludes_detected_port() {
        let config = WorkerConfig::new();
        config.set_token("tok");
        config.set_detected_port(5555);
        let snap = config.snapshot();
        let restored = WorkerConfig::from_snapshot(snap);
        assert_eq!(restored.token().as_deref(), Some("tok"));
        assert_eq!(restored.detected_port(), None);
        assert_eq!(restored.port(), DEFAULT_PORT);
    }
}
