//! Supervisor for the worker subprocess: launch, crash detection, restart
//! and bounded-grace shutdown.

mod logs;

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use log::{debug, error, warn};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, watch};
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::error::DtError;

const PREPARE_TIMEOUT: Duration = Duration::from_secs(5);
const RESTART_DELAY: Duration = Duration::from_secs(1);

/// Runs exactly one instance of the worker executable and keeps it running.
///
/// Crashes after a successful launch are restarted indefinitely; supervision
/// never gives up. Callers must use the readiness probes to detect degraded
/// states rather than assuming process liveness equals readiness.
#[derive(Clone)]
pub struct Worker {
    config: Arc<WorkerConfig>,
    child: Arc<Mutex<Option<Child>>>,
    stop: Arc<StdMutex<CancellationToken>>,
    prepared: Arc<watch::Sender<bool>>,
    ever_started: Arc<AtomicBool>,
}

impl Worker {
    pub fn new(config: Arc<WorkerConfig>) -> Self {
        let (prepared, _) = watch::channel(false);
        Worker {
            config,
            child: Arc::new(Mutex::new(None)),
            stop: Arc::new(StdMutex::new(CancellationToken::new())),
            prepared: Arc::new(prepared),
            ever_started: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Whether the worker process is up and running.
    pub async fn is_started(&self) -> bool {
        let mut child = self.child.lock().await;
        match child.as_mut() {
            Some(c) => matches!(c.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Launch the worker and its monitor task.
    ///
    /// Fails when a live process already exists or the executable path is
    /// missing. Blocks briefly for the argument-build ("prepared") signal and
    /// proceeds with a warning if it does not arrive in time; the monitor
    /// task launches the process asynchronously either way.
    pub async fn start(&self) -> Result<(), DtError> {
        {
            let mut child = self.child.lock().await;
            if let Some(c) = child.as_mut()
                && matches!(c.try_wait(), Ok(None))
            {
                return Err(DtError::Binary("worker already started".to_string()));
            }
            *child = None;
        }

        debug!("Starting worker ...");

        let path = self
            .config
            .path()
            .ok_or_else(|| DtError::Binary("worker binary path not set".to_string()))?;
        if !path.exists() {
            return Err(DtError::Binary(format!(
                "binary not found: {}",
                path.display()
            )));
        }
        ensure_executable(&path)?;

        let stop = CancellationToken::new();
        // A monitor loop from a previous lifetime may still be alive after a
        // clean worker exit; retire it before spawning the next one.
        std::mem::replace(&mut *self.lock_stop(), stop.clone()).cancel();
        self.prepared.send_replace(false);
        self.ever_started.store(true, Ordering::SeqCst);

        tokio::spawn(monitor_loop(
            self.config.clone(),
            self.child.clone(),
            stop,
            self.prepared.clone(),
        ));

        let mut prepared = self.prepared.subscribe();
        if timeout(PREPARE_TIMEOUT, prepared.wait_for(|v| *v))
            .await
            .is_err()
        {
            warn!("Worker did not prepare in time");
        }
        Ok(())
    }

    /// Stop the monitor task, then give the process up to `grace` to exit
    /// before killing it. No-op when nothing was ever started.
    pub async fn stop(&self, grace: Duration) {
        if !self.ever_started.load(Ordering::SeqCst) {
            return;
        }

        debug!("Stopping worker ...");
        self.lock_stop().cancel();
        self.prepared.send_replace(false);

        let poll = grace
            .div_f64(10.0)
            .max(Duration::from_millis(10));
        let start = Instant::now();
        loop {
            {
                let mut child = self.child.lock().await;
                match child.as_mut() {
                    None => break,
                    Some(c) => match c.try_wait() {
                        Ok(Some(_)) => {
                            *child = None;
                            break;
                        }
                        Ok(None) => {
                            if start.elapsed() > grace {
                                warn!("Worker did not stop in time, killing ...");
                                if let Err(e) = c.kill().await {
                                    debug!("Failed to kill worker: {e}");
                                }
                                *child = None;
                                break;
                            }
                        }
                        Err(e) => {
                            debug!("Failed to poll worker: {e}");
                            *child = None;
                            break;
                        }
                    },
                }
            }
            sleep(poll).await;
        }

        // A new supervisor lifetime re-runs port discovery.
        self.config.clear_detected_port();
    }

    fn lock_stop(&self) -> std::sync::MutexGuard<'_, CancellationToken> {
        self.stop.lock().unwrap_or_else(|e| e.into_inner())
    }
}

enum Tick {
    Launch,
    Restart(i32),
    Idle,
}

async fn monitor_loop(
    config: Arc<WorkerConfig>,
    slot: Arc<Mutex<Option<Child>>>,
    stop: CancellationToken,
    prepared: Arc<watch::Sender<bool>>,
) {
    loop {
        if stop.is_cancelled() {
            break;
        }

        let tick = {
            let mut child = slot.lock().await;
            match child.as_mut() {
                None => Tick::Launch,
                Some(c) => match c.try_wait() {
                    Ok(Some(status)) => {
                        let code = status.code().unwrap_or(-1);
                        if code != 0 {
                            // Exit code 0 is a clean shutdown; the handle
                            // stays put and nothing is relaunched.
                            *child = None;
                            Tick::Restart(code)
                        } else {
                            Tick::Idle
                        }
                    }
                    Ok(None) => Tick::Idle,
                    Err(e) => {
                        debug!("Failed to poll worker: {e}");
                        Tick::Idle
                    }
                },
            }
        };

        match tick {
            Tick::Launch => match prepare(&config) {
                Ok(args) => {
                    prepared.send_replace(true);
                    debug!("Starting worker: {}", redacted_command(&config, &args));
                    match launch(&config, &args, &stop) {
                        Ok(child) => {
                            *slot.lock().await = Some(child);
                        }
                        Err(e) => error!("Failed to launch worker: {e}"),
                    }
                }
                Err(e) => error!("Failed to prepare worker arguments: {e}"),
            },
            Tick::Restart(code) => {
                warn!("Worker exited with code {code}, restarting ...");
                prepared.send_replace(false);
                config.notify_process_died(code);
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = sleep(RESTART_DELAY) => {}
                }
                continue;
            }
            Tick::Idle => {}
        }

        tokio::select! {
            _ = stop.cancelled() => break,
            _ = sleep(config.monitor_interval()) => {}
        }
    }
    debug!("Worker monitor stopped");
}

/// Resolve the local port (discovering an ephemeral one exactly once per
/// supervisor lifetime) and build the worker command line.
fn prepare(config: &WorkerConfig) -> Result<Vec<String>, DtError> {
    if config.selected_port().is_none() && config.detected_port().is_none() {
        let port = find_open_port(&config.host())?;
        config.set_detected_port(port);
    }
    Ok(build_args(config))
}

fn find_open_port(host: &str) -> std::io::Result<u16> {
    let listener = std::net::TcpListener::bind((host, 0))?;
    Ok(listener.local_addr()?.port())
}

fn build_args(config: &WorkerConfig) -> Vec<String> {
    let mut log_types = vec!["console"];
    if config.log_to_file() {
        log_types.push("file");
    }

    let mut args = vec![
        "--log-types".to_string(),
        log_types.join(","),
        "--host".to_string(),
        config.host(),
        "--port".to_string(),
        config.port().to_string(),
        "--dt-url".to_string(),
        config.data_transfer_url(),
        "-v".to_string(),
        config.verbosity().to_string(),
    ];
    if config.insecure() {
        args.push("--insecure".to_string());
    }
    if config.debug() {
        args.push("--debug".to_string());
    }
    if let Some(bearer) = config.bearer() {
        args.push("-t".to_string());
        args.push(bearer);
    }
    args
}

fn redacted_command(config: &WorkerConfig, args: &[String]) -> String {
    let path = config
        .path()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    let mut line = format!("{path} {}", args.join(" "));
    if let Some(token) = config.token() {
        line = line.replace(&token, "***");
    }
    line
}

fn launch(
    config: &WorkerConfig,
    args: &[String],
    stop: &CancellationToken,
) -> Result<Child, DtError> {
    let path = config
        .path()
        .ok_or_else(|| DtError::Binary("worker binary path not set".to_string()))?;
    let mut child = Command::new(&path)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    if config.log_enabled() {
        let debug = config.debug();
        if let Some(stdout) = child.stdout.take() {
            logs::spawn_relay(stdout, debug, stop.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            logs::spawn_relay(stderr, debug, stop.clone());
        }
    }
    Ok(child)
}

pub(crate) fn ensure_executable(path: &Path) -> Result<(), DtError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let meta = std::fs::metadata(path)?;
        let mut perms = meta.permissions();
        if perms.mode() & 0o111 == 0 {
            debug!("Marking binary as executable: {}", path.display());
            perms.set_mode(perms.mode() | 0o755);
            std::fs::set_permissions(path, perms)?;
        }
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}
