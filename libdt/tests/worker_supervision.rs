#![cfg(unix)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, sleep, timeout};

use libdt::{ConfigEvent, DtError, Worker, WorkerConfig};

use common::{
    CLEAN_EXIT_SCRIPT, SLEEP_SCRIPT, clean_exit_once_script, crash_once_script, init_logs,
    write_script,
};

fn supervised_config() -> Arc<WorkerConfig> {
    let config = WorkerConfig::new();
    config.set_monitor_interval(Duration::from_millis(100));
    config.set_log_enabled(false);
    Arc::new(config)
}

async fn wait_until(what: &str, limit: Duration, mut check: impl AsyncFnMut() -> bool) {
    let start = Instant::now();
    while !check().await {
        assert!(start.elapsed() < limit, "timed out waiting for {what}");
        sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn second_start_fails_while_running() -> anyhow::Result<()> {
    init_logs();
    let dir = tempfile::tempdir()?;
    let config = supervised_config();
    config.set_path(write_script(dir.path(), "worker", SLEEP_SCRIPT));

    let worker = Worker::new(config);
    worker.start().await?;
    wait_until("worker to come up", Duration::from_secs(5), async || {
        worker.is_started().await
    })
    .await;

    let err = worker.start().await.unwrap_err();
    assert!(matches!(err, DtError::Binary(_)));
    assert!(worker.is_started().await, "first instance keeps running");

    worker.stop(Duration::from_millis(200)).await;
    Ok(())
}

#[tokio::test]
async fn crash_is_announced_and_restarted() -> anyhow::Result<()> {
    init_logs();
    let dir = tempfile::tempdir()?;
    let config = supervised_config();
    let marker = dir.path().join("crashed-once");
    config.set_path(write_script(
        dir.path(),
        "worker",
        &crash_once_script(&marker),
    ));
    let mut events = config.subscribe();

    let worker = Worker::new(config.clone());
    worker.start().await?;
    let port = config.detected_port().expect("port discovered on start");

    // First launch exits with code 3 and the supervisor announces it.
    let died = timeout(Duration::from_secs(10), async {
        loop {
            match events.recv().await.unwrap() {
                ConfigEvent::ProcessDied(code) => break code,
                _ => continue,
            }
        }
    })
    .await
    .expect("process death announced");
    assert_eq!(died, 3);

    // The relaunch reuses the discovered port and stays up.
    wait_until("worker to restart", Duration::from_secs(10), async || {
        worker.is_started().await
    })
    .await;
    assert_eq!(config.detected_port(), Some(port));

    worker.stop(Duration::from_millis(200)).await;
    Ok(())
}

#[tokio::test]
async fn clean_exit_is_not_restarted() {
    init_logs();
    let dir = tempfile::tempdir().unwrap();
    let config = supervised_config();
    config.set_path(write_script(dir.path(), "worker", CLEAN_EXIT_SCRIPT));
    let mut events = config.subscribe();

    let worker = Worker::new(config);
    worker.start().await.unwrap();

    // Give the monitor a few intervals to observe the zero exit.
    sleep(Duration::from_millis(600)).await;
    assert!(!worker.is_started().await);
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, ConfigEvent::ProcessDied(_)),
            "clean shutdown must not be reported as a death"
        );
    }

    worker.stop(Duration::from_millis(200)).await;
}

#[tokio::test]
async fn restart_after_clean_exit_stays_stopped_once_stopped() -> anyhow::Result<()> {
    init_logs();
    let dir = tempfile::tempdir()?;
    let config = supervised_config();
    let marker = dir.path().join("exited-once");
    config.set_path(write_script(
        dir.path(),
        "worker",
        &clean_exit_once_script(&marker),
    ));

    let worker = Worker::new(config);
    worker.start().await?;
    // Let the first monitor observe the clean exit; it must not relaunch.
    sleep(Duration::from_millis(600)).await;
    assert!(!worker.is_started().await);

    // Starting again from the clean-exit state retires the first monitor.
    worker.start().await?;
    wait_until("worker to come up", Duration::from_secs(5), async || {
        worker.is_started().await
    })
    .await;
    worker.stop(Duration::from_millis(200)).await;
    assert!(!worker.is_started().await);

    // Nothing left over may bring the process back.
    sleep(Duration::from_secs(2)).await;
    assert!(
        !worker.is_started().await,
        "worker must stay stopped after stop()"
    );
    Ok(())
}

#[tokio::test]
async fn stop_kills_within_grace() {
    init_logs();
    let dir = tempfile::tempdir().unwrap();
    let config = supervised_config();
    config.set_path(write_script(dir.path(), "worker", SLEEP_SCRIPT));

    let worker = Worker::new(config.clone());
    worker.start().await.unwrap();
    wait_until("worker to come up", Duration::from_secs(5), async || {
        worker.is_started().await
    })
    .await;

    let start = Instant::now();
    worker.stop(Duration::from_millis(300)).await;
    assert!(
        start.elapsed() < Duration::from_secs(5),
        "stop must not wait out the sleep"
    );
    assert!(!worker.is_started().await);
    assert_eq!(
        config.detected_port(),
        None,
        "discovered port is forgotten on stop"
    );
}

#[tokio::test]
async fn restart_cycle_discovers_port_again() {
    init_logs();
    let dir = tempfile::tempdir().unwrap();
    let config = supervised_config();
    config.set_path(write_script(dir.path(), "worker", SLEEP_SCRIPT));

    let worker = Worker::new(config.clone());
    worker.start().await.unwrap();
    assert!(config.detected_port().is_some());
    worker.stop(Duration::from_millis(200)).await;
    assert_eq!(config.detected_port(), None);

    worker.start().await.unwrap();
    assert!(config.detected_port().is_some());
    worker.stop(Duration::from_millis(200)).await;
}
