#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};

use libdt::models::{OpIdResponse, Operation, OperationState, OpsResponse, Status};

/// Route worker log output through env_logger so failures are readable with
/// `RUST_LOG=debug`.
pub fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// In-process stand-in for the worker's local HTTP API. Scripted per test:
/// readiness flips after a number of probes, operations step through
/// predefined state sequences, and every Authorization header is captured.
pub struct FakeWorker {
    pub addr: SocketAddr,
    pub state: Arc<FakeState>,
}

#[derive(Default)]
pub struct FakeState {
    pub not_ready_rounds: AtomicU32,
    pub status_hits: AtomicU32,
    pub ops_hits: AtomicU32,
    pub shutdowns: AtomicU32,
    pub auth_seen: Mutex<Vec<String>>,
    pub last_ids: Mutex<Vec<String>>,
    ops: Mutex<HashMap<String, Vec<Operation>>>,
}

impl FakeWorker {
    pub async fn spawn() -> Self {
        let state = Arc::new(FakeState::default());
        let app = Router::new()
            .route("/api/v1", get(status))
            .route("/api/v1/operations", get(operations))
            .route("/api/v1/storage:copy", post(storage_verb))
            .route("/api/v1/storage:exists", post(storage_verb))
            .route("/api/v1/shutdown", post(shutdown))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake worker");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        FakeWorker { addr, state }
    }

    /// Answer `ready: false` for the next `rounds` status probes.
    pub fn not_ready_for(&self, rounds: u32) {
        self.state.not_ready_rounds.store(rounds, Ordering::SeqCst);
    }

    /// Script the states an operation steps through, one per poll; the last
    /// state repeats forever.
    pub fn script_op(&self, id: &str, states: &[OperationState]) {
        let seq = states
            .iter()
            .map(|state| Operation {
                id: id.to_string(),
                state: *state,
                ..Operation::default()
            })
            .collect();
        self.state
            .ops
            .lock()
            .expect("ops lock")
            .insert(id.to_string(), seq);
    }

    pub fn auth_seen(&self) -> Vec<String> {
        self.state.auth_seen.lock().expect("auth lock").clone()
    }
}

fn record_auth(state: &FakeState, headers: &HeaderMap) {
    if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        state
            .auth_seen
            .lock()
            .expect("auth lock")
            .push(auth.to_string());
    }
}

async fn status(State(state): State<Arc<FakeState>>, headers: HeaderMap) -> Json<Status> {
    record_auth(&state, &headers);
    state.status_hits.fetch_add(1, Ordering::SeqCst);
    let ready = if state.not_ready_rounds.load(Ordering::SeqCst) > 0 {
        state.not_ready_rounds.fetch_sub(1, Ordering::SeqCst);
        false
    } else {
        true
    };
    Json(Status {
        ready,
        ..Status::default()
    })
}

async fn operations(
    State(state): State<Arc<FakeState>>,
    headers: HeaderMap,
    Query(params): Query<Vec<(String, String)>>,
) -> Json<OpsResponse> {
    record_auth(&state, &headers);
    state.ops_hits.fetch_add(1, Ordering::SeqCst);
    let ids: Vec<String> = params
        .into_iter()
        .filter(|(k, _)| k == "ids")
        .map(|(_, v)| v)
        .collect();
    *state.last_ids.lock().expect("ids lock") = ids.clone();

    let mut scripted = state.ops.lock().expect("ops lock");
    let list = ids
        .iter()
        .map(|id| match scripted.get_mut(id) {
            Some(seq) if seq.len() > 1 => seq.remove(0),
            Some(seq) if seq.len() == 1 => seq[0].clone(),
            _ => Operation {
                id: id.clone(),
                ..Operation::default()
            },
        })
        .collect();
    Json(OpsResponse {
        operations: Some(list),
    })
}

async fn storage_verb(
    State(state): State<Arc<FakeState>>,
    headers: HeaderMap,
    Json(_body): Json<serde_json::Value>,
) -> Json<OpIdResponse> {
    record_auth(&state, &headers);
    Json(OpIdResponse {
        id: "abc".to_string(),
        location: None,
    })
}

async fn shutdown(State(state): State<Arc<FakeState>>) {
    state.shutdowns.fetch_add(1, Ordering::SeqCst);
}

/// Drop an executable shell script into `dir` and return its path.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).expect("write script");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("chmod script");
    }
    path
}

/// A worker stand-in that just stays alive.
pub const SLEEP_SCRIPT: &str = "#!/bin/sh\nsleep 30\n";

/// A worker stand-in that shuts down cleanly right away.
pub const CLEAN_EXIT_SCRIPT: &str = "#!/bin/sh\nexit 0\n";

/// A worker stand-in that crashes on its first launch and stays alive on
/// every launch after that.
pub fn crash_once_script(marker: &Path) -> String {
    format!(
        "#!/bin/sh\nif [ ! -f {m} ]; then touch {m}; exit 3; fi\nsleep 30\n",
        m = marker.display()
    )
}

/// A worker stand-in that shuts down cleanly on its first launch and stays
/// alive on every launch after that.
pub fn clean_exit_once_script(marker: &Path) -> String {
    format!(
        "#!/bin/sh\nif [ ! -f {m} ]; then touch {m}; exit 0; fi\nsleep 30\n",
        m = marker.display()
    )
}
