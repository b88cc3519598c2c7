//! Typed payloads for the worker's local HTTP API.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of a server-tracked asynchronous operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationState {
    #[default]
    Unknown,
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl OperationState {
    /// Succeeded and Failed are terminal; everything else keeps the poller
    /// waiting.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationState::Succeeded | OperationState::Failed)
    }
}

/// One asynchronous unit of work tracked by the worker. Created and mutated
/// server-side only; the client reads and polls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Operation {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub state: OperationState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_current: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_total: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queued_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Child operation ids when this is a one-level operation group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<String>>,
    /// Expanded child snapshots, when the worker includes them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children_detail: Option<Vec<Operation>>,
    /// Verb-dependent payload: boolean, mapping or structured value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Remotes that the operation succeeded on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub succeeded_on: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_revision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_hash: Option<String>,
}

/// Readiness/status payload from `GET /`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Status {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_info: Option<BuildInfo>,
    #[serde(default)]
    pub ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
}

/// Response to a storage verb: the id of the operation it queued.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpIdResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpsResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operations: Option<Vec<Operation>>,
}

/// A path on one of the worker's configured storage remotes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoragePath {
    pub path: String,
    #[serde(default = "default_remote")]
    pub remote: String,
}

impl StoragePath {
    pub fn new(path: impl Into<String>) -> Self {
        StoragePath {
            path: path.into(),
            remote: default_remote(),
        }
    }

    pub fn on_remote(path: impl Into<String>, remote: impl Into<String>) -> Self {
        StoragePath {
            path: path.into(),
            remote: remote.into(),
        }
    }
}

fn default_remote() -> String {
    "any".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SrcDst {
    pub src: StoragePath,
    pub dst: StoragePath,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PathOperations {
    pub operations: Vec<StoragePath>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SrcDstOperations {
    pub operations: Vec<SrcDst>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfigResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleType {
    Reader,
    Writer,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectType {
    User,
    Group,
    Any,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Resource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "type")]
    pub resource_type: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Subject {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "type")]
    pub subject_type: Option<SubjectType>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleAssignment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<Resource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<RoleType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Subject>,
}

/// Same shape as [`RoleAssignment`], used when querying permissions.
pub type RoleQuery = RoleAssignment;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PermissionsRequest {
    pub permissions: Vec<RoleAssignment>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckPermissionsResponse {
    #[serde(default)]
    pub allowed: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetPermissionsResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Vec<RoleAssignment>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct GetMetadataRequest {
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SetMetadataRequest {
    pub metadata: HashMap<String, serde_json::Value>,
}
