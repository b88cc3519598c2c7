//! High-level surface over the worker's local HTTP API: storage verbs,
//! permissions, metadata and the operation poller.

mod handler;

use std::collections::HashMap;
use std::time::Duration;

use log::debug;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::time::{Instant, sleep};

use crate::client::{AsyncClient, Client};
use crate::error::{DtError, check_status};
use crate::models::{
    CheckPermissionsResponse, GetMetadataRequest, GetPermissionsResponse, OpIdResponse, Operation,
    OpsResponse, PathOperations, PermissionsRequest, RoleAssignment, RoleQuery,
    SetMetadataRequest, SrcDst, SrcDstOperations, Status, StorageConfigResponse, StoragePath,
};
use crate::retry::{RetryPolicy, retry};
use crate::utils::{duration_string, expo_backoff, full_jitter};

use handler::WaitHandler;

const NOT_READY_SLEEP: Duration = Duration::from_secs(1);

/// Anything that names a server-side operation.
pub trait AsOperationId {
    fn operation_id(&self) -> &str;
}

impl AsOperationId for String {
    fn operation_id(&self) -> &str {
        self
    }
}

impl AsOperationId for &str {
    fn operation_id(&self) -> &str {
        self
    }
}

impl AsOperationId for Operation {
    fn operation_id(&self) -> &str {
        &self.id
    }
}

impl AsOperationId for OpIdResponse {
    fn operation_id(&self) -> &str {
        &self.id
    }
}

/// Pacing for [`AsyncDataTransferApi::wait_for`].
#[derive(Debug, Clone)]
pub struct WaitOptions {
    /// Give up with [`DtError::Timeout`] after this much wall time.
    pub timeout: Option<Duration>,
    /// First poll interval; grows exponentially.
    pub interval: Duration,
    /// Upper bound on the poll interval.
    pub cap: Duration,
}

impl Default for WaitOptions {
    fn default() -> Self {
        WaitOptions {
            timeout: None,
            interval: Duration::from_millis(100),
            cap: Duration::from_secs(2),
        }
    }
}

/// Async API client. All calls go through the retry policy; storage verbs
/// return the queued operation's id, to be passed to
/// [`AsyncDataTransferApi::wait_for`].
#[derive(Clone)]
pub struct AsyncDataTransferApi {
    client: AsyncClient,
    policy: RetryPolicy,
}

impl AsyncDataTransferApi {
    pub fn new(client: AsyncClient) -> Self {
        Self::with_policy(client, RetryPolicy::from_env())
    }

    pub fn with_policy(client: AsyncClient, policy: RetryPolicy) -> Self {
        AsyncDataTransferApi { client, policy }
    }

    /// Fetches the worker's status. With `wait` set, keeps polling until the
    /// worker reports ready or `timeout` elapses.
    pub async fn status(&self, wait: bool, timeout: Duration) -> Result<Status, DtError> {
        let start = Instant::now();
        loop {
            let client = self.client.clone();
            let status = retry(&self.policy, "status", move || {
                let client = client.clone();
                async move {
                    let resp = client.session()?.get(client.base_api_url()).send().await?;
                    let resp = check_status(resp).await?;
                    Ok(resp.json::<Status>().await?)
                }
            })
            .await?;
            if !wait || status.ready {
                return Ok(status);
            }
            if start.elapsed() > timeout {
                return Err(DtError::Timeout(format!(
                    "worker not ready after {}",
                    duration_string(timeout)
                )));
            }
            debug!("Worker not ready yet");
            sleep(full_jitter(NOT_READY_SLEEP)).await;
        }
    }

    /// Fetches the current snapshots of the given operations, in one batched
    /// request.
    pub async fn operations(&self, ids: &[String]) -> Result<Vec<Operation>, DtError> {
        if ids.is_empty() {
            return Err(DtError::InvalidArgument(
                "no operation ids given".to_string(),
            ));
        }
        let client = self.client.clone();
        let ids = ids.to_vec();
        retry(&self.policy, "operations", move || {
            let client = client.clone();
            let ids = ids.clone();
            async move {
                let url = format!("{}/operations", client.base_api_url());
                let query: Vec<(&str, &str)> =
                    ids.iter().map(|id| ("ids", id.as_str())).collect();
                let resp = client.session()?.get(url).query(&query).send().await?;
                let resp = check_status(resp).await?;
                let ops: OpsResponse = resp.json().await?;
                Ok(ops.operations.unwrap_or_default())
            }
        })
        .await
    }

    pub async fn copy(&self, items: &[SrcDst]) -> Result<OpIdResponse, DtError> {
        self.post(
            "copy",
            "storage:copy",
            &SrcDstOperations {
                operations: items.to_vec(),
            },
        )
        .await
    }

    pub async fn mv(&self, items: &[SrcDst]) -> Result<OpIdResponse, DtError> {
        self.post(
            "move",
            "storage:move",
            &SrcDstOperations {
                operations: items.to_vec(),
            },
        )
        .await
    }

    pub async fn remove(&self, paths: &[StoragePath]) -> Result<OpIdResponse, DtError> {
        self.path_verb("remove", paths).await
    }

    pub async fn mkdir(&self, paths: &[StoragePath]) -> Result<OpIdResponse, DtError> {
        self.path_verb("mkdir", paths).await
    }

    pub async fn rmdir(&self, paths: &[StoragePath]) -> Result<OpIdResponse, DtError> {
        self.path_verb("rmdir", paths).await
    }

    pub async fn exists(&self, paths: &[StoragePath]) -> Result<OpIdResponse, DtError> {
        self.path_verb("exists", paths).await
    }

    pub async fn list(&self, paths: &[StoragePath]) -> Result<OpIdResponse, DtError> {
        self.path_verb("list", paths).await
    }

    /// The storage remotes the worker is configured with.
    pub async fn storages(&self) -> Result<Vec<serde_json::Value>, DtError> {
        let client = self.client.clone();
        retry(&self.policy, "storages", move || {
            let client = client.clone();
            async move {
                let url = format!("{}/storage", client.base_api_url());
                let resp = client.session()?.get(url).send().await?;
                let resp = check_status(resp).await?;
                let cfg: StorageConfigResponse = resp.json().await?;
                Ok(cfg.storage.unwrap_or_default())
            }
        })
        .await
    }

    pub async fn check_permissions(
        &self,
        permissions: &[RoleQuery],
    ) -> Result<CheckPermissionsResponse, DtError> {
        self.post(
            "check_permissions",
            "permissions:check",
            &PermissionsRequest {
                permissions: permissions.to_vec(),
            },
        )
        .await
    }

    pub async fn get_permissions(
        &self,
        permissions: &[RoleQuery],
    ) -> Result<GetPermissionsResponse, DtError> {
        self.post(
            "get_permissions",
            "permissions:get",
            &PermissionsRequest {
                permissions: permissions.to_vec(),
            },
        )
        .await
    }

    pub async fn set_permissions(&self, permissions: &[RoleAssignment]) -> Result<(), DtError> {
        self.post_no_content(
            "set_permissions",
            "permissions:set",
            &PermissionsRequest {
                permissions: permissions.to_vec(),
            },
        )
        .await
    }

    pub async fn remove_permissions(
        &self,
        permissions: &[RoleAssignment],
    ) -> Result<(), DtError> {
        self.post_no_content(
            "remove_permissions",
            "permissions:remove",
            &PermissionsRequest {
                permissions: permissions.to_vec(),
            },
        )
        .await
    }

    pub async fn get_metadata(&self, paths: &[String]) -> Result<OpIdResponse, DtError> {
        self.post(
            "get_metadata",
            "metadata:get",
            &GetMetadataRequest {
                paths: paths.to_vec(),
            },
        )
        .await
    }

    pub async fn set_metadata(
        &self,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<OpIdResponse, DtError> {
        self.post("set_metadata", "metadata:set", &SetMetadataRequest { metadata })
            .await
    }

    /// Polls until every named operation reaches a terminal state, logging
    /// progress and completions along the way. Transient fetch failures are
    /// tolerated; only the wall-time limit in `options` aborts the wait.
    pub async fn wait_for<T: AsOperationId>(
        &self,
        operations: &[T],
        options: &WaitOptions,
    ) -> Result<Vec<Operation>, DtError> {
        let ids: Vec<String> = operations
            .iter()
            .map(|o| o.operation_id().to_string())
            .collect();
        let start = Instant::now();
        let mut handler = WaitHandler::new();
        let mut attempt: u32 = 0;
        loop {
            if let Some(limit) = options.timeout {
                if start.elapsed() > limit {
                    return Err(DtError::Timeout(format!(
                        "operations not finished after {}",
                        duration_string(limit)
                    )));
                }
            }
            match self.operations(&ids).await {
                Ok(ops) => {
                    handler.report(&ops);
                    if !ops.is_empty() && ops.iter().all(|op| op.state.is_terminal()) {
                        return Ok(ops);
                    }
                }
                Err(e) if e.give_up() => return Err(e),
                Err(e) => debug!("Tolerating fetch failure while waiting: {e}"),
            }
            attempt = attempt.saturating_add(1);
            sleep(expo_backoff(options.interval, attempt, options.cap, true)).await;
        }
    }

    async fn path_verb(&self, verb: &str, paths: &[StoragePath]) -> Result<OpIdResponse, DtError> {
        self.post(
            verb,
            &format!("storage:{verb}"),
            &PathOperations {
                operations: paths.to_vec(),
            },
        )
        .await
    }

    async fn post<Req, Resp>(&self, what: &str, route: &str, body: &Req) -> Result<Resp, DtError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let client = self.client.clone();
        let payload = serde_json::to_value(body)?;
        let route = route.to_string();
        retry(&self.policy, what, move || {
            let client = client.clone();
            let payload = payload.clone();
            let route = route.clone();
            async move {
                let url = format!("{}/{route}", client.base_api_url());
                let resp = client.session()?.post(url).json(&payload).send().await?;
                let resp = check_status(resp).await?;
                Ok(resp.json::<Resp>().await?)
            }
        })
        .await
    }

    async fn post_no_content<Req: Serialize>(
        &self,
        what: &str,
        route: &str,
        body: &Req,
    ) -> Result<(), DtError> {
        let client = self.client.clone();
        let payload = serde_json::to_value(body)?;
        let route = route.to_string();
        retry(&self.policy, what, move || {
            let client = client.clone();
            let payload = payload.clone();
            let route = route.clone();
            async move {
                let url = format!("{}/{route}", client.base_api_url());
                let resp = client.session()?.post(url).json(&payload).send().await?;
                check_status(resp).await?;
                Ok(())
            }
        })
        .await
    }
}

/// Blocking twin of [`AsyncDataTransferApi`], driven by the [`Client`]'s
/// runtime.
#[derive(Clone)]
pub struct DataTransferApi {
    client: Client,
    inner: AsyncDataTransferApi,
}

impl DataTransferApi {
    pub fn new(client: Client) -> Self {
        let inner = AsyncDataTransferApi::new(client.async_client().clone());
        DataTransferApi { client, inner }
    }

    pub fn status(&self, wait: bool, timeout: Duration) -> Result<Status, DtError> {
        self.client.block_on(self.inner.status(wait, timeout))
    }

    pub fn operations(&self, ids: &[String]) -> Result<Vec<Operation>, DtError> {
        self.client.block_on(self.inner.operations(ids))
    }

    pub fn copy(&self, items: &[SrcDst]) -> Result<OpIdResponse, DtError> {
        self.client.block_on(self.inner.copy(items))
    }

    pub fn mv(&self, items: &[SrcDst]) -> Result<OpIdResponse, DtError> {
        self.client.block_on(self.inner.mv(items))
    }

    pub fn remove(&self, paths: &[StoragePath]) -> Result<OpIdResponse, DtError> {
        self.client.block_on(self.inner.remove(paths))
    }

    pub fn mkdir(&self, paths: &[StoragePath]) -> Result<OpIdResponse, DtError> {
        self.client.block_on(self.inner.mkdir(paths))
    }

    pub fn rmdir(&self, paths: &[StoragePath]) -> Result<OpIdResponse, DtError> {
        self.client.block_on(self.inner.rmdir(paths))
    }

    pub fn exists(&self, paths: &[StoragePath]) -> Result<OpIdResponse, DtError> {
        self.client.block_on(self.inner.exists(paths))
    }

    pub fn list(&self, paths: &[StoragePath]) -> Result<OpIdResponse, DtError> {
        self.client.block_on(self.inner.list(paths))
    }

    pub fn storages(&self) -> Result<Vec<serde_json::Value>, DtError> {
        self.client.block_on(self.inner.storages())
    }

    pub fn check_permissions(
        &self,
        permissions: &[RoleQuery],
    ) -> Result<CheckPermissionsResponse, DtError> {
        self.client
            .block_on(self.inner.check_permissions(permissions))
    }

    pub fn get_permissions(
        &self,
        permissions: &[RoleQuery],
    ) -> Result<GetPermissionsResponse, DtError> {
        self.client
            .block_on(self.inner.get_permissions(permissions))
    }

    pub fn set_permissions(&self, permissions: &[RoleAssignment]) -> Result<(), DtError> {
        self.client
            .block_on(self.inner.set_permissions(permissions))
    }

    pub fn remove_permissions(&self, permissions: &[RoleAssignment]) -> Result<(), DtError> {
        self.client
            .block_on(self.inner.remove_permissions(permissions))
    }

    pub fn get_metadata(&self, paths: &[String]) -> Result<OpIdResponse, DtError> {
        self.client.block_on(self.inner.get_metadata(paths))
    }

    pub fn set_metadata(
        &self,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<OpIdResponse, DtError> {
        self.client.block_on(self.inner.set_metadata(metadata))
    }

    pub fn wait_for<T: AsOperationId>(
        &self,
        operations: &[T],
        options: &WaitOptions,
    ) -> Result<Vec<Operation>, DtError> {
        self.client.block_on(self.inner.wait_for(operations, options))
    }
}
