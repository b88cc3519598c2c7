use reqwest::StatusCode;

/// Errors produced by the data transfer client.
#[derive(Debug, thiserror::Error)]
pub enum DtError {
    /// Worker executable is missing, unsupported or misconfigured. Fatal,
    /// raised synchronously and never retried.
    #[error("worker binary error: {0}")]
    Binary(String),
    /// The worker is not listening yet. Retried for as long as the caller's
    /// overall deadline allows.
    #[error("connection error: {0}")]
    Connect(String),
    /// The worker process is alive but reports not-ready.
    #[error("worker not ready: {0}")]
    NotReady(String),
    /// A caller-specified deadline passed. Never retried.
    #[error("timeout: {0}")]
    Timeout(String),
    /// Error raised from a worker HTTP response.
    #[error("service error{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Service {
        message: String,
        status: Option<u16>,
        give_up: bool,
    },
    /// Programming misuse, e.g. an empty operation id. Never retried.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl DtError {
    /// Whether retrying this error can never succeed without intervention.
    pub fn give_up(&self) -> bool {
        match self {
            DtError::Timeout(_) => true,
            DtError::Service { give_up, .. } => *give_up,
            DtError::InvalidArgument(_) => true,
            DtError::Binary(_) => true,
            _ => false,
        }
    }

    /// Connection-level failures are retried past the attempt cap; the worker
    /// may simply still be starting. Only the elapsed-time cap stops them.
    pub fn retry_forever(&self) -> bool {
        match self {
            DtError::Connect(_) => true,
            DtError::Http(e) => e.is_connect(),
            _ => false,
        }
    }

    pub(crate) fn service(status: StatusCode, message: impl Into<String>) -> Self {
        let give_up = matches!(
            status,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        );
        DtError::Service {
            message: message.into(),
            status: Some(status.as_u16()),
            give_up,
        }
    }
}

/// Turn a non-success response into a [`DtError::Service`].
///
/// 401/403 are flagged to give up immediately since retrying cannot succeed
/// without a token refresh; every other status >= 400 stays retryable.
pub(crate) async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, DtError> {
    let status = resp.status();
    if status.is_client_error() || status.is_server_error() {
        let body = resp.text().await.unwrap_or_default();
        return Err(DtError::service(status, body));
    }
    Ok(resp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn giveup_classification() {
        assert!(DtError::Timeout("t".into()).give_up());
        assert!(DtError::InvalidArgument("a".into()).give_up());
        assert!(DtError::service(StatusCode::UNAUTHORIZED, "no").give_up());
        assert!(DtError::service(StatusCode::FORBIDDEN, "no").give_up());
        assert!(!DtError::service(StatusCode::INTERNAL_SERVER_ERROR, "oops").give_up());
        assert!(!DtError::NotReady("starting".into()).give_up());
        assert!(!DtError::Connect("refused".into()).give_up());
    }

    #[test]
    fn connect_errors_retry_forever() {
        assert!(DtError::Connect("refused".into()).retry_forever());
        assert!(!DtError::NotReady("starting".into()).retry_forever());
        assert!(!DtError::Timeout("t".into()).retry_forever());
    }
}
