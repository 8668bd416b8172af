use thiserror::Error;

use freightdesk_core::{ApiError, TokenError};
use freightdesk_db::repositories::RepositoryError;

/// Failures surfaced by the orchestrator's invocation surface. Everything
/// else is absorbed into run counters and the run's error list.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("a sync run is already in progress for this user")]
    RunInProgress,
    #[error("export to the crm is not supported; only imports run here")]
    ExportUnsupported,
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("storage error: {0}")]
    Repository(#[from] RepositoryError),
}
