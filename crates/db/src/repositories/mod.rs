use thiserror::Error;

pub mod batch_progress;
pub mod conflict;
pub mod connection;
pub mod field_mapping;
pub mod record;
pub mod sync_run;

pub use batch_progress::{BatchProgress, BatchProgressRepository};
pub use conflict::{ConflictRepository, ConflictRow, NewConflict};
pub use connection::ConnectionRepository;
pub use field_mapping::FieldMappingRepository;
pub use record::{RecordRepository, RecordWrite, StoredRecord};
pub use sync_run::{SyncRunRepository, SyncRunRow};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}
