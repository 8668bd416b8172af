//! Domain core of the freightdesk CRM synchronization engine: entity-type
//! dispatch, field-mapping resolution, run lifecycle types, the error
//! taxonomy, and application configuration.

pub mod config;
pub mod conflict;
pub mod connection;
pub mod entity;
pub mod errors;
pub mod mapping;
pub mod run;

pub use conflict::ConflictResolution;
pub use connection::Connection;
pub use entity::{external_id, ExternalField, LocalField, SyncEntityType, SYNC_ORDER};
pub use errors::{ApiError, MappingError, TokenError};
pub use mapping::{default_mappings, map_record, FieldMapping, MappedRecord, MappingDirection};
pub use run::{
    BatchStatus, EntitySummary, RunCounters, StopReason, SyncAction, SyncReport, SyncRequest,
    SyncRunStatus, SyncScope,
};
