use thiserror::Error;

use crate::entity::SyncEntityType;

/// Token acquisition failures. Fatal to a whole sync run; the only remedy is
/// re-authorization by the user.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("no active crm connection for user")]
    MissingConnection,
    #[error("refresh grant rejected: {0}")]
    RefreshRejected(String),
    #[error("token endpoint unreachable: {0}")]
    Transport(String),
}

/// External API failures. Fatal to one entity type's page loop only.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("crm api returned status {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("crm api unreachable: {0}")]
    Transport(String),
    #[error("crm api response could not be decoded: {0}")]
    Decode(String),
}

/// Per-record mapping failures. The record is counted failed and skipped;
/// the batch continues.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MappingError {
    #[error("{entity} record has no external id")]
    MissingExternalId { entity: SyncEntityType },
    #[error("{entity} record is not a json object")]
    NotAnObject { entity: SyncEntityType },
}

#[cfg(test)]
mod tests {
    use crate::entity::SyncEntityType;
    use crate::errors::{ApiError, MappingError, TokenError};

    #[test]
    fn error_messages_carry_enough_detail_for_the_run_error_list() {
        let token = TokenError::RefreshRejected("status 400".to_string());
        assert_eq!(token.to_string(), "refresh grant rejected: status 400");

        let api = ApiError::Status { status: 500, detail: "internal".to_string() };
        assert_eq!(api.to_string(), "crm api returned status 500: internal");

        let mapping = MappingError::MissingExternalId { entity: SyncEntityType::Deal };
        assert_eq!(mapping.to_string(), "deal record has no external id");
    }
}
