use crate::types::DbId;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Upload row not found: {0}")]
    RowNotFound(DbId),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unknown check name: {0}")]
    UnknownCheck(String),

    #[error("Invalid row {row_id}: {reason}")]
    InvalidRow { row_id: DbId, reason: String },
}
