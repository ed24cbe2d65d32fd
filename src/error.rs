//! Error taxonomy shared by every engine operation.
//!
//! All failures are synchronous and scoped to the row or request being
//! processed. Callers recover by correcting input: fix a value, request a
//! larger [`IdRange`](crate::rows::IdRange), or shrink the batch.

use thiserror::Error;

use crate::schema::ColumnType;

pub type Result<T, E = TableError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum TableError {
    /// A column definition is missing a required attribute or carries an invalid one.
    #[error("{0}")]
    Schema(String),

    #[error("{}", describe_validation(.row, .column, .column_type, .reason))]
    ValueValidation {
        row: Option<usize>,
        column: Option<usize>,
        column_type: ColumnType,
        reason: String,
    },

    #[error("{0}")]
    IdentityExhausted(String),

    #[error("Cannot update row: {row_id} because it does not exist.")]
    RowNotFound { row_id: i64 },

    #[error("The row id {row_id} is included more than once in the rowset")]
    DuplicateRow { row_id: i64 },

    #[error("Request exceeds the maximum number of bytes per request. Maximum : {max_bytes} bytes")]
    RequestTooLarge { max_bytes: usize },

    #[error("{0}")]
    MalformedCsv(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl TableError {
    pub(crate) fn schema(message: impl Into<String>) -> Self {
        TableError::Schema(message.into())
    }

    pub(crate) fn malformed_csv(message: impl Into<String>) -> Self {
        TableError::MalformedCsv(message.into())
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        TableError::InvalidArgument(message.into())
    }

    pub(crate) fn invalid_value(column_type: ColumnType, reason: impl Into<String>) -> Self {
        TableError::ValueValidation {
            row: None,
            column: None,
            column_type,
            reason: reason.into(),
        }
    }

    /// Attaches a row/column position to a validation failure. Other
    /// variants are returned unchanged.
    pub(crate) fn at_position(self, row: usize, column: usize) -> Self {
        match self {
            TableError::ValueValidation {
                column_type,
                reason,
                ..
            } => TableError::ValueValidation {
                row: Some(row),
                column: Some(column),
                column_type,
                reason,
            },
            other => other,
        }
    }
}

fn describe_validation(
    row: &Option<usize>,
    column: &Option<usize>,
    column_type: &ColumnType,
    reason: &str,
) -> String {
    match (row, column) {
        (Some(row), Some(column)) => {
            format!("Value at [{row},{column}] was not a valid {column_type}. {reason}")
        }
        _ => reason.to_string(),
    }
}
