//! Cell value validation against a column definition.

use itertools::Itertools;

use crate::{
    constants::MAX_LARGE_TEXT_CHARACTERS,
    error::{Result, TableError},
    schema::{ColumnModel, ColumnType},
};

const MAX_ENUM_VALUES_IN_MESSAGE: usize = 10;

/// Validates `value` against `column` and returns its canonical wire form.
///
/// Lengths are counted in characters, not bytes.
pub fn validate_value(value: &str, column: &ColumnModel) -> Result<String> {
    let column_type = column.column_type;
    match column_type {
        ColumnType::String | ColumnType::Link => {
            let maximum_size = column.maximum_size.ok_or_else(|| {
                let label = if column_type == ColumnType::String {
                    "String"
                } else {
                    "Link"
                };
                TableError::schema(format!("{label} columns must have a maximum size"))
            })?;
            let length = value.chars().count();
            if i64::try_from(length).map_or(true, |length| length > maximum_size) {
                let reason = if column_type == ColumnType::String {
                    format!(
                        "String '{value}' exceeds the maximum length of {maximum_size} characters. Consider using a FileHandle to store large strings."
                    )
                } else {
                    format!(
                        "Link '{value}' exceeds the maximum length of {maximum_size} characters."
                    )
                };
                return Err(TableError::invalid_value(column_type, reason));
            }
            check_enum(value, column)?;
            Ok(value.to_string())
        }
        ColumnType::LargeText => {
            if value.chars().count() > MAX_LARGE_TEXT_CHARACTERS {
                return Err(TableError::invalid_value(
                    column_type,
                    format!("Exceeds the maximum number of characters: {MAX_LARGE_TEXT_CHARACTERS}"),
                ));
            }
            check_enum(value, column)?;
            Ok(value.to_string())
        }
        ColumnType::Boolean
        | ColumnType::Integer
        | ColumnType::Double
        | ColumnType::Date
        | ColumnType::FileHandleId
        | ColumnType::EntityId
        | ColumnType::UserId => column_type.parse_value(value),
    }
}

fn check_enum(value: &str, column: &ColumnModel) -> Result<()> {
    let Some(allowed) = &column.enum_values else {
        return Ok(());
    };
    if allowed.iter().any(|candidate| candidate == value) {
        return Ok(());
    }
    let reason = if allowed.len() > MAX_ENUM_VALUES_IN_MESSAGE {
        format!("'{value}' is not a valid value for this column. See column definition for valid values.")
    } else {
        format!(
            "'{value}' is not a valid value for this column. Valid values are: {}.",
            allowed.iter().join(", ")
        )
    };
    Err(TableError::invalid_value(column.column_type, reason))
}

/// Validates one cell of a row.
///
/// An empty string is null for every type except STRING, LINK and LARGETEXT.
/// A null value falls back to the column default. Failures carry the row and
/// column position.
pub fn validate_row_value(
    value: Option<&str>,
    column: &ColumnModel,
    row_index: usize,
    column_index: usize,
) -> Result<Option<String>> {
    let value = value.filter(|v| !v.is_empty() || column.column_type.is_string_family());
    match value {
        Some(value) => validate_value(value, column)
            .map(Some)
            .map_err(|err| err.at_position(row_index, column_index)),
        None => Ok(column.default_value.clone()),
    }
}
