//! Column types, column definitions, and YAML schema persistence.
//!
//! This module owns the closed [`ColumnType`] enum together with the per-type
//! parse/format/size functions, the [`ColumnModel`] column definition, the
//! [`SelectColumn`] result header, and [`TableSchema`], the ordered column list
//! that can be loaded from and saved to YAML.
//!
//! ## Canonical wire forms
//!
//! - BOOLEAN: `true` / `false`
//! - INTEGER, FILEHANDLEID, USERID: signed 64-bit decimal
//! - DOUBLE: `NaN`, `Infinity`, `-Infinity`, plain decimal within
//!   `[1e-3, 1e7)`, exponent form otherwise
//! - DATE: milliseconds since the Unix epoch (UTC)
//! - ENTITYID: `syn123` or `syn123.4`, unchanged
//! - STRING, LINK, LARGETEXT: unchanged

use std::{fmt, fs::File, io::BufReader, path::Path, str::FromStr};

use anyhow::{Context, anyhow};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::{
    constants::{MAX_ALLOWED_STRING_SIZE, MAX_BYTES_PER_CHAR_UTF_8, column_constants},
    error::{Result, TableError},
    rows::IdAndVersion,
};

const SQL_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    String,
    Link,
    LargeText,
    Boolean,
    Integer,
    Double,
    Date,
    FileHandleId,
    EntityId,
    UserId,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::String => "STRING",
            ColumnType::Link => "LINK",
            ColumnType::LargeText => "LARGETEXT",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Integer => "INTEGER",
            ColumnType::Double => "DOUBLE",
            ColumnType::Date => "DATE",
            ColumnType::FileHandleId => "FILEHANDLEID",
            ColumnType::EntityId => "ENTITYID",
            ColumnType::UserId => "USERID",
        }
    }

    pub fn variants() -> &'static [ColumnType] {
        &[
            ColumnType::String,
            ColumnType::Link,
            ColumnType::LargeText,
            ColumnType::Boolean,
            ColumnType::Integer,
            ColumnType::Double,
            ColumnType::Date,
            ColumnType::FileHandleId,
            ColumnType::EntityId,
            ColumnType::UserId,
        ]
    }

    /// STRING, LINK and LARGETEXT keep empty strings as values instead of
    /// treating them as null.
    pub fn is_string_family(&self) -> bool {
        matches!(
            self,
            ColumnType::String | ColumnType::Link | ColumnType::LargeText
        )
    }

    pub fn requires_maximum_size(&self) -> bool {
        matches!(self, ColumnType::String | ColumnType::Link)
    }

    /// Parses `value` and returns its canonical wire form.
    ///
    /// String-family values are returned unchanged; their size and enum
    /// constraints depend on the column and are checked by
    /// [`validate_value`](crate::validate::validate_value).
    pub fn parse_value(&self, value: &str) -> Result<String> {
        match self {
            ColumnType::String | ColumnType::Link | ColumnType::LargeText => Ok(value.to_string()),
            ColumnType::Boolean => {
                if value.eq_ignore_ascii_case("true") {
                    Ok("true".to_string())
                } else if value.eq_ignore_ascii_case("false") {
                    Ok("false".to_string())
                } else {
                    Err(TableError::invalid_value(
                        *self,
                        format!(
                            "A value in a boolean column must be null, 'true' or 'false', but was '{value}'"
                        ),
                    ))
                }
            }
            ColumnType::Integer | ColumnType::FileHandleId | ColumnType::UserId => value
                .parse::<i64>()
                .map(|parsed| parsed.to_string())
                .map_err(|_| {
                    TableError::invalid_value(*self, format!("For input string: \"{value}\""))
                }),
            ColumnType::Double => parse_double(value)
                .map(format_double)
                .ok_or_else(|| {
                    TableError::invalid_value(*self, format!("For input string: \"{value}\""))
                }),
            ColumnType::Date => parse_date_millis(value)
                .map(|millis| millis.to_string())
                .ok_or_else(|| {
                    TableError::invalid_value(
                        *self,
                        format!(
                            "Expected a date as epoch milliseconds or 'yyyy-MM-dd HH:mm:ss.SSS' but was '{value}'"
                        ),
                    )
                }),
            ColumnType::EntityId => {
                if IdAndVersion::parse_entity_id(value).is_some() {
                    Ok(value.to_string())
                } else {
                    Err(TableError::invalid_value(
                        *self,
                        format!("Malformed entity ID (should be syn123 or syn123.4): {value}"),
                    ))
                }
            }
        }
    }

    /// Translates a value as returned by the query layer into its wire form.
    pub fn format_query_value(&self, value: Option<String>) -> Option<String> {
        match (self, value.as_deref()) {
            (ColumnType::Boolean, Some("0")) => Some("false".to_string()),
            (ColumnType::Boolean, Some("1")) => Some("true".to_string()),
            _ => value,
        }
    }

    /// Worst-case number of UTF-8 bytes a single serialized cell of this type
    /// can occupy. STRING and LINK need the column's maximum size.
    pub fn max_bytes(&self, maximum_size: Option<i64>) -> Result<usize> {
        let constants = column_constants();
        let bytes = match self {
            ColumnType::String | ColumnType::Link => {
                let size = maximum_size.ok_or_else(|| {
                    TableError::schema("maxSize cannot be null for String types")
                })?;
                let size = usize::try_from(size).map_err(|_| {
                    TableError::schema(format!("maxSize must not be negative but was {size}"))
                })?;
                size.saturating_mul(MAX_BYTES_PER_CHAR_UTF_8)
            }
            ColumnType::LargeText => constants.default_large_text_bytes,
            ColumnType::Boolean => constants.max_boolean_bytes_as_string,
            ColumnType::Integer | ColumnType::Date => constants.max_integer_bytes_as_string,
            ColumnType::Double => constants.max_double_bytes_as_string,
            ColumnType::FileHandleId => constants.max_file_handle_id_bytes_as_string,
            ColumnType::EntityId => constants.max_entity_id_bytes_as_string,
            ColumnType::UserId => constants.max_user_id_bytes_as_string,
        };
        Ok(bytes)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ColumnType {
    type Err = TableError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_uppercase();
        ColumnType::variants()
            .iter()
            .copied()
            .find(|variant| variant.as_str() == normalized)
            .ok_or_else(|| {
                TableError::schema(format!(
                    "Unknown column type '{value}'. Supported types: {}",
                    ColumnType::variants()
                        .iter()
                        .map(ColumnType::as_str)
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            })
    }
}

pub fn parse_double(value: &str) -> Option<f64> {
    let lowered = value.to_lowercase();
    match lowered.as_str() {
        "nan" => Some(f64::NAN),
        "+nan" | "-nan" => None,
        "-inf" | "-infinity" | "-\u{221E}" => Some(f64::NEG_INFINITY),
        "+inf" | "+infinity" | "+\u{221E}" | "inf" | "infinity" | "\u{221E}" => {
            Some(f64::INFINITY)
        }
        _ => value.parse::<f64>().ok(),
    }
}

pub fn format_double(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value.is_sign_positive() {
            "Infinity".to_string()
        } else {
            "-Infinity".to_string()
        };
    }
    let magnitude = value.abs();
    if magnitude == 0.0 || (1e-3..1e7).contains(&magnitude) {
        format!("{value}")
    } else {
        format!("{value:e}")
    }
}

/// Parses epoch milliseconds or a SQL-style date/time (interpreted as UTC).
pub fn parse_date_millis(value: &str) -> Option<i64> {
    if let Ok(millis) = value.parse::<i64>() {
        return Some(millis);
    }
    for fmt in SQL_DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(parsed.and_utc().timestamp_millis());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|datetime| datetime.and_utc().timestamp_millis())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnModel {
    pub id: String,
    pub name: String,
    pub column_type: ColumnType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum_size: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
}

impl ColumnModel {
    pub fn new(id: impl Into<String>, name: impl Into<String>, column_type: ColumnType) -> Self {
        ColumnModel {
            id: id.into(),
            name: name.into(),
            column_type,
            maximum_size: None,
            default_value: None,
            enum_values: None,
        }
    }

    pub fn with_maximum_size(mut self, maximum_size: i64) -> Self {
        self.maximum_size = Some(maximum_size);
        self
    }

    pub fn with_default_value(mut self, default_value: impl Into<String>) -> Self {
        self.default_value = Some(default_value.into());
        self
    }

    pub fn with_enum_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enum_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// The numeric form of the column id.
    pub fn numeric_id(&self) -> Result<i64> {
        parse_column_id(&self.id)
    }

    /// Checks the column's own attributes: a numeric id, a name, a size for
    /// STRING/LINK within `(0, MAX_ALLOWED_STRING_SIZE]`, and a default value
    /// and enum values that are themselves valid for the column.
    pub fn validate(&self) -> Result<()> {
        self.numeric_id()?;
        if self.name.trim().is_empty() {
            return Err(TableError::schema(format!(
                "ColumnModel {} must have a name",
                self.id
            )));
        }
        if self.column_type.requires_maximum_size() {
            match self.maximum_size {
                None => {
                    return Err(TableError::schema(format!(
                        "{} columns must have a maximum size",
                        self.column_type
                    )));
                }
                Some(size) if size <= 0 || size > MAX_ALLOWED_STRING_SIZE => {
                    return Err(TableError::schema(format!(
                        "ColumnModel.maxSize for a {} cannot exceed: {} but was {}",
                        self.column_type, MAX_ALLOWED_STRING_SIZE, size
                    )));
                }
                Some(_) => {}
            }
        }
        if let Some(values) = &self.enum_values {
            let unconstrained = ColumnModel {
                enum_values: None,
                ..self.clone()
            };
            for value in values {
                crate::validate::validate_value(value, &unconstrained).map_err(|err| {
                    TableError::schema(format!(
                        "Enum value '{value}' is not valid for column '{}': {err}",
                        self.name
                    ))
                })?;
            }
        }
        if let Some(default) = &self.default_value {
            crate::validate::validate_value(default, self).map_err(|err| {
                TableError::schema(format!(
                    "Default value '{default}' is not valid for column '{}': {err}",
                    self.name
                ))
            })?;
        }
        Ok(())
    }
}

pub fn parse_column_id(id: &str) -> Result<i64> {
    id.trim()
        .parse::<i64>()
        .map_err(|_| TableError::schema(format!("'{id}' is not a valid column ID")))
}

/// A result header: name and type of a column, optionally tied to a column id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectColumn {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub column_type: ColumnType,
}

impl SelectColumn {
    pub fn from_model(model: &ColumnModel, is_aggregate: bool) -> Self {
        SelectColumn {
            id: (!is_aggregate).then(|| model.id.clone()),
            name: model.name.clone(),
            column_type: model.column_type,
        }
    }
}

impl From<&ColumnModel> for SelectColumn {
    fn from(model: &ColumnModel) -> Self {
        SelectColumn::from_model(model, false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TableSchema {
    pub columns: Vec<ColumnModel>,
}

impl TableSchema {
    pub fn new(columns: Vec<ColumnModel>) -> Self {
        TableSchema { columns }
    }

    pub fn validate(&self) -> Result<()> {
        for column in &self.columns {
            column.validate()?;
        }
        Ok(())
    }

    pub fn column_ids(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.id.clone()).collect()
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening schema file {path:?}"))?;
        let reader = BufReader::new(file);
        let schema: TableSchema =
            serde_yaml::from_reader(reader).context("Parsing schema YAML")?;
        schema
            .validate()
            .map_err(|err| anyhow!(err))
            .with_context(|| format!("Validating columns in {path:?}"))?;
        Ok(schema)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        self.validate().map_err(|err| anyhow!(err))?;
        let file = File::create(path).with_context(|| format!("Creating schema file {path:?}"))?;
        serde_yaml::to_writer(file, self).context("Writing schema YAML")
    }
}
