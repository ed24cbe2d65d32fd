//! Wire-level row models: full rows, partial rows, identity ranges, and
//! `syn`-style identifiers.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    str::FromStr,
    sync::OnceLock,
};

use itertools::Itertools;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, TableError},
    schema::{ColumnType, SelectColumn},
};

const ENTITY_ID_PREFIX: &str = "syn";

fn entity_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^syn(\d+)(?:\.(\d+))?$").expect("entity id pattern"))
}

/// A numeric identifier with an optional pinned version, written `syn123.4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdAndVersion {
    pub id: i64,
    pub version: Option<i64>,
}

impl IdAndVersion {
    pub fn new(id: i64, version: Option<i64>) -> Self {
        IdAndVersion { id, version }
    }

    /// Parses a strict entity id (`syn` prefix required).
    pub fn parse_entity_id(value: &str) -> Option<Self> {
        let captures = entity_id_pattern().captures(value)?;
        let id = captures.get(1)?.as_str().parse().ok()?;
        let version = match captures.get(2) {
            Some(raw) => Some(raw.as_str().parse().ok()?),
            None => None,
        };
        Some(IdAndVersion { id, version })
    }
}

impl FromStr for IdAndVersion {
    type Err = TableError;

    /// Accepts `syn123`, `123`, `syn123.4` and `123.4`.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let prefixed = if trimmed
            .get(..ENTITY_ID_PREFIX.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(ENTITY_ID_PREFIX))
        {
            format!("{ENTITY_ID_PREFIX}{}", &trimmed[ENTITY_ID_PREFIX.len()..])
        } else {
            format!("{ENTITY_ID_PREFIX}{trimmed}")
        };
        IdAndVersion::parse_entity_id(&prefixed).ok_or_else(|| {
            TableError::invalid_argument(format!("'{value}' is not a valid table id"))
        })
    }
}

impl fmt::Display for IdAndVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.version {
            Some(version) => write!(f, "{ENTITY_ID_PREFIX}{}.{version}", self.id),
            None => write!(f, "{ENTITY_ID_PREFIX}{}", self.id),
        }
    }
}

/// A null or negative row id marks a row that still needs an id.
pub fn is_null_or_invalid(row_id: Option<i64>) -> bool {
    row_id.is_none_or(|id| id < 0)
}

/// A full row whose values are aligned to the headers of its [`RowSet`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Row {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_number: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<Option<String>>>,
}

impl Row {
    pub fn new(values: Vec<Option<String>>) -> Self {
        Row {
            values: Some(values),
            ..Row::default()
        }
    }

    pub fn with_row_id(mut self, row_id: i64) -> Self {
        self.row_id = Some(row_id);
        self
    }

    pub fn with_version_number(mut self, version_number: i64) -> Self {
        self.version_number = Some(version_number);
        self
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    /// A row without values is a delete.
    pub fn is_delete(&self) -> bool {
        self.values.as_ref().is_none_or(|values| values.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowSet {
    pub table_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    pub headers: Vec<SelectColumn>,
    pub rows: Vec<Row>,
}

impl RowSet {
    /// Header column ids in header order. Aggregate headers without an id
    /// yield `None`.
    pub fn header_ids(&self) -> Vec<Option<&str>> {
        self.headers.iter().map(|h| h.id.as_deref()).collect()
    }

    /// File handle ids referenced by cells under FILEHANDLEID headers.
    pub fn file_handle_ids(&self) -> Result<BTreeSet<i64>> {
        let file_columns: Vec<usize> = self
            .headers
            .iter()
            .positions(|h| h.column_type == ColumnType::FileHandleId)
            .collect();
        let mut ids = BTreeSet::new();
        for values in self.rows.iter().filter_map(|row| row.values.as_ref()) {
            for &idx in &file_columns {
                if let Some(id) = parse_file_handle_id(values.get(idx).and_then(|v| v.as_deref()))? {
                    ids.insert(id);
                }
            }
        }
        Ok(ids)
    }
}

/// Blank cells carry no file handle.
pub(crate) fn parse_file_handle_id(value: Option<&str>) -> Result<Option<i64>> {
    let Some(value) = value.filter(|v| !v.trim().is_empty()) else {
        return Ok(None);
    };
    value.trim().parse::<i64>().map(Some).map_err(|_| {
        TableError::invalid_argument(format!("Passed a non-integer file handle id: {value}"))
    })
}

/// Requires a table id, at least one header, and at least one row.
pub fn validate_row_set(set: &RowSet) -> Result<()> {
    if set.table_id.trim().is_empty() {
        return Err(TableError::invalid_argument("RowSet.tableId cannot be null"));
    }
    if set.headers.is_empty() {
        return Err(TableError::invalid_argument("RowSet.headers cannot be empty"));
    }
    if set.rows.is_empty() {
        return Err(TableError::invalid_argument(
            "RowSet.rows must contain at least one row.",
        ));
    }
    Ok(())
}

/// A client update naming only the columns it changes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<BTreeMap<String, Option<String>>>,
}

impl PartialRow {
    pub fn new<I, K>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, Option<String>)>,
        K: Into<String>,
    {
        PartialRow {
            row_id: None,
            etag: None,
            values: Some(values.into_iter().map(|(k, v)| (k.into(), v)).collect()),
        }
    }

    pub fn with_row_id(mut self, row_id: i64) -> Self {
        self.row_id = Some(row_id);
        self
    }

    pub fn is_delete(&self) -> bool {
        self.values.as_ref().is_none_or(|values| values.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialRowSet {
    pub table_id: String,
    pub rows: Vec<PartialRow>,
}

/// A single-use block of row ids plus the version number for one
/// change-set application. Deliberately not `Clone`: it is consumed by
/// [`assign_row_ids_and_version_numbers`](crate::identity::assign_row_ids_and_version_numbers).
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdRange {
    #[serde(default)]
    pub minimum_id: Option<i64>,
    #[serde(default)]
    pub maximum_id: Option<i64>,
    #[serde(default)]
    pub maximum_update_id: Option<i64>,
    pub version_number: i64,
}
