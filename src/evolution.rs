//! Schema diffs between two column-id sets, rewriting stored rows into a
//! newer schema, and the order-independent schema digest.

use std::{cmp::Ordering, collections::{BTreeSet, HashMap}};

use itertools::Itertools;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, TableError},
    mapper::column_id_to_index_map,
    rows::{Row, RowSet},
    schema::{ColumnModel, SelectColumn, parse_column_id},
};

const SCHEMA_DIGEST_PREFIX: &str = "DEFAULT";
const SCHEMA_DIGEST_SEPARATOR: char = '+';
const COLUMN_ID_DELIMITER: char = ',';

/// One column added or removed between two schema versions. A missing old id
/// is an add; a missing new id is a remove.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnChange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_column_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_column_id: Option<String>,
}

impl ColumnChange {
    pub fn add(column_id: impl Into<String>) -> Self {
        ColumnChange {
            old_column_id: None,
            new_column_id: Some(column_id.into()),
        }
    }

    pub fn remove(column_id: impl Into<String>) -> Self {
        ColumnChange {
            old_column_id: Some(column_id.into()),
            new_column_id: None,
        }
    }

    pub fn is_add(&self) -> bool {
        self.old_column_id.is_none() && self.new_column_id.is_some()
    }

    pub fn is_remove(&self) -> bool {
        self.old_column_id.is_some() && self.new_column_id.is_none()
    }
}

/// Numeric ids first in numeric order, then anything else lexicographically.
fn compare_column_ids(left: &str, right: &str) -> Ordering {
    match (left.parse::<i64>().ok(), right.parse::<i64>().ok()) {
        (Some(l), Some(r)) => l.cmp(&r).then_with(|| left.cmp(right)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => left.cmp(right),
    }
}

/// Removals for ids only in `old_ids`, then additions for ids only in
/// `new_ids`. Shared ids produce nothing.
pub fn create_changes_from_old_schema_to_new<S: AsRef<str>>(
    old_ids: &[S],
    new_ids: &[S],
) -> Vec<ColumnChange> {
    let old: BTreeSet<&str> = old_ids.iter().map(|id| id.as_ref()).collect();
    let new: BTreeSet<&str> = new_ids.iter().map(|id| id.as_ref()).collect();

    let removed = old
        .difference(&new)
        .copied()
        .sorted_by(|a, b| compare_column_ids(a, b))
        .map(ColumnChange::remove);
    let added = new
        .difference(&old)
        .copied()
        .sorted_by(|a, b| compare_column_ids(a, b))
        .map(ColumnChange::add);
    removed.chain(added).collect()
}

/// Rewrites one stored row into `result_schema`. Columns the row predates
/// take their default value.
pub fn convert_row_to_schema(
    row: &Row,
    column_index: &HashMap<&str, usize>,
    result_schema: &[ColumnModel],
) -> Result<Row> {
    let values = row.values.as_deref().unwrap_or_default();
    let converted = result_schema
        .iter()
        .map(|column| match column_index.get(column.id.as_str()) {
            None => Ok(column.default_value.clone()),
            Some(&idx) => values.get(idx).cloned().ok_or_else(|| {
                TableError::invalid_argument(format!(
                    "Row {} has {} value(s) but column {} is at index {idx}",
                    row.row_id.map_or_else(|| "null".to_string(), |id| id.to_string()),
                    values.len(),
                    column.id
                ))
            }),
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Row {
        row_id: row.row_id,
        version_number: row.version_number,
        etag: None,
        values: Some(converted),
    })
}

/// Converts every row of `sets` into `result_schema` and merges them, in
/// order, into one RowSet. Deleted rows are dropped.
pub fn convert_to_schema_and_merge(
    sets: &[RowSet],
    result_schema: &[ColumnModel],
    table_id: impl Into<String>,
    etag: Option<String>,
) -> Result<RowSet> {
    let mut rows = Vec::new();
    for set in sets {
        let column_index = column_id_to_index_map(set.header_ids());
        for row in set.rows.iter().filter(|row| !row.is_delete()) {
            rows.push(convert_row_to_schema(row, &column_index, result_schema)?);
        }
    }
    Ok(RowSet {
        table_id: table_id.into(),
        etag,
        headers: result_schema.iter().map(SelectColumn::from).collect(),
        rows,
    })
}

/// MD5 (lowercase hex) of `DEFAULT+id+id...` over the sorted, de-duplicated
/// ids.
pub fn create_schema_md5_hex(column_ids: &[i64]) -> String {
    let sorted: BTreeSet<i64> = column_ids.iter().copied().collect();
    let mut input = String::from(SCHEMA_DIGEST_PREFIX);
    for id in sorted {
        input.push(SCHEMA_DIGEST_SEPARATOR);
        input.push_str(&id.to_string());
    }
    hex::encode(Md5::digest(input.as_bytes()))
}

pub fn create_schema_md5_hex_for_columns(columns: &[ColumnModel]) -> Result<String> {
    let ids = columns
        .iter()
        .map(ColumnModel::numeric_id)
        .collect::<Result<Vec<_>>>()?;
    Ok(create_schema_md5_hex(&ids))
}

/// Writes ids as `1,2,3`.
pub fn write_delimited_column_ids(column_ids: &[i64]) -> String {
    column_ids.iter().join(&COLUMN_ID_DELIMITER.to_string())
}

/// Reads a `1,2,3` list. A blank string is an empty list.
pub fn read_delimited_column_ids(value: &str) -> Result<Vec<i64>> {
    if value.trim().is_empty() {
        return Ok(Vec::new());
    }
    value
        .split(COLUMN_ID_DELIMITER)
        .map(|id| {
            parse_column_id(id.trim()).map_err(|_| {
                TableError::invalid_argument(format!("'{id}' is not a valid column id in '{value}'"))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnType;

    #[test]
    fn removals_come_before_additions() {
        let changes = create_changes_from_old_schema_to_new(&["1", "2", "10"], &["2", "3", "11"]);
        assert_eq!(
            changes,
            vec![
                ColumnChange::remove("1"),
                ColumnChange::remove("10"),
                ColumnChange::add("3"),
                ColumnChange::add("11"),
            ]
        );
        assert!(changes[0].is_remove());
        assert!(changes[3].is_add());
    }

    #[test]
    fn identical_sets_produce_no_changes() {
        assert!(create_changes_from_old_schema_to_new(&["4", "5"], &["5", "4"]).is_empty());
    }

    #[test]
    fn numeric_ids_sort_before_other_ids() {
        let changes = create_changes_from_old_schema_to_new::<&str>(&[], &["b", "20", "a", "3"]);
        let ids: Vec<_> = changes
            .iter()
            .filter_map(|c| c.new_column_id.as_deref())
            .collect();
        assert_eq!(ids, vec!["3", "20", "a", "b"]);
    }

    #[test]
    fn digest_of_empty_schema_hashes_prefix() {
        assert_eq!(create_schema_md5_hex(&[]), hex::encode(Md5::digest(b"DEFAULT")));
        assert_eq!(
            create_schema_md5_hex(&[2, 1]),
            hex::encode(Md5::digest(b"DEFAULT+1+2"))
        );
    }

    #[test]
    fn digest_of_columns_uses_numeric_ids() {
        let columns = [
            ColumnModel::new("7", "a", ColumnType::Integer),
            ColumnModel::new("3", "b", ColumnType::Boolean),
        ];
        assert_eq!(
            create_schema_md5_hex_for_columns(&columns).unwrap(),
            create_schema_md5_hex(&[3, 7])
        );
        let bad = [ColumnModel::new("x", "a", ColumnType::Integer)];
        assert!(create_schema_md5_hex_for_columns(&bad).is_err());
    }

    #[test]
    fn delimited_ids_round_trip() {
        assert_eq!(write_delimited_column_ids(&[1, 2, 3]), "1,2,3");
        assert_eq!(read_delimited_column_ids("1, 2,3").unwrap(), vec![1, 2, 3]);
        assert!(read_delimited_column_ids("").unwrap().is_empty());
        assert!(read_delimited_column_ids("1,x").is_err());
    }
}
