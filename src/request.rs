//! Byte-budget admission checks for row uploads and the per-table semaphore
//! key.
//!
//! Worst-case sizes come from the column definitions; actual sizes count the
//! characters a row carries. Both assume [`MAX_BYTES_PER_CHAR_UTF_8`] bytes per
//! character and fixed-width row id and version integers.

use log::warn;

use crate::{
    constants::{MAX_BYTES_PER_CHAR_UTF_8, column_constants},
    error::{Result, TableError},
    mapper::ColumnMapper,
    rows::{IdAndVersion, PartialRow, PartialRowSet, Row, RowSet},
    schema::{ColumnModel, ColumnType},
};

const TABLE_LOCK_PREFIX: &str = "TABLE-LOCK-";

pub fn calculate_max_size_for_type(column_type: ColumnType, max_size: Option<i64>) -> Result<usize> {
    column_type.max_bytes(max_size)
}

pub fn calculate_max_row_size<'a, I>(columns: I) -> Result<usize>
where
    I: IntoIterator<Item = &'a ColumnModel>,
{
    columns.into_iter().try_fold(0usize, |total, column| {
        let bytes = calculate_max_size_for_type(column.column_type, column.maximum_size)?;
        Ok(total.saturating_add(bytes))
    })
}

fn row_identity_bytes() -> usize {
    column_constants().max_integer_bytes_as_string * 2
}

fn text_bytes(value: &str) -> usize {
    value.chars().count() * MAX_BYTES_PER_CHAR_UTF_8
}

pub fn calculate_actual_row_size(row: &Row) -> usize {
    let values = row
        .values
        .iter()
        .flatten()
        .flatten()
        .map(|value| text_bytes(value))
        .sum::<usize>();
    row_identity_bytes() + values
}

/// Partial rows also pay for their column-id keys.
pub fn calculate_partial_row_size(row: &PartialRow) -> usize {
    let values = row
        .values
        .iter()
        .flatten()
        .map(|(key, value)| text_bytes(key) + value.as_deref().map_or(0, text_bytes))
        .sum::<usize>();
    row_identity_bytes() + values
}

fn reject(max_bytes: usize, estimated: usize, table_id: &str) -> TableError {
    warn!("Rejecting request for {table_id}: {estimated} bytes exceeds the {max_bytes} byte limit");
    TableError::RequestTooLarge { max_bytes }
}

/// Whether `row_count` rows at the worst-case size of `columns` fit in
/// `max_bytes`. Needs no row data, so a stream can be sized before it is read.
pub fn is_request_within_max_bytes<'a, I>(columns: I, row_count: usize, max_bytes: usize) -> Result<bool>
where
    I: IntoIterator<Item = &'a ColumnModel>,
{
    let max_row_size = calculate_max_row_size(columns)?;
    Ok(max_row_size.saturating_mul(row_count) <= max_bytes)
}

/// Largest number of worst-case rows of `columns` that fit in `max_bytes`.
/// Always at least one.
pub fn max_rows_per_request<'a, I>(columns: I, max_bytes: usize) -> Result<usize>
where
    I: IntoIterator<Item = &'a ColumnModel>,
{
    let max_row_size = calculate_max_row_size(columns)?;
    Ok((max_bytes / max_row_size.max(1)).max(1))
}

/// Checks the worst-case size of `row_set` (headers resolved against
/// `schema`) times its row count against `max_bytes`. Headers without a
/// column id are ignored.
pub fn validate_request_size(schema: &[ColumnModel], row_set: &RowSet, max_bytes: usize) -> Result<()> {
    let mapper = ColumnMapper::new(schema);
    let header_columns = row_set
        .header_ids()
        .into_iter()
        .flatten()
        .map(|id| {
            mapper.column_by_id(id).ok_or_else(|| {
                TableError::schema(format!(
                    "The column ID {id} is not a valid column ID for this table"
                ))
            })
        })
        .collect::<Result<Vec<_>>>()?;
    if !is_request_within_max_bytes(header_columns.iter().copied(), row_set.rows.len(), max_bytes)? {
        let estimated = calculate_max_row_size(header_columns)?.saturating_mul(row_set.rows.len());
        return Err(reject(max_bytes, estimated, &row_set.table_id));
    }
    Ok(())
}

/// Checks the measured size of every partial row against `max_bytes`.
pub fn validate_partial_request_size(partial_set: &PartialRowSet, max_bytes: usize) -> Result<()> {
    let measured = partial_set
        .rows
        .iter()
        .map(calculate_partial_row_size)
        .fold(0usize, usize::saturating_add);
    if measured > max_bytes {
        return Err(reject(max_bytes, measured, &partial_set.table_id));
    }
    Ok(())
}

/// Key of the semaphore guarding writes to a table, with the version appended
/// when the table is pinned to one.
pub fn get_table_semaphore_key(table: &IdAndVersion) -> String {
    match table.version {
        Some(version) => format!("{TABLE_LOCK_PREFIX}{}-{version}", table.id),
        None => format!("{TABLE_LOCK_PREFIX}{}", table.id),
    }
}
