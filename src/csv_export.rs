//! Writing RowSets out as CSV, with `ROW_ID` and `ROW_VERSION` leading each
//! record.

use std::io::Write;

use log::debug;

use crate::{
    constants::{ROW_ID, ROW_VERSION},
    csv_upload::CsvReaderConfig,
    error::{Result, TableError},
    io_utils::open_csv_writer,
    mapper::column_id_to_index_map,
    rows::{Row, RowSet, validate_row_set},
    schema::{ColumnModel, SelectColumn},
    validate::validate_row_value,
};

pub fn create_column_name_header(headers: &[SelectColumn], include_row_id_and_version: bool) -> Vec<String> {
    let reserved = include_row_id_and_version
        .then_some([ROW_ID, ROW_VERSION])
        .into_iter()
        .flatten()
        .map(str::to_string);
    reserved
        .chain(headers.iter().map(|header| header.name.clone()))
        .collect()
}

fn identity_fields(row: &Row, row_number: usize) -> Result<[String; 2]> {
    let row_id = row.row_id.ok_or_else(|| {
        TableError::invalid_argument(format!("Row.rowId cannot be null for row number: {row_number}"))
    })?;
    let version = row.version_number.ok_or_else(|| {
        TableError::invalid_argument(format!(
            "Row.versionNumber cannot be null for row number: {row_number}"
        ))
    })?;
    Ok([row_id.to_string(), version.to_string()])
}

/// One CSV record for `row`. Null cells become empty fields.
pub fn write_row_to_string_array(row: &Row, include_row_id_and_version: bool) -> Result<Vec<String>> {
    let mut record = Vec::new();
    if include_row_id_and_version {
        record.extend(identity_fields(row, 0)?);
    }
    record.extend(
        row.values
            .iter()
            .flatten()
            .map(|value| value.clone().unwrap_or_default()),
    );
    Ok(record)
}

/// Validates every row of `set` against `schema` and writes it in schema
/// column order behind its row id and version. Deletes are written as the
/// id and version alone. Returns the number of records written.
pub fn validate_and_write_to_csv<W: Write>(
    schema: &[ColumnModel],
    set: &RowSet,
    out: &mut csv::Writer<W>,
) -> Result<usize> {
    validate_row_set(set)?;
    if schema.len() != set.headers.len() {
        return Err(TableError::invalid_argument(format!(
            "RowSet.headers size must be equal to the number of columns in the table.  The table has :{} columns and the passed RowSet.headers has: {}",
            schema.len(),
            set.headers.len()
        )));
    }
    let header_index = column_id_to_index_map(set.header_ids());
    let value_indices = schema
        .iter()
        .map(|column| {
            header_index.get(column.id.as_str()).copied().ok_or_else(|| {
                TableError::invalid_argument(format!(
                    "The Table's ColumnModels includes: name={} with id={} but {} was not found in the headers of the RowResults",
                    column.name, column.id, column.id
                ))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    for (row_number, row) in set.rows.iter().enumerate() {
        let mut record = identity_fields(row, row_number)?.to_vec();
        if let Some(values) = &row.values {
            if values.is_empty() {
                return Err(TableError::invalid_argument(format!(
                    "Row {row_number} has empty list of values"
                )));
            }
            if values.len() != schema.len() {
                return Err(TableError::invalid_argument(format!(
                    "Row.value size must be equal to the number of columns in the table.  The table has :{} columns and the passed Row.value has: {} for row number: {row_number}",
                    schema.len(),
                    values.len()
                )));
            }
            for (column_index, (column, &value_index)) in schema.iter().zip(&value_indices).enumerate() {
                let value = validate_row_value(
                    values[value_index].as_deref(),
                    column,
                    row_number,
                    column_index,
                )?;
                record.push(value.unwrap_or_default());
            }
        }
        out.write_record(&record)?;
    }
    out.flush()?;
    debug!("Wrote {} row(s) of {} as CSV", set.rows.len(), set.table_id);
    Ok(set.rows.len())
}

/// Writes a header line naming `schema` and then every row of `set`.
pub fn write_row_set<W: Write>(
    writer: W,
    schema: &[ColumnModel],
    set: &RowSet,
    config: &CsvReaderConfig,
) -> Result<usize> {
    let mut out = open_csv_writer(writer, config.separator, config.quote);
    let headers: Vec<SelectColumn> = schema.iter().map(SelectColumn::from).collect();
    out.write_record(create_column_name_header(&headers, true))?;
    validate_and_write_to_csv(schema, set, &mut out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnType;

    fn schema() -> Vec<ColumnModel> {
        vec![
            ColumnModel::new("1", "name", ColumnType::String).with_maximum_size(10),
            ColumnModel::new("2", "age", ColumnType::Integer),
        ]
    }

    fn written(out: csv::Writer<Vec<u8>>) -> String {
        let bytes = out.into_inner().unwrap_or_else(|_| panic!("flush"));
        String::from_utf8(bytes).expect("utf8")
    }

    #[test]
    fn header_optionally_leads_with_reserved_columns() {
        let headers: Vec<SelectColumn> = schema().iter().map(SelectColumn::from).collect();
        assert_eq!(
            create_column_name_header(&headers, true),
            vec!["ROW_ID", "ROW_VERSION", "name", "age"]
        );
        assert_eq!(create_column_name_header(&headers, false), vec!["name", "age"]);
    }

    #[test]
    fn row_array_needs_identity_only_when_asked() {
        let row = Row::new(vec![Some("a".to_string()), None]);
        assert_eq!(write_row_to_string_array(&row, false).unwrap(), vec!["a", ""]);
        assert!(write_row_to_string_array(&row, true).is_err());
        let row = row.with_row_id(3).with_version_number(1);
        assert_eq!(
            write_row_to_string_array(&row, true).unwrap(),
            vec!["3", "1", "a", ""]
        );
    }

    #[test]
    fn rows_are_written_in_schema_order() {
        let set = RowSet {
            table_id: "syn2".to_string(),
            etag: None,
            headers: schema().iter().rev().map(SelectColumn::from).collect(),
            rows: vec![
                Row::new(vec![Some("+7".to_string()), Some("bo\"b".to_string())])
                    .with_row_id(1)
                    .with_version_number(2),
                Row::default().with_row_id(5).with_version_number(2),
            ],
        };
        let mut out = open_csv_writer(Vec::new(), b',', b'"');
        assert_eq!(validate_and_write_to_csv(&schema(), &set, &mut out).unwrap(), 2);
        assert_eq!(written(out), "\"1\",\"2\",\"bo\"\"b\",\"7\"\n\"5\",\"2\"\n");
    }

    #[test]
    fn rows_without_identity_or_with_bad_values_are_rejected() {
        let mut set = RowSet {
            table_id: "syn2".to_string(),
            etag: None,
            headers: schema().iter().map(SelectColumn::from).collect(),
            rows: vec![Row::new(vec![Some("a".to_string()), Some("1".to_string())])],
        };
        let mut out = open_csv_writer(Vec::new(), b',', b'"');
        let err = validate_and_write_to_csv(&schema(), &set, &mut out).expect_err("no row id");
        assert_eq!(err.to_string(), "Row.rowId cannot be null for row number: 0");

        set.rows[0] = Row::new(vec![Some("a".to_string()), Some("old".to_string())])
            .with_row_id(1)
            .with_version_number(1);
        let err = validate_and_write_to_csv(&schema(), &set, &mut out).expect_err("bad integer");
        assert!(matches!(err, TableError::ValueValidation { .. }));

        set.headers.pop();
        assert!(validate_and_write_to_csv(&schema(), &set, &mut out).is_err());
    }
}
