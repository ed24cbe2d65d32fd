//! Sparse change sets: per-request batches of row mutations against a known
//! schema, their DTO form, and the gzip JSON wire codec.
//!
//! A [`SparseChangeSet`] only stores the cells a row actually carries. A row
//! without cells is a delete. Every cell written through [`SparseRowMut`] is
//! validated against its column, so a change set never holds a value its
//! schema would reject.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    io::{Read, Write},
};

use flate2::{Compression, read::GzDecoder, write::GzEncoder};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, TableError},
    identity::RowIdentity,
    mapper::column_id_to_index_map,
    rows::{
        PartialRow, PartialRowSet, Row, RowSet, is_null_or_invalid, parse_file_handle_id,
        validate_row_set,
    },
    schema::{ColumnModel, ColumnType, SelectColumn, parse_column_id},
    validate::validate_row_value,
};

const PARTIAL_ROW_KEY_NOT_VALID: &str = "is not a valid column ID for row ID";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SparseRowDto {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_number: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<BTreeMap<String, Option<String>>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SparseChangeSetDto {
    pub table_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    pub column_ids: Vec<String>,
    pub rows: Vec<SparseRowDto>,
}

/// Writes `dto` as gzip-compressed JSON.
pub fn write_compressed<W: Write>(dto: &SparseChangeSetDto, writer: W) -> Result<()> {
    let mut encoder = GzEncoder::new(writer, Compression::default());
    serde_json::to_writer(&mut encoder, dto)?;
    encoder.finish()?;
    Ok(())
}

pub fn read_compressed<R: Read>(reader: R) -> Result<SparseChangeSetDto> {
    let decoder = GzDecoder::new(reader);
    Ok(serde_json::from_reader(decoder)?)
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SchemaIndex {
    columns: Vec<ColumnModel>,
    index_by_id: HashMap<String, usize>,
}

impl SchemaIndex {
    fn new(columns: &[ColumnModel]) -> Self {
        let index_by_id = columns
            .iter()
            .enumerate()
            .map(|(idx, column)| (column.id.clone(), idx))
            .collect();
        SchemaIndex {
            columns: columns.to_vec(),
            index_by_id,
        }
    }

    fn lookup(&self, column_id: &str) -> Result<(usize, &ColumnModel)> {
        self.index_by_id
            .get(column_id)
            .map(|&idx| (idx, &self.columns[idx]))
            .ok_or_else(|| {
                TableError::schema(format!("ColumnModel not found for column ID: {column_id}"))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparseRow {
    row_index: usize,
    row_id: Option<i64>,
    version_number: Option<i64>,
    etag: Option<String>,
    values: BTreeMap<String, Option<String>>,
}

impl SparseRow {
    fn new(row_index: usize) -> Self {
        SparseRow {
            row_index,
            row_id: None,
            version_number: None,
            etag: None,
            values: BTreeMap::new(),
        }
    }

    /// Position of the row within its change set.
    pub fn row_index(&self) -> usize {
        self.row_index
    }

    pub fn row_id(&self) -> Option<i64> {
        self.row_id
    }

    pub fn version_number(&self) -> Option<i64> {
        self.version_number
    }

    pub fn row_etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    pub fn set_row_id(&mut self, row_id: Option<i64>) {
        self.row_id = row_id;
    }

    pub fn set_version_number(&mut self, version_number: Option<i64>) {
        self.version_number = version_number;
    }

    pub fn set_row_etag(&mut self, etag: Option<String>) {
        self.etag = etag;
    }

    pub fn has_cell_value(&self, column_id: &str) -> bool {
        self.values.contains_key(column_id)
    }

    /// The cell for `column_id`. A cell that was explicitly set to null is
    /// `Ok(None)`; a cell the row does not carry is an error.
    pub fn cell_value(&self, column_id: &str) -> Result<Option<&str>> {
        self.values
            .get(column_id)
            .map(|value| value.as_deref())
            .ok_or_else(|| {
                TableError::invalid_argument(format!(
                    "Cell value does not exist for column Id: {column_id}"
                ))
            })
    }

    pub fn cell_values(&self) -> &BTreeMap<String, Option<String>> {
        &self.values
    }

    /// A row without cells is a delete.
    pub fn is_delete(&self) -> bool {
        self.values.is_empty()
    }
}

impl RowIdentity for SparseRow {
    fn row_id(&self) -> Option<i64> {
        self.row_id
    }

    fn version_number(&self) -> Option<i64> {
        self.version_number
    }

    fn assign_row_id(&mut self, row_id: i64) {
        self.row_id = Some(row_id);
    }

    fn assign_version_number(&mut self, version_number: i64) {
        self.version_number = Some(version_number);
    }
}

/// Mutable access to one row, carrying the schema needed to validate cells.
#[derive(Debug)]
pub struct SparseRowMut<'a> {
    schema: &'a SchemaIndex,
    row: &'a mut SparseRow,
}

impl SparseRowMut<'_> {
    pub fn row(&self) -> &SparseRow {
        &*self.row
    }

    pub fn set_row_id(&mut self, row_id: Option<i64>) -> &mut Self {
        self.row.set_row_id(row_id);
        self
    }

    pub fn set_version_number(&mut self, version_number: Option<i64>) -> &mut Self {
        self.row.set_version_number(version_number);
        self
    }

    pub fn set_row_etag(&mut self, etag: Option<String>) -> &mut Self {
        self.row.set_row_etag(etag);
        self
    }

    /// Validates `value` against the column and stores the canonical form.
    pub fn set_cell_value(&mut self, column_id: &str, value: Option<&str>) -> Result<&mut Self> {
        let (column_index, column) = self.schema.lookup(column_id)?;
        let value = validate_row_value(value, column, self.row.row_index, column_index)?;
        self.row.values.insert(column.id.clone(), value);
        Ok(self)
    }

    pub fn remove_value(&mut self, column_id: &str) -> &mut Self {
        self.row.values.remove(column_id);
        self
    }
}

/// Rows sharing the same set of present columns.
#[derive(Debug)]
pub struct Grouping<'a> {
    pub columns: Vec<&'a ColumnModel>,
    pub rows: Vec<&'a SparseRow>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparseChangeSet {
    table_id: String,
    etag: Option<String>,
    schema: SchemaIndex,
    rows: Vec<SparseRow>,
}

impl SparseChangeSet {
    pub fn new(table_id: impl Into<String>, schema: &[ColumnModel], etag: Option<String>) -> Result<Self> {
        let table_id = table_id.into();
        if table_id.trim().is_empty() {
            return Err(TableError::invalid_argument("tableId is required"));
        }
        Ok(SparseChangeSet {
            table_id,
            etag,
            schema: SchemaIndex::new(schema),
            rows: Vec::new(),
        })
    }

    pub fn from_dto(dto: &SparseChangeSetDto, schema: &[ColumnModel]) -> Result<Self> {
        let mut set = SparseChangeSet::new(dto.table_id.clone(), schema, dto.etag.clone())?;
        set.add_all_rows(&dto.rows)?;
        Ok(set)
    }

    /// Adds DTO rows. Cells for columns outside the schema are dropped.
    pub fn add_all_rows(&mut self, rows: &[SparseRowDto]) -> Result<()> {
        let column_ids: Vec<String> = self.schema.columns.iter().map(|c| c.id.clone()).collect();
        for dto in rows {
            let mut row = self.add_empty_row();
            row.set_row_id(dto.row_id)
                .set_version_number(dto.version_number)
                .set_row_etag(dto.etag.clone());
            if let Some(values) = &dto.values {
                for column_id in &column_ids {
                    if let Some(value) = values.get(column_id) {
                        row.set_cell_value(column_id, value.as_deref())?;
                    }
                }
            }
        }
        Ok(())
    }

    pub fn write_to_dto(&self) -> SparseChangeSetDto {
        let rows = self
            .rows
            .iter()
            .map(|row| SparseRowDto {
                row_id: row.row_id,
                version_number: row.version_number,
                etag: row.etag.clone(),
                values: Some(row.values.clone()),
            })
            .collect();
        SparseChangeSetDto {
            table_id: self.table_id.clone(),
            etag: self.etag.clone(),
            column_ids: self.schema.columns.iter().map(|c| c.id.clone()).collect(),
            rows,
        }
    }

    pub fn write_compressed<W: Write>(&self, writer: W) -> Result<()> {
        write_compressed(&self.write_to_dto(), writer)
    }

    pub fn read_compressed<R: Read>(reader: R, schema: &[ColumnModel]) -> Result<Self> {
        let dto = read_compressed(reader)?;
        SparseChangeSet::from_dto(&dto, schema)
    }

    pub fn table_id(&self) -> &str {
        &self.table_id
    }

    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    pub fn set_etag(&mut self, etag: Option<String>) {
        self.etag = etag;
    }

    pub fn schema(&self) -> &[ColumnModel] {
        &self.schema.columns
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> &[SparseRow] {
        &self.rows
    }

    pub fn rows_mut(&mut self) -> &mut [SparseRow] {
        &mut self.rows
    }

    pub fn add_empty_row(&mut self) -> SparseRowMut<'_> {
        let index = self.rows.len();
        self.rows.push(SparseRow::new(index));
        SparseRowMut {
            schema: &self.schema,
            row: &mut self.rows[index],
        }
    }

    pub fn row_mut(&mut self, index: usize) -> Option<SparseRowMut<'_>> {
        let schema = &self.schema;
        self.rows
            .get_mut(index)
            .map(|row| SparseRowMut { schema, row })
    }

    pub fn column_model(&self, column_id: &str) -> Result<&ColumnModel> {
        self.schema.lookup(column_id).map(|(_, column)| column)
    }

    pub fn column_index(&self, column_id: &str) -> Result<usize> {
        self.schema.lookup(column_id).map(|(idx, _)| idx)
    }

    /// A change set handed to persistence must carry at least one row.
    pub fn validate(&self) -> Result<()> {
        if self.rows.is_empty() {
            return Err(TableError::invalid_argument(
                "SparseChangeSet must contain at least one row.",
            ));
        }
        Ok(())
    }

    /// Groups rows by the set of columns they carry, in schema order.
    pub fn group_by_valid_values(&self) -> Vec<Grouping<'_>> {
        let mut positions: HashMap<Vec<usize>, usize> = HashMap::new();
        let mut groups: Vec<Grouping<'_>> = Vec::new();
        for row in &self.rows {
            let key: Vec<usize> = self
                .schema
                .columns
                .iter()
                .enumerate()
                .filter(|(_, column)| row.has_cell_value(&column.id))
                .map(|(idx, _)| idx)
                .collect();
            match positions.get(&key) {
                Some(&position) => groups[position].rows.push(row),
                None => {
                    let columns = key.iter().map(|&idx| &self.schema.columns[idx]).collect();
                    positions.insert(key, groups.len());
                    groups.push(Grouping {
                        columns,
                        rows: vec![row],
                    });
                }
            }
        }
        groups
    }

    /// File handle ids referenced by FILEHANDLEID cells.
    pub fn file_handle_ids(&self) -> Result<BTreeSet<i64>> {
        let file_columns: Vec<&str> = self
            .schema
            .columns
            .iter()
            .filter(|c| c.column_type == ColumnType::FileHandleId)
            .map(|c| c.id.as_str())
            .collect();
        let mut ids = BTreeSet::new();
        for row in &self.rows {
            for column_id in &file_columns {
                let value = row.values.get(*column_id).and_then(|v| v.as_deref());
                if let Some(id) = parse_file_handle_id(value)? {
                    ids.insert(id);
                }
            }
        }
        Ok(ids)
    }

    /// Builds a change set from a full RowSet. The header-id→index map is
    /// built once; header columns outside `schema` are ignored, but a row with
    /// values must share at least one column with `schema` so it cannot turn
    /// into a delete.
    pub fn from_row_set(row_set: &RowSet, schema: &[ColumnModel]) -> Result<Self> {
        validate_row_set(row_set)?;
        let header_index = column_id_to_index_map(row_set.header_ids());
        let mut set = SparseChangeSet::new(row_set.table_id.clone(), schema, row_set.etag.clone())?;
        let overlapping: Vec<(String, usize)> = schema
            .iter()
            .filter_map(|c| header_index.get(c.id.as_str()).map(|&idx| (c.id.clone(), idx)))
            .collect();
        let header_count = row_set.headers.len();
        for (row_number, source) in row_set.rows.iter().enumerate() {
            let mut row = set.add_empty_row();
            row.set_row_id(source.row_id)
                .set_version_number(source.version_number)
                .set_row_etag(source.etag.clone());
            let Some(values) = source.values.as_ref().filter(|v| !v.is_empty()) else {
                continue;
            };
            if values.len() != header_count {
                return Err(TableError::invalid_argument(format!(
                    "Row.values size must be equal to the number of headers. The RowSet has {header_count} headers and row number {row_number} has {} values",
                    values.len()
                )));
            }
            if overlapping.is_empty() {
                return Err(TableError::invalid_argument(format!(
                    "Row number {row_number} has values but none of the RowSet headers are columns of the table"
                )));
            }
            for (column_id, value_index) in &overlapping {
                row.set_cell_value(column_id, values[*value_index].as_deref())?;
            }
        }
        debug!(
            "Converted RowSet for {} into {} sparse row(s) across {} column(s)",
            set.table_id,
            set.row_count(),
            overlapping.len()
        );
        Ok(set)
    }

    /// Expands the change set into a full RowSet whose headers are the
    /// schema. Cells a row does not carry become null.
    pub fn to_row_set(&self) -> RowSet {
        let headers: Vec<SelectColumn> = self.schema.columns.iter().map(SelectColumn::from).collect();
        let rows = self
            .rows
            .iter()
            .map(|sparse| Row {
                row_id: sparse.row_id,
                version_number: sparse.version_number,
                etag: sparse.etag.clone(),
                values: (!sparse.is_delete()).then(|| {
                    self.schema
                        .columns
                        .iter()
                        .map(|c| sparse.values.get(&c.id).cloned().flatten())
                        .collect()
                }),
            })
            .collect();
        RowSet {
            table_id: self.table_id.clone(),
            etag: self.etag.clone(),
            headers,
            rows,
        }
    }

    /// Builds a change set from client partial rows. Every key must be a
    /// column id of `schema`; absent keys stay absent.
    pub fn from_partial_row_set(
        partial: &PartialRowSet,
        schema: &[ColumnModel],
        etag: Option<String>,
    ) -> Result<Self> {
        if partial.rows.is_empty() {
            return Err(TableError::invalid_argument(
                "PartialRowSet.rows must contain at least one row.",
            ));
        }
        let mut set = SparseChangeSet::new(partial.table_id.clone(), schema, etag)?;
        for source in &partial.rows {
            validate_partial_row(source, &set.schema)?;
            if is_null_or_invalid(source.row_id) && source.is_delete() {
                return Err(TableError::invalid_argument(
                    "PartialRow.values cannot be empty for a new row",
                ));
            }
            let mut row = set.add_empty_row();
            row.set_row_id(source.row_id).set_row_etag(source.etag.clone());
            if let Some(values) = &source.values {
                for (column_id, value) in values {
                    row.set_cell_value(column_id, value.as_deref())?;
                }
            }
        }
        Ok(set)
    }
}

fn validate_partial_row(row: &PartialRow, schema: &SchemaIndex) -> Result<()> {
    let Some(values) = &row.values else {
        return Ok(());
    };
    let row_label = row
        .row_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "null".to_string());
    for key in values.keys() {
        let known = parse_column_id(key).is_ok() && schema.index_by_id.contains_key(key);
        if !known {
            return Err(TableError::invalid_argument(format!(
                "PartialRow.value.key: '{key}' {PARTIAL_ROW_KEY_NOT_VALID}: {row_label}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Vec<ColumnModel> {
        vec![
            ColumnModel::new("1", "name", ColumnType::String).with_maximum_size(10),
            ColumnModel::new("2", "age", ColumnType::Integer).with_default_value("0"),
            ColumnModel::new("3", "file", ColumnType::FileHandleId),
        ]
    }

    #[test]
    fn set_cell_value_validates_and_normalizes() {
        let mut set = SparseChangeSet::new("syn1", &schema(), None).unwrap();
        let mut row = set.add_empty_row();
        row.set_cell_value("2", Some("+5")).unwrap();
        assert_eq!(row.row().cell_value("2").unwrap(), Some("5"));

        let err = row.set_cell_value("2", Some("five")).expect_err("bad integer");
        assert!(err.to_string().starts_with("Value at [0,1]"));

        let err = row.set_cell_value("9", Some("x")).expect_err("unknown column");
        assert!(matches!(err, TableError::Schema(_)));
    }

    #[test]
    fn rows_without_cells_are_deletes() {
        let mut set = SparseChangeSet::new("syn1", &schema(), None).unwrap();
        set.add_empty_row().set_row_id(Some(4));
        assert!(set.rows()[0].is_delete());
        let mut row = set.row_mut(0).expect("row exists");
        row.set_cell_value("1", Some("a")).unwrap();
        assert!(!row.row().is_delete());
        row.remove_value("1");
        assert!(row.row().is_delete());
    }

    #[test]
    fn missing_cell_is_an_error_but_null_cell_is_not() {
        let mut set = SparseChangeSet::new("syn1", &schema(), None).unwrap();
        set.add_empty_row().set_cell_value("1", None).unwrap();
        let row = &set.rows()[0];
        assert_eq!(row.cell_value("1").unwrap(), None);
        assert!(row.cell_value("2").is_err());
    }

    #[test]
    fn blank_table_id_is_rejected() {
        assert!(SparseChangeSet::new(" ", &schema(), None).is_err());
    }

    #[test]
    fn empty_change_set_fails_validation() {
        let set = SparseChangeSet::new("syn1", &schema(), None).unwrap();
        assert!(set.validate().is_err());
    }

    #[test]
    fn group_by_valid_values_keeps_first_seen_order() {
        let mut set = SparseChangeSet::new("syn1", &schema(), None).unwrap();
        set.add_empty_row().set_cell_value("2", Some("1")).unwrap();
        set.add_empty_row().set_cell_value("1", Some("a")).unwrap();
        set.add_empty_row().set_cell_value("2", Some("3")).unwrap();
        let groups = set.group_by_valid_values();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].columns[0].id, "2");
        assert_eq!(groups[0].rows.len(), 2);
        assert_eq!(groups[1].columns[0].id, "1");
    }

    #[test]
    fn file_handle_ids_are_collected() {
        let mut set = SparseChangeSet::new("syn1", &schema(), None).unwrap();
        set.add_empty_row().set_cell_value("3", Some("77")).unwrap();
        set.add_empty_row().set_cell_value("3", None).unwrap();
        set.add_empty_row().set_cell_value("3", Some("12")).unwrap();
        let ids: Vec<i64> = set.file_handle_ids().unwrap().into_iter().collect();
        assert_eq!(ids, vec![12, 77]);
    }

    #[test]
    fn dto_drops_unknown_columns() {
        let mut values = BTreeMap::new();
        values.insert("1".to_string(), Some("x".to_string()));
        values.insert("99".to_string(), Some("ignored".to_string()));
        let dto = SparseChangeSetDto {
            table_id: "syn1".to_string(),
            etag: Some("e".to_string()),
            column_ids: vec!["1".to_string()],
            rows: vec![SparseRowDto {
                row_id: Some(3),
                version_number: Some(2),
                etag: None,
                values: Some(values),
            }],
        };
        let set = SparseChangeSet::from_dto(&dto, &schema()).unwrap();
        let back = set.write_to_dto();
        assert_eq!(back.etag.as_deref(), Some("e"));
        assert_eq!(back.column_ids, vec!["1", "2", "3"]);
        let row_values = back.rows[0].values.as_ref().unwrap();
        assert_eq!(row_values.len(), 1);
        assert_eq!(row_values.get("1"), Some(&Some("x".to_string())));
    }

    #[test]
    fn compressed_wire_format_round_trips() {
        let mut set = SparseChangeSet::new("syn1", &schema(), Some("etag".to_string())).unwrap();
        set.add_empty_row()
            .set_row_id(Some(1))
            .set_cell_value("1", Some("hello"))
            .unwrap();
        let mut buffer = Vec::new();
        set.write_compressed(&mut buffer).unwrap();
        assert_eq!(&buffer[..2], &[0x1f, 0x8b]);
        let back = SparseChangeSet::read_compressed(buffer.as_slice(), &schema()).unwrap();
        assert_eq!(back, set);
    }

    #[test]
    fn partial_rows_reject_unknown_keys() {
        let partial = PartialRowSet {
            table_id: "syn1".to_string(),
            rows: vec![PartialRow::new([("abc", Some("1".to_string()))]).with_row_id(1)],
        };
        let err = SparseChangeSet::from_partial_row_set(&partial, &schema(), None)
            .expect_err("bad key");
        assert!(err.to_string().contains("'abc' is not a valid column ID for row ID: 1"));
    }

    #[test]
    fn partial_rows_keep_only_named_columns() {
        let partial = PartialRowSet {
            table_id: "syn1".to_string(),
            rows: vec![
                PartialRow::new([("2", Some("8".to_string()))]).with_row_id(5),
                PartialRow::default().with_row_id(6),
            ],
        };
        let set = SparseChangeSet::from_partial_row_set(&partial, &schema(), None).unwrap();
        assert_eq!(set.row_count(), 2);
        assert!(!set.rows()[0].has_cell_value("1"));
        assert_eq!(set.rows()[0].cell_value("2").unwrap(), Some("8"));
        assert!(set.rows()[1].is_delete());
    }

    #[test]
    fn new_partial_row_needs_values() {
        let partial = PartialRowSet {
            table_id: "syn1".to_string(),
            rows: vec![PartialRow::default()],
        };
        assert!(SparseChangeSet::from_partial_row_set(&partial, &schema(), None).is_err());
    }
}
