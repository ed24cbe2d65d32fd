//! CSV uploads: reader configuration, column type sniffing, a streaming row
//! reader aligned to a table schema, and an upload preview.
//!
//! Everything here works one record at a time. The sniffer keeps a single
//! hypothesis per column and revises it as values arrive, so no look-ahead or
//! whole-file buffering is needed.

use std::{collections::HashMap, io::BufRead};

use encoding_rs::Encoding;
use itertools::Itertools;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{
    constants::{MAX_ALLOWED_STRING_SIZE, MAX_LARGE_TEXT_CHARACTERS, ROW_ID, ROW_VERSION},
    error::{Result, TableError},
    io_utils::{decode_record, open_csv_reader, skip_lines},
    mapper::{ColumnMapper, HeaderTarget},
    rows::{Row, RowSet},
    schema::{ColumnModel, ColumnType, SelectColumn},
    validate::{validate_row_value, validate_value},
};

pub const DEFAULT_SEPARATOR: char = ',';
pub const DEFAULT_QUOTE_CHARACTER: char = '"';
pub const DEFAULT_ESCAPE_CHARACTER: char = '\\';

/// Typed candidates in the order the sniffer tries them. STRING is the
/// fallback when none parses.
const CANDIDATE_TYPES: [ColumnType; 5] = [
    ColumnType::Boolean,
    ColumnType::Integer,
    ColumnType::Double,
    ColumnType::Date,
    ColumnType::EntityId,
];

/// How a client describes its CSV file.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsvTableDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub separator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote_character: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escape_character: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_first_line_header: Option<bool>,
}

/// Resolved reader settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsvReaderConfig {
    pub separator: u8,
    pub quote: u8,
    pub escape: u8,
    pub has_header: bool,
    pub lines_to_skip: usize,
}

impl Default for CsvReaderConfig {
    fn default() -> Self {
        CsvReaderConfig {
            separator: DEFAULT_SEPARATOR as u8,
            quote: DEFAULT_QUOTE_CHARACTER as u8,
            escape: DEFAULT_ESCAPE_CHARACTER as u8,
            has_header: true,
            lines_to_skip: 0,
        }
    }
}

impl CsvReaderConfig {
    pub fn from_descriptor(
        descriptor: Option<&CsvTableDescriptor>,
        lines_to_skip: Option<usize>,
    ) -> Result<Self> {
        let defaults = CsvReaderConfig::default();
        let Some(descriptor) = descriptor else {
            return Ok(CsvReaderConfig {
                lines_to_skip: lines_to_skip.unwrap_or(0),
                ..defaults
            });
        };
        Ok(CsvReaderConfig {
            separator: single_character("separator", descriptor.separator.as_deref())?
                .unwrap_or(defaults.separator),
            quote: single_character("quoteCharacter", descriptor.quote_character.as_deref())?
                .unwrap_or(defaults.quote),
            escape: single_character("escapeCharacter", descriptor.escape_character.as_deref())?
                .unwrap_or(defaults.escape),
            has_header: descriptor.is_first_line_header.unwrap_or(true),
            lines_to_skip: lines_to_skip.unwrap_or(0),
        })
    }
}

fn single_character(field: &str, value: Option<&str>) -> Result<Option<u8>> {
    let Some(value) = value else {
        return Ok(None);
    };
    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some(ch), None) if ch.is_ascii() => Ok(Some(ch as u8)),
        (Some(_), None) => Err(TableError::malformed_csv(format!(
            "CsvTableDescriptor.{field} must be an ASCII character."
        ))),
        _ => Err(TableError::malformed_csv(format!(
            "CsvTableDescriptor.{field} must be exactly one character."
        ))),
    }
}

fn string_model(length: usize) -> Result<ColumnModel> {
    if length > MAX_LARGE_TEXT_CHARACTERS {
        return Err(TableError::malformed_csv(format!(
            "Value exceeds the maximum number of characters: {MAX_LARGE_TEXT_CHARACTERS}"
        )));
    }
    match i64::try_from(length) {
        Ok(size) if size <= MAX_ALLOWED_STRING_SIZE => {
            Ok(ColumnModel::new("", "", ColumnType::String).with_maximum_size(size))
        }
        _ => Ok(ColumnModel::new("", "", ColumnType::LargeText)),
    }
}

fn widen_string_model(current: &ColumnModel, length: usize) -> Result<ColumnModel> {
    if current.column_type == ColumnType::LargeText {
        if length > MAX_LARGE_TEXT_CHARACTERS {
            return string_model(length);
        }
        return Ok(current.clone());
    }
    let current_size = current.maximum_size.unwrap_or_default();
    if i64::try_from(length).is_ok_and(|length| length <= current_size) {
        return Ok(current.clone());
    }
    let mut widened = string_model(length)?;
    if widened.column_type == ColumnType::String {
        widened.column_type = current.column_type;
    }
    Ok(widened)
}

fn keep_identity(mut model: ColumnModel, current: Option<&ColumnModel>) -> ColumnModel {
    if let Some(current) = current {
        model.id.clone_from(&current.id);
        model.name.clone_from(&current.name);
    }
    model
}

/// Revises a column's type hypothesis with one more cell.
///
/// Blank cells keep the hypothesis. A typed hypothesis survives values it
/// validates; otherwise inference restarts from this value alone. A STRING
/// hypothesis only ever grows to fit longer values.
pub fn check_type(value: Option<&str>, current: Option<&ColumnModel>) -> Result<Option<ColumnModel>> {
    let Some(value) = value.filter(|v| !v.trim().is_empty()) else {
        return Ok(current.cloned());
    };
    let length = value.chars().count();
    if let Some(current) = current {
        if current.column_type.is_string_family() {
            let widened = widen_string_model(current, length)?;
            return Ok(Some(keep_identity(widened, Some(current))));
        }
        if validate_value(value, current).is_ok() {
            return Ok(Some(current.clone()));
        }
        debug!(
            "Value '{value}' does not fit {} column '{}'; re-inferring",
            current.column_type, current.name
        );
    }
    let inferred = match CANDIDATE_TYPES
        .into_iter()
        .find(|candidate| candidate.parse_value(value).is_ok())
    {
        Some(candidate) => ColumnModel::new("", "", candidate),
        None => string_model(length)?,
    };
    Ok(Some(keep_identity(inferred, current)))
}

/// Runs [`check_type`] over one row against the shared per-column hypotheses.
/// Cells beyond `current` are ignored.
pub fn check_types<S: AsRef<str>>(row: &[S], current: &mut [Option<ColumnModel>]) -> Result<()> {
    for (cell, hypothesis) in row.iter().zip(current.iter_mut()) {
        *hypothesis = check_type(Some(cell.as_ref()), hypothesis.as_ref())?;
    }
    Ok(())
}

fn parse_reserved(value: &str, header: &str, line: usize) -> Result<Option<i64>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed.parse::<i64>().map(Some).map_err(|_| {
        TableError::malformed_csv(format!(
            "{header} value '{value}' on line {line} is not an integer"
        ))
    })
}

/// Streams rows out of a CSV, validating each cell against its column.
///
/// Rows are aligned to [`CsvRowReader::headers`]: the schema columns the file
/// carries, in file order. Without a header line every schema column is
/// expected, positionally. A header naming no schema column is rejected.
pub struct CsvRowReader<R: BufRead> {
    reader: csv::Reader<R>,
    encoding: &'static Encoding,
    schema: Vec<ColumnModel>,
    targets: Vec<Option<HeaderTarget>>,
    schema_index: HashMap<String, usize>,
    row_positions: HashMap<String, usize>,
    record: csv::ByteRecord,
    line: usize,
    row_index: usize,
    finished: bool,
}

impl<R: BufRead> CsvRowReader<R> {
    pub fn new(
        mut input: R,
        schema: &[ColumnModel],
        config: &CsvReaderConfig,
        encoding: &'static Encoding,
    ) -> Result<Self> {
        let skipped = skip_lines(&mut input, config.lines_to_skip)?;
        let mut reader = open_csv_reader(input, config.separator, config.quote, config.escape);
        let mapper = ColumnMapper::new(schema);
        let mut record = csv::ByteRecord::new();
        let mut line = skipped;
        let (targets, finished) = if config.has_header {
            if reader.read_byte_record(&mut record)? {
                line += 1;
                let header = decode_record(&record, encoding)?;
                let trimmed: Vec<&str> = header.iter().map(|cell| cell.trim()).collect();
                (mapper.resolve_header_names(&trimmed)?, false)
            } else {
                (Vec::new(), true)
            }
        } else {
            let positional = schema
                .iter()
                .map(|c| Some(HeaderTarget::Column(c.id.clone())))
                .collect();
            (positional, false)
        };
        let column_ids: Vec<&String> = targets
            .iter()
            .flatten()
            .filter_map(|target| match target {
                HeaderTarget::Column(id) => Some(id),
                _ => None,
            })
            .collect();
        if !finished && column_ids.is_empty() {
            return Err(TableError::malformed_csv(
                "The CSV header does not name any column of the table",
            ));
        }
        if let Some(duplicate) = column_ids.iter().duplicates().next() {
            return Err(TableError::malformed_csv(format!(
                "The column with ID {duplicate} appears more than once in the header"
            )));
        }
        let row_positions = column_ids
            .into_iter()
            .enumerate()
            .map(|(position, id)| (id.clone(), position))
            .collect();
        let schema_index = schema
            .iter()
            .enumerate()
            .map(|(idx, c)| (c.id.clone(), idx))
            .collect();
        Ok(CsvRowReader {
            reader,
            encoding,
            schema: schema.to_vec(),
            targets,
            schema_index,
            row_positions,
            record,
            line,
            row_index: 0,
            finished,
        })
    }

    /// Result headers for the rows this reader yields.
    pub fn headers(&self) -> Vec<SelectColumn> {
        self.column_targets()
            .filter_map(|id| self.schema_index.get(id))
            .map(|&idx| SelectColumn::from(&self.schema[idx]))
            .collect()
    }

    fn column_targets(&self) -> impl Iterator<Item = &str> {
        self.targets.iter().flatten().filter_map(|target| match target {
            HeaderTarget::Column(id) => Some(id.as_str()),
            _ => None,
        })
    }

    /// Drains the reader into a RowSet for `table_id`.
    pub fn into_row_set(self, table_id: impl Into<String>) -> Result<RowSet> {
        let headers = self.headers();
        let rows = self.collect::<Result<Vec<_>>>()?;
        Ok(RowSet {
            table_id: table_id.into(),
            etag: None,
            headers,
            rows,
        })
    }

    fn convert_record(&self, cells: Vec<String>) -> Result<Row> {
        if cells.len() < self.targets.len() {
            return Err(TableError::malformed_csv(format!(
                "Line {} has {} value(s) but {} were expected",
                self.line,
                cells.len(),
                self.targets.len()
            )));
        }
        let mut row = Row::new(vec![None; self.row_positions.len()]);
        for (cell, target) in cells.iter().zip(&self.targets) {
            match target {
                None => {}
                Some(HeaderTarget::RowId) => {
                    row.row_id = parse_reserved(cell, ROW_ID, self.line)?;
                }
                Some(HeaderTarget::RowVersion) => {
                    row.version_number =
                        parse_reserved(cell, ROW_VERSION, self.line)?;
                }
                Some(HeaderTarget::Column(id)) => {
                    let (Some(&column_index), Some(&position)) =
                        (self.schema_index.get(id), self.row_positions.get(id))
                    else {
                        continue;
                    };
                    let value = validate_row_value(
                        Some(cell.as_str()),
                        &self.schema[column_index],
                        self.row_index,
                        column_index,
                    )?;
                    if let Some(values) = row.values.as_mut() {
                        values[position] = value;
                    }
                }
            }
        }
        Ok(row)
    }
}

impl<R: BufRead> Iterator for CsvRowReader<R> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let converted = match self.reader.read_byte_record(&mut self.record) {
            Ok(false) => {
                self.finished = true;
                debug!("Read {} row(s) from CSV", self.row_index);
                return None;
            }
            Ok(true) => {
                self.line += 1;
                decode_record(&self.record, self.encoding).and_then(|cells| self.convert_record(cells))
            }
            Err(err) => Err(err.into()),
        };
        match converted {
            Ok(row) => {
                self.row_index += 1;
                Some(Ok(row))
            }
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviewOptions {
    pub sample_rows: usize,
    pub max_scan_rows: usize,
    pub full_scan: bool,
    pub default_string_size: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CsvPreview {
    pub suggested_columns: Vec<ColumnModel>,
    pub sample_rows: Vec<Vec<String>>,
    pub rows_scanned: usize,
    /// False when the scan stopped at `max_scan_rows` with rows left over.
    pub scanned_entire_file: bool,
}

/// Sniffs column names and types from the start of a CSV (or all of it when
/// `options.full_scan` is set).
pub fn preview_csv<R: BufRead>(
    mut input: R,
    config: &CsvReaderConfig,
    options: &PreviewOptions,
    encoding: &'static Encoding,
) -> Result<CsvPreview> {
    skip_lines(&mut input, config.lines_to_skip)?;
    let mut reader = open_csv_reader(input, config.separator, config.quote, config.escape);
    let mut record = csv::ByteRecord::new();

    let mut names: Vec<String> = Vec::new();
    if config.has_header && reader.read_byte_record(&mut record)? {
        names = decode_record(&record, encoding)?
            .into_iter()
            .map(|name| name.trim().to_string())
            .collect();
    }
    let fixed_width = config.has_header;
    let mut types: Vec<Option<ColumnModel>> = vec![None; names.len()];
    let mut samples = Vec::new();
    let mut scanned = 0usize;
    let mut exhausted = false;

    loop {
        if !options.full_scan && scanned >= options.max_scan_rows {
            break;
        }
        if !reader.read_byte_record(&mut record)? {
            exhausted = true;
            break;
        }
        let cells = decode_record(&record, encoding)?;
        if !fixed_width && cells.len() > types.len() {
            types.resize(cells.len(), None);
        }
        check_types(&cells, &mut types)?;
        if samples.len() < options.sample_rows {
            samples.push(cells);
        }
        scanned += 1;
    }
    if !exhausted {
        exhausted = !reader.read_byte_record(&mut record)?;
    }

    let suggested_columns = types
        .into_iter()
        .enumerate()
        .map(|(idx, hypothesis)| {
            let name = names
                .get(idx)
                .cloned()
                .unwrap_or_else(|| format!("col{}", idx + 1));
            let mut model = hypothesis.unwrap_or_else(|| {
                ColumnModel::new("", "", ColumnType::String)
                    .with_maximum_size(options.default_string_size)
            });
            model.name = name;
            model
        })
        .collect();
    info!(
        "Previewed {scanned} CSV row(s){}",
        if exhausted { "" } else { " (partial scan)" }
    );
    Ok(CsvPreview {
        suggested_columns,
        sample_rows: samples,
        rows_scanned: scanned,
        scanned_entire_file: exhausted,
    })
}
