//! CSV reader and writer construction, raw line skipping, and input decoding.
//!
//! Records are read as raw bytes and decoded per field with `encoding_rs`, so
//! uploads in legacy encodings go through the same pipeline as UTF-8.

use std::io::{BufRead, Read, Write};

use csv::QuoteStyle;
use encoding_rs::{Encoding, UTF_8};

use crate::error::{Result, TableError};

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| TableError::invalid_argument(format!("Unknown encoding '{value}'")))
    } else {
        Ok(UTF_8)
    }
}

/// Header handling is left to the caller: the first record comes back as data.
pub fn open_csv_reader<R>(reader: R, separator: u8, quote: u8, escape: u8) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(false)
        .delimiter(separator)
        .quote(quote)
        .escape(Some(escape))
        .double_quote(true)
        .flexible(true);
    builder.from_reader(reader)
}

/// Every field is quoted, so a record whose only cell is null is still a
/// record and not a blank line.
pub fn open_csv_writer<W: Write>(writer: W, separator: u8, quote: u8) -> csv::Writer<W> {
    let mut builder = csv::WriterBuilder::new();
    builder
        .delimiter(separator)
        .quote(quote)
        .quote_style(QuoteStyle::Always)
        .double_quote(true)
        .flexible(true);
    builder.from_writer(writer)
}

/// Discards `count` raw lines before any CSV parsing happens.
pub fn skip_lines<R: BufRead>(reader: &mut R, count: usize) -> Result<usize> {
    let mut skipped = 0;
    let mut buffer = Vec::new();
    while skipped < count {
        buffer.clear();
        if reader.read_until(b'\n', &mut buffer)? == 0 {
            break;
        }
        skipped += 1;
    }
    Ok(skipped)
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Result<String> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        Err(TableError::malformed_csv(format!(
            "Failed to decode text with encoding {}",
            encoding.name()
        )))
    } else {
        Ok(text.into_owned())
    }
}

pub fn decode_record(record: &csv::ByteRecord, encoding: &'static Encoding) -> Result<Vec<String>> {
    record
        .iter()
        .map(|field| decode_bytes(field, encoding))
        .collect()
}
