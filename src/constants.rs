//! Fixed column limits and worst-case byte sizes of serialized cell values.
//!
//! The byte sizes are derived from the widest canonical text each column type
//! can produce, so they are computed once per process and then shared
//! read-only through [`column_constants()`].

use std::sync::OnceLock;

use crate::schema::format_double;

/// The maximum number of characters allowed in a STRING or LINK column.
pub const MAX_ALLOWED_STRING_SIZE: i64 = 1000;

/// The maximum number of characters allowed in a LARGETEXT cell.
pub const MAX_LARGE_TEXT_CHARACTERS: usize = 524_288;

/// Cells are measured in Unicode scalar values, each of which needs at most
/// four bytes in UTF-8.
pub const MAX_BYTES_PER_CHAR_UTF_8: usize = 4;

/// Characters assumed for a LARGETEXT cell when estimating row sizes.
pub const DEFAULT_LARGE_TEXT_CHARACTERS: usize = 1000;

/// Reserved header name carrying the row id in CSV uploads.
pub const ROW_ID: &str = "ROW_ID";

/// Reserved header name carrying the row version in CSV uploads.
pub const ROW_VERSION: &str = "ROW_VERSION";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnConstants {
    pub max_boolean_bytes_as_string: usize,
    pub max_integer_bytes_as_string: usize,
    pub max_double_bytes_as_string: usize,
    pub max_file_handle_id_bytes_as_string: usize,
    pub max_entity_id_bytes_as_string: usize,
    pub max_user_id_bytes_as_string: usize,
    pub default_large_text_bytes: usize,
}

impl ColumnConstants {
    fn compute() -> Self {
        let max_integer = i64::MIN.to_string().len();
        let max_double = [-f64::MAX, -f64::MIN_POSITIVE, -0.001_234_567_890_123_456_7]
            .into_iter()
            .map(|value| format_double(value).len())
            .max()
            .unwrap_or_default();
        ColumnConstants {
            max_boolean_bytes_as_string: "false".len(),
            max_integer_bytes_as_string: max_integer,
            max_double_bytes_as_string: max_double,
            max_file_handle_id_bytes_as_string: max_integer,
            max_entity_id_bytes_as_string: format!("syn{}.{}", i64::MAX, i64::MAX).len(),
            max_user_id_bytes_as_string: max_integer,
            default_large_text_bytes: DEFAULT_LARGE_TEXT_CHARACTERS * MAX_BYTES_PER_CHAR_UTF_8,
        }
    }
}

static CONSTANTS: OnceLock<ColumnConstants> = OnceLock::new();

pub fn column_constants() -> &'static ColumnConstants {
    CONSTANTS.get_or_init(ColumnConstants::compute)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_sizes_cover_widest_canonical_text() {
        let constants = column_constants();
        assert_eq!(constants.max_boolean_bytes_as_string, 5);
        assert_eq!(constants.max_integer_bytes_as_string, 20);
        assert_eq!(constants.max_entity_id_bytes_as_string, 42);
        assert!(constants.max_double_bytes_as_string >= format_double(-f64::MAX).len());
        assert_eq!(
            constants.default_large_text_bytes,
            DEFAULT_LARGE_TEXT_CHARACTERS * MAX_BYTES_PER_CHAR_UTF_8
        );
    }

    #[test]
    fn constants_are_shared() {
        assert!(std::ptr::eq(column_constants(), column_constants()));
    }
}
