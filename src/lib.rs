//! Table row-change engine: typed column schemas, cell validation, CSV
//! upload and export, sparse change sets with their gzip JSON codec, row
//! identity allocation, schema evolution, and request size guards.
//!
//! ```
//! use table_delta::csv_upload::{CsvReaderConfig, CsvRowReader};
//! use table_delta::{ColumnModel, ColumnType, SparseChangeSet};
//!
//! let schema = vec![ColumnModel::new("1", "age", ColumnType::Integer)];
//! let rows = CsvRowReader::new(
//!     "age\n+5\n".as_bytes(),
//!     &schema,
//!     &CsvReaderConfig::default(),
//!     encoding_rs::UTF_8,
//! )?
//! .into_row_set("syn1")?;
//! let changes = SparseChangeSet::from_row_set(&rows, &schema)?;
//! assert_eq!(changes.rows()[0].cell_value("1")?, Some("5"));
//! # Ok::<(), table_delta::TableError>(())
//! ```

pub mod change_set;
pub mod config;
pub mod constants;
pub mod csv_export;
pub mod csv_upload;
pub mod error;
pub mod evolution;
pub mod identity;
pub mod io_utils;
pub mod mapper;
pub mod request;
pub mod rows;
pub mod schema;
pub mod validate;

use std::{env, sync::OnceLock};

use log::LevelFilter;

pub use change_set::{SparseChangeSet, SparseChangeSetDto, SparseRow};
pub use config::EngineConfig;
pub use error::{Result, TableError};
pub use rows::{IdAndVersion, IdRange, PartialRow, PartialRowSet, Row, RowSet};
pub use schema::{ColumnModel, ColumnType, SelectColumn, TableSchema};

static LOGGER: OnceLock<()> = OnceLock::new();

/// Installs the `env_logger` backend once. `RUST_LOG` wins when set;
/// otherwise this crate logs at info.
pub fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("table_delta", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}
