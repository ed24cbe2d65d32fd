#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use table_delta::schema::{ColumnModel, ColumnType};
use tempfile::{TempDir, tempdir};

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }
}

/// A four-column table covering the typed, string and file handle cases.
pub fn people_schema() -> Vec<ColumnModel> {
    vec![
        ColumnModel::new("1", "name", ColumnType::String).with_maximum_size(20),
        ColumnModel::new("2", "age", ColumnType::Integer),
        ColumnModel::new("3", "active", ColumnType::Boolean).with_default_value("true"),
        ColumnModel::new("4", "photo", ColumnType::FileHandleId),
    ]
}

pub fn cells(values: &[Option<&str>]) -> Vec<Option<String>> {
    values.iter().map(|v| v.map(str::to_string)).collect()
}
