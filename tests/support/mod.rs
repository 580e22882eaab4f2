#![allow(dead_code)]
pub mod builders;

use std::path::{Path, PathBuf};
use tempfile::TempDir;
use umya_spreadsheet::Spreadsheet;

/// Temp directory holding workbook fixtures for one test.
pub struct TestWorkspace {
    dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Build and write a workbook fixture. The builder receives a fresh
    /// book that already contains "Sheet1".
    pub fn create_workbook(&self, name: &str, build: impl FnOnce(&mut Spreadsheet)) -> PathBuf {
        let mut book = umya_spreadsheet::new_file();
        build(&mut book);
        let path = self.dir.path().join(name);
        umya_spreadsheet::writer::xlsx::write(&book, &path).expect("write workbook");
        path
    }

    pub fn read_workbook(&self, path: &Path) -> Spreadsheet {
        umya_spreadsheet::reader::xlsx::read(path).expect("read workbook")
    }
}
