use super::{TabularSink, Workbook};
use crate::error::ScrapeError;
use std::path::{Path, PathBuf};
use tracing::info;

/// Writes each sheet to `<dir>/<stem>/<Sheet>.csv`.
pub struct CsvWorkbookSink {
    dir: PathBuf,
}

impl CsvWorkbookSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn write_sheet(path: &Path, headers: &[String], rows: &[Vec<String>]) -> csv::Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(headers)?;
        for row in rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl TabularSink for CsvWorkbookSink {
    fn name(&self) -> &'static str {
        "csv"
    }

    fn write(&self, workbook: &Workbook) -> Result<(), ScrapeError> {
        let dir = self.dir.join(&workbook.stem);
        std::fs::create_dir_all(&dir).map_err(|e| ScrapeError::SinkWrite {
            sink: self.name(),
            path: dir.clone(),
            message: e.to_string(),
        })?;

        for table in &workbook.tables {
            let path = dir.join(format!("{}.csv", table.name));
            Self::write_sheet(&path, &table.headers, &table.rows).map_err(|e| {
                ScrapeError::SinkWrite {
                    sink: self.name(),
                    path: path.clone(),
                    message: e.to_string(),
                }
            })?;
        }

        info!("Saved {} sheets to {:?}", workbook.tables.len(), dir);
        Ok(())
    }
}
