use super::{TabularSink, Table, Workbook};
use crate::error::ScrapeError;
use crate::models::RunSummary;
use anyhow::{Context, Result};
use chrono::{NaiveDateTime, Utc};
use duckdb::{Connection, params, params_from_iter};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE SEQUENCE IF NOT EXISTS extraction_run_ids START 1;

CREATE TABLE IF NOT EXISTS extraction_runs (
    id           BIGINT PRIMARY KEY DEFAULT nextval('extraction_run_ids'),
    kind         VARCHAR   NOT NULL,
    target       VARCHAR   NOT NULL,
    started_at   TIMESTAMP NOT NULL,
    finished_at  TIMESTAMP NOT NULL,
    pages        INTEGER   NOT NULL DEFAULT 0,
    records      INTEGER   NOT NULL DEFAULT 0,
    reason       VARCHAR   NOT NULL
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_runs_kind ON extraction_runs (kind, target);
"#;

/// One row of the extraction-run log.
#[derive(Debug, Clone, PartialEq)]
pub struct RunLogEntry {
    pub id: i64,
    pub kind: String,
    pub target: String,
    pub started_at: NaiveDateTime,
    pub finished_at: NaiveDateTime,
    pub pages: i64,
    pub records: i64,
    pub reason: String,
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `<stem>_<sheet>`, lower-cased, anything but ASCII alphanumerics as `_`.
fn table_name(stem: &str, sheet: &str) -> String {
    format!("{}_{}", stem, sheet)
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

// ── Repository ────────────────────────────────────────────────────────────────

pub struct Repository {
    conn: Connection,
    path: PathBuf,
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn run_migrations(&self) -> Result<()> {
        debug!("Running migrations…");
        self.conn.execute_batch(DDL).context("DDL failed")?;
        self.conn.execute_batch(INDEXES).context("Index creation failed")?;
        self.conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Utc::now().naive_utc()],
        )?;
        Ok(())
    }

    // ── Sheets ────────────────────────────────────────────────────────────────

    /// Replace the table backing one sheet. Every column is VARCHAR.
    pub fn replace_table(&self, stem: &str, table: &Table) -> Result<usize> {
        let name = quote_ident(&table_name(stem, &table.name));
        let columns: Vec<String> = table
            .headers
            .iter()
            .map(|h| format!("{} VARCHAR", quote_ident(h)))
            .collect();
        let placeholders = vec!["?"; table.headers.len()].join(", ");

        let tx = self.conn.unchecked_transaction()?;
        tx.execute_batch(&format!(
            "DROP TABLE IF EXISTS {name}; CREATE TABLE {name} ({});",
            columns.join(", ")
        ))
        .with_context(|| format!("recreate {}", name))?;

        {
            let mut stmt = tx.prepare(&format!("INSERT INTO {name} VALUES ({placeholders})"))?;
            for row in &table.rows {
                stmt.execute(params_from_iter(row.iter()))
                    .with_context(|| format!("insert into {}", name))?;
            }
        }

        tx.commit()?;
        Ok(table.rows.len())
    }

    pub fn row_count(&self, stem: &str, sheet: &str) -> Result<i64> {
        let name = quote_ident(&table_name(stem, sheet));
        let mut s = self.conn.prepare(&format!("SELECT COUNT(*) FROM {name}"))?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    // ── Extraction run log ────────────────────────────────────────────────────

    pub fn log_run(&self, run: &RunSummary) -> Result<i64> {
        let id: i64 = self.conn.query_row(
            r#"INSERT INTO extraction_runs
                   (kind, target, started_at, finished_at, pages, records, reason)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               RETURNING id"#,
            params![
                run.kind,
                run.target,
                run.started_at,
                run.finished_at,
                run.pages as i64,
                run.records as i64,
                run.reason.to_string(),
            ],
            |r| r.get(0),
        )?;
        Ok(id)
    }

    pub fn list_runs(&self, limit: usize) -> Result<Vec<RunLogEntry>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT id, kind, target, started_at, finished_at, pages, records, reason
               FROM extraction_runs ORDER BY id DESC LIMIT ?"#,
        )?;
        let runs = stmt
            .query_map(params![limit as i64], |r| {
                Ok(RunLogEntry {
                    id: r.get(0)?,
                    kind: r.get(1)?,
                    target: r.get(2)?,
                    started_at: r.get(3)?,
                    finished_at: r.get(4)?,
                    pages: r.get(5)?,
                    records: r.get(6)?,
                    reason: r.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }
}

impl TabularSink for Repository {
    fn name(&self) -> &'static str {
        "duckdb"
    }

    fn write(&self, workbook: &Workbook) -> Result<(), ScrapeError> {
        for table in &workbook.tables {
            self.replace_table(&workbook.stem, table)
                .map_err(|e| ScrapeError::SinkWrite {
                    sink: self.name(),
                    path: self.path.clone(),
                    message: format!("{:#}", e),
                })?;
        }
        info!(
            "Stored {} tables for {} in {:?}",
            workbook.tables.len(),
            workbook.stem,
            self.path
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TerminationReason;

    fn repo() -> Repository {
        let repo = Repository::open_in_memory().unwrap();
        repo.run_migrations().unwrap();
        repo
    }

    #[test]
    fn sheet_names_become_safe_table_names() {
        assert_eq!(table_name("codechef_START1 data", "ContestRankings"), "codechef_start1_data_contestrankings");
    }

    #[test]
    fn tables_are_replaced_each_write() {
        let repo = repo();
        let mut t = Table::new("Users", &["Username"]);
        t.push(vec!["amy".into()]);
        t.push(vec!["ben".into()]);
        repo.write(&Workbook::new("profiles").with(t.clone())).unwrap();
        assert_eq!(repo.row_count("profiles", "Users").unwrap(), 2);

        t.rows.truncate(1);
        repo.write(&Workbook::new("profiles").with(t)).unwrap();
        assert_eq!(repo.row_count("profiles", "Users").unwrap(), 1);
    }

    #[test]
    fn run_log_round_trips() {
        let repo = repo();
        let now = Utc::now().naive_utc();
        let summary = RunSummary {
            kind: "users".into(),
            target: "Test College".into(),
            started_at: now,
            finished_at: now,
            pages: 3,
            records: 120,
            reason: TerminationReason::PartialPageConfirmedLast,
        };
        let first = repo.log_run(&summary).unwrap();
        let second = repo.log_run(&summary).unwrap();
        assert!(second > first);

        let runs = repo.list_runs(10).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, second);
        assert_eq!(runs[0].records, 120);
        assert_eq!(runs[0].reason, "partial page is last");
    }

    #[test]
    fn migrations_are_idempotent() {
        let repo = repo();
        repo.run_migrations().unwrap();
    }
}
