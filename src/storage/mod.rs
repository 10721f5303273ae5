//! Tabular output: named sheets built from extraction results, persisted by
//! one or more [`TabularSink`]s.

mod csv_sink;
mod repository;

pub use self::csv_sink::CsvWorkbookSink;
pub use self::repository::{Repository, RunLogEntry};

use crate::error::ScrapeError;
use crate::models::{ProfileDetail, UserRecord};

/// One sheet: a header row plus string cells.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(name: &str, headers: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A set of sheets persisted together under one stem.
#[derive(Debug, Clone)]
pub struct Workbook {
    pub stem: String,
    pub tables: Vec<Table>,
}

impl Workbook {
    pub fn new(stem: impl Into<String>) -> Self {
        Self {
            stem: stem.into(),
            tables: Vec::new(),
        }
    }

    pub fn with(mut self, table: Table) -> Self {
        self.tables.push(table);
        self
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }
}

pub trait TabularSink {
    fn name(&self) -> &'static str;
    fn write(&self, workbook: &Workbook) -> Result<(), ScrapeError>;
}

// ── Sheet builders ────────────────────────────────────────────────────────────

pub fn users_table(handles: &[String]) -> Table {
    let mut t = Table::new("Users", &["Username"]);
    for h in handles {
        t.push(vec![h.clone()]);
    }
    t
}

/// Users, Badges, Ratings, Ranks and Submissions for a set of enriched handles.
/// Ratings whose value is unknown are left out.
pub fn profile_workbook(stem: &str, handles: &[String], details: &[ProfileDetail]) -> Workbook {
    let mut badges = Table::new("Badges", &["Username", "Title", "Description", "Image URL"]);
    let mut ratings = Table::new("Ratings", &["Username", "Rating", "Stars", "Highest"]);
    let mut ranks = Table::new("Ranks", &["Username", "Label", "Rank"]);
    let mut submissions = Table::new(
        "Submissions",
        &["Username", "Time", "Problem", "Result", "Language", "Solution Link"],
    );

    for d in details {
        for b in &d.badges {
            badges.push(vec![
                d.handle.clone(),
                b.title.clone(),
                b.description.clone(),
                b.image.clone(),
            ]);
        }
        if d.rating.is_known() {
            ratings.push(vec![
                d.handle.clone(),
                d.rating.value.clone(),
                d.rating.stars.clone(),
                d.rating.highest.clone(),
            ]);
        }
        for r in &d.ranks {
            ranks.push(vec![d.handle.clone(), r.label.clone(), r.rank.clone()]);
        }
        for s in &d.submissions {
            submissions.push(vec![
                d.handle.clone(),
                s.time.clone(),
                s.problem.clone(),
                s.verdict.clone(),
                s.language.clone(),
                s.solution.clone(),
            ]);
        }
    }

    Workbook::new(stem)
        .with(users_table(handles))
        .with(badges)
        .with(ratings)
        .with(ranks)
        .with(submissions)
}

/// Contest rows in rank order, one column per problem in `columns`.
pub fn contest_table(records: &[&UserRecord], columns: &[String]) -> Table {
    let mut headers = vec!["Username", "Rank", "Total Score", "Last AC"];
    headers.extend(columns.iter().map(String::as_str));
    headers.push("Problems Solved");
    let mut t = Table::new("ContestRankings", &headers);

    for r in records {
        let mut row = vec![
            r.handle.clone(),
            r.rank.clone().unwrap_or_default(),
            r.total_score.clone().unwrap_or_default(),
            r.last_ac.clone().unwrap_or_default(),
        ];
        for id in columns {
            let score = r
                .scores
                .iter()
                .find(|s| &s.problem == id)
                .map(|s| s.score.clone())
                .unwrap_or_else(|| crate::models::NO_VALUE.to_string());
            row.push(score);
        }
        row.push(r.problems_solved.unwrap_or(0).to_string());
        t.push(row);
    }
    t
}
