use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Marks a whole section (badges, rating, ranks, a row attribute) that could not be read.
pub const UNKNOWN: &str = "N/A";
/// Marks a single empty table cell, e.g. an unattempted problem.
pub const NO_VALUE: &str = "-";

// ── Listing records ───────────────────────────────────────────────────────────

/// One participant extracted from a listing row. `handle` is the dedup key.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserRecord {
    pub handle: String,
    pub rank: Option<String>,
    pub total_score: Option<String>,
    pub last_ac: Option<String>,
    /// Ordered like the run's [`Schema`].
    pub scores: Vec<ProblemScore>,
    pub problems_solved: Option<u32>,
}

impl UserRecord {
    pub fn from_handle(handle: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProblemScore {
    pub problem: String,
    pub score: String,
}

// ── Schema ────────────────────────────────────────────────────────────────────

/// A problem column. `source_index` is the table's `data-colindex` for the
/// column, or `None` for a placeholder the site did not report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchemaColumn {
    pub id: String,
    pub source_index: Option<usize>,
}

/// Dynamically discovered problem columns, computed once per run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Schema {
    pub columns: Vec<SchemaColumn>,
}

impl Schema {
    pub fn ids(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.id.clone()).collect()
    }

    pub fn discovered(&self) -> usize {
        self.columns.iter().filter(|c| c.source_index.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

// ── Pagination ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationReason {
    MaxPagesReached,
    NoResultsMarker,
    NoTableFound,
    NoDataRows,
    NoNewRecords,
    PartialPageConfirmedLast,
    NextControlAbsentOrDisabled,
    FatalRenderError,
    Cancelled,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TerminationReason::MaxPagesReached => "max pages reached",
            TerminationReason::NoResultsMarker => "no results marker",
            TerminationReason::NoTableFound => "no table found",
            TerminationReason::NoDataRows => "no data rows",
            TerminationReason::NoNewRecords => "no new records",
            TerminationReason::PartialPageConfirmedLast => "partial page is last",
            TerminationReason::NextControlAbsentOrDisabled => "next control absent or disabled",
            TerminationReason::FatalRenderError => "fatal render error",
            TerminationReason::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// State of the pagination control at the bottom of a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextControl {
    Absent,
    Disabled,
    Enabled,
}

/// What one iteration learned about one listing page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ListingPage {
    pub index: u32,
    pub rows: usize,
    pub new_rows: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputOrder {
    /// Order the rows were first seen (contest rankings).
    Insertion,
    /// Lexicographic by handle (plain user listings).
    ByHandle,
}

/// Summary of a finished run as kept in the run log.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub kind: String,
    pub target: String,
    pub started_at: NaiveDateTime,
    pub finished_at: NaiveDateTime,
    pub pages: usize,
    pub records: usize,
    pub reason: TerminationReason,
}

// ── Profile detail ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Badge {
    pub title: String,
    pub description: String,
    pub image: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rating {
    pub value: String,
    pub stars: String,
    pub highest: String,
}

impl Rating {
    pub fn unknown() -> Self {
        Self {
            value: UNKNOWN.to_string(),
            stars: UNKNOWN.to_string(),
            highest: UNKNOWN.to_string(),
        }
    }

    pub fn is_known(&self) -> bool {
        self.value != UNKNOWN
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankEntry {
    pub label: String,
    pub rank: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Submission {
    pub time: String,
    pub problem: String,
    pub verdict: String,
    pub language: String,
    pub solution: String,
}

/// Enrichment for one handle. Every failure leaves its own section empty.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProfileDetail {
    pub handle: String,
    pub badges: Vec<Badge>,
    pub rating: Rating,
    pub ranks: Vec<RankEntry>,
    pub submissions: Vec<Submission>,
}
