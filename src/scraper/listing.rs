use crate::models::{OutputOrder, Schema, UserRecord};
use ::scraper::{ElementRef, Html};
use anyhow::{Context, Result};
use url::Url;

use super::parsers;

/// A paginated listing the pagination engine can walk: where pages live,
/// how big a full page is, and how its table reads.
pub trait Listing: Send + Sync {
    /// Short name for logs and the run log, e.g. "users".
    fn kind(&self) -> &'static str;
    /// What is being listed, e.g. the institution or contest code.
    fn target(&self) -> &str;
    fn page_url(&self, page: u32) -> String;
    fn expected_page_size(&self) -> usize;
    fn order(&self) -> OutputOrder;

    fn locate_table<'a>(&self, doc: &'a Html) -> Option<ElementRef<'a>>;
    fn data_rows<'a>(&self, table: ElementRef<'a>) -> Vec<ElementRef<'a>>;

    /// Column schema, read once per run from the first table seen.
    fn discover_schema(&self, _table: ElementRef<'_>) -> Option<Schema> {
        None
    }

    fn extract_row(&self, row: ElementRef<'_>, schema: &Schema) -> Option<UserRecord>;
}

fn listing_url(
    base: &Url,
    path: &str,
    institution: &str,
    page_size: usize,
    page: u32,
    sort_by: &str,
) -> String {
    let mut url = base.clone();
    url.set_path(path);
    url.query_pairs_mut()
        .clear()
        .append_pair("filterBy", &format!("Institution={}", institution))
        .append_pair("itemsPerPage", &page_size.to_string())
        .append_pair("order", "asc")
        .append_pair("page", &page.to_string())
        .append_pair("sortBy", sort_by);
    url.to_string()
}

fn parse_base(base_url: &str) -> Result<Url> {
    Url::parse(base_url).with_context(|| format!("Invalid base URL {:?}", base_url))
}

// ── Institution users ─────────────────────────────────────────────────────────

/// All rated users of one institution, ordered by global rank.
pub struct InstitutionUsers {
    base: Url,
    institution: String,
    page_size: usize,
}

impl InstitutionUsers {
    pub fn new(base_url: &str, institution: &str, page_size: usize) -> Result<Self> {
        Ok(Self {
            base: parse_base(base_url)?,
            institution: institution.to_string(),
            page_size,
        })
    }
}

impl Listing for InstitutionUsers {
    fn kind(&self) -> &'static str {
        "users"
    }

    fn target(&self) -> &str {
        &self.institution
    }

    fn page_url(&self, page: u32) -> String {
        listing_url(
            &self.base,
            "/ratings/all",
            &self.institution,
            self.page_size,
            page,
            "global_rank",
        )
    }

    fn expected_page_size(&self) -> usize {
        self.page_size
    }

    fn order(&self) -> OutputOrder {
        OutputOrder::ByHandle
    }

    fn locate_table<'a>(&self, doc: &'a Html) -> Option<ElementRef<'a>> {
        parsers::find_listing_table(doc, true)
    }

    fn data_rows<'a>(&self, table: ElementRef<'a>) -> Vec<ElementRef<'a>> {
        parsers::all_rows(table).into_iter().skip(1).collect()
    }

    fn extract_row(&self, row: ElementRef<'_>, _schema: &Schema) -> Option<UserRecord> {
        parsers::extract_user_row(row)
    }
}

// ── Contest rankings ──────────────────────────────────────────────────────────

/// One contest's ranking table filtered to an institution.
pub struct ContestRankings {
    base: Url,
    code: String,
    institution: String,
    page_size: usize,
    expected_problems: usize,
}

impl ContestRankings {
    pub fn new(
        base_url: &str,
        code: &str,
        institution: &str,
        page_size: usize,
        expected_problems: usize,
    ) -> Result<Self> {
        Ok(Self {
            base: parse_base(base_url)?,
            code: code.to_string(),
            institution: institution.to_string(),
            page_size,
            expected_problems,
        })
    }
}

impl Listing for ContestRankings {
    fn kind(&self) -> &'static str {
        "contest"
    }

    fn target(&self) -> &str {
        &self.code
    }

    fn page_url(&self, page: u32) -> String {
        listing_url(
            &self.base,
            &format!("/rankings/{}", self.code),
            &self.institution,
            self.page_size,
            page,
            "rank",
        )
    }

    fn expected_page_size(&self) -> usize {
        self.page_size
    }

    fn order(&self) -> OutputOrder {
        OutputOrder::Insertion
    }

    fn locate_table<'a>(&self, doc: &'a Html) -> Option<ElementRef<'a>> {
        parsers::find_listing_table(doc, false)
    }

    fn data_rows<'a>(&self, table: ElementRef<'a>) -> Vec<ElementRef<'a>> {
        parsers::body_rows(table)
    }

    fn discover_schema(&self, table: ElementRef<'_>) -> Option<Schema> {
        Some(parsers::discover_problem_columns(table, self.expected_problems))
    }

    fn extract_row(&self, row: ElementRef<'_>, schema: &Schema) -> Option<UserRecord> {
        parsers::extract_contest_row(row, schema)
    }
}
