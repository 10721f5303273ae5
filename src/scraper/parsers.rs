//! Record extraction from rendered listing pages, profile pages and the
//! submissions feed. Nothing here fails a page: missing fields degrade to
//! [`UNKNOWN`] or [`NO_VALUE`], malformed rows are dropped.

use crate::error::ScrapeError;
use crate::models::{
    Badge, NO_VALUE, NextControl, ProblemScore, RankEntry, Rating, Schema, SchemaColumn,
    Submission, UNKNOWN, UserRecord,
};
use ::scraper::{ElementRef, Html, Selector};
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::debug;
use url::Url;

use super::cleaner::{element_text, is_problem_id, normalise_handle, or_unknown, strip_token};
use super::listing::Listing;

fn sel(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("selector {css:?}: {e:?}"))
}

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("pattern {pattern:?}: {e}"))
}

static TABLE: LazyLock<Selector> = LazyLock::new(|| sel("table"));
static TR: LazyLock<Selector> = LazyLock::new(|| sel("tr"));
static TH: LazyLock<Selector> = LazyLock::new(|| sel("th"));
static TD: LazyLock<Selector> = LazyLock::new(|| sel("td"));
static A: LazyLock<Selector> = LazyLock::new(|| sel("a"));
static P: LazyLock<Selector> = LazyLock::new(|| sel("p"));
static BUTTON: LazyLock<Selector> = LazyLock::new(|| sel("button"));
static TITLE: LazyLock<Selector> = LazyLock::new(|| sel("title"));
static USER_LINK: LazyLock<Selector> = LazyLock::new(|| sel(r#"a[href*="/users/"]"#));
static HANDLE_LABEL: LazyLock<Selector> = LazyLock::new(|| sel("span.m-username--link"));

static TABLE_CLASS: LazyLock<Regex> =
    LazyLock::new(|| re(r"MuiTable-root.*MUIDataTable-tableRoot"));
static HEAD_ROW_CLASS: LazyLock<Regex> =
    LazyLock::new(|| re(r"MuiTableRow-root.*MuiTableRow-head"));
static BODY_ROW_CLASS: LazyLock<Regex> =
    LazyLock::new(|| re(r"MuiTableRow-root.*MUIDataTableBodyRow-root"));
static PROBLEM_LINK_CLASS: LazyLock<Regex> = LazyLock::new(|| re(r"_problems__link"));
static NEXT_LABEL: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)go to next page"));
static NEXT_TEXT: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)^next\b"));
static NEXT_CLASS: LazyLock<Regex> = LazyLock::new(|| re(r"MuiPaginationItem.*next"));
// Word boundaries keep "250 results" from reading as "0 results".
static NO_RESULTS: LazyLock<Regex> = LazyLock::new(|| re(r"\b(no results|no users|0 results)\b"));

// ── Page-level signals ────────────────────────────────────────────────────────

fn class_attr<'a>(el: ElementRef<'a>) -> &'a str {
    el.value().attr("class").unwrap_or("")
}

/// Text a reader would see: everything except script/style bodies.
pub fn visible_text(doc: &Html) -> String {
    let mut out = String::new();
    for node in doc.root_element().descendants() {
        let Some(text) = node.value().as_text() else { continue };
        let hidden = node
            .parent()
            .and_then(|p| p.value().as_element().map(|e| e.name()))
            .is_some_and(|name| matches!(name, "script" | "style" | "noscript"));
        if !hidden {
            out.push_str(text);
            out.push(' ');
        }
    }
    out
}

pub fn has_no_results_marker(doc: &Html) -> bool {
    NO_RESULTS.is_match(&visible_text(doc).to_lowercase())
}

pub fn page_title(doc: &Html) -> String {
    doc.select(&TITLE)
        .next()
        .map(element_text)
        .unwrap_or_else(|| "No title".to_string())
}

/// The data table, by its generated class names; optionally any table.
pub fn find_listing_table(doc: &Html, fallback_to_first: bool) -> Option<ElementRef<'_>> {
    doc.select(&TABLE)
        .find(|t| TABLE_CLASS.is_match(class_attr(*t)))
        .or_else(|| {
            if fallback_to_first {
                doc.select(&TABLE).next()
            } else {
                None
            }
        })
}

/// Locate the "next page" button and read its state.
/// `aria-disabled="true"`, a `disabled` attribute or a disabled class all mean disabled.
pub fn next_control(doc: &Html) -> NextControl {
    let buttons: Vec<ElementRef<'_>> = doc.select(&BUTTON).collect();

    let next = buttons
        .iter()
        .find(|b| b.value().attr("aria-label").is_some_and(|l| NEXT_LABEL.is_match(l)))
        .or_else(|| buttons.iter().find(|b| NEXT_TEXT.is_match(&element_text(**b))))
        .or_else(|| buttons.iter().find(|b| NEXT_CLASS.is_match(class_attr(**b))));

    let Some(button) = next else {
        return NextControl::Absent;
    };

    let el = button.value();
    let disabled = el.classes().any(|c| c == "disabled" || c == "Mui-disabled")
        || el.attr("disabled").is_some()
        || el
            .attr("aria-disabled")
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"));

    if disabled { NextControl::Disabled } else { NextControl::Enabled }
}

// ── Rows ──────────────────────────────────────────────────────────────────────

pub fn all_rows(table: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    table.select(&TR).collect()
}

/// Header row: the MUI head row if tagged, else the first row.
pub fn header_row(table: ElementRef<'_>) -> Option<ElementRef<'_>> {
    table
        .select(&TR)
        .find(|r| HEAD_ROW_CLASS.is_match(class_attr(*r)))
        .or_else(|| table.select(&TR).next())
}

/// Body rows tagged by the framework; falls back to every row after the header.
pub fn body_rows(table: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    let tagged: Vec<_> = table
        .select(&TR)
        .filter(|r| BODY_ROW_CLASS.is_match(class_attr(*r)))
        .collect();
    if tagged.is_empty() {
        all_rows(table).into_iter().skip(1).collect()
    } else {
        tagged
    }
}

/// Cell addressed by its `data-colindex`, never by position.
pub fn cell_by_colindex(row: ElementRef<'_>, index: usize) -> Option<ElementRef<'_>> {
    let wanted = index.to_string();
    row.select(&TD)
        .find(|td| td.value().attr("data-colindex") == Some(wanted.as_str()))
}

/// Handle inside a cell's profile link: the inline label, else the link title.
pub fn extract_handle(cell: ElementRef<'_>) -> Option<String> {
    let link = cell.select(&USER_LINK).next()?;
    link.select(&HANDLE_LABEL)
        .next()
        .map(element_text)
        .and_then(|s| normalise_handle(&s))
        .or_else(|| link.value().attr("title").and_then(normalise_handle))
}

fn first_text(cell: ElementRef<'_>, selector: &Selector) -> Option<String> {
    cell.select(selector)
        .next()
        .map(element_text)
        .filter(|s| !s.is_empty())
}

fn first_child_div_text(cell: ElementRef<'_>) -> Option<String> {
    cell.children()
        .filter_map(ElementRef::wrap)
        .find(|e| e.value().name() == "div")
        .map(element_text)
        .filter(|s| !s.is_empty())
}

/// Plain user listing row: identity link in column 0.
pub fn extract_user_row(row: ElementRef<'_>) -> Option<UserRecord> {
    let cell = cell_by_colindex(row, 0)?;
    extract_handle(cell).map(UserRecord::from_handle)
}

/// Problem columns from the header row, padded with placeholders `P1..P{expected}`
/// the header did not report.
pub fn discover_problem_columns(table: ElementRef<'_>, expected: usize) -> Schema {
    let mut columns = Vec::new();

    if let Some(header) = header_row(table) {
        for (position, th) in header.select(&TH).enumerate() {
            let Some(label) = th
                .select(&A)
                .find(|a| PROBLEM_LINK_CLASS.is_match(class_attr(*a)))
                .map(element_text)
            else {
                continue;
            };
            if !is_problem_id(&label) {
                continue;
            }
            let source_index = th
                .value()
                .attr("data-colindex")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(position);
            columns.push(SchemaColumn {
                id: label,
                source_index: Some(source_index),
            });
        }
    }

    let reported: HashSet<String> = columns.iter().map(|c| c.id.clone()).collect();
    for i in 1..=expected {
        let id = format!("P{}", i);
        if !reported.contains(&id) {
            columns.push(SchemaColumn {
                id,
                source_index: None,
            });
        }
    }

    Schema { columns }
}

/// Contest ranking row: rank, handle, total, last AC, then one score per schema column.
pub fn extract_contest_row(row: ElementRef<'_>, schema: &Schema) -> Option<UserRecord> {
    let handle = cell_by_colindex(row, 1).and_then(extract_handle)?;

    let rank = cell_by_colindex(row, 0).and_then(|c| first_text(c, &P).or_else(|| Some(element_text(c))));
    let total = cell_by_colindex(row, 2).and_then(first_child_div_text);
    let last_ac = cell_by_colindex(row, 3).and_then(|c| first_text(c, &P));

    let scores: Vec<ProblemScore> = schema
        .columns
        .iter()
        .map(|col| {
            let score = col
                .source_index
                .and_then(|i| cell_by_colindex(row, i))
                .and_then(|c| first_text(c, &A))
                .unwrap_or_else(|| NO_VALUE.to_string());
            ProblemScore {
                problem: col.id.clone(),
                score,
            }
        })
        .collect();

    let solved = schema
        .columns
        .iter()
        .zip(&scores)
        .filter(|(col, s)| col.source_index.is_some() && s.score != NO_VALUE)
        .count() as u32;

    Some(UserRecord {
        handle,
        rank: Some(or_unknown(rank)),
        total_score: Some(or_unknown(total)),
        last_ac: Some(or_unknown(last_ac)),
        scores,
        problems_solved: Some(solved),
    })
}

// ── Listing page ──────────────────────────────────────────────────────────────

/// Outcome of reading one listing page.
#[derive(Debug)]
pub enum PageParse {
    NoResults,
    NoTable { title: String },
    NoDataRows,
    Rows {
        /// Unique by handle within the page, in page order.
        records: Vec<UserRecord>,
        /// Set when this page was the one the schema got discovered on.
        discovered: Option<Schema>,
        next: NextControl,
    },
}

pub fn parse_listing_page<L: Listing + ?Sized>(
    listing: &L,
    html: &str,
    known_schema: Option<&Schema>,
) -> PageParse {
    let doc = Html::parse_document(html);

    if has_no_results_marker(&doc) {
        return PageParse::NoResults;
    }

    let Some(table) = listing.locate_table(&doc) else {
        return PageParse::NoTable {
            title: page_title(&doc),
        };
    };

    let rows = listing.data_rows(table);
    if rows.is_empty() {
        return PageParse::NoDataRows;
    }

    let discovered = match known_schema {
        Some(_) => None,
        None => listing.discover_schema(table),
    };
    let empty = Schema::default();
    let schema = known_schema.or(discovered.as_ref()).unwrap_or(&empty);

    let mut seen = HashSet::new();
    let records = rows
        .into_iter()
        .filter_map(|row| listing.extract_row(row, schema))
        .filter(|r| !r.handle.is_empty() && seen.insert(r.handle.clone()))
        .collect();

    PageParse::Rows {
        records,
        discovered,
        next: next_control(&doc),
    }
}

// ── Profile page ──────────────────────────────────────────────────────────────

static BADGE: LazyLock<Selector> = LazyLock::new(|| sel("div.widget.badges div.badge"));
static BADGE_TITLE: LazyLock<Selector> = LazyLock::new(|| sel("p.badge__title"));
static BADGE_DESC: LazyLock<Selector> = LazyLock::new(|| sel("p.badge__description"));
static IMG: LazyLock<Selector> = LazyLock::new(|| sel("img"));
static RATING_HEADER: LazyLock<Selector> =
    LazyLock::new(|| sel("div.rating-header.text-center"));
static RATING_NUMBER: LazyLock<Selector> = LazyLock::new(|| sel("div.rating-number"));
static SPAN: LazyLock<Selector> = LazyLock::new(|| sel("span"));
static SMALL: LazyLock<Selector> = LazyLock::new(|| sel("small"));
static RANK_ITEM: LazyLock<Selector> = LazyLock::new(|| sel("div.rating-ranks li"));
static STRONG: LazyLock<Selector> = LazyLock::new(|| sel("strong"));

#[derive(Debug, Clone, PartialEq)]
pub struct ProfileSections {
    pub badges: Vec<Badge>,
    pub rating: Rating,
    pub ranks: Vec<RankEntry>,
}

pub fn parse_profile(html: &str) -> ProfileSections {
    let doc = Html::parse_document(html);

    let badges = doc
        .select(&BADGE)
        .map(|badge| Badge {
            title: or_unknown(first_text(badge, &BADGE_TITLE)),
            description: or_unknown(first_text(badge, &BADGE_DESC)),
            image: or_unknown(
                badge
                    .select(&IMG)
                    .next()
                    .and_then(|img| img.value().attr("src"))
                    .map(str::to_string),
            ),
        })
        .collect();

    let rating = match doc.select(&RATING_HEADER).next() {
        Some(block) => Rating {
            value: or_unknown(first_text(block, &RATING_NUMBER)),
            stars: or_unknown(first_text(block, &SPAN)),
            highest: or_unknown(first_text(block, &SMALL)),
        },
        None => Rating::unknown(),
    };

    let ranks = doc
        .select(&RANK_ITEM)
        .map(|item| {
            let rank = or_unknown(first_text(item, &STRONG));
            RankEntry {
                label: strip_token(&element_text(item), &rank),
                rank,
            }
        })
        .collect();

    ProfileSections {
        badges,
        rating,
        ranks,
    }
}

// ── Submissions feed ──────────────────────────────────────────────────────────

/// Rows of the HTML fragment embedded in the submissions JSON. Only rows of
/// exactly five cells are kept.
pub fn parse_submissions(fragment: &str, base: &Url) -> Vec<Submission> {
    // Stray <tr> outside a <table> would be dropped by the HTML parser.
    let wrapped;
    let markup = if fragment.contains("<table") {
        fragment
    } else {
        wrapped = format!("<table>{}</table>", fragment);
        &wrapped
    };
    let doc = Html::parse_document(markup);

    doc.select(&TR)
        .filter_map(|row| match parse_submission_row(row, base) {
            Ok(s) => Some(s),
            Err(e) => {
                debug!("{}", e);
                None
            }
        })
        .collect()
}

fn parse_submission_row(row: ElementRef<'_>, base: &Url) -> Result<Submission, ScrapeError> {
    let cols: Vec<ElementRef<'_>> = row.select(&TD).collect();
    if cols.len() != 5 {
        return Err(ScrapeError::MalformedRow(format!(
            "submission row has {} cells, expected 5",
            cols.len()
        )));
    }

    let solution = cols[4]
        .select(&A)
        .next()
        .and_then(|a| a.value().attr("href"))
        .and_then(|href| super::cleaner::absolutise(base, href));

    Ok(Submission {
        time: element_text(cols[0]),
        problem: element_text(cols[1]),
        verdict: element_text(cols[2]),
        language: element_text(cols[3]),
        solution: or_unknown(solution),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod fixtures {
    //! Markup shaped like the rendered MUI DataTable listings.

    pub fn user_listing(handles: &[&str], next: &str) -> String {
        let rows: String = handles
            .iter()
            .map(|h| {
                format!(
                    r#"<tr class="MuiTableRow-root MUIDataTableBodyRow-root">
                         <td data-colindex="0"><a href="/users/{h}" title="{h}">
                           <span class="m-username--link">{h}</span></a></td>
                         <td data-colindex="1">1500</td></tr>"#
                )
            })
            .collect();
        format!(
            r#"<html><head><title>Ratings</title></head><body>
               <table class="MuiTable-root MUIDataTable-tableRoot-123">
                 <tr class="MuiTableRow-root MuiTableRow-head"><th>User</th><th>Rating</th></tr>
                 {rows}
               </table>{next}</body></html>"#
        )
    }

    pub fn next_enabled() -> &'static str {
        r#"<button aria-label="Go to next page" class="MuiButtonBase-root">›</button>"#
    }

    pub fn next_disabled() -> &'static str {
        r#"<button aria-label="Go to next page" aria-disabled="true">›</button>"#
    }

    /// Header reports `problems` (e.g. ["P1","P2"]) starting at colindex 4.
    pub fn contest_listing(problems: &[&str], rows: &[(&str, &[&str])], next: &str) -> String {
        let mut head = String::from(
            r#"<th data-colindex="0">Rank</th><th data-colindex="1">User</th>
               <th data-colindex="2">Total</th><th data-colindex="3">Last AC</th>"#,
        );
        for (i, p) in problems.iter().enumerate() {
            head.push_str(&format!(
                r#"<th data-colindex="{}"><a class="_problems__link_x1" href="/problems/{p}">{p}</a></th>"#,
                i + 4
            ));
        }

        let body: String = rows
            .iter()
            .enumerate()
            .map(|(rank, (handle, scores))| {
                let mut tr = format!(
                    r#"<tr class="MuiTableRow-root MUIDataTableBodyRow-root">
                       <td data-colindex="0"><p>{}</p></td>
                       <td data-colindex="1"><a href="/users/{handle}"><span class="m-username--link">{handle}</span></a></td>
                       <td data-colindex="2"><div>{}</div></td>
                       <td data-colindex="3"><p>0:42:10</p></td>"#,
                    rank + 1,
                    scores.len() * 100
                );
                for (i, s) in scores.iter().enumerate() {
                    if s.is_empty() {
                        tr.push_str(&format!(r#"<td data-colindex="{}"></td>"#, i + 4));
                    } else {
                        tr.push_str(&format!(r#"<td data-colindex="{}"><a>{s}</a></td>"#, i + 4));
                    }
                }
                tr.push_str("</tr>");
                tr
            })
            .collect();

        format!(
            r#"<html><body><table class="MuiTable-root MUIDataTable-tableRoot">
               <tr class="MuiTableRow-root MuiTableRow-head">{head}</tr>{body}</table>{next}</body></html>"#
        )
    }
}
