use crate::models::UNKNOWN;
use ::scraper::ElementRef;
use regex::Regex;
use std::sync::LazyLock;
use url::Url;

static PROBLEM_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z]+\d+$").expect("problem id pattern"));

// ── Text ──────────────────────────────────────────────────────────────────────

/// Collapse runs of whitespace into single spaces and trim.
/// "  Global \n Rank " → "Global Rank"
pub fn normalise_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Visible text of an element with whitespace normalised.
pub fn element_text(el: ElementRef<'_>) -> String {
    normalise_ws(&el.text().collect::<Vec<_>>().join(" "))
}

/// Empty or missing text becomes the unknown sentinel.
pub fn or_unknown(s: Option<String>) -> String {
    match s {
        Some(s) if !s.trim().is_empty() => s.trim().to_string(),
        _ => UNKNOWN.to_string(),
    }
}

/// Remove `token` from `text`, e.g. the rank number from "1234 Global Rank".
pub fn strip_token(text: &str, token: &str) -> String {
    if token.is_empty() {
        return normalise_ws(text);
    }
    normalise_ws(&text.replacen(token, " ", 1))
}

pub fn normalise_handle(s: &str) -> Option<String> {
    let s = s.trim();
    if s.is_empty() { None } else { Some(s.to_string()) }
}

// ── Values ────────────────────────────────────────────────────────────────────

/// Problem column ids look like "P1", "A12".
pub fn is_problem_id(s: &str) -> bool {
    PROBLEM_ID.is_match(s.trim())
}

/// Leading integer of a rating: "1823?" → 1823 | "2,104" → 2104 | "N/A" → None
pub fn parse_rating(s: &str) -> Option<u32> {
    let digits: String = s
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == ',')
        .filter(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Resolve a site-relative link against the base URL.
pub fn absolutise(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    base.join(href).ok().map(|u| u.to_string())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_token() {
        assert_eq!(strip_token("1234 Global Rank", "1234"), "Global Rank");
        assert_eq!(strip_token("Country Rank\n  56", "56"), "Country Rank");
        assert_eq!(strip_token("Global Rank", ""), "Global Rank");
    }

    #[test]
    fn test_is_problem_id() {
        assert!(is_problem_id("P1"));
        assert!(is_problem_id(" P12 "));
        assert!(is_problem_id("AB3"));
        assert!(!is_problem_id("Total"));
        assert!(!is_problem_id("12"));
        assert!(!is_problem_id("P1a"));
    }

    #[test]
    fn test_parse_rating() {
        assert_eq!(parse_rating("1823"), Some(1823));
        assert_eq!(parse_rating("1823?"), Some(1823));
        assert_eq!(parse_rating("2,104"), Some(2104));
        assert_eq!(parse_rating("N/A"), None);
        assert_eq!(parse_rating(""), None);
    }

    #[test]
    fn test_absolutise() {
        let base = Url::parse("https://www.codechef.com").unwrap();
        assert_eq!(
            absolutise(&base, "/viewsolution/123").as_deref(),
            Some("https://www.codechef.com/viewsolution/123")
        );
        assert_eq!(
            absolutise(&base, "https://cdn.example/x.png").as_deref(),
            Some("https://cdn.example/x.png")
        );
        assert_eq!(absolutise(&base, "  "), None);
    }

    #[test]
    fn test_or_unknown() {
        assert_eq!(or_unknown(Some(" 5★ ".into())), "5★");
        assert_eq!(or_unknown(Some("".into())), UNKNOWN);
        assert_eq!(or_unknown(None), UNKNOWN);
    }
}
