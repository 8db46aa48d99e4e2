use std::sync::OnceLock;

use regex::Regex;

use strata_core::traits::OutputCleaner;

/// Pulls a single executable statement out of model output.
///
/// Handles code fences, `SQL:` style labels, prose before the statement,
/// and anything after the first top-level `;`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlCleaner;

impl SqlCleaner {
    pub fn new() -> Self {
        Self
    }
}

impl OutputCleaner for SqlCleaner {
    fn clean(&self, raw: &str) -> String {
        let text = strip_code_fences(raw);
        let text = strip_label(&text);
        let text = skip_preamble(&text);
        first_statement(text).trim().to_string()
    }
}

fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed.to_string();
    };
    let after = &trimmed[start + 3..];
    // Language tag runs to the end of the opening line.
    let body_start = after.find('\n').map_or(after.len(), |p| p + 1);
    let body = &after[body_start..];
    match body.find("```") {
        Some(end) => body[..end].trim().to_string(),
        None => body.trim().to_string(),
    }
}

fn label_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(sql[ _]?query|sql|query)\s*:\s*").expect("static regex")
    })
}

/// `SELECT`, or `WITH` only when it opens a common table expression.
const STATEMENT_START: &str =
    r"select\b|with\s+(?:recursive\s+)?\w+(?:\s*\([^)]*\))?\s+as\s*\(";

fn line_start_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(r"(?im)^[ \t]*(?:{})", STATEMENT_START)).expect("static regex")
    })
}

fn inline_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(r"(?i)\b(?:{})", STATEMENT_START)).expect("static regex")
    })
}

fn strip_label(text: &str) -> String {
    label_regex().replace(text, "").into_owned()
}

/// Drop prose before the statement. A statement opening a line wins over
/// one embedded in a sentence.
fn skip_preamble(text: &str) -> &str {
    let found = line_start_regex()
        .find(text)
        .or_else(|| inline_regex().find(text));
    match found {
        Some(m) => &text[m.start()..],
        None => text,
    }
}

/// Everything up to the first `;` that is not inside a quoted literal.
fn first_statement(text: &str) -> &str {
    let mut quote: Option<char> = None;
    for (i, ch) in text.char_indices() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => {}
            None if ch == '\'' || ch == '"' || ch == '`' => quote = Some(ch),
            None if ch == ';' => return &text[..i],
            None => {}
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean(raw: &str) -> String {
        SqlCleaner::new().clean(raw)
    }

    #[test]
    fn plain_statement_passes_through() {
        assert_eq!(clean("SELECT 1"), "SELECT 1");
    }

    #[test]
    fn fenced_statement() {
        let raw = "Here you go:\n```sql\nSELECT COUNT(*) FROM Orders;\n```\nHope it helps";
        assert_eq!(clean(raw), "SELECT COUNT(*) FROM Orders");
    }

    #[test]
    fn unterminated_fence() {
        assert_eq!(clean("```sql\nSELECT 2"), "SELECT 2");
    }

    #[test]
    fn label_is_removed() {
        assert_eq!(clean("SQL: SELECT * FROM Products"), "SELECT * FROM Products");
        assert_eq!(clean("sql_query: select 1"), "select 1");
    }

    #[test]
    fn prose_before_statement_is_dropped() {
        let raw = "The query you need is SELECT ProductName FROM Products LIMIT 3";
        assert_eq!(clean(raw), "SELECT ProductName FROM Products LIMIT 3");
    }

    #[test]
    fn cte_is_kept() {
        let raw = "WITH t AS (SELECT 1 AS x) SELECT x FROM t; -- done";
        assert_eq!(clean(raw), "WITH t AS (SELECT 1 AS x) SELECT x FROM t");
    }

    #[test]
    fn prose_with_keyword_words_is_dropped() {
        let raw = "Here is the query with a join:\nSELECT COUNT(*) FROM Orders;";
        assert_eq!(clean(raw), "SELECT COUNT(*) FROM Orders");

        let raw = "I used a CTE with totals:\nWITH totals(n) AS (SELECT 1) SELECT n FROM totals";
        assert_eq!(clean(raw), "WITH totals(n) AS (SELECT 1) SELECT n FROM totals");
    }

    #[test]
    fn recursive_cte_after_prose() {
        let raw = "Try this one WITH RECURSIVE r AS (SELECT 1) SELECT * FROM r";
        assert_eq!(clean(raw), "WITH RECURSIVE r AS (SELECT 1) SELECT * FROM r");
    }

    #[test]
    fn semicolon_in_literal_is_not_a_terminator() {
        let raw = "SELECT * FROM Customers WHERE CompanyName = 'a;b'; DROP TABLE x";
        assert_eq!(clean(raw), "SELECT * FROM Customers WHERE CompanyName = 'a;b'");
    }

    #[test]
    fn blank_output_cleans_to_empty() {
        assert_eq!(clean("   \n"), "");
        assert_eq!(clean("```sql\n```"), "");
    }
}
