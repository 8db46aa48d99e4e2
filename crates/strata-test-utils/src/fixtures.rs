use std::path::PathBuf;

use serde_json::Value;
use tempfile::TempDir;

use strata_core::config::AppConfig;
use strata_core::format::ExpectedFormat;
use strata_core::types::{Passage, QueryError, QueryErrorKind, QueryRows, Question, Row};

pub fn question(id: &str, text: &str, format: &str) -> Question {
    Question::new(id, text, format.parse::<ExpectedFormat>().unwrap_or(ExpectedFormat::FreeForm))
}

pub fn passage(id: &str, text: &str, score: f64) -> Passage {
    Passage::new(id, text, score)
}

/// Build result rows from `(column, value)` pairs per row. Column order is
/// taken from the first row.
pub fn rows(data: &[&[(&str, Value)]]) -> QueryRows {
    let columns = data
        .first()
        .map(|r| r.iter().map(|(c, _)| c.to_string()).collect())
        .unwrap_or_default();
    let rows = data
        .iter()
        .map(|r| {
            let mut row = Row::new();
            for (c, v) in r.iter() {
                row.insert(c.to_string(), v.clone());
            }
            row
        })
        .collect();
    QueryRows::new(columns, rows)
}

pub fn syntax_error(message: &str) -> QueryError {
    QueryError::new(QueryErrorKind::Syntax, message)
}

/// Parse an inline TOML config, as the loader would after env expansion.
pub fn config_from_toml(toml_str: &str) -> AppConfig {
    toml::from_str(toml_str).unwrap()
}

/// A temp directory holding markdown documents, kept alive by the guard.
pub fn docs_dir(files: &[(&str, &str)]) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    for (name, content) in files {
        std::fs::write(dir.path().join(name), content).unwrap();
    }
    let path = dir.path().to_path_buf();
    (dir, path)
}
