//! Transient full-text index over markdown chunks.
//!
//! Built in memory at startup and never persisted. Ranking is SQLite FTS5
//! `bm25()`, negated so that higher scores are better.

use std::path::Path;
use std::sync::Mutex;

use futures::future::BoxFuture;
use rusqlite::{params, Connection};
use tracing::{debug, info, warn};

use strata_core::error::{Result, StrataError};
use strata_core::traits::Retriever;
use strata_core::types::Passage;

use crate::chunk::chunk_markdown;

pub struct DocIndex {
    conn: Mutex<Connection>,
    top_k: usize,
    chunk_count: usize,
}

impl DocIndex {
    /// Create an empty index.
    pub fn in_memory(top_k: usize) -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| StrataError::Retrieval(e.to_string()))?;

        conn.execute_batch(
            "CREATE VIRTUAL TABLE chunks USING fts5(
                text,
                id UNINDEXED,
                tokenize = 'porter unicode61'
            );",
        )
        .map_err(|e| StrataError::Retrieval(e.to_string()))?;

        Ok(Self {
            conn: Mutex::new(conn),
            top_k: top_k.max(1),
            chunk_count: 0,
        })
    }

    /// Index every `*.md` file directly under `dir`, in file name order.
    pub fn load_dir(dir: &Path, top_k: usize) -> Result<Self> {
        if !dir.is_dir() {
            return Err(StrataError::Retrieval(format!(
                "docs directory not found: {}",
                dir.display()
            )));
        }

        let mut paths: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "md"))
            .collect();
        paths.sort();

        let mut index = Self::in_memory(top_k)?;
        for path in paths {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            match std::fs::read_to_string(&path) {
                Ok(content) => index.add_document(&stem, &content)?,
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable document"),
            }
        }

        if index.chunk_count == 0 {
            warn!(dir = %dir.display(), "No document chunks loaded");
        } else {
            info!(chunks = index.chunk_count, dir = %dir.display(), "Document index built");
        }
        Ok(index)
    }

    /// Chunk and index one document.
    pub fn add_document(&mut self, stem: &str, content: &str) -> Result<()> {
        let chunks = chunk_markdown(stem, content);
        let conn = self
            .conn
            .get_mut()
            .map_err(|e| StrataError::Retrieval(e.to_string()))?;

        for chunk in &chunks {
            conn.execute(
                "INSERT INTO chunks (text, id) VALUES (?1, ?2)",
                params![chunk.text, chunk.id],
            )
            .map_err(|e| StrataError::Retrieval(e.to_string()))?;
        }
        self.chunk_count += chunks.len();
        debug!(stem, chunks = chunks.len(), "Document indexed");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.chunk_count
    }

    pub fn is_empty(&self) -> bool {
        self.chunk_count == 0
    }

    fn search(&self, question: &str) -> Result<Vec<Passage>> {
        let Some(query) = match_expression(question) else {
            return Ok(Vec::new());
        };

        let conn = self
            .conn
            .lock()
            .map_err(|e| StrataError::Retrieval(e.to_string()))?;

        let mut stmt = conn
            .prepare(
                "SELECT id, text, -bm25(chunks) AS score
                 FROM chunks
                 WHERE chunks MATCH ?1
                 ORDER BY score DESC, id
                 LIMIT ?2",
            )
            .map_err(|e| StrataError::Retrieval(e.to_string()))?;

        let rows = stmt
            .query_map(params![query, self.top_k as i64], |row| {
                Ok(Passage::new(
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                ))
            })
            .map_err(|e| StrataError::Retrieval(e.to_string()))?;

        let mut passages = Vec::new();
        for row in rows {
            let passage = row.map_err(|e| StrataError::Retrieval(e.to_string()))?;
            if passage.score > 0.0 {
                passages.push(passage);
            }
        }
        Ok(passages)
    }
}

/// Turn free text into an FTS5 OR-query of quoted terms, so punctuation in
/// the question never reaches the FTS parser.
fn match_expression(question: &str) -> Option<String> {
    let mut terms: Vec<String> = Vec::new();
    for word in question
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let word = word.to_lowercase();
        if !terms.contains(&word) {
            terms.push(word);
        }
    }
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{}\"", t))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

impl Retriever for DocIndex {
    fn retrieve(&self, question: &str) -> BoxFuture<'_, Result<Vec<Passage>>> {
        let question = question.to_string();
        Box::pin(async move { self.search(&question) })
    }
}
