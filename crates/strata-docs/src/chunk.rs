/// One paragraph of a source document.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// `<file stem>::chunk<N>`, N counted from zero per file.
    pub id: String,
    pub text: String,
}

/// Split a markdown document into paragraph chunks on blank lines.
pub fn chunk_markdown(stem: &str, content: &str) -> Vec<Chunk> {
    content
        .replace("\r\n", "\n")
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .enumerate()
        .map(|(i, text)| Chunk {
            id: format!("{}::chunk{}", stem, i),
            text: text.to_string(),
        })
        .collect()
}
