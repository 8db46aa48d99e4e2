pub mod chunk;
pub mod index;

pub use chunk::{chunk_markdown, Chunk};
pub use index::DocIndex;
