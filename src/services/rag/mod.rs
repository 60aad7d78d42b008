pub mod chunker;
pub mod embedder;

pub use chunker::chunk_text;
pub use embedder::{EMBED_SIZE, cosine_similarity, embed_text};
