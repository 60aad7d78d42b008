//! Context document ingestion and retrieval
//!
//! Reference documents (glossaries, metric definitions) are chunked,
//! embedded with the hashed-token embedder, and persisted. Retrieval scores
//! every stored chunk against the question embedding and returns the top-k
//! as citations for the synthesis step.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::UploadError;
use super::rag::{chunk_text, cosine_similarity, embed_text};
use crate::config::{RagConfig, UploadConfig};
use crate::models::ContextCitation;
use crate::utils::truncate_chars;

const SNIPPET_CHARS: usize = 300;

#[derive(Debug, Clone)]
pub struct ContextDocSummary {
    pub doc_id: String,
    pub filename: String,
    pub chunks: i64,
    pub created_at: DateTime<Utc>,
}

pub struct ContextService {
    pool: SqlitePool,
    rag: RagConfig,
    max_upload_mb: usize,
}

impl ContextService {
    pub fn new(pool: SqlitePool, rag: RagConfig, upload: &UploadConfig) -> Self {
        Self { pool, rag, max_upload_mb: upload.context_max_mb }
    }

    pub fn top_k(&self) -> usize {
        self.rag.top_k
    }

    fn extract_text(filename: &str, content: &[u8]) -> Result<String, UploadError> {
        let lower = filename.to_lowercase();
        if !(lower.ends_with(".txt") || lower.ends_with(".md") || lower.ends_with(".csv")) {
            return Err(UploadError::Invalid(
                "Unsupported context file type. Use TXT, MD, or CSV".to_string(),
            ));
        }

        let text = String::from_utf8(content.to_vec())
            .map_err(|_| UploadError::Invalid("Context file is not valid UTF-8".to_string()))?;
        Ok(text.strip_prefix('\u{feff}').unwrap_or(&text).to_string())
    }

    /// Chunk, embed, and persist one reference document.
    pub async fn ingest_document(
        &self,
        filename: &str,
        content_type: Option<&str>,
        content: &[u8],
    ) -> Result<ContextDocSummary, UploadError> {
        if content.len() > self.max_upload_mb * 1024 * 1024 {
            return Err(UploadError::TooLarge(self.max_upload_mb));
        }

        let text = Self::extract_text(filename, content)?;
        let chunks = chunk_text(&text, self.rag.chunk_size, self.rag.chunk_overlap);
        if chunks.is_empty() {
            return Err(UploadError::Invalid("Document is empty after extraction".to_string()));
        }

        let doc_id = Uuid::new_v4().to_string();
        let created_at = Utc::now();
        let created_at_text = created_at.to_rfc3339();

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"INSERT INTO docs_meta (doc_id, filename, content_type, chunk_count, created_at)
               VALUES (?, ?, ?, ?, ?)"#,
        )
        .bind(&doc_id)
        .bind(filename)
        .bind(content_type)
        .bind(chunks.len() as i64)
        .bind(&created_at_text)
        .execute(&mut *tx)
        .await?;

        for (index, chunk) in chunks.iter().enumerate() {
            let embedding = embed_text(chunk);
            let embedding_json = serde_json::to_string(&embedding)
                .map_err(|e| UploadError::Invalid(e.to_string()))?;
            sqlx::query(
                r#"INSERT INTO vector_chunks
                   (chunk_id, doc_id, chunk_index, content, embedding_json, created_at)
                   VALUES (?, ?, ?, ?, ?, ?)"#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&doc_id)
            .bind(index as i64)
            .bind(chunk)
            .bind(embedding_json)
            .bind(&created_at_text)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        tracing::info!("Ingested context doc '{}' as {} chunks", filename, chunks.len());

        Ok(ContextDocSummary {
            doc_id,
            filename: filename.to_string(),
            chunks: chunks.len() as i64,
            created_at,
        })
    }

    /// Cosine top-k over every persisted chunk.
    pub async fn retrieve(
        &self,
        question: &str,
        top_k: usize,
    ) -> Result<Vec<ContextCitation>, sqlx::Error> {
        let query_embedding = embed_text(question);

        let rows: Vec<(String, String, i64, String, String, String)> = sqlx::query_as(
            r#"SELECT vc.chunk_id, vc.doc_id, vc.chunk_index, vc.content,
                      vc.embedding_json, dm.filename
               FROM vector_chunks vc
               JOIN docs_meta dm ON dm.doc_id = vc.doc_id
               ORDER BY vc.created_at DESC"#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut scored: Vec<ContextCitation> = rows
            .into_iter()
            .map(|(chunk_id, doc_id, _chunk_index, content, embedding_json, filename)| {
                let embedding: Vec<f64> =
                    serde_json::from_str(&embedding_json).unwrap_or_default();
                ContextCitation {
                    doc_id,
                    filename,
                    chunk_id,
                    score: cosine_similarity(&query_embedding, &embedding),
                    snippet: truncate_chars(&content, SNIPPET_CHARS),
                }
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn service() -> ContextService {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("memory pool");
        db::init_schema(&pool).await.expect("schema");
        ContextService::new(pool, RagConfig::default(), &UploadConfig::default())
    }

    #[tokio::test]
    async fn ingest_then_retrieve_ranks_the_matching_doc_first() {
        let service = service().await;
        service
            .ingest_document(
                "glossary.md",
                Some("text/markdown"),
                b"churn: the rate at which customers cancel their subscription",
            )
            .await
            .expect("ingest glossary");
        service
            .ingest_document(
                "finance.txt",
                Some("text/plain"),
                b"depreciation schedules for fixed assets and amortization",
            )
            .await
            .expect("ingest finance");

        let citations = service.retrieve("what does churn mean", 5).await.expect("retrieve");
        assert_eq!(citations.len(), 2);
        assert_eq!(citations[0].filename, "glossary.md");
        assert!(citations[0].score > citations[1].score);
    }

    #[tokio::test]
    async fn retrieval_honors_top_k() {
        let service = service().await;
        for i in 0..4 {
            service
                .ingest_document(
                    &format!("doc{i}.txt"),
                    None,
                    format!("document number {i} about revenue").as_bytes(),
                )
                .await
                .expect("ingest");
        }

        let citations = service.retrieve("revenue", 2).await.expect("retrieve");
        assert_eq!(citations.len(), 2);
    }

    #[tokio::test]
    async fn unsupported_extension_is_rejected() {
        let service = service().await;
        let err = service
            .ingest_document("report.pdf", None, b"%PDF-1.4")
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Invalid(_)));
    }

    #[tokio::test]
    async fn empty_document_is_rejected() {
        let service = service().await;
        let err = service.ingest_document("empty.txt", None, b"   ").await.unwrap_err();
        assert!(matches!(err, UploadError::Invalid(_)));
    }
}
