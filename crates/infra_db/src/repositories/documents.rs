//! Generated document and recipient repository

use chrono::NaiveDate;
use sqlx::{FromRow, PgPool};
use tracing::instrument;

use crate::error::DatabaseError;

#[derive(Debug, Clone)]
pub struct NewDocumentRow {
    pub target_document_id: i64,
    pub document_number: Option<String>,
    pub billing_entity_id: i64,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub file_name: String,
    pub mime: String,
    pub size_bytes: i64,
    pub content_hash: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DocumentRow {
    pub id: i64,
    pub target_document_id: i64,
    pub document_number: Option<String>,
    pub billing_entity_id: i64,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub file_name: String,
    pub mime: String,
    pub size_bytes: i64,
    pub content_hash: String,
    pub content: Vec<u8>,
    pub external_archive_id: Option<String>,
}

/// Repository over `generated_documents` and `entity_recipients`
#[derive(Debug, Clone)]
pub struct DocumentRepository {
    pool: PgPool,
}

impl DocumentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts or overwrites the document for a target
    ///
    /// A re-render replaces content and clears the archive id; the id of the
    /// existing row is kept.
    #[instrument(skip(self, document), fields(target_document_id = document.target_document_id))]
    pub async fn upsert(&self, document: &NewDocumentRow) -> Result<i64, DatabaseError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO generated_documents (
                target_document_id, document_number, billing_entity_id, period_start, period_end,
                file_name, mime, size_bytes, content_hash, content
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (target_document_id) DO UPDATE SET
                document_number = EXCLUDED.document_number,
                billing_entity_id = EXCLUDED.billing_entity_id,
                period_start = EXCLUDED.period_start,
                period_end = EXCLUDED.period_end,
                file_name = EXCLUDED.file_name,
                mime = EXCLUDED.mime,
                size_bytes = EXCLUDED.size_bytes,
                content_hash = EXCLUDED.content_hash,
                content = EXCLUDED.content,
                external_archive_id = NULL,
                updated_at = NOW()
            RETURNING id
            "#,
        )
        .bind(document.target_document_id)
        .bind(&document.document_number)
        .bind(document.billing_entity_id)
        .bind(document.period_start)
        .bind(document.period_end)
        .bind(&document.file_name)
        .bind(&document.mime)
        .bind(document.size_bytes)
        .bind(&document.content_hash)
        .bind(&document.content)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    pub async fn set_archive_id(&self, id: i64, archive_id: &str) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            "UPDATE generated_documents SET external_archive_id = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(archive_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("GeneratedDocument", id));
        }
        Ok(())
    }

    pub async fn find_by_target(&self, target_document_id: i64) -> Result<Option<DocumentRow>, DatabaseError> {
        let row = sqlx::query_as::<_, DocumentRow>(
            r#"
            SELECT id, target_document_id, document_number, billing_entity_id, period_start, period_end,
                   file_name, mime, size_bytes, content_hash, content, external_archive_id
            FROM generated_documents
            WHERE target_document_id = $1
            "#,
        )
        .bind(target_document_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Recipient addresses configured for an entity
    pub async fn recipients(&self, billing_entity_id: i64) -> Result<Vec<String>, DatabaseError> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT email FROM entity_recipients WHERE billing_entity_id = $1 ORDER BY id",
        )
        .bind(billing_entity_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
