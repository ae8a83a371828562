//! Schema migrations.
//!
//! The relational model is the companies → deals → file uploads →
//! analyses hierarchy, laid out for SQLite: UUIDs are `TEXT`, array
//! columns hold JSON arrays, JSON columns hold JSON objects. Timestamps
//! are ISO-8601 strings in UTC. Every statement is idempotent.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub(crate) const NOW: &str = "(strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))";

/// Tags seeded on every migration run.
pub const COMMON_TAGS: &[&str] = &[
    "contract",
    "nda",
    "msa",
    "dpa",
    "company_profile",
    "historical_data",
    "playbook",
    "financial",
    "legal",
    "technical",
    "marketing",
    "hr",
    "compliance",
];

/// Tables whose `updated_at` column is maintained by a trigger.
const MUTABLE_TABLES: &[&str] = &[
    "companies",
    "deals",
    "file_uploads",
    "processing_jobs",
    "document_analysis",
    "redlines",
    "common_grounds",
    "vector_metadata",
];

fn table_statements() -> Vec<String> {
    vec![
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS companies (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL DEFAULT {NOW},
                updated_at TEXT NOT NULL DEFAULT {NOW},
                metadata TEXT NOT NULL DEFAULT '{{}}'
            )
            "#
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS deals (
                id TEXT PRIMARY KEY,
                company_id TEXT NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
                deal_name TEXT NOT NULL,
                deal_type TEXT,
                status TEXT NOT NULL DEFAULT 'active'
                    CHECK (status IN ('active', 'completed', 'cancelled')),
                created_at TEXT NOT NULL DEFAULT {NOW},
                updated_at TEXT NOT NULL DEFAULT {NOW},
                metadata TEXT NOT NULL DEFAULT '{{}}',
                UNIQUE(company_id, deal_name)
            )
            "#
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS file_uploads (
                id TEXT PRIMARY KEY,
                deal_id TEXT NOT NULL REFERENCES deals(id) ON DELETE CASCADE,
                original_filename TEXT NOT NULL,
                gcs_bucket TEXT NOT NULL,
                gcs_path TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                mime_type TEXT NOT NULL,
                file_hash TEXT NOT NULL,
                upload_status TEXT NOT NULL DEFAULT 'uploaded'
                    CHECK (upload_status IN ('uploaded', 'processing', 'completed', 'failed')),
                created_at TEXT NOT NULL DEFAULT {NOW},
                updated_at TEXT NOT NULL DEFAULT {NOW},
                metadata TEXT NOT NULL DEFAULT '{{}}',
                UNIQUE(gcs_bucket, gcs_path)
            )
            "#
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS file_tags (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                description TEXT,
                created_at TEXT NOT NULL DEFAULT {NOW}
            )
            "#
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS file_upload_tags (
                file_upload_id TEXT NOT NULL REFERENCES file_uploads(id) ON DELETE CASCADE,
                tag_id TEXT NOT NULL REFERENCES file_tags(id) ON DELETE CASCADE,
                created_at TEXT NOT NULL DEFAULT {NOW},
                PRIMARY KEY (file_upload_id, tag_id)
            )
            "#
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS processing_jobs (
                id TEXT PRIMARY KEY,
                file_upload_id TEXT REFERENCES file_uploads(id) ON DELETE CASCADE,
                job_type TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending'
                    CHECK (status IN ('pending', 'running', 'completed', 'failed')),
                started_at TEXT,
                completed_at TEXT,
                error_message TEXT,
                created_at TEXT NOT NULL DEFAULT {NOW},
                updated_at TEXT NOT NULL DEFAULT {NOW},
                metadata TEXT NOT NULL DEFAULT '{{}}'
            )
            "#
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS document_analysis (
                id TEXT PRIMARY KEY,
                file_upload_id TEXT NOT NULL REFERENCES file_uploads(id) ON DELETE CASCADE,
                processing_job_id TEXT REFERENCES processing_jobs(id) ON DELETE SET NULL,
                detected_type TEXT,
                extraction_engine TEXT,
                pages_processed INTEGER,
                extraction_confidence REAL,
                document_type TEXT,
                classification_confidence REAL,
                key_topics TEXT NOT NULL DEFAULT '[]',
                summary TEXT,
                word_count INTEGER,
                character_count INTEGER,
                contract_type TEXT,
                parties TEXT NOT NULL DEFAULT '[]',
                key_dates TEXT NOT NULL DEFAULT '{{}}',
                jurisdiction TEXT,
                processing_log TEXT NOT NULL DEFAULT '[]',
                warnings TEXT NOT NULL DEFAULT '[]',
                errors TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL DEFAULT {NOW},
                updated_at TEXT NOT NULL DEFAULT {NOW},
                metadata TEXT NOT NULL DEFAULT '{{}}'
            )
            "#
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS redlines (
                id TEXT PRIMARY KEY,
                document_analysis_id TEXT NOT NULL REFERENCES document_analysis(id) ON DELETE CASCADE,
                issue_description TEXT NOT NULL,
                severity TEXT NOT NULL CHECK (severity IN ('low', 'medium', 'high')),
                clause_reference TEXT,
                recommendation TEXT,
                category TEXT,
                created_at TEXT NOT NULL DEFAULT {NOW},
                updated_at TEXT NOT NULL DEFAULT {NOW}
            )
            "#
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS common_grounds (
                id TEXT PRIMARY KEY,
                document_analysis_id TEXT NOT NULL REFERENCES document_analysis(id) ON DELETE CASCADE,
                area TEXT NOT NULL,
                description TEXT,
                leverage TEXT,
                category TEXT,
                created_at TEXT NOT NULL DEFAULT {NOW},
                updated_at TEXT NOT NULL DEFAULT {NOW}
            )
            "#
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS vector_metadata (
                id TEXT PRIMARY KEY,
                document_analysis_id TEXT NOT NULL REFERENCES document_analysis(id) ON DELETE CASCADE,
                vector_ids TEXT NOT NULL DEFAULT '[]',
                chunk_count INTEGER NOT NULL DEFAULT 0,
                embedding_model TEXT,
                index_name TEXT,
                created_at TEXT NOT NULL DEFAULT {NOW},
                updated_at TEXT NOT NULL DEFAULT {NOW}
            )
            "#
        ),
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            file_upload_id TEXT NOT NULL REFERENCES file_uploads(id) ON DELETE CASCADE,
            chunk_index INTEGER NOT NULL,
            section_header TEXT,
            section_index INTEGER NOT NULL,
            clause_index INTEGER NOT NULL,
            chunk_tokens INTEGER NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL,
            UNIQUE(file_upload_id, chunk_index)
        )
        "#
        .to_string(),
    ]
}

const INDEX_STATEMENTS: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_deals_company_id ON deals(company_id)",
    "CREATE INDEX IF NOT EXISTS idx_file_uploads_deal_id ON file_uploads(deal_id)",
    "CREATE INDEX IF NOT EXISTS idx_file_uploads_hash ON file_uploads(file_hash)",
    "CREATE INDEX IF NOT EXISTS idx_file_uploads_created_at ON file_uploads(created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_processing_jobs_file_upload_id ON processing_jobs(file_upload_id) WHERE file_upload_id IS NOT NULL",
    "CREATE INDEX IF NOT EXISTS idx_processing_jobs_status ON processing_jobs(status)",
    "CREATE INDEX IF NOT EXISTS idx_document_analysis_file_upload_id ON document_analysis(file_upload_id)",
    "CREATE INDEX IF NOT EXISTS idx_document_analysis_job_id ON document_analysis(processing_job_id)",
    "CREATE INDEX IF NOT EXISTS idx_redlines_analysis_id ON redlines(document_analysis_id)",
    "CREATE INDEX IF NOT EXISTS idx_redlines_severity ON redlines(severity)",
    "CREATE INDEX IF NOT EXISTS idx_common_grounds_analysis_id ON common_grounds(document_analysis_id)",
    "CREATE INDEX IF NOT EXISTS idx_chunks_file_upload_id ON chunks(file_upload_id)",
];

/// Full-text triggers keep the FTS5 tables in step with their source rows.
const FTS_TRIGGERS: &[&str] = &[
    r#"
    CREATE TRIGGER IF NOT EXISTS trg_analysis_fts_insert AFTER INSERT ON document_analysis
    BEGIN
        INSERT INTO analysis_fts (analysis_id, summary) VALUES (NEW.id, COALESCE(NEW.summary, ''));
    END
    "#,
    r#"
    CREATE TRIGGER IF NOT EXISTS trg_analysis_fts_delete AFTER DELETE ON document_analysis
    BEGIN
        DELETE FROM analysis_fts WHERE analysis_id = OLD.id;
    END
    "#,
    r#"
    CREATE TRIGGER IF NOT EXISTS trg_analysis_fts_update AFTER UPDATE OF summary ON document_analysis
    BEGIN
        DELETE FROM analysis_fts WHERE analysis_id = OLD.id;
        INSERT INTO analysis_fts (analysis_id, summary) VALUES (NEW.id, COALESCE(NEW.summary, ''));
    END
    "#,
    r#"
    CREATE TRIGGER IF NOT EXISTS trg_redlines_fts_insert AFTER INSERT ON redlines
    BEGIN
        INSERT INTO redlines_fts (redline_id, analysis_id, issue_description)
        VALUES (NEW.id, NEW.document_analysis_id, NEW.issue_description);
    END
    "#,
    r#"
    CREATE TRIGGER IF NOT EXISTS trg_redlines_fts_delete AFTER DELETE ON redlines
    BEGIN
        DELETE FROM redlines_fts WHERE redline_id = OLD.id;
    END
    "#,
];

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Applies the schema to an open pool. Safe to call repeatedly.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    for stmt in table_statements() {
        sqlx::query(&stmt).execute(pool).await?;
    }

    for stmt in INDEX_STATEMENTS {
        sqlx::query(stmt).execute(pool).await?;
    }

    for table in MUTABLE_TABLES {
        let trigger = format!(
            r#"
            CREATE TRIGGER IF NOT EXISTS trg_{table}_updated_at AFTER UPDATE ON {table}
            FOR EACH ROW WHEN NEW.updated_at = OLD.updated_at
            BEGIN
                UPDATE {table} SET updated_at = {NOW} WHERE id = NEW.id;
            END
            "#
        );
        sqlx::query(&trigger).execute(pool).await?;
    }

    // FTS5 CREATE is not idempotent natively, so we check first
    create_fts_table(
        pool,
        "analysis_fts",
        "CREATE VIRTUAL TABLE analysis_fts USING fts5(analysis_id UNINDEXED, summary)",
    )
    .await?;
    create_fts_table(
        pool,
        "redlines_fts",
        "CREATE VIRTUAL TABLE redlines_fts USING fts5(redline_id UNINDEXED, analysis_id UNINDEXED, issue_description)",
    )
    .await?;

    for stmt in FTS_TRIGGERS {
        sqlx::query(stmt).execute(pool).await?;
    }

    seed_tags(pool).await?;
    Ok(())
}

async fn create_fts_table(pool: &SqlitePool, name: &str, ddl: &str) -> Result<()> {
    let exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name = ?",
    )
    .bind(name)
    .fetch_one(pool)
    .await?;

    if !exists {
        sqlx::query(ddl).execute(pool).await?;
    }
    Ok(())
}

async fn seed_tags(pool: &SqlitePool) -> Result<()> {
    for tag in COMMON_TAGS {
        sqlx::query(
            "INSERT INTO file_tags (id, name, description) VALUES (?, ?, ?) ON CONFLICT(name) DO NOTHING",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(tag)
        .bind(format!("Tag for {} documents", tag))
        .execute(pool)
        .await?;
    }
    Ok(())
}
