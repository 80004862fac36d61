//! Warehouse schema bootstrap
//!
//! Creates any missing table or index; existing objects are left untouched.
//! Both backends get the same logical schema. Timestamps are RFC 3339 text so
//! that rows decode identically through the `Any` driver.

use sqlx::AnyPool;
use tracing::debug;

use super::Backend;
use crate::error::LoadResult;

const POSTGRES: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS runs (
        run_id TEXT PRIMARY KEY,
        started_at TEXT NOT NULL,
        finished_at TEXT,
        status TEXT NOT NULL,
        config_hash TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS run_studies (
        run_id TEXT NOT NULL,
        study_id TEXT NOT NULL,
        status TEXT NOT NULL,
        report TEXT,
        error TEXT,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (run_id, study_id)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS checkpoints (
        run_id TEXT NOT NULL,
        study_id TEXT NOT NULL,
        table_name TEXT NOT NULL,
        batch_index BIGINT NOT NULL,
        created_at TEXT NOT NULL,
        UNIQUE (run_id, study_id, table_name, batch_index)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS dim_platform (
        platform_key BIGSERIAL PRIMARY KEY,
        platform_accession TEXT NOT NULL UNIQUE
    )"#,
    r#"CREATE TABLE IF NOT EXISTS dim_illness (
        illness_key BIGSERIAL PRIMARY KEY,
        illness_label TEXT NOT NULL UNIQUE
    )"#,
    r#"CREATE TABLE IF NOT EXISTS dim_gene (
        gene_key BIGSERIAL PRIMARY KEY,
        ensembl_id TEXT NOT NULL UNIQUE
    )"#,
    r#"CREATE TABLE IF NOT EXISTS dim_study (
        study_key BIGSERIAL PRIMARY KEY,
        gse_accession TEXT NOT NULL UNIQUE
    )"#,
    r#"CREATE TABLE IF NOT EXISTS dim_sample (
        sample_key BIGSERIAL PRIMARY KEY,
        gsm_accession TEXT NOT NULL,
        study_key BIGINT NOT NULL REFERENCES dim_study (study_key),
        platform_key BIGINT NOT NULL REFERENCES dim_platform (platform_key),
        illness_key BIGINT NOT NULL REFERENCES dim_illness (illness_key),
        age TEXT NOT NULL,
        sex TEXT NOT NULL,
        UNIQUE (gsm_accession, study_key)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS fact_expression (
        expression_key BIGSERIAL PRIMARY KEY,
        sample_key BIGINT NOT NULL REFERENCES dim_sample (sample_key),
        gene_key BIGINT NOT NULL REFERENCES dim_gene (gene_key),
        study_key BIGINT NOT NULL REFERENCES dim_study (study_key),
        expression_value DOUBLE PRECISION NOT NULL,
        run_id TEXT,
        UNIQUE (sample_key, gene_key, study_key)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS fact_gene_pair_corr (
        correlation_key BIGSERIAL PRIMARY KEY,
        gene_a_key BIGINT NOT NULL REFERENCES dim_gene (gene_key),
        gene_b_key BIGINT NOT NULL REFERENCES dim_gene (gene_key),
        illness_key BIGINT NOT NULL REFERENCES dim_illness (illness_key),
        study_key BIGINT NOT NULL REFERENCES dim_study (study_key),
        rho_spearman DOUBLE PRECISION NOT NULL,
        p_value DOUBLE PRECISION NOT NULL,
        q_value DOUBLE PRECISION NOT NULL,
        n_samples BIGINT NOT NULL,
        computed_at TEXT NOT NULL,
        UNIQUE (gene_a_key, gene_b_key, illness_key, study_key)
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_fact_expression_run ON fact_expression (run_id)",
    "CREATE INDEX IF NOT EXISTS idx_checkpoints_run ON checkpoints (run_id, study_id)",
    "CREATE INDEX IF NOT EXISTS idx_gene_pair_corr_study ON fact_gene_pair_corr (study_key)",
];

const SQLITE: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS runs (
        run_id TEXT PRIMARY KEY,
        started_at TEXT NOT NULL,
        finished_at TEXT,
        status TEXT NOT NULL,
        config_hash TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS run_studies (
        run_id TEXT NOT NULL,
        study_id TEXT NOT NULL,
        status TEXT NOT NULL,
        report TEXT,
        error TEXT,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (run_id, study_id)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS checkpoints (
        run_id TEXT NOT NULL,
        study_id TEXT NOT NULL,
        table_name TEXT NOT NULL,
        batch_index INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        UNIQUE (run_id, study_id, table_name, batch_index)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS dim_platform (
        platform_key INTEGER PRIMARY KEY AUTOINCREMENT,
        platform_accession TEXT NOT NULL UNIQUE
    )"#,
    r#"CREATE TABLE IF NOT EXISTS dim_illness (
        illness_key INTEGER PRIMARY KEY AUTOINCREMENT,
        illness_label TEXT NOT NULL UNIQUE
    )"#,
    r#"CREATE TABLE IF NOT EXISTS dim_gene (
        gene_key INTEGER PRIMARY KEY AUTOINCREMENT,
        ensembl_id TEXT NOT NULL UNIQUE
    )"#,
    r#"CREATE TABLE IF NOT EXISTS dim_study (
        study_key INTEGER PRIMARY KEY AUTOINCREMENT,
        gse_accession TEXT NOT NULL UNIQUE
    )"#,
    r#"CREATE TABLE IF NOT EXISTS dim_sample (
        sample_key INTEGER PRIMARY KEY AUTOINCREMENT,
        gsm_accession TEXT NOT NULL,
        study_key INTEGER NOT NULL REFERENCES dim_study (study_key),
        platform_key INTEGER NOT NULL REFERENCES dim_platform (platform_key),
        illness_key INTEGER NOT NULL REFERENCES dim_illness (illness_key),
        age TEXT NOT NULL,
        sex TEXT NOT NULL,
        UNIQUE (gsm_accession, study_key)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS fact_expression (
        expression_key INTEGER PRIMARY KEY AUTOINCREMENT,
        sample_key INTEGER NOT NULL REFERENCES dim_sample (sample_key),
        gene_key INTEGER NOT NULL REFERENCES dim_gene (gene_key),
        study_key INTEGER NOT NULL REFERENCES dim_study (study_key),
        expression_value REAL NOT NULL,
        run_id TEXT,
        UNIQUE (sample_key, gene_key, study_key)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS fact_gene_pair_corr (
        correlation_key INTEGER PRIMARY KEY AUTOINCREMENT,
        gene_a_key INTEGER NOT NULL REFERENCES dim_gene (gene_key),
        gene_b_key INTEGER NOT NULL REFERENCES dim_gene (gene_key),
        illness_key INTEGER NOT NULL REFERENCES dim_illness (illness_key),
        study_key INTEGER NOT NULL REFERENCES dim_study (study_key),
        rho_spearman REAL NOT NULL,
        p_value REAL NOT NULL,
        q_value REAL NOT NULL,
        n_samples INTEGER NOT NULL,
        computed_at TEXT NOT NULL,
        UNIQUE (gene_a_key, gene_b_key, illness_key, study_key)
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_fact_expression_run ON fact_expression (run_id)",
    "CREATE INDEX IF NOT EXISTS idx_checkpoints_run ON checkpoints (run_id, study_id)",
    "CREATE INDEX IF NOT EXISTS idx_gene_pair_corr_study ON fact_gene_pair_corr (study_key)",
];

/// Create missing warehouse and bookkeeping tables
pub async fn ensure_schema(pool: &AnyPool, backend: Backend) -> LoadResult<()> {
    let statements = match backend {
        Backend::Postgres => POSTGRES,
        Backend::Sqlite => SQLITE,
    };

    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }

    debug!(backend = backend.as_str(), statements = statements.len(), "Schema ensured");
    Ok(())
}
