//! Postgres parameter store
//!
//! Parameters live in `registry_parameters` (see [`crate::db::run_migrations`]).
//! The primary key on `name` is the duplicate guard: inserts use
//! `ON CONFLICT DO NOTHING` and a row count of zero means the name existed.
//! Batches run in one transaction that is rolled back on the first conflict.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;

use super::{Parameter, ParameterStore};

pub struct PgParameterStore {
    pool: PgPool,
}

impl PgParameterStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ParameterStore for PgParameterStore {
    async fn put_if_absent(&self, name: &str, value: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO registry_parameters (name, value, created_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(name)
        .bind(value)
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to insert parameter {}", name))?;

        Ok(result.rows_affected() == 1)
    }

    async fn put_all_if_absent(&self, parameters: &[Parameter]) -> Result<Option<String>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to start registry transaction")?;
        let now = chrono::Utc::now();

        for parameter in parameters {
            let result = sqlx::query(
                r#"
                INSERT INTO registry_parameters (name, value, created_at)
                VALUES ($1, $2, $3)
                ON CONFLICT (name) DO NOTHING
                "#,
            )
            .bind(&parameter.name)
            .bind(&parameter.value)
            .bind(now)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to insert parameter {}", parameter.name))?;

            if result.rows_affected() == 0 {
                tx.rollback()
                    .await
                    .context("Failed to roll back registry transaction")?;
                return Ok(Some(parameter.name.clone()));
            }
        }

        tx.commit()
            .await
            .context("Failed to commit registry transaction")?;
        Ok(None)
    }

    async fn get(&self, name: &str) -> Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM registry_parameters WHERE name = $1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await
                .with_context(|| format!("Failed to read parameter {}", name))?;

        Ok(row.map(|(value,)| value))
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM registry_parameters WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to delete parameter {}", name))?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_by_path(&self, path: &str) -> Result<Vec<Parameter>> {
        let rows = sqlx::query_as::<_, ParameterRow>(
            r#"
            SELECT name, value
            FROM registry_parameters
            WHERE name LIKE $1 ESCAPE '\'
            ORDER BY name ASC
            "#,
        )
        .bind(like_prefix(path))
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("Failed to list parameters under {}", path))?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }
}

/// LIKE pattern matching every name that starts with `path`
fn like_prefix(path: &str) -> String {
    let mut pattern = String::with_capacity(path.len() + 1);
    for c in path.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct ParameterRow {
    name: String,
    value: String,
}

impl From<ParameterRow> for Parameter {
    fn from(row: ParameterRow) -> Self {
        Parameter {
            name: row.name,
            value: row.value,
        }
    }
}
