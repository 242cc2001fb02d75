//! PostgreSQL adapter over the `warden_rules` table.

use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, Row, Transaction};
use std::time::Duration;
use tracing::{debug, info};

use super::PolicyAdapter;
use crate::error::Result;
use crate::rbac::models::RuleLine;

/// Rule store backed by PostgreSQL.
#[derive(Debug, Clone)]
pub struct PostgresAdapter {
    pool: PgPool,
}

impl PostgresAdapter {
    /// Connect and apply migrations.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        let adapter = Self { pool };
        adapter.migrate().await?;
        info!(max_connections, "Connected to PostgreSQL rule store");
        Ok(adapter)
    }

    /// Wrap an existing pool. Migrations are not applied.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn insert(tx: &mut Transaction<'_, Postgres>, line: &RuleLine) -> Result<()> {
        let [v0, v1, v2, v3] = line.values();
        sqlx::query(
            r#"
            INSERT INTO warden_rules (ptype, v0, v1, v2, v3)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (ptype, v0, v1, v2, v3) DO NOTHING
            "#,
        )
        .bind(line.ptype())
        .bind(v0)
        .bind(v1)
        .bind(v2)
        .bind(v3)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn delete(tx: &mut Transaction<'_, Postgres>, line: &RuleLine) -> Result<u64> {
        let [v0, v1, v2, v3] = line.values();
        let result = sqlx::query(
            r#"
            DELETE FROM warden_rules
            WHERE ptype = $1 AND v0 = $2 AND v1 = $3 AND v2 = $4 AND v3 = $5
            "#,
        )
        .bind(line.ptype())
        .bind(v0)
        .bind(v1)
        .bind(v2)
        .bind(v3)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl PolicyAdapter for PostgresAdapter {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn load_lines(&self) -> Result<Vec<RuleLine>> {
        let rows = sqlx::query("SELECT ptype, v0, v1, v2, v3 FROM warden_rules ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<RuleLine> {
                let ptype: String = row.try_get("ptype")?;
                let values: [String; 4] = [
                    row.try_get("v0")?,
                    row.try_get("v1")?,
                    row.try_get("v2")?,
                    row.try_get("v3")?,
                ];
                let values: Vec<&str> = values.iter().map(String::as_str).collect();
                RuleLine::from_columns(&ptype, &values)
            })
            .collect()
    }

    async fn append_line(&self, line: &RuleLine) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::insert(&mut tx, line).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn remove_line(&self, line: &RuleLine) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let removed = Self::delete(&mut tx, line).await?;
        tx.commit().await?;
        debug!(rule = %line, removed, "Rule row removed");
        Ok(())
    }

    async fn replace_lines(&self, remove: &[RuleLine], add: &[RuleLine]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for line in remove {
            Self::delete(&mut tx, line).await?;
        }
        for line in add {
            Self::insert(&mut tx, line).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
