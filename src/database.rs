use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::{migrate::MigrateDatabase, sqlite::SqlitePool, Row, Sqlite};
use std::path::Path;
use std::time::Duration;

use crate::cache::{CacheStore, Storage};

#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let database_url = format!("sqlite:{}", database_path.as_ref().display());

        // Create database if it doesn't exist
        if !Sqlite::database_exists(&database_url).await.unwrap_or(false) {
            Sqlite::create_database(&database_url)
                .await
                .context("Failed to create database")?;
        }

        let pool = SqlitePool::connect(&database_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create cache_entries table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_cache_entries_expires_at ON cache_entries (expires_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Drop every entry whose TTL has elapsed, returning how many went away
    pub async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE expires_at <= ?")
            .bind(timestamp(Utc::now()))
            .execute(&self.pool)
            .await
            .context("Failed to purge expired cache entries")?;

        Ok(result.rows_affected())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

// Fixed-width so expiry comparisons can run as plain text comparisons in SQL
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[async_trait]
impl Storage for Database {
    fn driver(&self) -> &str {
        "sqlite"
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("Database connection failed")?;
        Ok(())
    }
}

#[async_trait]
impl CacheStore for Database {
    fn driver(&self) -> &str {
        "database"
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let row = sqlx::query("SELECT value, expires_at FROM cache_entries WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch cache entry")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let expires_at = DateTime::parse_from_rfc3339(&row.get::<String, _>("expires_at"))?
            .with_timezone(&Utc);
        if expires_at <= Utc::now() {
            self.forget(key).await?;
            return Ok(None);
        }

        let value: Value = serde_json::from_str(&row.get::<String, _>("value"))
            .context("Failed to decode cache entry")?;
        Ok(Some(value))
    }

    async fn put(&self, key: &str, value: Value, ttl: Duration) -> Result<()> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).context("Cache TTL out of range")?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO cache_entries (key, value, expires_at, updated_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(key)
        .bind(serde_json::to_string(&value)?)
        .bind(timestamp(now + ttl))
        .bind(timestamp(now))
        .execute(&self.pool)
        .await
        .context("Failed to write cache entry")?;

        Ok(())
    }

    async fn forget(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM cache_entries WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .context("Failed to delete cache entry")?;
        Ok(())
    }
}
