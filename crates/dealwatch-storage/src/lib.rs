//! Snapshot store contract + sqlite implementation for dealwatch.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dealwatch_core::ProductSnapshot;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tracing::info;

pub const CRATE_NAME: &str = "dealwatch-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store query failed: {0}")]
    Query(#[from] sqlx::Error),
}

/// Storage seam for the ingestion pipeline and the query layer.
///
/// One row per (product_id, generation); uniqueness is a schema constraint,
/// and `upsert_snapshot` only overwrites an existing row when the incoming
/// price is strictly lower.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Highest generation written so far, `None` on an empty store.
    async fn latest_generation(&self) -> Result<Option<i64>, StoreError>;

    /// The row for (product_id, generation), if one exists.
    async fn current_snapshot(
        &self,
        product_id: i64,
        generation: i64,
    ) -> Result<Option<ProductSnapshot>, StoreError>;

    /// The product's most recent appearance strictly before `before_generation`.
    async fn prior_snapshot(
        &self,
        product_id: i64,
        before_generation: i64,
    ) -> Result<Option<ProductSnapshot>, StoreError>;

    /// Insert, or overwrite in place when a lower price arrives for an
    /// already-written (product_id, generation) row.
    async fn upsert_snapshot(&self, snapshot: &ProductSnapshot) -> Result<(), StoreError>;

    /// Remove every row of one generation; returns the row count.
    async fn delete_generation(&self, generation: i64) -> Result<u64, StoreError>;

    /// All rows of the latest generation, newest write first.
    async fn latest_snapshots(&self) -> Result<Vec<ProductSnapshot>, StoreError>;

    /// Distinct generations currently retained, ascending.
    async fn retained_generations(&self) -> Result<Vec<i64>, StoreError>;
}

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect to a sqlite database URL, creating the file if missing.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Ok(Self { pool })
    }

    /// Private in-memory database on a single connection.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Idempotent schema setup.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS product_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                product_id INTEGER NOT NULL,
                product_name TEXT NOT NULL DEFAULT '',
                product_price INTEGER NOT NULL DEFAULT 0,
                category_name TEXT NOT NULL DEFAULT '',
                is_rocket INTEGER NOT NULL DEFAULT 0,
                is_free_shipping INTEGER NOT NULL DEFAULT 0,
                product_image TEXT NOT NULL DEFAULT '',
                product_url TEXT NOT NULL DEFAULT '',
                price_gap REAL NOT NULL DEFAULT 0,
                generation INTEGER NOT NULL,
                inserted_at TEXT NOT NULL,
                UNIQUE (product_id, generation)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_snapshots_generation ON product_snapshots (generation)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_snapshots_product_id ON product_snapshots (product_id)",
        )
        .execute(&self.pool)
        .await?;

        info!("product_snapshots schema ready");
        Ok(())
    }
}

fn snapshot_from_row(row: &SqliteRow) -> Result<ProductSnapshot, sqlx::Error> {
    let inserted_at: DateTime<Utc> = row.try_get("inserted_at")?;
    Ok(ProductSnapshot {
        product_id: row.try_get("product_id")?,
        product_name: row.try_get("product_name")?,
        product_price: row.try_get("product_price")?,
        category_name: row.try_get("category_name")?,
        is_rocket: row.try_get("is_rocket")?,
        is_free_shipping: row.try_get("is_free_shipping")?,
        product_image: row.try_get("product_image")?,
        product_url: row.try_get("product_url")?,
        price_gap: row.try_get("price_gap")?,
        generation: row.try_get("generation")?,
        inserted_at,
    })
}

const SNAPSHOT_COLUMNS: &str = "product_id, product_name, product_price, category_name, \
     is_rocket, is_free_shipping, product_image, product_url, \
     price_gap, generation, inserted_at";

#[async_trait]
impl SnapshotStore for SqliteStore {
    async fn latest_generation(&self) -> Result<Option<i64>, StoreError> {
        let row = sqlx::query("SELECT MAX(generation) AS max_generation FROM product_snapshots")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("max_generation")?)
    }

    async fn current_snapshot(
        &self,
        product_id: i64,
        generation: i64,
    ) -> Result<Option<ProductSnapshot>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM product_snapshots \
             WHERE product_id = ?1 AND generation = ?2"
        ))
        .bind(product_id)
        .bind(generation)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(snapshot_from_row).transpose().map_err(Into::into)
    }

    async fn prior_snapshot(
        &self,
        product_id: i64,
        before_generation: i64,
    ) -> Result<Option<ProductSnapshot>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM product_snapshots \
             WHERE product_id = ?1 AND generation < ?2 \
             ORDER BY generation DESC LIMIT 1"
        ))
        .bind(product_id)
        .bind(before_generation)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(snapshot_from_row).transpose().map_err(Into::into)
    }

    async fn upsert_snapshot(&self, snapshot: &ProductSnapshot) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO product_snapshots (
                product_id, product_name, product_price, category_name,
                is_rocket, is_free_shipping, product_image, product_url,
                price_gap, generation, inserted_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT (product_id, generation) DO UPDATE SET
                product_name = excluded.product_name,
                product_price = excluded.product_price,
                category_name = excluded.category_name,
                is_rocket = excluded.is_rocket,
                is_free_shipping = excluded.is_free_shipping,
                product_image = excluded.product_image,
                product_url = excluded.product_url,
                price_gap = excluded.price_gap,
                inserted_at = excluded.inserted_at
            WHERE excluded.product_price < product_snapshots.product_price
            "#,
        )
        .bind(snapshot.product_id)
        .bind(&snapshot.product_name)
        .bind(snapshot.product_price)
        .bind(&snapshot.category_name)
        .bind(snapshot.is_rocket)
        .bind(snapshot.is_free_shipping)
        .bind(&snapshot.product_image)
        .bind(&snapshot.product_url)
        .bind(snapshot.price_gap)
        .bind(snapshot.generation)
        .bind(snapshot.inserted_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_generation(&self, generation: i64) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM product_snapshots WHERE generation = ?1")
            .bind(generation)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn latest_snapshots(&self) -> Result<Vec<ProductSnapshot>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM product_snapshots \
             WHERE generation = (SELECT MAX(generation) FROM product_snapshots) \
             ORDER BY inserted_at DESC, id DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(snapshot_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    async fn retained_generations(&self) -> Result<Vec<i64>, StoreError> {
        let rows = sqlx::query(
            "SELECT DISTINCT generation FROM product_snapshots ORDER BY generation",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| row.try_get("generation"))
            .collect::<Result<Vec<_>, _>>()
            .map_err(Into::into)
    }
}
