//! PostgreSQL storage adapter

use super::{HistoryStore, ItemStore};
use crate::domain::{NotifyRule, OwnerPrefs, PlanTier, TrackedItem};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::info;

/// PostgreSQL-backed ItemStore + HistoryStore
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    default_region: i32,
}

impl PostgresStore {
    /// Create a new PostgreSQL store
    pub async fn new(database_url: &str, max_connections: u32, default_region: i32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self {
            pool,
            default_region,
        })
    }

    /// Create a store from an existing connection pool
    pub fn from_pool(pool: PgPool, default_region: i32) -> Self {
        Self {
            pool,
            default_region,
        }
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_item(row: &sqlx::postgres::PgRow) -> TrackedItem {
        TrackedItem {
            id: row.get("id"),
            owner_id: row.get("owner_id"),
            external_id: row.get("external_id"),
            name: row.get("name"),
            variant: row.get("variant"),
            last_basic_price: row.get("last_basic_price"),
            last_sale_price: row.get("last_sale_price"),
            last_qty: row.get("last_qty"),
            out_of_stock: row.get("out_of_stock"),
            rule: NotifyRule::from_parts(
                row.get::<String, _>("notify_mode").as_str(),
                row.get("notify_value"),
            ),
            updated_at: row.get("updated_at"),
        }
    }
}

#[async_trait]
impl ItemStore for PostgresStore {
    async fn all_tracked(&self) -> Result<Vec<TrackedItem>> {
        let rows = sqlx::query(
            r#"
            SELECT id, owner_id, external_id, name, variant,
                   last_basic_price, last_sale_price, last_qty, out_of_stock,
                   notify_mode, notify_value, updated_at
            FROM tracked_items
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::row_to_item).collect())
    }

    async fn update_price_and_stock(
        &self,
        id: i64,
        basic: i64,
        sale: i64,
        qty: i64,
        out_of_stock: bool,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE tracked_items
            SET last_basic_price = $2,
                last_sale_price = $3,
                last_qty = $4,
                out_of_stock = $5,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(basic)
        .bind(sale)
        .bind(qty)
        .bind(out_of_stock)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_name(&self, id: i64, name: &str) -> Result<()> {
        sqlx::query("UPDATE tracked_items SET name = $2 WHERE id = $1")
            .bind(id)
            .bind(name)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn owner_prefs(&self, owner_id: i64) -> Result<OwnerPrefs> {
        let row = sqlx::query("SELECT region, tier FROM owners WHERE id = $1")
            .bind(owner_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(match row {
            Some(row) => OwnerPrefs {
                region: row
                    .get::<Option<i32>, _>("region")
                    .unwrap_or(self.default_region),
                tier: row
                    .get::<String, _>("tier")
                    .parse()
                    .unwrap_or(PlanTier::Free),
            },
            None => OwnerPrefs {
                region: self.default_region,
                tier: PlanTier::Free,
            },
        })
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn oldest_update(&self) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query("SELECT MIN(updated_at) AS oldest FROM tracked_items")
            .fetch_one(&self.pool)
            .await?;

        Ok(row.get("oldest"))
    }
}

#[async_trait]
impl HistoryStore for PostgresStore {
    async fn append(&self, item_id: i64, basic: i64, sale: i64, qty: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO price_history (item_id, basic, sale, qty, captured_at)
            VALUES ($1, $2, $3, $4, NOW())
            "#,
        )
        .bind(item_id)
        .bind(basic)
        .bind(sale)
        .bind(qty)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
