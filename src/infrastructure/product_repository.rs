//! Repository for normalized products
//!
//! Write side of the normalization stage. Re-normalizing a record
//! overwrites its product row in place; `created_at` survives the
//! overwrite so the first-normalized time is not lost.

use crate::domain::product::Product;
use anyhow::Result;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use std::sync::Arc;

#[derive(Clone)]
pub struct ProductRepository {
    pool: Arc<SqlitePool>,
}

impl ProductRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn upsert(&self, product: &Product) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO products
            (id, name, brand, description, price_amount, price_currency, image_url,
             image_local_path, category, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                brand = excluded.brand,
                description = excluded.description,
                price_amount = excluded.price_amount,
                price_currency = excluded.price_currency,
                image_url = excluded.image_url,
                image_local_path = excluded.image_local_path,
                category = excluded.category,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(product.id)
        .bind(&product.name)
        .bind(&product.brand)
        .bind(&product.description)
        .bind(product.price_amount)
        .bind(&product.price_currency)
        .bind(&product.image_url)
        .bind(&product.image_local_path)
        .bind(&product.category)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: i64) -> Result<Option<Product>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, brand, description, price_amount, price_currency, image_url,
                   image_local_path, category, created_at, updated_at
            FROM products WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(row.as_ref().map(map_product))
    }

    pub async fn count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM products")
            .fetch_one(&*self.pool)
            .await?;
        Ok(row.get("count"))
    }
}

fn map_product(row: &SqliteRow) -> Product {
    Product {
        id: row.get("id"),
        name: row.get("name"),
        brand: row.get("brand"),
        description: row.get("description"),
        price_amount: row.get("price_amount"),
        price_currency: row.get("price_currency"),
        image_url: row.get("image_url"),
        image_local_path: row.get("image_local_path"),
        category: row.get("category"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::DatabaseConnection;
    use chrono::{DateTime, Utc};

    async fn setup() -> ProductRepository {
        let db = DatabaseConnection::new_in_memory().await.unwrap();
        db.migrate().await.unwrap();
        ProductRepository::new(db.pool().clone())
    }

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn sample(id: i64, name: &str) -> Product {
        Product {
            id,
            name: name.to_string(),
            brand: Some("Acme".to_string()),
            description: None,
            price_amount: 19.99,
            price_currency: "EUR".to_string(),
            image_url: Some("https://cdn.example.com/abc.jpg".to_string()),
            image_local_path: None,
            category: Some("Lighting".to_string()),
            created_at: ts("2024-03-01T12:00:00Z"),
            updated_at: ts("2024-03-01T12:00:00Z"),
        }
    }

    #[tokio::test]
    async fn upsert_roundtrip() {
        let repo = setup().await;
        repo.upsert(&sample(1, "Desk Lamp")).await.unwrap();

        let loaded = repo.get(1).await.unwrap().unwrap();
        assert_eq!(loaded.name, "Desk Lamp");
        assert_eq!(loaded.price_amount, 19.99);
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn renormalization_overwrites_but_keeps_created_at() {
        let repo = setup().await;
        repo.upsert(&sample(1, "Desk Lamp")).await.unwrap();

        let mut updated = sample(1, "Desk Lamp v2");
        updated.created_at = ts("2024-04-01T12:00:00Z");
        updated.updated_at = ts("2024-04-01T12:00:00Z");
        repo.upsert(&updated).await.unwrap();

        let loaded = repo.get(1).await.unwrap().unwrap();
        assert_eq!(loaded.name, "Desk Lamp v2");
        assert_eq!(loaded.created_at, ts("2024-03-01T12:00:00Z"));
        assert_eq!(loaded.updated_at, ts("2024-04-01T12:00:00Z"));
        assert_eq!(repo.count().await.unwrap(), 1);
    }
}
