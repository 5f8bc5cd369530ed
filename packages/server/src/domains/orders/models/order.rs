use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

/// A placed order, as read from the order desk database.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Order {
    pub id: i64,
    pub folio: String,
    pub customer_id: i64,
    pub notes: Option<String>,
    pub total: f64,
    pub created_at: DateTime<Utc>,
    #[sqlx(skip)]
    #[serde(default)]
    pub lines: Vec<OrderLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrderLine {
    pub quantity: i32,
    pub description: String,
    pub unit_price: f64,
}

impl OrderLine {
    pub fn subtotal(&self) -> f64 {
        self.unit_price * f64::from(self.quantity)
    }
}

impl Order {
    /// Find an order with its lines. Returns `None` when the id is unknown.
    pub async fn find_by_id(id: i64, pool: &PgPool) -> Result<Option<Self>> {
        let order = sqlx::query_as::<_, Self>(
            r#"
            SELECT id, folio, customer_id, notes, total, created_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        let Some(mut order) = order else {
            return Ok(None);
        };

        order.lines = sqlx::query_as::<_, OrderLine>(
            r#"
            SELECT quantity, description, unit_price
            FROM order_items
            WHERE order_id = $1
            ORDER BY id
            "#,
        )
        .bind(id)
        .fetch_all(pool)
        .await?;

        Ok(Some(order))
    }
}
