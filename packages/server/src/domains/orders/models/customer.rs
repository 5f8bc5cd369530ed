use anyhow::Result;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Customer {
    pub id: i64,
    pub name: String,
    pub phone: String,
    pub address: Option<String>,
}

impl Customer {
    pub async fn find_by_id(id: i64, pool: &PgPool) -> Result<Option<Self>> {
        let customer = sqlx::query_as::<_, Self>(
            "SELECT id, name, phone, address FROM customers WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;
        Ok(customer)
    }
}
