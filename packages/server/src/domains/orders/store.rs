//! Postgres-backed collaborators for order and staff lookups.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;

use super::models::{Customer, Order, StaffMember, StaffRole};
use crate::kernel::{BaseOrderStore, BaseStaffDirectory};

pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BaseOrderStore for PgOrderStore {
    async fn find_order(&self, order_id: i64) -> Result<Option<Order>> {
        Order::find_by_id(order_id, &self.pool).await
    }

    async fn find_customer(&self, customer_id: i64) -> Result<Option<Customer>> {
        Customer::find_by_id(customer_id, &self.pool).await
    }
}

pub struct PgStaffDirectory {
    pool: PgPool,
}

impl PgStaffDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BaseStaffDirectory for PgStaffDirectory {
    async fn active_with_roles(&self, roles: &[StaffRole]) -> Result<Vec<StaffMember>> {
        StaffMember::find_active_with_roles(roles, &self.pool).await
    }
}
