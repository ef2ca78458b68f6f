use anyhow::Result;
use async_trait::async_trait;
use diesel::{RunQueryDsl, prelude::*};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    domain,
    infra::db::postgres::{postgres_connection::PgPoolSquad, schema::invoices},
};
use domain::{entities::invoices::InvoiceEntity, repositories::invoices::InvoiceRepository};

pub struct InvoicePostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl InvoicePostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl InvoiceRepository for InvoicePostgres {
    async fn list_by_account_id(&self, account_id: Uuid) -> Result<Vec<InvoiceEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let results = invoices::table
            .filter(invoices::account_id.eq(account_id))
            .order(invoices::created_at.desc())
            .select(InvoiceEntity::as_select())
            .load::<InvoiceEntity>(&mut conn)?;

        Ok(results)
    }
}
