use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;
use uuid::Uuid;

use crate::domain::entities::invoices::InvoiceEntity;

#[automock]
#[async_trait]
pub trait InvoiceRepository {
    /// Newest first.
    async fn list_by_account_id(&self, account_id: Uuid) -> Result<Vec<InvoiceEntity>>;
}
