use async_trait::async_trait;

use super::RepositoryError;
use crate::domain::{ExtractedInvoice, JobId};

#[async_trait]
pub trait InvoiceRepository: Send + Sync {
    async fn find_by_job(&self, job_id: JobId) -> Result<Option<ExtractedInvoice>, RepositoryError>;

    /// Writes the invoice and all committed line items in one transaction.
    /// At most one invoice exists per job.
    async fn insert(&self, invoice: &ExtractedInvoice) -> Result<(), RepositoryError>;
}
