use std::sync::Arc;

use rust_decimal::Decimal;
use uuid::Uuid;

use super::catalog_service::{CatalogError, CatalogService};
use crate::application::ports::{CatalogRepository, InvoiceRepository, JobRepository, RepositoryError};
use crate::domain::{
    CatalogEntity, CatalogEntityId, EntityKind, ExtractedInvoice, JobId, JobStatus, LineFlag,
    TotalsError, reconcile_totals,
};

/// The only writes the extraction pipeline may perform.
#[derive(Debug, Clone)]
pub enum CommitCommand {
    CreateCatalogEntity { kind: EntityKind, name: String },
    InsertValidatedInvoice(Box<ExtractedInvoice>),
}

#[derive(Debug, Clone)]
pub enum CommitReceipt {
    Entity { entity: CatalogEntity, created: bool },
    Invoice { invoice_id: Uuid, already_committed: bool },
}

#[derive(Debug, Clone, Copy)]
pub struct CommitRules {
    pub min_line_confidence: f32,
    pub totals_tolerance: Decimal,
}

/// Validating write gateway. Re-checks every invariant on the payload it
/// receives regardless of what the caller claims to have verified.
pub struct InvoiceCommitTool {
    jobs: Arc<dyn JobRepository>,
    catalog: Arc<CatalogService>,
    catalog_repository: Arc<dyn CatalogRepository>,
    invoices: Arc<dyn InvoiceRepository>,
    rules: CommitRules,
}

impl InvoiceCommitTool {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        catalog: Arc<CatalogService>,
        catalog_repository: Arc<dyn CatalogRepository>,
        invoices: Arc<dyn InvoiceRepository>,
        rules: CommitRules,
    ) -> Self {
        Self {
            jobs,
            catalog,
            catalog_repository,
            invoices,
            rules,
        }
    }

    pub async fn execute(&self, command: CommitCommand) -> Result<CommitReceipt, CommitError> {
        match command {
            CommitCommand::CreateCatalogEntity { kind, name } => {
                let (entity, created) = self.catalog.create_or_get(kind, &name).await?;
                Ok(CommitReceipt::Entity { entity, created })
            }
            CommitCommand::InsertValidatedInvoice(invoice) => self.insert_invoice(*invoice).await,
        }
    }

    async fn insert_invoice(&self, invoice: ExtractedInvoice) -> Result<CommitReceipt, CommitError> {
        if let Some(existing) = self.invoices.find_by_job(invoice.job_id).await? {
            tracing::info!(job_id = %invoice.job_id, invoice_id = %existing.id, "Invoice already committed for job");
            return Ok(CommitReceipt::Invoice {
                invoice_id: existing.id,
                already_committed: true,
            });
        }

        let job = self
            .jobs
            .get_by_id(invoice.job_id)
            .await?
            .ok_or(CommitRejected::UnknownJob(invoice.job_id))?;
        if job.user_id != invoice.user_id {
            return Err(CommitRejected::OwnershipMismatch(invoice.job_id).into());
        }
        if job.status != JobStatus::Running {
            return Err(CommitRejected::JobNotRunning {
                job_id: job.id,
                status: job.status,
            }
            .into());
        }

        self.check_lines(&invoice)?;
        if let Some(vendor_id) = invoice.vendor_id {
            self.check_entity(vendor_id, EntityKind::Company).await?;
        }
        if let Some(salesperson_id) = invoice.salesperson_id {
            self.check_entity(salesperson_id, EntityKind::Salesperson).await?;
        }
        for line in &invoice.line_items {
            if let Some(product_id) = line.product_id {
                self.check_entity(product_id, EntityKind::Product).await?;
            }
        }

        let computed = reconcile_totals(
            &invoice.line_items,
            &invoice.stated_totals,
            self.rules.totals_tolerance,
        )
        .map_err(CommitRejected::Totals)?;
        if computed != invoice.computed_totals {
            return Err(CommitRejected::ComputedTotalsDiffer.into());
        }

        self.invoices.insert(&invoice).await?;
        tracing::info!(
            job_id = %invoice.job_id,
            invoice_id = %invoice.id,
            lines = invoice.line_items.len(),
            flagged = invoice.flagged_items.len(),
            "Invoice committed"
        );
        Ok(CommitReceipt::Invoice {
            invoice_id: invoice.id,
            already_committed: false,
        })
    }

    fn check_lines(&self, invoice: &ExtractedInvoice) -> Result<(), CommitRejected> {
        if invoice.line_items.is_empty() {
            return Err(CommitRejected::NoLineItems);
        }
        for line in &invoice.line_items {
            let flagged_low = line
                .flags
                .iter()
                .any(|f| matches!(f, LineFlag::LowConfidence { .. }));
            if flagged_low || line.confidence < self.rules.min_line_confidence {
                return Err(CommitRejected::LowConfidence {
                    position: line.position,
                    confidence: line.confidence,
                    minimum: self.rules.min_line_confidence,
                });
            }
            let awaiting_review = line
                .flags
                .iter()
                .any(|f| matches!(f, LineFlag::NeedsReview { .. }));
            if line.create_product || (line.product_id.is_none() && !awaiting_review) {
                return Err(CommitRejected::UnresolvedProduct {
                    position: line.position,
                });
            }
        }
        Ok(())
    }

    async fn check_entity(&self, id: CatalogEntityId, expected: EntityKind) -> Result<(), CommitError> {
        let entity = self
            .catalog_repository
            .get(id)
            .await?
            .ok_or(CommitRejected::UnknownEntity(id))?;
        if entity.kind != expected {
            return Err(CommitRejected::EntityKindMismatch {
                id,
                expected,
                actual: entity.kind,
            }
            .into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommitRejected {
    #[error("job {0} does not exist")]
    UnknownJob(JobId),
    #[error("invoice owner does not match job {0}")]
    OwnershipMismatch(JobId),
    #[error("job {job_id} is {status}, not running")]
    JobNotRunning { job_id: JobId, status: JobStatus },
    #[error("invoice has no committable line items")]
    NoLineItems,
    #[error("line {position} confidence {confidence:.2} is below minimum {minimum:.2}")]
    LowConfidence {
        position: u32,
        confidence: f32,
        minimum: f32,
    },
    #[error("line {position} has no catalog product and is not marked for review")]
    UnresolvedProduct { position: u32 },
    #[error("catalog entity {0} does not exist")]
    UnknownEntity(CatalogEntityId),
    #[error("catalog entity {id} is a {actual}, expected {expected}")]
    EntityKindMismatch {
        id: CatalogEntityId,
        expected: EntityKind,
        actual: EntityKind,
    },
    #[error("totals: {0}")]
    Totals(TotalsError),
    #[error("submitted computed totals do not match the line items")]
    ComputedTotalsDiffer,
}

#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    #[error("commit rejected: {0}")]
    Rejected(#[from] CommitRejected),
    #[error("repository: {0}")]
    Repository(#[from] RepositoryError),
    #[error("catalog: {0}")]
    Catalog(#[from] CatalogError),
}
