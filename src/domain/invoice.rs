use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{CatalogEntityId, JobId, UserId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceHeader {
    pub vendor_name: String,
    pub invoice_number: Option<String>,
    pub invoice_date: Option<String>,
    pub salesperson: Option<String>,
    pub currency: Option<String>,
}

/// Totals as printed on the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatedTotals {
    pub subtotal: Option<Decimal>,
    pub tax: Option<Decimal>,
    pub total: Decimal,
}

/// Line item as read by the extraction model, before resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateLineItem {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub amount: Option<Decimal>,
    pub model_confidence: f32,
}

impl CandidateLineItem {
    /// Printed amount, else quantity times unit price. `None` when the
    /// product does not fit the decimal range.
    pub fn line_total(&self) -> Option<Decimal> {
        match self.amount {
            Some(amount) => Some(amount),
            None => self
                .quantity
                .checked_mul(self.unit_price)
                .map(|total| total.round_dp(2)),
        }
    }
}

/// Structured output of the document analysis stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionDraft {
    pub header: InvoiceHeader,
    pub totals: StatedTotals,
    pub line_items: Vec<CandidateLineItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum LineFlag {
    LowConfidence { confidence: f32, minimum: f32 },
    NeedsReview { candidate: CatalogEntityId, score: f32 },
    NewCatalogEntry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub position: u32,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub line_total: Decimal,
    pub product_id: Option<CatalogEntityId>,
    /// Set when resolution found nothing and commit should create the product.
    pub create_product: bool,
    pub confidence: f32,
    pub matched_by_embedding: bool,
    pub flags: Vec<LineFlag>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComputedTotals {
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("computed {field} {computed} differs from stated {stated} by {difference} (tolerance {tolerance})")]
pub struct TotalsMismatch {
    pub field: &'static str,
    pub computed: Decimal,
    pub stated: Decimal,
    pub difference: Decimal,
    pub tolerance: Decimal,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TotalsError {
    #[error(transparent)]
    Mismatch(#[from] TotalsMismatch),
    #[error("{0} exceeds the supported amount range")]
    Overflow(&'static str),
}

/// Recomputes subtotal/tax/total from the given lines and compares them with
/// the document-stated values.
pub fn reconcile_totals(
    lines: &[LineItem],
    stated: &StatedTotals,
    tolerance: Decimal,
) -> Result<ComputedTotals, TotalsError> {
    let subtotal = lines
        .iter()
        .try_fold(Decimal::ZERO, |sum, line| sum.checked_add(line.line_total))
        .ok_or(TotalsError::Overflow("subtotal"))?;
    let tax = stated.tax.unwrap_or(Decimal::ZERO);
    let computed = ComputedTotals {
        subtotal,
        tax,
        total: subtotal
            .checked_add(tax)
            .ok_or(TotalsError::Overflow("total"))?,
    };

    if let Some(stated_subtotal) = stated.subtotal {
        check("subtotal", computed.subtotal, stated_subtotal, tolerance)?;
    }
    check("total", computed.total, stated.total, tolerance)?;

    Ok(computed)
}

fn check(
    field: &'static str,
    computed: Decimal,
    stated: Decimal,
    tolerance: Decimal,
) -> Result<(), TotalsError> {
    let difference = computed
        .checked_sub(stated)
        .ok_or(TotalsError::Overflow(field))?
        .abs();
    if difference > tolerance {
        return Err(TotalsError::from(TotalsMismatch {
            field,
            computed,
            stated,
            difference,
            tolerance,
        }));
    }
    Ok(())
}

/// Invoice as committed by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedInvoice {
    pub id: Uuid,
    pub job_id: JobId,
    pub user_id: UserId,
    pub header: InvoiceHeader,
    pub vendor_id: Option<CatalogEntityId>,
    pub salesperson_id: Option<CatalogEntityId>,
    pub stated_totals: StatedTotals,
    pub computed_totals: ComputedTotals,
    pub line_items: Vec<LineItem>,
    /// Lines withheld from the automatic commit, kept for manual review.
    pub flagged_items: Vec<LineItem>,
    pub created_at: DateTime<Utc>,
}
