use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;

use super::{corrupt, encode, query_failed};
use crate::application::ports::{InvoiceRepository, RepositoryError};
use crate::domain::{
    CatalogEntityId, ComputedTotals, ExtractedInvoice, InvoiceHeader, JobId, LineFlag, LineItem,
    StatedTotals, UserId,
};

pub struct PgInvoiceRepository {
    pool: PgPool,
}

impl PgInvoiceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Dates the model could not render as ISO-8601 are stored as NULL.
fn parse_invoice_date(raw: Option<&str>) -> Option<NaiveDate> {
    raw.and_then(|value| NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok())
}

fn map_line(row: &PgRow) -> Result<LineItem, RepositoryError> {
    let position: i32 = row.try_get("position").map_err(corrupt)?;
    let flags: serde_json::Value = row.try_get("flags").map_err(corrupt)?;
    Ok(LineItem {
        position: u32::try_from(position).map_err(corrupt)?,
        description: row.try_get("description").map_err(corrupt)?,
        quantity: row.try_get("quantity").map_err(corrupt)?,
        unit_price: row.try_get("unit_price").map_err(corrupt)?,
        line_total: row.try_get("line_total").map_err(corrupt)?,
        product_id: row
            .try_get::<Option<uuid::Uuid>, _>("product_id")
            .map_err(corrupt)?
            .map(CatalogEntityId::from_uuid),
        create_product: false,
        confidence: row.try_get("confidence").map_err(corrupt)?,
        matched_by_embedding: row.try_get("matched_by_embedding").map_err(corrupt)?,
        flags: serde_json::from_value::<Vec<LineFlag>>(flags).map_err(corrupt)?,
    })
}

fn map_invoice(row: &PgRow, line_items: Vec<LineItem>) -> Result<ExtractedInvoice, RepositoryError> {
    let invoice_date: Option<NaiveDate> = row.try_get("invoice_date").map_err(corrupt)?;
    let flagged: serde_json::Value = row.try_get("flagged_items").map_err(corrupt)?;
    let optional_entity = |column: &str| -> Result<Option<CatalogEntityId>, RepositoryError> {
        Ok(row
            .try_get::<Option<uuid::Uuid>, _>(column)
            .map_err(corrupt)?
            .map(CatalogEntityId::from_uuid))
    };

    Ok(ExtractedInvoice {
        id: row.try_get("id").map_err(corrupt)?,
        job_id: JobId::from_uuid(row.try_get("job_id").map_err(corrupt)?),
        user_id: UserId::from_uuid(row.try_get("user_id").map_err(corrupt)?),
        header: InvoiceHeader {
            vendor_name: row.try_get("vendor_name").map_err(corrupt)?,
            invoice_number: row.try_get("invoice_number").map_err(corrupt)?,
            invoice_date: invoice_date.map(|d| d.format("%Y-%m-%d").to_string()),
            salesperson: row.try_get("salesperson_name").map_err(corrupt)?,
            currency: row.try_get("currency").map_err(corrupt)?,
        },
        vendor_id: optional_entity("vendor_id")?,
        salesperson_id: optional_entity("salesperson_id")?,
        stated_totals: StatedTotals {
            subtotal: row.try_get::<Option<Decimal>, _>("subtotal").map_err(corrupt)?,
            tax: row.try_get::<Option<Decimal>, _>("tax").map_err(corrupt)?,
            total: row.try_get("total").map_err(corrupt)?,
        },
        computed_totals: ComputedTotals {
            subtotal: row.try_get("computed_subtotal").map_err(corrupt)?,
            tax: row.try_get("computed_tax").map_err(corrupt)?,
            total: row.try_get("computed_total").map_err(corrupt)?,
        },
        line_items,
        flagged_items: serde_json::from_value::<Vec<LineItem>>(flagged).map_err(corrupt)?,
        created_at: row.try_get("created_at").map_err(corrupt)?,
    })
}

#[async_trait]
impl InvoiceRepository for PgInvoiceRepository {
    #[instrument(skip(self), fields(job_id = %job_id))]
    async fn find_by_job(&self, job_id: JobId) -> Result<Option<ExtractedInvoice>, RepositoryError> {
        let Some(row) = sqlx::query(
            r#"
            SELECT id, user_id, job_id, vendor_name, vendor_id, salesperson_name, salesperson_id,
                   invoice_number, invoice_date, currency, subtotal, tax, total,
                   computed_subtotal, computed_tax, computed_total, flagged_items, created_at
            FROM invoices
            WHERE job_id = $1
            "#,
        )
        .bind(job_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(query_failed)?
        else {
            return Ok(None);
        };

        let invoice_id: uuid::Uuid = row.try_get("id").map_err(corrupt)?;
        let line_rows = sqlx::query(
            r#"
            SELECT position, description, quantity, unit_price, line_total, product_id,
                   confidence, matched_by_embedding, flags
            FROM invoice_line_items
            WHERE invoice_id = $1
            ORDER BY position
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed)?;

        let lines = line_rows.iter().map(map_line).collect::<Result<Vec<_>, _>>()?;
        map_invoice(&row, lines).map(Some)
    }

    #[instrument(
        skip(self, invoice),
        fields(invoice_id = %invoice.id, job_id = %invoice.job_id, lines = invoice.line_items.len())
    )]
    async fn insert(&self, invoice: &ExtractedInvoice) -> Result<(), RepositoryError> {
        let flagged = serde_json::to_value(&invoice.flagged_items).map_err(encode)?;
        let mut tx = self.pool.begin().await.map_err(query_failed)?;

        sqlx::query(
            r#"
            INSERT INTO invoices (
                id, user_id, job_id, vendor_name, vendor_id, salesperson_name, salesperson_id,
                invoice_number, invoice_date, currency, subtotal, tax, total,
                computed_subtotal, computed_tax, computed_total, flagged_items, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(invoice.id)
        .bind(invoice.user_id.as_uuid())
        .bind(invoice.job_id.as_uuid())
        .bind(&invoice.header.vendor_name)
        .bind(invoice.vendor_id.map(|id| id.as_uuid()))
        .bind(&invoice.header.salesperson)
        .bind(invoice.salesperson_id.map(|id| id.as_uuid()))
        .bind(&invoice.header.invoice_number)
        .bind(parse_invoice_date(invoice.header.invoice_date.as_deref()))
        .bind(&invoice.header.currency)
        .bind(invoice.stated_totals.subtotal)
        .bind(invoice.stated_totals.tax)
        .bind(invoice.stated_totals.total)
        .bind(invoice.computed_totals.subtotal)
        .bind(invoice.computed_totals.tax)
        .bind(invoice.computed_totals.total)
        .bind(flagged)
        .bind(invoice.created_at)
        .execute(&mut *tx)
        .await
        .map_err(query_failed)?;

        for line in &invoice.line_items {
            let flags = serde_json::to_value(&line.flags).map_err(encode)?;
            sqlx::query(
                r#"
                INSERT INTO invoice_line_items (
                    id, user_id, invoice_id, position, description, quantity, unit_price,
                    line_total, product_id, confidence, matched_by_embedding, flags
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                "#,
            )
            .bind(uuid::Uuid::new_v4())
            .bind(invoice.user_id.as_uuid())
            .bind(invoice.id)
            .bind(i32::try_from(line.position).map_err(encode_position)?)
            .bind(&line.description)
            .bind(line.quantity)
            .bind(line.unit_price)
            .bind(line.line_total)
            .bind(line.product_id.map(|id| id.as_uuid()))
            .bind(line.confidence)
            .bind(line.matched_by_embedding)
            .bind(flags)
            .execute(&mut *tx)
            .await
            .map_err(query_failed)?;
        }

        tx.commit().await.map_err(query_failed)?;
        Ok(())
    }
}

fn encode_position(e: std::num::TryFromIntError) -> RepositoryError {
    RepositoryError::QueryFailed(format!("line position out of range: {}", e))
}
