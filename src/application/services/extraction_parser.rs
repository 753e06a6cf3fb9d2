use std::sync::LazyLock;

use regex::Regex;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::domain::{CandidateLineItem, ExtractionDraft, InvoiceHeader, StatedTotals};

pub const EXTRACTION_INSTRUCTIONS: &str = r#"You read invoices. Extract the invoice in the attached document and reply with a single JSON object, no prose, using exactly these fields:
{
  "vendor_name": string,
  "invoice_number": string or null,
  "invoice_date": string (YYYY-MM-DD) or null,
  "salesperson": string or null,
  "currency": ISO 4217 code or null,
  "line_items": [
    {"description": string, "quantity": number, "unit_price": number, "amount": number or null, "confidence": number between 0 and 1}
  ],
  "subtotal": number or null,
  "tax": number or null,
  "total": number
}
"confidence" is how sure you are that the line was read correctly. Copy numbers exactly as printed; do not compute missing values."#;

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)\s*```").expect("Invalid fenced block pattern")
});

#[derive(Debug, Deserialize)]
struct RawExtraction {
    #[serde(default)]
    vendor_name: Option<String>,
    #[serde(default)]
    invoice_number: Option<String>,
    #[serde(default)]
    invoice_date: Option<String>,
    #[serde(default)]
    salesperson: Option<String>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    line_items: Vec<RawLineItem>,
    #[serde(default)]
    subtotal: Option<Decimal>,
    #[serde(default)]
    tax: Option<Decimal>,
    #[serde(default)]
    total: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct RawLineItem {
    #[serde(default)]
    description: String,
    #[serde(default)]
    quantity: Option<Decimal>,
    #[serde(default)]
    unit_price: Option<Decimal>,
    #[serde(default)]
    amount: Option<Decimal>,
    #[serde(default)]
    confidence: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExtractionParseError {
    #[error("model output is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("model output has no line items")]
    NoLineItems,
    #[error("model output has no invoice total")]
    MissingTotal,
    #[error("line {0} has neither a unit price nor an amount")]
    IncompleteLine(usize),
    #[error("line {0} amount exceeds the supported range")]
    AmountOutOfRange(usize),
}

/// Turns raw model output into a draft. Tolerates code fences and prose
/// around the JSON object; rejects drafts the later stages cannot use.
pub fn parse_extraction(raw: &str) -> Result<ExtractionDraft, ExtractionParseError> {
    let json = extract_json_object(raw);
    let parsed: RawExtraction =
        serde_json::from_str(json).map_err(|e| ExtractionParseError::InvalidJson(e.to_string()))?;

    let total = parsed.total.ok_or(ExtractionParseError::MissingTotal)?;

    let mut line_items = Vec::with_capacity(parsed.line_items.len());
    for (index, raw_line) in parsed.line_items.into_iter().enumerate() {
        let description = raw_line.description.trim().to_string();
        if description.is_empty() {
            continue;
        }
        let position = index + 1;
        let quantity = raw_line.quantity.unwrap_or(Decimal::ONE);
        let unit_price = match (raw_line.unit_price, raw_line.amount) {
            (Some(price), _) => price,
            (None, Some(amount)) if !quantity.is_zero() => amount
                .checked_div(quantity)
                .ok_or(ExtractionParseError::AmountOutOfRange(position))?
                .round_dp(4),
            _ => return Err(ExtractionParseError::IncompleteLine(position)),
        };
        let item = CandidateLineItem {
            description,
            quantity,
            unit_price,
            amount: raw_line.amount,
            model_confidence: raw_line.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
        };
        if item.line_total().is_none() {
            return Err(ExtractionParseError::AmountOutOfRange(position));
        }
        line_items.push(item);
    }
    if line_items.is_empty() {
        return Err(ExtractionParseError::NoLineItems);
    }

    Ok(ExtractionDraft {
        header: InvoiceHeader {
            vendor_name: non_empty(parsed.vendor_name).unwrap_or_default(),
            invoice_number: non_empty(parsed.invoice_number),
            invoice_date: non_empty(parsed.invoice_date),
            salesperson: non_empty(parsed.salesperson),
            currency: non_empty(parsed.currency),
        },
        totals: StatedTotals {
            subtotal: parsed.subtotal,
            tax: parsed.tax,
            total,
        },
        line_items,
    })
}

fn extract_json_object(raw: &str) -> &str {
    if let Some(inner) = FENCED_BLOCK.captures(raw).and_then(|c| c.get(1)) {
        return inner.as_str();
    }
    match (raw.find('{'), raw.rfind('}')) {
        (Some(start), Some(end)) if start < end => &raw[start..=end],
        _ => raw.trim(),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
