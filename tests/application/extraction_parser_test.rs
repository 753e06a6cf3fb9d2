use std::str::FromStr;

use rust_decimal::Decimal;

use invoice_copilot::application::services::{ExtractionParseError, parse_extraction};

fn dec(value: &str) -> Decimal {
    Decimal::from_str(value).unwrap()
}

#[test]
fn given_fenced_json_when_parsing_then_draft_is_built() {
    let raw = "Here you go:\n```json\n{\"vendor_name\": \"Acme\", \"line_items\": [{\"description\": \"Widget A\", \"quantity\": 3, \"unit_price\": 10, \"confidence\": 0.95}], \"total\": 30}\n```";

    let draft = parse_extraction(raw).unwrap();

    assert_eq!(draft.header.vendor_name, "Acme");
    assert_eq!(draft.line_items.len(), 1);
    assert_eq!(draft.line_items[0].line_total(), Some(dec("30")));
    assert_eq!(draft.totals.total, dec("30"));
}

#[test]
fn given_prose_around_object_when_parsing_then_object_is_found() {
    let raw = "The invoice: {\"vendor_name\": \"Acme\", \"line_items\": [{\"description\": \"Bolt\", \"amount\": \"4.50\", \"quantity\": 2}], \"total\": \"4.50\"} end";

    let draft = parse_extraction(raw).unwrap();

    assert_eq!(draft.line_items[0].unit_price, dec("2.25"));
    assert_eq!(draft.line_items[0].model_confidence, 0.5);
}

#[test]
fn given_blank_header_fields_when_parsing_then_they_are_dropped() {
    let raw = r#"{"vendor_name": " Acme ", "invoice_number": "  ", "line_items": [{"description": " Bolt ", "unit_price": 1}], "total": 1}"#;

    let draft = parse_extraction(raw).unwrap();

    assert_eq!(draft.header.vendor_name, "Acme");
    assert_eq!(draft.header.invoice_number, None);
    assert_eq!(draft.line_items[0].description, "Bolt");
    assert_eq!(draft.line_items[0].quantity, Decimal::ONE);
}

#[test]
fn given_no_total_when_parsing_then_rejected() {
    let raw = r#"{"vendor_name": "Acme", "line_items": [{"description": "x", "unit_price": 1}]}"#;

    assert_eq!(parse_extraction(raw), Err(ExtractionParseError::MissingTotal));
}

#[test]
fn given_no_lines_when_parsing_then_rejected() {
    let raw = r#"{"vendor_name": "Acme", "line_items": [], "total": 10}"#;

    assert_eq!(parse_extraction(raw), Err(ExtractionParseError::NoLineItems));
}

#[test]
fn given_line_without_price_or_amount_when_parsing_then_line_is_incomplete() {
    let raw = r#"{"vendor_name": "Acme", "line_items": [{"description": "x", "quantity": 2}], "total": 10}"#;

    assert_eq!(parse_extraction(raw), Err(ExtractionParseError::IncompleteLine(1)));
}

#[test]
fn given_line_total_beyond_decimal_range_when_parsing_then_amount_is_out_of_range() {
    let raw = r#"{"vendor_name": "Acme", "line_items": [{"description": "x", "quantity": "100000000000000000000", "unit_price": "100000000000000000000"}], "total": 10}"#;

    assert_eq!(parse_extraction(raw), Err(ExtractionParseError::AmountOutOfRange(1)));
}

#[test]
fn given_garbage_when_parsing_then_invalid_json() {
    assert!(matches!(
        parse_extraction("I could not read this document."),
        Err(ExtractionParseError::InvalidJson(_))
    ));
}
