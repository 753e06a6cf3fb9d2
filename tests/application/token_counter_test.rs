use std::borrow::Cow;

use invoice_copilot::application::services::{count_tokens, truncate_to_tokens};

#[test]
fn given_short_text_when_truncating_then_text_is_borrowed() {
    let text = "How much did I spend?";

    assert!(matches!(truncate_to_tokens(text, 50), Cow::Borrowed(t) if t == text));
}

#[test]
fn given_long_text_when_truncating_then_result_fits_budget() {
    let text = "invoice line item ".repeat(100);

    let truncated = truncate_to_tokens(&text, 10);

    assert!(count_tokens(&truncated) <= 10);
    assert!(text.starts_with(truncated.as_ref()));
    assert!(!truncated.is_empty());
}

#[test]
fn given_zero_budget_when_truncating_then_result_is_empty() {
    assert_eq!(truncate_to_tokens("anything at all", 0), "");
}
