use invoice_copilot::infrastructure::observability::sanitize_prompt;

#[test]
fn given_multibyte_text_when_truncating_then_char_boundary_is_respected() {
    let prompt = "é".repeat(150);

    let sanitized = sanitize_prompt(&prompt);

    assert!(sanitized.starts_with(&"é".repeat(100)));
    assert!(sanitized.ends_with("(150 chars total)"));
}

#[test]
fn given_repeated_secrets_when_sanitizing_then_every_value_is_masked() {
    let sanitized = sanitize_prompt("token=abc and token=def");

    assert_eq!(sanitized, "token=[REDACTED] and token=[REDACTED]");
}
