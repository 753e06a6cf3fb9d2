use invoice_copilot::domain::Intent;

#[test]
fn given_label_variants_when_parsing_intent_then_closed_set_is_enforced() {
    assert_eq!(Intent::parse_label(" \"Status Check\" "), Some(Intent::StatusCheck));
    assert_eq!(Intent::parse_label("ACTION_REQUEST!"), Some(Intent::ActionRequest));
    assert_eq!(Intent::parse_label("small-talk"), None);
}
