use axum::http::{HeaderMap, HeaderValue};

use invoice_copilot::presentation::handlers::ReplayQuery;

#[test]
fn given_query_and_header_when_resolving_then_query_wins() {
    let mut headers = HeaderMap::new();
    headers.insert("last-event-id", HeaderValue::from_static("7"));

    assert_eq!(ReplayQuery { after: Some(3) }.resolve(&headers), 3);
    assert_eq!(ReplayQuery { after: None }.resolve(&headers), 7);
    assert_eq!(ReplayQuery::default().resolve(&HeaderMap::new()), 0);
}
