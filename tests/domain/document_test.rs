use invoice_copilot::domain::{ContentType, DocumentRef};

#[test]
fn given_mime_with_parameters_when_classifying_then_content_type_is_detected() {
    let document = DocumentRef::new("x", "image/jpeg; charset=binary");

    assert_eq!(document.content_type(), Some(ContentType::Jpeg));
    assert!(ContentType::Jpeg.is_image());
    assert_eq!(ContentType::from_mime("application/zip"), None);
}
