use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use futures::StreamExt;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use invoice_copilot::application::ports::LlmClient;
use invoice_copilot::domain::{ContentType, DocumentContent};
use invoice_copilot::infrastructure::llm::create_streaming_llm_client;
use invoice_copilot::presentation::config::LlmSettings;

/// SSE frames cut mid-line, followed by a token after `[DONE]` that must
/// never reach the caller.
const SSE_FRAGMENTS: [&str; 4] = [
    "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\ndata: {\"choices\":[{\"del",
    "ta\":{\"content\":\"lo\"}}]}\n",
    "data: [DONE]\n\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n\n",
];

async fn chat_completions(Json(body): Json<Value>) -> Response {
    if body["stream"] == json!(true) {
        let frames = futures::stream::iter(
            SSE_FRAGMENTS.map(|fragment| Ok::<_, std::io::Error>(fragment.to_string())),
        );
        return ([("content-type", "text/event-stream")], Body::from_stream(frames))
            .into_response();
    }
    // Echo the user content so the request shape can be asserted.
    let echoed = body["messages"][1]["content"].to_string();
    Json(json!({ "choices": [{ "message": { "content": echoed } }] })).into_response()
}

async fn spawn_provider() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().route("/chat/completions", post(chat_completions));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn local_settings(base_url: String) -> LlmSettings {
    LlmSettings {
        provider: "lmstudio".to_string(),
        base_url: Some(base_url),
        ..Default::default()
    }
}

#[tokio::test]
async fn given_split_sse_frames_when_streaming_then_tokens_stop_at_done() {
    let client = create_streaming_llm_client(&local_settings(spawn_provider().await)).unwrap();

    let stream = client.complete_stream("hi", "be brief").await.unwrap();
    let tokens: Vec<String> = stream.map(|token| token.unwrap()).collect().await;

    assert_eq!(tokens, vec!["Hel".to_string(), "lo".to_string()]);
}

#[tokio::test]
async fn given_png_when_analyzing_then_image_is_sent_as_data_uri() {
    let client = create_streaming_llm_client(&local_settings(spawn_provider().await)).unwrap();
    let document = DocumentContent {
        content_type: ContentType::Png,
        filename: None,
        data: vec![1, 2, 3],
    };

    let echoed = client.analyze_document("read it", &document).await.unwrap();
    let parts: Value = serde_json::from_str(&echoed).unwrap();

    assert_eq!(parts[0]["type"], "text");
    assert_eq!(parts[0]["text"], "read it");
    assert_eq!(parts[1]["type"], "image_url");
    assert_eq!(parts[1]["image_url"]["url"], "data:image/png;base64,AQID");
}

#[tokio::test]
async fn given_plain_text_document_when_analyzing_then_text_is_inlined() {
    let client = create_streaming_llm_client(&local_settings(spawn_provider().await)).unwrap();
    let document = DocumentContent {
        content_type: ContentType::Text,
        filename: Some("invoice.txt".to_string()),
        data: b"Total: 30".to_vec(),
    };

    let echoed = client.analyze_document("read it", &document).await.unwrap();
    let parts: Value = serde_json::from_str(&echoed).unwrap();

    assert_eq!(parts[1]["type"], "text");
    assert_eq!(parts[1]["text"], "Document:\nTotal: 30");
}

#[test]
fn given_lmstudio_without_base_url_when_creating_client_then_it_fails() {
    let settings = LlmSettings {
        provider: "lmstudio".to_string(),
        ..Default::default()
    };

    assert!(create_streaming_llm_client(&settings).is_err());
}
