// End-to-end tests over the axum router with a mocked model API.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use botsmith::config::{Config, ModelConfig, ServerConfig};
use botsmith::database::sqlite::Database;
use botsmith::database::sqlite::models::NewBot;
use botsmith::documents::chunking::ChunkingConfig;
use botsmith::engine::EngineFactory;
use botsmith::model::ModelClient;
use botsmith::notify::LeadNotifier;
use botsmith::server::router;
use botsmith::server::state::AppState;
use botsmith::widget::stream::{StreamAssembler, StreamFrame};
use tempfile::TempDir;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request as MockRequest, Respond, ResponseTemplate};

const DIM: u32 = 4;

struct EmbedResponder;

impl Respond for EmbedResponder {
    fn respond(&self, request: &MockRequest) -> ResponseTemplate {
        let body: serde_json::Value =
            serde_json::from_slice(&request.body).expect("embeddings body");
        let count = body["input"].as_array().map_or(0, Vec::len);
        let data: Vec<serde_json::Value> = (0..count)
            .map(|index| {
                serde_json::json!({
                    "index": index,
                    "embedding": [0.1, 0.2, 0.3, 0.4]
                })
            })
            .collect();
        ResponseTemplate::new(200).set_body_json(serde_json::json!({ "data": data }))
    }
}

async fn test_app(dir: &TempDir, model_server: Option<&MockServer>) -> (Router, Config) {
    let model = ModelConfig {
        api_base: model_server.map_or_else(
            || "http://127.0.0.1:1".to_string(),
            |s| s.uri(),
        ),
        embedding_dimension: DIM,
        ..ModelConfig::default()
    };
    let config = Config {
        model: model.clone(),
        server: ServerConfig {
            port: 0,
            max_upload_bytes: 16 * 1024,
        },
        chunking: ChunkingConfig::default(),
        base_dir: dir.path().to_path_buf(),
    };

    let database = Database::initialize_from_base_dir(&config.base_dir)
        .await
        .expect("database");

    let factory = model_server.map(|_| {
        let client = ModelClient::new(&model, "test-key".to_string()).expect("client");
        EngineFactory::new(config.clone(), client)
    });

    let state = Arc::new(AppState {
        config: config.clone(),
        database,
        notifier: LeadNotifier::from_env(),
        factory,
    });
    (router(state), config)
}

async fn json_request(
    app: &Router,
    method: &str,
    uri: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .expect("request"),
        )
        .await
        .expect("response");

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let value = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, value)
}

async fn create_bot(app: &Router, collect_email: bool) -> String {
    let new_bot = NewBot {
        name: "Acme Support".to_string(),
        agent_name: "Mia".to_string(),
        agent_role: "Support Agent".to_string(),
        welcome_message: "Hi!".to_string(),
        knowledge_base: "We sell anvils.".to_string(),
        suggested_questions: vec!["Opening hours?".to_string()],
        accent_color: None,
        collect_name: true,
        collect_email,
        collect_phone: false,
    };
    let (status, body) = json_request(
        app,
        "POST",
        "/api/bots",
        serde_json::to_value(&new_bot).expect("bot json"),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["id"].as_str().expect("bot id").to_string()
}

fn multipart_body(parts: &[(&str, &str, &[u8])]) -> (String, Vec<u8>) {
    let boundary = "testboundary7MA4YWxkTrZu0gW";
    let mut body = Vec::new();
    for (file_name, content_type, data) in parts {
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"files\"; filename=\"{file_name}\"\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    (
        format!("multipart/form-data; boundary={boundary}"),
        body,
    )
}

#[tokio::test]
async fn health_endpoint() {
    let dir = TempDir::new().expect("tempdir");
    let (app, _) = test_app(&dir, None).await;

    let (status, body) = json_request(&app, "GET", "/health", serde_json::Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn widget_projection_hides_private_fields() {
    let dir = TempDir::new().expect("tempdir");
    let (app, _) = test_app(&dir, None).await;
    let bot_id = create_bot(&app, true).await;

    let (status, body) =
        json_request(&app, "GET", &format!("/api/widget/{bot_id}"), serde_json::Value::Null)
            .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["agent_name"], "Mia");
    assert_eq!(body["collect_email"], true);
    assert!(body.get("knowledge_base").is_none());
    assert!(body.get("suggested_questions").is_some());
}

#[tokio::test]
async fn inactive_bot_exposes_only_inactive_flag() {
    let dir = TempDir::new().expect("tempdir");
    let (app, _) = test_app(&dir, None).await;
    let bot_id = create_bot(&app, false).await;

    let (status, _) = json_request(
        &app,
        "PATCH",
        &format!("/api/bots/{bot_id}"),
        serde_json::json!({ "active": false }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) =
        json_request(&app, "GET", &format!("/api/widget/{bot_id}"), serde_json::Value::Null)
            .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active"], false);
    assert!(body.get("agent_name").is_none());
    assert!(body.get("welcome_message").is_none());
}

#[tokio::test]
async fn upload_batch_isolates_per_file_failures() {
    let dir = TempDir::new().expect("tempdir");
    let (app, config) = test_app(&dir, None).await;
    let bot_id = create_bot(&app, false).await;

    // Max upload is 16KB in the test config: the 32KB file must fail
    // while the small file in the same batch succeeds.
    let oversized = vec![b'x'; 32 * 1024];
    let (content_type, body) = multipart_body(&[
        ("big.pdf", "application/pdf", &oversized),
        ("notes.txt", "text/plain", b"Shipping takes three days."),
        ("slides.pptx", "application/vnd.ms-powerpoint", b"nope"),
    ]);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/bots/{bot_id}/files"))
                .header(header::CONTENT_TYPE, content_type)
                .body(Body::from(body))
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let report: serde_json::Value = serde_json::from_slice(&bytes).expect("report");

    assert_eq!(report["saved"], serde_json::json!(["notes.txt"]));
    let failed = report["failed"].as_array().expect("failed list");
    assert_eq!(failed.len(), 2);
    assert!(failed[0]["error"].as_str().expect("error").contains("size limit"));
    assert!(failed[1]["error"].as_str().expect("error").contains("Unsupported"));

    assert!(config.bot_files_dir(&bot_id).join("notes.txt").exists());
    assert!(!config.bot_files_dir(&bot_id).join("big.pdf").exists());
}

#[tokio::test]
async fn deleting_a_file_invalidates_the_index_cache() {
    let dir = TempDir::new().expect("tempdir");
    let (app, config) = test_app(&dir, None).await;
    let bot_id = create_bot(&app, false).await;

    let files_dir = config.bot_files_dir(&bot_id);
    std::fs::create_dir_all(&files_dir).expect("files dir");
    std::fs::write(files_dir.join("notes.txt"), "Some content.").expect("write");

    // Simulate a previously built cache
    let index_dir = config.bot_index_dir(&bot_id);
    std::fs::create_dir_all(&index_dir).expect("index dir");
    std::fs::write(index_dir.join("data.lance"), b"cache").expect("write");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/bots/{bot_id}/files/notes.txt"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(!files_dir.join("notes.txt").exists());
    assert!(!index_dir.exists());
}

#[tokio::test]
async fn deleting_missing_file_is_not_found() {
    let dir = TempDir::new().expect("tempdir");
    let (app, _) = test_app(&dir, None).await;
    let bot_id = create_bot(&app, false).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/bots/{bot_id}/files/ghost.txt"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn chat_rejects_invalid_conversations() {
    let dir = TempDir::new().expect("tempdir");
    let server = MockServer::start().await;
    let (app, _) = test_app(&dir, Some(&server)).await;
    let bot_id = create_bot(&app, false).await;

    let (status, body) = json_request(
        &app,
        "POST",
        "/api/chat",
        serde_json::json!({ "messages": [], "botId": bot_id }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().expect("error").contains("empty"));

    let (status, body) = json_request(
        &app,
        "POST",
        "/api/chat",
        serde_json::json!({
            "messages": [
                { "role": "user", "content": "hi" },
                { "role": "assistant", "content": "hello" }
            ],
            "botId": bot_id
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().expect("error").contains("user"));
}

#[tokio::test]
async fn chat_for_unknown_bot_is_not_found() {
    let dir = TempDir::new().expect("tempdir");
    let server = MockServer::start().await;
    let (app, config) = test_app(&dir, Some(&server)).await;

    // A traversal-shaped id must be refused before any engine work; the
    // data directory it would resolve through stays untouched
    std::fs::write(config.base_dir.join("marker"), b"keep").expect("write");
    let (status, body) = json_request(
        &app,
        "POST",
        "/api/chat",
        serde_json::json!({
            "messages": [{ "role": "user", "content": "hi" }],
            "botId": "../../victim"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().expect("error").contains("Bot not found"));
    assert!(config.base_dir.join("marker").exists());

    let (status, _) = json_request(
        &app,
        "POST",
        "/api/chat",
        serde_json::json!({
            "messages": [{ "role": "user", "content": "hi" }],
            "botId": "ghost"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn deleting_file_for_unknown_bot_is_not_found() {
    let dir = TempDir::new().expect("tempdir");
    let (app, config) = test_app(&dir, None).await;

    // Neighbouring data must survive a delete aimed at a bogus bot id
    std::fs::create_dir_all(config.base_dir.join("indexes")).expect("indexes dir");
    std::fs::write(config.base_dir.join("botsmith.db.bak"), b"keep").expect("write");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/bots/ghost/files/notes.txt")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(config.base_dir.join("botsmith.db.bak").exists());
    assert!(config.base_dir.join("indexes").exists());
}

#[tokio::test]
async fn chat_without_model_credential_is_a_config_error() {
    let dir = TempDir::new().expect("tempdir");
    let (app, _) = test_app(&dir, None).await;
    let bot_id = create_bot(&app, false).await;

    let (status, body) = json_request(
        &app,
        "POST",
        "/api/chat",
        serde_json::json!({
            "messages": [{ "role": "user", "content": "hi" }],
            "botId": bot_id
        }),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().expect("error").contains("API key"));
}

#[tokio::test]
async fn chat_streams_framed_tokens() {
    let dir = TempDir::new().expect("tempdir");
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(EmbedResponder)
        .mount(&server)
        .await;
    let sse = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"We sell\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\" anvils.\"}}]}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse),
        )
        .mount(&server)
        .await;

    let (app, config) = test_app(&dir, Some(&server)).await;
    let bot_id = create_bot(&app, false).await;

    let files_dir = config.bot_files_dir(&bot_id);
    std::fs::create_dir_all(&files_dir).expect("files dir");
    std::fs::write(files_dir.join("catalog.txt"), "Our anvils weigh 50kg.").expect("write");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/chat")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::json!({
                        "messages": [{ "role": "user", "content": "What do you sell?" }],
                        "botId": bot_id,
                        "knowledgeBase": "We sell anvils.",
                        "agentName": "Mia"
                    })
                    .to_string(),
                ))
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");

    let mut assembler = StreamAssembler::new();
    let frames = assembler.feed(&String::from_utf8(bytes.to_vec()).expect("utf8"));

    assert_eq!(assembler.text(), "We sell anvils.");
    assert!(assembler.is_done());
    assert!(assembler.error().is_none());
    assert_eq!(frames.last(), Some(&StreamFrame::Done));

    // The upstream chat request carried the persona/knowledge instruction
    // and the retrieval context ahead of the user turn.
    let requests = server.received_requests().await.expect("requests");
    let chat_request = requests
        .iter()
        .find(|r| r.url.path() == "/chat/completions")
        .expect("chat request");
    let chat_body: serde_json::Value =
        serde_json::from_slice(&chat_request.body).expect("chat body");
    let messages = chat_body["messages"].as_array().expect("messages");
    assert_eq!(messages[0]["role"], "system");
    assert!(
        messages[0]["content"]
            .as_str()
            .expect("content")
            .contains("You are Mia")
    );
    assert_eq!(messages.last().expect("last")["role"], "user");
}

#[tokio::test]
async fn chat_with_no_persona_and_no_knowledge_has_no_system_message() {
    let dir = TempDir::new().expect("tempdir");
    let server = MockServer::start().await;

    let sse = "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\ndata: [DONE]\n\n";
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse),
        )
        .mount(&server)
        .await;

    let (app, _) = test_app(&dir, Some(&server)).await;
    let bot_id = create_bot(&app, false).await;

    // No uploaded documents, empty knowledge base, no agent name
    let (status, _) = json_request(
        &app,
        "POST",
        "/api/chat",
        serde_json::json!({
            "messages": [{ "role": "user", "content": "hi" }],
            "botId": bot_id,
            "knowledgeBase": "",
            "agentName": ""
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let requests = server.received_requests().await.expect("requests");
    let chat_request = requests
        .iter()
        .find(|r| r.url.path() == "/chat/completions")
        .expect("chat request");
    let chat_body: serde_json::Value =
        serde_json::from_slice(&chat_request.body).expect("chat body");
    let messages = chat_body["messages"].as_array().expect("messages");

    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["role"], "user");
}

#[tokio::test]
async fn lead_submission_and_listing() {
    let dir = TempDir::new().expect("tempdir");
    let (app, _) = test_app(&dir, None).await;
    let bot_id = create_bot(&app, true).await;

    // Empty submission: silently ignored
    let (status, _) = json_request(
        &app,
        "POST",
        "/api/leads",
        serde_json::json!({ "botId": bot_id, "email": "  " }),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // Partial lead: name only, skipped fields stay absent
    let (status, body) = json_request(
        &app,
        "POST",
        "/api/leads",
        serde_json::json!({ "botId": bot_id, "name": "Ana" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["name"], "Ana");
    assert!(body["email"].is_null());

    let (status, body) = json_request(
        &app,
        "GET",
        &format!("/api/bots/{bot_id}/leads"),
        serde_json::Value::Null,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let leads = body.as_array().expect("leads");
    assert_eq!(leads.len(), 1);
    assert_eq!(leads[0]["name"], "Ana");
}

#[tokio::test]
async fn deleting_a_bot_purges_files_and_index() {
    let dir = TempDir::new().expect("tempdir");
    let (app, config) = test_app(&dir, None).await;
    let bot_id = create_bot(&app, false).await;

    let files_dir = config.bot_files_dir(&bot_id);
    std::fs::create_dir_all(&files_dir).expect("files dir");
    std::fs::write(files_dir.join("a.txt"), "content").expect("write");
    let index_dir = config.bot_index_dir(&bot_id);
    std::fs::create_dir_all(&index_dir).expect("index dir");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/bots/{bot_id}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(!files_dir.exists());
    assert!(!index_dir.exists());

    let (status, _) =
        json_request(&app, "GET", &format!("/api/bots/{bot_id}"), serde_json::Value::Null).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
