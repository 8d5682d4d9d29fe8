//! Integration tests for the retrieval loop and the conversation
//! orchestrator, run against an in-process mock of every external service:
//! embeddings, vector index, document store, and chat completions.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use drivechat::chat::{ModelClient, Orchestrator, RETRIEVAL_FUNCTION};
use drivechat::config::{
    ChunkingConfig, DispatchConfig, DocumentsConfig, EmbeddingConfig, IndexConfig, LlmConfig,
    RetrievalConfig,
};
use drivechat::dispatch::RateLimitedDispatcher;
use drivechat::documents::DocumentGateway;
use drivechat::embedding::EmbeddingClient;
use drivechat::error::{IndexError, LinkResolutionError};
use drivechat::index::VectorIndexClient;
use drivechat::models::Message;
use drivechat::retrieval::Retriever;

// Env var that is never set; clients fall back to "no API key".
const UNSET_KEY_ENV: &str = "DRIVECHAT_TEST_UNSET_KEY";

#[derive(Clone)]
struct MockDoc {
    name: String,
    /// `None` leaves `webUrl` out of the item metadata entirely.
    web_url: Option<String>,
    text: String,
    accessible: bool,
}

/// State for the mock upstream serving all four external APIs.
#[derive(Clone)]
struct Upstream {
    /// Matches returned by every index query.
    matches: Arc<serde_json::Value>,
    /// Recorded index query bodies.
    query_bodies: Arc<Mutex<Vec<serde_json::Value>>>,
    docs: Arc<HashMap<String, MockDoc>>,
    /// Recorded chat-completion request bodies.
    chat_bodies: Arc<Mutex<Vec<serde_json::Value>>>,
    /// Arguments emitted when the model is allowed to call the function.
    function_args: String,
    final_answer: String,
}

async fn embeddings() -> Json<serde_json::Value> {
    Json(serde_json::json!({"data": [{"embedding": [0.1, 0.2, 0.3, 0.4]}]}))
}

async fn index_query(
    State(s): State<Upstream>,
    Json(body): Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    s.query_bodies.lock().await.push(body);
    Json(serde_json::json!({"matches": *s.matches}))
}

async fn item_content(
    State(s): State<Upstream>,
    Path((_drive_id, item_id)): Path<(String, String)>,
) -> Response {
    match s.docs.get(&item_id) {
        Some(doc) => (StatusCode::OK, doc.text.clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn item_meta(
    State(s): State<Upstream>,
    Path((_drive_id, item_id)): Path<(String, String)>,
) -> Response {
    match s.docs.get(&item_id) {
        Some(doc) => {
            let mut meta = serde_json::json!({"name": doc.name});
            if let Some(web_url) = &doc.web_url {
                meta["webUrl"] = serde_json::json!(web_url);
            }
            Json(meta).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn item_access(State(s): State<Upstream>, Path(item_id): Path<String>) -> StatusCode {
    match s.docs.get(&item_id) {
        Some(doc) if doc.accessible => StatusCode::OK,
        _ => StatusCode::NOT_FOUND,
    }
}

async fn chat_completions(
    State(s): State<Upstream>,
    Json(body): Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    let mode = body["function_call"].as_str().unwrap_or("auto").to_string();
    s.chat_bodies.lock().await.push(body);

    if mode == "auto" {
        Json(serde_json::json!({
            "choices": [{"message": {
                "role": "assistant",
                "content": null,
                "function_call": {
                    "name": RETRIEVAL_FUNCTION,
                    "arguments": s.function_args,
                }
            }}]
        }))
    } else {
        Json(serde_json::json!({
            "choices": [{"message": {
                "role": "assistant",
                "content": s.final_answer,
            }}]
        }))
    }
}

async fn spawn_upstream(state: Upstream) -> String {
    let app = Router::new()
        .route("/embeddings", post(embeddings))
        .route("/chat/completions", post(chat_completions))
        .route("/query", post(index_query))
        .route("/drives/{drive_id}/items/{item_id}/content", get(item_content))
        .route("/drives/{drive_id}/items/{item_id}", get(item_meta))
        .route("/me/drive/items/{item_id}", get(item_access))
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn upstream_state(
    matches: serde_json::Value,
    docs: Vec<(&str, MockDoc)>,
    function_args: &str,
    final_answer: &str,
) -> Upstream {
    Upstream {
        matches: Arc::new(matches),
        query_bodies: Arc::new(Mutex::new(Vec::new())),
        docs: Arc::new(
            docs.into_iter()
                .map(|(id, doc)| (id.to_string(), doc))
                .collect(),
        ),
        chat_bodies: Arc::new(Mutex::new(Vec::new())),
        function_args: function_args.to_string(),
        final_answer: final_answer.to_string(),
    }
}

fn vector_match(id: &str, item_id: &str, chunk_index: usize) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "score": 0.9,
        "metadata": {"driveId": "d1", "itemId": item_id, "chunkIndex": chunk_index}
    })
}

fn build_retriever(base: &str, retrieval: RetrievalConfig) -> Retriever {
    let dispatcher = Arc::new(
        RateLimitedDispatcher::new(&DispatchConfig {
            average_rate_limit: 60_000.0,
            max_retries: 0,
            backoff_base_ms: 5,
            timeout_secs: 5,
        })
        .unwrap(),
    );

    let index = VectorIndexClient::new(
        Arc::clone(&dispatcher),
        &IndexConfig {
            url: format!("{}/query", base),
            api_key_env: UNSET_KEY_ENV.to_string(),
        },
    );
    let documents = Arc::new(DocumentGateway::new(
        Arc::clone(&dispatcher),
        &DocumentsConfig {
            base_url: base.to_string(),
        },
        &ChunkingConfig {
            chunk_chars: 1000,
            overlap_chars: 200,
        },
    ));
    let embedding = EmbeddingClient::new(
        dispatcher,
        &EmbeddingConfig {
            base_url: base.to_string(),
            model: "test-embedding".to_string(),
            api_key_env: UNSET_KEY_ENV.to_string(),
        },
    );

    Retriever::new(index, documents, embedding, retrieval)
}

fn build_orchestrator(base: &str, retrieval: RetrievalConfig) -> Orchestrator {
    let dispatcher = Arc::new(
        RateLimitedDispatcher::new(&DispatchConfig {
            average_rate_limit: 60_000.0,
            max_retries: 0,
            backoff_base_ms: 5,
            timeout_secs: 5,
        })
        .unwrap(),
    );
    let model = ModelClient::new(
        Arc::clone(&dispatcher),
        &LlmConfig {
            base_url: base.to_string(),
            model: "test-model".to_string(),
            temperature: 0.0,
            max_tokens: 400,
            api_key_env: UNSET_KEY_ENV.to_string(),
        },
    );
    Orchestrator::new(model, build_retriever(base, retrieval), None)
}

fn default_retrieval() -> RetrievalConfig {
    RetrievalConfig {
        min_documents: 2,
        poll_size: 2,
        max_tries: 3,
        separator: " -- ".to_string(),
    }
}

#[tokio::test]
async fn test_end_to_end_function_call_round_trip() {
    let state = upstream_state(
        serde_json::json!([vector_match("v1", "doc-1", 0)]),
        vec![(
            "doc-1",
            MockDoc {
                name: "Gift Policy.pdf".to_string(),
                web_url: Some("https://drive.example.com/doc-1".to_string()),
                text: "The gift policy limits gifts to $50 per vendor per year.".to_string(),
                accessible: true,
            },
        )],
        r#"{"message":"gift policy","min_num_documents":1}"#,
        "Gifts may not exceed $50 per vendor per year.",
    );
    let base = spawn_upstream(state.clone()).await;

    let orchestrator = build_orchestrator(&base, default_retrieval());
    let conversation = orchestrator
        .respond(
            vec![Message::user("What is the gift policy?")],
            "token",
            true,
        )
        .await
        .unwrap();

    // user, assistant function call, function response, final assistant
    assert_eq!(conversation.len(), 4);

    match &conversation[1] {
        Message::Assistant { function_call, .. } => {
            assert_eq!(function_call.as_ref().unwrap().name, RETRIEVAL_FUNCTION);
        }
        other => panic!("expected assistant function call, got {:?}", other),
    }

    match &conversation[2] {
        Message::Function { name, content } => {
            assert_eq!(name, RETRIEVAL_FUNCTION);
            assert!(content.contains("gift policy limits gifts"));
        }
        other => panic!("expected function message, got {:?}", other),
    }

    match &conversation[3] {
        Message::Assistant { content, links, .. } => {
            assert_eq!(
                content.as_deref(),
                Some("Gifts may not exceed $50 per vendor per year.")
            );
            assert_eq!(links.len(), 1);
            assert_eq!(links[0].name, "Gift Policy.pdf");
            assert_eq!(links[0].href, "https://drive.example.com/doc-1");
        }
        other => panic!("expected final assistant message, got {:?}", other),
    }

    // Exactly two model calls; the follow-up must disable function calling.
    let chat_bodies = state.chat_bodies.lock().await;
    assert_eq!(chat_bodies.len(), 2);
    assert_eq!(chat_bodies[0]["function_call"], "auto");
    assert_eq!(chat_bodies[1]["function_call"], "none");

    // Links are a client-side annotation and never reach the wire.
    for body in chat_bodies.iter() {
        for message in body["messages"].as_array().unwrap() {
            assert!(message.get("links").is_none());
        }
    }
}

#[tokio::test]
async fn test_retrieval_dedups_links_by_href() {
    // Two chunks of the same document: same href, one link expected.
    let shared = "https://drive.example.com/handbook";
    let state = upstream_state(
        serde_json::json!([
            vector_match("v1", "doc-a", 0),
            vector_match("v2", "doc-b", 0),
        ]),
        vec![
            (
                "doc-a",
                MockDoc {
                    name: "Handbook part 1".to_string(),
                    web_url: Some(shared.to_string()),
                    text: "Chapter one of the handbook.".to_string(),
                    accessible: true,
                },
            ),
            (
                "doc-b",
                MockDoc {
                    name: "Handbook part 2".to_string(),
                    web_url: Some(shared.to_string()),
                    text: "Chapter two of the handbook.".to_string(),
                    accessible: true,
                },
            ),
        ],
        "{}",
        "",
    );
    let base = spawn_upstream(state).await;

    let retriever = build_retriever(&base, default_retrieval());
    let retrieval = retriever.retrieve("token", "handbook", Some(2)).await.unwrap();

    assert_eq!(retrieval.links.len(), 1);
    assert_eq!(retrieval.links[0].href, shared);
    assert!(retrieval.text.contains("Chapter one") || retrieval.text.contains("Chapter two"));
}

#[tokio::test]
async fn test_access_denied_loop_terminates_within_max_tries() {
    let state = upstream_state(
        serde_json::json!([
            vector_match("v1", "locked-1", 0),
            vector_match("v2", "locked-2", 0),
        ]),
        vec![
            (
                "locked-1",
                MockDoc {
                    name: "Locked".to_string(),
                    web_url: Some("https://drive.example.com/locked-1".to_string()),
                    text: "secret".to_string(),
                    accessible: false,
                },
            ),
            (
                "locked-2",
                MockDoc {
                    name: "Locked".to_string(),
                    web_url: Some("https://drive.example.com/locked-2".to_string()),
                    text: "secret".to_string(),
                    accessible: false,
                },
            ),
        ],
        "{}",
        "",
    );
    let base = spawn_upstream(state.clone()).await;

    let retriever = build_retriever(&base, default_retrieval());
    let retrieval = retriever.retrieve("token", "anything", None).await.unwrap();

    assert!(retrieval.text.is_empty());
    assert!(retrieval.links.is_empty());

    // One index query per try, and the poll widens by the seen-id count.
    let bodies = state.query_bodies.lock().await;
    let top_ks: Vec<u64> = bodies.iter().map(|b| b["topK"].as_u64().unwrap()).collect();
    assert_eq!(top_ks, vec![2, 4, 4]);
}

#[tokio::test]
async fn test_out_of_range_chunk_index_clamps() {
    let state = upstream_state(
        serde_json::json!([vector_match("v1", "doc-1", 99)]),
        vec![(
            "doc-1",
            MockDoc {
                name: "Short note".to_string(),
                web_url: Some("https://drive.example.com/note".to_string()),
                text: "A short note that fits in one chunk.".to_string(),
                accessible: true,
            },
        )],
        "{}",
        "",
    );
    let base = spawn_upstream(state).await;

    let retriever = build_retriever(&base, default_retrieval());
    let retrieval = retriever.retrieve("token", "note", Some(1)).await.unwrap();

    assert!(retrieval.text.contains("A short note"));
    assert_eq!(retrieval.links.len(), 1);
}

#[tokio::test]
async fn test_empty_retrieval_still_completes_conversation() {
    // The match points at a document the store has never heard of: the
    // access check denies it, retrieval comes back empty, and the
    // conversation still finishes with a (sourceless) answer.
    let state = upstream_state(
        serde_json::json!([vector_match("v1", "ghost", 0)]),
        Vec::new(),
        r#"{"message":"anything","min_num_documents":1}"#,
        "I could not find relevant documents.",
    );
    let base = spawn_upstream(state.clone()).await;

    let orchestrator = build_orchestrator(&base, default_retrieval());
    let conversation = orchestrator
        .respond(vec![Message::user("anything?")], "token", true)
        .await
        .unwrap();

    assert_eq!(conversation.len(), 4);
    match &conversation[2] {
        Message::Function { content, .. } => assert!(content.is_empty()),
        other => panic!("expected function message, got {:?}", other),
    }
    match &conversation[3] {
        Message::Assistant { links, .. } => assert!(links.is_empty()),
        other => panic!("expected assistant message, got {:?}", other),
    }
}

#[tokio::test]
async fn test_no_retrieval_flag_disables_function_calling() {
    let state = upstream_state(
        serde_json::json!([]),
        Vec::new(),
        "{}",
        "Answered from the model alone.",
    );
    let base = spawn_upstream(state.clone()).await;

    let orchestrator = build_orchestrator(&base, default_retrieval());
    let conversation = orchestrator
        .respond(vec![Message::user("hello")], "token", false)
        .await
        .unwrap();

    assert_eq!(conversation.len(), 2);
    let chat_bodies = state.chat_bodies.lock().await;
    assert_eq!(chat_bodies.len(), 1);
    assert_eq!(chat_bodies[0]["function_call"], "none");
}

/// Index stub that returns `payload` verbatim for every query, alongside a
/// working embeddings route.
async fn spawn_index_stub(payload: serde_json::Value) -> String {
    let app = Router::new()
        .route("/embeddings", post(embeddings))
        .route("/query", post(move || async move { Json(payload) }));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_index_response_without_matches_is_malformed() {
    let base = spawn_index_stub(serde_json::json!({"results": []})).await;

    let retriever = build_retriever(&base, default_retrieval());
    let err = retriever
        .retrieve("token", "anything", None)
        .await
        .unwrap_err();

    match err.downcast_ref::<IndexError>() {
        Some(IndexError::MalformedResponse(reason)) => assert!(reason.contains("matches")),
        other => panic!("expected MalformedResponse, got {:?}", other),
    }
}

#[tokio::test]
async fn test_undecodable_index_matches_are_malformed() {
    // Matches present but missing the metadata the loop needs.
    let base = spawn_index_stub(serde_json::json!({"matches": [{"id": "v1"}]})).await;

    let retriever = build_retriever(&base, default_retrieval());
    let err = retriever
        .retrieve("token", "anything", None)
        .await
        .unwrap_err();

    match err.downcast_ref::<IndexError>() {
        Some(IndexError::MalformedResponse(_)) => {}
        other => panic!("expected MalformedResponse, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unresolvable_link_after_readable_chunk_is_an_error() {
    // Content is readable but the item metadata carries no webUrl, so the
    // source cannot be cited. Unlike an access denial this aborts the call.
    let state = upstream_state(
        serde_json::json!([vector_match("v1", "doc-1", 0)]),
        vec![(
            "doc-1",
            MockDoc {
                name: "Orphan".to_string(),
                web_url: None,
                text: "perfectly readable text".to_string(),
                accessible: true,
            },
        )],
        "{}",
        "",
    );
    let base = spawn_upstream(state).await;

    let retriever = build_retriever(&base, default_retrieval());
    let err = retriever
        .retrieve("token", "anything", Some(1))
        .await
        .unwrap_err();

    match err.downcast_ref::<LinkResolutionError>() {
        Some(link_err) => assert_eq!(link_err.item_id, "doc-1"),
        None => panic!("expected LinkResolutionError, got {:#}", err),
    }
}

#[tokio::test]
async fn test_link_failure_is_absorbed_into_empty_function_turn() {
    let state = upstream_state(
        serde_json::json!([vector_match("v1", "doc-1", 0)]),
        vec![(
            "doc-1",
            MockDoc {
                name: "Orphan".to_string(),
                web_url: None,
                text: "perfectly readable text".to_string(),
                accessible: true,
            },
        )],
        r#"{"message":"anything","min_num_documents":1}"#,
        "Answering without sources.",
    );
    let base = spawn_upstream(state).await;

    let orchestrator = build_orchestrator(&base, default_retrieval());
    let conversation = orchestrator
        .respond(vec![Message::user("anything?")], "token", true)
        .await
        .unwrap();

    assert_eq!(conversation.len(), 4);
    match &conversation[2] {
        Message::Function { content, .. } => assert!(content.is_empty()),
        other => panic!("expected function message, got {:?}", other),
    }
    match &conversation[3] {
        Message::Assistant { content, links, .. } => {
            assert_eq!(content.as_deref(), Some("Answering without sources."));
            assert!(links.is_empty());
        }
        other => panic!("expected assistant message, got {:?}", other),
    }
}
