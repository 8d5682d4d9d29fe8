//! Conversation orchestration and the generative-model client.
//!
//! The orchestrator drives a multi-turn exchange with the model. A turn has
//! two possible states: **Direct**, where the model's reply is appended and
//! returned, and **FunctionDispatch**, where the model asked for similarity
//! retrieval. Dispatch appends the model's function-call turn, runs the
//! retrieval loop, appends the result as a `function` turn, and re-invokes
//! the model with function calling disabled — a function response must never
//! trigger another function call, so the recursion depth is exactly one.
//! The one-shot constraint is enforced with an explicit flag on a bounded
//! loop rather than actual recursion.
//!
//! Failure semantics: a model failure propagates to the caller uncaught
//! (transport retry already happened in the dispatcher beneath the client).
//! A retrieval failure does not abort the conversation — the function
//! response is appended with whatever content was gathered, possibly none.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::config::{api_key_from_env, Config, LlmConfig, TranscriptConfig};
use crate::dispatch::RateLimitedDispatcher;
use crate::models::{FunctionCall, Link, Message, Retrieval};
use crate::retrieval::Retriever;

/// Name of the retrieval capability advertised to the model.
pub const RETRIEVAL_FUNCTION: &str = "retrieve_accessible_similar_information";

/// Fewest / most documents the model may ask the retrieval loop to gather.
const MIN_NUM_DOCUMENTS_RANGE: (usize, usize) = (1, 5);

/// JSON-schema description of the retrieval function.
fn retrieval_function_schema() -> serde_json::Value {
    serde_json::json!({
        "name": RETRIEVAL_FUNCTION,
        "description": "Search the user's document drive for content similar to a message \
                        and return the excerpts the user is allowed to read.",
        "parameters": {
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "Text to find similar documents for."
                },
                "min_num_documents": {
                    "type": "integer",
                    "description": "Minimum number of documents to gather.",
                    "minimum": MIN_NUM_DOCUMENTS_RANGE.0,
                    "maximum": MIN_NUM_DOCUMENTS_RANGE.1
                }
            },
            "required": ["message"]
        }
    })
}

/// Whether the model may request a function call on this request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionMode {
    Auto,
    None,
}

impl FunctionMode {
    fn wire(self) -> &'static str {
        match self {
            FunctionMode::Auto => "auto",
            FunctionMode::None => "none",
        }
    }
}

/// One reply from the generative model: text, a function-call directive, or
/// both.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelReply {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub function_call: Option<FunctionCall>,
}

/// Client for the chat-completions endpoint, called through the dispatcher.
pub struct ModelClient {
    dispatcher: Arc<RateLimitedDispatcher>,
    base_url: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
    api_key: Option<String>,
}

impl ModelClient {
    pub fn new(dispatcher: Arc<RateLimitedDispatcher>, config: &LlmConfig) -> Self {
        Self {
            dispatcher,
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            api_key: api_key_from_env(&config.api_key_env),
        }
    }

    /// Send the conversation to the model and decode its reply.
    ///
    /// Messages are serialized in wire form (client-only fields stripped).
    /// The retrieval function schema is always advertised; `mode` controls
    /// whether the model may actually call it.
    pub async fn complete(&self, messages: &[Message], mode: FunctionMode) -> Result<ModelReply> {
        let wire_messages: Vec<serde_json::Value> =
            messages.iter().map(Message::wire_value).collect();

        let body = serde_json::json!({
            "model": self.model,
            "messages": wire_messages,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "functions": [retrieval_function_schema()],
            "function_call": mode.wire(),
        });

        let mut headers = Vec::new();
        if let Some(key) = &self.api_key {
            headers.push(("authorization", format!("Bearer {}", key)));
        }

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .dispatcher
            .post_json(&url, &headers, &body)
            .await
            .context("model request failed")?;

        let payload: serde_json::Value = response
            .json()
            .await
            .context("model response was not JSON")?;

        let message = payload
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .ok_or_else(|| anyhow::anyhow!("model response missing choices[0].message"))?;

        serde_json::from_value(message.clone()).context("undecodable model message")
    }
}

/// Arguments of the retrieval function call, as emitted by the model.
#[derive(Debug, Deserialize)]
struct RetrievalArgs {
    message: String,
    #[serde(default)]
    min_num_documents: Option<usize>,
}

/// Parse and clamp the model's retrieval arguments.
fn parse_retrieval_args(arguments: &str) -> Result<(String, Option<usize>)> {
    let args: RetrievalArgs =
        serde_json::from_str(arguments).context("undecodable retrieval arguments")?;
    let (lo, hi) = MIN_NUM_DOCUMENTS_RANGE;
    Ok((args.message, args.min_num_documents.map(|n| n.clamp(lo, hi))))
}

pub struct Orchestrator {
    model: ModelClient,
    retriever: Retriever,
    transcript: Option<Transcript>,
}

impl Orchestrator {
    pub fn new(model: ModelClient, retriever: Retriever, transcript: Option<Transcript>) -> Self {
        Self {
            model,
            retriever,
            transcript,
        }
    }

    /// Wire up the orchestrator from configuration with a single shared
    /// dispatcher behind every client.
    pub fn from_config(config: &Config) -> Result<Self> {
        let dispatcher = Arc::new(RateLimitedDispatcher::new(&config.dispatch)?);
        let model = ModelClient::new(Arc::clone(&dispatcher), &config.llm);
        let retriever = Retriever::from_config(config, dispatcher);
        let transcript = match &config.transcript {
            Some(t) => Some(Transcript::new(t)?),
            None => None,
        };
        Ok(Self::new(model, retriever, transcript))
    }

    /// Produce the assistant's next turn(s) for `messages`.
    ///
    /// Returns the conversation with the newly appended assistant (and
    /// possibly function) turns. `allow_function_call` disables retrieval
    /// for the whole exchange when false.
    pub async fn respond(
        &self,
        mut messages: Vec<Message>,
        auth_token: &str,
        allow_function_call: bool,
    ) -> Result<Vec<Message>> {
        let mut allow = allow_function_call;
        let mut pending_links: Vec<Link> = Vec::new();
        let mut retrieved_text = String::new();

        loop {
            let mode = if allow {
                FunctionMode::Auto
            } else {
                FunctionMode::None
            };
            let reply = self.model.complete(&messages, mode).await?;

            match reply.function_call {
                Some(call) if allow && call.name == RETRIEVAL_FUNCTION => {
                    messages.push(Message::Assistant {
                        content: reply.content,
                        function_call: Some(call.clone()),
                        links: Vec::new(),
                    });

                    let retrieval = self.run_retrieval(auth_token, &call.arguments).await;
                    retrieved_text.clone_from(&retrieval.text);
                    pending_links = retrieval.links;
                    messages.push(Message::function(call.name, retrieval.text));

                    // The function response must not trigger another call.
                    allow = false;
                }
                _ => {
                    messages.push(Message::Assistant {
                        content: Some(reply.content.unwrap_or_default()),
                        function_call: None,
                        links: pending_links,
                    });

                    if let Some(transcript) = &self.transcript {
                        if let Err(e) = transcript.record(&messages, &retrieved_text) {
                            eprintln!("chat: could not write transcript: {}", e);
                        }
                    }
                    return Ok(messages);
                }
            }
        }
    }

    /// Run the retrieval loop for a function call, absorbing failures.
    ///
    /// A failed retrieval yields an empty result so the conversation can
    /// still complete; the model answers from what it has.
    async fn run_retrieval(&self, auth_token: &str, arguments: &str) -> Retrieval {
        let (query, min_documents) = match parse_retrieval_args(arguments) {
            Ok(parsed) => parsed,
            Err(e) => {
                eprintln!("chat: bad retrieval arguments: {:#}", e);
                return Retrieval::default();
            }
        };

        match self
            .retriever
            .retrieve(auth_token, &query, min_documents)
            .await
        {
            Ok(retrieval) => retrieval,
            Err(e) => {
                eprintln!("chat: retrieval failed, answering without documents: {:#}", e);
                Retrieval::default()
            }
        }
    }
}

/// Writes one JSON record per completed exchange.
///
/// Each record carries a fresh id, a timestamp, the prompter and responder
/// messages, and the retrieved context the answer was grounded on.
pub struct Transcript {
    dir: PathBuf,
}

impl Transcript {
    pub fn new(config: &TranscriptConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.dir)
            .with_context(|| format!("Failed to create transcript dir: {}", config.dir.display()))?;
        Ok(Self {
            dir: config.dir.clone(),
        })
    }

    pub fn record(&self, messages: &[Message], retrieved: &str) -> Result<PathBuf> {
        let prompter = messages
            .iter()
            .rev()
            .find_map(|m| match m {
                Message::User { content } => Some(content.as_str()),
                _ => None,
            })
            .unwrap_or_default();
        let responder = messages
            .iter()
            .rev()
            .find_map(|m| match m {
                Message::Assistant { content, .. } => content.as_deref(),
                _ => None,
            })
            .unwrap_or_default();

        let id = uuid::Uuid::new_v4();
        let now = chrono::Utc::now();
        let record = serde_json::json!({
            "id": id.to_string(),
            "at": now.to_rfc3339(),
            "prompter": prompter,
            "responder": responder,
            "info": retrieved,
        });

        let path = self
            .dir
            .join(format!("{}_{}.json", now.format("%Y%m%dT%H%M%S"), id));
        std::fs::write(&path, serde_json::to_string_pretty(&record)?)?;
        Ok(path)
    }
}
