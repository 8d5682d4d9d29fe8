//! Core data types used throughout drivechat.
//!
//! These types represent the conversation turns, source links, and vector
//! matches that flow between the orchestrator, the retrieval loop, and the
//! external services.

use serde::{Deserialize, Serialize};

/// A reference to a source document, shown alongside an assistant reply.
///
/// Links are unique by `href` within a single retrieval result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    /// Display title of the document.
    pub name: String,
    /// Resolvable URL of the document.
    pub href: String,
}

/// A structured request from the model to invoke a named capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Name of the function the model wants invoked.
    pub name: String,
    /// Raw JSON argument string, parsed by the orchestrator.
    pub arguments: String,
}

/// One turn in a conversation.
///
/// Each role carries only the fields valid for it, so a `function` turn
/// cannot exist without a `name` and a `system` turn cannot carry links.
/// Serialization uses `role` as the tag, matching the chat-completions wire
/// format. The conversation is an ordered, append-only sequence; turns are
/// never mutated after they are appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        function_call: Option<FunctionCall>,
        /// Client-side annotation; stripped from the wire form.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        links: Vec<Link>,
    },
    Function {
        name: String,
        content: String,
    },
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: content.into(),
        }
    }

    pub fn function(name: impl Into<String>, content: impl Into<String>) -> Self {
        Message::Function {
            name: name.into(),
            content: content.into(),
        }
    }

    /// Text content of the turn, if any.
    pub fn content(&self) -> Option<&str> {
        match self {
            Message::System { content } | Message::User { content } => Some(content),
            Message::Assistant { content, .. } => content.as_deref(),
            Message::Function { content, .. } => Some(content),
        }
    }

    /// The wire form sent to the generative model.
    ///
    /// `links` only exist for rendering on the client and are removed before
    /// the turn is serialized into a model request.
    pub fn wire_value(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        if let Some(obj) = value.as_object_mut() {
            obj.remove("links");
        }
        value
    }
}

/// A candidate result from similarity search.
///
/// Produced and consumed within one retrieval call; never persisted.
/// Ranking is the vector store's responsibility — `score` is carried through
/// uninterpreted.
#[derive(Debug, Clone, Deserialize)]
pub struct VectorMatch {
    pub id: String,
    #[serde(default)]
    pub score: f64,
    pub metadata: MatchMetadata,
}

/// Index-side metadata locating the chunk a vector was built from.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchMetadata {
    pub drive_id: String,
    pub item_id: String,
    pub chunk_index: usize,
    #[serde(default)]
    pub location: Option<String>,
}

/// Result of one similarity retrieval: deduplicated source links and the
/// concatenated accessible chunk text.
#[derive(Debug, Clone, Default)]
pub struct Retrieval {
    pub links: Vec<Link>,
    pub text: String,
}
