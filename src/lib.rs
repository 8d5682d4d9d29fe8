//! # drivechat
//!
//! A retrieval-augmented chat assistant over a permissioned document drive.
//!
//! drivechat forwards user messages to a generative-model API; when the model
//! asks for it, the system retrieves semantically similar, access-controlled
//! document chunks from an external vector index and document store, folds
//! them back into the conversation as a function-call round trip, and returns
//! the final answer with links to the source documents.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌────────────────┐     ┌──────────────┐
//! │ Orchestrator │────▶│ Retrieval Loop │────▶│ Vector Index │
//! │   (chat)     │     │  (retrieval)   │     │   (index)    │
//! └──────┬───────┘     └───────┬────────┘     └──────┬───────┘
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//! ┌──────────────┐     ┌────────────────┐     ┌──────────────┐
//! │  Generative  │     │ Document Store │     │ Rate-Limited │
//! │  Model API   │     │  (documents)   │     │  Dispatcher  │
//! └──────────────┘     └────────────────┘     └──────────────┘
//! ```
//!
//! Every outbound call goes through the rate-limited [`dispatch`] layer.
//! The embedding endpoint, vector index, document store, and model are all
//! external collaborators; no state is persisted here beyond optional
//! exchange transcripts.
//!
//! ## Quick Start
//!
//! ```bash
//! drivechat ask "What is the gift policy?" --token "$DRIVE_AUTH_TOKEN"
//! drivechat retrieve "gift policy"        # inspect the retrieval loop
//! drivechat serve relay                   # same-origin relay for browsers
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`dispatch`] | Rate-limited HTTP dispatch with retry |
//! | [`index`] | Vector index client |
//! | [`documents`] | Document access gateway |
//! | [`chunk`] | Overlapping text chunker |
//! | [`embedding`] | Embedding client |
//! | [`retrieval`] | Similarity retrieval loop |
//! | [`chat`] | Conversation orchestrator and model client |
//! | [`server`] | Same-origin relay server |
//! | [`error`] | Typed component errors |

pub mod chat;
pub mod chunk;
pub mod config;
pub mod dispatch;
pub mod documents;
pub mod embedding;
pub mod error;
pub mod index;
pub mod models;
pub mod retrieval;
pub mod server;
