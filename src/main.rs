//! # drivechat CLI
//!
//! The `drivechat` binary is the command-line interface to the assistant.
//!
//! ## Usage
//!
//! ```bash
//! drivechat --config ./config/drivechat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `drivechat ask "<message>"` | Ask the assistant, with document retrieval |
//! | `drivechat retrieve "<query>"` | Run the retrieval loop directly |
//! | `drivechat serve relay` | Start the same-origin relay server |
//!
//! ## Examples
//!
//! ```bash
//! # Ask with retrieval enabled (the default)
//! drivechat ask "What is the gift policy?" --token "$DRIVE_AUTH_TOKEN"
//!
//! # Ask without touching the document drive
//! drivechat ask "Summarize our last exchange" --no-retrieval
//!
//! # Inspect what the retrieval loop would feed the model
//! drivechat retrieve "gift policy" --min-documents 3
//!
//! # Start the relay for browser clients
//! drivechat serve relay
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use drivechat::chat::Orchestrator;
use drivechat::config;
use drivechat::dispatch::RateLimitedDispatcher;
use drivechat::models::Message;
use drivechat::retrieval::Retriever;
use drivechat::server;

/// drivechat — a retrieval-augmented chat assistant over a permissioned
/// document drive.
#[derive(Parser)]
#[command(
    name = "drivechat",
    about = "A retrieval-augmented chat assistant over a permissioned document drive",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/drivechat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask the assistant a question.
    ///
    /// Sends the message to the model; if the model requests similarity
    /// retrieval, accessible document chunks are folded into the exchange
    /// and the sources are printed with the answer.
    Ask {
        /// The message to respond to.
        message: String,

        /// Document-store access token for the asking user.
        #[arg(long, env = "DRIVE_AUTH_TOKEN", default_value = "")]
        token: String,

        /// Answer from the model alone; never query the document drive.
        #[arg(long)]
        no_retrieval: bool,
    },

    /// Run the similarity retrieval loop directly.
    ///
    /// Prints the accumulated chunk text and the deduplicated source links.
    /// Useful for inspecting what a given query would feed the model.
    Retrieve {
        /// The query text to find similar documents for.
        query: String,

        /// Document-store access token for the asking user.
        #[arg(long, env = "DRIVE_AUTH_TOKEN", default_value = "")]
        token: String,

        /// Override the configured soft minimum of documents to gather.
        #[arg(long)]
        min_documents: Option<usize>,
    },

    /// Start a server.
    Serve {
        #[command(subcommand)]
        service: ServeService,
    },
}

/// Server subcommands.
#[derive(Subcommand)]
enum ServeService {
    /// Start the same-origin relay for browser clients.
    Relay,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Ask {
            message,
            token,
            no_retrieval,
        } => {
            let orchestrator = Orchestrator::from_config(&cfg)?;
            let conversation = vec![Message::user(message)];
            let conversation = orchestrator
                .respond(conversation, &token, !no_retrieval)
                .await?;

            let answer = conversation.last();
            if let Some(Message::Assistant { content, links, .. }) = answer {
                println!("{}", content.as_deref().unwrap_or(""));
                if !links.is_empty() {
                    println!();
                    println!("Sources:");
                    for link in links {
                        println!("  {} — {}", link.name, link.href);
                    }
                }
            }
        }
        Commands::Retrieve {
            query,
            token,
            min_documents,
        } => {
            let dispatcher = Arc::new(RateLimitedDispatcher::new(&cfg.dispatch)?);
            let retriever = Retriever::from_config(&cfg, dispatcher);
            let retrieval = retriever.retrieve(&token, &query, min_documents).await?;

            if retrieval.text.is_empty() {
                println!("No accessible documents found.");
            } else {
                println!("--- Retrieved text ---");
                println!("{}", retrieval.text);
            }
            println!();
            println!("--- Links ({}) ---", retrieval.links.len());
            for link in &retrieval.links {
                println!("  {} — {}", link.name, link.href);
            }
        }
        Commands::Serve { service } => match service {
            ServeService::Relay => {
                server::run_server(&cfg).await?;
            }
        },
    }

    Ok(())
}
