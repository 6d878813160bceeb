use anyhow::{anyhow, bail, Context};
use chrono::{Local, Utc};
use clap::{Args, Parser, Subcommand};
use rag_chat_core::chunking::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use rag_chat_core::config::{DEFAULT_HISTORY_WINDOW, DEFAULT_RETRIEVAL_TOP_K, DEFAULT_SYSTEM_PROMPT};
use rag_chat_core::{
    discover_text_files, index_chunks, load_documents, BackendRegistry, ChatConfig, Chunker,
    ChunkingConfig, ConversationSession, Embedder, MemoryIndex, Provider, QdrantStore,
    QueryOrchestrator, Retrieval, Role, RollingHashEmbedder, VectorIndex,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_DATA_FILES: [&str; 3] = ["data.txt", "knowledge.txt", "info.txt"];

#[derive(Parser)]
#[command(name = "rag-chat", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Generation provider: groq, openai, anthropic, gemini or openrouter
    #[arg(long, env = "LLM_PROVIDER", default_value = "groq", global = true)]
    provider: String,

    /// Model name; defaults to the provider's standard chat model
    #[arg(long, env = "LLM_MODEL", global = true)]
    model: Option<String>,

    /// Qdrant base URL. Without it chunks live in memory for this run only.
    #[arg(long, env = "QDRANT_URL", global = true)]
    qdrant_url: Option<String>,

    /// Qdrant collection
    #[arg(long, default_value = "rag_chunks", global = true)]
    qdrant_collection: String,

    /// Maximum characters per chunk
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE, global = true)]
    chunk_size: usize,

    /// Characters shared by consecutive chunks
    #[arg(long, default_value_t = DEFAULT_CHUNK_OVERLAP, global = true)]
    chunk_overlap: usize,

    /// Number of chunks retrieved per question
    #[arg(long, default_value_t = DEFAULT_RETRIEVAL_TOP_K, global = true)]
    top_k: usize,

    /// Trailing turns sent with each request
    #[arg(long, default_value_t = DEFAULT_HISTORY_WINDOW, global = true)]
    history_window: usize,

    /// System prompt sent ahead of the conversation
    #[arg(long, env = "SYSTEM_PROMPT", global = true)]
    system_prompt: Option<String>,
}

#[derive(Args, Default)]
struct Sources {
    /// Text files to index (repeatable)
    #[arg(long = "data")]
    data: Vec<PathBuf>,

    /// Folder scanned recursively for .txt and .md files
    #[arg(long)]
    folder: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive chat grounded in the indexed documents (default).
    Chat {
        #[command(flatten)]
        sources: Sources,
        /// Skip retrieval and chat with the backend directly.
        #[arg(long, default_value_t = false)]
        no_retrieval: bool,
    },
    /// Chunk, embed and store documents in Qdrant.
    Ingest {
        #[command(flatten)]
        sources: Sources,
    },
    /// Print the chunks retrieved for a query.
    Search {
        #[arg(long)]
        query: String,
        #[command(flatten)]
        sources: Sources,
    },
}

#[derive(Debug, PartialEq, Eq)]
enum ChatCommand<'a> {
    Exit,
    History,
    Clear,
    Backend,
    SwitchUsage,
    Switch { provider: &'a str, model: &'a str },
    Ask(&'a str),
}

impl<'a> ChatCommand<'a> {
    fn parse(input: &'a str) -> Self {
        let words: Vec<&'a str> = input.split_whitespace().collect();
        let Some((first, rest)) = words.split_first() else {
            return Self::Ask(input);
        };

        // model names can be case-sensitive, so only the keyword is folded
        match (first.to_lowercase().as_str(), rest) {
            ("exit" | "quit", []) => Self::Exit,
            ("history", []) => Self::History,
            ("clear", []) => Self::Clear,
            ("backend", []) => Self::Backend,
            ("switch", [provider]) => Self::Switch {
                provider: *provider,
                model: "",
            },
            ("switch", [provider, model]) => Self::Switch {
                provider: *provider,
                model: *model,
            },
            ("switch", _) => Self::SwitchUsage,
            _ => Self::Ask(input),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut cli = Cli::parse();
    let config = chat_config(&cli);
    config
        .validate()
        .map_err(|error| anyhow!(error.to_string()))?;

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "rag-chat boot"
    );

    let command = cli.command.take().unwrap_or(Command::Chat {
        sources: Sources::default(),
        no_retrieval: false,
    });

    match command {
        Command::Chat {
            sources,
            no_retrieval,
        } => run_chat(&cli, &config, &sources, no_retrieval).await,
        Command::Ingest { sources } => {
            if cli.qdrant_url.is_none() {
                bail!("ingest needs --qdrant-url; in-memory chunks would be lost on exit");
            }
            let embedder = RollingHashEmbedder::default();
            let index = open_index(&cli, embedder.dimensions()).await?;
            let stored = populate(&config, &embedder, index.as_ref(), &sources, true).await?;
            println!("{stored} chunks ingested at {}", Utc::now().to_rfc3339());
            Ok(())
        }
        Command::Search { query, sources } => {
            let embedder = RollingHashEmbedder::default();
            let index = open_index(&cli, embedder.dimensions()).await?;
            populate(&config, &embedder, index.as_ref(), &sources, false).await?;

            let results = index
                .search(&embedder.embed(&query), config.retrieval_top_k)
                .await
                .map_err(|error| anyhow!(error.to_string()))?;

            println!("query: {query}");
            for (position, result) in results.iter().enumerate() {
                println!(
                    "[{}] similarity={:.4} source={} chunk={}",
                    position + 1,
                    result.similarity,
                    result.source,
                    result.ordinal
                );
                println!("{}\n", result.content);
            }
            Ok(())
        }
    }
}

fn chat_config(cli: &Cli) -> ChatConfig {
    ChatConfig {
        system_prompt: cli
            .system_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        history_window: cli.history_window,
        retrieval_top_k: cli.top_k,
        chunking: ChunkingConfig {
            chunk_size: cli.chunk_size,
            overlap: cli.chunk_overlap,
        },
    }
}

fn credential_for(provider: Provider) -> anyhow::Result<String> {
    let variable = provider.credential_env_var();
    std::env::var(variable)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| anyhow!("no API key found for {provider}; set {variable}"))
}

async fn open_index(cli: &Cli, dimensions: usize) -> anyhow::Result<Arc<dyn VectorIndex>> {
    match &cli.qdrant_url {
        Some(url) => {
            let store = QdrantStore::new(url, &cli.qdrant_collection, dimensions);
            store
                .ensure_collection()
                .await
                .map_err(|error| anyhow!(error.to_string()))?;
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(MemoryIndex::new(dimensions))),
    }
}

fn resolve_sources(sources: &Sources) -> Vec<PathBuf> {
    let mut paths = sources.data.clone();
    if let Some(folder) = &sources.folder {
        paths.extend(discover_text_files(folder));
    }
    if paths.is_empty() {
        paths = DEFAULT_DATA_FILES
            .iter()
            .map(PathBuf::from)
            .filter(|path| path.is_file())
            .collect();
    }
    paths
}

/// Loads documents into `index`. Unless `force` is set, an index that already
/// holds chunks is left alone.
async fn populate(
    config: &ChatConfig,
    embedder: &dyn Embedder,
    index: &dyn VectorIndex,
    sources: &Sources,
    force: bool,
) -> anyhow::Result<usize> {
    let existing = index
        .count()
        .await
        .map_err(|error| anyhow!(error.to_string()))?;
    if existing > 0 && !force {
        info!(chunk_count = existing, "index already populated");
        return Ok(0);
    }

    let paths = resolve_sources(sources);
    if paths.is_empty() {
        warn!("no data files found; answers will not be grounded in any documents");
        return Ok(0);
    }

    let chunker = Chunker::new(config.chunking).map_err(|error| anyhow!(error.to_string()))?;
    let chunks = load_documents(&chunker, &paths)
        .await
        .map_err(|error| anyhow!(error.to_string()))?;
    let report = index_chunks(embedder, index, &chunks).await;

    for skipped in &report.skipped {
        warn!(chunk_id = %skipped.chunk_id, reason = %skipped.reason, "skipped chunk");
    }
    info!(files = paths.len(), stored = report.stored, "documents indexed");
    Ok(report.stored)
}

async fn run_chat(
    cli: &Cli,
    config: &ChatConfig,
    sources: &Sources,
    no_retrieval: bool,
) -> anyhow::Result<()> {
    let provider: Provider = cli
        .provider
        .parse()
        .map_err(|error: rag_chat_core::BackendError| anyhow!(error.to_string()))?;
    let credential = credential_for(provider)?;
    let model = cli.model.clone().unwrap_or_default();

    let session = ConversationSession::connect(
        config,
        BackendRegistry::new(),
        provider.as_str(),
        &model,
        &credential,
    )
    .map_err(|error| anyhow!(error.to_string()))?;
    let session = Arc::new(session);

    let retrieval = if no_retrieval {
        None
    } else {
        let embedder = Arc::new(RollingHashEmbedder::default());
        let index = open_index(cli, embedder.dimensions()).await?;
        let stored = populate(config, embedder.as_ref(), index.as_ref(), sources, false).await?;
        if stored > 0 {
            println!("✓ Stored {stored} chunks");
        }
        Some(Retrieval {
            embedder,
            index,
            top_k: config.retrieval_top_k,
        })
    };

    let orchestrator = QueryOrchestrator::new(Arc::clone(&session), retrieval);
    println!("rag-chat {}", env!("CARGO_PKG_VERSION"));
    println!("backend: {}", session.active_handle().await.id());
    println!("commands: history, clear, backend, switch <provider> [model], exit\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("You ({}): ", Local::now().format("%H:%M:%S"));
        std::io::stdout().flush().context("flush stdout")?;

        let Some(line) = lines.next_line().await.context("read stdin")? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        let input = match ChatCommand::parse(input) {
            ChatCommand::Exit => {
                println!("Goodbye!");
                break;
            }
            ChatCommand::History => {
                let history = session.history(None).await;
                println!("\nConversation history ({} messages):", history.len());
                for turn in history {
                    let speaker = match turn.role {
                        Role::User => "You".to_string(),
                        _ => format!("Bot [{}]", turn.backend_id),
                    };
                    println!(
                        "{speaker} ({}): {}",
                        turn.created_at.with_timezone(&Local).format("%H:%M:%S"),
                        turn.content
                    );
                }
                println!();
                continue;
            }
            ChatCommand::Clear => {
                print!("\x1b[H\x1b[2J");
                println!("Screen cleared. Conversation history: {} messages\n", session.len().await);
                continue;
            }
            ChatCommand::Backend => {
                println!("backend: {}\n", session.active_handle().await.id());
                continue;
            }
            ChatCommand::SwitchUsage => {
                eprintln!("usage: switch <provider> [model]\n");
                continue;
            }
            ChatCommand::Switch { provider, model } => {
                let switched = match provider.parse::<Provider>() {
                    Ok(parsed) => match credential_for(parsed) {
                        Ok(credential) => session
                            .switch_backend(provider, model, &credential)
                            .await
                            .map_err(|error| anyhow!(error.to_string())),
                        Err(error) => Err(error),
                    },
                    Err(error) => Err(anyhow!(error.to_string())),
                };
                match switched {
                    Ok(handle) => println!("switched to {}\n", handle.id()),
                    Err(error) => eprintln!("switch failed: {error}\n"),
                }
                continue;
            }
            ChatCommand::Ask(question) => question,
        };

        let cancel = async {
            let _ = tokio::signal::ctrl_c().await;
        };
        match orchestrator.answer_with_cancel(input, cancel).await {
            Ok(answer) => println!("\nBot ({}): {answer}\n", Local::now().format("%H:%M:%S")),
            Err(error) => eprintln!("\nerror: {error}\n"),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::ChatCommand;

    #[test]
    fn parses_loop_keywords_case_insensitively() {
        assert_eq!(ChatCommand::parse("exit"), ChatCommand::Exit);
        assert_eq!(ChatCommand::parse("QUIT"), ChatCommand::Exit);
        assert_eq!(ChatCommand::parse("History"), ChatCommand::History);
        assert_eq!(ChatCommand::parse("clear"), ChatCommand::Clear);
        assert_eq!(ChatCommand::parse("backend"), ChatCommand::Backend);
    }

    #[test]
    fn bare_switch_asks_for_usage_instead_of_querying() {
        assert_eq!(ChatCommand::parse("switch"), ChatCommand::SwitchUsage);
        assert_eq!(ChatCommand::parse("SWITCH"), ChatCommand::SwitchUsage);
        assert_eq!(
            ChatCommand::parse("switch groq model extra"),
            ChatCommand::SwitchUsage
        );
    }

    #[test]
    fn switch_keeps_model_case() {
        assert_eq!(
            ChatCommand::parse("Switch anthropic Claude-Model"),
            ChatCommand::Switch {
                provider: "anthropic",
                model: "Claude-Model",
            }
        );
        assert_eq!(
            ChatCommand::parse("switch gemini"),
            ChatCommand::Switch {
                provider: "gemini",
                model: "",
            }
        );
    }

    #[test]
    fn everything_else_is_a_question() {
        assert_eq!(
            ChatCommand::parse("history of Go?"),
            ChatCommand::Ask("history of Go?")
        );
        assert_eq!(
            ChatCommand::parse("what is a switch statement"),
            ChatCommand::Ask("what is a switch statement")
        );
    }
}
