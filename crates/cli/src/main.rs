mod config;
mod error;

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Local, TimeZone};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use runtime::{Backend, Engine, ProviderBackend, ToolRegistry, TurnChunk};
use storage::{MessageStore, Role, StoredMessage, ThreadId};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use config::Config;
use error::{Error, Result};

const CONFIG_FILE: &str = "chatbot.toml";
const ENV_FILE: &str = ".env";
const DATABASE_FILE: &str = "chatbot.db";
const TITLE_WIDTH: usize = 40;

#[derive(Parser)]
#[command(name = "chatbot")]
#[command(about = "A persistent multi-turn chatbot", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive chat
    Chat {
        /// Resume or name a thread (prefix match supported)
        #[arg(short, long)]
        thread: Option<String>,
    },
    /// List conversation threads
    Threads {
        /// Show only the last N threads
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Show the messages of a thread
    History {
        /// Thread ID (prefix match supported)
        #[arg(short, long)]
        thread: String,
    },
}

#[tokio::main]
async fn main() {
    load_env_file(Path::new(ENV_FILE));
    init_tracing();
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Logs go to stderr so they never mix with the transcript.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    match cli.command {
        Some(Commands::Chat { thread }) => cmd_chat(&config, thread.as_deref()).await,
        None => cmd_chat(&config, None).await,
        Some(Commands::Threads { limit }) => cmd_threads(&config, limit),
        Some(Commands::History { thread }) => cmd_history(&config, &thread),
    }
}

/// Export variables from a `.env` file (API keys, `RUST_LOG`). Variables
/// already set in the environment are left alone.
fn load_env_file(path: &Path) -> bool {
    dotenv::from_path(path).is_ok()
}

async fn cmd_chat(config: &Config, thread: Option<&str>) -> Result<()> {
    println!("chatbot v{}", env!("CARGO_PKG_VERSION"));

    let backend = ProviderBackend::from_config(&config.model)?;

    let db_path = database_path(config);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = Arc::new(MessageStore::open(&db_path)?);
    println!("Conversations stored at: {}", db_path.display());

    let tools = if config.tools.enabled {
        ToolRegistry::standard(config.tools.search())?
    } else {
        ToolRegistry::new()
    };

    let mut engine = Engine::new(Arc::clone(&store), backend, Arc::new(tools))
        .with_max_tool_calls(config.tools.max_tool_calls);
    if !config.tools.enabled {
        engine = engine.without_tools();
    }
    if let Some(prompt) = &config.system_prompt {
        engine = engine.with_system(prompt.clone());
    }

    let mut thread_id = match thread {
        Some(prefix) => match find_thread(&store, prefix) {
            Ok(id) => {
                print_history(&store, &id)?;
                id
            }
            Err(Error::ThreadNotFound { .. }) => ThreadId::new(prefix)?,
            Err(e) => return Err(e),
        },
        None => ThreadId::generate(),
    };

    println!("Model: {}", engine.backend());
    println!("Thread: {thread_id}");
    println!("Commands: /new, /threads, /switch <id>, /quit\n");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            // EOF
            break;
        }

        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match input {
            "/quit" | "quit" | "exit" => break,
            "/new" => {
                thread_id = ThreadId::generate();
                println!("Started thread {thread_id}\n");
                continue;
            }
            "/threads" => {
                if let Err(e) = print_threads(&store, 10) {
                    eprintln!("Error: {e}\n");
                }
                continue;
            }
            _ => {}
        }

        if let Some(rest) = input.strip_prefix("/switch") {
            let prefix = rest.trim();
            if prefix.is_empty() {
                eprintln!("Usage: /switch <thread id>\n");
                continue;
            }
            match find_thread(&store, prefix) {
                Ok(id) => {
                    thread_id = id;
                    println!("Switched to thread {thread_id}");
                    if let Err(e) = print_history(&store, &thread_id) {
                        eprintln!("Error: {e}");
                    }
                }
                Err(e) => eprintln!("Error: {e}\n"),
            }
            continue;
        }
        if input.starts_with('/') {
            eprintln!("Unknown command: {input}\n");
            continue;
        }

        let outcome = if config.model.streaming {
            stream_turn(&engine, &thread_id, input).await
        } else {
            engine
                .advance(&thread_id, input)
                .await
                .map(|reply| println!("\n{}\n", reply.content))
        };
        if let Err(e) = outcome {
            eprintln!("\nError: {e}\n");
        }
    }

    drop(engine);
    if let Ok(store) = Arc::try_unwrap(store) {
        store.close()?;
    }
    println!("\nGoodbye.");
    Ok(())
}

async fn stream_turn<B: Backend>(
    engine: &Engine<B>,
    thread_id: &ThreadId,
    input: &str,
) -> runtime::Result<()> {
    let mut stream = engine.advance_streaming(thread_id, input).await?;
    let mut stdout = io::stdout();

    println!();
    while let Some(chunk) = stream.next().await {
        match chunk? {
            TurnChunk::Delta(text) => {
                print!("{text}");
                stdout.flush().ok();
            }
            TurnChunk::Complete(_) => println!("\n"),
        }
    }
    Ok(())
}

fn cmd_threads(config: &Config, limit: usize) -> Result<()> {
    let store = open_store(config)?;
    print_threads(&store, limit)
}

fn print_threads(store: &MessageStore, limit: usize) -> Result<()> {
    let summaries = store.thread_summaries()?;

    if summaries.is_empty() {
        println!("No threads found.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<16}  {:<6}  TITLE",
        "THREAD ID", "UPDATED", "MSGS"
    );
    println!("{}", "-".repeat(100));

    for summary in summaries.into_iter().take(limit) {
        let updated = Local
            .from_utc_datetime(&summary.updated_at.naive_utc())
            .format("%Y-%m-%d %H:%M");
        let title = summary
            .first_message
            .as_deref()
            .map(|text| truncate(text, TITLE_WIDTH))
            .unwrap_or_default();
        println!(
            "{:<36}  {:<16}  {:<6}  {title}",
            summary.thread_id, updated, summary.message_count
        );
    }

    Ok(())
}

fn cmd_history(config: &Config, prefix: &str) -> Result<()> {
    let store = open_store(config)?;
    let thread_id = find_thread(&store, prefix)?;

    println!("Thread: {thread_id}\n");
    print_history(&store, &thread_id)
}

fn print_history(store: &MessageStore, thread_id: &ThreadId) -> Result<()> {
    let messages = store.load_stored(thread_id)?;
    if messages.is_empty() {
        println!("No messages in thread {thread_id}");
        return Ok(());
    }
    for message in &messages {
        println!("{}", format_stored(message));
    }
    println!();
    Ok(())
}

fn format_stored(stored: &StoredMessage) -> String {
    let time = Local
        .from_utc_datetime(&stored.created_at.naive_utc())
        .format("%H:%M:%S");
    let message = &stored.message;

    match (message.role, &message.tool_call) {
        (Role::User, _) => format!("[{time}] USER: {}", message.content),
        (Role::Assistant, None) => format!("[{time}] ASSISTANT: {}", message.content),
        (Role::Assistant, Some(call)) => {
            format!("[{time}] TOOL CALL: {}({})", call.name, call.argument)
        }
        (Role::Tool, call) => {
            let name = call.as_ref().map_or("tool", |call| call.name.as_str());
            format!("[{time}] TOOL RESULT: {name} -> {}", message.content)
        }
    }
}

/// Shorten `text` to at most `width` characters.
fn truncate(text: &str, width: usize) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() <= width && line.len() == text.len() {
        return line.to_string();
    }
    let kept: String = line.chars().take(width.saturating_sub(3)).collect();
    format!("{kept}...")
}

/// Resolve a thread by exact id or unique prefix.
fn find_thread(store: &MessageStore, prefix: &str) -> Result<ThreadId> {
    let threads = store.list_threads()?;
    if let Some(exact) = threads.iter().find(|id| id.as_str() == prefix) {
        return Ok(exact.clone());
    }

    let mut matching: Vec<ThreadId> = threads
        .into_iter()
        .filter(|id| id.as_str().starts_with(prefix))
        .collect();

    match matching.len() {
        0 => Err(Error::ThreadNotFound {
            prefix: prefix.to_string(),
        }),
        1 => Ok(matching.remove(0)),
        _ => Err(Error::AmbiguousThread {
            prefix: prefix.to_string(),
            matches: matching.iter().map(ToString::to_string).collect(),
        }),
    }
}

fn database_path(config: &Config) -> PathBuf {
    config.storage.path.clone().unwrap_or_else(|| {
        dirs_data_dir()
            .unwrap_or_else(|| ".chatbot".into())
            .join(DATABASE_FILE)
    })
}

fn open_store(config: &Config) -> Result<MessageStore> {
    let db_path = database_path(config);

    if !db_path.exists() {
        return Err(Error::DatabaseNotFound { path: db_path });
    }

    Ok(MessageStore::open(&db_path)?)
}

fn dirs_data_dir() -> Option<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share/chatbot"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share")))
            .map(|p| p.join("chatbot"))
    }
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|h| PathBuf::from(h).join("chatbot"))
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::{Message, ToolCall};

    fn store_with(threads: &[&str]) -> MessageStore {
        let store = MessageStore::in_memory().unwrap();
        for id in threads {
            store
                .append(&ThreadId::new(*id).unwrap(), &Message::user("hi"))
                .unwrap();
        }
        store
    }

    #[test]
    fn finds_thread_by_unique_prefix() {
        let store = store_with(&["abc123", "abd456"]);
        assert_eq!(find_thread(&store, "abc").unwrap().as_str(), "abc123");
        assert!(matches!(
            find_thread(&store, "ab"),
            Err(Error::AmbiguousThread { .. })
        ));
        assert!(matches!(
            find_thread(&store, "zz"),
            Err(Error::ThreadNotFound { .. })
        ));
    }

    #[test]
    fn exact_id_wins_over_longer_matches() {
        let store = store_with(&["work", "workshop"]);
        assert_eq!(find_thread(&store, "work").unwrap().as_str(), "work");
    }

    #[test]
    fn env_file_variables_are_exported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(ENV_FILE);
        std::fs::write(&path, "CHATBOT_ENV_FILE_TEST_KEY=from-dotenv\n").unwrap();

        assert!(load_env_file(&path));
        assert_eq!(
            std::env::var("CHATBOT_ENV_FILE_TEST_KEY").as_deref(),
            Ok("from-dotenv")
        );
    }

    #[test]
    fn missing_env_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!load_env_file(&dir.path().join(ENV_FILE)));
    }

    #[test]
    fn truncates_long_titles() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a much longer title", 10), "a much ...");
        assert_eq!(truncate("line one\nline two", 40), "line one...");
        assert_eq!(truncate("héllo wörld", 8), "héllo...");
    }

    #[test]
    fn configured_database_path_wins() {
        let mut config = Config::default();
        config.storage.path = Some(PathBuf::from("/tmp/custom.db"));
        assert_eq!(database_path(&config), PathBuf::from("/tmp/custom.db"));
        assert!(database_path(&Config::default()).ends_with(DATABASE_FILE));
    }

    #[test]
    fn history_lines_show_tool_traffic() {
        let store = MessageStore::in_memory().unwrap();
        let thread = ThreadId::new("t1").unwrap();
        let call = ToolCall::new("calculator", "2+2");
        store
            .append_all(
                &thread,
                &[
                    Message::user("2+2?"),
                    Message::tool_request("", call.clone()),
                    Message::tool_result(call, "4"),
                    Message::assistant("4"),
                ],
            )
            .unwrap();

        let lines: Vec<String> = store
            .load_stored(&thread)
            .unwrap()
            .iter()
            .map(format_stored)
            .collect();
        assert!(lines[0].ends_with("USER: 2+2?"));
        assert!(lines[1].ends_with("TOOL CALL: calculator(2+2)"));
        assert!(lines[2].ends_with("TOOL RESULT: calculator -> 4"));
        assert!(lines[3].ends_with("ASSISTANT: 4"));
    }
}
