//! Terminal coding assistant powered by quill-rs.
//!
//! Reads the API key from the `OPENROUTER_KEY` environment variable.
//!
//! # Examples
//!
//! ```sh
//! # One-shot
//! quill "What does src/lib.rs export?"
//!
//! # Interactive
//! quill -i --cwd /path/to/project
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use quill_code::{CodeConfig, ConsoleLayer, Repl, WorkspacePrompt};
use quill_rs::prelude::*;
use quill_rs::telemetry::DEFAULT_DEBUG_DIR;
use quill_rs::{DEFAULT_MODEL, DEFAULT_PRO_MODEL};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Terminal coding assistant with a token-bounded conversation context.
#[derive(Parser)]
#[command(name = "quill", version)]
struct Cli {
    /// Query to run. Without it (and without -i) a usage message is shown.
    query: Vec<String>,

    /// Start an interactive session (after running the query, if any).
    #[arg(short, long)]
    interactive: bool,

    /// Working directory for the session.
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Show DEBUG logs.
    #[arg(short, long)]
    verbose: bool,

    /// Write prompts, requests, responses and tool calls to the debug directory.
    #[arg(short, long)]
    debug: bool,

    /// Start on the pro model.
    #[arg(long)]
    pro: bool,

    /// Standard model.
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    /// Pro model.
    #[arg(long, default_value = DEFAULT_PRO_MODEL)]
    pro_model: String,

    /// Maximum tool-calling round-trips per query.
    #[arg(long, default_value_t = 50)]
    max_rounds: u32,

    /// Maximum tokens per LLM response.
    #[arg(long, default_value_t = 16384)]
    max_tokens: u32,

    /// Sampling temperature.
    #[arg(long, default_value_t = 0.3)]
    temperature: f32,

    /// Interactions kept in the conversation history.
    #[arg(long, default_value_t = 10)]
    max_interactions: usize,

    /// Token ceiling for system prompt plus history.
    #[arg(long, default_value_t = 600_000)]
    max_context_tokens: usize,

    /// Directory for debug records.
    #[arg(long, default_value = DEFAULT_DEBUG_DIR)]
    debug_dir: PathBuf,

    /// Enable the council tool (queries several specialist models).
    #[arg(long)]
    council: bool,
}

impl Cli {
    fn code_config(&self) -> CodeConfig {
        CodeConfig {
            model: self.model.clone(),
            pro_model: self.pro_model.clone(),
            use_pro: self.pro,
            max_rounds: self.max_rounds,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            max_interactions: self.max_interactions,
            max_context_tokens: self.max_context_tokens,
            debug: self.debug,
            debug_dir: self.debug_dir.clone(),
            council: self.council,
            tool_timeout: None,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(ConsoleLayer::new(cli.verbose))
        .init();

    if cli.query.is_empty() && !cli.interactive {
        println!("{}", quill_code::repl::welcome_text());
        return;
    }

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    let config = cli.code_config();

    let cwd = match &cli.cwd {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().map_err(|e| format!("cannot read current directory: {e}"))?,
    };
    let cwd = std::fs::canonicalize(&cwd)
        .map_err(|e| format!("invalid working directory {}: {e}", cwd.display()))?;
    if !cwd.is_dir() {
        return Err(format!("{} is not a directory", cwd.display()));
    }
    let workdir = WorkingDir::new(&cwd);

    let api_key = std::env::var("OPENROUTER_KEY")
        .map_err(|_| "OPENROUTER_KEY environment variable is not set".to_string())?;
    let client = Arc::new(
        OpenRouterClient::with_headers(api_key, "https://crates.io/crates/quill-code", "quill-code")
            .map_err(|e| format!("failed to create API client: {e}"))?,
    );

    let debug_sink = config.build_debug_sink();
    let tools = Arc::new(config.build_tool_set(&workdir, client.clone()));
    info!("Loaded {} tools: {}", tools.len(), tools.names().join(", "));

    let handler = CompositeEventHandler::new()
        .with(LoggingHandler)
        .with_opt(
            debug_sink
                .is_enabled()
                .then(|| DebugEventHandler::new(debug_sink.clone())),
        );
    let factory = Arc::new(
        ToolLoopDriverFactory::new(client, tools, config.build_driver_config())
            .with_event_handler(Arc::new(handler)),
    );
    let driver = factory.build(config.initial_model())?;
    info!("Using model {}", driver.model());

    let mut context = config.build_context_manager();
    context.set_system_prompt(WorkspacePrompt.build(&cwd));

    let session = Session::new(context, driver)
        .with_models(config.models())
        .with_driver_factory(factory)
        .with_prompt_source(Arc::new(WorkspacePrompt))
        .with_debug_sink(debug_sink);
    let mut repl = Repl::new(session, workdir);

    let mut stdout = std::io::stdout();
    if !cli.query.is_empty() {
        let query = cli.query.join(" ");
        repl.query(&query, &mut stdout)
            .await
            .map_err(|e| format!("write failed: {e}"))?;
    }
    if cli.interactive {
        println!("Type 'help' for commands, 'exit' to quit.");
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        repl.run(stdin, &mut stdout).await?;
    }
    Ok(())
}
