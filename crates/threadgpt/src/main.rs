//! Replay recorded chat threads through the bot, or count tokens.
//!
//! Reads the API key from the `OPENAI_API_KEY` environment variable.
//!
//! # Examples
//!
//! ```sh
//! # Replay a recorded thread against the real API
//! threadgpt replay thread.json
//!
//! # Same, offline: the model is replaced by a stub that describes each request
//! threadgpt replay thread.json --dry-run
//!
//! # Settings from a config file, with a model override
//! threadgpt --config bot.json --model gpt-4 replay thread.json
//!
//! # Count tokens
//! cat notes.txt | threadgpt tokens --model gpt-3.5-turbo
//! ```

use std::io::{self, Read};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use threadgpt::api::{CompletionBackend, CompletionFuture, CompletionRequest, CompletionResponse, CompletionUsage};
use threadgpt::bot::replay::{ReplayStep, Thread, replay};
use threadgpt::bot::{Bot, BotConfig, Outcome};
use threadgpt::context::TokenCounter;
use threadgpt::platform::Reply;
use threadgpt::{Error, OpenAiClient, Result};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Chat-thread gateway to an LLM chat-completion API.
#[derive(Parser)]
#[command(name = "threadgpt", version)]
struct Cli {
    /// JSON config file; missing fields take their defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Model to use (overrides the config file)
    #[arg(long, global = true)]
    model: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay a recorded thread and print the bot's replies
    Replay {
        /// Thread file (JSON)
        thread: PathBuf,

        /// Base URL of the chat-completion API
        #[arg(long)]
        api_base_url: Option<String>,

        /// Context window of the model, in tokens
        #[arg(long)]
        context_window: Option<usize>,

        /// Only answer explicit commands, never passive mentions
        #[arg(long)]
        no_passive: bool,

        /// Answer with a local stub instead of calling the API
        #[arg(long)]
        dry_run: bool,

        /// API key
        #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
    },
    /// Count the tokens of stdin
    Tokens,
}

/// Stand-in backend for `--dry-run`: describes the request it was given.
struct DryRunBackend;

impl CompletionBackend for DryRunBackend {
    fn create_completion(&self, request: CompletionRequest) -> CompletionFuture<'_> {
        Box::pin(async move {
            let text = format!(
                "[dry run] {} message(s) for {}, max_tokens={}",
                request.messages.len(),
                request.model,
                request.max_tokens
            );
            Ok(CompletionResponse {
                text,
                usage: CompletionUsage::default(),
            })
        })
    }
}

fn load_config(cli: &Cli) -> Result<BotConfig> {
    let mut config = match &cli.config {
        Some(path) => BotConfig::load(path)?,
        None => BotConfig::default(),
    };
    if let Some(model) = &cli.model {
        config = config.with_model(model);
    }
    Ok(config)
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = load_config(&cli)?;

    match cli.command {
        Command::Tokens => {
            let mut input = String::new();
            io::stdin()
                .read_to_string(&mut input)
                .map_err(|e| Error::Config(format!("failed to read stdin: {e}")))?;
            let count = TokenCounter::new().count(&config.model, &input)?;
            println!("{count}");
        }
        Command::Replay {
            thread,
            api_base_url,
            context_window,
            no_passive,
            dry_run,
            api_key,
        } => {
            if let Some(url) = api_base_url {
                config = config.with_api_base_url(url);
            }
            if let Some(tokens) = context_window {
                config = config.with_context_window(tokens);
            }
            if no_passive {
                config = config.with_passive_mentions(false);
            }
            config.validate()?;

            let backend: Arc<dyn CompletionBackend> = if dry_run {
                Arc::new(DryRunBackend)
            } else {
                let key = api_key
                    .ok_or_else(|| Error::Config("OPENAI_API_KEY not set (or use --dry-run)".into()))?;
                Arc::new(OpenAiClient::new(key, &config.api_base_url)?)
            };

            let thread = Thread::load(&thread)?;
            let platform = Arc::new(thread.platform());
            let bot = Bot::new(config, platform.clone(), backend);

            for step in replay(&bot, &platform, &thread.events).await? {
                print_step(&step);
            }
            println!("{}", bot.usage().presence_line());
        }
    }
    Ok(())
}

fn print_step(step: &ReplayStep) {
    let label = match &step.outcome {
        None => "ignored",
        Some(Outcome::Answered { .. }) => "answered",
        Some(Outcome::SystemMessageSet { .. }) => "system message set",
        Some(Outcome::Failed { .. }) => "failed",
    };
    println!("# event {}: {label}", step.event);
    for id in &step.deleted {
        println!("  deleted {id}");
    }
    for reply in &step.sent {
        match &reply.reply {
            Reply::Text { content } => println!("  {} -> {}: {content}", reply.in_reply_to, reply.id),
            Reply::File { filename, content } => println!(
                "  {} -> {}: [{filename}, {} bytes]\n{}",
                reply.in_reply_to,
                reply.id,
                content.len(),
                String::from_utf8_lossy(content)
            ),
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
