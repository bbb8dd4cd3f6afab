//! llmgate - a command-line client for LLM gateways.
//!
//! Sends prompts to an OpenRouter-compatible chat-completions API, streams
//! replies, lists models, and in `yolo` mode lets the model drive a shell
//! until it reaches a goal or runs out of steps.

mod agent;
mod config;
mod context;
mod gateway;
mod input;
mod output;
mod shell;

use agent::{Agent, AgentConfig};
use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use config::{Config, Overrides, Settings};
use gateway::{
    ChatMessage, ChatRequest, Gateway, HttpGateway, ModelFilter, ResponseFormat, SamplingParams,
    StreamDelta, WebEngine, WebSearchConfig,
};
use input::PromptSources;
use shell::SystemShell;
use std::path::PathBuf;
use std::process::Command as ProcessCommand;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "llmgate")]
#[command(author, version, about = "A command-line client for LLM gateways")]
#[command(long_about = "Sends prompts to an OpenRouter-compatible gateway.\n\n\
    `yolo` lets the model run shell commands on this machine WITHOUT confirmation.")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// API key (overrides OPENROUTER_API_KEY)
    #[arg(long, global = true, value_name = "KEY")]
    api_key: Option<String>,

    /// Gateway base URL (overrides OPENROUTER_BASE_URL)
    #[arg(long, global = true, value_name = "URL")]
    base_url: Option<String>,

    /// Value for the HTTP-Referer header
    #[arg(long, global = true, value_name = "URL")]
    referer: Option<String>,

    /// Value for the X-Title header
    #[arg(long, global = true, value_name = "TITLE")]
    title: Option<String>,

    /// Enable debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a prompt and print the reply
    Chat(ChatArgs),
    /// Let the model run shell commands until a goal is reached
    Yolo(YoloArgs),
    /// List models available on the gateway
    Models(ModelsArgs),
    /// Open configuration file in $EDITOR
    Config {
        /// Only print the configuration file path
        #[arg(long)]
        path: bool,
    },
}

/// Prompt and output flags shared by `chat` and `yolo`.
#[derive(Args)]
struct PromptArgs {
    /// Prompt text (read from stdin when omitted and stdin is piped)
    #[arg(value_name = "PROMPT")]
    prompt: Vec<String>,

    /// Model to use (overrides OPENROUTER_MODEL)
    #[arg(short = 'm', long, value_name = "MODEL")]
    model: Option<String>,

    /// System prompt
    #[arg(short = 's', long, value_name = "TEXT")]
    system: Option<String>,

    /// Append a file's contents to the prompt (repeatable)
    #[arg(short = 'f', long = "file", value_name = "PATH")]
    files: Vec<PathBuf>,

    /// Also read the prompt from stdin
    #[arg(long)]
    stdin: bool,

    /// Print raw JSON instead of formatted text
    #[arg(long)]
    json: bool,
}

impl PromptArgs {
    fn sources(&self) -> PromptSources {
        PromptSources {
            words: self.prompt.clone(),
            files: self.files.clone(),
            force_stdin: self.stdin,
        }
    }
}

#[derive(Args)]
struct SamplingArgs {
    /// Sampling temperature
    #[arg(long)]
    temperature: Option<f32>,

    /// Nucleus sampling probability mass
    #[arg(long)]
    top_p: Option<f32>,

    /// Maximum tokens to generate
    #[arg(long)]
    max_tokens: Option<u32>,
}

impl SamplingArgs {
    fn params(&self) -> SamplingParams {
        SamplingParams {
            temperature: self.temperature,
            top_p: self.top_p,
            max_tokens: self.max_tokens,
        }
    }
}

#[derive(Args)]
struct WebArgs {
    /// Let the gateway search the web before answering
    #[arg(long)]
    web: bool,

    /// Web search engine (implies --web)
    #[arg(long, value_enum, value_name = "ENGINE")]
    web_engine: Option<WebEngine>,

    /// Maximum number of web results (implies --web)
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    web_max_results: Option<u32>,

    /// Prompt used to attach search results (implies --web)
    #[arg(long, value_name = "TEXT")]
    web_search_prompt: Option<String>,
}

impl WebArgs {
    /// Merge flags over config defaults. `None` means web search is off.
    fn resolve(&self, defaults: Option<&WebSearchConfig>) -> Option<WebSearchConfig> {
        let requested = self.web
            || self.web_engine.is_some()
            || self.web_max_results.is_some()
            || self.web_search_prompt.is_some();
        if !requested && defaults.is_none() {
            return None;
        }

        let base = defaults.cloned().unwrap_or_default();
        Some(WebSearchConfig {
            engine: self.web_engine.or(base.engine),
            max_results: self.web_max_results.or(base.max_results),
            search_prompt: self.web_search_prompt.clone().or(base.search_prompt),
        })
    }
}

#[derive(Args)]
struct ChatArgs {
    #[command(flatten)]
    prompt: PromptArgs,

    #[command(flatten)]
    sampling: SamplingArgs,

    #[command(flatten)]
    web: WebArgs,

    /// Stream tokens as they are generated
    #[arg(long)]
    stream: bool,

    /// Ask the model for a JSON object reply
    #[arg(long)]
    json_mode: bool,
}

#[derive(Args)]
struct YoloArgs {
    #[command(flatten)]
    prompt: PromptArgs,

    #[command(flatten)]
    sampling: SamplingArgs,

    #[command(flatten)]
    web: WebArgs,

    /// Maximum number of commands to run
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    max_steps: Option<u32>,

    /// Shell that runs the commands (default: $SHELL, then /bin/sh)
    #[arg(long, value_name = "PATH")]
    shell: Option<String>,
}

#[derive(Args)]
struct ModelsArgs {
    /// Only show models whose id or name contains TEXT
    #[arg(long, value_name = "TEXT")]
    filter: Option<String>,

    /// Gateway-side category filter (e.g. programming)
    #[arg(long, value_name = "NAME")]
    category: Option<String>,

    /// Print raw JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        // Usage errors share the exit code of every other failure.
        Err(e) if e.use_stderr() => {
            let _ = e.print();
            std::process::exit(1);
        }
        Err(e) => e.exit(),
    };

    if let Err(e) = run(cli).await {
        eprintln!("{}", error_line(&e));
        std::process::exit(1);
    }
}

/// The single line printed for a fatal error, causes joined with `: `.
fn error_line(err: &anyhow::Error) -> String {
    format!("Error: {:#}", err)
}

async fn run(cli: Cli) -> Result<()> {
    init_logging(cli.global.verbose)?;

    match cli.command {
        Commands::Chat(args) => {
            let settings = load_settings(&cli.global, args.prompt.model.clone(), None, None)?;
            handle_chat(args, &settings).await
        }
        Commands::Yolo(args) => {
            let settings = load_settings(
                &cli.global,
                args.prompt.model.clone(),
                args.max_steps,
                args.shell.clone(),
            )?;
            handle_yolo(args, &settings).await
        }
        Commands::Models(args) => {
            let settings = load_settings(&cli.global, None, None, None)?;
            handle_models(args, &settings).await
        }
        Commands::Config { path } => handle_config(path),
    }
}

/// Initialize logging on stderr. `RUST_LOG` wins unless `--verbose` is set.
fn init_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::try_new("llmgate=debug,reqwest=info")?
    } else {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new("llmgate=warn,reqwest=warn"))?
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
    Ok(())
}

fn load_settings(
    global: &GlobalArgs,
    model: Option<String>,
    max_steps: Option<u32>,
    shell: Option<String>,
) -> Result<Settings> {
    let config = Config::load().context("Failed to load configuration")?;
    let overrides = Overrides {
        api_key: global.api_key.clone(),
        base_url: global.base_url.clone(),
        referer: global.referer.clone(),
        title: global.title.clone(),
        model,
        max_steps,
        shell,
    };
    let settings = Settings::from_env(&config, &overrides);
    debug!(
        "gateway {} model {} (api key {})",
        settings.base_url,
        settings.model,
        if settings.api_key.is_some() { "set" } else { "missing" }
    );
    Ok(settings)
}

/// Handle `chat`: one request, printed or streamed.
async fn handle_chat(args: ChatArgs, settings: &Settings) -> Result<()> {
    let prompt = args.prompt.sources().read()?;

    let mut messages = Vec::new();
    if let Some(system) = &args.prompt.system {
        messages.push(ChatMessage::system(system.clone()));
    }
    messages.push(ChatMessage::user(prompt));

    let web = args.web.resolve(settings.web.as_ref());
    let request = ChatRequest::new(settings.model.clone(), messages)
        .with_sampling(&args.sampling.params())
        .with_web(web.as_ref())
        .with_response_format(args.json_mode.then_some(ResponseFormat::JsonObject));

    let gateway = HttpGateway::new(settings)?;

    // Raw JSON needs the whole completion object, so --json disables streaming.
    if args.stream && !args.prompt.json {
        let mut printer = output::StreamPrinter::new();
        gateway
            .stream_chat(&request, &mut |delta: StreamDelta| printer.on_delta(delta))
            .await?;
        printer.finish();
        return Ok(());
    }

    let completion = gateway.complete_chat(&request).await?;
    if let Some(usage) = &completion.usage {
        debug!(
            "{} via {}: {} prompt + {} completion tokens",
            completion.id.as_deref().unwrap_or("completion"),
            completion.model.as_deref().unwrap_or(&settings.model),
            usage.prompt_tokens,
            usage.completion_tokens
        );
    }
    if !args.prompt.json && completion.content().is_none() {
        bail!("no content returned");
    }
    output::print_completion(&completion, args.prompt.json)
}

/// Handle `yolo`: run the command loop for the goal.
async fn handle_yolo(args: YoloArgs, settings: &Settings) -> Result<()> {
    if settings.max_steps == 0 {
        bail!("max_steps must be at least 1");
    }
    let goal = args.prompt.sources().read()?;

    let shell = SystemShell::new(settings.shell.as_deref());
    let environment = context::gather_environment(shell.shell());
    let system_prompt = agent::prompt::build_system_prompt(
        &environment,
        settings.max_steps,
        args.prompt.system.as_deref(),
    );

    let config = AgentConfig {
        model: settings.model.clone(),
        system_prompt,
        max_steps: settings.max_steps,
        sampling: args.sampling.params(),
        web: args.web.resolve(settings.web.as_ref()),
    };
    let gateway = HttpGateway::new(settings)?;

    info!(
        "yolo: model={} max_steps={} shell={}",
        config.model,
        config.max_steps,
        shell.shell()
    );

    let mut agent = Agent::new(&goal, &config, &gateway, &shell);
    let outcome = agent.run(&mut output::print_agent_event).await?;
    debug!("conversation ended with {} messages", agent.history().len());
    output::print_outcome(&outcome, args.prompt.json)
}

/// Handle `models`.
async fn handle_models(args: ModelsArgs, settings: &Settings) -> Result<()> {
    let gateway = HttpGateway::new(settings)?;
    let filter = ModelFilter {
        category: args.category,
        search: args.filter,
    };
    let models = gateway.list_models(&filter).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&models)?);
    } else {
        println!("{}", output::format_models(&models));
    }
    Ok(())
}

/// Handle the config command.
fn handle_config(path_only: bool) -> Result<()> {
    let config_path = Config::config_path()?;
    if path_only {
        println!("{}", config_path.display());
        return Ok(());
    }

    // Create default config if it doesn't exist
    if !config_path.exists() {
        Config::default().save()?;
        eprintln!("Created default config at {}", config_path.display());
    }

    let editor = std::env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());
    let status = ProcessCommand::new(&editor)
        .arg(&config_path)
        .status()
        .with_context(|| format!("Failed to open editor: {}", editor))?;

    if !status.success() {
        eprintln!("Editor exited with non-zero status");
    }
    Ok(())
}
