use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::collections::HashMap;
use std::io::{IsTerminal, Read};
use std::process::ExitCode;

use ziya_core::config::Config;
use ziya_core::context::oracle::DiskFileStateOracle;
use ziya_core::context::prompt_cache::PromptCache;
use ziya_core::model::anthropic::AnthropicDriver;
use ziya_core::model::bedrock_nova::BedrockNovaDriver;
use ziya_core::model::descriptor::{Family, ModelDescriptor, ParamKind, ParamValue};
use ziya_core::model::google::GoogleDriver;
use ziya_core::model::openai::OpenAiDriver;
use ziya_core::model::retry::CancelFlag;
use ziya_core::model::ModelDriver;
use ziya_core::prompt::{self, PromptInput};
use ziya_core::stream::loop_engine::{self, LoopConfig};
use ziya_core::stream::metrics::StreamMetrics;
use ziya_core::stream::sse;
use ziya_core::tools::{self, NullMcpManager};

#[derive(Parser)]
#[command(name = "ziya")]
#[command(author, version, about = "Streaming code-assistant agent runtime", long_about = None)]
struct Cli {
    /// Root directory for file path resolution; overrides USER_CODEBASE_DIR.
    #[arg(long, global = true)]
    root: Option<String>,
    /// AWS profile for Bedrock-family backends.
    #[arg(long, global = true)]
    profile: Option<String>,
    /// AWS region for Bedrock-family backends.
    #[arg(long, global = true)]
    region: Option<String>,
    /// Model alias within the selected endpoint.
    #[arg(long, global = true)]
    model: Option<String>,
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive multi-turn session (reads one question per invocation).
    Chat,
    /// Ask a single question and stream the answer.
    Ask { question: Vec<String> },
    /// Ask for a review of the codebase at --root.
    Review,
    /// Ask for an explanation of a file or symbol.
    Explain { target: Option<String> },
}

fn default_descriptor(family: Family) -> ModelDescriptor {
    use ParamKind::*;
    let mut supported = std::collections::HashSet::new();
    supported.insert(Temperature);
    supported.insert(MaxTokens);
    supported.insert(TopK);
    if family != Family::Anthropic {
        supported.insert(Stop);
    }

    ModelDescriptor {
        endpoint_tag: format!("{family:?}").to_lowercase(),
        region_model_ids: HashMap::new(),
        default_model_id: match family {
            Family::Anthropic => "claude-3-5-sonnet-20241022".to_string(),
            Family::BedrockNova => "amazon.nova-pro-v1:0".to_string(),
            Family::OpenAi => "gpt-4o".to_string(),
            Family::Google => "gemini-1.5-pro".to_string(),
        },
        token_limit: 200_000,
        max_output_tokens: 4096,
        supported_parameters: supported,
        family,
        extended_context_header: match family {
            Family::Anthropic => Some(("anthropic-beta", "context-1m-2025-08-07")),
            _ => None,
        },
        supports_context_caching: matches!(family, Family::Anthropic | Family::BedrockNova),
        supports_thinking: matches!(family, Family::Anthropic),
    }
}

fn build_driver(config: &Config) -> Result<Box<dyn ModelDriver>, String> {
    let family = config.family().unwrap_or(Family::Anthropic);
    let descriptor = default_descriptor(family);
    let driver: Box<dyn ModelDriver> = match family {
        Family::Anthropic => {
            let api_key = std::env::var("ANTHROPIC_API_KEY")
                .map_err(|_| "ANTHROPIC_API_KEY is required for the anthropic endpoint".to_string())?;
            Box::new(AnthropicDriver::new(api_key, descriptor))
        }
        Family::OpenAi => {
            let api_key = std::env::var("OPENAI_API_KEY")
                .map_err(|_| "OPENAI_API_KEY is required for the openai endpoint".to_string())?;
            Box::new(OpenAiDriver::new(api_key, descriptor))
        }
        Family::Google => {
            let api_key = config
                .google_api_key
                .clone()
                .ok_or_else(|| "GOOGLE_API_KEY is required for the google endpoint".to_string())?;
            Box::new(GoogleDriver::new(api_key, descriptor))
        }
        Family::BedrockNova => {
            let bearer = std::env::var("AWS_BEARER_TOKEN")
                .map_err(|_| "AWS_BEARER_TOKEN is required for the bedrock endpoint".to_string())?;
            let region = config.aws_region.clone().unwrap_or_else(|| "us-east-1".to_string());
            Box::new(BedrockNovaDriver::new(bearer, region, descriptor))
        }
    };
    Ok(driver)
}

fn question_for(command: &Commands) -> String {
    match command {
        Commands::Ask { question } => question.join(" "),
        Commands::Chat => String::new(),
        Commands::Review => "Review the codebase for bugs, style issues, and risky patterns.".to_string(),
        Commands::Explain { target } => match target {
            Some(t) => format!("Explain {t}."),
            None => "Explain what this codebase does.".to_string(),
        },
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tokio::select! {
        result = run() => match result {
            Ok(code) => code,
            Err(err) => {
                eprintln!("ziya: {err}");
                ExitCode::from(1)
            }
        },
        _ = tokio::signal::ctrl_c() => ExitCode::from(130),
    }
}

async fn run() -> Result<ExitCode, String> {
    let cli = Cli::parse();
    if cli.debug {
        std::env::set_var("LOG_LEVEL", "debug");
    }

    let mut config = Config::from_env()?;
    config.apply_cli_overrides(cli.root.clone(), cli.profile.clone(), cli.region.clone(), cli.model.clone());

    let mut question = question_for(&cli.command);
    if !std::io::stdin().is_terminal() {
        let mut piped = String::new();
        std::io::stdin()
            .read_to_string(&mut piped)
            .map_err(|e| e.to_string())?;
        if !piped.trim().is_empty() {
            question = format!("{}\n\n{}", piped.trim(), question).trim().to_string();
        }
    }

    if question.trim().is_empty() {
        eprintln!("validation_error: question must not be empty");
        return Ok(ExitCode::from(1));
    }

    let driver = build_driver(&config)?;
    let oracle = DiskFileStateOracle::new(&config.user_codebase_dir);
    let manager = NullMcpManager;

    let system_template = if config.thinking_mode {
        "You are Ziya, a streaming code assistant. Think step by step before answering."
    } else {
        "You are Ziya, a streaming code assistant."
    };

    let input = PromptInput {
        conversation_id: "cli-session",
        system_template,
        history: &[],
        file_paths: &[],
        auxiliary_notes: "",
        user_question: &question,
    };
    let prompt_cache = PromptCache::new();
    let messages = prompt::assemble(&oracle, &prompt_cache, &input, driver.descriptor().supports_context_caching);

    let mut params = HashMap::new();
    if let Some(temperature) = config.temperature {
        params.insert(ParamKind::Temperature, ParamValue::Float(temperature));
    }
    if let Some(top_k) = config.top_k {
        params.insert(ParamKind::TopK, ParamValue::UInt(top_k));
    }
    if let Some(max_tokens) = config.max_output_tokens {
        params.insert(ParamKind::MaxTokens, ParamValue::UInt(max_tokens));
    }

    let cancel = CancelFlag::new();
    let loop_config = LoopConfig { chunk_timeout: config.command_timeout, ..LoopConfig::default() };
    let tool_list = tools::build_tool_list(&manager);
    let events = loop_engine::run(
        driver.as_ref(),
        &manager,
        messages,
        tool_list,
        params,
        cancel,
        loop_config,
        "cli-stream".to_string(),
        &oracle,
        "cli-session".to_string(),
    );
    tokio::pin!(events);

    let mut metrics = StreamMetrics::new();
    while let Some(event) = events.next().await {
        print!("{}", sse::frame(&event, &mut metrics));
    }
    print!("{}", sse::done());

    Ok(ExitCode::from(0))
}
