use std::io::Write;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use rankpilot_agent::AgentEvent;
use rankpilot_core::config::{AgentDefaults, AgentsConfig, Config, ProviderConfig};
use rankpilot_core::store::{ConversationStore, JsonlConversationStore};
use rankpilot_providers::{Credentials, LlmProvider};
use rankpilot_tools::ToolRegistry;

#[derive(Parser)]
#[command(
    name = "rankpilot",
    about = "Conversational SEO agent — search analytics, crawling, and content drafting over chat",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a message to the agent (one-shot)
    Chat {
        /// Message to send
        #[arg(short, long)]
        message: String,

        /// Model to use
        #[arg(long)]
        model: Option<String>,

        /// Provider id (defaults to the first usable provider)
        #[arg(long)]
        provider: Option<String>,

        /// Conversation to continue
        #[arg(long, default_value = "default")]
        conversation: String,
    },

    /// List models available from the configured provider
    Models {
        /// Provider id (defaults to the first usable provider)
        #[arg(long)]
        provider: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Stored conversation management
    Conversations {
        #[command(subcommand)]
        action: ConversationAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
}

#[derive(Subcommand)]
enum ConversationAction {
    /// List stored conversations
    List,
    /// Delete a conversation
    Delete { conversation: String },
}

/// Pick a provider config and build its wire adapter.
fn build_provider(
    config: &Config,
    id: Option<&str>,
) -> anyhow::Result<(Arc<dyn LlmProvider>, Credentials)> {
    let provider_config: &ProviderConfig = match id {
        Some(id) => config
            .provider(id)
            .ok_or_else(|| anyhow::anyhow!("Provider '{id}' is not configured"))?,
        None => config
            .models
            .as_ref()
            .and_then(|m| m.providers.as_ref())
            .and_then(|p| p.iter().find(|pc| pc.resolve_api_key().is_some()))
            .ok_or_else(|| anyhow::anyhow!("No provider with a usable API key configured"))?,
    };

    let api_key = provider_config
        .resolve_api_key()
        .ok_or_else(|| anyhow::anyhow!("Provider '{}' has no API key", provider_config.id))?;

    let base_url = provider_config.base_url.as_deref();
    let provider: Arc<dyn LlmProvider> = match provider_config.id.as_str() {
        "anthropic" => Arc::new(rankpilot_providers::anthropic::AnthropicProvider::new(
            base_url,
        )),
        "openai" => Arc::new(rankpilot_providers::openai::OpenAiProvider::new(base_url)),
        other => anyhow::bail!("Unknown provider id '{other}' (expected 'anthropic' or 'openai')"),
    };

    Ok((provider, Credentials::new(api_key)))
}

/// Fail fast when the config cannot support a single round.
fn check_config(config: &Config) -> anyhow::Result<()> {
    let (warnings, errors) = config.validate();
    for warning in warnings {
        tracing::warn!("{warning}");
    }
    if !errors.is_empty() {
        anyhow::bail!("Configuration unusable: {}", errors.join("; "));
    }
    Ok(())
}

fn print_event(event: &AgentEvent) {
    match event {
        AgentEvent::TextDelta { delta } => {
            print!("{delta}");
            let _ = std::io::stdout().flush();
        }
        AgentEvent::ToolCalls { calls } => {
            for call in calls {
                tracing::info!(tool = %call.name, args = %call.arguments, "Tool call");
            }
        }
        AgentEvent::ToolResult { tool, content, .. } => {
            tracing::info!(tool = %tool, chars = content.len(), "Tool result");
        }
        AgentEvent::ToolError { tool, message, .. } => {
            tracing::warn!(tool = %tool, "Tool failed: {message}");
        }
        AgentEvent::Usage { .. } => {}
        AgentEvent::Error { message } => {
            eprintln!("\nerror: {message}");
        }
        AgentEvent::Done { usage } => {
            println!();
            tracing::info!(
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "Run complete"
            );
        }
    }
}

async fn chat(
    config: Arc<Config>,
    message: &str,
    model: Option<String>,
    provider_id: Option<&str>,
    conversation: &str,
) -> anyhow::Result<()> {
    check_config(&config)?;
    let (provider, credentials) = build_provider(&config, provider_id)?;

    // A --model override rides in through the config defaults
    let config = match model {
        Some(model) => {
            let mut overridden = (*config).clone();
            let agents = overridden.agents.get_or_insert(AgentsConfig { defaults: None });
            let defaults = agents.defaults.get_or_insert(AgentDefaults {
                workspace: None,
                model: None,
                max_tokens: None,
                temperature: None,
                max_rounds: None,
                system_prompt: None,
            });
            defaults.model = Some(model);
            Arc::new(overridden)
        }
        None => config,
    };

    let store = JsonlConversationStore::new(JsonlConversationStore::default_path());
    let mut turns = store.load(conversation).await?;

    // Tools are registered by embedders; the CLI runs with the model alone.
    let tools = ToolRegistry::new();

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, stopping after current step");
            ctrl_c_cancel.cancel();
        }
    });

    let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            print_event(&event);
        }
    });

    let outcome = rankpilot_agent::run_agent(
        &mut turns,
        conversation,
        message,
        &config,
        &tools,
        &provider,
        &credentials,
        event_tx,
        cancel,
    )
    .await?;

    let _ = printer.await;

    store.save(conversation, &turns).await?;

    if let Some(error) = outcome.error {
        anyhow::bail!("Agent run failed: {}", error.message);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config
    let config_path = cli
        .config
        .map(std::path::PathBuf::from)
        .unwrap_or_else(Config::default_path);
    let config = Arc::new(Config::load(&config_path)?);

    // Initialize logging: RUST_LOG wins, then --verbose, then the config level
    let filter = if cli.verbose {
        "debug"
    } else {
        config.log_level().unwrap_or("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Chat {
            message,
            model,
            provider,
            conversation,
        } => {
            chat(config, &message, model, provider.as_deref(), &conversation).await?;
        }
        Commands::Models { provider } => {
            check_config(&config)?;
            let (provider, credentials) = build_provider(&config, provider.as_deref())?;
            let models = provider.list_models(&credentials).await?;
            for model in models {
                println!("{}", model.id);
            }
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&*config)?;
                println!("{json}");
            }
        },
        Commands::Conversations { action } => {
            let store = JsonlConversationStore::new(JsonlConversationStore::default_path());
            match action {
                ConversationAction::List => {
                    for id in store.list().await? {
                        println!("{id}");
                    }
                }
                ConversationAction::Delete { conversation } => {
                    store.delete(&conversation).await?;
                    println!("Deleted '{conversation}'");
                }
            }
        }
    }

    Ok(())
}
