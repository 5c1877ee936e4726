use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crmbot_core::agent::Orchestrator;
use crmbot_core::config::Config;
use crmbot_core::credential::{
    CredentialResolver, Credentials, CredentialStore, MemoryCredentialStore, NullRefresher,
    System,
};
use crmbot_core::gateway::rest::RestGateway;
use crmbot_core::gateway::SystemGateway;
use crmbot_core::proposal::store::MemoryProposalStore;
use crmbot_core::proposal::ProposalEngine;
use crmbot_core::provider;
use crmbot_core::types::{AgentEvent, TurnRequest, TurnStatus};
use crmbot_core::upload::UploadPipeline;

#[derive(Parser)]
#[command(
    name = "crmbot",
    about = "crmbot - CRM agent toolkit",
    version = crmbot_core::VERSION,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one agent turn against a connected system
    Agent {
        /// Message to send to the agent
        #[arg(short, long)]
        message: String,
        /// Tenant subject identifier
        #[arg(short, long, env = "CRMBOT_SUB_ID")]
        sub: String,
        /// Target system (salesforce, hubspot, google, microsoft)
        #[arg(short = 'y', long, default_value = "salesforce")]
        system: String,
    },
    /// Initialize crmbot configuration
    Onboard,
    /// Show crmbot status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("crmbot=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Agent {
            message,
            sub,
            system,
        } => cmd_agent(message, sub, system).await?,
        Commands::Onboard => cmd_onboard()?,
        Commands::Status => cmd_status()?,
    }

    Ok(())
}

// ====== Commands ======

/// Run a single agent turn, streaming progress to stdout.
async fn cmd_agent(message: String, sub: String, system: String) -> Result<()> {
    let config = Config::load(None)?;
    let system: System = system.parse()?;

    let api_key = config.api_key()?.to_string();
    let provider: Arc<dyn provider::ReasoningProvider> = Arc::from(provider::create_provider(
        &api_key,
        config.provider.api_base.as_deref(),
        &config.agent.model,
    ));

    // Credentials come from the environment for the CLI; a deployed
    // service plugs in its own store and refresher here.
    let creds_store = Arc::new(MemoryCredentialStore::new());
    if let Ok(token) = std::env::var("CRM_ACCESS_TOKEN") {
        let mut creds = Credentials::new(token);
        creds.instance_url = std::env::var("CRM_INSTANCE_URL").ok();
        creds_store.put(&sub, system, creds);
    }
    let resolver = Arc::new(CredentialResolver::new(
        creds_store,
        Arc::new(NullRefresher),
    ));

    let gateway: Arc<dyn SystemGateway> = Arc::new(RestGateway::default());
    let proposals = Arc::new(ProposalEngine::new(
        Arc::new(MemoryProposalStore::new()),
        resolver.clone(),
        gateway.clone(),
        Duration::from_secs(config.proposal.execution_timeout_secs),
    ));
    let uploads = Arc::new(UploadPipeline::new(config.upload.clone()));

    let orchestrator = Arc::new(Orchestrator::new(
        provider, resolver, gateway, proposals, uploads, config,
    ));

    let (mut rx, handle) = orchestrator.spawn_turn(TurnRequest::new(sub, message, system));

    while let Some(event) = rx.recv().await {
        match event {
            AgentEvent::StepStarted { step } => {
                eprintln!("[step {}]", step + 1);
            }
            AgentEvent::ToolCallStarted { tool, .. } => {
                eprintln!("  -> {tool}");
            }
            AgentEvent::ToolCallFinished { tool, ok, .. } => {
                eprintln!("  <- {tool} {}", if ok { "ok" } else { "failed" });
            }
            AgentEvent::Reply { content } => {
                println!("{content}");
            }
            AgentEvent::Incomplete { steps_used } => {
                eprintln!("Stopped after {steps_used} steps without a final answer.");
            }
            AgentEvent::Aborted { error } => {
                eprintln!("Turn aborted: {error}");
            }
        }
    }

    let transcript = handle.await?;
    if transcript.status != TurnStatus::Completed {
        std::process::exit(1);
    }
    Ok(())
}

/// Write a default config file if none exists.
fn cmd_onboard() -> Result<()> {
    let path = Config::default_path();
    if path.exists() {
        println!("Config already exists at {}", path.display());
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let config = Config::default();
    std::fs::write(&path, serde_json::to_string_pretty(&config)?)?;
    println!("Wrote {}", path.display());
    println!("Set provider.apiKey (or OPENAI_API_KEY) before running `crmbot agent`.");
    Ok(())
}

fn cmd_status() -> Result<()> {
    let path = Config::default_path();
    println!("crmbot v{}", crmbot_core::VERSION);
    println!(
        "Config: {} ({})",
        path.display(),
        if path.exists() { "present" } else { "missing" }
    );

    match Config::load(None) {
        Ok(config) => {
            println!("Model: {}", config.agent.model);
            println!("Step budget: {}", config.agent.max_steps);
            println!(
                "Upload: {} byte threshold, {} byte chunks, {}s session TTL",
                config.upload.chunk_threshold,
                config.upload.max_chunk_size,
                config.upload.session_ttl_secs
            );
            println!(
                "API key: {}",
                if config.provider.api_key.is_empty() {
                    "not set"
                } else {
                    "set"
                }
            );
        }
        Err(e) => println!("Config error: {e}"),
    }
    Ok(())
}
