//! Switchyard CLI - route tasks across AI providers
//!
//! A thin shell over `switchyard-core`: every command builds an
//! [`Orchestrator`] from the config file and prints JSON (or a short
//! human summary) to stdout. Logs go to stderr.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use console::style;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use switchyard_core::{Config, ContextWindow, Orchestrator, RouteRequest, TaskType, ToolInvocation};

#[derive(Parser)]
#[command(name = "switchyard")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Route tasks across AI providers with fallback and a shared context", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to <config dir>/switchyard/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Workspace directory for file and shell tools
    #[arg(short, long, global = true)]
    workspace: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Route a prompt through the chain for a task type
    Route {
        /// Task type, e.g. planning, code_generation, review
        #[arg(short, long)]
        task: String,

        /// Continue from a saved context snapshot
        #[arg(long)]
        resume: Option<String>,

        /// Save the resulting context under this name
        #[arg(long)]
        save: Option<String>,

        /// Override the provider's default model
        #[arg(long)]
        model: Option<String>,

        /// Print the full outcome as JSON
        #[arg(long)]
        json: bool,

        prompt: String,
    },

    /// Inspect and run tools
    #[command(subcommand)]
    Tools(ToolCommands),

    /// List the models a provider offers
    Models {
        /// Provider id from the config
        provider: String,
    },

    /// Check every provider and external server
    Probe,

    /// Manage saved context snapshots
    #[command(subcommand)]
    Context(ContextCommands),

    /// Show the effective configuration
    Config,
}

#[derive(Subcommand)]
enum ToolCommands {
    /// List registered tools
    List,

    /// Run one tool
    Run {
        /// Tool name
        name: String,

        /// Arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,

        /// Timeout in seconds (defaults to the tool policy's)
        #[arg(long)]
        timeout: Option<u64>,
    },
}

#[derive(Subcommand)]
enum ContextCommands {
    /// List saved snapshots
    List,

    /// Print a snapshot
    Show { name: String },

    /// Delete a snapshot
    Delete { name: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins; otherwise warn, or debug for our crates with --verbose
    let default_filter = if cli.verbose {
        "info,switchyard_core=debug,switchyard_mcp=debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .init();

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Config => show_config(&config, cli.config.as_deref())?,
        Commands::Context(cmd) => handle_context_command(&config, cmd)?,
        command => {
            let orchestrator = Orchestrator::from_config(config)
                .await
                .context("Failed to start orchestrator")?;
            let result = run_command(&orchestrator, command).await;
            orchestrator.shutdown().await;
            result?;
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    if let Some(workspace) = &cli.workspace {
        // Use dunce::canonicalize to avoid UNC path prefix on Windows (\\?\)
        let workspace = dunce::canonicalize(workspace)
            .with_context(|| format!("Workspace {} does not exist", workspace.display()))?;
        config.tools.workspace = Some(workspace);
    }
    Ok(config)
}

async fn run_command(orchestrator: &Orchestrator, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Route {
            task,
            resume,
            save,
            model,
            json,
            prompt,
        } => run_route(orchestrator, &task, &prompt, resume, save, model, json).await,
        Commands::Tools(ToolCommands::List) => {
            print_json(&json!(orchestrator.tools().list()))
        }
        Commands::Tools(ToolCommands::Run { name, args, timeout }) => {
            let arguments: Value = serde_json::from_str(&args).context("--args must be valid JSON")?;
            let mut invocation = ToolInvocation::new(name, arguments);
            if let Some(secs) = timeout {
                invocation = invocation.with_timeout(Duration::from_secs(secs));
            }

            let cancel = cancel_on_ctrl_c();
            let result = orchestrator.run_tool(invocation, &cancel).await;
            print_json(&json!(result))?;
            match &result.error {
                Some(failure) => anyhow::bail!("Tool failed ({:?}): {}", failure.kind, failure.message),
                None => Ok(()),
            }
        }
        Commands::Models { provider } => {
            let models = orchestrator.list_models(&provider).await?;
            print_json(&json!({ "provider": provider, "models": models }))
        }
        Commands::Probe => {
            let providers: Vec<Value> = orchestrator
                .probe_providers()
                .await
                .into_iter()
                .map(|(id, status)| json!({ "provider": id, "health": status }))
                .collect();
            print_json(&json!({
                "providers": providers,
                "external_servers": orchestrator.external().servers(),
            }))
        }
        // Served from the config alone in `main`
        Commands::Config | Commands::Context(_) => Ok(()),
    }
}

async fn run_route(
    orchestrator: &Orchestrator,
    task: &str,
    prompt: &str,
    resume: Option<String>,
    save: Option<String>,
    model: Option<String>,
    as_json: bool,
) -> anyhow::Result<()> {
    let store = orchestrator.context_store();
    let window = match &resume {
        Some(name) => ContextWindow::restore(store.load(name)?)?,
        None => orchestrator.new_window(),
    };

    let mut params = orchestrator.default_params();
    if let Some(model) = model {
        params = params.with_model(model);
    }
    let request = RouteRequest::new(prompt).with_params(params);

    let cancel = cancel_on_ctrl_c();
    let turn = orchestrator
        .route_and_run_tools(&TaskType::from(task), &request, &window, &cancel)
        .await?;

    if let Some(name) = &save {
        let path = store.save(name, &window.snapshot())?;
        tracing::info!(snapshot = %name, path = %path.display(), "Context saved");
    }

    if as_json {
        let tool_results: Vec<Value> = turn
            .tool_results
            .iter()
            .map(|(call_id, result)| json!({ "call_id": call_id, "result": result }))
            .collect();
        return print_json(&json!({
            "generation": turn.route.generation,
            "skipped": turn.route.attempts,
            "tool_results": tool_results,
            "context": window.summary(),
        }));
    }

    for failure in &turn.route.attempts {
        eprintln!(
            "{}",
            style(format!("  {} skipped ({}): {}", failure.provider_id, failure.kind, failure.reason)).dim()
        );
    }
    eprintln!(
        "{} {}",
        style(turn.route.provider_id()).cyan().bold(),
        style(format!("({})", turn.route.generation.model)).dim()
    );
    println!("{}", turn.route.generation.text);

    for (call_id, result) in &turn.tool_results {
        let marker = if result.success { style("ok").green() } else { style("failed").red() };
        eprintln!("  {} {}: {}", style("tool").dim(), call_id, marker);
    }
    Ok(())
}

fn show_config(config: &Config, path: Option<&Path>) -> anyhow::Result<()> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => Config::default_path()?,
    };
    println!("{}", style("Configuration:").bold());
    println!();
    println!("  File: {}", style(path.display()).dim());
    println!();

    println!("  {}", style("Providers").bold());
    for (id, provider) in &config.providers {
        let state = if provider.enabled { style("enabled").green() } else { style("disabled").dim() };
        println!(
            "    {:<12} {:<8} {:<20} {}",
            id,
            provider.kind.to_string(),
            provider.backend_id(),
            state
        );
    }
    println!();

    println!("  {}", style("Routing").bold());
    for (task, chain) in &config.routing {
        println!("    {:<20} {}", task, chain.join(" → "));
    }

    if !config.mcp_servers.is_empty() {
        println!();
        println!("  {}", style("External servers").bold());
        for server in &config.mcp_servers {
            let target = server.url.clone().unwrap_or_else(|| server.command.clone());
            println!("    {:<12} {:?} {}", server.name, server.transport, style(target).dim());
        }
    }
    Ok(())
}

fn handle_context_command(config: &Config, cmd: ContextCommands) -> anyhow::Result<()> {
    let store = match &config.context.snapshot_dir {
        Some(dir) => switchyard_core::ContextStore::new(dir.clone()),
        None => switchyard_core::ContextStore::open_default(),
    };

    match cmd {
        ContextCommands::List => {
            let names = store.list()?;
            if names.is_empty() {
                println!("  {}", style(format!("No snapshots in {}", store.dir().display())).dim());
            }
            for name in names {
                println!("{}", name);
            }
        }
        ContextCommands::Show { name } => {
            let snapshot = store.load(&name)?;
            print_json(&json!(snapshot))?;
        }
        ContextCommands::Delete { name } => {
            if !store.delete(&name)? {
                anyhow::bail!("No saved context named '{}'", name);
            }
        }
    }
    Ok(())
}

/// Token cancelled by the first Ctrl-C
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });
    cancel
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
