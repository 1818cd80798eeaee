use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use kubepilot::agent::{Agent, AgentConfig, AgentState, compose_system_prompt};
use kubepilot::cli::Cli;
use kubepilot::config::{AppConfig, resolve_kubeconfig};
use kubepilot::llm::{self, Chat, Client, RetryChat};
use kubepilot::mcp::McpManager;
use kubepilot::sessions::{FilesystemStore, Store};
use kubepilot::tools::{ExecutionContext, ToolRegistry, load_custom_tools, register_builtins};
use kubepilot::types::SessionInfo;
use kubepilot::ui::{Document, TerminalRenderer};

const EXIT_GENERIC: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_SIGINT: i32 = 130;

const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a Kubernetes assistant running on the user's machine with access \
to their cluster through the kubectl and bash tools. Work step by step: \
inspect before you modify, prefer read-only commands, and explain what a \
modifying command will do before running it. When you have gathered \
enough information, answer concisely in plain language.";

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{}", err.message);
            err.exit_code
        }
    };
    std::process::exit(code);
}

struct FatalError {
    message: String,
    exit_code: i32,
}

impl FatalError {
    fn usage(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            exit_code: EXIT_USAGE,
        }
    }

    fn generic(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            exit_code: EXIT_GENERIC,
        }
    }
}

async fn run(cli: Cli) -> Result<i32, FatalError> {
    info!("starting kubepilot");
    let config = AppConfig::load(cli.config.as_deref().map(Path::new))
        .map_err(|err| FatalError::usage(err.to_string()))?;

    let query = gather_query(&cli).map_err(FatalError::generic)?;
    if cli.quiet && query.is_none() {
        return Err(FatalError::usage("quiet mode requires a query"));
    }

    // Providers and tools register once, before the first lookup.
    llm::register_defaults().map_err(|err| FatalError::usage(err.to_string()))?;
    let registry = ToolRegistry::global();
    register_builtins(registry).map_err(|err| FatalError::usage(err.to_string()))?;
    if let Some(path) = cli
        .custom_tools_config
        .as_deref()
        .map(Path::new)
        .or(config.custom_tools_config.as_deref())
    {
        let count = load_custom_tools(registry, path)
            .map_err(|err| FatalError::usage(err.to_string()))?;
        info!(count, path = %path.display(), "custom tools loaded");
    }
    let mcp = McpManager::connect_all(config.mcp_servers.clone(), registry).await;
    if mcp.server_count() > 0 {
        info!(servers = mcp.server_count(), "MCP servers connected");
    }

    let provider_id = cli
        .llm_provider
        .clone()
        .or_else(|| config.provider.clone())
        .unwrap_or_default();
    let client =
        llm::new_client(&provider_id).map_err(|err| FatalError::usage(err.to_string()))?;

    let model = cli.model.clone().or_else(|| config.model.clone()).unwrap_or_default();
    let kubeconfig = resolve_kubeconfig(cli.kubeconfig.as_deref())
        .map_err(|err| FatalError::usage(err.to_string()))?;
    debug!(kubeconfig = kubeconfig.as_str(), "kubeconfig resolved");
    let exec_ctx = ExecutionContext {
        work_dir: None,
        kubeconfig: Some(kubeconfig),
    };

    let sessions_dir = cli
        .sessions_dir
        .clone()
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| config.sessions_dir.clone());
    let store: Arc<dyn Store> = Arc::new(FilesystemStore::new(sessions_dir));

    let agent_config = AgentConfig {
        max_iterations: cli
            .max_iterations
            .or(config.max_iterations)
            .unwrap_or(kubepilot::agent::runner::DEFAULT_MAX_ITERATIONS),
        use_shim: cli.enable_tool_use_shim || config.enable_tool_use_shim,
        streaming: !cli.quiet,
    };

    let system_prompt = {
        let base = config.system_prompt.as_deref().unwrap_or(DEFAULT_SYSTEM_PROMPT);
        if agent_config.use_shim {
            compose_system_prompt(base, &registry.catalog())
        } else {
            base.to_string()
        }
    };

    let document = Arc::new(Document::new());
    let renderer = TerminalRenderer::attach(&document);

    let runtime = Runtime {
        client,
        store,
        registry,
        exec_ctx,
        document: Arc::clone(&document),
        agent_config,
        system_prompt,
        retry: config.retry.clone(),
        provider_id,
    };

    let code = if let Some(query) = query {
        let mut agent = runtime
            .make_agent(&model, cli.session.as_deref())
            .await
            .map_err(FatalError::generic)?;
        run_turn(&mut agent, &query).await?;
        0
    } else {
        interactive_loop(&runtime, &model, cli.session.as_deref()).await?
    };

    mcp.close_all().await;
    renderer.detach(&document);
    Ok(code)
}

struct Runtime {
    client: Arc<dyn Client>,
    store: Arc<dyn Store>,
    registry: &'static ToolRegistry,
    exec_ctx: ExecutionContext,
    document: Arc<Document>,
    agent_config: AgentConfig,
    system_prompt: String,
    retry: llm::RetryConfig,
    provider_id: String,
}

impl Runtime {
    async fn make_agent(
        &self,
        model: &str,
        resume: Option<&str>,
    ) -> Result<Agent<'static>, String> {
        let session = match resume {
            Some(id) => self
                .store
                .get(id)
                .await
                .map_err(|err| format!("resuming session: {err}"))?,
            None => {
                let info = SessionInfo::new(&self.provider_id, model);
                self.store
                    .create(&info)
                    .await
                    .map_err(|err| format!("creating session: {err}"))?;
                info
            }
        };
        let chat = self
            .client
            .start_chat(&self.system_prompt, model)
            .map_err(|err| err.to_string())?;
        let chat: Box<dyn Chat> = Box::new(RetryChat::new(chat, self.retry.clone()));
        Ok(Agent::new(
            chat,
            self.registry,
            Arc::clone(&self.store),
            session,
            self.exec_ctx.clone(),
            Arc::clone(&self.document),
            self.agent_config.clone(),
        ))
    }
}

async fn run_turn(agent: &mut Agent<'static>, query: &str) -> Result<(), FatalError> {
    match agent.run(query).await {
        Ok(outcome) => {
            debug!(
                iterations = outcome.iterations,
                tools = outcome.tool_executions,
                state = ?outcome.state,
                "turn complete"
            );
            // Budget exhaustion is reported as an Error block but the
            // session survives and the process exits cleanly.
            if outcome.state == AgentState::Aborted {
                warn!("turn aborted; session preserved");
            }
            Ok(())
        }
        Err(err) => Err(FatalError::generic(err.to_string())),
    }
}

async fn interactive_loop(
    runtime: &Runtime,
    initial_model: &str,
    resume: Option<&str>,
) -> Result<i32, FatalError> {
    let mut model = initial_model.to_string();
    let mut agent = runtime
        .make_agent(&model, resume)
        .await
        .map_err(FatalError::generic)?;

    println!("Hey there, what can I help you with today?");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\n>> ");
        use std::io::Write;
        let _ = std::io::stdout().flush();

        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                info!("interrupted; shutting down");
                return Ok(EXIT_SIGINT);
            }
            line = lines.next_line() => line,
        };
        let Some(line) = line.map_err(|err| FatalError::generic(err.to_string()))? else {
            return Ok(0);
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match input {
            "exit" | "quit" => {
                println!("Allright... bye.");
                return Ok(0);
            }
            "clear" => {
                print!("\x1B[2J\x1B[H");
                continue;
            }
            "reset" => {
                agent = runtime
                    .make_agent(&model, None)
                    .await
                    .map_err(FatalError::generic)?;
                print!("\x1B[2J\x1B[H");
                continue;
            }
            "version" => {
                println!("kubepilot {}", env!("CARGO_PKG_VERSION"));
                continue;
            }
            "models" => {
                match runtime.client.list_models().await {
                    Ok(models) => {
                        println!("Available models:");
                        for name in models {
                            println!("  {name}");
                        }
                    }
                    Err(err) => eprintln!("could not list models: {err}"),
                }
                continue;
            }
            _ => {}
        }

        if let Some(rest) = input.strip_prefix("model").filter(|r| r.is_empty() || r.starts_with(' ')) {
            let parts: Vec<&str> = rest.split_whitespace().collect();
            match parts.as_slice() {
                [] => {
                    println!("Current model is `{}`", display_model(&model));
                    continue;
                }
                [new_model] => {
                    model = new_model.to_string();
                    agent = runtime
                        .make_agent(&model, None)
                        .await
                        .map_err(FatalError::generic)?;
                    println!("Model set to `{model}`");
                    continue;
                }
                _ => {
                    eprintln!("Invalid model command. Expected: model <model-name>");
                    continue;
                }
            }
        }

        run_turn(&mut agent, input).await?;
    }
}

fn display_model(model: &str) -> &str {
    if model.is_empty() { "provider default" } else { model }
}

/// Combine the positional query with stdin; the positional part is a
/// prefix when both are present.
fn gather_query(cli: &Cli) -> Result<Option<String>, String> {
    let positional = cli.query.join(" ");
    let stdin_has_data = atty::isnt(atty::Stream::Stdin);

    if stdin_has_data {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .map_err(|err| format!("reading from stdin: {err}"))?;
        let combined = if positional.is_empty() {
            buffer.trim().to_string()
        } else {
            format!("{positional}\n{}", buffer.trim())
        };
        if combined.trim().is_empty() {
            return Err("no query provided from stdin".to_string());
        }
        return Ok(Some(combined));
    }

    if positional.trim().is_empty() {
        Ok(None)
    } else {
        Ok(Some(positional))
    }
}

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_level(true)
            .with_writer(std::io::stderr)
            .init();
    });
}
