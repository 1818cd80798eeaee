use clap::Parser;

/// Natural-language Kubernetes assistant.
#[derive(Parser, Debug)]
#[command(
    name = "kubepilot",
    version,
    about = "Ask questions about your cluster in plain language"
)]
pub struct Cli {
    /// Provider id or URI, e.g. `gemini`, `ollama`,
    /// `bedrock://bedrock.us-east-1.amazonaws.com`. Falls back to the
    /// LLM_CLIENT environment variable.
    #[arg(long = "llm-provider")]
    pub llm_provider: Option<String>,

    /// Model id; overrides the provider default and any per-provider
    /// environment variable such as BEDROCK_MODEL.
    #[arg(long)]
    pub model: Option<String>,

    /// Maximum LLM turns per query.
    #[arg(long = "max-iterations")]
    pub max_iterations: Option<u32>,

    /// Path to the kubeconfig file (falls back to KUBECONFIG, then
    /// ~/.kube/config).
    #[arg(long)]
    pub kubeconfig: Option<String>,

    /// Path to the TOML configuration file.
    #[arg(long)]
    pub config: Option<String>,

    /// Path to a YAML file with custom tool definitions.
    #[arg(long = "custom-tools-config")]
    pub custom_tools_config: Option<String>,

    /// Non-interactive: answer one query and exit.
    #[arg(long)]
    pub quiet: bool,

    /// Text-envelope tool calling for models without native function
    /// calling. Off by default because false positives are unsafe.
    #[arg(long = "enable-tool-use-shim")]
    pub enable_tool_use_shim: bool,

    /// Directory holding session state.
    #[arg(long = "sessions-dir")]
    pub sessions_dir: Option<String>,

    /// Resume an existing session by id.
    #[arg(long)]
    pub session: Option<String>,

    /// The query. May be combined with stdin; the positional part comes
    /// first.
    #[arg()]
    pub query: Vec<String>,
}
