use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CACHE_CAPACITY: usize = 4;
const DEFAULT_HTTP_BIND: &str = "127.0.0.1:8089";
const DEFAULT_MAX_OUTPUT_SIZE: usize = 2000;
const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_KERNEL_COMMAND: &str = "python3";
const DEFAULT_KERNEL_LANGUAGE: &str = "python";
const DEFAULT_KERNEL_NAME: &str = "python3";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[value(alias = "stream-http", alias = "stream_http")]
    #[serde(alias = "stream-http", alias = "stream_http")]
    Http,
    Stdio,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Http => write!(f, "http"),
            TransportKind::Stdio => write!(f, "stdio"),
        }
    }
}

/// Limits applied to a single orchestrator call.
///
/// Passed explicitly into every [`crate::service::NotebookService`] operation so
/// behavior depends only on the document, the request, and this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionConfig {
    /// Character cap for each rendered output record.
    pub max_output_size: usize,
    /// Wall-clock budget for one execution range.
    pub timeout: Duration,
}

impl ExecutionConfig {
    pub fn new(max_output_size: usize, timeout: Duration) -> Self {
        Self {
            max_output_size,
            timeout,
        }
    }

    pub fn timeout_seconds(&self) -> f64 {
        self.timeout.as_secs_f64()
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_output_size: DEFAULT_MAX_OUTPUT_SIZE,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
        }
    }
}

/// How the process kernel is launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelConfig {
    pub command: String,
    pub args: Vec<String>,
    pub language: String,
    pub name: String,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            command: DEFAULT_KERNEL_COMMAND.to_string(),
            args: vec!["-".to_string()],
            language: DEFAULT_KERNEL_LANGUAGE.to_string(),
            name: DEFAULT_KERNEL_NAME.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub workspace_root: PathBuf,
    /// Notebook opened at startup, so tools work before any `open_notebook` call.
    pub notebook: Option<PathBuf>,
    pub cache_capacity: usize,
    pub enabled_tools: Option<HashSet<String>>,
    pub transport: TransportKind,
    pub http_bind_address: SocketAddr,
    pub max_output_size: usize,
    pub timeout_seconds: u64,
    pub kernel: KernelConfig,
}

impl ServerConfig {
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let CliArgs {
            config,
            workspace_root: cli_workspace_root,
            notebook: cli_notebook,
            cache_capacity: cli_cache_capacity,
            enabled_tools: cli_enabled_tools,
            transport: cli_transport,
            http_bind: cli_http_bind,
            max_output_size: cli_max_output_size,
            timeout_seconds: cli_timeout_seconds,
            kernel_command: cli_kernel_command,
            kernel_args: cli_kernel_args,
            kernel_language: cli_kernel_language,
            kernel_name: cli_kernel_name,
        } = args;

        let file_config = if let Some(path) = config.as_ref() {
            load_config_file(path)?
        } else {
            PartialConfig::default()
        };

        let PartialConfig {
            workspace_root: file_workspace_root,
            notebook: file_notebook,
            cache_capacity: file_cache_capacity,
            enabled_tools: file_enabled_tools,
            transport: file_transport,
            http_bind: file_http_bind,
            max_output_size: file_max_output_size,
            timeout_seconds: file_timeout_seconds,
            kernel_command: file_kernel_command,
            kernel_args: file_kernel_args,
            kernel_language: file_kernel_language,
            kernel_name: file_kernel_name,
        } = file_config;

        let notebook = cli_notebook.or(file_notebook);

        let workspace_root = cli_workspace_root
            .or(file_workspace_root)
            .or_else(|| {
                notebook.as_ref().and_then(|path| {
                    if path.is_absolute() {
                        path.parent().map(|parent| parent.to_path_buf())
                    } else {
                        None
                    }
                })
            })
            .unwrap_or_else(|| PathBuf::from("."));

        let notebook = notebook.map(|path| {
            if path.is_absolute() {
                path
            } else {
                workspace_root.join(path)
            }
        });

        let cache_capacity = cli_cache_capacity
            .or(file_cache_capacity)
            .unwrap_or(DEFAULT_CACHE_CAPACITY)
            .max(1);

        let enabled_tools = cli_enabled_tools
            .or(file_enabled_tools)
            .map(|tools| {
                tools
                    .into_iter()
                    .map(|tool| tool.trim().to_ascii_lowercase())
                    .filter(|tool| !tool.is_empty())
                    .collect::<HashSet<_>>()
            })
            .filter(|set| !set.is_empty());

        let transport = cli_transport
            .or(file_transport)
            .unwrap_or(TransportKind::Stdio);

        let http_bind_address = match cli_http_bind.or(file_http_bind) {
            Some(addr) => addr,
            None => DEFAULT_HTTP_BIND
                .parse()
                .context("default bind address is invalid")?,
        };

        let max_output_size = cli_max_output_size
            .or(file_max_output_size)
            .unwrap_or(DEFAULT_MAX_OUTPUT_SIZE);
        anyhow::ensure!(max_output_size > 0, "max_output_size must be greater than 0");

        let timeout_seconds = cli_timeout_seconds
            .or(file_timeout_seconds)
            .unwrap_or(DEFAULT_TIMEOUT_SECONDS);
        anyhow::ensure!(timeout_seconds > 0, "timeout_seconds must be greater than 0");

        let defaults = KernelConfig::default();
        let command = cli_kernel_command
            .or(file_kernel_command)
            .map(|c| c.trim().to_string())
            .unwrap_or(defaults.command);
        anyhow::ensure!(!command.is_empty(), "kernel_command must not be empty");

        let kernel = KernelConfig {
            command,
            args: cli_kernel_args
                .or(file_kernel_args)
                .unwrap_or(defaults.args),
            language: cli_kernel_language
                .or(file_kernel_language)
                .unwrap_or(defaults.language),
            name: cli_kernel_name.or(file_kernel_name).unwrap_or(defaults.name),
        };

        Ok(Self {
            workspace_root,
            notebook,
            cache_capacity,
            enabled_tools,
            transport,
            http_bind_address,
            max_output_size,
            timeout_seconds,
            kernel,
        })
    }

    pub fn ensure_workspace_root(&self) -> Result<()> {
        anyhow::ensure!(
            self.workspace_root.exists(),
            "workspace root {:?} does not exist",
            self.workspace_root
        );
        anyhow::ensure!(
            self.workspace_root.is_dir(),
            "workspace root {:?} is not a directory",
            self.workspace_root
        );
        Ok(())
    }

    /// Relative paths are resolved under workspace_root.
    pub fn resolve_path<P: AsRef<Path>>(&self, relative: P) -> PathBuf {
        let relative = relative.as_ref();
        if relative.is_absolute() {
            relative.to_path_buf()
        } else {
            self.workspace_root.join(relative)
        }
    }

    pub fn is_tool_enabled(&self, tool: &str) -> bool {
        match &self.enabled_tools {
            Some(set) => set.contains(&tool.to_ascii_lowercase()),
            None => true,
        }
    }

    pub fn execution(&self) -> ExecutionConfig {
        ExecutionConfig::new(
            self.max_output_size,
            Duration::from_secs(self.timeout_seconds),
        )
    }
}

#[derive(Parser, Debug, Default, Clone)]
#[command(name = "notebook-mcp", about = "Notebook MCP server", version)]
pub struct CliArgs {
    #[arg(
        long,
        value_name = "FILE",
        help = "Path to a configuration file (YAML or JSON)",
        global = true
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        env = "NOTEBOOK_MCP_WORKSPACE",
        value_name = "DIR",
        help = "Workspace root containing notebooks"
    )]
    pub workspace_root: Option<PathBuf>,

    #[arg(
        long,
        env = "NOTEBOOK_MCP_NOTEBOOK",
        value_name = "FILE",
        help = "Notebook to open at startup"
    )]
    pub notebook: Option<PathBuf>,

    #[arg(
        long,
        env = "NOTEBOOK_MCP_CACHE_CAPACITY",
        value_name = "N",
        help = "Maximum number of open notebooks kept in memory",
        value_parser = clap::value_parser!(usize)
    )]
    pub cache_capacity: Option<usize>,

    #[arg(
        long,
        env = "NOTEBOOK_MCP_ENABLED_TOOLS",
        value_name = "TOOL",
        value_delimiter = ',',
        help = "Restrict execution to the provided tool names"
    )]
    pub enabled_tools: Option<Vec<String>>,

    #[arg(
        long,
        env = "NOTEBOOK_MCP_TRANSPORT",
        value_enum,
        value_name = "TRANSPORT",
        help = "Transport to expose (stdio or http)"
    )]
    pub transport: Option<TransportKind>,

    #[arg(
        long,
        env = "NOTEBOOK_MCP_HTTP_BIND",
        value_name = "ADDR",
        help = "HTTP bind address when using http transport"
    )]
    pub http_bind: Option<SocketAddr>,

    #[arg(
        long,
        env = "NOTEBOOK_MCP_MAX_OUTPUT_SIZE",
        value_name = "CHARS",
        help = "Max characters per rendered cell output before truncation (default: 2000)",
        value_parser = clap::value_parser!(usize)
    )]
    pub max_output_size: Option<usize>,

    #[arg(
        long,
        env = "NOTEBOOK_MCP_TIMEOUT_SECONDS",
        value_name = "SECS",
        help = "Execution wait budget per request in seconds (default: 30)",
        value_parser = clap::value_parser!(u64)
    )]
    pub timeout_seconds: Option<u64>,

    #[arg(
        long,
        env = "NOTEBOOK_MCP_KERNEL_COMMAND",
        value_name = "CMD",
        help = "Interpreter that runs code cells (cell source is written to stdin)"
    )]
    pub kernel_command: Option<String>,

    #[arg(
        long,
        env = "NOTEBOOK_MCP_KERNEL_ARGS",
        value_name = "ARG",
        value_delimiter = ',',
        allow_hyphen_values = true,
        help = "Arguments passed to the kernel command (default: -)"
    )]
    pub kernel_args: Option<Vec<String>>,

    #[arg(
        long,
        env = "NOTEBOOK_MCP_KERNEL_LANGUAGE",
        value_name = "LANG",
        help = "Language reported for the kernel (default: python)"
    )]
    pub kernel_language: Option<String>,

    #[arg(
        long,
        env = "NOTEBOOK_MCP_KERNEL_NAME",
        value_name = "NAME",
        help = "Kernel name reported to callers (default: python3)"
    )]
    pub kernel_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    workspace_root: Option<PathBuf>,
    notebook: Option<PathBuf>,
    cache_capacity: Option<usize>,
    enabled_tools: Option<Vec<String>>,
    transport: Option<TransportKind>,
    http_bind: Option<SocketAddr>,
    max_output_size: Option<usize>,
    timeout_seconds: Option<u64>,
    kernel_command: Option<String>,
    kernel_args: Option<Vec<String>>,
    kernel_language: Option<String>,
    kernel_name: Option<String>,
}

fn load_config_file(path: &Path) -> Result<PartialConfig> {
    if !path.exists() {
        anyhow::bail!("config file {:?} does not exist", path);
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {:?}", path))?;
    let ext = path
        .extension()
        .and_then(|os| os.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let parsed = match ext.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse YAML config {:?}", path))?,
        "json" => serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse JSON config {:?}", path))?,
        other => anyhow::bail!("unsupported config extension: {other}"),
    };
    Ok(parsed)
}
