use super::{KernelBackend, KernelDescriptor, KernelRun};
use crate::config::KernelConfig;
use crate::model::OutputRecord;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Runs each code cell in a fresh interpreter process.
///
/// The cell source is written to the child's stdin. Stdout and stderr become
/// stream records; a non-zero exit becomes an error record. No state survives
/// between cells.
pub struct ProcessKernel {
    command: String,
    args: Vec<String>,
    descriptor: KernelDescriptor,
}

impl ProcessKernel {
    pub fn new(config: &KernelConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            descriptor: KernelDescriptor {
                name: config.name.clone(),
                language: config.language.clone(),
                display_name: Some(format!("{} (process)", config.name)),
            },
        }
    }
}

#[async_trait]
impl KernelBackend for ProcessKernel {
    async fn execute(&self, code: &str) -> Result<KernelRun> {
        let start = Instant::now();

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| anyhow!("failed to spawn kernel '{}': {}", self.command, e))?;

        let stdin = child.stdin.take();
        let source = code.as_bytes().to_vec();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(&source).await?;
                stdin.shutdown().await?;
            }
            Ok::<_, std::io::Error>(())
        };

        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output.map_err(|e| anyhow!("kernel '{}' failed: {}", self.command, e))?;
        if let Err(e) = fed {
            // The interpreter may exit before reading all of stdin; its exit status decides.
            tracing::debug!(kernel = %self.command, "stdin closed early: {}", e);
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        let mut outputs = Vec::new();
        if !stdout.is_empty() {
            outputs.push(OutputRecord::stdout(stdout));
        }
        if output.status.success() {
            if !stderr.is_empty() {
                outputs.push(OutputRecord::stderr(stderr));
            }
        } else {
            outputs.push(error_from_stderr(&stderr, output.status.code()));
        }

        Ok(KernelRun {
            outputs,
            duration_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
    }

    fn descriptor(&self) -> KernelDescriptor {
        self.descriptor.clone()
    }

    fn name(&self) -> &'static str {
        "process"
    }
}

fn error_from_stderr(stderr: &str, code: Option<i32>) -> OutputRecord {
    static ERROR_LINE_RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"^(?P<name>[A-Za-z_][A-Za-z0-9_.]*): ?(?P<message>.*)$").expect("regex")
    });

    let traceback: Vec<String> = stderr.lines().map(str::to_string).collect();
    let last = stderr.lines().rev().find(|line| !line.trim().is_empty());

    let (name, message) = match last.and_then(|line| ERROR_LINE_RE.captures(line.trim_end())) {
        Some(caps) => (
            caps["name"].to_string(),
            caps["message"].to_string(),
        ),
        None => (
            "KernelError".to_string(),
            match code {
                Some(code) => format!("process exited with status {code}"),
                None => "process terminated by signal".to_string(),
            },
        ),
    };

    OutputRecord::Error {
        name,
        message,
        traceback,
    }
}
