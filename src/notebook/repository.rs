use super::{LiveNotebook, NotebookDocument};
use crate::config::ServerConfig;
use crate::errors::BackingStoreError;
use crate::kernel::KernelBackend;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use globset::{Glob, GlobMatcher};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

const NOTEBOOK_EXTENSION: &str = "ipynb";
const CHECKPOINT_DIR: &str = ".ipynb_checkpoints";

pub struct OpenedNotebook {
    pub document: Arc<dyn NotebookDocument>,
    /// The path did not exist and an empty notebook was created in memory.
    pub created: bool,
}

/// A notebook file found in the workspace.
#[derive(Debug, Clone)]
pub struct LocatedNotebook {
    pub path: PathBuf,
    pub relative: String,
    pub bytes: u64,
    pub last_modified: Option<String>,
}

#[derive(Debug, Default)]
pub struct NotebookFilter {
    glob: Option<GlobMatcher>,
}

impl NotebookFilter {
    pub fn new(path_glob: Option<&str>) -> Result<Self> {
        let glob = path_glob
            .map(|pattern| {
                Glob::new(pattern)
                    .map(|g| g.compile_matcher())
                    .map_err(|e| anyhow!("invalid glob pattern {pattern}: {e}"))
            })
            .transpose()?;
        Ok(Self { glob })
    }

    pub fn matches(&self, relative: &str) -> bool {
        match &self.glob {
            Some(glob) => glob.is_match(relative),
            None => true,
        }
    }
}

#[async_trait]
pub trait NotebookRepository: Send + Sync {
    fn list(&self, filter: &NotebookFilter) -> Result<Vec<LocatedNotebook>>;

    /// Absolute path for a user-supplied notebook path; rejects non-notebook files.
    fn resolve(&self, path: &Path) -> Result<PathBuf>;

    async fn open(&self, resolved: &Path) -> Result<OpenedNotebook>;
}

pub struct PathNotebookRepository {
    config: Arc<ServerConfig>,
    backend: Arc<dyn KernelBackend>,
}

impl PathNotebookRepository {
    pub fn new(config: Arc<ServerConfig>, backend: Arc<dyn KernelBackend>) -> Self {
        Self { config, backend }
    }

    fn locate(&self, path: &Path) -> Result<LocatedNotebook> {
        let metadata = fs::metadata(path)?;
        let relative = path
            .strip_prefix(&self.config.workspace_root)
            .unwrap_or(path);
        Ok(LocatedNotebook {
            path: fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf()),
            relative: relative.to_string_lossy().replace('\\', "/"),
            bytes: metadata.len(),
            last_modified: metadata.modified().ok().map(|time| {
                DateTime::<Utc>::from(time).to_rfc3339_opts(SecondsFormat::Secs, true)
            }),
        })
    }
}

#[async_trait]
impl NotebookRepository for PathNotebookRepository {
    fn list(&self, filter: &NotebookFilter) -> Result<Vec<LocatedNotebook>> {
        let mut out = Vec::new();
        let walker = WalkDir::new(&self.config.workspace_root)
            .into_iter()
            .filter_entry(|entry| entry.file_name() != CHECKPOINT_DIR);

        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() || !has_notebook_extension(entry.path()) {
                continue;
            }
            let located = self.locate(entry.path())?;
            if filter.matches(&located.relative) {
                out.push(located);
            }
        }

        out.sort_by(|a, b| a.relative.cmp(&b.relative));
        Ok(out)
    }

    fn resolve(&self, path: &Path) -> Result<PathBuf> {
        let joined = self.config.resolve_path(path);
        if !has_notebook_extension(&joined) {
            return Err(BackingStoreError::new(
                "open_notebook",
                format!("{} is not an .{NOTEBOOK_EXTENSION} file", joined.display()),
            )
            .into());
        }
        let absolute = std::path::absolute(&joined)?;
        Ok(fs::canonicalize(&absolute).unwrap_or(absolute))
    }

    async fn open(&self, resolved: &Path) -> Result<OpenedNotebook> {
        if !resolved.exists() {
            let parent_exists = resolved.parent().map(Path::is_dir).unwrap_or(false);
            if !parent_exists {
                return Err(BackingStoreError::new(
                    "open_notebook",
                    format!("directory for {} does not exist", resolved.display()),
                )
                .into());
            }
            tracing::info!(path = %resolved.display(), "creating new notebook");
            return Ok(OpenedNotebook {
                document: Arc::new(LiveNotebook::create(
                    resolved.to_path_buf(),
                    self.backend.clone(),
                )),
                created: true,
            });
        }

        let notebook = LiveNotebook::load(resolved, self.backend.clone())
            .await
            .map_err(|e| BackingStoreError::new("open_notebook", format!("{e:#}")))?;
        Ok(OpenedNotebook {
            document: Arc::new(notebook),
            created: false,
        })
    }
}

fn has_notebook_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(NOTEBOOK_EXTENSION))
        .unwrap_or(false)
}
