use crate::config::{ExecutionConfig, ServerConfig};
use crate::errors::NoActiveNotebookError;
use crate::kernel::create_kernel;
use crate::model::{NotebookEntry, NotebookListResponse};
use crate::notebook::{
    NotebookDocument, NotebookFilter, NotebookRepository, OpenedNotebook, PathNotebookRepository,
};
use crate::service::NotebookService;
use anyhow::Result;
use lru::LruCache;
use parking_lot::RwLock;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct AppState {
    config: Arc<ServerConfig>,
    repository: Arc<dyn NotebookRepository>,
    cache: RwLock<LruCache<PathBuf, Arc<dyn NotebookDocument>>>,
    active: RwLock<Option<Arc<dyn NotebookDocument>>>,
}

impl AppState {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        let backend = create_kernel(&config.kernel);
        let repository: Arc<dyn NotebookRepository> =
            Arc::new(PathNotebookRepository::new(config.clone(), backend));
        Self::new_with_repository(config, repository)
    }

    pub fn new_with_repository(
        config: Arc<ServerConfig>,
        repository: Arc<dyn NotebookRepository>,
    ) -> Self {
        let capacity = NonZeroUsize::new(config.cache_capacity.max(1)).unwrap_or(NonZeroUsize::MIN);

        Self {
            config,
            repository,
            cache: RwLock::new(LruCache::new(capacity)),
            active: RwLock::new(None),
        }
    }

    pub fn config(&self) -> Arc<ServerConfig> {
        self.config.clone()
    }

    pub fn execution(&self) -> ExecutionConfig {
        self.config.execution()
    }

    pub fn list_notebooks(&self, filter: &NotebookFilter) -> Result<NotebookListResponse> {
        let located = self.repository.list(filter)?;
        let cache = self.cache.read();
        let active_path = self.active.read().as_ref().map(|doc| doc.descriptor().path);
        let notebooks = located
            .into_iter()
            .map(|entry| NotebookEntry {
                open: cache.contains(&entry.path) || active_path.as_ref() == Some(&entry.path),
                path: entry.relative,
                bytes: entry.bytes,
                last_modified: entry.last_modified,
            })
            .collect();
        Ok(NotebookListResponse { notebooks })
    }

    /// Opens (or reuses) the notebook at `path` and makes it the active one.
    pub async fn open_notebook(&self, path: &Path) -> Result<OpenedNotebook> {
        let resolved = self.repository.resolve(path)?;

        if let Some(document) = self.lookup(&resolved) {
            self.activate(&resolved, document.clone());
            return Ok(OpenedNotebook {
                document,
                created: false,
            });
        }

        let opened = self.repository.open(&resolved).await?;
        tracing::info!(
            path = %resolved.display(),
            created = opened.created,
            cells = opened.document.cell_count(),
            "notebook opened"
        );
        self.activate(&resolved, opened.document.clone());
        Ok(opened)
    }

    pub fn active_notebook(&self) -> Result<Arc<dyn NotebookDocument>> {
        self.active
            .read()
            .clone()
            .ok_or_else(|| NoActiveNotebookError.into())
    }

    pub fn active_service(&self) -> Result<NotebookService> {
        self.active_notebook().map(NotebookService::new)
    }

    fn lookup(&self, resolved: &Path) -> Option<Arc<dyn NotebookDocument>> {
        if let Some(active) = self.active.read().as_ref()
            && active.descriptor().path == resolved
        {
            return Some(active.clone());
        }
        self.cache.write().get(resolved).cloned()
    }

    fn activate(&self, resolved: &Path, document: Arc<dyn NotebookDocument>) {
        let evicted = self
            .cache
            .write()
            .push(resolved.to_path_buf(), document.clone());
        if let Some((path, old)) = evicted
            && path != resolved
            && old.is_dirty()
        {
            tracing::warn!(path = %path.display(), "evicted notebook had unsaved changes");
        }
        *self.active.write() = Some(document);
    }
}
