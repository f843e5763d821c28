//! Execution engines that run code cells.
//!
//! The document layer owns scheduling; a [`KernelBackend`] only turns one cell's
//! source into output records.

use crate::config::KernelConfig;
use crate::model::OutputRecord;
use anyhow::Result;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub mod process;

pub use process::ProcessKernel;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct KernelDescriptor {
    pub name: String,
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl KernelDescriptor {
    pub fn new(name: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            language: language.into(),
            display_name: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct KernelRun {
    pub outputs: Vec<OutputRecord>,
    pub duration_ms: u64,
}

impl KernelRun {
    pub fn failed(&self) -> bool {
        self.outputs.iter().any(OutputRecord::is_error)
    }
}

#[async_trait]
pub trait KernelBackend: Send + Sync {
    async fn execute(&self, code: &str) -> Result<KernelRun>;
    fn descriptor(&self) -> KernelDescriptor;
    fn name(&self) -> &'static str;
}

pub fn create_kernel(config: &KernelConfig) -> Arc<dyn KernelBackend> {
    Arc::new(ProcessKernel::new(config))
}
