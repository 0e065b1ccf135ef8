//! Stage computation backend
//!
//! The descriptor/assignment/hamming/index computations and the query
//! serving backend are external to this server. Each operation either
//! succeeds and leaves the named artifact file(s) on disk, or it does not;
//! the engine only ever re-checks artifact existence afterwards.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, info};
use vise_common::EngineConfig;

use crate::error::{Error, Result};

/// Seam for the externally-delegated stage computations.
///
/// Every method receives the engine configuration plus the path of its
/// persisted config file (the interface external tools consume).
pub trait StageBackend: Send + Sync + 'static {
    /// Compute training descriptors (`descFn`).
    fn compute_descriptors(&self, config: &EngineConfig, config_fn: &Path) -> Result<()>;

    /// Assign training descriptors to cluster centers (`assignFn`).
    fn compute_assignments(&self, config: &EngineConfig, config_fn: &Path) -> Result<()>;

    /// Compute hamming embeddings (`hammFn`).
    fn compute_hamming(&self, config: &EngineConfig, config_fn: &Path) -> Result<()>;

    /// Build the dataset and forward/inverted index files
    /// (`dsetFn`, `fidxFn`, `iidxFn`).
    fn build_index(&self, config: &EngineConfig, config_fn: &Path) -> Result<()>;

    /// Initialize the serving backend for queries after indexing.
    fn init_query(&self, config: &EngineConfig, config_fn: &Path) -> Result<()>;
}

/// Production backend: runs one external tool per stage from the tool
/// directory, passing the engine name and config file path.
///
/// A missing tool is reported as an error to the caller, which logs it and
/// leaves the stage artifact absent; the pipeline then stalls at that stage
/// until the operator installs the tool.
pub struct ExternalToolBackend {
    tool_dir: PathBuf,
}

impl ExternalToolBackend {
    pub fn new(tool_dir: PathBuf) -> Self {
        Self { tool_dir }
    }

    fn run_tool(&self, tool: &str, config: &EngineConfig, config_fn: &Path) -> Result<()> {
        let tool_path = self.tool_dir.join(tool);
        if !tool_path.exists() {
            return Err(Error::Subprocess(format!(
                "tool not installed: {}",
                tool_path.display()
            )));
        }

        debug!(tool, engine = config.name(), "running stage tool");

        let output = Command::new(&tool_path)
            .arg(config.name())
            .arg(config_fn)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| Error::Subprocess(format!("failed to run {tool}: {e}")))?;

        if output.status.success() {
            info!(tool, engine = config.name(), "stage tool finished");
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(Error::Subprocess(format!(
                "{tool} exited with {}: {}",
                output.status,
                stderr.trim()
            )))
        }
    }
}

impl StageBackend for ExternalToolBackend {
    fn compute_descriptors(&self, config: &EngineConfig, config_fn: &Path) -> Result<()> {
        self.run_tool("compute_descriptors", config, config_fn)
    }

    fn compute_assignments(&self, config: &EngineConfig, config_fn: &Path) -> Result<()> {
        self.run_tool("compute_assignments", config, config_fn)
    }

    fn compute_hamming(&self, config: &EngineConfig, config_fn: &Path) -> Result<()> {
        self.run_tool("compute_hamming", config, config_fn)
    }

    fn build_index(&self, config: &EngineConfig, config_fn: &Path) -> Result<()> {
        self.run_tool("build_index", config, config_fn)
    }

    fn init_query(&self, config: &EngineConfig, _config_fn: &Path) -> Result<()> {
        // Query serving runs in-process in a later iteration; for now the
        // backend only verifies the index artifacts are in place.
        for key in ["dsetFn", "fidxFn", "iidxFn"] {
            let path = config.path(key);
            if !path.exists() {
                return Err(Error::NotFound(format!(
                    "index artifact missing: {}",
                    path.display()
                )));
            }
        }
        info!(engine = config.name(), "query backend initialized");
        Ok(())
    }
}

/// Build the cluster tool command line. Clustering is special-cased by the
/// engine (progress is scraped from the subprocess stdout), so only the
/// command construction lives here.
pub fn cluster_command(tool_dir: &Path, engine_name: &str, config_fn: &Path) -> Command {
    let script = tool_dir.join("compute_clusters.py");
    let mut cmd = Command::new("python");
    cmd.arg(script).arg(engine_name).arg(config_fn);
    cmd
}
