//! Server configuration and data directory resolution

use std::path::PathBuf;

/// Runtime configuration assembled in `main`
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub port: u16,
    pub threads: usize,
    pub data_dir: PathBuf,
    pub resource_dir: PathBuf,
    pub tool_dir: PathBuf,
}

impl ServerConfig {
    /// Directory holding all engine directories (`<data_dir>/search_engines`)
    pub fn engine_dir(&self) -> PathBuf {
        self.data_dir.join("search_engines")
    }

    /// Operational log directory (`<data_dir>/log`)
    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("log")
    }
}

/// Resolve the data directory following the priority order:
/// 1. Command-line argument (highest priority)
/// 2. `VISE_DATA_DIR` environment variable
/// 3. `config.toml` in the platform config directory
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_data_dir(cli_arg: Option<&PathBuf>) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return path.clone();
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var("VISE_DATA_DIR") {
        return PathBuf::from(path);
    }

    // Priority 3: TOML config file
    if let Some(config_path) = dirs::config_dir().map(|d| d.join("vise").join("config.toml")) {
        if let Ok(toml_content) = std::fs::read_to_string(&config_path) {
            if let Ok(config) = toml::from_str::<toml::Value>(&toml_content) {
                if let Some(data_dir) = config.get("data_dir").and_then(|v| v.as_str()) {
                    return PathBuf::from(data_dir);
                }
            }
        }
    }

    // Priority 4: OS-dependent compiled default
    dirs::data_local_dir()
        .map(|d| d.join("vise"))
        .unwrap_or_else(|| PathBuf::from("./vise_data"))
}
