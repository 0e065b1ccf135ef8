//! Engine configuration
//!
//! A flat string-to-string map persisted as a `[name]` header line followed
//! by `key=value` lines. A fixed subset of keys (artifact file names and
//! directories) is always recomputed from the engine's directory layout and
//! can never be overridden by user-supplied input.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::error;

use crate::error::{Error, Result};

/// Directory layout of one engine, used to recompute the derived keys.
#[derive(Debug, Clone)]
pub struct EngineDirs {
    /// Destination of transformed images (`<engine>/img/`)
    pub transformed_imgdir: PathBuf,
    /// Training data directory (`<engine>/training_data/`)
    pub training_datadir: PathBuf,
    /// Scratch space (`<engine>/tmp/`)
    pub tmp_datadir: PathBuf,
    /// Image list file (`<engine>/training_data/imlist.txt`)
    pub imglist_fn: PathBuf,
}

/// Keys recomputed from [`EngineDirs`] on every user-config update.
const DERIVED_KEYS: &[&str] = &[
    "trainDatabasePath",
    "databasePath",
    "trainImagelistFn",
    "imagelistFn",
    "trainFilesPrefix",
    "pathManHide",
    "descFn",
    "assignFn",
    "hammFn",
    "dsetFn",
    "clstFn",
    "iidxFn",
    "fidxFn",
    "wghtFn",
    "tmpDir",
];

/// Configuration of one search engine.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    name: String,
    params: BTreeMap<String, String>,
}

impl EngineConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Look up a parameter; absent keys read as the empty string.
    pub fn get(&self, key: &str) -> &str {
        self.params.get(key).map(String::as_str).unwrap_or("")
    }

    pub fn contains(&self, key: &str) -> bool {
        self.params.contains_key(key)
    }

    /// Parameter interpreted as a filesystem path.
    pub fn path(&self, key: &str) -> PathBuf {
        PathBuf::from(self.get(key))
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.params.insert(key.into(), value.into());
    }

    /// Merge user-supplied `key=value` lines, then recompute the derived
    /// keys so user input cannot override them. Lines without `=` are
    /// ignored.
    pub fn apply_user_config(&mut self, text: &str, dirs: &EngineDirs) {
        for line in text.lines() {
            if let Some((key, value)) = line.split_once('=') {
                self.params.insert(key.to_string(), value.to_string());
            }
        }
        self.apply_derived(dirs);
    }

    /// Recompute the derived artifact paths from the engine layout.
    pub fn apply_derived(&mut self, dirs: &EngineDirs) {
        let imgdir = dirs.transformed_imgdir.to_string_lossy().into_owned();
        let imglist = dirs.imglist_fn.to_string_lossy().into_owned();
        let prefix = dirs.training_datadir.join("train_");
        let prefix = prefix.to_string_lossy().into_owned();

        self.set("trainDatabasePath", imgdir.clone());
        self.set("databasePath", imgdir.clone());
        self.set("trainImagelistFn", imglist.clone());
        self.set("imagelistFn", imglist);
        self.set("trainFilesPrefix", prefix.clone());
        self.set("pathManHide", imgdir);
        self.set("descFn", format!("{prefix}descs.e3bin"));
        self.set("assignFn", format!("{prefix}assign.bin"));
        self.set("hammFn", format!("{prefix}hamm.v2bin"));
        self.set("dsetFn", format!("{prefix}dset.v2bin"));
        self.set("clstFn", format!("{prefix}clst.e3bin"));
        self.set("iidxFn", format!("{prefix}iidx.e3bin"));
        self.set("fidxFn", format!("{prefix}fidx.e3bin"));
        self.set("wghtFn", format!("{prefix}wght.e3bin"));
        self.set("tmpDir", dirs.tmp_datadir.to_string_lossy().into_owned());
    }

    pub fn derived_keys() -> &'static [&'static str] {
        DERIVED_KEYS
    }

    /// Serialize to the persisted form: `[name]` header + `key=value` lines.
    pub fn to_config_string(&self) -> String {
        let mut out = format!("[{}]", self.name);
        for (key, value) in &self.params {
            out.push('\n');
            out.push_str(key);
            out.push('=');
            out.push_str(value);
        }
        out
    }

    /// Parse the persisted form. The header line carries the engine name.
    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = text.lines();
        let header = lines
            .next()
            .ok_or_else(|| Error::Config("empty config file".to_string()))?;
        let name = header
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .ok_or_else(|| Error::Config(format!("malformed config header: {header}")))?;

        let mut config = EngineConfig::new(name);
        for line in lines {
            if let Some((key, value)) = line.split_once('=') {
                config.params.insert(key.to_string(), value.to_string());
            }
        }
        Ok(config)
    }

    /// Write the config file, logging (not propagating) failures.
    pub fn save(&self, path: &Path) {
        if let Err(e) = fs::write(path, self.to_config_string()) {
            error!("failed to write engine config {}: {}", path.display(), e);
        }
    }

    /// Read a config file; `None` when missing or unreadable (logged).
    pub fn load(path: &Path) -> Option<Self> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                error!("failed to read engine config {}: {}", path.display(), e);
                return None;
            }
        };
        match Self::parse(&text) {
            Ok(config) => Some(config),
            Err(e) => {
                error!("failed to parse engine config {}: {}", path.display(), e);
                None
            }
        }
    }
}
