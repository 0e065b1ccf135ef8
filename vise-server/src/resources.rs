//! Static UI resource cache
//!
//! Lazily loads UI assets (HTML pages, stage panels, CSS, JS, favicon) from
//! the resource directory and keeps them in memory. A missing or unreadable
//! file is logged and served as empty content; asset problems never become
//! request errors.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use tracing::error;

pub const MAIN_HTML: &str = "vise_main.html";
pub const HOME_HTML: &str = "vise_home.html";
pub const NOT_FOUND_HTML: &str = "vise_404.html";

/// Placeholder in the home template replaced with the engine list.
pub const ENGINE_LIST_PLACEHOLDER: &str = "__SEARCH_ENGINE_LIST__";

pub struct ResourceCache {
    resource_dir: PathBuf,
    cache: RwLock<HashMap<String, Arc<Vec<u8>>>>,
}

impl ResourceCache {
    pub fn new(resource_dir: PathBuf) -> Self {
        Self {
            resource_dir,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// File contents by resource name, empty when the file cannot be read.
    pub fn get(&self, name: &str) -> Arc<Vec<u8>> {
        if let Some(contents) = self
            .cache
            .read()
            .expect("resource cache lock poisoned")
            .get(name)
        {
            return contents.clone();
        }

        let path = self.resource_dir.join(name);
        let contents = match std::fs::read(&path) {
            Ok(bytes) => Arc::new(bytes),
            Err(e) => {
                error!("resource {} not readable: {}", path.display(), e);
                Arc::new(Vec::new())
            }
        };

        self.cache
            .write()
            .expect("resource cache lock poisoned")
            .insert(name.to_string(), contents.clone());
        contents
    }

    /// Text resources (HTML templates); lossy on invalid UTF-8.
    pub fn get_text(&self, name: &str) -> String {
        String::from_utf8_lossy(&self.get(name)).into_owned()
    }
}
