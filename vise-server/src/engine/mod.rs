//! Search engine pipeline
//!
//! Owns the engine configuration, the image list, and the pipeline stage.
//! The stage is advanced exclusively by [`SearchEngine::advance`], whose
//! completion predicates consult on-disk artifacts only, so a restarted
//! process resumes exactly where the filesystem says it left off.

pub mod backend;
pub mod complexity;
pub mod scan;
pub mod stage;
mod training;

pub use backend::{ExternalToolBackend, StageBackend};
pub use scan::ImageEntry;
pub use stage::Stage;
pub use training::TrainingHandle;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use serde::Serialize;
use tracing::{error, info, warn};
use vise_common::config::EngineDirs;
use vise_common::{EngineConfig, Event, EventKind, EventQueue};

use crate::error::{Error, Result};

/// Characters a search engine name may not contain (they would change the
/// meaning of paths formed from the name).
const FORBIDDEN_NAME_CHARS: &[char] = &[' ', '*', '?', '/', '\\', '.'];

/// On-disk layout of one engine under the engine base directory.
#[derive(Debug, Clone)]
pub struct EnginePaths {
    pub enginedir: PathBuf,
    pub transformed_imgdir: PathBuf,
    pub training_datadir: PathBuf,
    pub tmp_datadir: PathBuf,
    pub imglist_fn: PathBuf,
    pub config_fn: PathBuf,
}

impl EnginePaths {
    pub fn new(basedir: &Path, name: &str) -> Self {
        let enginedir = basedir.join(name);
        let training_datadir = enginedir.join("training_data");
        Self {
            transformed_imgdir: enginedir.join("img"),
            tmp_datadir: enginedir.join("tmp"),
            imglist_fn: training_datadir.join("imlist.txt"),
            config_fn: training_datadir.join("vise_config.cfg"),
            training_datadir,
            enginedir,
        }
    }

    /// Layout view consumed by [`EngineConfig`] to derive artifact keys.
    pub fn config_dirs(&self) -> EngineDirs {
        EngineDirs {
            transformed_imgdir: self.transformed_imgdir.clone(),
            training_datadir: self.training_datadir.clone(),
            tmp_datadir: self.tmp_datadir.clone(),
            imglist_fn: self.imglist_fn.clone(),
        }
    }
}

/// Mutable engine fields. Written by request handlers and by the training
/// worker, so every access goes through the engine's lock.
struct EngineState {
    name: String,
    stage: Stage,
    config: EngineConfig,
    imglist: Vec<ImageEntry>,
    original_imgdir: PathBuf,
}

impl EngineState {
    fn empty() -> Self {
        Self {
            name: String::new(),
            stage: Stage::NotLoaded,
            config: EngineConfig::default(),
            imglist: Vec::new(),
            original_imgdir: PathBuf::new(),
        }
    }

    fn paths(&self, basedir: &Path) -> EnginePaths {
        EnginePaths::new(basedir, &self.name)
    }
}

/// Completion predicate: may the current stage hand over to its successor?
type CompletionPredicate = fn(&EngineState, &EnginePaths) -> bool;

/// Transition table: stage → completion predicate. The successor is always
/// [`Stage::next`]; predicates are pure functions of the engine name, the
/// in-memory config map, and artifact existence on disk.
static TRANSITION_TABLE: &[(Stage, CompletionPredicate)] = &[
    (Stage::NotLoaded, |s, _| !s.name.is_empty()),
    (Stage::Setting, |s, _| !s.config.is_empty()),
    (Stage::Info, |_, _| true),
    (Stage::Preprocess, |_, p| {
        p.config_fn.exists() && p.imglist_fn.exists()
    }),
    (Stage::Descriptor, |s, _| s.config.path("descFn").exists()),
    (Stage::Cluster, |s, _| s.config.path("clstFn").exists()),
    (Stage::Assign, |s, _| s.config.path("assignFn").exists()),
    (Stage::Hamm, |s, _| s.config.path("hammFn").exists()),
    (Stage::Index, |s, _| {
        ["dsetFn", "fidxFn", "iidxFn"]
            .iter()
            .all(|key| s.config.path(key).exists())
    }),
];

/// JSON snapshot served by the `/_state` route.
#[derive(Debug, Serialize)]
pub struct StateSnapshot {
    pub id: &'static str,
    pub state_id_list: Vec<usize>,
    pub state_name_list: Vec<&'static str>,
    pub state_info_list: Vec<String>,
    pub current_state_id: usize,
    pub search_engine_name: String,
}

/// The pipeline driver for one process.
///
/// Handlers and the training worker share one instance; all mutation is
/// serialized through the internal lock.
pub struct SearchEngine {
    basedir: PathBuf,
    tool_dir: PathBuf,
    queue: Arc<EventQueue>,
    backend: Arc<dyn StageBackend>,
    state: RwLock<EngineState>,
    training: Mutex<Option<TrainingHandle>>,
}

impl SearchEngine {
    /// `basedir` is the directory holding all engine directories.
    pub fn new(
        basedir: PathBuf,
        tool_dir: PathBuf,
        queue: Arc<EventQueue>,
        backend: Arc<dyn StageBackend>,
    ) -> Self {
        if let Err(e) = fs::create_dir_all(&basedir) {
            error!("cannot create engine base dir {}: {}", basedir.display(), e);
        }
        Self {
            basedir,
            tool_dir,
            queue,
            backend,
            state: RwLock::new(EngineState::empty()),
            training: Mutex::new(None),
        }
    }

    pub fn name(&self) -> String {
        self.read_state().name.clone()
    }

    pub fn current_stage(&self) -> Stage {
        self.read_state().stage
    }

    pub fn paths(&self) -> EnginePaths {
        let state = self.read_state();
        state.paths(&self.basedir)
    }

    /// A name is acceptable when it cannot escape the engine base directory
    /// or glob across it.
    pub fn validate_name(name: &str) -> bool {
        !name.is_empty() && !name.contains(FORBIDDEN_NAME_CHARS)
    }

    /// Point the engine at `name` and (re)create its directory layout.
    /// Resets the stage to NotLoaded; idempotent.
    pub fn init(&self, name: &str) -> Result<()> {
        let paths = EnginePaths::new(&self.basedir, name);
        for dir in [
            &paths.enginedir,
            &paths.transformed_imgdir,
            &paths.training_datadir,
            &paths.tmp_datadir,
        ] {
            fs::create_dir_all(dir)?;
        }

        let mut state = self.write_state();
        state.name = name.to_string();
        state.stage = Stage::NotLoaded;
        state.config = EngineConfig::new(name);
        state.imglist.clear();
        state.original_imgdir = PathBuf::new();
        Ok(())
    }

    /// Create a new engine directory and move it to the Setting stage.
    pub fn create(&self, name: &str) -> Result<()> {
        if !Self::validate_name(name) {
            return Err(Error::BadRequest(format!("invalid engine name: {name}")));
        }
        self.init(name)?;
        if !self.advance() {
            return Err(Error::InvalidState(format!(
                "engine {name} did not reach the Setting stage"
            )));
        }
        info!(engine = name, "created search engine");
        Ok(())
    }

    /// Load an existing engine: read its persisted config and image list,
    /// then replay `advance()` until the on-disk artifacts stop it. The
    /// resulting stage is a pure function of filesystem state.
    pub fn load(&self, name: &str) -> Result<()> {
        if !Self::validate_name(name) {
            return Err(Error::BadRequest(format!("invalid engine name: {name}")));
        }
        if !self.exists(name) {
            return Err(Error::NotFound(format!("no such engine: {name}")));
        }
        self.init(name)?;

        let paths = EnginePaths::new(&self.basedir, name);
        {
            let mut state = self.write_state();
            if let Some(config) = EngineConfig::load(&paths.config_fn) {
                state.original_imgdir = config.path("imagePath");
                state.config = config;
            }
            state.imglist = load_imglist(&paths.imglist_fn);
        }

        while self.advance() {}
        info!(
            engine = name,
            stage = self.current_stage().name(),
            "loaded search engine"
        );
        Ok(())
    }

    /// Remove an engine directory tree.
    pub fn delete(&self, name: &str) -> Result<()> {
        if !Self::validate_name(name) {
            return Err(Error::BadRequest(format!("invalid engine name: {name}")));
        }
        let engine_path = self.basedir.join(name);
        fs::remove_dir_all(&engine_path)?;
        info!(engine = name, "deleted search engine");
        Ok(())
    }

    pub fn exists(&self, name: &str) -> bool {
        self.basedir.join(name).is_dir()
    }

    /// Names of all engine directories under the base directory.
    pub fn engine_list(&self) -> Vec<String> {
        let mut names = Vec::new();
        let entries = match fs::read_dir(&self.basedir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("cannot list {}: {}", self.basedir.display(), e);
                return names;
            }
        };
        for entry in entries.flatten() {
            if entry.path().is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        names
    }

    /// The sole stage transition primitive. Evaluates the current stage's
    /// completion predicate; on success the stage moves to its successor
    /// and `true` is returned, otherwise the stage is unchanged.
    pub fn advance(&self) -> bool {
        let mut state = self.write_state();
        let paths = state.paths(&self.basedir);

        let predicate = TRANSITION_TABLE
            .iter()
            .find(|(stage, _)| *stage == state.stage)
            .map(|(_, predicate)| predicate);

        match (predicate, state.stage.next()) {
            (Some(predicate), Some(next)) if predicate(&state, &paths) => {
                state.stage = next;
                true
            }
            _ => false,
        }
    }

    /// Merge user-supplied `key=value` lines into the engine config and
    /// persist the result. Derived keys are recomputed, never overridden.
    pub fn apply_user_config(&self, text: &str) {
        let mut state = self.write_state();
        let paths = state.paths(&self.basedir);
        state.config.apply_user_config(text, &paths.config_dirs());
        state.original_imgdir = state.config.path("imagePath");
        state.config.save(&paths.config_fn);
    }

    pub fn config_param(&self, key: &str) -> String {
        self.read_state().config.get(key).to_string()
    }

    pub fn set_config_param(&self, key: &str, value: &str) {
        self.write_state().config.set(key, value);
    }

    /// Snapshot of config plus its file path, for handing to the backend.
    pub fn config_snapshot(&self) -> (EngineConfig, PathBuf) {
        let state = self.read_state();
        let paths = state.paths(&self.basedir);
        (state.config.clone(), paths.config_fn)
    }

    /// Persist the current config to `vise_config.cfg`.
    pub fn save_config(&self) {
        let state = self.read_state();
        let paths = state.paths(&self.basedir);
        state.config.save(&paths.config_fn);
    }

    pub fn imglist_len(&self) -> usize {
        self.read_state().imglist.len()
    }

    /// Directory the source images were scanned from.
    pub fn original_imgdir(&self) -> PathBuf {
        self.read_state().original_imgdir.clone()
    }

    /// Directory holding the preprocessed image copies.
    pub fn transformed_imgdir(&self) -> PathBuf {
        self.paths().transformed_imgdir
    }

    pub fn state_snapshot(&self) -> StateSnapshot {
        let state = self.read_state();
        let img_count = state.imglist.len();
        StateSnapshot {
            id: "search_engine_state",
            state_id_list: Stage::ALL.iter().map(|s| s.id()).collect(),
            state_name_list: Stage::ALL.iter().map(|s| s.name()).collect(),
            state_info_list: Stage::ALL
                .iter()
                .map(|s| complexity::stage_info(*s, img_count))
                .collect(),
            current_state_id: state.stage.id(),
            search_engine_name: state.name.clone(),
        }
    }

    /// HTML overview of estimated training cost for the Info panel.
    pub fn overview_html(&self) -> String {
        complexity::overview_html(self.imglist_len())
    }

    // ------------------------------------------------------------------
    // Event emission
    // ------------------------------------------------------------------

    pub(crate) fn send_packet(&self, sender: &str, kind: EventKind, payload: impl Into<String>) {
        self.queue.push(Event::new(sender, kind, payload));
    }

    pub(crate) fn send_log(&self, sender: &str, log: impl Into<String>) {
        self.send_packet(sender, EventKind::Log, log);
    }

    pub(crate) fn send_command(&self, sender: &str, command: impl Into<String>) {
        self.send_packet(sender, EventKind::Command, command);
    }

    /// Message attributed to the current stage.
    pub(crate) fn send_message(&self, message: impl Into<String>) {
        let sender = self.current_stage().name();
        self.send_packet(sender, EventKind::Message, message);
    }

    pub(crate) fn send_progress(&self, sender: &str, completed: u64, total: u64) {
        self.send_packet(sender, EventKind::Progress, format!("{completed}/{total}"));
    }

    pub(crate) fn send_progress_message(&self, sender: &str, message: impl Into<String>) {
        self.send_packet(sender, EventKind::Progress, message);
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, EngineState> {
        self.state.read().expect("engine state lock poisoned")
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, EngineState> {
        self.state.write().expect("engine state lock poisoned")
    }
}

/// Write the image list, one relative path per line. Failures are logged;
/// the next preprocess run will retry.
fn write_imglist(path: &Path, imglist: &[ImageEntry]) {
    let mut out = String::new();
    for entry in imglist {
        out.push_str(&entry.rel_path.to_string_lossy());
        out.push('\n');
    }
    if let Err(e) = fs::write(path, out) {
        error!("failed to write image list {}: {}", path.display(), e);
    }
}

/// Read the image list back; sizes are unknown after a restart and read as
/// zero until the next scan.
fn load_imglist(path: &Path) -> Vec<ImageEntry> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(_) => return Vec::new(),
    };
    text.lines()
        .filter(|line| !line.is_empty())
        .map(|line| ImageEntry {
            rel_path: PathBuf::from(line),
            original_size: 0,
            transformed_size: 0,
        })
        .collect()
}
