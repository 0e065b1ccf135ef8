//! Training worker
//!
//! One background worker walks the pipeline from the engine's current
//! stage: run the stage operation, advance, repeat. Stage operations are
//! idempotent (artifact-guarded), so a crashed or cancelled run resumes
//! cleanly. Cancellation is cooperative and takes effect only at stage
//! boundaries; a stage's own work is never preempted.

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::Result;

use super::{backend, scan, stage::Stage, write_imglist, SearchEngine};

/// Target number of training descriptors per image.
const DESCRIPTORS_PER_IMAGE: u64 = 1000;
/// Vocabulary size = total descriptors / this factor.
const VOCABULARY_SIZE_FACTOR: u64 = 10;

/// A running (or finished) training worker plus its cancellation token.
pub struct TrainingHandle {
    task: tokio::task::JoinHandle<()>,
    cancel: CancellationToken,
}

impl SearchEngine {
    /// Start the background training worker. At most one worker is active
    /// per engine; a second request while one is running is ignored.
    pub fn start_training(self: Arc<Self>) -> bool {
        let mut slot = self.training.lock().expect("training slot poisoned");
        if let Some(handle) = slot.as_ref() {
            if !handle.task.is_finished() {
                warn!("training worker already active, ignoring start request");
                return false;
            }
        }

        let cancel = CancellationToken::new();
        let worker = Arc::clone(&self);
        let token = cancel.clone();
        let task = tokio::task::spawn_blocking(move || worker.train(token));
        *slot = Some(TrainingHandle { task, cancel });
        true
    }

    /// Request cancellation of the training worker. Takes effect at the
    /// next stage boundary, never mid-stage.
    pub fn stop_training(&self) {
        let slot = self.training.lock().expect("training slot poisoned");
        if let Some(handle) = slot.as_ref() {
            info!("training stop requested, effective at the next stage boundary");
            handle.cancel.cancel();
        }
    }

    /// Worker body. Runs on the blocking thread pool.
    fn train(self: Arc<Self>, cancel: CancellationToken) {
        self.send_command("SearchEngine", "_log clear hide");
        self.send_command("SearchEngine", "_control_panel clear all");
        self.send_command(
            "SearchEngine",
            "_control_panel add <div id=\"toggle_log\" class=\"action_button\" \
             onclick=\"_vise_toggle_log()\">Log</div>",
        );

        loop {
            if cancel.is_cancelled() {
                self.send_log("SearchEngine", "Stopped training process on user request");
                return;
            }

            let stage = self.current_stage();
            match stage {
                Stage::Preprocess => self.preprocess(),
                Stage::Descriptor => self.descriptor(),
                Stage::Cluster => self.cluster(),
                Stage::Assign => self.assign(),
                Stage::Hamm => self.hamm(),
                Stage::Index => self.index_files(),
                Stage::Query => break,
                other => {
                    self.send_message(format!("{} : cannot train from this stage", other.name()));
                    return;
                }
            }

            if self.advance() {
                self.send_command("SearchEngine", "_state update_now");
            } else {
                self.send_message(format!(
                    "{} : failed to change to next state",
                    self.current_stage().name()
                ));
                return;
            }
        }

        self.query_init();
        self.send_command("SearchEngine", "_go_to home");
    }

    /// Build the image list (first run only) and populate the transformed
    /// image directory. Per-file failures are logged and skipped; only the
    /// final `imlist.txt` write marks the stage complete.
    pub(crate) fn preprocess(&self) {
        let unscanned_image_path = {
            let state = self.read_state();
            if state.imglist.is_empty() {
                Some(state.config.path("imagePath"))
            } else {
                None
            }
        };
        if let Some(dir) = unscanned_image_path {
            let entries = scan::scan_image_dir(&dir);
            let mut state = self.write_state();
            state.original_imgdir = dir;
            state.imglist = entries;
        }

        let paths = self.paths();
        if paths.imglist_fn.exists() {
            return;
        }

        self.send_log("Preprocess", "Preprocessing started ...");
        self.send_command("Preprocess", "_progress reset show");

        let (imglist, original_imgdir, width_param) = {
            let state = self.read_state();
            (
                state.imglist.clone(),
                state.original_imgdir.clone(),
                state.config.get("transformed_img_width").to_string(),
            )
        };

        let resize_width = match width_param.as_str() {
            "original" | "" => None,
            other => match other.parse::<u32>() {
                Ok(width) if width > 0 => Some(width),
                _ => {
                    warn!("unusable transformed_img_width {:?}, copying instead", other);
                    None
                }
            },
        };

        match resize_width {
            Some(_) => self.send_log(
                "Preprocess",
                format!(
                    "Saving transformed images to [{}]",
                    paths.transformed_imgdir.display()
                ),
            ),
            None => self.send_log(
                "Preprocess",
                format!(
                    "Copying original images to [{}]",
                    paths.transformed_imgdir.display()
                ),
            ),
        }

        let total = imglist.len() as u64;
        // Progress cadence: resizing is slow, copying is fast.
        let progress_every = if resize_width.is_some() { 5 } else { 50 };
        let mut transformed_sizes: Vec<(usize, u64)> = Vec::new();

        for (i, entry) in imglist.iter().enumerate() {
            let src = original_imgdir.join(&entry.rel_path);
            let dest = paths.transformed_imgdir.join(&entry.rel_path);
            if dest.exists() {
                continue;
            }

            let result = (|| -> Result<u64> {
                if let Some(parent) = dest.parent() {
                    if !parent.is_dir() {
                        fs::create_dir_all(parent)?;
                    }
                }
                match resize_width {
                    Some(width) => resize_and_save(&src, &dest, width),
                    None => {
                        fs::copy(&src, &dest)?;
                        Ok(entry.original_size)
                    }
                }
            })();

            match result {
                Ok(size) => {
                    transformed_sizes.push((i, size));
                    if i % progress_every == 0 {
                        self.send_progress("Preprocess", (i + 1) as u64, total);
                    }
                    if i % 50 == 0 {
                        self.send_log("Preprocess", ".");
                    }
                }
                Err(e) => {
                    warn!("preprocess: {} failed: {}", src.display(), e);
                    self.send_log(
                        "Preprocess",
                        format!("{} : Error [{}]", src.display(), e),
                    );
                }
            }
        }

        if resize_width.is_some() {
            self.send_progress("Preprocess", total, total);
        }
        self.send_log("Preprocess", "[Done]");

        {
            let mut state = self.write_state();
            for (i, size) in transformed_sizes {
                if let Some(entry) = state.imglist.get_mut(i) {
                    entry.transformed_size = size;
                }
            }
            write_imglist(&paths.imglist_fn, &state.imglist);
        }
        self.send_log(
            "Preprocess",
            format!("Written image list to : [{}]", paths.imglist_fn.display()),
        );
    }

    /// Compute training descriptors via the backend.
    pub(crate) fn descriptor(&self) {
        let desc_fn = self.read_state().config.path("descFn");
        if !desc_fn.exists() {
            self.send_log("Descriptor", "Computing training descriptors ...");
            self.send_command("Descriptor", "_progress reset show");
            self.send_progress_message("Descriptor", "Starting to compute image descriptors");

            // Vocabulary size scales with the collection size.
            let train_num_descs = self.imglist_len() as u64 * DESCRIPTORS_PER_IMAGE;
            let voc_size = train_num_descs / VOCABULARY_SIZE_FACTOR;
            self.set_config_param("vocSize", &voc_size.to_string());
            self.save_config();

            let (config, config_fn) = self.config_snapshot();
            match self.backend.compute_descriptors(&config, &config_fn) {
                Ok(()) => self.send_log("Descriptor", "Completed computing descriptors"),
                Err(e) => {
                    warn!("descriptor computation failed: {}", e);
                    self.send_log("Descriptor", format!("descriptor computation failed: {e}"));
                }
            }
        }
        self.send_command("Descriptor", "_progress reset hide");
    }

    /// Cluster descriptors by supervising the external clustering script.
    ///
    /// Stdout is consumed line by line; every line becomes a `log` event and
    /// `Iteration <completed>/<total>` lines additionally emit `progress`.
    /// A spawn failure is logged only: the artifact stays absent and the
    /// pipeline stalls at this stage.
    pub(crate) fn cluster(&self) {
        let clst_fn = self.read_state().config.path("clstFn");
        if clst_fn.exists() {
            return;
        }

        self.send_log("Cluster", "Starting clustering of descriptors ...");
        self.send_command("Cluster", "_progress reset show");
        self.send_progress_message("Cluster", "Starting clustering of descriptors");

        let (name, config_fn) = {
            let state = self.read_state();
            (state.name.clone(), state.paths(&self.basedir).config_fn)
        };

        let mut cmd = backend::cluster_command(&self.tool_dir, &name, &config_fn);
        cmd.stdout(Stdio::piped()).stderr(Stdio::null());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("failed to spawn clustering subprocess: {}", e);
                return;
            }
        };
        self.send_log(
            "Cluster",
            format!(
                "Command executed: $python {} {} {}",
                self.tool_dir.join("compute_clusters.py").display(),
                name,
                config_fn.display()
            ),
        );

        if let Some(stdout) = child.stdout.take() {
            for line in BufReader::new(stdout).lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("error reading clustering output: {}", e);
                        break;
                    }
                };
                self.send_log("Cluster", line.clone());
                if let Some((completed, total)) = parse_iteration_progress(&line) {
                    self.send_progress("Cluster", completed, total);
                }
            }
        }
        if let Err(e) = child.wait() {
            warn!("clustering subprocess wait failed: {}", e);
        }
        self.send_command("Cluster", "_progress reset hide");
    }

    /// Assign training descriptors to cluster centers via the backend.
    pub(crate) fn assign(&self) {
        let assign_fn = self.read_state().config.path("assignFn");
        if !assign_fn.exists() {
            self.send_log("Assign", "Starting assignment ...");
            self.send_progress_message("Assign", "Starting assignment");

            let (config, config_fn) = self.config_snapshot();
            if let Err(e) = self.backend.compute_assignments(&config, &config_fn) {
                warn!("assignment computation failed: {}", e);
                self.send_log("Assign", format!("assignment computation failed: {e}"));
            }
        }
        self.send_command("Assign", "_progress reset hide");
    }

    /// Compute hamming embeddings via the backend.
    pub(crate) fn hamm(&self) {
        let hamm_fn = self.read_state().config.path("hammFn");
        if !hamm_fn.exists() {
            self.send_log("Hamm", "Computing hamming embeddings ...");
            self.send_progress_message("Hamm", "Starting to compute hamming embeddings");

            let (config, config_fn) = self.config_snapshot();
            if let Err(e) = self.backend.compute_hamming(&config, &config_fn) {
                warn!("hamming computation failed: {}", e);
                self.send_log("Hamm", format!("hamming computation failed: {e}"));
            }
        }
        self.send_command("Hamm", "_progress reset hide");
    }

    /// Build the dataset and index files via the backend.
    pub(crate) fn index_files(&self) {
        let index_complete = {
            let state = self.read_state();
            ["dsetFn", "fidxFn", "iidxFn"]
                .iter()
                .all(|key| state.config.path(key).exists())
        };
        if !index_complete {
            self.send_log("Index", "Starting indexing ...");
            self.send_command("Index", "_progress reset show");
            self.send_progress_message("Index", "Starting image indexing");

            let (config, config_fn) = self.config_snapshot();
            if let Err(e) = self.backend.build_index(&config, &config_fn) {
                warn!("index build failed: {}", e);
                self.send_log("Index", format!("index build failed: {e}"));
            }
        }
        self.send_command("Index", "_progress reset hide");
    }

    /// Kick off the query serving backend on its own background thread so
    /// the training worker can finish.
    pub(crate) fn query_init(&self) {
        let (config, config_fn) = self.config_snapshot();
        let backend = self.backend.clone();
        let queue = self.queue.clone();
        std::thread::spawn(move || {
            if let Err(e) = backend.init_query(&config, &config_fn) {
                warn!(engine = config.name(), "query backend init failed: {}", e);
                queue.push(vise_common::Event::new(
                    "SearchEngine",
                    vise_common::EventKind::Log,
                    format!("query backend init failed: {e}"),
                ));
            }
        });
    }
}

/// Decode, resize to `width` preserving aspect ratio, and re-encode at the
/// destination path. Returns the transformed file size.
fn resize_and_save(src: &Path, dest: &Path, width: u32) -> Result<u64> {
    use image::GenericImageView;

    let img = image::open(src)?;
    let (src_width, src_height) = img.dimensions();
    let aspect = src_height as f64 / src_width as f64;
    let height = ((width as f64 * aspect) as u32).max(1);
    let resized = img.resize_exact(width, height, image::imageops::FilterType::Triangle);
    resized.save(dest)?;
    Ok(fs::metadata(dest)?.len())
}

static ITERATION_RE: OnceLock<Regex> = OnceLock::new();

/// Recognize clustering progress lines of the form `Iteration <n>/<m> ...`.
fn parse_iteration_progress(line: &str) -> Option<(u64, u64)> {
    let re = ITERATION_RE
        .get_or_init(|| Regex::new(r"^Iteration (\d+)/(\d+)").expect("static regex is valid"));
    let caps = re.captures(line)?;
    Some((caps[1].parse().ok()?, caps[2].parse().ok()?))
}
