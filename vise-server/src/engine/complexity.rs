//! Training cost estimates
//!
//! Linear models (time in minutes, disk in MB, as functions of image count)
//! fitted against reference-hardware training runs. Used to annotate the
//! stage list and the Info panel overview.

use super::stage::Stage;

/// `(time_coef_0, time_coef_1, space_coef_0, space_coef_1)`
/// where `estimate = coef_0 + coef_1 * img_count`.
type Model = (f64, f64, f64, f64);

const PREPROCESS_MODEL: Model = (-0.0608757062, 0.0011031073, 3.374722, 0.427843547);
const DESCRIPTOR_MODEL: Model = (0.2545197740, 0.0031129944, 4.768372e-6, 0.122070312);
const CLUSTER_MODEL: Model = (-1.5004237288, 0.0364477401, 3.147125e-5, 0.048828125);
const INDEX_MODEL: Model = (-0.4600282486, 0.0175409605, -1.438618, 0.072752569);
const TOTAL_MODEL: Model = (-1.8307909605, 0.0591468927, 1.967406, 0.699723314);

const MODEL_ASSUMPTION: &str =
    "cpu name: Intel(R) Core(TM) i7-6700HQ CPU @ 2.60GHz; cpu MHz : 3099.992; RAM: 16GB; cores : 8";

fn model_for(stage: Stage) -> Option<Model> {
    match stage {
        Stage::Preprocess => Some(PREPROCESS_MODEL),
        Stage::Descriptor => Some(DESCRIPTOR_MODEL),
        Stage::Cluster => Some(CLUSTER_MODEL),
        Stage::Index => Some(INDEX_MODEL),
        _ => None,
    }
}

fn evaluate(model: Model, img_count: usize) -> (f64, f64) {
    let n = img_count as f64;
    let time = (model.0 + model.1 * n).max(0.0);
    let space = (model.2 + model.3 * n).max(0.0);
    (time, space)
}

/// Short per-stage annotation, e.g. `"(3 min, 40 MB)"`. Empty for stages
/// without a cost model.
pub fn stage_info(stage: Stage, img_count: usize) -> String {
    match model_for(stage) {
        Some(model) => {
            let (time, space) = evaluate(model, img_count);
            format!("({} min, {} MB)", time.ceil(), space.ceil())
        }
        None => String::new(),
    }
}

/// HTML overview table shown on the Info panel before training starts.
pub fn overview_html(img_count: usize) -> String {
    let (time, space) = evaluate(TOTAL_MODEL, img_count);
    format!(
        concat!(
            "<h3>Overview of Search Engine Training Requirements</h3>",
            "<table id=\"engine_overview\">",
            "<tr><td>Number of images</td><td>{}</td></tr>",
            "<tr><td>Estimated total training time*</td><td>{} min.</td></tr>",
            "<tr><td>Estimated memory needed*</td><td>4 GB</td></tr>",
            "<tr><td>Estimated total disk space needed*</td><td>{} MB</td></tr>",
            "<tr><td>&nbsp;</td><td>&nbsp;</td></tr>",
            "<tr><td colspan=\"2\">* estimates are based on the following specifications :</td></tr>",
            "<tr><td colspan=\"2\">{}</td></tr>",
            "</table>"
        ),
        img_count,
        time.ceil(),
        space.ceil(),
        MODEL_ASSUMPTION,
    )
}
