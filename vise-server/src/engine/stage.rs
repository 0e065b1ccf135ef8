//! Pipeline stage enumeration
//!
//! Stages form a strictly ordered sequence. A stage only ever advances to
//! its successor, and only when its completion predicate (evaluated by the
//! engine against on-disk artifacts) holds.

use serde::Serialize;

/// One ordered phase of the index-building pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Stage {
    NotLoaded,
    Setting,
    Info,
    Preprocess,
    Descriptor,
    Cluster,
    Assign,
    Hamm,
    Index,
    Query,
}

impl Stage {
    /// All stages in pipeline order.
    pub const ALL: [Stage; 10] = [
        Stage::NotLoaded,
        Stage::Setting,
        Stage::Info,
        Stage::Preprocess,
        Stage::Descriptor,
        Stage::Cluster,
        Stage::Assign,
        Stage::Hamm,
        Stage::Index,
        Stage::Query,
    ];

    /// Ordinal id, 0-based in pipeline order.
    pub fn id(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::NotLoaded => "NotLoaded",
            Stage::Setting => "Setting",
            Stage::Info => "Info",
            Stage::Preprocess => "Preprocess",
            Stage::Descriptor => "Descriptor",
            Stage::Cluster => "Cluster",
            Stage::Assign => "Assign",
            Stage::Hamm => "Hamm",
            Stage::Index => "Index",
            Stage::Query => "Query",
        }
    }

    pub fn from_name(name: &str) -> Option<Stage> {
        Stage::ALL.into_iter().find(|s| s.name() == name)
    }

    /// Successor in pipeline order; `None` for the terminal stage.
    pub fn next(self) -> Option<Stage> {
        let idx = self.id() + 1;
        Stage::ALL.get(idx).copied()
    }

    /// Resource file holding this stage's UI panel.
    pub fn html_resource(self) -> &'static str {
        match self {
            Stage::NotLoaded => "vise_404.html",
            Stage::Setting => "Setting.html",
            Stage::Info => "Info.html",
            Stage::Preprocess => "Preprocess.html",
            Stage::Descriptor => "Descriptor.html",
            Stage::Cluster => "Cluster.html",
            Stage::Assign => "Assign.html",
            Stage::Hamm => "Hamm.html",
            Stage::Index => "Index.html",
            Stage::Query => "Query.html",
        }
    }
}
