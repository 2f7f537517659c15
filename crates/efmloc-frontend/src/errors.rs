//! Error types of the import and configuration layer.

use std::path::PathBuf;

/// Hard errors while discovering, importing, or configuring a run.
#[derive(Debug, thiserror::Error)]
pub enum FrontendError {
    #[error("io error")]
    Io(#[from] std::io::Error),

    #[error("malformed json document")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    SimData(#[from] efmloc_simdata::SimDataError),

    #[error(transparent)]
    Analysis(#[from] efmloc_analysis::AnalysisError),

    /// A trace document with neither `title` nor `title_ref`.
    #[error("document carries neither title nor title_ref")]
    MissingTitle,

    /// A trace document with both `title` and `title_ref`.
    #[error("document carries both title and title_ref")]
    ConflictingTitle,

    /// A master document without a summary.
    #[error("master document for {0} has no summary")]
    MissingSummary(String),

    /// A `title_ref` pointing at a run never imported.
    #[error("title_ref {0} points to an unknown sim id")]
    UnknownTitleRef(String),

    /// Two master documents claim the same sim id.
    #[error("duplicate sim id {0}")]
    DuplicateSimId(String),

    /// A file group with more or fewer than one master document.
    #[error("file group {0} does not have exactly one master document")]
    NotExactlyOneMaster(String),

    /// A trace with a vantage-point type outside client/server/network.
    #[error("unknown vantage point type `{0}`")]
    UnknownVantagePointType(String),

    /// A vantage-point name not of the form `<nodeId>/...`.
    #[error("malformed vantage point name `{0}`")]
    BadVantagePointName(String),

    /// A JSON object key that should have been a numeric id.
    #[error("expected numeric id, found `{0}`")]
    InvalidIdKey(String),

    /// An enum string the config schema does not know.
    #[error("unknown {kind} `{value}` in analysis config")]
    UnknownName {
        kind: &'static str,
        value: String,
    },

    /// A config entry must set exactly one of the two threshold fields.
    #[error("analysis config needs exactly one of {0}")]
    ThresholdChoice(&'static str),

    /// The search path or prefix is unusable.
    #[error("invalid prefix `{0}`")]
    InvalidPrefix(String),

    /// A directory the CLI needs does not exist.
    #[error("path {0} does not exist")]
    MissingPath(PathBuf),

    /// No trace files matched the prefix.
    #[error("no files with prefix `{prefix}` found in {path}")]
    NoMatchingFiles {
        prefix: String,
        path: PathBuf,
    },
}
