//! Error types of the analysis layer.

use efmloc_simdata::SimDataError;

use crate::localization::LocalizationMethod;

/// Hard errors that abort an analysis run (or, for solver failures caught by
/// the dispatcher, a single method).
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// A malformed trace or an inconsistent data-model query.
    #[error(transparent)]
    SimData(#[from] SimDataError),

    /// A classification or characterization was started with nothing to do.
    #[error("empty input: {0}")]
    EmptyInput(&'static str),

    /// One EFM bit set mixes loss and delay bits.
    #[error("loss and delay bits cannot be mixed in one bit set")]
    MixedBitSet,

    /// A localization method is missing a required numeric parameter.
    #[error("method {method} is missing parameter `{param}`")]
    MissingParam {
        method: LocalizationMethod,
        param: &'static str,
    },

    /// A loss-rate measurement below zero reached a linear solver.
    #[error("loss rate {0} is negative")]
    NegativeLossRate(f64),

    /// A negative delay measurement reached the LP solver.
    #[error("delay measurement {0} is negative")]
    NegativeDelay(f64),

    /// Three-level weighting saw a failed path carrying no severity flag.
    #[error("failed path carries no severity flag")]
    UnclassifiedFailedPath,

    /// The link universe declares the same link twice.
    #[error("link {0} appears twice in the link universe")]
    DuplicateLink(efmloc_simdata::Link),

    /// The LP solver failed; the method is abandoned, not the run.
    #[error("lp solver failed: {0}")]
    Solver(String),
}
