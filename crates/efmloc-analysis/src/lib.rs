#![warn(unreachable_pub, missing_debug_implementations)]

//! Failure localization over EFM simulation traces: classified link paths,
//! link-characteristic and combined-flow matrices, flow selection, the
//! localization engine, and the per-run analysis driver.

pub mod bits;
pub mod classified;
pub mod combined;
pub mod driver;
pub mod linkchar;
pub mod linkpath;
pub mod localization;
pub mod manager;
pub mod output;
pub mod selection;
pub mod warnings;

mod errors;
#[cfg(feature = "lp")]
mod lp;
mod lsqr;

pub use bits::{bit_set_is_loss, is_single_combination_set, EfmBit, EfmBitSet};
pub use classified::{
    ClassificationConfig, ClassificationMode, ClassifiedLinkPath, ClassifiedPathSet,
    ClassifyOptions, FlowSelectionMap, ObserverSet, LARGE_FAIL_FACTOR, SMALL_FAIL_FACTOR,
};
pub use combined::CombinedFlowSet;
pub use driver::{localize_failures, LocalizeRun};
pub use errors::AnalysisError;
pub use linkchar::{
    ConnectivityMatrix, ConnectivityRow, LinkCharacteristicSet, LinkIndex, MeasurementVector,
};
pub use linkpath::LinkPath;
pub use localization::{
    LinkRatings, LinkSet, LocalizationMethod, LocalizationResult, MethodInput, MethodParams,
};
pub use manager::{run_analyses, AnalysisConfig};
pub use output::{LocalizationResultSet, OutputAccumulator, ResultType};
pub use selection::{select_flows, FlowSelection, FlowSelectionStrategy, StrategyParams};
pub use warnings::WarningCounter;
