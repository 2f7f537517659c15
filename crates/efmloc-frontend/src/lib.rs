#![warn(unreachable_pub, missing_debug_implementations)]

//! The external collaborators of the analysis pipeline: trace-document
//! import, analysis-config loading, trace-file discovery, and the result
//! writer used by the `efmloc` binary.

pub mod config;
pub mod discover;
pub mod import;
pub mod store;

mod errors;

pub use config::{load_configs, parse_configs};
pub use discover::{find_file_groups, split_prefix};
pub use errors::FrontendError;
pub use store::RunStore;
