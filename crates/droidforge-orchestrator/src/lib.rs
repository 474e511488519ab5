//! Pipeline orchestration over one session's package: decompile on demand,
//! apply tree mutations, rebuild with bounded adaptive retries, sign, and
//! shape the user-facing delivery.
pub mod actions;
pub mod fetch;
pub mod orchestrator;
pub mod outcome;
pub mod workflows;

#[cfg(test)]
mod tests;

pub use actions::{decode_callback, encode_callback, ApkAction, CALLBACK_PREFIX};
pub use fetch::{download_package, package_file_name, URL_DOWNLOAD_LIMIT_BYTES};
pub use orchestrator::Orchestrator;
pub use outcome::{
    classify_build_failure, BestEffort, BuildFailureClass, Delivery, RebuildOutcome,
    DIAGNOSTIC_DISPLAY_LIMIT,
};
