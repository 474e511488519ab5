//! Pipeline outcome types and build-failure classification.
use std::path::PathBuf;

/// Cap on tool diagnostics quoted back to the user.
pub const DIAGNOSTIC_DISPLAY_LIMIT: usize = 1500;

const CORRUPT_RESOURCE_MARKERS: [&str; 2] = ["libpng error", "PNG image"];
const BROKEN_REFERENCE_MARKERS: [&str; 2] = ["Public symbol", "not defined"];

#[derive(Debug, Clone, PartialEq, Eq)]
/// A step that is allowed to fail without aborting the pipeline. The
/// delivery message states which it was, never silently.
pub enum BestEffort {
    Succeeded,
    SkippedNonFatal(String),
}

impl BestEffort {
    pub fn succeeded(&self) -> bool {
        matches!(self, BestEffort::Succeeded)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebuildOutcome {
    /// Full rebuild, resources recompiled.
    Built { package: PathBuf },
    /// Degraded rebuild that reused the existing compiled resources after
    /// the resource compiler rejected the tree.
    BuiltWithoutResources { package: PathBuf },
    Failed { diagnostic: String },
}

impl RebuildOutcome {
    pub fn package(&self) -> Option<&PathBuf> {
        match self {
            RebuildOutcome::Built { package }
            | RebuildOutcome::BuiltWithoutResources { package } => Some(package),
            RebuildOutcome::Failed { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildFailureClass {
    /// Resource compiler choked on malformed image assets.
    CorruptResources,
    /// Registry references resources that no longer exist.
    BrokenReferences,
    Unclassified,
}

/// Classifies a failed build from the tool's combined output. Corrupt
/// resources are checked first; their marker lines also mention symbols,
/// so the order matters.
pub fn classify_build_failure(output: &str) -> BuildFailureClass {
    if CORRUPT_RESOURCE_MARKERS
        .iter()
        .any(|marker| output.contains(marker))
    {
        return BuildFailureClass::CorruptResources;
    }
    if BROKEN_REFERENCE_MARKERS
        .iter()
        .any(|marker| output.contains(marker))
    {
        return BuildFailureClass::BrokenReferences;
    }
    BuildFailureClass::Unclassified
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// What goes back to the user: a message and, when a build artifact was
/// produced, the file to attach.
pub struct Delivery {
    pub message: String,
    pub file: Option<PathBuf>,
}

impl Delivery {
    pub fn message_only(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            file: None,
        }
    }

    pub fn with_file(message: impl Into<String>, file: PathBuf) -> Self {
        Self {
            message: message.into(),
            file: Some(file),
        }
    }
}

/// Truncates a tool diagnostic for display.
pub fn display_diagnostic(output: &str) -> String {
    droidforge_core::truncate_for_display(output, DIAGNOSTIC_DISPLAY_LIMIT)
}
