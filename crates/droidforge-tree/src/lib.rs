//! The mutable decompiled-tree representation of a package and the
//! mutations applied to it before a rebuild.
//!
//! A decompiled tree is the directory a decompiler materializes: the
//! manifest, a `res/` subtree of locale-qualified resources, and one or more
//! smali roots mirroring the package's dotted identifier. All mutations here
//! are textual, line-oriented edits with documented search/insert contracts;
//! none attempt semantic bytecode rewriting.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub mod icons;
pub mod mutate;
pub mod patch;
pub mod sanitize;

pub use icons::{remove_notification_icons, replace_launcher_icons};
pub use mutate::{
    inject_network_security_config, rename_display_name, rename_package, synthesize_package_id,
    PackageRename, NETWORK_SECURITY_CONFIG_XML,
};
pub use patch::inject_startup_toast;
pub use sanitize::{prune_broken_references, remove_corrupt_images, sanitize, SanitizeReport};

/// Stable name of the decompiler's build descriptor; its absence means the
/// tree was only partially materialized (e.g. manifest-only extraction).
pub const BUILD_DESCRIPTOR_FILE: &str = "apktool.yml";

const MANIFEST_FILE: &str = "AndroidManifest.xml";
const SMALI_ALTERNATE_ROOTS: usize = 9;

#[derive(Debug, Error)]
/// Failures from tree mutations that callers branch on.
pub enum TreeError {
    #[error("decompiled tree at {0} has no manifest")]
    MissingManifest(PathBuf),
    #[error("manifest does not declare a package attribute")]
    NoPackageDeclaration,
    #[error("no strings resources declare an app_name entry")]
    NoDisplayNameEntries,
    #[error("manifest has no application element to attach a network config to")]
    NoApplicationElement,
    #[error("no launcher icons found under the resource tree")]
    NoLauncherIcons,
    #[error("no activity declared in the manifest")]
    NoActivityDeclared,
    #[error("could not locate the entry activity's bytecode listing")]
    EntryListingNotFound,
    #[error("entry activity listing has no onCreate method")]
    NoEntryMethod,
    #[error("entry method has no superclass constructor invocation")]
    NoSuperclassInvocation,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type TreeResult<T> = Result<T, TreeError>;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Path model over one decompiled tree root. Cheap to construct; all state
/// lives on disk.
pub struct DecompiledTree {
    root: PathBuf,
}

impl DecompiledTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    pub fn resource_root(&self) -> PathBuf {
        self.root.join("res")
    }

    /// Public resource-identifier registry written by the decompiler.
    pub fn public_registry_path(&self) -> PathBuf {
        self.root.join("res").join("values").join("public.xml")
    }

    pub fn build_descriptor_path(&self) -> PathBuf {
        self.root.join(BUILD_DESCRIPTOR_FILE)
    }

    /// Whether the tree holds a full decompile that the build tool accepts.
    pub fn has_build_descriptor(&self) -> bool {
        self.build_descriptor_path().is_file()
    }

    /// Existing bytecode roots: `smali`, then numbered alternates in order.
    pub fn smali_roots(&self) -> Vec<PathBuf> {
        let mut roots = Vec::new();
        let primary = self.root.join("smali");
        if primary.is_dir() {
            roots.push(primary);
        }
        for index in 1..=SMALI_ALTERNATE_ROOTS {
            let alternate = self.root.join(format!("smali_classes{index}"));
            if alternate.is_dir() {
                roots.push(alternate);
            }
        }
        roots
    }

    pub fn read_manifest(&self) -> TreeResult<String> {
        let path = self.manifest_path();
        if !path.is_file() {
            return Err(TreeError::MissingManifest(self.root.clone()));
        }
        Ok(fs::read_to_string(&path)?)
    }

    pub(crate) fn write_manifest(&self, content: &str) -> TreeResult<()> {
        droidforge_core::write_text_atomic(&self.manifest_path(), content)?;
        Ok(())
    }
}

/// Depth-first file visitor. Unreadable directories are logged and skipped
/// so a single bad entry never aborts a whole pass.
pub(crate) fn visit_files(dir: &Path, visit: &mut dyn FnMut(&Path)) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(error) => {
            tracing::debug!(dir = %dir.display(), %error, "skipping unreadable directory");
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            visit_files(&path, visit);
        } else {
            visit(&path);
        }
    }
}
