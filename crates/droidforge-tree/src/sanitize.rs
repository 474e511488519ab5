//! Removal of resource state that is known to abort a rebuild: corrupt PNG
//! assets and stale entries in the public resource-identifier registry.
use std::fs::{self, File};
use std::io::Read;
use std::sync::OnceLock;

use regex::Regex;

use crate::{visit_files, DecompiledTree, TreeResult};

/// First 8 bytes of every well-formed PNG file.
pub const PNG_MAGIC: [u8; 8] = [0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a];

/// Drawable identifier a prior full-rebuild path is known to drop, leaving
/// dangling registry entries behind.
pub const STALE_DRAWABLE_ID: &str = "ic_notification";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
/// Counts from a full sanitize pass.
pub struct SanitizeReport {
    pub removed_images: usize,
    pub pruned_references: usize,
}

fn blank_run_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\n\s*\n+").expect("static pattern"))
}

/// Deletes every file under `res/` named `*.png` whose leading bytes do not
/// match the PNG magic. Unreadable files count as corrupt. Individual
/// failures are logged and skipped; the pass itself never fails.
pub fn remove_corrupt_images(tree: &DecompiledTree) -> usize {
    let resource_root = tree.resource_root();
    if !resource_root.is_dir() {
        return 0;
    }

    let mut removed = 0usize;
    visit_files(&resource_root, &mut |path| {
        let is_png = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("png"));
        if !is_png {
            return;
        }

        let mut header = [0u8; PNG_MAGIC.len()];
        let well_formed = File::open(path)
            .and_then(|mut file| file.read_exact(&mut header))
            .is_ok()
            && header == PNG_MAGIC;
        if well_formed {
            return;
        }

        match fs::remove_file(path) {
            Ok(()) => {
                tracing::warn!(file = %path.display(), "removed corrupt image asset");
                removed += 1;
            }
            Err(error) => {
                tracing::warn!(file = %path.display(), %error, "could not remove corrupt image");
            }
        }
    });
    removed
}

/// Drops registry lines referencing the known-stale drawable identifier and
/// collapses the resulting blank-line runs. Idempotent; a missing registry
/// file is not an error. Returns the number of lines removed.
pub fn prune_broken_references(tree: &DecompiledTree) -> TreeResult<usize> {
    let registry = tree.public_registry_path();
    if !registry.is_file() {
        return Ok(0);
    }

    let content = fs::read_to_string(&registry)?;
    let mut pruned = 0usize;
    let kept: Vec<&str> = content
        .lines()
        .filter(|line| {
            let stale = line.contains("<public")
                && line.contains(&format!("name=\"{STALE_DRAWABLE_ID}\""));
            if stale {
                pruned += 1;
            }
            !stale
        })
        .collect();

    let mut rebuilt = kept.join("\n");
    if content.ends_with('\n') {
        rebuilt.push('\n');
    }
    let rebuilt = blank_run_pattern().replace_all(&rebuilt, "\n").into_owned();

    if rebuilt != content {
        droidforge_core::write_text_atomic(&registry, &rebuilt)?;
        tracing::info!(registry = %registry.display(), pruned, "pruned broken resource references");
    }
    Ok(pruned)
}

/// Runs both passes. Each tolerates failure of the other; a registry prune
/// failure is logged and reported as zero rather than aborting the sanitize.
pub fn sanitize(tree: &DecompiledTree) -> SanitizeReport {
    let removed_images = remove_corrupt_images(tree);
    let pruned_references = match prune_broken_references(tree) {
        Ok(count) => count,
        Err(error) => {
            tracing::warn!(%error, "reference prune failed; continuing");
            0
        }
    };
    SanitizeReport {
        removed_images,
        pruned_references,
    }
}
