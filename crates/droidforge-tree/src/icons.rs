//! Launcher-icon replacement and notification-icon cleanup.
use std::fs;
use std::path::{Path, PathBuf};

use crate::{visit_files, DecompiledTree, TreeError, TreeResult};

const DRAWABLE_FALLBACK_LIMIT: usize = 10;

fn is_png(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("png"))
}

/// Copies `new_icon` over every resource PNG whose file name marks it as a
/// launcher icon, falling back to the first few drawable PNGs when none
/// match. Returns the replaced count; zero is an error, not silent success.
pub fn replace_launcher_icons(tree: &DecompiledTree, new_icon: &Path) -> TreeResult<usize> {
    let resource_root = tree.resource_root();
    if !resource_root.is_dir() {
        return Err(TreeError::NoLauncherIcons);
    }

    let mut targets: Vec<PathBuf> = Vec::new();
    visit_files(&resource_root, &mut |path| {
        if !is_png(path) {
            return;
        }
        let name = path.file_name().and_then(|name| name.to_str()).unwrap_or("");
        if name.contains("icon") || name.contains("ic_launcher") {
            targets.push(path.to_path_buf());
        }
    });

    if targets.is_empty() {
        visit_files(&resource_root, &mut |path| {
            if targets.len() >= DRAWABLE_FALLBACK_LIMIT || !is_png(path) {
                return;
            }
            let in_drawable = path
                .parent()
                .and_then(|dir| dir.file_name())
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("drawable"));
            if in_drawable {
                targets.push(path.to_path_buf());
            }
        });
    }

    let mut replaced = 0usize;
    for target in &targets {
        match fs::copy(new_icon, target) {
            Ok(_) => replaced += 1,
            Err(error) => {
                tracing::warn!(target = %target.display(), %error, "could not replace icon");
            }
        }
    }

    if replaced == 0 {
        return Err(TreeError::NoLauncherIcons);
    }
    tracing::info!(replaced, "replaced launcher icons");
    Ok(replaced)
}

/// Deletes notification-icon PNGs anywhere in the tree; these are the assets
/// whose registry entries the broken-reference pass prunes. Best-effort,
/// returns the removed count.
pub fn remove_notification_icons(tree: &DecompiledTree) -> usize {
    let mut removed = 0usize;
    visit_files(tree.root(), &mut |path| {
        let name = path.file_name().and_then(|name| name.to_str()).unwrap_or("");
        if !is_png(path) || !name.contains("ic_notification") {
            return;
        }
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(error) => {
                tracing::warn!(file = %path.display(), %error, "could not remove notification icon");
            }
        }
    });
    removed
}
