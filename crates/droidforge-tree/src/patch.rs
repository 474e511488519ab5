//! Startup-toast injection into the entry activity's bytecode listing.
//!
//! The patch is a line splice, not a semantic rewrite: find the entry
//! method, guarantee two free local-variable slots, and insert a fixed
//! instruction sequence immediately after the first superclass-constructor
//! invocation, the earliest point where the activity context is valid and
//! no user code has run yet.
use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;

use regex::Regex;

use crate::{visit_files, DecompiledTree, TreeError, TreeResult};

const SMALI_ALTERNATE_ROOTS: usize = 9;
const MIN_LOCAL_SLOTS: usize = 2;

fn launcher_activity_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r#"(?s)<activity[^>]+android:name="([^"]+)"[^>]*>.*?<action\s+android:name="android\.intent\.action\.MAIN""#,
        )
        .expect("static pattern")
    })
}

fn any_activity_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"<activity[^>]+android:name="([^"]+)""#).expect("static pattern"))
}

fn locals_directive_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\.locals\s+(\d+)").expect("static pattern"))
}

/// Injects a long-duration toast showing `text` at the start of the entry
/// activity. Length limits on `text` are the caller's responsibility. On
/// success returns the patched listing's path; on failure the tree is left
/// unmodified.
pub fn inject_startup_toast(tree: &DecompiledTree, text: &str) -> TreeResult<PathBuf> {
    let manifest = tree.read_manifest()?;
    let activity = entry_activity(&manifest)?;
    tracing::debug!(%activity, "resolved entry activity");

    let listing = locate_listing(tree, &activity).ok_or(TreeError::EntryListingNotFound)?;
    let content = fs::read_to_string(&listing)?;
    if !content.contains("onCreate") {
        return Err(TreeError::NoEntryMethod);
    }

    let patched = splice_toast(&content, text).ok_or(TreeError::NoSuperclassInvocation)?;
    droidforge_core::write_text_atomic(&listing, &patched)?;
    tracing::info!(listing = %listing.display(), "injected startup toast");
    Ok(listing)
}

/// Entry activity: the one whose intent filter declares the MAIN action,
/// falling back to the first declared activity of any kind.
fn entry_activity(manifest: &str) -> TreeResult<String> {
    if let Some(captures) = launcher_activity_pattern().captures(manifest) {
        if let Some(name) = captures.get(1) {
            return Ok(name.as_str().to_string());
        }
    }
    any_activity_pattern()
        .captures(manifest)
        .and_then(|captures| captures.get(1))
        .map(|name| name.as_str().to_string())
        .ok_or(TreeError::NoActivityDeclared)
}

/// Resolves the activity's listing: exact dotted-name path under `smali`
/// then each numbered alternate root, then a tree-wide search for any
/// listing whose file name contains "MainActivity".
fn locate_listing(tree: &DecompiledTree, activity: &str) -> Option<PathBuf> {
    let relative = format!("{}.smali", activity.replace('.', "/"));
    let exact = tree.root().join("smali").join(&relative);
    if exact.is_file() {
        return Some(exact);
    }
    for index in 1..=SMALI_ALTERNATE_ROOTS {
        let candidate = tree.root().join(format!("smali_classes{index}")).join(&relative);
        if candidate.is_file() {
            return Some(candidate);
        }
    }

    let mut fallback = None;
    visit_files(tree.root(), &mut |path| {
        if fallback.is_some() {
            return;
        }
        let name = path.file_name().and_then(|name| name.to_str()).unwrap_or("");
        if name.ends_with(".smali") && name.contains("MainActivity") {
            fallback = Some(path.to_path_buf());
        }
    });
    fallback
}

/// Line state machine over the entry method: raise `.locals` to the two
/// slots the payload needs, then splice the payload immediately after the
/// first superclass invocation. Returns `None` when no such invocation
/// exists within the method.
fn splice_toast(content: &str, text: &str) -> Option<String> {
    let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
    let mut in_entry_method = false;
    let mut saw_locals = false;
    let mut insert_at = None;

    for index in 0..lines.len() {
        let line = lines[index].clone();
        if line.contains(".method") && line.contains("onCreate") {
            in_entry_method = true;
        }
        if !in_entry_method {
            continue;
        }

        if line.contains(".locals") {
            saw_locals = true;
            if let Some(captures) = locals_directive_pattern().captures(&line) {
                let declared: usize = captures
                    .get(1)
                    .and_then(|group| group.as_str().parse().ok())
                    .unwrap_or(0);
                if declared < MIN_LOCAL_SLOTS {
                    lines[index] = locals_directive_pattern()
                        .replace(&line, format!(".locals {MIN_LOCAL_SLOTS}").as_str())
                        .into_owned();
                }
            }
        }

        if line.contains("invoke-super") && saw_locals {
            insert_at = Some(index + 1);
            break;
        }
    }

    let insert_at = insert_at?;
    let escaped = text.replace('"', "\\\"");
    let payload = [
        "    # Toast injection".to_string(),
        "    const/4 v0, 0x1".to_string(),
        format!("    const-string v1, \"{escaped}\""),
        "    invoke-static {p0, v1, v0}, Landroid/widget/Toast;->makeText(Landroid/content/Context;Ljava/lang/CharSequence;I)Landroid/widget/Toast;".to_string(),
        "    move-result-object v0".to_string(),
        "    invoke-virtual {v0}, Landroid/widget/Toast;->show()V".to_string(),
    ];
    for (offset, payload_line) in payload.into_iter().enumerate() {
        lines.insert(insert_at + offset, payload_line);
    }

    let mut result = lines.join("\n");
    if content.ends_with('\n') {
        result.push('\n');
    }
    Some(result)
}
