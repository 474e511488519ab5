//! Manifest and resource mutations: package-identifier rename, display-name
//! rename, and network-security-config injection. Each mutation is
//! individually idempotent and safe against a tree already in its target
//! state.
use std::fs;
use std::sync::OnceLock;

use regex::Regex;

use crate::sanitize::sanitize;
use crate::{visit_files, DecompiledTree, TreeError, TreeResult};

/// Prefix used when no target identifier is supplied.
pub const SYNTHESIZED_PACKAGE_PREFIX: &str = "com.modified.";

const PACKAGE_SUFFIX_LEN: usize = 6;
const NETWORK_CONFIG_ATTR: &str = "android:networkSecurityConfig";

/// Network security config declaring cleartext permitted and both system and
/// user certificate authorities trusted for all domains.
pub const NETWORK_SECURITY_CONFIG_XML: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<network-security-config>
    <base-config cleartextTrafficPermitted="true">
        <trust-anchors>
            <certificates src="system" />
            <certificates src="user" />
        </trust-anchors>
    </base-config>
    <domain-config cleartextTrafficPermitted="true">
        <domain includeSubdomains="true">*</domain>
        <trust-anchors>
            <certificates src="system" />
            <certificates src="user" />
        </trust-anchors>
    </domain-config>
</network-security-config>
"#;

fn package_attr_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"package="([^"]+)""#).expect("static pattern"))
}

fn app_name_entry_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?s)<string name="app_name"[^>]*>.*?</string>"#).expect("static pattern")
    })
}

fn application_open_tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)(<application\s[^>]*?)(\s*>)").expect("static pattern"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Result of a package-identifier rename.
pub struct PackageRename {
    pub old_package: String,
    pub new_package: String,
    pub changed: bool,
    pub listings_rewritten: usize,
}

/// Synthesizes a fresh package identifier: fixed prefix plus a 6-character
/// random lowercase-alphanumeric suffix.
pub fn synthesize_package_id() -> String {
    format!(
        "{SYNTHESIZED_PACKAGE_PREFIX}{}",
        droidforge_core::random_token(PACKAGE_SUFFIX_LEN)
    )
}

/// Renames the manifest's declared package identifier and mirrors the change
/// across every bytecode listing's slash-delimited type descriptors, keeping
/// the two locations consistent before any rebuild.
///
/// Purely textual: references built at runtime (reflection, string
/// concatenation) are not rewritten and will still point at the old
/// identifier.
pub fn rename_package(tree: &DecompiledTree, target: Option<&str>) -> TreeResult<PackageRename> {
    let manifest = tree.read_manifest()?;
    let old_package = package_attr_pattern()
        .captures(&manifest)
        .and_then(|captures| captures.get(1))
        .map(|group| group.as_str().to_string())
        .ok_or(TreeError::NoPackageDeclaration)?;

    let new_package = match target {
        Some(target) => target.to_string(),
        None => synthesize_package_id(),
    };
    if old_package == new_package {
        return Ok(PackageRename {
            old_package,
            new_package,
            changed: false,
            listings_rewritten: 0,
        });
    }

    let updated = manifest.replace(
        &format!("package=\"{old_package}\""),
        &format!("package=\"{new_package}\""),
    );
    tree.write_manifest(&updated)?;

    let old_descriptor = format!("L{}/", old_package.replace('.', "/"));
    let new_descriptor = format!("L{}/", new_package.replace('.', "/"));
    let mut listings_rewritten = 0usize;
    for root in tree.smali_roots() {
        visit_files(&root, &mut |path| {
            if path.extension().and_then(|ext| ext.to_str()) != Some("smali") {
                return;
            }
            let content = match fs::read(path) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(error) => {
                    tracing::warn!(file = %path.display(), %error, "skipping unreadable listing");
                    return;
                }
            };
            if !content.contains(&old_descriptor) {
                return;
            }
            let rewritten = content.replace(&old_descriptor, &new_descriptor);
            match fs::write(path, rewritten) {
                Ok(()) => listings_rewritten += 1,
                Err(error) => {
                    tracing::warn!(file = %path.display(), %error, "could not rewrite listing");
                }
            }
        });
    }

    tracing::info!(
        old = %old_package,
        new = %new_package,
        listings_rewritten,
        "renamed package identifier"
    );
    Ok(PackageRename {
        old_package,
        new_package,
        changed: true,
        listings_rewritten,
    })
}

/// Replaces the application-name entry in every localized strings resource
/// under the tree, covering all locale/qualifier variants. Returns how many
/// files were updated; zero is reported as an error, distinct from I/O
/// failure.
pub fn rename_display_name(tree: &DecompiledTree, new_name: &str) -> TreeResult<usize> {
    let resource_root = tree.resource_root();
    if !resource_root.is_dir() {
        return Err(TreeError::NoDisplayNameEntries);
    }

    let replacement = format!("<string name=\"app_name\">{new_name}</string>");
    let mut updated = 0usize;
    visit_files(&resource_root, &mut |path| {
        if path.file_name().and_then(|name| name.to_str()) != Some("strings.xml") {
            return;
        }
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(error) => {
                tracing::warn!(file = %path.display(), %error, "skipping unreadable strings file");
                return;
            }
        };
        if !content.contains("<string name=\"app_name\"") {
            return;
        }
        let rewritten = app_name_entry_pattern()
            .replace_all(&content, replacement.as_str())
            .into_owned();
        match droidforge_core::write_text_atomic(path, &rewritten) {
            Ok(()) => updated += 1,
            Err(error) => {
                tracing::warn!(file = %path.display(), %error, "could not update strings file");
            }
        }
    });

    if updated == 0 {
        return Err(TreeError::NoDisplayNameEntries);
    }
    Ok(updated)
}

/// Writes the network-security-config resource and references it from the
/// manifest's application element, sanitizing the tree first. Idempotent:
/// an already-referenced config is left untouched. Returns whether the
/// manifest changed.
pub fn inject_network_security_config(tree: &DecompiledTree) -> TreeResult<bool> {
    let report = sanitize(tree);
    tracing::debug!(
        removed_images = report.removed_images,
        pruned_references = report.pruned_references,
        "pre-injection sanitize finished"
    );

    let manifest = tree.read_manifest()?;
    if !manifest.contains("<application") {
        return Err(TreeError::NoApplicationElement);
    }

    let config_path = tree.resource_root().join("xml").join("network_security_config.xml");
    droidforge_core::write_text_atomic(&config_path, NETWORK_SECURITY_CONFIG_XML)?;

    if manifest.contains(NETWORK_CONFIG_ATTR) {
        return Ok(false);
    }

    let reference = format!("$1 {NETWORK_CONFIG_ATTR}=\"@xml/network_security_config\"$2");
    let updated = application_open_tag_pattern()
        .replace(&manifest, reference.as_str())
        .into_owned();
    tree.write_manifest(&updated)?;
    Ok(true)
}
