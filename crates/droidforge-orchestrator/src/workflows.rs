//! User-facing workflows composed from the pipeline steps.
//!
//! Each function drives one action end to end against a locked session and
//! returns the delivery to send back. Mutation failures that leave the
//! pipeline viable are carried into the message instead of aborting it.
use std::path::Path;

use anyhow::{bail, Result};

use droidforge_session::Session;
use droidforge_toolchain::ApkTools;
use droidforge_tree::{
    inject_network_security_config, inject_startup_toast, remove_notification_icons,
    rename_display_name, rename_package, replace_launcher_icons,
};

use crate::orchestrator::Orchestrator;
use crate::outcome::{Delivery, RebuildOutcome};

/// Upper bound on startup-toast text, counted in characters.
pub const SPLASH_TEXT_LIMIT: usize = 200;

const IDENTITY_PREFIX: &str = "modified_";
const REBUILD_PREFIX: &str = "rebuilt_";
const SSL_PREFIX: &str = "ssl_bypassed_";

/// Decompiles without mutating and reports what was materialized.
pub async fn decompile<T: ApkTools>(
    orchestrator: &Orchestrator<T>,
    session: &Session,
) -> Result<Delivery> {
    let tree = orchestrator.ensure_decompiled(session).await?;
    let smali_roots = tree.smali_roots().len();
    Ok(Delivery::message_only(format!(
        "Decompiled to {} ({smali_roots} bytecode root{}).",
        tree.root().display(),
        if smali_roots == 1 { "" } else { "s" }
    )))
}

/// Plain sanitize-and-rebuild of the current tree.
pub async fn rebuild<T: ApkTools>(
    orchestrator: &Orchestrator<T>,
    session: &Session,
) -> Result<Delivery> {
    let outcome = orchestrator.rebuild(session, REBUILD_PREFIX).await?;
    Ok(describe_rebuild(outcome, "Rebuilt"))
}

/// Full identity edit: replace launcher icons when one was uploaded,
/// synthesize a fresh package id, apply any display name captured earlier
/// in the workflow, clean the known-stale notification assets, and rebuild.
pub async fn complete_identity_edit<T: ApkTools>(
    orchestrator: &Orchestrator<T>,
    session: &mut Session,
    icon: Option<&Path>,
) -> Result<Delivery> {
    let tree = orchestrator.ensure_decompiled(session).await?;
    let mut notes = Vec::new();

    if let Some(icon) = icon {
        match replace_launcher_icons(&tree, icon) {
            Ok(replaced) => notes.push(format!("Replaced {replaced} launcher icon(s).")),
            Err(error) => {
                tracing::warn!(%error, "icon replacement failed; continuing identity edit");
                notes.push(format!("Icon replacement skipped: {error}."));
            }
        }
    }

    let rename = rename_package(&tree, None)?;
    notes.push(format!(
        "Package id: {} -> {} ({} listing(s) rewritten).",
        rename.old_package, rename.new_package, rename.listings_rewritten
    ));

    if let Some(display_name) = session.pending_display_name.take() {
        match rename_display_name(&tree, &display_name) {
            Ok(updated) => {
                notes.push(format!("Display name set to \"{display_name}\" in {updated} locale(s)."))
            }
            Err(error) => {
                tracing::warn!(%error, "display-name rename failed; continuing identity edit");
                notes.push(format!("Display name unchanged: {error}."));
            }
        }
    }

    let removed = remove_notification_icons(&tree);
    if removed > 0 {
        notes.push(format!("Removed {removed} stale notification asset(s)."));
    }

    let outcome = orchestrator.rebuild(session, IDENTITY_PREFIX).await?;
    let mut delivery = describe_rebuild(outcome, "Identity edit finished");
    delivery.message = format!("{}\n{}", notes.join("\n"), delivery.message);
    Ok(delivery)
}

/// Injects the permissive network security config, rebuilds, and signs the
/// result so it installs directly. A failed signing step still delivers
/// the rebuilt package with a caveat.
pub async fn ssl_bypass<T: ApkTools>(
    orchestrator: &Orchestrator<T>,
    session: &Session,
) -> Result<Delivery> {
    let tree = orchestrator.ensure_decompiled(session).await?;
    inject_network_security_config(&tree)?;

    let outcome = orchestrator.rebuild(session, SSL_PREFIX).await?;
    let Some(package) = outcome.package().cloned() else {
        return Ok(describe_rebuild(outcome, "SSL bypass"));
    };

    let degraded = degraded_note(&outcome);
    match orchestrator.sign_package(session).await {
        Ok(mut delivery) => {
            delivery.message = format!(
                "SSL bypass applied: user certificate authorities trusted, cleartext permitted.{degraded}\n{}",
                delivery.message
            );
            Ok(delivery)
        }
        Err(error) => {
            tracing::warn!(%error, "signing after ssl bypass failed; delivering unsigned build");
            Ok(Delivery::with_file(
                format!(
                    "SSL bypass applied and rebuilt.{degraded}\nSigning failed ({error}); this package must be signed before it will install."
                ),
                package,
            ))
        }
    }
}

/// Injects a startup toast and rebuilds.
pub async fn splash<T: ApkTools>(
    orchestrator: &Orchestrator<T>,
    session: &Session,
    text: &str,
) -> Result<Delivery> {
    let length = text.chars().count();
    if length == 0 || length > SPLASH_TEXT_LIMIT {
        bail!("splash text must be between 1 and {SPLASH_TEXT_LIMIT} characters, got {length}");
    }

    let tree = orchestrator.ensure_decompiled(session).await?;
    let listing = inject_startup_toast(&tree, text)?;
    tracing::debug!(listing = %listing.display(), "splash payload injected");

    let outcome = orchestrator.rebuild(session, IDENTITY_PREFIX).await?;
    let mut delivery = describe_rebuild(outcome, "Splash text injected");
    delivery.message = format!("Startup toast set to \"{text}\".\n{}", delivery.message);
    Ok(delivery)
}

fn degraded_note(outcome: &RebuildOutcome) -> &'static str {
    match outcome {
        RebuildOutcome::BuiltWithoutResources { .. } => {
            " Resources were reused, not recompiled."
        }
        _ => "",
    }
}

fn describe_rebuild(outcome: RebuildOutcome, label: &str) -> Delivery {
    match outcome {
        RebuildOutcome::Built { package } => {
            Delivery::with_file(format!("{label}: build succeeded."), package)
        }
        RebuildOutcome::BuiltWithoutResources { package } => Delivery::with_file(
            format!("{label}: build succeeded, but resources were reused rather than recompiled."),
            package,
        ),
        RebuildOutcome::Failed { diagnostic } => {
            Delivery::message_only(format!("{label}: build failed.\n{diagnostic}"))
        }
    }
}
