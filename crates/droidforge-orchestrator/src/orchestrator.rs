//! Core pipeline steps shared by every workflow.
use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use droidforge_core::{current_unix_timestamp_ms, random_token};
use droidforge_session::Session;
use droidforge_toolchain::{keystore_path, ApkTools};
use droidforge_tree::{prune_broken_references, sanitize, DecompiledTree};

use crate::outcome::{
    classify_build_failure, display_diagnostic, BestEffort, BuildFailureClass, Delivery,
    RebuildOutcome,
};

const KEYSTORE_TOKEN_LEN: usize = 4;
const FALLBACK_PACKAGE_NAME: &str = "app.apk";

/// Runs pipeline steps against a session through the toolchain seam.
pub struct Orchestrator<T: ApkTools> {
    tools: T,
}

impl<T: ApkTools> Orchestrator<T> {
    pub fn new(tools: T) -> Self {
        Self { tools }
    }

    pub fn tools(&self) -> &T {
        &self.tools
    }

    /// File name of the originally admitted package.
    pub fn original_name(session: &Session) -> String {
        if let Some(name) = &session.package_name {
            return name.clone();
        }
        session
            .package_path
            .as_ref()
            .and_then(|path| path.file_name())
            .and_then(|name| name.to_str())
            .unwrap_or(FALLBACK_PACKAGE_NAME)
            .to_string()
    }

    /// Returns the session's decompiled tree, decoding the package first if
    /// no buildable tree exists yet. The build descriptor on disk is the
    /// memo: a tree carrying one is reused as-is.
    pub async fn ensure_decompiled(&self, session: &Session) -> Result<DecompiledTree> {
        let package = session
            .package_path
            .as_ref()
            .context("no package admitted to this session")?;
        let tree = DecompiledTree::new(session.decompile_root());
        if tree.has_build_descriptor() {
            tracing::debug!(session = %session.id, "reusing existing decompiled tree");
            return Ok(tree);
        }

        let run = self
            .tools
            .decode(package, tree.root())
            .await?;
        if !run.succeeded {
            bail!("decompile failed:\n{}", display_diagnostic(&run.output));
        }
        tracing::info!(session = %session.id, "package decompiled");
        Ok(tree)
    }

    /// Sanitizes the tree and rebuilds it into `<prefix><original name>`.
    ///
    /// A failed build gets exactly one adjusted retry, chosen from the
    /// tool's diagnostics: corrupt resources retry without recompiling
    /// resources (a degraded build the outcome records), broken registry
    /// references are pruned and the full build retried. Anything else is
    /// reported as failed with the diagnostic attached.
    pub async fn rebuild(&self, session: &Session, prefix: &str) -> Result<RebuildOutcome> {
        let tree = self.ensure_decompiled(session).await?;
        let report = sanitize(&tree);
        tracing::debug!(
            session = %session.id,
            removed_images = report.removed_images,
            pruned_references = report.pruned_references,
            "pre-build sanitize finished"
        );

        let out_package = session
            .workdir
            .join(format!("{prefix}{}", Self::original_name(session)));
        let run = self.tools.build(tree.root(), &out_package, false).await?;
        if run.succeeded {
            return Ok(RebuildOutcome::Built {
                package: out_package,
            });
        }

        match classify_build_failure(&run.output) {
            BuildFailureClass::CorruptResources => {
                tracing::warn!(session = %session.id, "build rejected resources; retrying without recompiling them");
                let retry = self.tools.build(tree.root(), &out_package, true).await?;
                if retry.succeeded {
                    Ok(RebuildOutcome::BuiltWithoutResources {
                        package: out_package,
                    })
                } else {
                    Ok(RebuildOutcome::Failed {
                        diagnostic: display_diagnostic(&retry.output),
                    })
                }
            }
            BuildFailureClass::BrokenReferences => {
                tracing::warn!(session = %session.id, "build hit dangling references; pruning registry and retrying");
                if let Err(error) = prune_broken_references(&tree) {
                    tracing::warn!(%error, "reference prune failed before retry");
                }
                let retry = self.tools.build(tree.root(), &out_package, false).await?;
                if retry.succeeded {
                    Ok(RebuildOutcome::Built {
                        package: out_package,
                    })
                } else {
                    Ok(RebuildOutcome::Failed {
                        diagnostic: display_diagnostic(&retry.output),
                    })
                }
            }
            BuildFailureClass::Unclassified => Ok(RebuildOutcome::Failed {
                diagnostic: display_diagnostic(&run.output),
            }),
        }
    }

    /// Signs the most recently produced package variant with a freshly
    /// generated test key. Alignment is best-effort; signing is not.
    pub async fn sign_package(&self, session: &Session) -> Result<Delivery> {
        let candidate = self
            .newest_variant(session)
            .context("no package available to sign")?;
        let candidate_name = candidate
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(FALLBACK_PACKAGE_NAME)
            .to_string();

        let keystore = keystore_path(
            &session.workdir,
            current_unix_timestamp_ms(),
            &random_token(KEYSTORE_TOKEN_LEN),
        );
        let keystore_run = self.tools.generate_keystore(&keystore).await?;
        if !keystore_run.succeeded {
            bail!(
                "keystore generation failed:\n{}",
                display_diagnostic(&keystore_run.output)
            );
        }

        let aligned = session.workdir.join(format!("aligned_{candidate_name}"));
        let (sign_target, alignment) = match self.tools.align(&candidate, &aligned).await {
            Ok(run) if run.succeeded => (aligned, BestEffort::Succeeded),
            Ok(_) => (
                candidate.clone(),
                BestEffort::SkippedNonFatal(
                    "alignment failed; signed the unaligned package".to_string(),
                ),
            ),
            Err(error) => (
                candidate.clone(),
                BestEffort::SkippedNonFatal(format!(
                    "alignment unavailable ({error}); signed the unaligned package"
                )),
            ),
        };

        let sign_run = self.tools.sign(&sign_target, &keystore).await?;
        if !sign_run.succeeded {
            bail!("signing failed:\n{}", display_diagnostic(&sign_run.output));
        }

        let mut message = format!(
            "Signed {candidate_name} with a freshly generated test key (alias {}, throwaway credentials).",
            droidforge_toolchain::KEY_ALIAS
        );
        if let BestEffort::SkippedNonFatal(note) = &alignment {
            message.push_str("\nNote: ");
            message.push_str(note);
        }

        let signed = session.workdir.join(format!("signed_{candidate_name}"));
        match fs::copy(&sign_target, &signed) {
            Ok(_) => Ok(Delivery::with_file(message, signed)),
            Err(error) => {
                tracing::warn!(%error, "could not copy signed package to its delivery name");
                message.push_str("\nNote: delivering the signed file under its working name.");
                Ok(Delivery::with_file(message, sign_target))
            }
        }
    }

    /// Signature scheme report for the admitted package.
    pub fn inspect_signature(&self, session: &Session) -> Result<String> {
        let package = session
            .package_path
            .as_ref()
            .context("no package admitted to this session")?;
        let record = droidforge_signature::inspect(package);
        Ok(droidforge_signature::render_report(&record))
    }

    /// Newest built `.apk` variant in the workdir, skipping the original
    /// upload and the aligned/signed derivatives of earlier sign runs.
    /// Falls back to the original package when nothing has been built yet.
    fn newest_variant(&self, session: &Session) -> Option<PathBuf> {
        let original_name = Self::original_name(session);
        let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;

        let entries = fs::read_dir(&session.workdir).ok()?;
        for entry in entries.flatten() {
            let path = entry.path();
            let name = match path.file_name().and_then(|name| name.to_str()) {
                Some(name) => name,
                None => continue,
            };
            if !name.ends_with(".apk")
                || name == original_name
                || name.starts_with("aligned_")
                || name.starts_with("signed_")
            {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|metadata| metadata.modified())
                .unwrap_or(std::time::UNIX_EPOCH);
            let newer = match &newest {
                Some((best, _)) => modified > *best,
                None => true,
            };
            if newer {
                newest = Some((modified, path));
            }
        }

        newest
            .map(|(_, path)| path)
            .or_else(|| session.package_path.clone())
    }
}
