//! Command-line entrypoint for the package rework pipeline.
//!
//! Sessions persist across invocations, so multi-step flows (identity
//! edit prompting for a name and an icon, splash prompting for text) are
//! driven by arming a pending workflow on the session and answering it
//! with `reply`.
use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use droidforge_orchestrator::{download_package, workflows, Delivery, Orchestrator};
use droidforge_session::{PendingWorkflow, SessionHandle, SessionRegistry};
use droidforge_toolchain::Toolchain;

mod config;

use config::{load_config, AppConfig};

#[derive(Parser)]
#[command(name = "droidforge", version, about = "Decompile, mutate, rebuild, and sign Android packages")]
struct Cli {
    /// Path to a TOML config file (default: ./droidforge.toml if present).
    #[arg(long, global = true, env = "DROIDFORGE_CONFIG")]
    config: Option<PathBuf>,

    /// Numeric owner id recorded on sessions created by this invocation.
    #[arg(long, global = true, default_value_t = 0)]
    user: i64,

    #[command(subcommand)]
    command: CommandKind,
}

#[derive(Subcommand)]
enum CommandKind {
    /// Create a session from a local package file.
    New { package: PathBuf },
    /// Download a package by URL into a session; without a URL, arm the
    /// session to accept one via `reply`.
    Fetch {
        url: Option<String>,
        #[arg(long)]
        session: Option<String>,
    },
    /// Report the package's signing schemes.
    Inspect {
        #[arg(long)]
        session: String,
    },
    /// Decompile without mutating.
    Decompile {
        #[arg(long)]
        session: String,
    },
    /// Sanitize and rebuild the decompiled tree.
    Rebuild {
        #[arg(long)]
        session: String,
    },
    /// Sign the newest built variant with a fresh test key.
    Sign {
        #[arg(long)]
        session: String,
    },
    /// Rename package id and display name, optionally swap icons, rebuild.
    EditIdentity {
        #[arg(long)]
        session: String,
        #[arg(long)]
        display_name: Option<String>,
        #[arg(long)]
        icon: Option<PathBuf>,
    },
    /// Trust user certificate authorities and permit cleartext, then
    /// rebuild and sign.
    SslBypass {
        #[arg(long)]
        session: String,
    },
    /// Inject a startup toast; without text, arm the session to accept it
    /// via `reply`.
    Splash {
        #[arg(long)]
        session: String,
        text: Option<String>,
    },
    /// Answer the session's pending prompt.
    Reply {
        #[arg(long)]
        session: String,
        value: String,
    },
    /// Discard a session and its artifacts.
    Cancel {
        #[arg(long)]
        session: String,
    },
    /// List live sessions.
    List,
    /// Remove sessions idle past the configured expiry.
    Reap,
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    run(cli, config).await
}

async fn run(cli: Cli, config: AppConfig) -> Result<()> {
    let registry = SessionRegistry::load(config.state_file(), config.work_root())?;
    let orchestrator = Orchestrator::new(Toolchain::new(config.toolchain.clone()));

    match cli.command {
        CommandKind::New { package } => {
            if !package.is_file() {
                bail!("package {} does not exist", package.display());
            }
            let handle = registry.create(cli.user).await?;
            let id = {
                let mut session = handle.lock().await;
                let name = package
                    .file_name()
                    .and_then(|name| name.to_str())
                    .context("package path has no file name")?
                    .to_string();
                let admitted = session.workdir.join(&name);
                fs::copy(&package, &admitted)
                    .with_context(|| format!("could not copy {}", package.display()))?;
                session.package_path = Some(admitted);
                session.package_name = Some(name);
                session.id.clone()
            };
            registry.persist().await?;
            println!("session {id} created");
        }
        CommandKind::Fetch { url, session } => match url {
            Some(url) => {
                let handle = match session {
                    Some(id) => require_session(&registry, &id).await?,
                    None => registry.create(cli.user).await?,
                };
                let (id, path) = {
                    let mut session = handle.lock().await;
                    let client = reqwest::Client::new();
                    let path = download_package(
                        &client,
                        &url,
                        &mut session,
                        config.download_limit_bytes,
                    )
                    .await?;
                    (session.id.clone(), path)
                };
                registry.persist().await?;
                println!("session {id}: downloaded {}", path.display());
            }
            None => {
                let id = session.context("--session is required when no URL is given")?;
                require_session(&registry, &id).await?;
                registry
                    .begin_workflow(&id, cli.user, PendingWorkflow::AwaitingSourceUrl)
                    .await?;
                println!("send the package URL with: droidforge reply --session {id} <url>");
            }
        },
        CommandKind::Inspect { session } => {
            let handle = require_session(&registry, &session).await?;
            let report = {
                let mut session = handle.lock().await;
                session.touch();
                orchestrator.inspect_signature(&session)?
            };
            registry.persist().await?;
            println!("{report}");
        }
        CommandKind::Decompile { session } => {
            let handle = require_session(&registry, &session).await?;
            let delivery = {
                let mut session = handle.lock().await;
                session.touch();
                workflows::decompile(&orchestrator, &session).await?
            };
            registry.persist().await?;
            emit(&delivery);
        }
        CommandKind::Rebuild { session } => {
            let handle = require_session(&registry, &session).await?;
            let delivery = {
                let mut session = handle.lock().await;
                session.touch();
                workflows::rebuild(&orchestrator, &session).await?
            };
            registry.persist().await?;
            emit(&delivery);
        }
        CommandKind::Sign { session } => {
            let handle = require_session(&registry, &session).await?;
            let delivery = {
                let mut session = handle.lock().await;
                session.touch();
                orchestrator.sign_package(&session).await?
            };
            registry.persist().await?;
            emit(&delivery);
        }
        CommandKind::EditIdentity {
            session,
            display_name,
            icon,
        } => match display_name {
            Some(display_name) => {
                let handle = require_session(&registry, &session).await?;
                let delivery = {
                    let mut session = handle.lock().await;
                    session.touch();
                    session.pending_display_name = Some(display_name);
                    workflows::complete_identity_edit(&orchestrator, &mut session, icon.as_deref())
                        .await?
                };
                registry.persist().await?;
                emit(&delivery);
            }
            None => {
                require_session(&registry, &session).await?;
                registry
                    .begin_workflow(
                        &session,
                        cli.user,
                        PendingWorkflow::AwaitingDisplayName { auto_chain: true },
                    )
                    .await?;
                println!(
                    "send the new display name with: droidforge reply --session {session} <name>"
                );
            }
        },
        CommandKind::SslBypass { session } => {
            let handle = require_session(&registry, &session).await?;
            let delivery = {
                let mut session = handle.lock().await;
                session.touch();
                workflows::ssl_bypass(&orchestrator, &session).await?
            };
            registry.persist().await?;
            emit(&delivery);
        }
        CommandKind::Splash { session, text } => match text {
            Some(text) => {
                let handle = require_session(&registry, &session).await?;
                let delivery = {
                    let mut session = handle.lock().await;
                    session.touch();
                    workflows::splash(&orchestrator, &session, &text).await?
                };
                registry.persist().await?;
                emit(&delivery);
            }
            None => {
                require_session(&registry, &session).await?;
                registry
                    .begin_workflow(&session, cli.user, PendingWorkflow::AwaitingSplashText)
                    .await?;
                println!(
                    "send the splash text with: droidforge reply --session {session} <text>"
                );
            }
        },
        CommandKind::Reply { session, value } => {
            reply(&registry, &orchestrator, &config, &session, cli.user, &value).await?;
        }
        CommandKind::Cancel { session } => {
            if registry.remove(&session).await? {
                println!("session {session} discarded");
            } else {
                println!("session {session} does not exist");
            }
        }
        CommandKind::List => {
            let sessions = registry.snapshot().await;
            if sessions.is_empty() {
                println!("no live sessions");
            }
            for session in sessions {
                println!(
                    "{}  user={}  package={}  pending={}",
                    session.id,
                    session.user_id,
                    session.package_name.as_deref().unwrap_or("-"),
                    session
                        .workflow
                        .as_ref()
                        .map(workflow_label)
                        .unwrap_or("-"),
                );
            }
        }
        CommandKind::Reap => {
            let expired = registry.expire_idle(config.session_idle_expiry_ms).await?;
            println!("removed {} idle session(s)", expired.len());
        }
    }

    Ok(())
}

/// Answers the session's armed prompt and advances or completes its
/// workflow.
async fn reply(
    registry: &SessionRegistry,
    orchestrator: &Orchestrator<Toolchain>,
    config: &AppConfig,
    session_id: &str,
    user: i64,
    value: &str,
) -> Result<()> {
    let handle = require_session(registry, session_id).await?;
    let workflow = {
        let mut session = handle.lock().await;
        session.touch();
        session.workflow.take()
    };

    match workflow {
        None => bail!("session {session_id} has no pending prompt"),
        Some(PendingWorkflow::AwaitingDisplayName { auto_chain }) => {
            {
                let mut session = handle.lock().await;
                session.pending_display_name = Some(value.to_string());
            }
            if auto_chain {
                registry
                    .begin_workflow(
                        session_id,
                        user,
                        PendingWorkflow::AwaitingIcon { auto_chain: true },
                    )
                    .await?;
                println!(
                    "send an icon path with: droidforge reply --session {session_id} <path> (or 'skip')"
                );
                return Ok(());
            }
            let delivery = {
                let mut session = handle.lock().await;
                workflows::complete_identity_edit(orchestrator, &mut session, None).await?
            };
            registry.persist().await?;
            emit(&delivery);
        }
        Some(PendingWorkflow::AwaitingIcon { .. }) => {
            let icon = if value.eq_ignore_ascii_case("skip") {
                None
            } else {
                let path = PathBuf::from(value);
                if !path.is_file() {
                    bail!("icon {} does not exist", path.display());
                }
                Some(path)
            };
            let delivery = {
                let mut session = handle.lock().await;
                workflows::complete_identity_edit(orchestrator, &mut session, icon.as_deref())
                    .await?
            };
            registry.persist().await?;
            emit(&delivery);
        }
        Some(PendingWorkflow::AwaitingSplashText) => {
            let delivery = {
                let session = handle.lock().await;
                workflows::splash(orchestrator, &session, value).await?
            };
            registry.persist().await?;
            emit(&delivery);
        }
        Some(PendingWorkflow::AwaitingSourceUrl) => {
            let path = {
                let mut session = handle.lock().await;
                let client = reqwest::Client::new();
                download_package(&client, value, &mut session, config.download_limit_bytes).await?
            };
            registry.persist().await?;
            println!("downloaded {}", path.display());
        }
    }
    Ok(())
}

fn workflow_label(workflow: &PendingWorkflow) -> &'static str {
    match workflow {
        PendingWorkflow::AwaitingDisplayName { .. } => "awaiting display name",
        PendingWorkflow::AwaitingIcon { .. } => "awaiting icon",
        PendingWorkflow::AwaitingSplashText => "awaiting splash text",
        PendingWorkflow::AwaitingSourceUrl => "awaiting source url",
    }
}

async fn require_session(registry: &SessionRegistry, id: &str) -> Result<SessionHandle> {
    registry
        .get(id)
        .await
        .with_context(|| format!("session {id} does not exist"))
}

fn emit(delivery: &Delivery) {
    println!("{}", delivery.message);
    if let Some(file) = &delivery.file {
        println!("artifact: {}", file.display());
    }
}
