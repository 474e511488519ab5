//! Per-user rework sessions.
//!
//! Each session owns an isolated working directory holding the uploaded
//! package, its decompiled tree, and every derived artifact. The registry
//! keeps live sessions behind per-session async mutexes so one user's
//! long-running rebuild never blocks another's, and snapshots all of them
//! to a JSONL state file guarded by a cross-process lock.
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use droidforge_core::{current_unix_timestamp_ms, random_token, write_text_atomic};

mod lock;

const STATE_SCHEMA_VERSION: u32 = 1;
const SESSION_ID_LEN: usize = 8;
const LOCK_TIMEOUT: Duration = Duration::from_secs(10);
const LOCK_STALE_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
/// A multi-step conversation state: the session is waiting for one more
/// input from its user before an operation can run.
pub enum PendingWorkflow {
    /// Waiting for the new display name. With `auto_chain` the full
    /// identity-edit pipeline continues once the name arrives.
    AwaitingDisplayName { auto_chain: bool },
    /// Waiting for a replacement launcher icon upload.
    AwaitingIcon { auto_chain: bool },
    /// Waiting for the startup-toast text.
    AwaitingSplashText,
    /// Waiting for a package URL to download.
    AwaitingSourceUrl,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
/// One user's rework session. All mutation happens under the registry's
/// per-session mutex.
pub struct Session {
    pub id: String,
    pub user_id: i64,
    pub workdir: PathBuf,
    /// The package currently under rework, when one has been admitted.
    pub package_path: Option<PathBuf>,
    pub package_name: Option<String>,
    /// Display name captured mid-workflow, applied after the rename step.
    pub pending_display_name: Option<String>,
    pub workflow: Option<PendingWorkflow>,
    pub created_at_ms: u64,
    pub last_active_ms: u64,
}

impl Session {
    fn new(id: String, user_id: i64, workdir: PathBuf) -> Self {
        let now = current_unix_timestamp_ms();
        Self {
            id,
            user_id,
            workdir,
            package_path: None,
            package_name: None,
            pending_display_name: None,
            workflow: None,
            created_at_ms: now,
            last_active_ms: now,
        }
    }

    /// Directory the decompiled tree is materialized into.
    pub fn decompile_root(&self) -> PathBuf {
        self.workdir.join("decompiled")
    }

    pub fn touch(&mut self) {
        self.last_active_ms = current_unix_timestamp_ms();
    }

    pub fn is_idle(&self, max_idle_ms: u64, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_active_ms) >= max_idle_ms
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "record_type", rename_all = "snake_case")]
enum StateRecord {
    Meta { schema_version: u32 },
    Entry { session: Session },
}

/// Shared handle to one session.
pub type SessionHandle = Arc<Mutex<Session>>;

/// All live sessions plus their durable JSONL snapshot.
#[derive(Debug)]
pub struct SessionRegistry {
    state_path: PathBuf,
    work_root: PathBuf,
    sessions: Mutex<HashMap<String, SessionHandle>>,
}

impl SessionRegistry {
    /// Loads the registry from `state_path`, tolerating a missing file.
    /// Snapshots written by a newer schema are rejected rather than
    /// silently misread.
    pub fn load(state_path: impl Into<PathBuf>, work_root: impl Into<PathBuf>) -> Result<Self> {
        let state_path = state_path.into();
        let work_root = work_root.into();
        fs::create_dir_all(&work_root)
            .with_context(|| format!("failed to create work root {}", work_root.display()))?;

        let mut sessions = HashMap::new();
        if state_path.is_file() {
            let content = fs::read_to_string(&state_path)
                .with_context(|| format!("failed to read state file {}", state_path.display()))?;
            for (line_number, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let record: StateRecord = serde_json::from_str(line).with_context(|| {
                    format!(
                        "malformed state record at {}:{}",
                        state_path.display(),
                        line_number + 1
                    )
                })?;
                match record {
                    StateRecord::Meta { schema_version } => {
                        if schema_version > STATE_SCHEMA_VERSION {
                            bail!(
                                "state file {} has schema version {schema_version}, newer than supported {STATE_SCHEMA_VERSION}",
                                state_path.display()
                            );
                        }
                    }
                    StateRecord::Entry { session } => {
                        sessions.insert(session.id.clone(), Arc::new(Mutex::new(session)));
                    }
                }
            }
        }

        tracing::info!(
            sessions = sessions.len(),
            state = %state_path.display(),
            "session registry loaded"
        );
        Ok(Self {
            state_path,
            work_root,
            sessions: Mutex::new(sessions),
        })
    }

    /// Creates a fresh session for `user_id` with its own working directory.
    pub async fn create(&self, user_id: i64) -> Result<SessionHandle> {
        let mut sessions = self.sessions.lock().await;
        let id = loop {
            let candidate = random_token(SESSION_ID_LEN);
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
        };
        let workdir = self.work_root.join(&id);
        fs::create_dir_all(&workdir)
            .with_context(|| format!("failed to create session workdir {}", workdir.display()))?;

        let handle = Arc::new(Mutex::new(Session::new(id.clone(), user_id, workdir)));
        sessions.insert(id.clone(), handle.clone());
        drop(sessions);

        self.persist().await?;
        tracing::info!(session = %id, user_id, "session created");
        Ok(handle)
    }

    pub async fn get(&self, id: &str) -> Option<SessionHandle> {
        self.sessions.lock().await.get(id).cloned()
    }

    /// Arms `workflow` on the given session and clears any pending workflow
    /// on the user's other sessions, so a free-text reply is never claimed
    /// by two prompts at once.
    pub async fn begin_workflow(
        &self,
        session_id: &str,
        user_id: i64,
        workflow: PendingWorkflow,
    ) -> Result<()> {
        let sessions = self.sessions.lock().await;
        for (id, handle) in sessions.iter() {
            let mut session = handle.lock().await;
            if session.id == session_id {
                session.workflow = Some(workflow.clone());
                session.touch();
            } else if session.user_id == user_id && session.workflow.is_some() {
                tracing::debug!(superseded = %id, "cleared superseded workflow");
                session.workflow = None;
            }
        }
        drop(sessions);
        self.persist().await
    }

    /// Finds the session holding a pending workflow for `user_id`, if any.
    pub async fn workflow_session_for_user(&self, user_id: i64) -> Option<SessionHandle> {
        let sessions = self.sessions.lock().await;
        for handle in sessions.values() {
            let session = handle.lock().await;
            if session.user_id == user_id && session.workflow.is_some() {
                drop(session);
                return Some(handle.clone());
            }
        }
        None
    }

    /// Removes a session and deletes its working directory. Returns whether
    /// the session existed.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let removed = self.sessions.lock().await.remove(id);
        let Some(handle) = removed else {
            return Ok(false);
        };
        let workdir = handle.lock().await.workdir.clone();
        if let Err(error) = fs::remove_dir_all(&workdir) {
            if error.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(workdir = %workdir.display(), %error, "could not delete session workdir");
            }
        }
        self.persist().await?;
        tracing::info!(session = %id, "session removed");
        Ok(true)
    }

    /// Removes every session idle for at least `max_idle_ms`. Returns the
    /// removed session ids.
    pub async fn expire_idle(&self, max_idle_ms: u64) -> Result<Vec<String>> {
        let now = current_unix_timestamp_ms();
        let mut expired = Vec::new();
        {
            let sessions = self.sessions.lock().await;
            for (id, handle) in sessions.iter() {
                if handle.lock().await.is_idle(max_idle_ms, now) {
                    expired.push(id.clone());
                }
            }
        }
        for id in &expired {
            self.remove(id).await?;
        }
        if !expired.is_empty() {
            tracing::info!(expired = expired.len(), "reaped idle sessions");
        }
        Ok(expired)
    }

    /// Point-in-time copies of every session, ordered by creation time.
    pub async fn snapshot(&self) -> Vec<Session> {
        let sessions = self.sessions.lock().await;
        let mut snapshots: Vec<Session> = Vec::with_capacity(sessions.len());
        for handle in sessions.values() {
            snapshots.push(handle.lock().await.clone());
        }
        snapshots.sort_by(|a, b| a.created_at_ms.cmp(&b.created_at_ms));
        snapshots
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    /// Snapshots every session to the state file: a meta record followed by
    /// one entry per session, written atomically under the file lock.
    pub async fn persist(&self) -> Result<()> {
        let lock_path = self.state_path.with_extension("lock");
        let _guard = lock::acquire_lock(&lock_path, LOCK_TIMEOUT, LOCK_STALE_AFTER).await?;

        let mut lines = Vec::new();
        lines.push(serde_json::to_string(&StateRecord::Meta {
            schema_version: STATE_SCHEMA_VERSION,
        })?);
        {
            let sessions = self.sessions.lock().await;
            let mut snapshots: Vec<Session> = Vec::with_capacity(sessions.len());
            for handle in sessions.values() {
                snapshots.push(handle.lock().await.clone());
            }
            snapshots.sort_by(|a, b| a.created_at_ms.cmp(&b.created_at_ms));
            for session in snapshots {
                lines.push(serde_json::to_string(&StateRecord::Entry { session })?);
            }
        }
        let mut content = lines.join("\n");
        content.push('\n');
        write_text_atomic(&self.state_path, &content)?;
        Ok(())
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    pub fn work_root(&self) -> &Path {
        &self.work_root
    }
}
