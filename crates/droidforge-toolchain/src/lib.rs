//! Wrappers over the external Android toolchain binaries.
//!
//! Every operation shells out to a configured binary under a timeout, with
//! the child killed if the future is dropped. A run reports success only
//! when the process exits cleanly AND the artifact it was asked to produce
//! exists; several of these tools exit zero after producing nothing.
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;


/// Keystore credentials baked into generated signing keys. These are
/// throwaway test credentials and every delivery message says so.
pub const KEY_ALIAS: &str = "testkey";
pub const KEY_PASSWORD: &str = "123456";
const KEY_DNAME: &str = "CN=Test,OU=Test,O=Test,L=Test,S=Test,C=US";
const KEY_VALIDITY_DAYS: &str = "10000";

const DEFAULT_DECODE_TIMEOUT_MS: u64 = 120_000;
const DEFAULT_BUILD_TIMEOUT_MS: u64 = 300_000;
const DEFAULT_SIGN_TIMEOUT_MS: u64 = 60_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
/// Paths and timeouts for the external binaries. Defaults assume the tools
/// are on PATH.
pub struct ToolchainConfig {
    pub apktool_path: String,
    pub keytool_path: String,
    pub zipalign_path: String,
    pub apksigner_path: String,
    pub decode_timeout_ms: u64,
    pub build_timeout_ms: u64,
    pub sign_timeout_ms: u64,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            apktool_path: "apktool".to_string(),
            keytool_path: "keytool".to_string(),
            zipalign_path: "zipalign".to_string(),
            apksigner_path: "apksigner".to_string(),
            decode_timeout_ms: DEFAULT_DECODE_TIMEOUT_MS,
            build_timeout_ms: DEFAULT_BUILD_TIMEOUT_MS,
            sign_timeout_ms: DEFAULT_SIGN_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("could not launch {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{tool} timed out after {timeout_ms} ms")]
    TimedOut { tool: String, timeout_ms: u64 },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type ToolResult<T> = Result<T, ToolError>;

#[derive(Debug, Clone)]
/// Outcome of one tool invocation. `output` is combined stdout and stderr,
/// kept whole so callers can classify failures from tool diagnostics.
pub struct ToolRun {
    pub succeeded: bool,
    pub output: String,
}

/// Seam over the external toolchain so pipeline logic can run against a
/// scripted double in tests.
#[async_trait]
pub trait ApkTools: Send + Sync {
    /// Decompile `package` into `out_dir`, overwriting any prior tree.
    async fn decode(&self, package: &Path, out_dir: &Path) -> ToolResult<ToolRun>;

    /// Rebuild a decompiled tree into `out_package`. With `skip_resources`
    /// the existing compiled resources are reused instead of recompiled.
    async fn build(
        &self,
        tree_root: &Path,
        out_package: &Path,
        skip_resources: bool,
    ) -> ToolResult<ToolRun>;

    /// Generate a fresh RSA test keystore at `keystore`.
    async fn generate_keystore(&self, keystore: &Path) -> ToolResult<ToolRun>;

    /// 4-byte align `package` into `out_package`.
    async fn align(&self, package: &Path, out_package: &Path) -> ToolResult<ToolRun>;

    /// Sign `package` in place with the key in `keystore`.
    async fn sign(&self, package: &Path, keystore: &Path) -> ToolResult<ToolRun>;
}

#[derive(Debug, Clone, Default)]
pub struct Toolchain {
    config: ToolchainConfig,
}

impl Toolchain {
    pub fn new(config: ToolchainConfig) -> Self {
        Self { config }
    }

    /// Runs one tool under its timeout. Success requires a clean exit and,
    /// when `artifact` is given, that the path exists afterwards.
    async fn run_tool(
        &self,
        tool: &str,
        mut command: Command,
        timeout_ms: u64,
        artifact: Option<&Path>,
    ) -> ToolResult<ToolRun> {
        command
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(tool, timeout_ms, "running external tool");
        let started = std::time::Instant::now();
        let output = match timeout(Duration::from_millis(timeout_ms.max(1)), command.output()).await
        {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(ToolError::Spawn {
                    tool: tool.to_string(),
                    source,
                })
            }
            Err(_) => {
                tracing::warn!(tool, timeout_ms, "external tool timed out");
                return Err(ToolError::TimedOut {
                    tool: tool.to_string(),
                    timeout_ms,
                });
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.stderr.is_empty() {
            if !combined.is_empty() {
                combined.push('\n');
            }
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
        }

        let artifact_present = artifact.map(Path::exists).unwrap_or(true);
        let succeeded = output.status.success() && artifact_present;
        tracing::debug!(
            tool,
            succeeded,
            status = ?output.status.code(),
            artifact_present,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "external tool finished"
        );
        Ok(ToolRun {
            succeeded,
            output: combined,
        })
    }
}

#[async_trait]
impl ApkTools for Toolchain {
    async fn decode(&self, package: &Path, out_dir: &Path) -> ToolResult<ToolRun> {
        let mut command = Command::new(&self.config.apktool_path);
        command.arg("d").arg(package).arg("-o").arg(out_dir).arg("-f");
        self.run_tool("apktool decode", command, self.config.decode_timeout_ms, Some(out_dir))
            .await
    }

    async fn build(
        &self,
        tree_root: &Path,
        out_package: &Path,
        skip_resources: bool,
    ) -> ToolResult<ToolRun> {
        let mut command = Command::new(&self.config.apktool_path);
        command
            .arg("b")
            .arg(tree_root)
            .arg("-o")
            .arg(out_package)
            .arg("--use-aapt1");
        if skip_resources {
            command.arg("--no-res");
        }
        self.run_tool(
            "apktool build",
            command,
            self.config.build_timeout_ms,
            Some(out_package),
        )
        .await
    }

    async fn generate_keystore(&self, keystore: &Path) -> ToolResult<ToolRun> {
        let mut command = Command::new(&self.config.keytool_path);
        command
            .arg("-genkey")
            .arg("-v")
            .arg("-keystore")
            .arg(keystore)
            .arg("-keyalg")
            .arg("RSA")
            .arg("-keysize")
            .arg("2048")
            .arg("-validity")
            .arg(KEY_VALIDITY_DAYS)
            .arg("-alias")
            .arg(KEY_ALIAS)
            .arg("-storepass")
            .arg(KEY_PASSWORD)
            .arg("-keypass")
            .arg(KEY_PASSWORD)
            .arg("-dname")
            .arg(KEY_DNAME);
        self.run_tool("keytool", command, self.config.sign_timeout_ms, Some(keystore))
            .await
    }

    async fn align(&self, package: &Path, out_package: &Path) -> ToolResult<ToolRun> {
        let mut command = Command::new(&self.config.zipalign_path);
        command.arg("-v").arg("4").arg(package).arg(out_package);
        self.run_tool(
            "zipalign",
            command,
            self.config.sign_timeout_ms,
            Some(out_package),
        )
        .await
    }

    async fn sign(&self, package: &Path, keystore: &Path) -> ToolResult<ToolRun> {
        let mut command = Command::new(&self.config.apksigner_path);
        command
            .arg("sign")
            .arg("--ks")
            .arg(keystore)
            .arg("--ks-pass")
            .arg(format!("pass:{KEY_PASSWORD}"))
            .arg("--ks-key-alias")
            .arg(KEY_ALIAS)
            .arg("--key-pass")
            .arg(format!("pass:{KEY_PASSWORD}"))
            .arg("--v1-signer-name")
            .arg("RSA")
            .arg(package);
        // apksigner signs in place; the input is the artifact to check.
        self.run_tool("apksigner", command, self.config.sign_timeout_ms, Some(package))
            .await
    }
}

/// Synthesizes a unique keystore file name under `dir`.
pub fn keystore_path(dir: &Path, unix_ms: u64, token: &str) -> PathBuf {
    dir.join(format!("key_{unix_ms}_{token}.keystore"))
}
