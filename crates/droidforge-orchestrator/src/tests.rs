use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tempfile::tempdir;

use droidforge_session::{SessionHandle, SessionRegistry};
use droidforge_toolchain::{ApkTools, ToolResult, ToolRun};

use super::actions::{decode_callback, encode_callback, ApkAction};
use super::fetch::package_file_name;
use super::orchestrator::Orchestrator;
use super::outcome::{
    classify_build_failure, BuildFailureClass, RebuildOutcome, DIAGNOSTIC_DISPLAY_LIMIT,
};
use super::workflows;

const FAKE_MANIFEST: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<manifest xmlns:android="http://schemas.android.com/apk/res/android" package="com.example.app">
    <application android:label="@string/app_name">
        <activity android:name="com.example.app.MainActivity">
            <intent-filter>
                <action android:name="android.intent.action.MAIN" />
            </intent-filter>
        </activity>
    </application>
</manifest>
"#;

const FAKE_LISTING: &str = ".class public Lcom/example/app/MainActivity;\n\n.method protected onCreate(Landroid/os/Bundle;)V\n    .locals 1\n\n    invoke-super {p0, p1}, Landroid/app/Activity;->onCreate(Landroid/os/Bundle;)V\n\n    return-void\n.end method\n";

/// Scripted toolchain double. Decode materializes a minimal buildable
/// tree; build consumes scripted outcomes in order and defaults to
/// success.
struct FakeTools {
    calls: Mutex<Vec<String>>,
    build_script: Mutex<VecDeque<(bool, String)>>,
    keystore_ok: bool,
    align_ok: bool,
    sign_ok: bool,
}

impl Default for FakeTools {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            build_script: Mutex::new(VecDeque::new()),
            keystore_ok: true,
            align_ok: true,
            sign_ok: true,
        }
    }
}

impl FakeTools {
    fn with_build_script(outcomes: Vec<(bool, &str)>) -> Self {
        Self {
            build_script: Mutex::new(
                outcomes
                    .into_iter()
                    .map(|(ok, output)| (ok, output.to_string()))
                    .collect(),
            ),
            ..Self::default()
        }
    }

    fn record(&self, call: String) {
        self.calls.lock().expect("calls lock").push(call);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl ApkTools for FakeTools {
    async fn decode(&self, _package: &Path, out_dir: &Path) -> ToolResult<ToolRun> {
        self.record("decode".to_string());
        fs::create_dir_all(out_dir.join("smali/com/example/app")).expect("tree dirs");
        fs::create_dir_all(out_dir.join("res/values")).expect("res dirs");
        fs::write(out_dir.join("apktool.yml"), "version: 2.9.0\n").expect("descriptor");
        fs::write(out_dir.join("AndroidManifest.xml"), FAKE_MANIFEST).expect("manifest");
        fs::write(
            out_dir.join("smali/com/example/app/MainActivity.smali"),
            FAKE_LISTING,
        )
        .expect("listing");
        fs::write(
            out_dir.join("res/values/strings.xml"),
            "<resources>\n    <string name=\"app_name\">Example</string>\n</resources>\n",
        )
        .expect("strings");
        fs::write(
            out_dir.join("res/values/public.xml"),
            "<resources>\n    <public type=\"drawable\" name=\"ic_notification\" id=\"0x7f020001\" />\n    <public type=\"string\" name=\"app_name\" id=\"0x7f030000\" />\n</resources>\n",
        )
        .expect("registry");
        Ok(ToolRun {
            succeeded: true,
            output: String::new(),
        })
    }

    async fn build(
        &self,
        _tree_root: &Path,
        out_package: &Path,
        skip_resources: bool,
    ) -> ToolResult<ToolRun> {
        self.record(format!("build skip_res={skip_resources}"));
        let (succeeded, output) = self
            .build_script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or((true, String::new()));
        if succeeded {
            fs::write(out_package, b"built package").expect("artifact");
        }
        Ok(ToolRun { succeeded, output })
    }

    async fn generate_keystore(&self, keystore: &Path) -> ToolResult<ToolRun> {
        self.record(format!(
            "keystore {}",
            keystore.file_name().and_then(|n| n.to_str()).unwrap_or("")
        ));
        if self.keystore_ok {
            fs::write(keystore, b"keystore").expect("keystore");
        }
        Ok(ToolRun {
            succeeded: self.keystore_ok,
            output: String::new(),
        })
    }

    async fn align(&self, package: &Path, out_package: &Path) -> ToolResult<ToolRun> {
        self.record("align".to_string());
        if self.align_ok {
            fs::copy(package, out_package).expect("align copy");
        }
        Ok(ToolRun {
            succeeded: self.align_ok,
            output: String::new(),
        })
    }

    async fn sign(&self, package: &Path, _keystore: &Path) -> ToolResult<ToolRun> {
        self.record(format!(
            "sign {}",
            package.file_name().and_then(|n| n.to_str()).unwrap_or("")
        ));
        Ok(ToolRun {
            succeeded: self.sign_ok,
            output: if self.sign_ok {
                String::new()
            } else {
                "signing refused".to_string()
            },
        })
    }
}

async fn session_with_package(root: &Path) -> (SessionRegistry, SessionHandle) {
    let registry = SessionRegistry::load(root.join("state.jsonl"), root.join("work"))
        .expect("load registry");
    let handle = registry.create(1).await.expect("create session");
    {
        let mut session = handle.lock().await;
        let package = session.workdir.join("app.apk");
        fs::write(&package, b"original apk").expect("package");
        session.package_path = Some(package);
        session.package_name = Some("app.apk".to_string());
    }
    (registry, handle)
}

fn set_mtime(path: &Path, base: SystemTime, offset_secs: u64) {
    let file = fs::File::options().write(true).open(path).expect("open");
    file.set_modified(base + Duration::from_secs(offset_secs))
        .expect("set mtime");
}

#[tokio::test]
async fn decompile_runs_once_per_tree() {
    let temp = tempdir().expect("tempdir");
    let (_registry, handle) = session_with_package(temp.path()).await;
    let orchestrator = Orchestrator::new(FakeTools::default());

    let session = handle.lock().await;
    orchestrator.ensure_decompiled(&session).await.expect("first");
    orchestrator.ensure_decompiled(&session).await.expect("second");

    let decodes = orchestrator
        .tools()
        .calls()
        .iter()
        .filter(|call| call.starts_with("decode"))
        .count();
    assert_eq!(decodes, 1);
}

#[tokio::test]
async fn rebuild_succeeds_first_try() {
    let temp = tempdir().expect("tempdir");
    let (_registry, handle) = session_with_package(temp.path()).await;
    let orchestrator = Orchestrator::new(FakeTools::default());

    let session = handle.lock().await;
    let outcome = orchestrator.rebuild(&session, "rebuilt_").await.expect("rebuild");
    let RebuildOutcome::Built { package } = outcome else {
        panic!("expected a full build, got {outcome:?}");
    };
    assert_eq!(
        package.file_name().and_then(|n| n.to_str()),
        Some("rebuilt_app.apk")
    );
    assert!(package.is_file());
}

#[tokio::test]
async fn corrupt_resources_retry_skips_resource_compilation() {
    let temp = tempdir().expect("tempdir");
    let (_registry, handle) = session_with_package(temp.path()).await;
    let orchestrator = Orchestrator::new(FakeTools::with_build_script(vec![
        (false, "brut: libpng error: Not a PNG file"),
        (true, ""),
    ]));

    let session = handle.lock().await;
    let outcome = orchestrator.rebuild(&session, "rebuilt_").await.expect("rebuild");
    assert!(matches!(outcome, RebuildOutcome::BuiltWithoutResources { .. }));

    let calls = orchestrator.tools().calls();
    let builds: Vec<&String> = calls.iter().filter(|c| c.starts_with("build")).collect();
    assert_eq!(builds, ["build skip_res=false", "build skip_res=true"]);
}

#[tokio::test]
async fn broken_references_are_pruned_before_the_retry() {
    let temp = tempdir().expect("tempdir");
    let (_registry, handle) = session_with_package(temp.path()).await;
    let orchestrator = Orchestrator::new(FakeTools::with_build_script(vec![
        (false, "error: Public symbol drawable/ic_notification declared here is not defined."),
        (true, ""),
    ]));

    let session = handle.lock().await;
    let outcome = orchestrator.rebuild(&session, "rebuilt_").await.expect("rebuild");
    assert!(matches!(outcome, RebuildOutcome::Built { .. }));

    let registry_file = session
        .decompile_root()
        .join("res/values/public.xml");
    let registry = fs::read_to_string(registry_file).expect("registry");
    assert!(!registry.contains("ic_notification"));

    let calls = orchestrator.tools().calls();
    let builds: Vec<&String> = calls.iter().filter(|c| c.starts_with("build")).collect();
    assert_eq!(builds, ["build skip_res=false", "build skip_res=false"]);
}

#[tokio::test]
async fn unclassified_failure_gets_no_retry_and_a_bounded_diagnostic() {
    let temp = tempdir().expect("tempdir");
    let (_registry, handle) = session_with_package(temp.path()).await;
    let noise = "x".repeat(5000);
    let orchestrator =
        Orchestrator::new(FakeTools::with_build_script(vec![(false, noise.as_str())]));

    let session = handle.lock().await;
    let outcome = orchestrator.rebuild(&session, "rebuilt_").await.expect("rebuild");
    let RebuildOutcome::Failed { diagnostic } = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert_eq!(diagnostic.chars().count(), DIAGNOSTIC_DISPLAY_LIMIT);

    let builds = orchestrator
        .tools()
        .calls()
        .iter()
        .filter(|c| c.starts_with("build"))
        .count();
    assert_eq!(builds, 1);
}

#[tokio::test]
async fn sign_prefers_the_newest_built_variant() {
    let temp = tempdir().expect("tempdir");
    let (_registry, handle) = session_with_package(temp.path()).await;
    let orchestrator = Orchestrator::new(FakeTools::default());

    let session = handle.lock().await;
    let old_variant = session.workdir.join("rebuilt_app.apk");
    let new_variant = session.workdir.join("modified_app.apk");
    fs::write(&old_variant, b"old").expect("variant");
    fs::write(&new_variant, b"new").expect("variant");
    let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
    set_mtime(&old_variant, base, 10);
    set_mtime(&new_variant, base, 20);

    let delivery = orchestrator.sign_package(&session).await.expect("sign");
    assert_eq!(
        delivery.file.as_ref().and_then(|f| f.file_name()).and_then(|n| n.to_str()),
        Some("signed_modified_app.apk")
    );
    assert!(delivery.message.contains("testkey"));
    assert!(orchestrator
        .tools()
        .calls()
        .iter()
        .any(|c| c == "sign aligned_modified_app.apk"));
}

#[tokio::test]
async fn sign_falls_back_to_the_original_package() {
    let temp = tempdir().expect("tempdir");
    let (_registry, handle) = session_with_package(temp.path()).await;
    let orchestrator = Orchestrator::new(FakeTools::default());

    let session = handle.lock().await;
    let delivery = orchestrator.sign_package(&session).await.expect("sign");
    assert_eq!(
        delivery.file.as_ref().and_then(|f| f.file_name()).and_then(|n| n.to_str()),
        Some("signed_app.apk")
    );
}

#[tokio::test]
async fn failed_alignment_signs_the_unaligned_package() {
    let temp = tempdir().expect("tempdir");
    let (_registry, handle) = session_with_package(temp.path()).await;
    let tools = FakeTools {
        align_ok: false,
        ..FakeTools::default()
    };
    let orchestrator = Orchestrator::new(tools);

    let session = handle.lock().await;
    let delivery = orchestrator.sign_package(&session).await.expect("sign");
    assert!(delivery.message.contains("unaligned"));
    assert!(orchestrator.tools().calls().iter().any(|c| c == "sign app.apk"));
}

#[tokio::test]
async fn keystore_failure_aborts_signing() {
    let temp = tempdir().expect("tempdir");
    let (_registry, handle) = session_with_package(temp.path()).await;
    let tools = FakeTools {
        keystore_ok: false,
        ..FakeTools::default()
    };
    let orchestrator = Orchestrator::new(tools);

    let session = handle.lock().await;
    let error = orchestrator.sign_package(&session).await.expect_err("abort");
    assert!(error.to_string().contains("keystore"));
}

#[tokio::test]
async fn each_sign_run_generates_a_fresh_keystore() {
    let temp = tempdir().expect("tempdir");
    let (_registry, handle) = session_with_package(temp.path()).await;
    let orchestrator = Orchestrator::new(FakeTools::default());

    let session = handle.lock().await;
    orchestrator.sign_package(&session).await.expect("first sign");
    orchestrator.sign_package(&session).await.expect("second sign");

    let keystores: Vec<String> = orchestrator
        .tools()
        .calls()
        .iter()
        .filter(|c| c.starts_with("keystore"))
        .cloned()
        .collect();
    assert_eq!(keystores.len(), 2);
    assert_ne!(keystores[0], keystores[1]);
}

#[tokio::test]
async fn identity_edit_renames_package_and_display_name() {
    let temp = tempdir().expect("tempdir");
    let (_registry, handle) = session_with_package(temp.path()).await;
    let orchestrator = Orchestrator::new(FakeTools::default());

    let mut session = handle.lock().await;
    session.pending_display_name = Some("Fresh Name".to_string());
    let delivery = workflows::complete_identity_edit(&orchestrator, &mut session, None)
        .await
        .expect("identity edit");

    assert!(delivery.message.contains("com.example.app -> com.modified."));
    assert!(delivery.message.contains("Fresh Name"));
    assert!(session.pending_display_name.is_none());
    assert_eq!(
        delivery.file.as_ref().and_then(|f| f.file_name()).and_then(|n| n.to_str()),
        Some("modified_app.apk")
    );

    let strings = fs::read_to_string(
        session.decompile_root().join("res/values/strings.xml"),
    )
    .expect("strings");
    assert!(strings.contains("<string name=\"app_name\">Fresh Name</string>"));
}

#[tokio::test]
async fn ssl_bypass_delivers_signed_package() {
    let temp = tempdir().expect("tempdir");
    let (_registry, handle) = session_with_package(temp.path()).await;
    let orchestrator = Orchestrator::new(FakeTools::default());

    let session = handle.lock().await;
    let delivery = workflows::ssl_bypass(&orchestrator, &session)
        .await
        .expect("ssl bypass");
    assert!(delivery.message.contains("SSL bypass applied"));
    assert_eq!(
        delivery.file.as_ref().and_then(|f| f.file_name()).and_then(|n| n.to_str()),
        Some("signed_ssl_bypassed_app.apk")
    );
    assert!(session
        .decompile_root()
        .join("res/xml/network_security_config.xml")
        .is_file());
}

#[tokio::test]
async fn ssl_bypass_still_delivers_when_signing_fails() {
    let temp = tempdir().expect("tempdir");
    let (_registry, handle) = session_with_package(temp.path()).await;
    let tools = FakeTools {
        sign_ok: false,
        ..FakeTools::default()
    };
    let orchestrator = Orchestrator::new(tools);

    let session = handle.lock().await;
    let delivery = workflows::ssl_bypass(&orchestrator, &session)
        .await
        .expect("ssl bypass");
    assert!(delivery.message.contains("must be signed"));
    assert_eq!(
        delivery.file.as_ref().and_then(|f| f.file_name()).and_then(|n| n.to_str()),
        Some("ssl_bypassed_app.apk")
    );
}

#[tokio::test]
async fn splash_injects_and_rebuilds() {
    let temp = tempdir().expect("tempdir");
    let (_registry, handle) = session_with_package(temp.path()).await;
    let orchestrator = Orchestrator::new(FakeTools::default());

    let session = handle.lock().await;
    let delivery = workflows::splash(&orchestrator, &session, "hello there")
        .await
        .expect("splash");
    assert!(delivery.message.contains("hello there"));
    assert!(delivery.file.is_some());

    let listing = fs::read_to_string(
        session
            .decompile_root()
            .join("smali/com/example/app/MainActivity.smali"),
    )
    .expect("listing");
    assert!(listing.contains("const-string v1, \"hello there\""));
}

#[tokio::test]
async fn splash_rejects_oversized_text() {
    let temp = tempdir().expect("tempdir");
    let (_registry, handle) = session_with_package(temp.path()).await;
    let orchestrator = Orchestrator::new(FakeTools::default());

    let session = handle.lock().await;
    let text = "x".repeat(workflows::SPLASH_TEXT_LIMIT + 1);
    let error = workflows::splash(&orchestrator, &session, &text)
        .await
        .expect_err("over limit");
    assert!(error.to_string().contains("characters"));
}

#[test]
fn callback_encoding_round_trips_every_action() {
    for action in ApkAction::ALL {
        let encoded = encode_callback(action, "ab12cd34");
        let (decoded, session_id) = decode_callback(&encoded).expect("round trip");
        assert_eq!(decoded, action);
        assert_eq!(session_id, "ab12cd34");
    }
}

#[test]
fn foreign_callbacks_are_ignored() {
    assert!(decode_callback("other_cmd_build_ab12cd34").is_none());
    assert!(decode_callback("apk_cmd_unknown_ab12cd34").is_none());
    assert!(decode_callback("apk_cmd_build_").is_none());
    assert!(decode_callback("apk_cmd_build").is_none());
}

#[test]
fn build_failure_classification_checks_resources_first() {
    assert_eq!(
        classify_build_failure("brut: libpng error: Not a PNG file"),
        BuildFailureClass::CorruptResources
    );
    assert_eq!(
        classify_build_failure("invalid PNG image loaded, symbol not defined"),
        BuildFailureClass::CorruptResources
    );
    assert_eq!(
        classify_build_failure("Public symbol drawable/x declared here is not defined"),
        BuildFailureClass::BrokenReferences
    );
    assert_eq!(
        classify_build_failure("something else entirely"),
        BuildFailureClass::Unclassified
    );
}

#[test]
fn url_file_names_keep_plausible_segments() {
    assert_eq!(
        package_file_name("https://host/downloads/My-App_1.2.apk?sig=abc", "tok123"),
        "My-App_1.2.apk"
    );
    assert_eq!(
        package_file_name("https://host/get?id=44", "tok123"),
        "app_tok123.apk"
    );
    assert_eq!(package_file_name("https://host/", "tok123"), "app_tok123.apk");
}
