//! Typed pipeline actions and their callback wire encoding.
//!
//! Inline keyboard callbacks carry `apk_cmd_<token>_<session>`. Tokens never
//! contain underscores, so the first underscore after the prefix always
//! separates token from session id.

pub const CALLBACK_PREFIX: &str = "apk_cmd_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// One pipeline action a user can request against a session.
pub enum ApkAction {
    /// Inspect and report signing schemes.
    Certificate,
    /// Decompile into the session tree without further mutation.
    Decompile,
    /// Sanitize and rebuild the current tree.
    Rebuild,
    /// Sign the newest built variant.
    Sign,
    /// Full identity edit: icon, package id, display name, rebuild.
    EditIdentity,
    /// Inject the permissive network security config and rebuild.
    SslBypass,
    /// Inject a startup toast and rebuild.
    Splash,
    /// Admit a package by URL download.
    LoadUrl,
    /// Discard the session and its artifacts.
    Cancel,
}

impl ApkAction {
    pub const ALL: [ApkAction; 9] = [
        ApkAction::Certificate,
        ApkAction::Decompile,
        ApkAction::Rebuild,
        ApkAction::Sign,
        ApkAction::EditIdentity,
        ApkAction::SslBypass,
        ApkAction::Splash,
        ApkAction::LoadUrl,
        ApkAction::Cancel,
    ];

    pub fn token(self) -> &'static str {
        match self {
            ApkAction::Certificate => "cert",
            ApkAction::Decompile => "decompile",
            ApkAction::Rebuild => "build",
            ApkAction::Sign => "sign",
            ApkAction::EditIdentity => "editall",
            ApkAction::SslBypass => "ssl",
            ApkAction::Splash => "splash",
            ApkAction::LoadUrl => "loadurl",
            ApkAction::Cancel => "cancel",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|action| action.token() == token)
    }

    /// Short human label for keyboard buttons.
    pub fn label(self) -> &'static str {
        match self {
            ApkAction::Certificate => "Check certificate",
            ApkAction::Decompile => "Decompile",
            ApkAction::Rebuild => "Rebuild",
            ApkAction::Sign => "Sign",
            ApkAction::EditIdentity => "Edit identity",
            ApkAction::SslBypass => "SSL bypass",
            ApkAction::Splash => "Splash text",
            ApkAction::LoadUrl => "Load from URL",
            ApkAction::Cancel => "Cancel",
        }
    }
}

pub fn encode_callback(action: ApkAction, session_id: &str) -> String {
    format!("{CALLBACK_PREFIX}{}_{session_id}", action.token())
}

/// Decodes callback data into an action and session id. Unknown prefixes
/// and tokens yield `None` so foreign callbacks pass through untouched.
pub fn decode_callback(data: &str) -> Option<(ApkAction, &str)> {
    let rest = data.strip_prefix(CALLBACK_PREFIX)?;
    let (token, session_id) = rest.split_once('_')?;
    let action = ApkAction::from_token(token)?;
    if session_id.is_empty() {
        return None;
    }
    Some((action, session_id))
}
