//! Admission of packages by URL download.
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use tokio::io::AsyncWriteExt;

use droidforge_core::random_token;
use droidforge_session::Session;

/// Hard cap on downloaded package size.
pub const URL_DOWNLOAD_LIMIT_BYTES: u64 = 500 * 1024 * 1024;

const NAME_TOKEN_LEN: usize = 6;

/// Derives a local file name from the URL's last path segment, falling back
/// to a synthesized `app_<token>.apk` when the segment is not a plausible
/// package name.
pub fn package_file_name(url: &str, token: &str) -> String {
    let path = url
        .split(['?', '#'])
        .next()
        .unwrap_or_default();
    let segment = path.rsplit('/').next().unwrap_or_default();
    let plausible = !segment.is_empty()
        && segment.to_ascii_lowercase().ends_with(".apk")
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if plausible {
        segment.to_string()
    } else {
        format!("app_{token}.apk")
    }
}

/// Downloads a package into the session's working directory and admits it
/// as the session package. The size cap is enforced twice: against the
/// declared length before the transfer and against the actual bytes during
/// it, with any partial file deleted on overflow.
pub async fn download_package(
    client: &reqwest::Client,
    url: &str,
    session: &mut Session,
    limit_bytes: u64,
) -> Result<PathBuf> {
    let mut response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("request to {url} failed"))?;
    if !response.status().is_success() {
        bail!("download of {url} failed with status {}", response.status());
    }
    if let Some(declared) = response.content_length() {
        if declared > limit_bytes {
            bail!("remote package is {declared} bytes, over the {limit_bytes} byte limit");
        }
    }

    let name = package_file_name(url, &random_token(NAME_TOKEN_LEN));
    let path = session.workdir.join(&name);
    let mut file = tokio::fs::File::create(&path)
        .await
        .with_context(|| format!("could not create {}", path.display()))?;

    let mut written: u64 = 0;
    while let Some(chunk) = response.chunk().await.context("download interrupted")? {
        written += chunk.len() as u64;
        if written > limit_bytes {
            drop(file);
            let _ = tokio::fs::remove_file(&path).await;
            bail!("download exceeded the {limit_bytes} byte limit; partial file discarded");
        }
        file.write_all(&chunk)
            .await
            .with_context(|| format!("could not write {}", path.display()))?;
    }
    file.flush().await?;

    tracing::info!(session = %session.id, %url, bytes = written, file = %name, "package downloaded");
    session.package_path = Some(path.clone());
    session.package_name = Some(name);
    session.touch();
    Ok(path)
}
