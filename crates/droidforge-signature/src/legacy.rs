//! Legacy (whole-archive) signature detection via the META-INF directory.
use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use zip::ZipArchive;

const CERT_HASH_PREFIX_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Certificate container type, in detection priority order.
pub enum CertContainer {
    Rsa,
    Dsa,
    Ec,
}

impl CertContainer {
    pub const ALL: [CertContainer; 3] = [CertContainer::Rsa, CertContainer::Dsa, CertContainer::Ec];

    pub fn extension(self) -> &'static str {
        match self {
            CertContainer::Rsa => "RSA",
            CertContainer::Dsa => "DSA",
            CertContainer::Ec => "EC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Metadata for a detected legacy certificate entry.
pub struct LegacyCertificate {
    pub container: CertContainer,
    pub entry: String,
    pub size: u64,
    pub sha256_prefix: String,
}

/// Scans the package's ZIP directory for a META-INF certificate container.
/// The three accepted extensions are checked in fixed priority order and the
/// first match wins.
pub(crate) fn detect_legacy_certificate(package: &Path) -> Result<Option<LegacyCertificate>> {
    let file = File::open(package)
        .with_context(|| format!("failed to open package {}", package.display()))?;
    let mut archive =
        ZipArchive::new(file).with_context(|| format!("{} is not a ZIP archive", package.display()))?;

    let names: Vec<String> = archive.file_names().map(str::to_string).collect();
    for container in CertContainer::ALL {
        let suffix = format!(".{}", container.extension());
        let Some(entry_name) = names
            .iter()
            .find(|name| name.contains("META-INF") && name.ends_with(&suffix))
        else {
            continue;
        };

        let mut entry = archive
            .by_name(entry_name)
            .with_context(|| format!("failed to read ZIP entry {entry_name}"))?;
        let mut data = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut data)
            .with_context(|| format!("failed to read certificate {entry_name}"))?;

        let digest = hex::encode(Sha256::digest(&data));
        return Ok(Some(LegacyCertificate {
            container,
            entry: entry_name.clone(),
            size: data.len() as u64,
            sha256_prefix: digest[..CERT_HASH_PREFIX_LEN].to_string(),
        }));
    }

    Ok(None)
}
