//! Signing-metadata inspection for Android packages.
//!
//! Reads a package's cryptographic signing state directly from its ZIP
//! structure (legacy whole-archive certificates) and trailing APK Signing
//! Block (scheme v2/v3) without decompiling anything. Inspection is
//! best-effort by contract: it never raises to its caller, degrading to
//! "absent" on any I/O or parse failure.

use std::path::Path;

mod block;
mod legacy;

pub use block::{SchemeBlock, APK_SIG_BLOCK_MAGIC, V2_BLOCK_ID_MARKER, V3_BLOCK_ID_MARKER};
pub use legacy::{CertContainer, LegacyCertificate};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Per-scheme signing state derived from a package's bytes at read time.
pub struct SignatureRecord {
    pub legacy: Option<LegacyCertificate>,
    pub v2: Option<SchemeBlock>,
    pub v3: Option<SchemeBlock>,
}

impl SignatureRecord {
    /// Joins the detected scheme names, or reports that none were found.
    pub fn summary(&self) -> String {
        let mut present = Vec::new();
        if self.legacy.is_some() {
            present.push("V1 (JAR signing)");
        }
        if self.v2.is_some() {
            present.push("V2 (APK Signing Scheme v2)");
        }
        if self.v3.is_some() {
            present.push("V3 (APK Signing Scheme v3)");
        }
        if present.is_empty() {
            "no signature detected".to_string()
        } else {
            present.join(" + ")
        }
    }
}

/// Inspects a package's signing metadata. Never fails: every underlying
/// error is logged and surfaces as the affected scheme(s) reported absent.
/// Legacy and v2/v3 detection are independent of each other.
pub fn inspect(package: &Path) -> SignatureRecord {
    let legacy = match legacy::detect_legacy_certificate(package) {
        Ok(found) => found,
        Err(error) => {
            tracing::warn!(
                package = %package.display(),
                %error,
                "legacy signature detection failed"
            );
            None
        }
    };

    let scan = match block::scan_signing_block(package) {
        Ok(scan) => scan,
        Err(error) => {
            tracing::warn!(
                package = %package.display(),
                %error,
                "signing block scan failed"
            );
            block::SigningBlockScan::default()
        }
    };

    SignatureRecord {
        legacy,
        v2: scan.v2,
        v3: scan.v3,
    }
}

/// Renders a human-readable multi-section signature report.
pub fn render_report(record: &SignatureRecord) -> String {
    let mut out = String::new();
    out.push_str("Signature analysis\n");
    out.push_str(&format!("Summary: {}\n\n", record.summary()));

    out.push_str("V1 - legacy JAR signing:\n");
    match &record.legacy {
        Some(cert) => {
            out.push_str("  present\n");
            out.push_str(&format!("  container: {}\n", cert.container.extension()));
            out.push_str(&format!("  entry: {}\n", cert.entry));
            out.push_str(&format!("  size: {} bytes\n", cert.size));
            out.push_str(&format!("  sha256: {}...\n", cert.sha256_prefix));
        }
        None => out.push_str("  absent\n"),
    }
    out.push('\n');

    for (label, scheme) in [("V2", &record.v2), ("V3", &record.v3)] {
        out.push_str(&format!("{label} - APK Signing Scheme {}:\n", label.to_lowercase()));
        match scheme {
            Some(block) => {
                out.push_str("  present\n");
                out.push_str(&format!("  platform: {}\n", block.min_platform));
                out.push_str(&format!("  algorithm: {}\n", block.algorithm_family));
                out.push_str(&format!("  block size: {} bytes\n", block.block_size));
            }
            None => out.push_str("  absent\n"),
        }
        out.push('\n');
    }

    out
}
