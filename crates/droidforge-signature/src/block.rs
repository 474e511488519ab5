//! APK Signing Block footer parsing and scheme v2/v3 marker detection.
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use anyhow::{Context, Result};

/// 16-byte trailer marker that terminates an APK Signing Block.
pub const APK_SIG_BLOCK_MAGIC: &[u8; 16] = b"APK Sig Block 42";

/// Little-endian bytes of the v2 block ID 0x7109871a.
pub const V2_BLOCK_ID_MARKER: [u8; 4] = [0x1a, 0x87, 0x09, 0x71];

/// Little-endian bytes of the v3 block ID 0xf05368c0.
pub const V3_BLOCK_ID_MARKER: [u8; 4] = [0xc0, 0x68, 0x53, 0xf0];

const FOOTER_LEN: u64 = 24;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Descriptive metadata for a detected v2/v3 scheme entry.
pub struct SchemeBlock {
    pub min_platform: &'static str,
    pub algorithm_family: &'static str,
    pub block_size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct SigningBlockScan {
    pub v2: Option<SchemeBlock>,
    pub v3: Option<SchemeBlock>,
}

/// Reads the trailing signing block and checks it for the v2/v3 ID markers.
///
/// This is a heuristic raw-byte presence scan, not a structural parse of the
/// block's ID-length-value sequence: faster and simpler, at the cost of a
/// theoretical false positive if the marker bytes occur incidentally inside
/// another entry's value.
pub(crate) fn scan_signing_block(package: &Path) -> Result<SigningBlockScan> {
    let mut file = File::open(package)
        .with_context(|| format!("failed to open package {}", package.display()))?;
    let file_len = file
        .metadata()
        .with_context(|| format!("failed to stat {}", package.display()))?
        .len();
    if file_len < FOOTER_LEN {
        return Ok(SigningBlockScan::default());
    }

    let mut footer = [0u8; FOOTER_LEN as usize];
    file.seek(SeekFrom::End(-(FOOTER_LEN as i64)))
        .context("failed to seek to package footer")?;
    file.read_exact(&mut footer)
        .context("failed to read package footer")?;

    // Not an APK Signing Block at all, e.g. a plain unsigned ZIP.
    if &footer[8..24] != APK_SIG_BLOCK_MAGIC {
        return Ok(SigningBlockScan::default());
    }

    let mut size_bytes = [0u8; 8];
    size_bytes.copy_from_slice(&footer[0..8]);
    let block_size = u64::from_le_bytes(size_bytes);

    let total_len = match block_size.checked_add(FOOTER_LEN) {
        Some(total) if total <= file_len => total,
        _ => return Ok(SigningBlockScan::default()),
    };

    let mut block = vec![0u8; total_len as usize];
    file.seek(SeekFrom::End(-(total_len as i64)))
        .context("failed to seek to signing block start")?;
    file.read_exact(&mut block)
        .context("failed to read signing block")?;

    let v2 = contains_marker(&block, &V2_BLOCK_ID_MARKER).then(|| SchemeBlock {
        min_platform: "Android 7.0+",
        algorithm_family: "RSA/ECDSA",
        block_size,
    });
    let v3 = contains_marker(&block, &V3_BLOCK_ID_MARKER).then(|| SchemeBlock {
        min_platform: "Android 9.0+",
        algorithm_family: "RSA/ECDSA",
        block_size,
    });

    Ok(SigningBlockScan { v2, v3 })
}

fn contains_marker(haystack: &[u8], marker: &[u8; 4]) -> bool {
    haystack.windows(marker.len()).any(|window| window == marker)
}
