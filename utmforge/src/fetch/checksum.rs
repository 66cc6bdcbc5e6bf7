//! Checksum policy for fetched artifacts.

use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tokio::io::AsyncReadExt;
use utmforge_shared::errors::{UtmforgeError, UtmforgeResult};

const SHA256_HEX_LEN: usize = 64;

/// Expected digest of a fetched file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Checksum {
    /// Skip verification.
    #[default]
    None,
    /// Lowercase hex SHA-256.
    Sha256(String),
}

impl Checksum {
    /// Build a SHA-256 checksum from operator input, validating the hex.
    pub fn sha256(hex_digest: &str) -> UtmforgeResult<Self> {
        let digest = hex_digest.trim().to_ascii_lowercase();
        if digest.len() != SHA256_HEX_LEN || !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(UtmforgeError::Config(format!(
                "invalid sha256 checksum '{}': expected {} hex characters",
                hex_digest, SHA256_HEX_LEN
            )));
        }
        Ok(Checksum::Sha256(digest))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Checksum::None)
    }

    /// Verify `path` against this checksum.
    pub async fn verify(&self, path: &Path) -> UtmforgeResult<()> {
        let Checksum::Sha256(expected) = self else {
            return Ok(());
        };

        let actual = sha256_file(path).await?;
        if &actual != expected {
            return Err(UtmforgeError::ChecksumMismatch {
                path: path.display().to_string(),
                expected: expected.clone(),
                actual,
            });
        }
        Ok(())
    }
}

impl FromStr for Checksum {
    type Err = UtmforgeError;

    /// Accepts `""`, `none`, `sha256:<hex>` or a bare 64-character hex digest.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("none") {
            return Ok(Checksum::None);
        }
        match s.split_once(':') {
            Some((kind, digest)) if kind.eq_ignore_ascii_case("sha256") => Checksum::sha256(digest),
            Some((kind, _)) => Err(UtmforgeError::Config(format!(
                "unsupported checksum type '{}'",
                kind
            ))),
            None => Checksum::sha256(s),
        }
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Checksum::None => f.write_str("none"),
            Checksum::Sha256(digest) => write!(f, "sha256:{}", digest),
        }
    }
}

/// Hash a file in chunks without loading it whole.
pub async fn sha256_file(path: &Path) -> UtmforgeResult<String> {
    let mut file = tokio::fs::File::open(path).await.map_err(|e| {
        UtmforgeError::Storage(format!("failed to open {}: {}", path.display(), e))
    })?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
