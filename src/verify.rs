use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::failure::{Failure, FailureKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationTask {
    pub filename: String,
    pub path: PathBuf,
    pub checksum: String,
}

pub async fn calculate_hash(filepath: &Path) -> std::io::Result<String> {
    let mut file = File::open(filepath).await?;
    let mut hasher = Sha256::new();
    let mut buffer = [0; 8192];

    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Hashes the file and compares against the expected checksum. A mismatching
/// file is deleted so it is never flashed.
pub async fn verify(task: &VerificationTask) -> Result<String, Failure> {
    let failure = |detail: String| {
        Failure::new(FailureKind::VerificationFailed)
            .with_filename(&task.filename)
            .with_detail(detail)
    };

    let hash = calculate_hash(&task.path)
        .await
        .map_err(|e| failure(format!("cannot read {}: {}", task.path.display(), e)))?;

    if !task.checksum.trim().eq_ignore_ascii_case(&hash) {
        discard(&task.path).await;
        return Err(failure(format!("expected {}, got {}", task.checksum, hash)));
    }
    Ok(hash)
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::debug!(error = %e, path = %path.display(), "Could not remove mismatching file");
    }
}
