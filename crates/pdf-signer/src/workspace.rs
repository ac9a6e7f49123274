use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

const SOURCE_NAME: &str = "in.pdf";
const SIGNED_NAME: &str = "out.pdf";

/// Per-request scratch directory, removed when dropped.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
    source: PathBuf,
    signed: PathBuf,
}

impl Workspace {
    /// Creates the directory and stores the uploaded document in it.
    pub async fn create(document: &[u8]) -> io::Result<Self> {
        let dir = tokio::task::spawn_blocking(|| {
            tempfile::Builder::new().prefix("pdf-signer-").tempdir()
        })
        .await
        .map_err(io::Error::other)??;

        let source = dir.path().join(SOURCE_NAME);
        let signed = dir.path().join(SIGNED_NAME);
        tokio::fs::write(&source, document).await?;
        Ok(Self {
            dir,
            source,
            signed,
        })
    }

    /// The untouched upload; every signing attempt starts from here.
    pub fn source_path(&self) -> &Path {
        &self.source
    }

    /// Where a successful attempt leaves the signed document.
    pub fn signed_path(&self) -> &Path {
        &self.signed
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stores_source_next_to_signed_path() {
        let workspace = Workspace::create(b"%PDF-1.4 source").await.unwrap();
        assert_eq!(std::fs::read(workspace.source_path()).unwrap(), b"%PDF-1.4 source");

        assert_eq!(workspace.signed_path().parent(), Some(workspace.path()));
        assert_ne!(workspace.signed_path(), workspace.source_path());
        assert!(!workspace.signed_path().exists());
    }

    #[tokio::test]
    async fn directory_is_removed_on_drop() {
        let workspace = Workspace::create(b"%PDF-").await.unwrap();
        let dir = workspace.path().to_path_buf();
        assert!(dir.exists());
        drop(workspace);
        assert!(!dir.exists());
    }
}
