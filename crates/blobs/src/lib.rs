use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

mod names;
pub use names::{blocks_name, original_name, page_image_name, page_text_name, text_name};

/// Metadata attached to a stored blob: a small string map holding at least
/// the content type, size, and the user-facing file name.
pub type BlobMeta = BTreeMap<String, String>;

/// A blob read back from the store.
#[derive(Debug, Clone)]
pub struct Blob {
    pub bytes: bytes::Bytes,
    pub metadata: BlobMeta,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("blob {0:?} not found")]
    NotFound(String),
    #[error("invalid blob name {0:?}")]
    InvalidName(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("failed to decode blob metadata")]
    Metadata(#[source] serde_json::Error),
}

/// BlobStore is the sole holder of raw document bytes and derived artifacts:
/// originals, per-page raster PNGs, OCR blocks JSON, and per-page text.
#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, name: &str, bytes: bytes::Bytes, metadata: BlobMeta) -> Result<(), Error>;
    async fn get(&self, name: &str) -> Result<Blob, Error>;
    async fn delete(&self, name: &str) -> Result<(), Error>;
    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<String>, Error>;
}

/// FsStore keeps blobs as flat files under a root directory, with a JSON
/// sidecar per blob holding its metadata. Writes go through a temporary
/// file and rename, so a crashed write never leaves a partial blob visible.
pub struct FsStore {
    root: PathBuf,
}

const META_SUFFIX: &str = ".meta";

impl FsStore {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, Error> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn path_of(&self, name: &str) -> Result<PathBuf, Error> {
        // Blob names are a flat namespace. Reject anything that would
        // escape the root or collide with a metadata sidecar.
        if name.is_empty()
            || name.contains('/')
            || name.contains('\\')
            || name.starts_with('.')
            || name.ends_with(META_SUFFIX)
        {
            return Err(Error::InvalidName(name.to_string()));
        }
        Ok(self.root.join(name))
    }
}

async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), std::io::Error> {
    // Appended (not substituted) suffix, so distinct artifacts of one
    // document never share a temporary path.
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp-write");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await
}

#[async_trait::async_trait]
impl BlobStore for FsStore {
    async fn put(&self, name: &str, bytes: bytes::Bytes, metadata: BlobMeta) -> Result<(), Error> {
        let path = self.path_of(name)?;
        write_atomic(&path, &bytes).await?;

        let meta_bytes = serde_json::to_vec(&metadata).map_err(Error::Metadata)?;
        let meta_path = self.root.join(format!("{name}{META_SUFFIX}"));
        write_atomic(&meta_path, &meta_bytes).await?;

        tracing::debug!(%name, size = bytes.len(), "stored blob");
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Blob, Error> {
        let path = self.path_of(name)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => bytes::Bytes::from(b),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(name.to_string()))
            }
            Err(err) => return Err(err.into()),
        };

        let meta_path = self.root.join(format!("{name}{META_SUFFIX}"));
        let metadata = match tokio::fs::read(&meta_path).await {
            Ok(raw) => serde_json::from_slice(&raw).map_err(Error::Metadata)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BlobMeta::new(),
            Err(err) => return Err(err.into()),
        };

        Ok(Blob { bytes, metadata })
    }

    async fn delete(&self, name: &str) -> Result<(), Error> {
        let path = self.path_of(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => (),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(name.to_string()))
            }
            Err(err) => return Err(err.into()),
        }
        let meta_path = self.root.join(format!("{name}{META_SUFFIX}"));
        match tokio::fs::remove_file(&meta_path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<String>, Error> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.ends_with(META_SUFFIX) || name.ends_with(".tmp-write") {
                continue;
            }
            if name.starts_with(prefix) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    async fn store() -> (tempfile::TempDir, FsStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path()).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let (_dir, store) = store().await;

        let mut meta = BlobMeta::new();
        meta.insert("type".to_string(), "application/pdf".to_string());
        meta.insert("user_file_name".to_string(), "invoice.pdf".to_string());

        store
            .put("abc123.pdf", bytes::Bytes::from_static(b"%PDF-1.4\n"), meta.clone())
            .await
            .unwrap();

        let blob = store.get("abc123.pdf").await.unwrap();
        assert_eq!(&blob.bytes[..], b"%PDF-1.4\n");
        assert_eq!(blob.metadata, meta);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let (_dir, store) = store().await;
        match store.get("nope.pdf").await {
            Err(Error::NotFound(name)) => assert_eq!(name, "nope.pdf"),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_delete_removes_blob_and_sidecar() {
        let (dir, store) = store().await;
        store
            .put("doc.ocr_text.txt", bytes::Bytes::from_static(b"hello"), BlobMeta::new())
            .await
            .unwrap();
        store.delete("doc.ocr_text.txt").await.unwrap();

        assert!(matches!(
            store.get("doc.ocr_text.txt").await,
            Err(Error::NotFound(_))
        ));
        let mut left = std::fs::read_dir(dir.path()).unwrap();
        assert!(left.next().is_none());
    }

    #[tokio::test]
    async fn test_list_by_prefix_excludes_sidecars() {
        let (_dir, store) = store().await;
        for name in ["d1.pdf", "d1.page.1.png", "d1.page.2.png", "d2.pdf"] {
            store
                .put(name, bytes::Bytes::from_static(b"x"), BlobMeta::new())
                .await
                .unwrap();
        }

        let names = store.list_by_prefix("d1.").await.unwrap();
        assert_eq!(names, vec!["d1.page.1.png", "d1.page.2.png", "d1.pdf"]);
    }

    #[tokio::test]
    async fn test_traversal_names_are_rejected() {
        let (_dir, store) = store().await;
        for bad in ["../escape", "a/b", "", ".hidden", "x.meta"] {
            assert!(matches!(
                store
                    .put(bad, bytes::Bytes::from_static(b"x"), BlobMeta::new())
                    .await,
                Err(Error::InvalidName(_))
            ));
        }
    }
}
