use std::fmt::Display;
use std::path::{Path, PathBuf};

use futures::{Stream, StreamExt};
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use super::mime::{sniff, SNIFF_LEN};
use crate::error::IngestError;

/// An upload that made it to disk under its generated name.
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub stored_name: String,
    pub path: PathBuf,
    pub size: u64,
    /// Detected from the content, never from the client's name or headers.
    pub content_type: String,
}

/// Flat directory of uploads, named independently of client input.
#[derive(Debug, Clone)]
pub struct UploadStore {
    dir: PathBuf,
    max_bytes: u64,
}

impl UploadStore {
    pub async fn open(dir: impl Into<PathBuf>, max_bytes: u64) -> std::io::Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir, max_bytes })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Streams `body` to a temporary file in the store, sniffs its leading
    /// bytes, then renames it to a fresh `uuid.ext` name where `ext` follows
    /// the detected type. On any error the temporary file is removed, so
    /// nothing is left behind at a stable name.
    pub async fn save<S, B, E>(&self, original_name: &str, mut body: S) -> Result<StoredFile, IngestError>
    where
        S: Stream<Item = Result<B, E>> + Unpin,
        B: AsRef<[u8]>,
        E: Display,
    {
        let temp = tempfile::Builder::new()
            .prefix(".upload-")
            .suffix(".partial")
            .tempfile_in(&self.dir)?;
        let mut file = tokio::fs::File::from_std(temp.as_file().try_clone()?);

        let mut size = 0u64;
        let mut head = Vec::with_capacity(SNIFF_LEN);
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| IngestError::Stream(e.to_string()))?;
            let bytes = chunk.as_ref();

            size += bytes.len() as u64;
            if size > self.max_bytes {
                return Err(IngestError::TooLarge {
                    limit: self.max_bytes,
                });
            }
            if head.len() < SNIFF_LEN {
                let take = (SNIFF_LEN - head.len()).min(bytes.len());
                head.extend_from_slice(&bytes[..take]);
            }
            file.write_all(bytes).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        let sniffed = sniff(&head);
        let stored_name = storage_name(sniffed.extension);
        let path = self.dir.join(&stored_name);
        temp.persist_noclobber(&path)?;
        debug!("Stored upload '{}' as {} ({} bytes)", original_name, stored_name, size);

        Ok(StoredFile {
            stored_name,
            path,
            size,
            content_type: sniffed.mime,
        })
    }
}

/// `uuid-v4` plus an extension chosen from the detected type.
pub fn storage_name(extension: &str) -> String {
    format!("{}.{}", Uuid::new_v4().simple(), extension)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn chunks(parts: &[&'static [u8]]) -> impl Stream<Item = Result<&'static [u8], std::io::Error>> + Unpin {
        stream::iter(parts.iter().copied().map(Ok).collect::<Vec<_>>())
    }

    fn entries(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn names_are_unique() {
        assert_ne!(storage_name("txt"), storage_name("txt"));
        assert!(storage_name("pdf").ends_with(".pdf"));
    }

    #[tokio::test]
    async fn client_extension_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::open(dir.path(), 1024).await.unwrap();

        let stored = store
            .save(
                "x.html",
                chunks(&[b"<html><body><script>alert(1)</script></body></html>".as_slice()]),
            )
            .await
            .unwrap();
        assert_eq!(stored.content_type, "text/html");
        assert!(stored.stored_name.ends_with(".txt"), "{}", stored.stored_name);

        let stored = store.save("../../etc/passwd", chunks(&[b"\x00\x01".as_slice()])).await.unwrap();
        assert!(stored.stored_name.ends_with(".bin"));
        assert_eq!(stored.path.parent().unwrap(), store.dir());
    }

    #[tokio::test]
    async fn saves_stream_under_generated_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::open(dir.path().join("uploads"), 1024).await.unwrap();

        let stored = store
            .save("../notes.txt", chunks(&[b"hello ".as_slice(), b"world".as_slice()]))
            .await
            .unwrap();

        assert_eq!(stored.size, 11);
        assert_eq!(stored.content_type, "text/plain");
        assert!(stored.stored_name.ends_with(".txt"));
        assert_eq!(stored.path.parent().unwrap(), store.dir());
        assert_eq!(std::fs::read(&stored.path).unwrap(), b"hello world");
        assert_eq!(entries(store.dir()), vec![stored.stored_name]);
    }

    #[tokio::test]
    async fn oversized_upload_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::open(dir.path(), 4).await.unwrap();

        let err = store.save("big.bin", chunks(&[b"abc".as_slice(), b"def".as_slice()])).await.unwrap_err();
        assert!(matches!(err, IngestError::TooLarge { limit: 4 }));
        assert!(entries(store.dir()).is_empty());
    }

    #[tokio::test]
    async fn broken_stream_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::open(dir.path(), 1024).await.unwrap();
        let body = stream::iter(vec![
            Ok::<&[u8], String>(b"partial"),
            Err("connection reset".to_string()),
        ]);

        let err = store.save("x.txt", body).await.unwrap_err();
        assert!(err.to_string().contains("connection reset"));
        assert!(entries(store.dir()).is_empty());
    }
}
