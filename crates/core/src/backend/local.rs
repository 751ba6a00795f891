use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::warn;
use url::Url;

use super::{Backend, ListPage, ObjectMetadata, ObjectReader, ObjectWriter, PageRequest};
use crate::bucket::Bucket;
use crate::error::{Error, Result};
use crate::registry::Registry;

pub const SCHEME: &str = "file";

/// Uncommitted writes live here until they are renamed into place.
const STAGING_DIR: &str = ".uploads";
const CHUNK_SIZE: usize = 64 * 1024;

/// Bucket stored as plain files below a root directory.
///
/// Keys map to relative paths, `/` separating directories.
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            root: path.as_ref().to_path_buf(),
        }
    }

    /// Open a bucket rooted at `path`, creating the directory if needed.
    pub fn init(path: impl AsRef<Path>) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join(STAGING_DIR)).map_err(|e| {
            Error::Internal(format!("failed to create directory {}: {e}", root.display()))
        })?;
        Ok(Self { root })
    }

    fn full_path(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn staging_path(&self) -> PathBuf {
        self.root
            .join(STAGING_DIR)
            .join(format!("{}.part", uuid::Uuid::new_v4()))
    }

    /// Children of `dir`, ordered by the key each one contributes. A
    /// directory's key carries a trailing `/`, so a depth-first walk over
    /// these lists yields keys in lexicographic order.
    async fn sorted_entries(&self, dir: &Path, prefix: &str) -> Result<Vec<Entry>> {
        let mut entries = Vec::new();
        let mut read_dir = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                warn!(path = %entry.path().display(), "skipping non UTF-8 file name");
                continue;
            };
            if prefix.is_empty() && name == STAGING_DIR {
                continue;
            }
            let meta = entry.metadata().await?;
            if meta.is_dir() {
                entries.push(Entry::Dir {
                    key: format!("{prefix}{name}/"),
                    path: entry.path(),
                });
            } else if meta.is_file() {
                entries.push(Entry::File(ObjectMetadata {
                    key: format!("{prefix}{name}"),
                    size: meta.len(),
                    last_modified: meta
                        .modified()
                        .map(DateTime::<Utc>::from)
                        .unwrap_or_else(|_| Utc::now()),
                }));
            }
        }
        entries.sort_by(|a, b| a.key().cmp(b.key()));
        Ok(entries)
    }
}

enum Entry {
    Dir { key: String, path: PathBuf },
    File(ObjectMetadata),
}

impl Entry {
    fn key(&self) -> &str {
        match self {
            Entry::Dir { key, .. } => key,
            Entry::File(object) => &object.key,
        }
    }
}

/// Whether any key below directory `dir` can satisfy the prefix and the
/// exclusive lower bound.
fn subtree_may_match(dir: &str, prefix: &str, lower: Option<&str>) -> bool {
    if !dir.starts_with(prefix) && !prefix.starts_with(dir) {
        return false;
    }
    match lower {
        Some(lower) => dir > lower || lower.starts_with(dir),
        None => true,
    }
}

pub fn register(registry: &mut Registry) {
    registry.register(SCHEME, |url: Url| async move {
        let path = url
            .to_file_path()
            .map_err(|()| Error::InvalidArgument(format!("not a local directory url: {url}")))?;
        Ok(Bucket::new(LocalBackend::init(path)?))
    });
}

/// Keys must stay inside the root: relative, no `.`/`..`/empty segments,
/// and never inside the staging directory.
fn validate_key(key: &str) -> Result<()> {
    let invalid = |why: &str| Err(Error::InvalidArgument(format!("invalid key {key:?}: {why}")));
    if key.starts_with('/') || key.contains('\\') || key.contains('\0') {
        return invalid("must be a relative path");
    }
    if key.split('/').any(|segment| matches!(segment, "" | "." | "..")) {
        return invalid("empty or relative path segment");
    }
    if key.split('/').next() == Some(STAGING_DIR) {
        return invalid("reserved prefix");
    }
    Ok(())
}

#[async_trait]
impl Backend for LocalBackend {
    fn scheme(&self) -> &'static str {
        SCHEME
    }

    async fn open_reader(&self, key: &str) -> Result<Box<dyn ObjectReader>> {
        let full = self.full_path(key)?;
        let file = File::open(&full).await?;
        let meta = file.metadata().await?;
        if !meta.is_file() {
            return Err(Error::NotFound(key.to_string()));
        }
        Ok(Box::new(LocalReader {
            file: Some(file),
            length: meta.len(),
        }))
    }

    async fn open_writer(&self, key: &str) -> Result<Box<dyn ObjectWriter>> {
        let target = self.full_path(key)?;
        let staging = self.staging_path();
        if let Some(parent) = staging.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = File::create(&staging).await?;
        Ok(Box::new(LocalWriter {
            file: Some(file),
            staging,
            target,
        }))
    }

    /// Walks only as far as one page needs: subtrees wholly before the
    /// bound or outside the prefix are skipped, and the walk stops at the
    /// first key past the page.
    async fn list_page(&self, request: &PageRequest) -> Result<ListPage> {
        if !tokio::fs::try_exists(&self.root).await.unwrap_or(false) {
            return Ok(ListPage::default());
        }
        let lower = match (request.page_token.as_deref(), request.start_after.as_deref()) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        let prefix = request.prefix.as_deref().unwrap_or("");
        let page_size = request.page_size.max(1);

        let mut objects = Vec::new();
        let mut more = false;
        let mut stack = vec![self.sorted_entries(&self.root, "").await?.into_iter()];
        while let Some(level) = stack.last_mut() {
            let Some(entry) = level.next() else {
                stack.pop();
                continue;
            };
            match entry {
                Entry::Dir { key, path } => {
                    if subtree_may_match(&key, prefix, lower) {
                        stack.push(self.sorted_entries(&path, &key).await?.into_iter());
                    }
                }
                Entry::File(object) => {
                    if !object.key.starts_with(prefix)
                        || lower.is_some_and(|l| object.key.as_str() <= l)
                    {
                        continue;
                    }
                    if objects.len() == page_size {
                        more = true;
                        break;
                    }
                    objects.push(object);
                }
            }
        }

        let next_page_token = if more {
            objects.last().map(|o| o.key.clone())
        } else {
            None
        };
        Ok(ListPage {
            objects,
            next_page_token,
        })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let full = self.full_path(key)?;
        tokio::fs::remove_file(&full).await?;
        Ok(())
    }
}

struct LocalReader {
    file: Option<File>,
    length: u64,
}

#[async_trait]
impl ObjectReader for LocalReader {
    async fn read_chunk(&mut self) -> Result<Option<Bytes>> {
        let Some(file) = self.file.as_mut() else {
            return Ok(None);
        };
        let mut buf = BytesMut::with_capacity(CHUNK_SIZE);
        if file.read_buf(&mut buf).await? == 0 {
            self.file = None;
            return Ok(None);
        }
        Ok(Some(buf.freeze()))
    }

    fn content_length(&self) -> Option<u64> {
        Some(self.length)
    }

    async fn close(&mut self) -> Result<()> {
        self.file = None;
        Ok(())
    }
}

struct LocalWriter {
    file: Option<File>,
    staging: PathBuf,
    target: PathBuf,
}

#[async_trait]
impl ObjectWriter for LocalWriter {
    async fn write(&mut self, data: Bytes) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| Error::Internal("staging file already released".into()))?;
        file.write_all(&data).await?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let mut file = self
            .file
            .take()
            .ok_or_else(|| Error::Internal("staging file already released".into()))?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        if let Some(parent) = self.target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(&self.staging, &self.target).await?;
        Ok(())
    }

    fn abort(&mut self) {
        self.file = None;
        if let Err(e) = std::fs::remove_file(&self.staging)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %self.staging.display(), error = %e, "failed to remove staging file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lister::ListOptions;
    use crate::registry::open_bucket;

    #[tokio::test]
    async fn local_bucket_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = Bucket::new(LocalBackend::init(dir.path()).unwrap());

        bucket.write_all("test/hello.txt", &b"world"[..]).await.unwrap();
        assert!(dir.path().join("test/hello.txt").is_file());

        let data = bucket.read_all("test/hello.txt").await.unwrap();
        assert_eq!(&data[..], b"world");

        let list = bucket.list(ListOptions::new()).collect_all().await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].key, "test/hello.txt");
        assert_eq!(list[0].size, 5);

        bucket.delete("test/hello.txt").await.unwrap();
        assert!(!bucket.exists("test/hello.txt").await.unwrap());
    }

    #[tokio::test]
    async fn listing_is_sorted_and_hides_staging_files() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = Bucket::new(LocalBackend::init(dir.path()).unwrap());
        for key in ["b.png", "a/z.png", "a.png", "c/d/e.png"] {
            bucket.write_all(key, &b"x"[..]).await.unwrap();
        }
        let mut pending = bucket.open_writer("pending.png").await.unwrap();
        pending.write(b"not yet").await.unwrap();

        let keys: Vec<_> = bucket
            .list(ListOptions::new().page_size(2))
            .collect_all()
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect();
        assert_eq!(keys, ["a.png", "a/z.png", "b.png", "c/d/e.png"]);

        pending.close().await.unwrap();
        assert!(bucket.exists("pending.png").await.unwrap());
    }

    #[tokio::test]
    async fn pages_resume_inside_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::init(dir.path()).unwrap();
        let bucket = Bucket::new(LocalBackend::new(dir.path()));
        for key in ["a.png", "a/b/c.png", "a/b/d.png", "a/e.png", "a0.png", "z/y.png"] {
            bucket.write_all(key, &b"x"[..]).await.unwrap();
        }

        let mut request = PageRequest {
            page_size: 2,
            ..Default::default()
        };
        let mut pages = Vec::new();
        loop {
            let page = backend.list_page(&request).await.unwrap();
            pages.push(page.objects.iter().map(|o| o.key.clone()).collect::<Vec<_>>());
            match page.next_page_token {
                Some(token) => request.page_token = Some(token),
                None => break,
            }
        }
        assert_eq!(
            pages,
            [
                vec!["a.png", "a/b/c.png"],
                vec!["a/b/d.png", "a/e.png"],
                vec!["a0.png", "z/y.png"],
            ]
        );

        let page = backend
            .list_page(&PageRequest {
                prefix: Some("a/b".into()),
                start_after: Some("a/b/c.png".into()),
                page_size: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        let keys: Vec<_> = page.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, ["a/b/d.png"]);
        assert!(page.next_page_token.is_none());
    }

    #[test]
    fn subtrees_outside_the_bounds_are_pruned() {
        assert!(subtree_may_match("a/", "", None));
        assert!(!subtree_may_match("a/", "b", None));
        assert!(subtree_may_match("c/", "c/d", None));
        assert!(subtree_may_match("a/", "", Some("a.png")));
        assert!(subtree_may_match("a/", "", Some("a/z.png")));
        assert!(!subtree_may_match("a/", "", Some("b.png")));
    }

    #[tokio::test]
    async fn dropped_writer_removes_staging_file() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = Bucket::new(LocalBackend::init(dir.path()).unwrap());
        {
            let mut writer = bucket.open_writer("big.png").await.unwrap();
            writer.write(b"half").await.unwrap();
        }
        let staged = std::fs::read_dir(dir.path().join(STAGING_DIR)).unwrap().count();
        assert_eq!(staged, 0);
        assert!(!dir.path().join("big.png").exists());
    }

    #[tokio::test]
    async fn keys_escaping_the_root_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = Bucket::new(LocalBackend::init(dir.path()).unwrap());
        for key in ["../etc/passwd", "/abs.png", "a//b.png", "./a.png", ".uploads/x.part"] {
            let err = bucket.open_writer(key).await.err().unwrap();
            assert!(matches!(err, Error::InvalidArgument(_)), "{key}");
        }
        assert!(matches!(
            bucket.open_reader("../secret").await.err().unwrap(),
            Error::InvalidArgument(_)
        ));
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = Bucket::new(LocalBackend::init(dir.path()).unwrap());
        assert!(bucket.open_reader("nope.png").await.err().unwrap().is_not_found());
    }

    #[tokio::test]
    async fn opens_from_file_url() {
        let dir = tempfile::tempdir().unwrap();
        let url = Url::from_directory_path(dir.path()).unwrap();
        let bucket = open_bucket(url.as_str()).await.unwrap();
        assert_eq!(bucket.scheme(), "file");
        bucket.write_all("x.png", &b"x"[..]).await.unwrap();
        assert!(dir.path().join("x.png").is_file());
    }

    #[test]
    fn missing_root_lists_nothing() {
        let backend = LocalBackend::new("/definitely/not/here");
        let page = tokio::runtime::Runtime::new()
            .unwrap()
            .block_on(backend.list_page(&PageRequest::default()))
            .unwrap();
        assert!(page.objects.is_empty());
    }
}
