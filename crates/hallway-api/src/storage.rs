use std::fmt;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Result;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

use hallway_types::models::ContactPair;

/// 5 MB per object
pub const MAX_OBJECT_SIZE: usize = 5 * 1024 * 1024;

const MAX_SEGMENTS: usize = 8;
const MAX_SEGMENT_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    Avatars,
    ChatImages,
}

impl Bucket {
    pub const ALL: [Bucket; 2] = [Bucket::Avatars, Bucket::ChatImages];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Avatars => "avatars",
            Self::ChatImages => "chat-images",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Bucket {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "avatars" => Ok(Self::Avatars),
            "chat-images" => Ok(Self::ChatImages),
            _ => Err(()),
        }
    }
}

/// A validated object path inside a bucket: 2..=8 `/`-separated segments
/// of `[A-Za-z0-9._-]`, none of them `.` or `..`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectKey {
    segments: Vec<String>,
}

impl ObjectKey {
    pub fn parse(raw: &str) -> Option<Self> {
        let segments: Vec<String> = raw.split('/').map(str::to_string).collect();
        if segments.len() < 2 || segments.len() > MAX_SEGMENTS {
            return None;
        }

        let valid = segments.iter().all(|s| {
            !s.is_empty()
                && s.len() <= MAX_SEGMENT_LEN
                && s != "."
                && s != ".."
                && s.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        });

        valid.then_some(Self { segments })
    }

    /// Top-level folder: the owner's user id for avatars, the conversation
    /// key for chat images.
    pub fn owner_segment(&self) -> &str {
        &self.segments[0]
    }

    pub fn extension(&self) -> Option<String> {
        let last = self.segments.last()?;
        let (_, ext) = last.rsplit_once('.')?;
        Some(ext.to_ascii_lowercase())
    }

    pub fn content_type(&self) -> Option<&'static str> {
        match self.extension()?.as_str() {
            "png" => Some("image/png"),
            "jpg" | "jpeg" => Some("image/jpeg"),
            "gif" => Some("image/gif"),
            "webp" => Some("image/webp"),
            _ => None,
        }
    }

    pub fn as_path(&self) -> String {
        self.segments.join("/")
    }
}

/// Whether `user_id` may create or delete `key` in `bucket`. Reads are
/// public and never go through this check.
pub fn can_write(bucket: Bucket, key: &ObjectKey, user_id: Uuid) -> bool {
    match bucket {
        Bucket::Avatars => key.owner_segment() == user_id.to_string(),
        Bucket::ChatImages => ContactPair::parse_key(key.owner_segment())
            .is_some_and(|pair| pair.contains(user_id)),
    }
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub size: u64,
    pub etag: String,
}

/// Result of a write that reached the filesystem.
#[derive(Debug, Clone)]
pub enum PutResult {
    Stored(StoredObject),
    /// The key names an existing folder, or one of its folders is an object.
    PathConflict,
}

/// Staging directory for uploads in flight. Not a bucket, so never served.
const INCOMING_DIR: &str = ".incoming";

/// Object storage on the local filesystem. Each bucket is a directory under
/// `dir`; object keys map to nested paths within it.
pub struct ObjectStore {
    dir: PathBuf,
}

impl ObjectStore {
    pub async fn new(dir: PathBuf) -> Result<Self> {
        for bucket in Bucket::ALL {
            fs::create_dir_all(dir.join(bucket.as_str())).await?;
        }

        let incoming = dir.join(INCOMING_DIR);
        fs::create_dir_all(&incoming).await?;
        let mut stale = fs::read_dir(&incoming).await?;
        while let Some(entry) = stale.next_entry().await? {
            if let Err(e) = fs::remove_file(entry.path()).await {
                warn!("Failed to remove stale upload {}: {}", entry.path().display(), e);
            }
        }

        info!("Object storage directory: {}", dir.display());
        Ok(Self { dir })
    }

    pub fn object_path(&self, bucket: Bucket, key: &ObjectKey) -> PathBuf {
        let mut path = self.dir.join(bucket.as_str());
        for segment in &key.segments {
            path.push(segment);
        }
        path
    }

    /// Whether writing `key` would need a folder where an object exists, or
    /// an object where a folder exists.
    async fn path_conflict(&self, bucket: Bucket, key: &ObjectKey) -> Result<bool> {
        let mut path = self.dir.join(bucket.as_str());
        let last = key.segments.len() - 1;

        for (i, segment) in key.segments.iter().enumerate() {
            path.push(segment);
            match fs::metadata(&path).await {
                Ok(meta) => {
                    if meta.is_dir() != (i < last) {
                        return Ok(true);
                    }
                }
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
                Err(e) => return Err(e.into()),
            }
        }

        Ok(false)
    }

    /// Write an object, replacing any previous version. The data is staged
    /// outside the buckets and renamed into place, so readers never observe
    /// a partial object.
    pub async fn put_object(&self, bucket: Bucket, key: &ObjectKey, data: &[u8]) -> Result<PutResult> {
        if self.path_conflict(bucket, key).await? {
            return Ok(PutResult::PathConflict);
        }

        let path = self.object_path(bucket, key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let tmp = self.dir.join(INCOMING_DIR).join(format!("{}.upload", Uuid::new_v4()));
        let written = async {
            let mut file = fs::File::create(&tmp).await?;
            file.write_all(data).await?;
            file.flush().await?;
            drop(file);
            fs::rename(&tmp, &path).await
        }
        .await;

        if let Err(e) = written {
            match fs::remove_file(&tmp).await {
                Err(cleanup) if cleanup.kind() != ErrorKind::NotFound => {
                    warn!("Failed to remove staged upload {}: {}", tmp.display(), cleanup);
                }
                _ => {}
            }
            return Err(e.into());
        }

        let mut hasher = Sha256::new();
        hasher.update(data);

        Ok(PutResult::Stored(StoredObject {
            size: data.len() as u64,
            etag: hex::encode(hasher.finalize()),
        }))
    }

    /// Open an object for streaming. Returns the file and its size, or
    /// `None` if no object lives at `key` (folders included).
    pub async fn open_object(&self, bucket: Bucket, key: &ObjectKey) -> Result<Option<(fs::File, u64)>> {
        let path = self.object_path(bucket, key);
        match fs::File::open(&path).await {
            Ok(file) => {
                let meta = file.metadata().await?;
                if !meta.is_file() {
                    return Ok(None);
                }
                Ok(Some((file, meta.len())))
            }
            Err(e) if is_missing(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete an object. Returns `false` if there was no object at `key`.
    pub async fn delete_object(&self, bucket: Bucket, key: &ObjectKey) -> Result<bool> {
        let path = self.object_path(bucket, key);
        let is_object = match fs::metadata(&path).await {
            Ok(meta) => meta.is_file(),
            Err(e) if is_missing(&e) => false,
            Err(e) => return Err(e.into()),
        };
        if !is_object {
            warn!("No object at {}/{}", bucket, key.as_path());
            return Ok(false);
        }

        match fs::remove_file(&path).await {
            Ok(()) => {
                info!("Deleted {}/{}", bucket, key.as_path());
                Ok(true)
            }
            Err(e) if is_missing(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn is_missing(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory)
}
