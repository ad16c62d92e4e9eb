//! Scratch-directory management for pipeline artifacts.
//!
//! A [`ScratchDir`] is one flat directory shared by every pipeline
//! invocation. Files are named `<prefix>_<uuid><ext>`; the prefix only helps
//! debugging and the UUID keeps concurrent invocations from colliding without
//! any locking.
//!
//! An [`ArtifactScope`] tracks the artifacts created by one invocation and
//! deletes all of them when dropped, except those explicitly handed over with
//! [`ArtifactScope::keep`].

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Extension used when an upload has no usable filename.
pub const DEFAULT_EXTENSION: &str = ".mp4";

/// Reference to a file in the scratch directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetHandle {
    name: String,
    path: PathBuf,
    content_type: &'static str,
}

impl AssetHandle {
    /// File name inside the scratch directory (no directory components).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Absolute or root-relative location of the bytes.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// MIME type hint derived from the file extension.
    pub fn content_type(&self) -> &'static str {
        self.content_type
    }

    /// Current size of the file on disk.
    pub fn byte_len(&self) -> std::io::Result<u64> {
        std::fs::metadata(&self.path).map(|m| m.len())
    }

    /// Whether the file currently exists.
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }
}

/// Extension (with leading dot) of an uploaded filename, defaulting to
/// [`DEFAULT_EXTENSION`] when the name is missing or has no extension.
pub fn extension_of(filename: Option<&str>) -> String {
    let Some(name) = filename else {
        return DEFAULT_EXTENSION.to_string();
    };
    // Only the final path component counts; browsers occasionally send more.
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    match base.rfind('.') {
        Some(dot) if dot > 0 && dot + 1 < base.len() => base[dot..].to_ascii_lowercase(),
        _ => DEFAULT_EXTENSION.to_string(),
    }
}

/// MIME type hint for an extension (with leading dot).
pub fn content_type_for(ext: &str) -> &'static str {
    match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "avi" => "video/x-msvideo",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

/// Outcome of one [`ScratchDir::sweep_expired`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Files older than the retention window that were deleted.
    pub removed: usize,
    /// Files that were expired but could not be deleted.
    pub failed: usize,
}

/// The shared flat scratch directory.
#[derive(Debug, Clone)]
pub struct ScratchDir {
    root: PathBuf,
}

impl ScratchDir {
    /// Open (creating if needed) the scratch directory at `root`.
    pub fn new(root: impl Into<PathBuf>) -> cf_core::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        // Absolute paths keep engine arguments independent of the working
        // directory and make redaction of diagnostics reliable.
        let root = std::fs::canonicalize(&root)?;
        Ok(Self { root })
    }

    /// Directory holding every artifact.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn handle_for(&self, name: String) -> AssetHandle {
        let ext = Path::new(&name)
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        AssetHandle {
            path: self.root.join(&name),
            content_type: content_type_for(&ext),
            name,
        }
    }

    /// Reserve a fresh name for an output that has not been written yet.
    pub fn allocate(&self, prefix: &str, ext: &str) -> AssetHandle {
        self.handle_for(format!("{prefix}_{}{ext}", Uuid::new_v4()))
    }

    /// Write `bytes` to a freshly named file and return its handle.
    ///
    /// The file is created with `create_new`, so an existing file is never
    /// overwritten. On a failed write the partial file is removed.
    pub async fn materialize(
        &self,
        bytes: &[u8],
        prefix: &str,
        ext: &str,
    ) -> cf_core::Result<AssetHandle> {
        let handle = self.allocate(prefix, ext);

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(handle.path())
            .await?;

        let written = async {
            file.write_all(bytes).await?;
            file.flush().await
        }
        .await;

        if let Err(e) = written {
            drop(file);
            self.release(&handle);
            return Err(e.into());
        }

        tracing::debug!("Materialized {} ({} bytes)", handle.name(), bytes.len());
        Ok(handle)
    }

    /// Look up an existing artifact by file name.
    ///
    /// Names containing path separators or `..` are rejected so callers can
    /// never address anything outside the scratch directory.
    pub fn resolve(&self, name: &str) -> cf_core::Result<AssetHandle> {
        if name.is_empty()
            || name.contains('/')
            || name.contains('\\')
            || name.contains("..")
            || name.contains('\0')
        {
            return Err(cf_core::Error::validation("invalid artifact name"));
        }

        let handle = self.handle_for(name.to_string());
        if !handle.exists() {
            return Err(cf_core::Error::not_found("artifact", name));
        }
        Ok(handle)
    }

    /// Delete an artifact. Deleting an absent artifact is not an error.
    ///
    /// Returns `false` only when the file exists but could not be removed;
    /// that case is logged and never propagated.
    pub fn release(&self, handle: &AssetHandle) -> bool {
        match std::fs::remove_file(handle.path()) {
            Ok(()) => {
                tracing::debug!("Released {}", handle.name());
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("Release of {}: already absent", handle.name());
                true
            }
            Err(e) => {
                tracing::warn!("Failed to delete artifact {}: {e}", handle.name());
                false
            }
        }
    }

    /// Best-effort bulk release. Every handle is attempted; the number of
    /// failed deletions is returned.
    pub fn release_all<'a>(&self, handles: impl IntoIterator<Item = &'a AssetHandle>) -> usize {
        handles
            .into_iter()
            .filter(|handle| !self.release(handle))
            .count()
    }

    /// Delete regular files in the scratch directory last modified more than
    /// `retention` ago.
    ///
    /// This is a safety net for leaked artifacts; normal cleanup happens
    /// through [`ArtifactScope`].
    pub fn sweep_expired(&self, retention: Duration) -> SweepReport {
        let mut report = SweepReport::default();
        let now = SystemTime::now();

        for entry in walkdir::WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let modified = match entry.metadata().ok().and_then(|m| m.modified().ok()) {
                Some(t) => t,
                None => continue,
            };
            let age = now.duration_since(modified).unwrap_or_default();
            if age < retention {
                continue;
            }

            match std::fs::remove_file(entry.path()) {
                Ok(()) => {
                    tracing::info!("Deleted expired scratch file {}", entry.file_name().to_string_lossy());
                    report.removed += 1;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(
                        "Failed to delete expired scratch file {}: {e}",
                        entry.file_name().to_string_lossy()
                    );
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Start tracking artifacts for one pipeline invocation.
    pub fn scope(&self) -> ArtifactScope {
        ArtifactScope {
            scratch: self.clone(),
            owned: Vec::new(),
        }
    }
}

/// Artifacts owned by one pipeline invocation.
///
/// Every artifact created through the scope is released when the scope is
/// dropped, on every exit path. [`keep`](ArtifactScope::keep) transfers an
/// artifact out of the scope so it survives.
#[derive(Debug)]
pub struct ArtifactScope {
    scratch: ScratchDir,
    owned: Vec<AssetHandle>,
}

impl ArtifactScope {
    /// Write caller-supplied bytes and track the resulting artifact.
    pub async fn materialize(
        &mut self,
        bytes: &[u8],
        prefix: &str,
        ext: &str,
    ) -> cf_core::Result<AssetHandle> {
        let handle = self.scratch.materialize(bytes, prefix, ext).await?;
        self.owned.push(handle.clone());
        Ok(handle)
    }

    /// Reserve and track a name for an output a stage will write.
    pub fn allocate(&mut self, prefix: &str, ext: &str) -> AssetHandle {
        let handle = self.scratch.allocate(prefix, ext);
        self.owned.push(handle.clone());
        handle
    }

    /// Stop tracking `handle`; it will not be released with the scope.
    pub fn keep(&mut self, handle: &AssetHandle) {
        self.owned.retain(|h| h != handle);
    }

    /// Artifacts currently owned by the scope, in creation order.
    pub fn owned(&self) -> &[AssetHandle] {
        &self.owned
    }
}

impl Drop for ArtifactScope {
    fn drop(&mut self) {
        if self.owned.is_empty() {
            return;
        }
        let failed = self.scratch.release_all(&self.owned);
        if failed > 0 {
            tracing::warn!("{failed} of {} scoped artifacts could not be deleted", self.owned.len());
        }
    }
}
