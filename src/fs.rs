//! File handle pooling.
//!
//! [`FileHandlePool`] keys small sub-pools by `(path, mode)` and layers
//! two fail-fast validation stages in front of resource creation: a
//! security boundary (the resolved path must stay under `base_path`) and
//! a policy stage (extension allow-list, `max_file_size`). Violations
//! are rejected before any pool slot is consumed.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tracing::debug;

use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::factory::ResourceFactory;
use crate::guard::PoolGuard;
use crate::pool::Pool;
use crate::stats::PoolStats;

// ---------------------------------------------------------------------------
// Config and modes
// ---------------------------------------------------------------------------

/// How a pooled file handle is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenMode {
    /// Read-only.
    Read,
    /// Write, truncating existing content. Write handles are single-use:
    /// they are recreated instead of reused.
    Write,
    /// Append, creating the file if missing.
    Append,
}

impl OpenMode {
    fn reusable(self) -> bool {
        !matches!(self, Self::Write)
    }
}

/// Configuration for a [`FileHandlePool`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilePoolConfig {
    /// All pooled paths must resolve under this directory.
    pub base_path: PathBuf,
    /// Allowed file extensions, without the dot, case-insensitive.
    /// Empty means any extension.
    pub allowed_extensions: Vec<String>,
    /// Maximum file size in bytes, enforced where the size is knowable.
    pub max_file_size: u64,
    /// Create missing parent directories transparently.
    pub create_directories: bool,
    /// Handles kept per distinct `(path, mode)` pair.
    pub handles_per_file: usize,
    /// Timing/queueing knobs inherited by every sub-pool.
    pub pool: PoolConfig,
}

impl Default for FilePoolConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("."),
            allowed_extensions: Vec::new(),
            max_file_size: 64 * 1024 * 1024,
            create_directories: false,
            handles_per_file: 4,
            pool: PoolConfig::named("files"),
        }
    }
}

// ---------------------------------------------------------------------------
// Path security
// ---------------------------------------------------------------------------

/// Lexically normalize a path: resolve `.` and `..` without touching the
/// filesystem, so traversal is rejected even for paths that do not exist
/// yet.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // Popping past the start means the path escapes upward.
                if !out.pop() {
                    return None;
                }
            }
            other => out.push(other),
        }
    }
    Some(out)
}

/// Resolve `requested` against `base`, rejecting escapes.
fn resolve_under(base: &Path, requested: &Path) -> Result<PathBuf> {
    let joined = if requested.is_absolute() {
        requested.to_path_buf()
    } else {
        base.join(requested)
    };
    let resolved = normalize(&joined).ok_or_else(|| {
        Error::security(requested.display().to_string(), "path escapes base path")
    })?;
    // An empty base would make the prefix check pass for everything.
    if base.as_os_str().is_empty() || !resolved.starts_with(base) {
        return Err(Error::security(
            requested.display().to_string(),
            "path escapes base path",
        ));
    }
    Ok(resolved)
}

// ---------------------------------------------------------------------------
// FileHandle
// ---------------------------------------------------------------------------

/// A pooled open file.
#[derive(Debug)]
pub struct FileHandle {
    path: PathBuf,
    mode: OpenMode,
    file: File,
    locked: bool,
    operations: u64,
}

impl FileHandle {
    /// The resolved path this handle is open on.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The open mode.
    #[must_use]
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// The underlying file.
    #[must_use]
    pub fn file(&self) -> &File {
        &self.file
    }

    /// The underlying file, mutably. Counts as one operation.
    pub fn file_mut(&mut self) -> &mut File {
        self.operations += 1;
        &mut self.file
    }

    /// Take an advisory lock on the handle for the current use.
    pub fn lock(&mut self) {
        self.locked = true;
    }

    /// Release the advisory lock.
    pub fn unlock(&mut self) {
        self.locked = false;
    }

    /// Whether the current user locked the handle.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Operations performed through this handle across all uses.
    #[must_use]
    pub fn operations(&self) -> u64 {
        self.operations
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// [`ResourceFactory`] for handles on one `(path, mode)` pair.
pub struct FileHandleFactory {
    path: PathBuf,
    mode: OpenMode,
    max_file_size: u64,
    create_directories: bool,
    name: String,
}

impl FileHandleFactory {
    fn new(path: PathBuf, mode: OpenMode, config: &FilePoolConfig) -> Self {
        let name = path.display().to_string();
        Self {
            path,
            mode,
            max_file_size: config.max_file_size,
            create_directories: config.create_directories,
            name,
        }
    }
}

#[async_trait]
impl ResourceFactory for FileHandleFactory {
    type Resource = FileHandle;

    fn name(&self) -> &str {
        &self.name
    }

    async fn create(&self) -> Result<FileHandle> {
        if self.create_directories
            && let Some(parent) = self.path.parent()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = match self.mode {
            OpenMode::Read => OpenOptions::new().read(true).open(&self.path).await?,
            OpenMode::Write => {
                OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&self.path)
                    .await?
            }
            OpenMode::Append => {
                OpenOptions::new()
                    .append(true)
                    .create(true)
                    .open(&self.path)
                    .await?
            }
        };
        debug!(path = %self.path.display(), mode = ?self.mode, "opened file handle");
        Ok(FileHandle {
            path: self.path.clone(),
            mode: self.mode,
            file,
            locked: false,
            operations: 0,
        })
    }

    async fn destroy(&self, mut resource: FileHandle) {
        // Flush writable handles so buffered bytes are not lost, then
        // drop to close the descriptor.
        if self.mode != OpenMode::Read {
            use tokio::io::AsyncWriteExt;
            let _ = resource.file.flush().await;
        }
    }

    async fn validate(&self, resource: &FileHandle) -> bool {
        match resource.file.metadata().await {
            Ok(metadata) => self.mode == OpenMode::Write || metadata.len() <= self.max_file_size,
            Err(_) => false,
        }
    }

    async fn reset(&self, resource: &mut FileHandle) -> Result<()> {
        if !self.mode.reusable() {
            // Forces recreation: write handles carry truncate-on-open
            // semantics that a reused handle would silently skip.
            return Err(Error::policy(
                self.path.display().to_string(),
                "write handles are single-use",
            ));
        }
        resource.locked = false;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FileHandlePool
// ---------------------------------------------------------------------------

type HandleKey = (PathBuf, OpenMode);

/// Pool of open file handles under a base directory.
pub struct FileHandlePool {
    config: FilePoolConfig,
    base: PathBuf,
    pools: DashMap<HandleKey, Pool<FileHandleFactory>>,
}

impl FileHandlePool {
    /// Create a file handle pool rooted at `config.base_path`.
    ///
    /// # Errors
    /// Returns a configuration error when the embedded [`PoolConfig`]
    /// is invalid or the base path cannot be normalized.
    pub fn new(config: FilePoolConfig) -> Result<Self> {
        config.pool.validate()?;
        if config.handles_per_file == 0 {
            return Err(Error::configuration("handles_per_file must be at least 1"));
        }
        // Anchor relative bases (including the default ".") to the
        // working directory; a relative base would normalize to a
        // prefix that absolute paths trivially match.
        let anchored = if config.base_path.is_absolute() {
            config.base_path.clone()
        } else {
            std::env::current_dir()?.join(&config.base_path)
        };
        let base = normalize(&anchored).ok_or_else(|| {
            Error::configuration(format!(
                "base_path '{}' cannot be normalized",
                config.base_path.display()
            ))
        })?;
        Ok(Self {
            config,
            base,
            pools: DashMap::new(),
        })
    }

    /// Acquire a handle on `path` in `mode`.
    ///
    /// Security and policy checks run before any resource is created:
    /// a rejected request leaves the pool untouched.
    ///
    /// # Errors
    /// - [`Error::SecurityViolation`] when the resolved path leaves
    ///   `base_path`.
    /// - [`Error::PolicyViolation`] for disallowed extensions or files
    ///   over `max_file_size`.
    /// - Everything [`Pool::acquire`] can return.
    pub async fn acquire_file_handle(
        &self,
        path: impl AsRef<Path>,
        mode: OpenMode,
    ) -> Result<PoolGuard<FileHandleFactory>> {
        let requested = path.as_ref();
        let resolved = resolve_under(&self.base, requested)?;
        self.check_policy(requested, &resolved, mode).await?;

        let key = (resolved.clone(), mode);
        let pool = match self.pools.get(&key) {
            Some(existing) => existing.value().clone(),
            None => {
                let sub_config = PoolConfig {
                    name: format!("{}:{}", self.config.pool.name, resolved.display()),
                    min_size: 0,
                    max_size: self.config.handles_per_file,
                    ..self.config.pool.clone()
                };
                let factory = FileHandleFactory::new(resolved, mode, &self.config);
                let pool = Pool::new(sub_config, factory)?;
                // A concurrent caller may have inserted first; keep theirs.
                self.pools.entry(key).or_insert(pool).value().clone()
            }
        };
        pool.acquire().await
    }

    /// Aggregated statistics across all sub-pools.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let mut merged = PoolStats::default();
        for entry in &self.pools {
            let stats = entry.value().stats();
            merged.total_resources += stats.total_resources;
            merged.available_resources += stats.available_resources;
            merged.in_use_resources += stats.in_use_resources;
            merged.queued_waiters += stats.queued_waiters;
            merged.created_resources += stats.created_resources;
            merged.destroyed_resources += stats.destroyed_resources;
        }
        merged
    }

    /// Drain every sub-pool; see [`Pool::drain`].
    ///
    /// # Errors
    /// Returns the first drain error encountered.
    pub async fn drain(&self, timeout: Option<Duration>) -> Result<()> {
        let pools: Vec<_> = self.pools.iter().map(|e| e.value().clone()).collect();
        for pool in pools {
            pool.drain(timeout).await?;
        }
        Ok(())
    }

    /// Forcefully tear down every sub-pool; see [`Pool::cleanup`].
    pub async fn cleanup(&self) {
        let pools: Vec<_> = self.pools.iter().map(|e| e.value().clone()).collect();
        for pool in pools {
            pool.cleanup().await;
        }
        self.pools.clear();
    }

    async fn check_policy(&self, requested: &Path, resolved: &Path, mode: OpenMode) -> Result<()> {
        if !self.config.allowed_extensions.is_empty() {
            let extension = resolved
                .extension()
                .and_then(|ext| ext.to_str())
                .map(str::to_ascii_lowercase);
            let allowed = extension.as_deref().is_some_and(|ext| {
                self.config
                    .allowed_extensions
                    .iter()
                    .any(|allow| allow.eq_ignore_ascii_case(ext))
            });
            if !allowed {
                return Err(Error::policy(
                    requested.display().to_string(),
                    "extension not in allow-list",
                ));
            }
        }
        // Size pre-check where the size is knowable: existing files
        // opened for read/append. Write mode truncates, so the previous
        // size is irrelevant.
        if mode != OpenMode::Write
            && let Ok(metadata) = tokio::fs::metadata(resolved).await
            && metadata.len() > self.config.max_file_size
        {
            return Err(Error::policy(
                requested.display().to_string(),
                format!(
                    "file size {} exceeds limit {}",
                    metadata.len(),
                    self.config.max_file_size
                ),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for FileHandlePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandlePool")
            .field("base", &self.base)
            .field("pools", &self.pools.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_resolves_dot_segments() {
        let normalized = normalize(Path::new("/a/b/./c/../d")).unwrap();
        assert_eq!(normalized, PathBuf::from("/a/b/d"));
    }

    #[test]
    fn normalize_rejects_upward_escape() {
        assert!(normalize(Path::new("../x")).is_none());
    }

    #[test]
    fn resolve_rejects_traversal_out_of_base() {
        let err = resolve_under(Path::new("/tmp/x"), Path::new("/tmp/x/../../etc/passwd"))
            .unwrap_err();
        assert!(matches!(err, Error::SecurityViolation { .. }));
    }

    #[test]
    fn resolve_accepts_relative_path_inside_base() {
        let resolved = resolve_under(Path::new("/tmp/x"), Path::new("sub/./file.txt")).unwrap();
        assert_eq!(resolved, PathBuf::from("/tmp/x/sub/file.txt"));
    }

    #[test]
    fn resolve_rejects_absolute_path_outside_base() {
        let err = resolve_under(Path::new("/tmp/x"), Path::new("/etc/passwd")).unwrap_err();
        assert!(matches!(err, Error::SecurityViolation { .. }));
    }

    #[test]
    fn resolve_rejects_everything_against_an_empty_base() {
        let err = resolve_under(Path::new(""), Path::new("/etc/passwd")).unwrap_err();
        assert!(matches!(err, Error::SecurityViolation { .. }));
    }

    #[test]
    fn relative_base_is_anchored_before_use() {
        // "." must not normalize to a prefix that matches any path.
        let pool = FileHandlePool::new(FilePoolConfig::default()).unwrap();
        assert!(pool.base.is_absolute());
    }
}
