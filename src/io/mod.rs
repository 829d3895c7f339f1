//! Content provider boundary
//!
//! Documents read their content through [`FileHandle`]s resolved from a
//! [`FileProvider`]. The engine never interprets the bytes.

use crate::error::{DocflowError, DocflowResult};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// A readable file
pub trait FileHandle: Send + Sync {
    fn path(&self) -> &Path;

    fn exists(&self) -> bool;

    /// Open the file for reading
    fn open(&self) -> DocflowResult<Box<dyn Read + Send>>;
}

/// A directory whose direct files can be listed
pub trait DirectoryHandle: Send + Sync {
    fn path(&self) -> &Path;

    fn exists(&self) -> bool;

    fn files(&self) -> Vec<Arc<dyn FileHandle>>;
}

/// Resolves paths to file and directory handles
pub trait FileProvider: Send + Sync {
    fn resolve_file(&self, path: &Path) -> Arc<dyn FileHandle>;

    fn resolve_directory(&self, path: &Path) -> Arc<dyn DirectoryHandle>;
}

#[derive(Default)]
struct MemoryStore {
    directories: BTreeSet<PathBuf>,
    files: BTreeMap<PathBuf, Arc<[u8]>>,
}

/// File provider backed by in-memory maps
///
/// # Example
/// ```
/// use docflow::io::{FileProvider, MemoryFileProvider};
/// use std::path::Path;
///
/// let provider = MemoryFileProvider::new();
/// provider.add_file("/input/index.md", "# Hello");
///
/// let file = provider.resolve_file(Path::new("/input/index.md"));
/// assert!(file.exists());
/// ```
#[derive(Clone, Default)]
pub struct MemoryFileProvider {
    store: Arc<RwLock<MemoryStore>>,
}

impl MemoryFileProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_directory(&self, path: impl Into<PathBuf>) {
        if let Ok(mut store) = self.store.write() {
            store.directories.insert(path.into());
        }
    }

    /// Add or replace a file; its parent directories become known
    pub fn add_file(&self, path: impl Into<PathBuf>, content: impl AsRef<[u8]>) {
        let path = path.into();
        if let Ok(mut store) = self.store.write() {
            let mut parent = path.parent();
            while let Some(dir) = parent {
                if dir.as_os_str().is_empty() {
                    break;
                }
                store.directories.insert(dir.to_path_buf());
                parent = dir.parent();
            }
            store.files.insert(path, Arc::from(content.as_ref()));
        }
    }

    fn read(&self, path: &Path) -> DocflowResult<Arc<[u8]>> {
        let store = self.store.read()?;
        store
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| DocflowError::FileNotFound(path.display().to_string()))
    }
}

impl FileProvider for MemoryFileProvider {
    fn resolve_file(&self, path: &Path) -> Arc<dyn FileHandle> {
        Arc::new(MemoryFile {
            provider: self.clone(),
            path: path.to_path_buf(),
        })
    }

    fn resolve_directory(&self, path: &Path) -> Arc<dyn DirectoryHandle> {
        Arc::new(MemoryDirectory {
            provider: self.clone(),
            path: path.to_path_buf(),
        })
    }
}

struct MemoryFile {
    provider: MemoryFileProvider,
    path: PathBuf,
}

impl FileHandle for MemoryFile {
    fn path(&self) -> &Path {
        &self.path
    }

    fn exists(&self) -> bool {
        self.provider
            .store
            .read()
            .map(|store| store.files.contains_key(&self.path))
            .unwrap_or(false)
    }

    fn open(&self) -> DocflowResult<Box<dyn Read + Send>> {
        let bytes = self.provider.read(&self.path)?;
        Ok(Box::new(Cursor::new(bytes)))
    }
}

struct MemoryDirectory {
    provider: MemoryFileProvider,
    path: PathBuf,
}

impl DirectoryHandle for MemoryDirectory {
    fn path(&self) -> &Path {
        &self.path
    }

    fn exists(&self) -> bool {
        self.provider
            .store
            .read()
            .map(|store| store.directories.contains(&self.path))
            .unwrap_or(false)
    }

    fn files(&self) -> Vec<Arc<dyn FileHandle>> {
        let paths: Vec<PathBuf> = match self.provider.store.read() {
            Ok(store) => store
                .files
                .keys()
                .filter(|p| p.parent() == Some(self.path.as_path()))
                .cloned()
                .collect(),
            Err(_) => Vec::new(),
        };
        paths
            .iter()
            .map(|p| self.provider.resolve_file(p))
            .collect()
    }
}
