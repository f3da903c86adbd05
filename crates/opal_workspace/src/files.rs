//! In-memory bookkeeping for the files the caching workspace knows about.

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use opal_common::ContentHash;

use crate::error::WorkspaceError;
use crate::workspace::{OpenFileResult, Workspace};

/// Resolves a file name lexically against the workspace root and collapses
/// `.` and `..` components. No filesystem access is involved, so paths of
/// unregistered files normalize the same way as registered ones.
pub(crate) fn normalize_path(root: &Path, name: &Path) -> PathBuf {
    let joined = if name.is_absolute() {
        name.to_path_buf()
    } else {
        root.join(name)
    };
    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Maps an import specifier or alias back to a canonical file path, asking
/// the live service for known aliases first.
pub(crate) fn resolve_path(inner: &dyn Workspace, name: &Path) -> PathBuf {
    let name = inner
        .file_name_for_import_path(name)
        .unwrap_or_else(|| name.to_path_buf());
    normalize_path(inner.workspace_root(), &name)
}

/// Registered file contents, either held in memory or backed by a file on
/// disk. The most recent registration for a path wins.
#[derive(Debug, Default)]
pub(crate) struct RegisteredFiles {
    memory: HashMap<PathBuf, String>,
    disk: HashMap<PathBuf, PathBuf>,
}

impl RegisteredFiles {
    pub(crate) fn add_memory_file(&mut self, path: PathBuf, content: String) {
        self.disk.remove(&path);
        self.memory.insert(path, content);
    }

    pub(crate) fn add_disk_file(&mut self, path: PathBuf, backing_path: PathBuf) {
        self.memory.remove(&path);
        self.disk.insert(path, backing_path);
    }

    /// Returns the current content of `path`. Unregistered paths fall back
    /// to a direct filesystem read, matching how the live service treats
    /// files it discovers on its own.
    pub(crate) fn read(&self, path: &Path) -> Result<Vec<u8>, WorkspaceError> {
        if let Some(content) = self.memory.get(path) {
            return Ok(content.as_bytes().to_vec());
        }
        let backing = self.disk.get(path).map(PathBuf::as_path).unwrap_or(path);
        std::fs::read(backing).map_err(|source| WorkspaceError::Io {
            path: backing.to_owned(),
            source,
        })
    }
}

/// Everything the caching layer remembers about one file.
#[derive(Debug)]
pub(crate) struct CachedFileInfo {
    /// Digest of the file's own content.
    pub(crate) shallow_hash: ContentHash,
    /// The file's import list, once resolved from cache or live service.
    pub(crate) imports: Option<OpenFileResult>,
    /// Digest of the file and its transitive imports, once resolved.
    pub(crate) recursive_hash: Option<ContentHash>,
    /// Files whose recursive hash depends on this file.
    pub(crate) dependents: BTreeSet<PathBuf>,
    /// Whether the file has been opened in the live service during this
    /// session.
    pub(crate) opened_in_service: bool,
}

impl CachedFileInfo {
    fn new(shallow_hash: ContentHash) -> Self {
        Self {
            shallow_hash,
            imports: None,
            recursive_hash: None,
            dependents: BTreeSet::new(),
            opened_in_service: false,
        }
    }
}

/// The file-info table plus the registered contents it is derived from.
#[derive(Debug, Default)]
pub(crate) struct FileTable {
    pub(crate) files: HashMap<PathBuf, CachedFileInfo>,
    pub(crate) registry: RegisteredFiles,
}

impl FileTable {
    /// Returns the info record for `path`, computing the shallow hash on
    /// first touch.
    pub(crate) fn ensure_info(
        &mut self,
        path: &Path,
    ) -> Result<&mut CachedFileInfo, WorkspaceError> {
        match self.files.entry(path.to_owned()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let content = self.registry.read(path)?;
                let shallow = ContentHash::from_bytes(&content);
                debug!("resolved shallow hash of {} as {shallow}", path.display());
                Ok(entry.insert(CachedFileInfo::new(shallow)))
            }
        }
    }

    /// Drops the info record for `path` and, transitively, for every file
    /// that depends on it. The next request recomputes them from current
    /// content.
    pub(crate) fn invalidate(&mut self, path: &Path) {
        if let Some(info) = self.files.remove(path) {
            debug!("invalidating cached file info for {}", path.display());
            for dependent in info.dependents {
                self.invalidate(&dependent);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_joins_relative_names_to_the_root() {
        assert_eq!(
            normalize_path(Path::new("/ws"), Path::new("src/Foo.ts")),
            PathBuf::from("/ws/src/Foo.ts")
        );
    }

    #[test]
    fn normalize_keeps_absolute_names() {
        assert_eq!(
            normalize_path(Path::new("/ws"), Path::new("/other/Foo.ts")),
            PathBuf::from("/other/Foo.ts")
        );
    }

    #[test]
    fn normalize_collapses_dot_components() {
        assert_eq!(
            normalize_path(Path::new("/ws"), Path::new("./a/../b/./c.ts")),
            PathBuf::from("/ws/b/c.ts")
        );
        assert_eq!(
            normalize_path(Path::new("/"), Path::new("/a/b/../../c.ts")),
            PathBuf::from("/c.ts")
        );
    }

    #[test]
    fn memory_registration_replaces_disk_registration() {
        let mut registry = RegisteredFiles::default();
        let path = PathBuf::from("/Foo.ts");
        registry.add_disk_file(path.clone(), PathBuf::from("/nonexistent"));
        registry.add_memory_file(path.clone(), "let a = 1".to_string());
        assert_eq!(registry.read(&path).unwrap(), b"let a = 1");
    }

    #[test]
    fn unreadable_file_is_an_io_error() {
        let registry = RegisteredFiles::default();
        let err = registry.read(Path::new("/definitely/not/here.ts")).unwrap_err();
        assert!(matches!(err, WorkspaceError::Io { .. }));
    }

    #[test]
    fn ensure_info_computes_the_shallow_hash_once() {
        let mut table = FileTable::default();
        let path = PathBuf::from("/Foo.ts");
        table.registry.add_memory_file(path.clone(), "A".to_string());
        let first = table.ensure_info(&path).unwrap().shallow_hash;

        // A later content change is not observed until invalidation.
        table.registry.add_memory_file(path.clone(), "B".to_string());
        let second = table.ensure_info(&path).unwrap().shallow_hash;
        assert_eq!(first, second);

        table.invalidate(&path);
        let third = table.ensure_info(&path).unwrap().shallow_hash;
        assert_ne!(first, third);
    }

    #[test]
    fn invalidation_cascades_through_dependents() {
        let mut table = FileTable::default();
        for (name, content) in [("/a.ts", "a"), ("/b.ts", "b"), ("/c.ts", "c")] {
            table
                .registry
                .add_memory_file(PathBuf::from(name), content.to_string());
            table.ensure_info(Path::new(name)).unwrap();
        }
        // a imports b imports c.
        table
            .ensure_info(Path::new("/b.ts"))
            .unwrap()
            .dependents
            .insert(PathBuf::from("/a.ts"));
        table
            .ensure_info(Path::new("/c.ts"))
            .unwrap()
            .dependents
            .insert(PathBuf::from("/b.ts"));

        table.invalidate(Path::new("/c.ts"));
        assert!(table.files.is_empty());
    }

    #[test]
    fn invalidation_survives_dependency_cycles() {
        let mut table = FileTable::default();
        for name in ["/a.ts", "/b.ts"] {
            table
                .registry
                .add_memory_file(PathBuf::from(name), name.to_string());
            table.ensure_info(Path::new(name)).unwrap();
        }
        table
            .ensure_info(Path::new("/a.ts"))
            .unwrap()
            .dependents
            .insert(PathBuf::from("/b.ts"));
        table
            .ensure_info(Path::new("/b.ts"))
            .unwrap()
            .dependents
            .insert(PathBuf::from("/a.ts"));

        table.invalidate(Path::new("/a.ts"));
        assert!(table.files.is_empty());
    }
}
