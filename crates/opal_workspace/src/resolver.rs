//! Recursive content hash resolution over the import graph.
//!
//! A file's recursive hash digests its own content together with the
//! recursive hashes of everything it imports, so it changes whenever
//! anything in the file's transitive dependency closure changes. Cycles
//! are folded into a single unit: every member of a cycle digests the
//! shallow hashes of all members instead of following intra-cycle edges,
//! which keeps the result independent of where the traversal entered the
//! cycle.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use tracing::{debug, error, warn};

use opal_cache::CompilationStore;
use opal_common::ContentHash;

use crate::container::Container;
use crate::error::WorkspaceError;
use crate::files::{resolve_path, FileTable};
use crate::tracker::{CircularLoopTracker, PushOutcome};
use crate::workspace::{OpenFileResult, Workspace};

/// Returns the import list of `path`, from the in-memory table, the
/// persistent store, or by opening the file in the live service, in that
/// order of preference.
///
/// The store entry is keyed by the file's shallow hash. An ambient
/// non-module file is remembered but never trusted from cache alone; it
/// always goes through the live service so its global declarations take
/// effect there.
pub(crate) async fn resolve_import_list(
    table: &mut FileTable,
    inner: &dyn Workspace,
    store: &dyn CompilationStore,
    path: &Path,
) -> Result<OpenFileResult, WorkspaceError> {
    let info = table.ensure_info(path)?;
    if let Some(imports) = &info.imports {
        if !imports.is_ambient_without_module || info.opened_in_service {
            return Ok(imports.clone());
        }
    }
    let shallow = info.shallow_hash;

    let key = path.to_string_lossy();
    match store
        .get(&key, &Container::ImportPaths.to_string(), &shallow.to_hex())
        .await
    {
        Ok(Some(bytes)) => {
            // A payload that fails to parse is treated as a plain miss.
            if let Ok(cached) = serde_json::from_slice::<OpenFileResult>(&bytes) {
                let ambient = cached.is_ambient_without_module;
                table.ensure_info(path)?.imports = Some(cached.clone());
                if !ambient {
                    return Ok(cached);
                }
                debug!(
                    "file {} holds ambient declarations, opening it live",
                    path.display()
                );
            }
        }
        Ok(None) => debug!(
            "could not resolve import paths from cache for {} (shallow hash: {shallow})",
            path.display()
        ),
        Err(err) => debug!(
            "import path cache read failed for {}, treating as miss: {err}",
            path.display()
        ),
    }

    open_in_service(table, inner, store, path).await
}

/// Opens `path` in the live service, records the resulting import list,
/// and writes it back to the store under the file's shallow hash.
pub(crate) async fn open_in_service(
    table: &mut FileTable,
    inner: &dyn Workspace,
    store: &dyn CompilationStore,
    path: &Path,
) -> Result<OpenFileResult, WorkspaceError> {
    let opened = inner.open_file(path).await?;

    let info = table.ensure_info(path)?;
    info.imports = Some(opened.clone());
    info.opened_in_service = true;
    let shallow = info.shallow_hash;

    match serde_json::to_vec(&opened) {
        Ok(bytes) => {
            let key = path.to_string_lossy();
            if let Err(err) = store
                .set(&key, &Container::ImportPaths.to_string(), &shallow.to_hex(), &bytes)
                .await
            {
                error!("failed to cache import paths of {}: {err}", path.display());
            }
        }
        Err(err) => error!("failed to encode import paths of {}: {err}", path.display()),
    }

    Ok(opened)
}

/// One file awaiting its recursive hash.
struct HashEntry {
    path: PathBuf,
    /// Hex digests fed into the hash ahead of any import hashes: the
    /// file's own shallow hash, then the shallow hashes of its other
    /// cycle members in path order.
    basis: Vec<String>,
    /// Imports whose recursive hashes complete the digest, in source
    /// order. Intra-cycle edges are excluded.
    imports: Vec<PathBuf>,
}

/// Resolves recursive hashes for a root file and its transitive imports.
///
/// Runs in two phases: an import-graph walk that resolves every import
/// list and registers reverse dependency edges, then a fixed-point pass
/// that finalizes hashes bottom-up.
pub(crate) struct Resolver<'a> {
    pub(crate) table: &'a mut FileTable,
    pub(crate) inner: &'a dyn Workspace,
    pub(crate) store: &'a dyn CompilationStore,
}

struct Frame {
    targets: Vec<PathBuf>,
    next: usize,
}

impl Resolver<'_> {
    pub(crate) async fn resolve(&mut self, root: &Path) -> Result<(), WorkspaceError> {
        let mut tracker = CircularLoopTracker::new();
        let mut import_map = HashMap::new();
        self.gather(root, &mut tracker, &mut import_map).await?;

        for cycle in tracker.resolved_cycles() {
            debug!("resolved import cycle: {cycle:?}");
        }

        let mut pending = Vec::new();
        let mut seen = HashSet::new();
        self.collect_entries(root, &tracker, &import_map, &mut seen, &mut pending)?;
        self.finalize(pending)
    }

    /// Depth-first walk over the import graph. The explicit frame stack
    /// mirrors the tracker's path stack.
    async fn gather(
        &mut self,
        root: &Path,
        tracker: &mut CircularLoopTracker,
        import_map: &mut HashMap<PathBuf, Vec<PathBuf>>,
    ) -> Result<(), WorkspaceError> {
        if self.hash_of(root).is_some() {
            return Ok(());
        }
        if tracker.push(root) != PushOutcome::NonCircular {
            return Ok(());
        }
        let targets = self.visit(root, import_map).await?;
        let mut stack = vec![Frame { targets, next: 0 }];

        while let Some(frame) = stack.last_mut() {
            if frame.next >= frame.targets.len() {
                tracker.pop();
                stack.pop();
                continue;
            }
            let target = frame.targets[frame.next].clone();
            frame.next += 1;

            if self.hash_of(&target).is_some() {
                continue;
            }
            if tracker.push(&target) != PushOutcome::NonCircular {
                continue;
            }
            let targets = self.visit(&target, import_map).await?;
            stack.push(Frame { targets, next: 0 });
        }
        Ok(())
    }

    /// Resolves the import list of one file and records reverse
    /// dependency edges from each import target back to it.
    async fn visit(
        &mut self,
        path: &Path,
        import_map: &mut HashMap<PathBuf, Vec<PathBuf>>,
    ) -> Result<Vec<PathBuf>, WorkspaceError> {
        let imports = resolve_import_list(self.table, self.inner, self.store, path)
            .await
            .map_err(|source| WorkspaceError::Dependency {
                path: path.to_owned(),
                source: Box::new(source),
            })?;

        let mut targets = Vec::new();
        for edge in &imports.import_paths {
            let target = resolve_path(self.inner, Path::new(&edge.absolute));
            match self.table.ensure_info(&target) {
                Ok(info) => {
                    info.dependents.insert(path.to_owned());
                    targets.push(target);
                }
                Err(err) => warn!(
                    "skipping unreadable import {} of {}: {err}",
                    target.display(),
                    path.display()
                ),
            }
        }
        import_map.insert(path.to_owned(), targets.clone());
        Ok(targets)
    }

    /// Pre-order collection of hash entries for every file the walk
    /// reached that still lacks a recursive hash.
    fn collect_entries(
        &self,
        path: &Path,
        tracker: &CircularLoopTracker,
        import_map: &HashMap<PathBuf, Vec<PathBuf>>,
        seen: &mut HashSet<PathBuf>,
        out: &mut Vec<HashEntry>,
    ) -> Result<(), WorkspaceError> {
        let Some(info) = self.table.files.get(path) else {
            return Ok(());
        };
        if info.recursive_hash.is_some() || !seen.insert(path.to_owned()) {
            return Ok(());
        }
        let Some(targets) = import_map.get(path) else {
            return Ok(());
        };

        let mut basis = vec![info.shallow_hash.to_hex()];
        let imports = if let Some(cycle) = tracker.cycle_members(path) {
            for member in cycle {
                if member.as_path() == path {
                    continue;
                }
                let mate = self.table.files.get(member).ok_or_else(|| {
                    WorkspaceError::UnknownFile {
                        path: member.clone(),
                    }
                })?;
                basis.push(mate.shallow_hash.to_hex());
            }
            targets
                .iter()
                .filter(|target| !cycle.contains(*target))
                .cloned()
                .collect()
        } else {
            targets.clone()
        };

        out.push(HashEntry {
            path: path.to_owned(),
            basis,
            imports,
        });
        for target in targets {
            self.collect_entries(target, tracker, import_map, seen, out)?;
        }
        Ok(())
    }

    /// Repeatedly sweeps the pending entries, finalizing every file whose
    /// imports all have hashes, until none remain. Entries were collected
    /// pre-order, so sweeping from the back resolves leaves first.
    fn finalize(&mut self, mut pending: Vec<HashEntry>) -> Result<(), WorkspaceError> {
        while !pending.is_empty() {
            let mut progressed = 0usize;
            let mut retry = Vec::new();
            while let Some(entry) = pending.pop() {
                if self.try_finalize(&entry)? {
                    progressed += 1;
                } else {
                    retry.push(entry);
                }
            }
            if progressed == 0 {
                return Err(WorkspaceError::HashResolutionStalled {
                    pending: retry.len(),
                });
            }
            retry.reverse();
            pending = retry;
        }
        Ok(())
    }

    fn try_finalize(&mut self, entry: &HashEntry) -> Result<bool, WorkspaceError> {
        let mut parts = entry.basis.clone();
        for import in &entry.imports {
            let Some(hash) = self.hash_of(import) else {
                return Ok(false);
            };
            parts.push(hash.to_hex());
        }
        let hash = ContentHash::from_parts(&parts);

        let info = self
            .table
            .files
            .get_mut(&entry.path)
            .ok_or_else(|| WorkspaceError::UnknownFile {
                path: entry.path.clone(),
            })?;
        info.recursive_hash = Some(hash);
        debug!("resolved recursive hash of {} as {hash}", entry.path.display());
        Ok(true)
    }

    fn hash_of(&self, path: &Path) -> Option<ContentHash> {
        self.table.files.get(path).and_then(|info| info.recursive_hash)
    }
}
