//! A workspace decorator that caches compilation results persistently.
//!
//! Results are keyed by content hashes rather than timestamps, so a cache
//! populated in one session keeps serving hits in later sessions, across
//! machines, and regardless of when the files were written, as long as the
//! content is unchanged.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error};

use opal_cache::{Clock, CompilationStore, SystemClock};
use opal_common::ContentHash;

use crate::container::Container;
use crate::error::WorkspaceError;
use crate::files::{normalize_path, resolve_path, FileTable};
use crate::resolver::{open_in_service, resolve_import_list, Resolver};
use crate::workspace::{DiagnosticsResult, OpenFileResult, Workspace};

/// Entries untouched for this long are evicted when the workspace
/// initializes.
const CACHE_TTL_MILLIS: i64 = 1000 * 60 * 60 * 24 * 30;

/// Wraps an inner [`Workspace`] and answers requests from a persistent
/// store where possible, delegating the rest to the inner workspace and
/// caching what comes back.
pub struct CachingWorkspace {
    inner: Arc<dyn Workspace>,
    store: Arc<dyn CompilationStore>,
    clock: Arc<dyn Clock>,
    /// Guards the file table. The lock is held across an entire hash
    /// resolution, so concurrent requests resolve one graph at a time and
    /// never open the same file in the inner workspace twice.
    state: Mutex<FileTable>,
}

/// A request resolved to its cache coordinates.
struct ResolvedRequest {
    path: PathBuf,
    container: Container,
    hash: ContentHash,
    started: Instant,
}

/// The cacheable operations that return an opaque JSON payload.
enum ValueRequest {
    Emit,
    DumpSymbols,
    InterfaceAst(u32),
    EnumAst(u32),
    FunctionAst(u32),
}

impl ValueRequest {
    fn container(&self) -> Container {
        match self {
            ValueRequest::Emit => Container::EmitFile,
            ValueRequest::DumpSymbols => Container::DumpSymbols,
            ValueRequest::InterfaceAst(offset) => Container::InterfaceAst { offset: *offset },
            ValueRequest::EnumAst(offset) => Container::EnumAst { offset: *offset },
            ValueRequest::FunctionAst(offset) => Container::FunctionAst { offset: *offset },
        }
    }

    async fn dispatch(
        &self,
        inner: &dyn Workspace,
        path: &Path,
    ) -> Result<Value, WorkspaceError> {
        match self {
            ValueRequest::Emit => inner.emit_file(path).await,
            ValueRequest::DumpSymbols => inner.dump_symbols(path).await,
            ValueRequest::InterfaceAst(offset) => inner.interface_ast(path, *offset).await,
            ValueRequest::EnumAst(offset) => inner.enum_ast(path, *offset).await,
            ValueRequest::FunctionAst(offset) => inner.function_ast(path, *offset).await,
        }
    }
}

impl CachingWorkspace {
    /// Creates a caching layer over `inner`, backed by `store`.
    pub fn new(inner: Arc<dyn Workspace>, store: Arc<dyn CompilationStore>) -> Self {
        Self::with_clock(inner, store, Arc::new(SystemClock))
    }

    /// Like [`CachingWorkspace::new`], with an explicit clock for the
    /// eviction cutoff computed at initialization.
    pub fn with_clock(
        inner: Arc<dyn Workspace>,
        store: Arc<dyn CompilationStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner,
            store,
            clock,
            state: Mutex::new(FileTable::default()),
        }
    }

    /// Resolves a request's canonical path and recursive content hash,
    /// running the hash resolver if the file has none yet.
    async fn begin_request(
        &self,
        name: &Path,
        container: Container,
    ) -> Result<ResolvedRequest, WorkspaceError> {
        let started = Instant::now();
        debug!("begin {container} on '{}'", name.display());

        let mut table = self.state.lock().await;
        let path = resolve_path(&*self.inner, name);
        let needs_resolution = table.ensure_info(&path)?.recursive_hash.is_none();
        if needs_resolution {
            Resolver {
                table: &mut *table,
                inner: &*self.inner,
                store: &*self.store,
            }
            .resolve(&path)
            .await?;
        }
        let hash = table
            .files
            .get(&path)
            .and_then(|info| info.recursive_hash)
            .ok_or_else(|| WorkspaceError::UnresolvedHash { path: path.clone() })?;

        Ok(ResolvedRequest {
            path,
            container,
            hash,
            started,
        })
    }

    /// Looks the request up in the store. Read failures and undecodable
    /// payloads degrade to misses.
    async fn probe<T: DeserializeOwned>(&self, request: &ResolvedRequest) -> Option<T> {
        let key = request.path.to_string_lossy();
        let bytes = match self
            .store
            .get(&key, &request.container.to_string(), &request.hash.to_hex())
            .await
        {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!(
                    "cache miss for {} on {} (recursive hash: {})",
                    request.container,
                    request.path.display(),
                    request.hash
                );
                return None;
            }
            Err(err) => {
                debug!(
                    "cache read failed for {} on {}, treating as miss: {err}",
                    request.container,
                    request.path.display()
                );
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => {
                debug!(
                    "end {} on '{}' in {:?} (from cache)",
                    request.container,
                    request.path.display(),
                    request.started.elapsed()
                );
                Some(value)
            }
            Err(err) => {
                debug!(
                    "discarding undecodable cache entry for {} on {}: {err}",
                    request.container,
                    request.path.display()
                );
                None
            }
        }
    }

    /// Opens the file in the inner workspace if this session has not done
    /// so yet. The inner workspace only computes results for opened files.
    async fn ensure_opened(&self, path: &Path) -> Result<(), WorkspaceError> {
        let mut table = self.state.lock().await;
        let opened = table
            .files
            .get(path)
            .is_some_and(|info| info.opened_in_service);
        if !opened {
            open_in_service(&mut table, &*self.inner, &*self.store, path).await?;
        }
        Ok(())
    }

    /// Stores a fresh result under the request's cache coordinates. Write
    /// failures are logged, not surfaced.
    async fn write_back<T: Serialize>(&self, request: &ResolvedRequest, value: &T) {
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(err) => {
                error!(
                    "failed to encode result of {} on {}: {err}",
                    request.container,
                    request.path.display()
                );
                return;
            }
        };
        let key = request.path.to_string_lossy();
        if let Err(err) = self
            .store
            .set(&key, &request.container.to_string(), &request.hash.to_hex(), &bytes)
            .await
        {
            error!(
                "failed to write cache entry for {} on {}: {err}",
                request.container,
                request.path.display()
            );
        }
    }

    fn finish(&self, request: &ResolvedRequest) {
        debug!(
            "end {} on '{}' in {:?}",
            request.container,
            request.path.display(),
            request.started.elapsed()
        );
    }

    async fn process_value_request(
        &self,
        name: &Path,
        operation: ValueRequest,
    ) -> Result<Value, WorkspaceError> {
        let request = self.begin_request(name, operation.container()).await?;
        if let Some(value) = self.probe(&request).await {
            return Ok(value);
        }
        self.ensure_opened(&request.path).await?;
        let value = operation.dispatch(&*self.inner, &request.path).await?;
        self.write_back(&request, &value).await;
        self.finish(&request);
        Ok(value)
    }
}

#[async_trait]
impl Workspace for CachingWorkspace {
    fn workspace_root(&self) -> &Path {
        self.inner.workspace_root()
    }

    async fn initialize(&self) -> Result<(), WorkspaceError> {
        self.inner.initialize().await?;
        let cutoff = self.clock.now_millis() - CACHE_TTL_MILLIS;
        self.store.evict_older_than(cutoff).await?;
        Ok(())
    }

    async fn destroy(&self) -> Result<(), WorkspaceError> {
        self.inner.destroy().await?;
        self.store.close().await?;
        Ok(())
    }

    async fn register_memory_file(
        &self,
        path: &Path,
        content: &str,
    ) -> Result<(), WorkspaceError> {
        let mut table = self.state.lock().await;
        let resolved = normalize_path(self.inner.workspace_root(), path);
        table
            .registry
            .add_memory_file(resolved.clone(), content.to_string());
        self.inner.register_memory_file(path, content).await?;
        table.invalidate(&resolved);
        Ok(())
    }

    async fn register_disk_file(
        &self,
        path: &Path,
        backing_path: &Path,
    ) -> Result<(), WorkspaceError> {
        let mut table = self.state.lock().await;
        let resolved = normalize_path(self.inner.workspace_root(), path);
        table
            .registry
            .add_disk_file(resolved.clone(), backing_path.to_owned());
        self.inner.register_disk_file(path, backing_path).await?;
        table.invalidate(&resolved);
        Ok(())
    }

    async fn open_file(&self, name: &Path) -> Result<OpenFileResult, WorkspaceError> {
        let started = Instant::now();
        debug!("begin open_file on '{}'", name.display());
        let mut table = self.state.lock().await;
        let path = resolve_path(&*self.inner, name);
        let result = resolve_import_list(&mut table, &*self.inner, &*self.store, &path).await?;
        debug!("end open_file on '{}' in {:?}", name.display(), started.elapsed());
        Ok(result)
    }

    async fn emit_file(&self, name: &Path) -> Result<Value, WorkspaceError> {
        self.process_value_request(name, ValueRequest::Emit).await
    }

    async fn get_diagnostics(&self, name: &Path) -> Result<DiagnosticsResult, WorkspaceError> {
        let request = self.begin_request(name, Container::GetDiagnostics).await?;
        if let Some(result) = self.probe(&request).await {
            return Ok(result);
        }
        self.ensure_opened(&request.path).await?;
        let result = self.inner.get_diagnostics(&request.path).await?;
        if result.has_error {
            debug!(
                "diagnostics for {} carry errors, not caching",
                request.path.display()
            );
        } else {
            self.write_back(&request, &result).await;
        }
        self.finish(&request);
        Ok(result)
    }

    async fn dump_symbols(&self, name: &Path) -> Result<Value, WorkspaceError> {
        self.process_value_request(name, ValueRequest::DumpSymbols)
            .await
    }

    async fn interface_ast(&self, name: &Path, offset: u32) -> Result<Value, WorkspaceError> {
        self.process_value_request(name, ValueRequest::InterfaceAst(offset))
            .await
    }

    async fn enum_ast(&self, name: &Path, offset: u32) -> Result<Value, WorkspaceError> {
        self.process_value_request(name, ValueRequest::EnumAst(offset))
            .await
    }

    async fn function_ast(&self, name: &Path, offset: u32) -> Result<Value, WorkspaceError> {
        self.process_value_request(name, ValueRequest::FunctionAst(offset))
            .await
    }

    fn resolve_import_path(&self, from: &Path, to: &Path) -> String {
        self.inner.resolve_import_path(from, to)
    }

    fn file_name_for_import_path(&self, import_path: &Path) -> Option<PathBuf> {
        self.inner.file_name_for_import_path(import_path)
    }
}
