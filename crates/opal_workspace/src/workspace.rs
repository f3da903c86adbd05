//! The workspace contract shared by the live compilation service and the
//! caching layer that fronts it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::error::WorkspaceError;

/// One import edge reported when opening a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportPath {
    /// The specifier as written in the source file.
    pub relative: String,
    /// The resolved target path or alias.
    pub absolute: String,
}

/// Result of opening a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenFileResult {
    /// The files imported by the opened file, in source order.
    pub import_paths: Vec<ImportPath>,
    /// Set for a non-module script carrying ambient declarations. The
    /// import list of such a file is not a trustworthy fingerprint, so the
    /// live service is always consulted for it.
    pub is_ambient_without_module: bool,
}

/// Result of a diagnostics request.
///
/// The diagnostics payload is opaque to the caching layer; only the error
/// flag is inspected, to decide whether the result may be cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsResult {
    /// Whether any reported diagnostic is an error.
    pub has_error: bool,
    /// The diagnostics themselves.
    pub diagnostics: Value,
}

/// A compilation workspace.
///
/// Implemented both by adapters over the live compilation service and by
/// [`CachingWorkspace`](crate::CachingWorkspace), which wraps an inner
/// workspace and answers from cache where possible. All operations are
/// assumed to be pure functions of the current file-network content.
///
/// Emit, symbol-dump, and AST payloads are opaque JSON values; the caching
/// layer stores and returns them without interpretation.
#[async_trait]
pub trait Workspace: Send + Sync {
    /// Root directory all relative file names resolve against.
    fn workspace_root(&self) -> &Path;

    /// Prepares the workspace for use.
    async fn initialize(&self) -> Result<(), WorkspaceError>;

    /// Releases the workspace and everything it holds.
    async fn destroy(&self) -> Result<(), WorkspaceError>;

    /// Registers (or replaces) a file whose content lives in memory.
    async fn register_memory_file(&self, path: &Path, content: &str)
        -> Result<(), WorkspaceError>;

    /// Registers (or replaces) a file whose content is read from
    /// `backing_path` on disk.
    async fn register_disk_file(&self, path: &Path, backing_path: &Path)
        -> Result<(), WorkspaceError>;

    /// Opens a file and reports its import list.
    async fn open_file(&self, path: &Path) -> Result<OpenFileResult, WorkspaceError>;

    /// Compiles a file and returns the emit output.
    async fn emit_file(&self, path: &Path) -> Result<Value, WorkspaceError>;

    /// Type-checks a file and returns its diagnostics.
    async fn get_diagnostics(&self, path: &Path) -> Result<DiagnosticsResult, WorkspaceError>;

    /// Dumps the file's exported symbols with attached comments.
    async fn dump_symbols(&self, path: &Path) -> Result<Value, WorkspaceError>;

    /// Dumps the AST of the interface declared at `offset`.
    async fn interface_ast(&self, path: &Path, offset: u32) -> Result<Value, WorkspaceError>;

    /// Dumps the AST of the enum declared at `offset`.
    async fn enum_ast(&self, path: &Path, offset: u32) -> Result<Value, WorkspaceError>;

    /// Dumps the AST of the function declared at `offset`.
    async fn function_ast(&self, path: &Path, offset: u32) -> Result<Value, WorkspaceError>;

    /// Rewrites `to` as an import specifier usable from `from`.
    fn resolve_import_path(&self, from: &Path, to: &Path) -> String;

    /// Maps an import path or alias back to the file it names, if known.
    fn file_name_for_import_path(&self, import_path: &Path) -> Option<PathBuf>;
}
