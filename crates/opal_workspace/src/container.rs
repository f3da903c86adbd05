//! Logical cache namespaces, one per operation kind.

use std::fmt;

/// Names the logical operation a cache entry belongs to.
///
/// Together with the file path and a content hash this forms the full
/// cache key. The AST variants additionally carry the source offset they
/// were requested at, so dumps of different declarations in one file do
/// not collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Container {
    /// A file's import list, keyed by its shallow hash.
    ImportPaths,
    /// Emit output, keyed by the recursive hash.
    EmitFile,
    /// Diagnostics, keyed by the recursive hash.
    GetDiagnostics,
    /// Symbol dumps, keyed by the recursive hash.
    DumpSymbols,
    /// Interface AST dump at a source offset.
    InterfaceAst {
        /// Byte offset of the declaration.
        offset: u32,
    },
    /// Enum AST dump at a source offset.
    EnumAst {
        /// Byte offset of the declaration.
        offset: u32,
    },
    /// Function AST dump at a source offset.
    FunctionAst {
        /// Byte offset of the declaration.
        offset: u32,
    },
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Container::ImportPaths => f.write_str("import_paths"),
            Container::EmitFile => f.write_str("emit_file"),
            Container::GetDiagnostics => f.write_str("get_diagnostics"),
            Container::DumpSymbols => f.write_str("dump_symbols"),
            Container::InterfaceAst { offset } => write!(f, "get_interface_ast-{offset}"),
            Container::EnumAst { offset } => write!(f, "get_enum_ast-{offset}"),
            Container::FunctionAst { offset } => write!(f, "get_function_ast-{offset}"),
        }
    }
}
