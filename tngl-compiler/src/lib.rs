//! `tngl-compiler`: TNGL source to controller bytecode.
//!
//! # Pipeline
//!
//! ```text
//!  source ──▶ preprocess ──▶ tokenize ──▶ compile ──▶ Program
//!             (macros,       (nearest     (symbol
//!              directives,    match)       table,
//!              minify)                     codec)
//! ```
//!
//! - [`codec`]      — little-endian reader / writer shared with the link layer
//! - [`preprocess`] — fragment, define, scene and script-block stages
//! - [`minify`]     — Berry script minifier used by the preprocessor
//! - [`token`]      — nearest-match tokenizer
//! - [`symbols`]    — scoped variable address allocator
//! - [`compiler`]   — single-pass bytecode emitter
//! - [`flags`]      — bytecode opcodes and keyword table
//! - [`store`]      — fragment store behind `FETCH_TNGL` / `PUBLISH_TNGL`

pub mod codec;
pub mod compiler;
pub mod error;
pub mod flags;
pub mod minify;
pub mod preprocess;
pub mod store;
pub mod symbols;
pub mod token;

pub use codec::{TnglReader, TnglWriter};
pub use compiler::{compile, compile_with, Compiler, CompilerOptions, Program};
pub use error::{CodecError, CompileError};
pub use preprocess::{preprocess, Preprocessed};
pub use store::{FragmentStore, MemoryFragmentStore};
pub use token::{tokenize, Token, TokenKind};
