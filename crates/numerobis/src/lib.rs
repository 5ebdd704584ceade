//! Numerobis: a compiler for a small expression-oriented language with
//! first-class physical units and dimensions.
//!
//! A value carries both a type (`Int`, `Float`, `Str`, `Bool`, `List`,
//! `Range`, `Function`) and a dimensional expression (`Length * Time^-1`).
//! The pipeline parses source, resolves imports, checks dimensions, checks
//! types, preprocesses unit conversions, and emits C linked against a small
//! runtime.

pub mod algebra;
pub mod ast;
pub mod backend;
pub mod dimcheck;
pub mod emit;
pub mod env;
pub mod errors;
pub mod lexer;
pub mod link;
pub mod location;
pub mod module;
pub mod parser;
pub mod preprocess;
pub mod snapshot;
pub mod typecheck;
pub mod unit;

pub use crate::{
    errors::{Diagnostic, ModuleMeta},
    module::{compile_source, link_program, CompiledModule, Loader, Resolver},
};
