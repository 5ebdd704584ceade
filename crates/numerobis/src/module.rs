//! Module loading and the compilation pipeline.
//!
//! A module is loaded with a recursive depth-first walk: imports are fully
//! compiled before the importing module's header is processed. The walk is
//! cache-coherent, keyed by canonical path, and owned by the [`Loader`] for
//! the duration of a build.

use std::{
    path::{Path, PathBuf},
    rc::Rc,
};

use ahash::AHashMap;
use tracing::debug;

use crate::{
    ast::{Header, HeaderImport, Link},
    dimcheck::Dimchecker,
    emit::Emitter,
    env::Namespaces,
    errors::{Errors, ModuleMeta, Result},
    lexer::lex,
    parser::parse,
    preprocess::{CompiledUnits, Preprocessor},
    typecheck::{declare, typecheck},
};

/// File extension of source modules.
pub const SOURCE_EXT: &str = "nbis";

/// Modules bundled with the compiler, resolvable before the search paths.
const STDLIB: &[(&str, &str)] = &[("si", include_str!("../stdlib/si.nbis"))];

/// Maps module names to sources: embedded stdlib first, then the search
/// paths.
#[derive(Debug, Clone, Default)]
pub struct Resolver {
    pub search_paths: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub enum Resolved {
    Embedded { name: &'static str, source: &'static str },
    File(PathBuf),
}

impl Resolver {
    pub fn resolve(&self, name: &str) -> Option<Resolved> {
        if let Some((stdlib_name, source)) = STDLIB.iter().copied().find(|(n, _)| *n == name) {
            return Some(Resolved::Embedded { name: stdlib_name, source });
        }
        let file = format!("{}.{SOURCE_EXT}", name.replace('.', "/"));
        for search_dir in &self.search_paths {
            let candidate = search_dir.join(&file);
            if candidate.is_file() {
                return Some(Resolved::File(
                    candidate.canonicalize().unwrap_or(candidate),
                ));
            }
        }
        None
    }
}

/// A fully compiled module: its linked program, namespaces, conversion
/// expressions and emitted code.
#[derive(Debug)]
pub struct CompiledModule {
    pub meta: Rc<ModuleMeta>,
    pub uid: String,
    pub program: Vec<Link>,
    pub namespaces: Namespaces,
    pub units: CompiledUnits,
    /// This module's emitted C (functions and conversions, no `main`).
    pub code: String,
    /// Emitted entry statements; only used for the root module.
    pub main: String,
}

/// Stable per-module identifier derived from the path.
pub fn module_uid(path: &Path) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(path.to_string_lossy().as_bytes());
    let mut uid = String::with_capacity(8);
    for byte in &digest[..4] {
        uid.push_str(&format!("{byte:02x}"));
    }
    uid
}

pub struct Loader {
    pub resolver: Resolver,
    /// Compiled modules keyed by canonical path; read-only after loading.
    cache: AHashMap<PathBuf, Rc<CompiledModule>>,
    loading: Vec<PathBuf>,
}

impl Loader {
    pub fn new(resolver: Resolver) -> Self {
        Self {
            resolver,
            cache: AHashMap::new(),
            loading: Vec::new(),
        }
    }

    /// Loads and compiles the module at `path` (and, transitively, its
    /// imports).
    pub fn load_file(&mut self, path: &Path) -> Result<Rc<CompiledModule>> {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let source = std::fs::read_to_string(&canonical).map_err(|err| {
            Errors::new(ModuleMeta::new(canonical.clone(), ""))
                .throw(802, None)
                .arg("module", canonical.display())
                .help(err.to_string())
        })?;
        self.load(ModuleMeta::new(canonical, source), true)
    }

    /// Compiles `source` as if it lived at `path`. Entry point for tests
    /// and embedded use.
    pub fn load_source(&mut self, path: impl Into<PathBuf>, source: &str) -> Result<Rc<CompiledModule>> {
        self.load(ModuleMeta::new(path.into(), source), true)
    }

    fn load(&mut self, meta: Rc<ModuleMeta>, builtins: bool) -> Result<Rc<CompiledModule>> {
        if let Some(cached) = self.cache.get(&meta.path) {
            return Ok(Rc::clone(cached));
        }
        if self.loading.contains(&meta.path) {
            let mut cycle: Vec<String> = self
                .loading
                .iter()
                .map(|p| p.file_stem().unwrap_or_default().to_string_lossy().into_owned())
                .collect();
            cycle.push(meta.path.file_stem().unwrap_or_default().to_string_lossy().into_owned());
            return Errors::new(meta)
                .throw(805, None)
                .arg("cycle", cycle.join(" -> "))
                .fail();
        }
        self.loading.push(meta.path.clone());
        let result = self.compile(Rc::clone(&meta), builtins);
        self.loading.pop();

        let compiled = Rc::new(result?);
        self.cache.insert(meta.path.clone(), Rc::clone(&compiled));
        Ok(compiled)
    }

    fn compile(&mut self, meta: Rc<ModuleMeta>, builtins: bool) -> Result<CompiledModule> {
        debug!(path = %meta.path.display(), "compiling module");

        let tokens = lex(&meta.source, Rc::clone(&meta))?;
        let (ast, header) = parse(tokens, Rc::clone(&meta))?;

        let mut ns = Namespaces::default();
        if builtins {
            ns.names.extend(declare::builtin_names());
        }
        self.resolve_imports(&meta, &header, &mut ns)?;

        Dimchecker::new(Rc::clone(&meta)).check_header(&mut ns, &header)?;
        debug!(units = header.units.len(), dimensions = header.dimensions.len(), "header checked");

        let program = typecheck(ast, Rc::clone(&meta), &mut ns)?;
        debug!(statements = program.len(), "typecheck complete");

        let units = Preprocessor::new(Rc::clone(&meta)).run(&mut ns, &header)?;
        debug!(units = units.units.len(), logarithmic = units.logarithmic.len(), "units compiled");

        let uid = module_uid(&meta.path);
        let emitter = Emitter::new(Rc::clone(&meta), uid.clone());
        let (code, main) = emitter.emit(&program, &ns, &units)?;

        Ok(CompiledModule {
            meta,
            uid,
            program,
            namespaces: ns,
            units,
            code,
            main,
        })
    }

    fn resolve_imports(
        &mut self,
        meta: &Rc<ModuleMeta>,
        header: &Header,
        ns: &mut Namespaces,
    ) -> Result<()> {
        let errors = Errors::new(Rc::clone(meta));

        for import in &header.imports {
            let module_name = &import.module().name;
            let resolved = self.resolver.resolve(module_name).ok_or_else(|| {
                errors
                    .throw(802, Some(import.loc()))
                    .arg("module", module_name)
            })?;

            let loaded = match resolved {
                Resolved::Embedded { name, source } => {
                    self.load(ModuleMeta::new(format!("<stdlib:{name}>"), source), true)?
                }
                Resolved::File(path) => self.load_file(&path)?,
            };

            match import {
                HeaderImport::Import(def) => {
                    let local = def.alias.as_ref().unwrap_or(&def.module).name.clone();
                    ns.imports.insert(local, loaded.namespaces.clone());
                }
                HeaderImport::From(def) => {
                    let Some(names) = &def.names else {
                        // import *
                        ns.update(&loaded.namespaces);
                        continue;
                    };

                    for (i, name) in names.iter().enumerate() {
                        if let Some(stripped) = name.name.strip_prefix('@') {
                            // unit namespace import; unit-first lookup
                            let exported = &loaded.namespaces;
                            if let Some(forward) = exported.units.get(stripped) {
                                ns.units.insert(stripped.to_owned(), forward.clone());
                                if let Some(dim) = exported.dimensionized.get(stripped) {
                                    ns.dimensionized.insert(stripped.to_owned(), dim.clone());
                                }
                            } else if let Some(dim) = exported.dimensions.get(stripped) {
                                ns.dimensions.insert(stripped.to_owned(), dim.clone());
                            } else {
                                return errors
                                    .throw(803, Some(name.loc.clone()))
                                    .arg("name", stripped)
                                    .fail();
                            }
                            continue;
                        }

                        let Some(typ) = loaded.namespaces.names.get(&name.name) else {
                            let hinted = ["units", "dimensions"].iter().find(|kind| match **kind {
                                "units" => loaded.namespaces.units.contains_key(&name.name),
                                _ => loaded.namespaces.dimensions.contains_key(&name.name),
                            });
                            let mut diag = errors
                                .throw(804, Some(name.loc.clone()))
                                .arg("name", &name.name);
                            if let Some(kind) = hinted {
                                let singular = kind.trim_end_matches('s');
                                diag = diag.help(format!(
                                    "the module does export a {singular} named '{}', did you forget the '@' prefix?",
                                    name.name
                                ));
                            }
                            return diag.fail();
                        };

                        let local = def
                            .aliases
                            .get(i)
                            .and_then(|alias| alias.as_ref())
                            .map_or(&name.name, |alias| &alias.name);
                        ns.names.insert(local.clone(), typ.clone());
                    }

                    ns.imports
                        .insert(def.module.name.clone(), loaded.namespaces.clone());
                }
            }

            // interned nodes travel with the namespace so re-checks and
            // emission can dereference imported functions
            ns.nodes.extend(
                loaded
                    .namespaces
                    .nodes
                    .iter()
                    .map(|(k, v)| (*k, v.clone())),
            );
            ns.typed
                .extend(loaded.namespaces.typed.iter().map(|(k, v)| (*k, v.clone())));
        }
        Ok(())
    }
}

/// Concatenates the runtime prelude, every module's emitted code and the
/// root module's entry statements into one C translation unit.
pub fn link_program(loader: &Loader, root: &CompiledModule) -> String {
    let mut out = String::new();
    out.push_str(crate::emit::RUNTIME);
    out.push('\n');

    let mut seen = Vec::new();
    for compiled in loader.cache.values() {
        if compiled.uid != root.uid && !seen.contains(&compiled.uid) {
            seen.push(compiled.uid.clone());
            out.push_str(&compiled.code);
            out.push('\n');
        }
    }
    out.push_str(&root.code);
    out.push('\n');
    out.push_str(&root.main);
    out
}

/// Convenience wrapper: compile a single source string with the default
/// resolver. Used heavily by the test suites.
pub fn compile_source(source: &str) -> Result<Rc<CompiledModule>> {
    let mut loader = Loader::new(Resolver::default());
    loader.load_source("<main>", source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_uids_are_stable_per_path() {
        let a = module_uid(Path::new("a.nbis"));
        let b = module_uid(Path::new("a.nbis"));
        let c = module_uid(Path::new("b.nbis"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 8);
    }

    #[test]
    fn stdlib_resolves_before_search_paths() {
        let resolver = Resolver::default();
        assert!(matches!(resolver.resolve("si"), Some(Resolved::Embedded { .. })));
        assert!(resolver.resolve("missing_module").is_none());
    }

    #[test]
    fn compiles_a_simple_module() {
        let compiled = compile_source("unit m\nunit km = 1000 m\nx: Float[m] = 5 km\n").unwrap();
        assert_eq!(compiled.program.len(), 3);
        assert!(compiled.units.units.contains_key("km"));
    }

    #[test]
    fn imports_from_stdlib() {
        let compiled = compile_source("from si import @m, @s\nv = 10 m / 2 s\n").unwrap();
        assert!(compiled.namespaces.units.contains_key("m"));
        assert!(compiled.namespaces.dimensionized.contains_key("s"));
    }

    #[test]
    fn unknown_module_is_reported() {
        let err = compile_source("import nonexistent\n").unwrap_err();
        assert_eq!(err.code, 802);
    }

    #[test]
    fn unknown_export_is_reported() {
        let err = compile_source("from si import @frobnicate\n").unwrap_err();
        assert_eq!(err.code, 803);
    }
}
