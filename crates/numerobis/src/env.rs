//! Global namespaces and lexical scope layers.
//!
//! A [`Namespaces`] is the single per-module record every pass reads and
//! writes: name types, dimension and unit expressions, the interned node
//! table and its annotations. An [`Env`] is a lexical layer mapping short
//! names to *addresses* (the keys into `Namespaces`); shadowing allocates a
//! fresh address so closures can capture bindings by address.

use ahash::AHashMap;
use uuid::Uuid;

use crate::{
    ast::{AstNode, Link, NodeMeta},
    typecheck::types::Type,
    unit::Unit,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NsKind {
    Names,
    Dimensions,
    Units,
    Dimensionized,
}

#[derive(Debug, Clone, Default)]
pub struct Namespaces {
    pub names: AHashMap<String, Type>,
    pub dimensions: AHashMap<String, Unit>,
    pub units: AHashMap<String, Unit>,
    /// Per-unit base dimension, filled by the dimchecker.
    pub dimensionized: AHashMap<String, Unit>,
    pub imports: AHashMap<String, Namespaces>,
    /// Interned AST nodes, keyed by content hash.
    pub nodes: AHashMap<u64, AstNode>,
    /// Lowercase type tag per node, for the emitter.
    pub typed: AHashMap<u64, String>,
    /// Pass-attached annotations per node.
    pub meta: AHashMap<u64, NodeMeta>,
}

impl Namespaces {
    pub fn update(&mut self, other: &Self) {
        self.names
            .extend(other.names.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.dimensions
            .extend(other.dimensions.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.units
            .extend(other.units.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.dimensionized
            .extend(other.dimensionized.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.nodes
            .extend(other.nodes.iter().map(|(k, v)| (*k, v.clone())));
        self.typed
            .extend(other.typed.iter().map(|(k, v)| (*k, v.clone())));
        self.meta
            .extend(other.meta.iter().map(|(k, v)| (*k, v.clone())));
    }

    pub fn node(&self, link: Link) -> &AstNode {
        &self.nodes[&link.0]
    }

    pub fn meta_mut(&mut self, link: Link) -> &mut NodeMeta {
        self.meta.entry(link.0).or_default()
    }

    fn keys(&self, kind: NsKind) -> Box<dyn Iterator<Item = &String> + '_> {
        match kind {
            NsKind::Names => Box::new(self.names.keys()),
            NsKind::Dimensions => Box::new(self.dimensions.keys()),
            NsKind::Units => Box::new(self.units.keys()),
            NsKind::Dimensionized => Box::new(self.dimensionized.keys()),
        }
    }

    /// Closest existing name for "did you mean" suggestions.
    pub fn suggest(&self, kind: NsKind, name: &str) -> Option<String> {
        suggest_from(self.keys(kind), name)
    }
}

/// Jaro-Winkler match with the same ~0.6 cutoff difflib uses.
fn suggest_from<'a>(keys: impl Iterator<Item = &'a String>, name: &str) -> Option<String> {
    keys.map(|key| (strsim::jaro_winkler(key, name), key))
        .filter(|(score, _)| *score >= 0.6)
        .max_by(|(a, _), (b, _)| a.total_cmp(b))
        .map(|(_, key)| key.clone())
}

/// A lexical scope layer. Short names resolve to addresses; the values live
/// in the shared [`Namespaces`].
#[derive(Debug, Clone, Default)]
pub struct Env {
    pub names: AHashMap<String, String>,
    pub dimensions: AHashMap<String, String>,
    pub units: AHashMap<String, String>,
    /// The function whose body is currently being checked, if any.
    pub function: Option<std::rc::Rc<crate::typecheck::types::FunctionSig>>,
    pub level: i32,
}

impl Env {
    /// The root layer: every pre-existing global resolves to itself.
    pub fn root(ns: &Namespaces) -> Self {
        Self {
            names: ns.names.keys().map(|k| (k.clone(), k.clone())).collect(),
            dimensions: ns.dimensions.keys().map(|k| (k.clone(), k.clone())).collect(),
            units: ns.units.keys().map(|k| (k.clone(), k.clone())).collect(),
            function: None,
            level: 0,
        }
    }

    /// A child layer; bindings made in it shadow instead of overwrite.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            names: self.names.clone(),
            dimensions: self.dimensions.clone(),
            units: self.units.clone(),
            function: self.function.clone(),
            level: self.level + 1,
        }
    }

    pub fn get_name(&self, ns: &Namespaces, name: &str) -> Option<Type> {
        let address = self.names.get(name)?;
        ns.names.get(address).cloned()
    }

    pub fn address_of(&self, name: &str) -> Option<&String> {
        self.names.get(name)
    }

    /// Binds `name`, allocating a fresh shadowing address above level 0
    /// unless one is supplied.
    pub fn set_name(
        &mut self,
        ns: &mut Namespaces,
        name: &str,
        value: Type,
        address: Option<String>,
    ) -> String {
        let address = address.unwrap_or_else(|| {
            if self.level > 0 {
                format!("{name}-{}", Uuid::new_v4())
            } else {
                name.to_owned()
            }
        });
        ns.names.insert(address.clone(), value);
        self.names.insert(name.to_owned(), address.clone());
        address
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typecheck::types::{Type, TypeKind};

    #[test]
    fn root_level_uses_names_as_addresses() {
        let mut ns = Namespaces::default();
        let mut env = Env::root(&ns);
        let address = env.set_name(&mut ns, "x", Type::new(TypeKind::Bool), None);
        assert_eq!(address, "x");
        assert!(ns.names.contains_key("x"));
    }

    #[test]
    fn child_level_allocates_shadowing_addresses() {
        let mut ns = Namespaces::default();
        let mut env = Env::root(&ns);
        env.set_name(&mut ns, "x", Type::new(TypeKind::Bool), None);

        let mut child = env.child();
        assert_eq!(child.level, 1);
        let address = child.set_name(&mut ns, "x", Type::new(TypeKind::Str), None);
        assert_ne!(address, "x");
        assert!(address.starts_with("x-"));

        // the child resolves to the shadow, the parent still to the original
        assert_eq!(child.get_name(&ns, "x").unwrap().kind, TypeKind::Str);
        assert_eq!(env.get_name(&ns, "x").unwrap().kind, TypeKind::Bool);
    }

    #[test]
    fn get_returns_last_set_at_innermost_scope() {
        let mut ns = Namespaces::default();
        let mut env = Env::root(&ns);
        env.set_name(&mut ns, "x", Type::new(TypeKind::Bool), None);
        env.set_name(&mut ns, "x", Type::new(TypeKind::Str), None);
        assert_eq!(env.get_name(&ns, "x").unwrap().kind, TypeKind::Str);
    }

    #[test]
    fn suggestions_have_a_cutoff() {
        let mut ns = Namespaces::default();
        ns.dimensions.insert("Length".into(), Unit::one());
        assert_eq!(ns.suggest(NsKind::Dimensions, "Lenght"), Some("Length".into()));
        assert_eq!(ns.suggest(NsKind::Dimensions, "xyz"), None);
    }
}
