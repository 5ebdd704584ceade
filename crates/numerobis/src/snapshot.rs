//! AST fingerprints for regression snapshots.
//!
//! A snapshot file maps test names to the SHA-512 of the parsed AST's
//! structure; changes to parsing or linking show up as fingerprint
//! mismatches without asserting on the whole tree.

use std::{collections::BTreeMap, path::Path};

use sha2::{Digest, Sha512};

use crate::ast::AstNode;

/// Stable hex digest of a statement forest.
pub fn fingerprint(ast: &[AstNode]) -> String {
    let mut hasher = Sha512::new();
    for node in ast {
        hasher.update(format!("{node:?}"));
        hasher.update([0]);
    }
    let digest = hasher.finalize();
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct Snapshots {
    #[serde(flatten)]
    pub entries: BTreeMap<String, String>,
}

impl Snapshots {
    pub fn load(path: &Path) -> std::io::Result<Self> {
        if !path.is_file() {
            return Ok(Self::default());
        }
        let source = std::fs::read_to_string(path)?;
        serde_json::from_str(&source).map_err(std::io::Error::other)
    }

    pub fn store(&self, path: &Path) -> std::io::Result<()> {
        let rendered = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, rendered)
    }

    /// Records a fingerprint; returns the previous one when it changed.
    pub fn record(&mut self, name: &str, digest: String) -> Option<String> {
        match self.entries.insert(name.to_owned(), digest.clone()) {
            Some(previous) if previous != digest => Some(previous),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{errors::ModuleMeta, lexer::lex, parser::parse};

    fn ast_of(source: &str) -> Vec<AstNode> {
        let module = ModuleMeta::new("<test>", source);
        let tokens = lex(source, std::rc::Rc::clone(&module)).unwrap();
        parse(tokens, module).unwrap().0
    }

    #[test]
    fn fingerprints_are_stable_and_content_sensitive() {
        let a = fingerprint(&ast_of("x = 1 + 2\n"));
        let b = fingerprint(&ast_of("x = 1 + 2\n"));
        let c = fingerprint(&ast_of("x = 1 + 3\n"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 128);
    }

    #[test]
    fn record_reports_changes() {
        let mut snapshots = Snapshots::default();
        assert!(snapshots.record("t", "abc".into()).is_none());
        assert!(snapshots.record("t", "abc".into()).is_none());
        assert_eq!(snapshots.record("t", "def".into()), Some("abc".into()));
    }
}
