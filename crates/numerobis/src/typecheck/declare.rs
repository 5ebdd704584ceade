//! Built-in declarations seeded into every module's root namespace.

use ahash::AHashMap;

use crate::typecheck::types::{FunctionSig, Type, TypeKind};

/// `echo(value)` prints any value; `input(prompt)` reads a line.
pub fn builtin_names() -> AHashMap<String, Type> {
    let mut names = AHashMap::new();
    names.insert(
        "echo".to_owned(),
        Type::function(FunctionSig::builtin(
            "echo",
            vec![Type::never()],
            &["value"],
            Type::new(TypeKind::None),
        )),
    );
    names.insert(
        "input".to_owned(),
        Type::function(FunctionSig::builtin(
            "input",
            vec![Type::new(TypeKind::Str)],
            &["prompt"],
            Type::new(TypeKind::Str),
        )),
    );
    names
}
