//! Structural method tables for the built-in types.
//!
//! Operator and protocol dispatch (`__add__`, `__getitem__`, `__bool__`, …)
//! looks methods up by the operand's type tag. Tables are built on demand;
//! they are small and the construction is cheap compared to a check pass.

use ahash::AHashMap;

use crate::{
    typecheck::types::{FunctionSig, Type, TypeKind, VarEnv},
    unit::Unit,
};

/// Primitive type names reserved by the language. Also the set the parser
/// accepts in annotation position.
pub const TYPE_NAMES: &[&str] = &[
    "Any", "Int", "Float", "Bool", "Str", "List", "Range", "Function", "Dimension", "None",
];

#[derive(Debug, Clone)]
pub enum Method {
    Function(FunctionSig),
    Overload(Vec<FunctionSig>),
}

impl Method {
    /// First signature whose parameters accept the arguments.
    pub fn check(&self, varenv: &mut VarEnv, args: &[Type]) -> Option<FunctionSig> {
        match self {
            Self::Function(sig) => sig.check_args(varenv, args),
            Self::Overload(sigs) => sigs.iter().find_map(|sig| sig.check_args(varenv, args)),
        }
    }
}

/// The method table of a single built-in type.
#[derive(Debug, Clone, Default)]
pub struct Struct {
    fields: AHashMap<&'static str, Method>,
}

impl Struct {
    pub fn get(&self, method: &str) -> Option<&Method> {
        self.fields.get(method)
    }

    pub fn has(&self, method: &str) -> bool {
        self.fields.contains_key(method)
    }

    fn insert(&mut self, name: &'static str, method: Method) {
        self.fields.insert(name, method);
    }
}

const ARITH_OPS: &[&'static str] = &[
    "__add__", "__sub__", "__mul__", "__div__", "__mod__", "__pow__",
];
const ORDER_OPS: &[&'static str] = &["__lt__", "__gt__", "__le__", "__ge__"];

fn number_overload() -> Method {
    Method::Overload(vec![
        FunctionSig::of(vec![Type::int(), Type::int()], Type::int()),
        FunctionSig::of(vec![Type::int(), Type::float()], Type::float()),
        FunctionSig::of(vec![Type::float(), Type::float()], Type::float()),
        FunctionSig::of(vec![Type::float(), Type::int()], Type::float()),
    ])
}

fn bool_number_overload() -> Method {
    Method::Overload(vec![
        FunctionSig::of(vec![Type::int(), Type::int()], Type::new(TypeKind::Bool)),
        FunctionSig::of(vec![Type::int(), Type::float()], Type::new(TypeKind::Bool)),
        FunctionSig::of(vec![Type::float(), Type::float()], Type::new(TypeKind::Bool)),
        FunctionSig::of(vec![Type::float(), Type::int()], Type::new(TypeKind::Bool)),
    ])
}

fn equality(table: &mut Struct) {
    for op in ["__eq__", "__ne__"] {
        table.insert(
            op,
            Method::Function(FunctionSig::of(
                vec![Type::never(), Type::never()],
                Type::new(TypeKind::Bool),
            )),
        );
    }
}

/// `__bool__`, `__str__`, … conversions from `this` to each target.
fn conversions(table: &mut Struct, this: &str, targets: &[&'static str]) {
    for target in targets {
        let name: &'static str = match *target {
            "Bool" => "__bool__",
            "Str" => "__str__",
            "Int" => "__int__",
            "Float" => "__float__",
            "List" => "__list__",
            _ => continue,
        };
        table.insert(
            name,
            Method::Function(FunctionSig::of(
                vec![Type::named(this).expect("known type")],
                Type::named(target).expect("known type"),
            )),
        );
    }
}

fn dimensionless_int() -> Type {
    Type::number(crate::typecheck::types::NumTyp::Int, Some(Unit::one()))
}

/// Builds the method table for a type tag. Unknown tags get an empty table.
pub fn methods_of(name: &str) -> Struct {
    let mut table = Struct::default();
    match name {
        "Int" | "Float" => {
            conversions(&mut table, name, &["Bool", "Str", "Int", "Float"]);
            for &op in ARITH_OPS {
                table.insert(op, number_overload());
            }
            for &op in ORDER_OPS {
                table.insert(op, bool_number_overload());
            }
            equality(&mut table);
        }
        "Bool" => {
            conversions(&mut table, "Bool", &["Bool", "Str"]);
            equality(&mut table);
        }
        "Str" => {
            conversions(&mut table, "Str", &["Bool"]);
            table.insert(
                "__add__",
                Method::Function(FunctionSig::of(
                    vec![Type::new(TypeKind::Str), Type::new(TypeKind::Str)],
                    Type::new(TypeKind::Str),
                )),
            );
            table.insert(
                "__mul__",
                Method::Function(FunctionSig::of(
                    vec![Type::new(TypeKind::Str), dimensionless_int()],
                    Type::new(TypeKind::Str),
                )),
            );
            table.insert(
                "__getitem__",
                Method::Overload(vec![
                    FunctionSig::of(
                        vec![Type::new(TypeKind::Str), Type::int()],
                        Type::new(TypeKind::Str),
                    ),
                    FunctionSig::of(
                        vec![Type::new(TypeKind::Str), Type::new(TypeKind::Slice)],
                        Type::new(TypeKind::Str),
                    ),
                ]),
            );
            for &op in ORDER_OPS {
                table.insert(
                    op,
                    Method::Function(FunctionSig::of(
                        vec![Type::new(TypeKind::Str), Type::new(TypeKind::Str)],
                        Type::new(TypeKind::Bool),
                    )),
                );
            }
            equality(&mut table);
        }
        "List" => {
            conversions(&mut table, "List", &["Bool", "Str"]);
            table.insert(
                "__add__",
                Method::Function(FunctionSig::of(
                    vec![Type::list(Type::var("T")), Type::list(Type::var("T"))],
                    Type::list(Type::var("T")),
                )),
            );
            table.insert(
                "__mul__",
                Method::Function(FunctionSig::of(
                    vec![Type::list(Type::var("T")), dimensionless_int()],
                    Type::list(Type::var("T")),
                )),
            );
            table.insert(
                "__getitem__",
                Method::Overload(vec![
                    FunctionSig::of(
                        vec![Type::list(Type::var("T")), Type::int()],
                        Type::var("T"),
                    ),
                    FunctionSig::of(
                        vec![Type::list(Type::var("T")), Type::new(TypeKind::Slice)],
                        Type::list(Type::var("T")),
                    ),
                ]),
            );
            table.insert(
                "__setitem__",
                Method::Function(FunctionSig::of(
                    vec![Type::list(Type::var("T")), Type::int(), Type::var("T")],
                    Type::new(TypeKind::None),
                )),
            );
            for &op in ORDER_OPS {
                table.insert(
                    op,
                    Method::Function(FunctionSig::of(
                        vec![Type::list(Type::never()), Type::list(Type::never())],
                        Type::new(TypeKind::Bool),
                    )),
                );
            }
            equality(&mut table);
        }
        "Range" | "Function" | "None" => {
            equality(&mut table);
        }
        _ => {}
    }
    table
}

/// Looks a single method up on a type tag.
pub fn lookup(type_name: &str, method: &str) -> Option<Method> {
    methods_of(type_name).fields.remove(method)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_add_promotes_to_float() {
        let mut varenv = VarEnv::default();
        let method = lookup("Int", "__add__").unwrap();
        let resolved = method.check(&mut varenv, &[Type::int(), Type::float()]).unwrap();
        assert_eq!(resolved.return_type.name(), "Float");
        let resolved = method.check(&mut varenv, &[Type::int(), Type::int()]).unwrap();
        assert_eq!(resolved.return_type.name(), "Int");
    }

    #[test]
    fn list_getitem_is_generic() {
        let mut varenv = VarEnv::default();
        let method = lookup("List", "__getitem__").unwrap();
        let resolved = method
            .check(&mut varenv, &[Type::list(Type::new(TypeKind::Str)), Type::int()])
            .unwrap();
        assert_eq!(resolved.return_type.name(), "Str");

        // slicing returns the list type itself
        let resolved = method
            .check(
                &mut varenv,
                &[Type::list(Type::new(TypeKind::Str)), Type::new(TypeKind::Slice)],
            )
            .unwrap();
        assert_eq!(resolved.return_type.name(), "List");
    }

    #[test]
    fn any_has_no_methods() {
        assert!(lookup("Any", "__bool__").is_none());
        assert!(lookup("Dimension", "__add__").is_none());
    }

    #[test]
    fn bool_supports_bool() {
        assert!(methods_of("Bool").has("__bool__"));
        assert!(methods_of("Str").has("__bool__"));
        assert!(!methods_of("Function").has("__bool__"));
    }
}
