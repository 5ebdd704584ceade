//! C code generation.
//!
//! Walks the linked node table and produces C against the small runtime
//! prelude in `runtime.h`: every value is a tagged `NbsValue`, operators
//! lower to `nbs_*` helpers, and each unit gets a forward and an inverse
//! conversion function built from the preprocessor's expressions.

use std::rc::Rc;

use ahash::{AHashMap, AHashSet};

use crate::{
    ast::{Annotation, AstNode, Link, OpKind},
    env::Namespaces,
    errors::{ModuleMeta, Result},
    preprocess::CompiledUnits,
    unit::{Unit, UnitKind},
};

pub const RUNTIME: &str = include_str!("runtime.h");

pub struct Emitter {
    #[expect(dead_code, reason = "kept for diagnostics parity with other passes")]
    module: Rc<ModuleMeta>,
    uid: String,
}

struct FnInfo {
    params: Vec<String>,
    defaults: AHashMap<String, String>,
}

struct Ctx<'a> {
    ns: &'a Namespaces,
    functions: String,
    scopes: Vec<AHashSet<String>>,
    fn_infos: AHashMap<String, FnInfo>,
}

impl Emitter {
    pub fn new(module: Rc<ModuleMeta>, uid: String) -> Self {
        Self { module, uid }
    }

    /// Returns `(code, main)`: the module's function and conversion
    /// definitions, and the entry statements for the root module.
    pub fn emit(
        &self,
        program: &[Link],
        ns: &Namespaces,
        units: &CompiledUnits,
    ) -> Result<(String, String)> {
        let mut code = format!("/* module {} */\n", self.uid);

        for (name, forward) in &units.units {
            code.push_str(&format!(
                "static double nbs_fwd_{}(double x) {{ return {}; }}\n",
                sanitize(name),
                unit_c(forward)
            ));
        }
        for (name, inverse) in &units.inverted {
            code.push_str(&format!(
                "static double nbs_inv_{}(double x) {{ return {}; }}\n",
                sanitize(name),
                unit_c(inverse)
            ));
        }

        let mut ctx = Ctx {
            ns,
            functions: String::new(),
            scopes: vec![AHashSet::new()],
            fn_infos: AHashMap::new(),
        };

        let mut body = String::new();
        for link in program {
            let stmt = ctx.stmt(&AstNode::Link(*link), 1);
            body.push_str(&stmt);
        }

        code.push_str(&ctx.functions);
        let main = format!("int main(void) {{\n{body}    return 0;\n}}\n");
        Ok((code, main))
    }
}

/// A C identifier fragment for a source name.
fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else {
            out.push('_');
        }
    }
    if out.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

/// Renders a conversion expression over the runtime input `x`.
fn unit_c(unit: &Unit) -> String {
    match &unit.kind {
        UnitKind::Expression(inner) => unit_c(inner),
        UnitKind::One => "1.0".to_owned(),
        UnitKind::Scalar(scalar) => {
            let repr = scalar.value.normalize().to_string();
            if repr.contains('.') || repr.contains('e') {
                repr
            } else {
                format!("{repr}.0")
            }
        }
        UnitKind::Identifier(name) if name == "x" || name == "_" => "x".to_owned(),
        UnitKind::Identifier(name) => format!("nbs_fwd_{}(x)", sanitize(name)),
        UnitKind::Constant(name) => format!("nbs_param_{}", sanitize(name)),
        UnitKind::Neg(value) => format!("-({})", unit_c(value)),
        UnitKind::Product(values) => {
            let parts: Vec<String> = values.iter().map(unit_c).collect();
            format!("({})", parts.join(" * "))
        }
        UnitKind::Sum(values) => {
            let parts: Vec<String> = values.iter().map(unit_c).collect();
            format!("({})", parts.join(" + "))
        }
        UnitKind::Power { base, exponent } => {
            format!("pow({}, {})", unit_c(base), unit_c(exponent))
        }
        UnitKind::Call { callee, args } => {
            let parts: Vec<String> = args.iter().map(|arg| unit_c(&arg.value)).collect();
            match &callee.kind {
                UnitKind::Identifier(name) if name == "logn" => {
                    format!("nbs_logn({})", parts.join(", "))
                }
                _ => format!("({})", parts.join(", ")),
            }
        }
    }
}

fn indent(level: usize) -> String {
    "    ".repeat(level)
}

impl Ctx<'_> {
    fn node(&self, reference: &AstNode) -> AstNode {
        match reference {
            AstNode::Link(link) => self.ns.nodes[&link.0].clone(),
            other => other.clone(),
        }
    }

    fn declared(&self, name: &str) -> bool {
        self.scopes.iter().any(|scope| scope.contains(name))
    }

    fn stmt(&mut self, reference: &AstNode, level: usize) -> String {
        let pad = indent(level);
        let node = self.node(reference);
        match &node {
            AstNode::UnitDefinition(_)
            | AstNode::DimensionDefinition(_)
            | AstNode::Import(_)
            | AstNode::FromImport(_) => String::new(),

            AstNode::Variable { name, value, .. } => {
                let value_node = self.node(value);
                if let AstNode::Function { .. } = value_node {
                    self.lift_function(&name.name, &value_node);
                    return String::new();
                }
                let rendered = self.expr(value);
                let var = format!("nbs_v_{}", sanitize(&name.name));
                if self.declared(&name.name) {
                    format!("{pad}{var} = {rendered};\n")
                } else {
                    self.scopes.last_mut().expect("scope").insert(name.name.clone());
                    format!("{pad}NbsValue {var} = {rendered};\n")
                }
            }

            AstNode::VariableDeclaration { name, .. } => {
                self.scopes.last_mut().expect("scope").insert(name.name.clone());
                format!("{pad}NbsValue nbs_v_{} = nbs_none();\n", sanitize(&name.name))
            }

            AstNode::Function { name: Some(name), .. } => {
                self.lift_function(&name.name, &node);
                String::new()
            }

            AstNode::Block { body, .. } => {
                self.scopes.push(AHashSet::new());
                let mut out = format!("{pad}{{\n");
                for statement in body {
                    out.push_str(&self.stmt(statement, level + 1));
                }
                out.push_str(&format!("{pad}}}\n"));
                self.scopes.pop();
                out
            }

            AstNode::If { condition, then_branch, else_branch, expression, .. } => {
                if *expression {
                    let rendered = self.expr(&node.clone());
                    return format!("{pad}(void)({rendered});\n");
                }
                let mut out = format!(
                    "{pad}if (nbs_truthy({})) {{\n",
                    self.expr(condition)
                );
                out.push_str(&self.braced_body(then_branch, level + 1));
                out.push_str(&format!("{pad}}}"));
                if let Some(else_branch) = else_branch {
                    out.push_str(" else {\n");
                    out.push_str(&self.braced_body(else_branch, level + 1));
                    out.push_str(&format!("{pad}}}"));
                }
                out.push('\n');
                out
            }

            AstNode::ForLoop { iterators, iterable, body, .. } => {
                let iterable_c = self.expr(iterable);
                self.scopes.push(AHashSet::new());
                for iterator in iterators {
                    self.scopes.last_mut().expect("scope").insert(iterator.name.clone());
                }
                let mut out = format!(
                    "{pad}{{\n{pad}    NbsValue nbs_it = {iterable_c};\n{pad}    for (int64_t nbs_i = 0; nbs_i < nbs_len(nbs_it); nbs_i++) {{\n"
                );
                if iterators.len() == 1 {
                    out.push_str(&format!(
                        "{pad}        NbsValue nbs_v_{} = nbs_iter_get(nbs_it, nbs_i);\n",
                        sanitize(&iterators[0].name)
                    ));
                } else {
                    out.push_str(&format!(
                        "{pad}        NbsValue nbs_el = nbs_iter_get(nbs_it, nbs_i);\n"
                    ));
                    for (i, iterator) in iterators.iter().enumerate() {
                        out.push_str(&format!(
                            "{pad}        NbsValue nbs_v_{} = nbs_index(nbs_el, nbs_int({i}));\n",
                            sanitize(&iterator.name)
                        ));
                    }
                }
                out.push_str(&self.braced_body(body, level + 2));
                out.push_str(&format!("{pad}    }}\n{pad}}}\n"));
                self.scopes.pop();
                out
            }

            AstNode::WhileLoop { condition, body, .. } => {
                let mut out = format!(
                    "{pad}while (nbs_truthy({})) {{\n",
                    self.expr(condition)
                );
                out.push_str(&self.braced_body(body, level + 1));
                out.push_str(&format!("{pad}}}\n"));
                out
            }

            AstNode::Return { value, .. } => match value {
                Some(value) => format!("{pad}return {};\n", self.expr(value)),
                None => format!("{pad}return nbs_none();\n"),
            },

            AstNode::Break { .. } => format!("{pad}break;\n"),
            AstNode::Continue { .. } => format!("{pad}continue;\n"),

            AstNode::IndexAssignment { target, value, .. } => {
                let AstNode::Index { iterable, index, .. } = self.node(target) else {
                    return String::new();
                };
                format!(
                    "{pad}nbs_setindex({}, {}, {});\n",
                    self.expr(&iterable),
                    self.expr(&index),
                    self.expr(value)
                )
            }

            _ => format!("{pad}(void)({});\n", self.expr(&node)),
        }
    }

    /// The statements of a loop or branch body, without the outer braces.
    fn braced_body(&mut self, body: &AstNode, level: usize) -> String {
        let node = self.node(body);
        if let AstNode::Block { body, .. } = &node {
            self.scopes.push(AHashSet::new());
            let mut out = String::new();
            for statement in body {
                out.push_str(&self.stmt(statement, level));
            }
            self.scopes.pop();
            out
        } else {
            self.stmt(&node, level)
        }
    }

    fn lift_function(&mut self, name: &str, node: &AstNode) {
        let AstNode::Function { params, body, .. } = node else { return };

        let mut param_names = Vec::new();
        let mut defaults = AHashMap::new();
        for param in params {
            let AstNode::Param { name: pname, default, .. } = self.node(param) else { continue };
            if let Some(default) = &default {
                defaults.insert(pname.name.clone(), self.expr(default));
            }
            param_names.push(pname.name.clone());
        }

        let c_name = format!("nbs_fn_{}", sanitize(name));
        self.fn_infos.insert(
            name.to_owned(),
            FnInfo { params: param_names.clone(), defaults },
        );

        let signature: Vec<String> = param_names
            .iter()
            .map(|p| format!("NbsValue nbs_v_{}", sanitize(p)))
            .collect();
        let signature = if signature.is_empty() {
            "void".to_owned()
        } else {
            signature.join(", ")
        };

        self.scopes.push(param_names.iter().cloned().collect());
        let body_c = match body.as_deref() {
            Some(body) => {
                let body_node = self.node(body);
                if matches!(body_node, AstNode::Block { .. }) {
                    let mut out = self.braced_body(body, 1);
                    out.push_str("    return nbs_none();\n");
                    out
                } else {
                    format!("    return {};\n", self.expr(body))
                }
            }
            None => "    return nbs_none();\n".to_owned(),
        };
        self.scopes.pop();

        self.functions
            .push_str(&format!("static NbsValue {c_name}({signature}) {{\n{body_c}}}\n"));
    }

    fn expr(&mut self, reference: &AstNode) -> String {
        let node = self.node(reference);
        match &node {
            AstNode::Integer(lit) => {
                let value = number_value(&lit.value, &lit.exponent);
                if value.fract() == 0.0 && value.abs() < 9.2e18 {
                    format!("nbs_int({}LL)", value as i64)
                } else {
                    format!("nbs_int((int64_t)({}))", float_lit(value))
                }
            }
            AstNode::Float(lit) => {
                format!("nbs_float({})", float_lit(number_value(&lit.value, &lit.exponent)))
            }
            AstNode::Str { value, .. } => format!("nbs_str(\"{value}\")"),
            AstNode::Boolean { value, .. } => format!("nbs_bool({value})"),
            AstNode::Identifier(ident) => format!("nbs_v_{}", sanitize(&ident.name)),

            AstNode::List { items, .. } => {
                if items.is_empty() {
                    return "nbs_list(0, (NbsValue[]){nbs_none()})".to_owned();
                }
                let parts: Vec<String> = items.iter().map(|item| self.expr(item)).collect();
                format!("nbs_list({}, (NbsValue[]){{{}}})", items.len(), parts.join(", "))
            }

            AstNode::BinOp { op, left, right, .. } => {
                let helper = match op.kind {
                    OpKind::Add => "nbs_add",
                    OpKind::Sub => "nbs_sub",
                    OpKind::Mul => "nbs_mul",
                    OpKind::Div => "nbs_div",
                    OpKind::IntDiv => "nbs_intdiv",
                    OpKind::Mod => "nbs_mod",
                    OpKind::Pow => "nbs_pow",
                    _ => "nbs_add",
                };
                format!("{helper}({}, {})", self.expr(left), self.expr(right))
            }

            AstNode::BoolOp { op, left, right, .. } => {
                let c_op = match op.kind {
                    OpKind::And => "&&",
                    OpKind::Or => "||",
                    _ => "^",
                };
                format!(
                    "nbs_bool(nbs_truthy({}) {c_op} nbs_truthy({}))",
                    self.expr(left),
                    self.expr(right)
                )
            }

            AstNode::UnaryOp { op, operand, .. } => match op.kind {
                OpKind::Not => format!("nbs_bool(!nbs_truthy({}))", self.expr(operand)),
                _ => format!("nbs_neg({})", self.expr(operand)),
            },

            AstNode::Compare { ops, left, comparators, .. } => {
                let mut values = vec![self.expr(left)];
                values.extend(comparators.iter().map(|c| self.expr(c)));
                let mut parts = Vec::new();
                for (i, op) in ops.iter().enumerate() {
                    let (a, b) = (&values[i], &values[i + 1]);
                    parts.push(match op.kind {
                        OpKind::Eq => format!("nbs_eq({a}, {b})"),
                        OpKind::Ne => format!("!nbs_eq({a}, {b})"),
                        OpKind::Lt => format!("nbs_lt({a}, {b})"),
                        OpKind::Le => format!("nbs_le({a}, {b})"),
                        OpKind::Gt => format!("nbs_gt({a}, {b})"),
                        _ => format!("nbs_ge({a}, {b})"),
                    });
                }
                format!("nbs_bool({})", parts.join(" && "))
            }

            AstNode::If { condition, then_branch, else_branch, .. } => {
                let else_c = else_branch
                    .as_ref()
                    .map_or_else(|| "nbs_none()".to_owned(), |branch| self.expr(branch));
                format!(
                    "(nbs_truthy({}) ? {} : {else_c})",
                    self.expr(condition),
                    self.expr(then_branch)
                )
            }

            AstNode::Call { callee, args, .. } => self.call(callee, args),

            AstNode::Index { iterable, index, .. } => {
                let index_node = self.node(index);
                if let AstNode::Slice { start, stop, step, .. } = &index_node {
                    let part = |slot: &Option<Box<AstNode>>, ctx: &mut Self| {
                        slot.as_ref()
                            .map_or_else(|| "nbs_none()".to_owned(), |n| ctx.expr(n))
                    };
                    let (start, stop, step) =
                        (part(start, self), part(stop, self), part(step, self));
                    return format!("nbs_slice({}, {start}, {stop}, {step})", self.expr(iterable));
                }
                format!("nbs_index({}, {})", self.expr(iterable), self.expr(index))
            }

            AstNode::Range { start, end, step, .. } => {
                let step_c = step
                    .as_ref()
                    .map_or_else(|| "1.0".to_owned(), |s| format!("nbs_num({})", self.expr(s)));
                format!(
                    "nbs_range((int64_t)nbs_num({}), (int64_t)nbs_num({}), {step_c})",
                    self.expr(start),
                    self.expr(end)
                )
            }

            AstNode::Conversion { value, target, .. } => {
                let value_c = self.expr(value);
                match target {
                    Annotation::Type { name, .. } => match name.name.as_str() {
                        "Int" => format!("nbs_to_int({value_c})"),
                        "Float" => format!("nbs_to_float({value_c})"),
                        "Bool" => format!("nbs_to_bool({value_c})"),
                        "Str" => format!("nbs_to_str({value_c})"),
                        _ => value_c,
                    },
                    Annotation::Unit(unit) => {
                        let inner = unit.clone().unwrap_expression();
                        if let UnitKind::Identifier(name) = &inner.kind {
                            return format!("nbs_convert({value_c}, nbs_inv_{})", sanitize(name));
                        }
                        // a compound target only re-tags the dimension
                        value_c
                    }
                    Annotation::Function(_) => value_c,
                }
            }

            AstNode::Function { .. } => {
                // anonymous function in expression position: lift under a
                // synthetic name and reference it through its wrapper
                let name = format!("anon_{}", self.fn_infos.len());
                self.lift_function(&name, &node);
                format!("nbs_none() /* {name} */")
            }

            AstNode::UnitReference { .. } => "nbs_none()".to_owned(),
            AstNode::Block { .. } => "nbs_none()".to_owned(),
            _ => "nbs_none()".to_owned(),
        }
    }

    fn call(&mut self, callee: &AstNode, args: &[AstNode]) -> String {
        let mut positional = Vec::new();
        let mut named: AHashMap<String, String> = AHashMap::new();
        for arg in args {
            let AstNode::CallArg { name, value, .. } = self.node(arg) else { continue };
            let rendered = self.expr(&value);
            match name {
                Some(ident) => {
                    named.insert(ident.name.clone(), rendered);
                }
                None => positional.push(rendered),
            }
        }

        let callee_node = self.node(callee);
        let AstNode::Identifier(ident) = &callee_node else {
            return "nbs_none()".to_owned();
        };

        match ident.name.as_str() {
            "echo" => {
                return format!(
                    "nbs_echo({})",
                    positional.first().cloned().unwrap_or_else(|| "nbs_none()".to_owned())
                );
            }
            "input" => {
                return format!(
                    "nbs_input({})",
                    positional.first().cloned().unwrap_or_else(|| "nbs_str(\"\")".to_owned())
                );
            }
            _ => {}
        }

        let Some(info) = self.fn_infos.get(&ident.name) else {
            return "nbs_none()".to_owned();
        };

        let mut ordered = Vec::with_capacity(info.params.len());
        for (i, param) in info.params.iter().enumerate() {
            if let Some(value) = positional.get(i) {
                ordered.push(value.clone());
            } else if let Some(value) = named.get(param) {
                ordered.push(value.clone());
            } else if let Some(default) = info.defaults.get(param) {
                ordered.push(default.clone());
            } else {
                ordered.push("nbs_none()".to_owned());
            }
        }
        format!("nbs_fn_{}({})", sanitize(&ident.name), ordered.join(", "))
    }
}

fn number_value(value: &str, exponent: &str) -> f64 {
    let mantissa: f64 = value.parse().unwrap_or(0.0);
    if exponent.is_empty() {
        return mantissa;
    }
    let exp: f64 = exponent.parse().unwrap_or(0.0);
    mantissa * 10f64.powf(exp)
}

fn float_lit(value: f64) -> String {
    let mut buffer = ryu::Buffer::new();
    buffer.format(value).to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::compile_source;
    use rust_decimal::Decimal;

    #[test]
    fn renders_unit_expressions() {
        let expr = Unit::product(vec![
            Unit::identifier("x", crate::location::Location::default()),
            Unit::scalar(Decimal::new(1, 3)),
        ]);
        assert_eq!(unit_c(&expr), "(x * 0.001)");

        let power = Unit::power(Unit::identifier("x", crate::location::Location::default()), Unit::scalar(Decimal::TWO));
        assert_eq!(unit_c(&power), "pow(x, 2.0)");
    }

    #[test]
    fn emits_conversion_functions_and_main() {
        let compiled = compile_source("unit m\nunit km = 1000 m\nx = 5 km\necho(x)\n").unwrap();
        assert!(compiled.code.contains("nbs_fwd_km"));
        assert!(compiled.code.contains("nbs_inv_km"));
        assert!(compiled.main.contains("nbs_v_x"));
        assert!(compiled.main.contains("nbs_echo"));
        // the literal arrives in base units
        assert!(compiled.main.contains("nbs_int(5000LL)"));
    }

    #[test]
    fn emits_functions_with_defaults() {
        let compiled =
            compile_source("add!(a: Int, b: Int = 2): Int = a + b\ny = add(1)\n").unwrap();
        assert!(compiled.code.contains("static NbsValue nbs_fn_add"));
        assert!(compiled.main.contains("nbs_fn_add(nbs_int(1LL), nbs_int(2LL))"));
    }

    #[test]
    fn emits_control_flow() {
        let compiled = compile_source(
            "xs = [1, 2, 3]\nfor x in xs do {\n  echo(x)\n}\nwhile false do {\n  break\n}\n",
        )
        .unwrap();
        assert!(compiled.main.contains("for (int64_t nbs_i"));
        assert!(compiled.main.contains("while (nbs_truthy"));
        assert!(compiled.main.contains("break;"));
    }
}
