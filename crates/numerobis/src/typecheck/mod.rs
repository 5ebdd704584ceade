//! Bidirectional type inference over the linked AST.
//!
//! Each handler receives the current environment and, when it needs to
//! attach annotations, the node's link. Checking a node records a lowercase
//! type tag in `Namespaces::typed` for the emitter. All failures are
//! diagnostics; the unresolved-parameter signal used to defer functions
//! with unannotated parameters travels as a second error variant and is
//! intercepted by the owning function handler.

pub mod declare;
pub mod methods;
pub mod types;

use std::rc::Rc;

use rust_decimal::Decimal;

use crate::{
    algebra::Simplifier,
    ast::{Annotation, AstNode, Link, NumberLit, Op, OpKind, ResolvedMethod, Side},
    dimcheck::{Dimchecker, Mode},
    env::{Env, Namespaces},
    errors::{Diagnostic, Errors, ModuleMeta},
    link as linking,
    location::Location,
    typecheck::{
        methods::{lookup, methods_of},
        types::{
            dim_repr, dimcheck, nomismatch, unify, FunctionSig, Mismatch, NumTyp, Type, TypeKind,
            Unresolved, VarEnv,
        },
    },
    unit::Unit,
};

/// Internal result of checking one node.
pub(crate) enum Failure {
    Diag(Box<Diagnostic>),
    /// An `Any` parameter of the function at this link was used; the
    /// function must be re-checked per call site.
    Unresolved(Link),
}

impl From<Box<Diagnostic>> for Failure {
    fn from(diag: Box<Diagnostic>) -> Self {
        Self::Diag(diag)
    }
}

type Checked<T> = Result<T, Failure>;

pub struct Typechecker<'ns> {
    errors: Errors,
    simplifier: Simplifier,
    dimchecker: Dimchecker,
    varenv: VarEnv,
    ns: &'ns mut Namespaces,
}

/// Links the AST into the node table and type-checks every root statement.
pub fn typecheck(
    ast: Vec<AstNode>,
    module: Rc<ModuleMeta>,
    ns: &mut Namespaces,
) -> crate::errors::Result<Vec<Link>> {
    let program = linking::link(ast, &mut ns.nodes);

    let mut checker = Typechecker {
        errors: Errors::new(Rc::clone(&module)),
        simplifier: Simplifier::new(Rc::clone(&module)),
        dimchecker: Dimchecker::new(module),
        varenv: VarEnv::default(),
        ns,
    };

    let mut env = Env::root(checker.ns);
    for link in &program {
        match checker.check(&AstNode::Link(*link), &mut env) {
            Ok(_) => {}
            Err(Failure::Diag(diag)) => return Err(diag),
            // an unresolved parameter escaping to a root statement means no
            // function owned it; surface it as an unresolvable call
            Err(Failure::Unresolved(_)) => {
                return checker.errors.throw(507, None).arg("name", "").fail();
            }
        }
    }
    Ok(program)
}

impl Typechecker<'_> {
    fn node(&self, reference: &AstNode) -> AstNode {
        match reference {
            AstNode::Link(link) => self.ns.nodes[&link.0].clone(),
            other => other.clone(),
        }
    }

    fn check(&mut self, reference: &AstNode, env: &mut Env) -> Checked<Type> {
        let link = reference.as_link();
        let node = self.node(reference);

        let mut ret = match &node {
            AstNode::Integer(lit) => self.number(lit, NumTyp::Int, &mut env.child())?,
            AstNode::Float(lit) => self.number(lit, NumTyp::Float, &mut env.child())?,
            AstNode::Str { .. } => Type::new(TypeKind::Str),
            AstNode::Boolean { .. } => Type::new(TypeKind::Bool),

            // these mutate the caller's scope
            AstNode::Variable { .. } => self.variable(&node, env, link)?,
            AstNode::Function { .. } => self.function(&node, env, link)?,
            AstNode::BinOp { .. } => self.bin_op(&node, env, link)?,
            AstNode::Compare { .. } => self.compare(&node, env, link)?,

            AstNode::DimensionDefinition(_)
            | AstNode::UnitDefinition(_)
            | AstNode::Import(_)
            | AstNode::FromImport(_) => return Ok(Type::new(TypeKind::None)),

            _ => {
                let mut child = env.child();
                match &node {
                    AstNode::Block { .. } => self.block(&node, &mut child)?,
                    AstNode::BoolOp { .. } => self.bool_op(&node, &mut child)?,
                    AstNode::Call { .. } => self.call(&node, &mut child)?,
                    AstNode::Conversion { .. } => self.conversion(&node, &mut child)?,
                    AstNode::ForLoop { .. } => self.for_loop(&node, &mut child)?,
                    AstNode::Identifier(_) => self.identifier(&node, &child)?,
                    AstNode::If { .. } => self.if_(&node, &mut child)?,
                    AstNode::Index { .. } => self.index(&node, &mut child)?,
                    AstNode::IndexAssignment { .. } => {
                        self.index_assignment(&node, &mut child)?
                    }
                    AstNode::List { .. } => self.list(&node, &mut child)?,
                    AstNode::Range { .. } => self.range(&node, &mut child)?,
                    AstNode::Return { .. } => self.return_(&node, &mut child)?,
                    AstNode::Slice { .. } => self.slice(&node, &mut child)?,
                    AstNode::UnaryOp { .. } => self.unary_op(&node, &mut child)?,
                    AstNode::UnitReference { unit, .. } => self.unit_reference(unit)?,
                    AstNode::VariableDeclaration { .. } => {
                        self.variable_declaration(&node, env, link)?
                    }
                    AstNode::WhileLoop { .. } => self.while_loop(&node, &mut child)?,
                    AstNode::Break { .. } | AstNode::Continue { .. } => {
                        Type::new(TypeKind::None)
                    }
                    AstNode::Param { .. } | AstNode::CallArg { .. } | AstNode::Link(_) => {
                        unreachable!("checked through their parent")
                    }
                    _ => unreachable!("dispatched above"),
                }
            }
        };

        if let Some(link) = link {
            if ret.node.is_none() {
                ret.node = Some(link);
            }
            self.ns.typed.insert(link.0, ret.name().to_lowercase());
        }
        Ok(ret)
    }

    fn diag(&self, code: u16, loc: Option<Location>) -> Box<Diagnostic> {
        self.errors.throw(code, loc)
    }

    fn op_mismatch(&self, op: &Op, loc: Location, mismatch: &Mismatch, left: &Type, right: &Type) -> Failure {
        match mismatch.kind {
            types::MismatchKind::Dimension => {
                let operation = match op.kind {
                    OpKind::Add => "addition",
                    OpKind::Sub => "subtraction",
                    OpKind::Mod => "modulo operation",
                    other => other.symbol(),
                };
                self.diag(703, Some(loc))
                    .arg("operation", operation)
                    .arg("left", &mismatch.left)
                    .arg("right", &mismatch.right)
                    .into()
            }
            types::MismatchKind::Type => self
                .diag(502, Some(loc))
                .arg("operation", op.kind.symbol())
                .arg("left", left)
                .arg("right", right)
                .into(),
        }
    }

    /// Method dispatch for non-numeric operands: `__op__` on the left, then
    /// `__rop__` and `__op__` on the right. Records the resolved method for
    /// the emitter.
    fn dispatch_method(
        &mut self,
        op: &Op,
        left: &Type,
        right: &Type,
    ) -> Option<(ResolvedMethod, FunctionSig)> {
        let candidates = [
            (left, format!("__{}__", op.kind), Side::Left),
            (right, format!("__r{}__", op.kind), Side::Right),
            (right, format!("__{}__", op.kind), Side::Right),
        ];
        for (operand, method_name, side) in candidates {
            let Some(method) = lookup(operand.name(), &method_name) else {
                continue;
            };
            let args = match side {
                Side::Left => [left.clone(), right.clone()],
                Side::Right if method_name.starts_with("__r") => [left.clone(), right.clone()],
                Side::Right => [right.clone(), left.clone()],
            };
            if let Some(checked) = method.check(&mut self.varenv, &args) {
                let resolved = ResolvedMethod {
                    side,
                    name: format!("{}{}", operand.name().to_lowercase(), method_name),
                    operands: (left.name().to_lowercase(), right.name().to_lowercase()),
                };
                return Some((resolved, checked));
            }
        }
        None
    }

    /// Checks dimensional consistency in mathematical operations.
    fn bin_op(&mut self, node: &AstNode, env: &mut Env, link: Option<Link>) -> Checked<Type> {
        let AstNode::BinOp { op, left, right, loc } = node else { unreachable!() };
        let left_t = self.check(left, env)?;
        let right_t = self.check(right, env)?;

        let numeric = |t: &Type| t.is(&["Int", "Float", "Dimension"]);
        if !(numeric(&left_t) && numeric(&right_t)) {
            let Some((resolved, checked)) = self.dispatch_method(op, &left_t, &right_t) else {
                let mismatch = Mismatch {
                    kind: types::MismatchKind::Type,
                    left: left_t.to_string(),
                    right: right_t.to_string(),
                };
                return Err(self.op_mismatch(op, loc.clone(), &mismatch, &left_t, &right_t));
            };
            if let Some(link) = link {
                self.ns.meta_mut(link).method = Some(resolved);
            }
            return Ok(checked.return_type);
        }

        let promoted = if left_t.is(&["Float"]) || right_t.is(&["Float"]) {
            NumTyp::Float
        } else {
            NumTyp::Int
        };

        match op.kind {
            OpKind::Add | OpKind::Sub | OpKind::Mod => {
                if !dimcheck(&left_t, &right_t) {
                    let mismatch = Mismatch {
                        kind: types::MismatchKind::Dimension,
                        left: dim_repr(left_t.dim()),
                        right: dim_repr(right_t.dim()),
                    };
                    return Err(self.op_mismatch(op, loc.clone(), &mismatch, &left_t, &right_t));
                }
                if op.kind == OpKind::Mod {
                    return Ok(left_t);
                }
                Ok(Type::number(promoted, left_t.dim().cloned()))
            }
            OpKind::Mul | OpKind::Div | OpKind::IntDiv => {
                // true division always yields a float, matching the runtime
                let promoted = match op.kind {
                    OpKind::Div => NumTyp::Float,
                    OpKind::IntDiv => NumTyp::Int,
                    _ => promoted,
                };

                let dim = if right_t.has_dim() {
                    let left_dim = left_t.dim().cloned().unwrap_or_else(Unit::one);
                    let mut right_dim = right_t.dim().cloned().unwrap_or_else(Unit::one);
                    if op.kind != OpKind::Mul {
                        right_dim = Unit::power(right_dim, Unit::scalar(-Decimal::ONE));
                    }
                    let dimension = self
                        .simplifier
                        .simplify(&Unit::product(vec![left_dim, right_dim]), true)
                        .map_err(Failure::Diag)?;
                    dimension.is_truthy().then_some(dimension)
                } else {
                    left_t.dim().cloned()
                };

                if left_t.is(&["Dimension"]) || right_t.is(&["Dimension"]) {
                    return Ok(Type::new(TypeKind::Dimension {
                        dim: dim.unwrap_or_else(Unit::one),
                    }));
                }
                Ok(Type::number(promoted, dim))
            }
            OpKind::Pow => {
                if right_t.has_dim() {
                    return Err(self
                        .diag(101, Some(right.loc()))
                        .arg("value", format!(", not {}", dim_repr(right_t.dim())))
                        .into());
                }
                let exponent_value = match &right_t.kind {
                    TypeKind::Number { value, .. } => *value,
                    _ => 0.0,
                };
                let float_result = left_t.is(&["Float"])
                    || right_t.is(&["Float"])
                    || exponent_value.fract() != 0.0;
                let typ = if float_result { NumTyp::Float } else { NumTyp::Int };

                if !left_t.has_dim() {
                    return Ok(Type::number(typ, left_t.dim().cloned()));
                }
                let base_dim = left_t.dim().cloned().unwrap_or_else(Unit::one);
                let exponent =
                    Unit::scalar(Decimal::try_from(exponent_value).unwrap_or(Decimal::ZERO));
                let dimension = self
                    .simplifier
                    .simplify(&Unit::power(base_dim, exponent), true)
                    .map_err(Failure::Diag)?;
                Ok(Type::number(typ, Some(dimension)))
            }
            _ => unreachable!("not a binary operator: {op:?}"),
        }
    }

    fn block(&mut self, node: &AstNode, env: &mut Env) -> Checked<Type> {
        let AstNode::Block { body, loc } = node else { unreachable!() };
        let mut returns: Option<Type> = None;

        // a block yields the type flowing out of its `return` statements;
        // falling off the end yields None, and mixing the two is an error
        for (i, statement) in body.iter().enumerate() {
            let checked = self.check(statement, env)?;
            let candidate = if checked.meta.returns {
                Some(checked)
            } else if i == body.len() - 1 {
                Some(Type::new(TypeKind::None))
            } else {
                None
            };

            if let Some(candidate) = candidate {
                if let Some(previous) = &returns {
                    if nomismatch(previous, &candidate).is_err() {
                        return Err(self.diag(505, Some(loc.clone())).into());
                    }
                }
                returns = Some(candidate);
            }
        }

        Ok(returns.unwrap_or_else(|| Type::new(TypeKind::None)))
    }

    fn bool_op(&mut self, node: &AstNode, env: &mut Env) -> Checked<Type> {
        let AstNode::BoolOp { op, left, right, loc } = node else { unreachable!() };
        let left_t = self.check(left, env)?;
        let right_t = self.check(right, env)?;

        if !methods_of(left_t.name()).has("__bool__") || !methods_of(right_t.name()).has("__bool__")
        {
            let mismatch = Mismatch {
                kind: types::MismatchKind::Type,
                left: left_t.to_string(),
                right: right_t.to_string(),
            };
            return Err(self.op_mismatch(op, loc.clone(), &mismatch, &left_t, &right_t));
        }
        Ok(Type::new(TypeKind::Bool))
    }

    fn call(&mut self, node: &AstNode, env: &mut Env) -> Checked<Type> {
        let AstNode::Call { callee, args, loc } = node else { unreachable!() };
        let callee_t = self.check(callee, env)?;
        let TypeKind::Function(sig) = callee_t.kind.clone() else {
            return Err(self.diag(506, Some(loc.clone())).arg("type", &callee_t).into());
        };

        let display_name = sig.name.clone().unwrap_or_default();
        let prefixed_name = sig
            .name
            .as_ref()
            .map(|name| format!("{name}() "))
            .unwrap_or_default();

        // recursion guard: calling the function whose body is being checked.
        // a missing return annotation is genuine recursion (508), anything
        // else is merely unresolvable here (507)
        let unresolved_code = if matches!(sig.return_type.kind, TypeKind::Never) { 508 } else { 507 };
        let checking_self = env
            .function
            .as_ref()
            .is_some_and(|current| current.node.is_some() && current.node == sig.node);
        if sig.unresolved.is_some() && checking_self {
            return Err(self
                .diag(unresolved_code, Some(sig.loc.clone()))
                .arg("name", &prefixed_name)
                .into());
        }

        // bind arguments: positional first, then named
        let mut bound: Vec<(String, Type, Type, String)> = Vec::new();
        let mut positional = true;
        let mut index = 0usize;
        for arg_ref in args {
            let AstNode::CallArg { name, value, loc: arg_loc } = self.node(arg_ref) else {
                unreachable!()
            };

            let param_name = match &name {
                Some(ident) => {
                    if bound.iter().any(|(existing, ..)| *existing == ident.name) {
                        return Err(self
                            .diag(509, Some(arg_loc))
                            .arg("name", &display_name)
                            .arg("arg", &ident.name)
                            .into());
                    }
                    if !sig.param_names.contains(&ident.name) {
                        return Err(self
                            .diag(510, Some(arg_loc))
                            .arg("name", &display_name)
                            .arg("arg", &ident.name)
                            .into());
                    }
                    positional = false;
                    ident.name.clone()
                }
                None => {
                    if !positional {
                        return Err(self.diag(511, Some(arg_loc)).into());
                    }
                    if index >= sig.param_names.len() {
                        return Err(self.arity_error(&sig, &display_name, args.len(), loc));
                    }
                    let param_name = sig.param_names[index].clone();
                    index += 1;
                    param_name
                }
            };

            let typ = self.check(&value, env)?;
            let slot = sig
                .param_names
                .iter()
                .position(|n| *n == param_name)
                .expect("validated above");
            let mut param = sig.params[slot].clone();
            let address = sig.param_addrs[slot].clone();

            if param.is(&["Any"]) {
                param = typ.clone();
            }

            if let Err(mismatch) = nomismatch(&typ, &param) {
                return Err(self
                    .diag(513, Some(arg_loc))
                    .arg("name", &param_name)
                    .arg("kind", mismatch.kind)
                    .arg("expected", &mismatch.right)
                    .arg("actual", &mismatch.left)
                    .into());
            }

            let unified = unify(&param, &typ).unwrap_or_else(|| typ.clone());
            // lexical scoping: make the binding visible through its address
            self.ns.names.insert(address.clone(), unified.clone());
            bound.push((param_name, param, unified, address));
        }

        if bound.len() < sig.arity.0 {
            return Err(self.arity_error(&sig, &display_name, args.len(), loc));
        }

        let Some(function_node) = sig.node else {
            return Ok(sig.return_type.clone());
        };

        // re-check the body when parameter constraints tightened
        let recheck = sig.unresolved == Some(Unresolved::Parameters)
            || bound.iter().any(|(_, param, unified, _)| param != unified);
        if !recheck {
            return Ok(sig.return_type.clone());
        }

        if checking_self {
            if sig.unresolved.is_some() {
                return Err(self
                    .diag(unresolved_code, Some(sig.loc.clone()))
                    .arg("name", &prefixed_name)
                    .into());
            }
            return Ok(sig.return_type.clone());
        }

        let mut new_env = env.child();
        for (name, _, unified, address) in &bound {
            new_env.set_name(self.ns, name, unified.clone(), Some(address.clone()));
        }
        for (i, default) in sig.param_defaults.iter().enumerate() {
            let idx = sig.arity.0 + i;
            let name = &sig.param_names[idx];
            if !bound.iter().any(|(bound_name, ..)| bound_name == name) {
                new_env.set_name(self.ns, name, default.clone(), Some(sig.param_addrs[idx].clone()));
            }
        }
        new_env.function = Some(Rc::clone(&sig));

        // merge the definition scope's snapshot so lexical scoping survives
        if !sig.curried.is_empty() {
            let mut merged = sig.curried.clone();
            merged.extend(new_env.names.drain());
            new_env.names = merged;
        }

        let AstNode::Function { body: Some(body), .. } = self.ns.nodes[&function_node.0].clone()
        else {
            return Ok(sig.return_type.clone());
        };

        self.errors.stack.push(loc.clone());
        let return_type = self.check(&body, &mut new_env)?;
        self.errors.stack.pop();
        Ok(return_type)
    }

    fn arity_error(
        &self,
        sig: &FunctionSig,
        name: &str,
        n_args: usize,
        loc: &Location,
    ) -> Failure {
        let n_params = sig.param_names.len();
        self.diag(512, Some(loc.clone()))
            .arg("name", name)
            .arg("n_params", n_params)
            .arg("plural", if n_params == 1 { "" } else { "s" })
            .arg("n_args", n_args)
            .into()
    }

    fn compare(&mut self, node: &AstNode, env: &mut Env, link: Option<Link>) -> Checked<Type> {
        let AstNode::Compare { ops, left, comparators, .. } = node else { unreachable!() };

        let mut nodes = vec![(**left).clone()];
        nodes.extend(comparators.iter().cloned());

        for (i, op) in ops.iter().enumerate() {
            let left_t = self.check(&nodes[i], env)?;
            let right_t = self.check(&nodes[i + 1], env)?;

            match self.dispatch_method(op, &left_t, &right_t) {
                Some((resolved, _)) => {
                    if let Some(link) = link {
                        self.ns.meta_mut(link).methods.push(resolved);
                    }
                }
                None => {
                    let loc = self.node(&nodes[i]).loc().merge(&self.node(&nodes[i + 1]).loc());
                    return Err(self
                        .diag(514, Some(loc))
                        .arg("operator", op.kind.symbol())
                        .arg("left", &left_t)
                        .arg("right", &right_t)
                        .into());
                }
            }
        }

        Ok(Type::new(TypeKind::Bool))
    }

    fn conversion(&mut self, node: &AstNode, env: &mut Env) -> Checked<Type> {
        let AstNode::Conversion { value, target, loc, .. } = node else { unreachable!() };
        let value_t = self.check(value, env)?;

        match target {
            Annotation::Type { name, .. } => {
                let conversion_method = format!("__{}__", name.name.to_lowercase());
                if !methods_of(value_t.name()).has(&conversion_method)
                    && name.name != value_t.name()
                {
                    return Err(self
                        .diag(515, Some(loc.clone()))
                        .arg("left", &value_t)
                        .arg("right", &name.name)
                        .into());
                }
                if matches!(name.name.as_str(), "Int" | "Float") {
                    // don't erase the dimension
                    let typ = if name.name == "Int" { NumTyp::Int } else { NumTyp::Float };
                    if let TypeKind::Number { dim, value, .. } = &value_t.kind {
                        return Ok(Type::new(TypeKind::Number {
                            typ,
                            dim: dim.clone(),
                            value: *value,
                        }));
                    }
                    return Ok(Type::number(typ, None));
                }
                Ok(Type::named(&name.name).unwrap_or_else(Type::any))
            }
            Annotation::Unit(unit) => {
                let target_dim = self
                    .dimchecker
                    .dimensionize(self.ns, unit, Mode::Unit)
                    .and_then(|dim| self.simplifier.simplify(&dim, true))
                    .map_err(Failure::Diag)?;

                let matches_dim = value_t
                    .dim()
                    .map_or(true, |dim| !dim.is_truthy() || *dim == target_dim);

                match &value_t.kind {
                    TypeKind::Number { .. } if matches_dim => {
                        Ok(value_t.with_dim(Some(target_dim)))
                    }
                    TypeKind::List { content } if !content.has_dim() || matches_dim => {
                        let converted = (**content).clone().with_dim(Some(target_dim));
                        Ok(Type::list(converted))
                    }
                    _ => Err(self
                        .diag(515, Some(loc.clone()))
                        .arg("left", dim_repr(value_t.dim()))
                        .arg("right", dim_repr(Some(&target_dim)))
                        .into()),
                }
            }
            Annotation::Function(_) => unreachable!("rejected by the parser"),
        }
    }

    fn for_loop(&mut self, node: &AstNode, env: &mut Env) -> Checked<Type> {
        let AstNode::ForLoop { iterators, iterable, body, .. } = node else { unreachable!() };
        let iterable_t = self.check(iterable, env)?;

        if !iterable_t.is(&["List", "Range"]) {
            return Err(self
                .diag(516, Some(self.node(iterable).loc()))
                .arg("type", &iterable_t)
                .into());
        }

        let mut value = match &iterable_t.kind {
            TypeKind::List { content } => {
                if content.is(&["Never"]) {
                    return Ok(Type::new(TypeKind::None));
                }
                (**content).clone()
            }
            TypeKind::Range { value } => (**value).clone(),
            _ => unreachable!(),
        };

        if iterators.len() > 1 {
            match &value.kind {
                TypeKind::List { content } => value = (**content).clone(),
                _ => {
                    let loc = iterators[0].loc.merge(&iterators[iterators.len() - 1].loc);
                    return Err(self.diag(517, Some(loc)).arg("type", &value).into());
                }
            }
        }

        let mut new_env = env.child();
        for iterator in iterators {
            new_env.set_name(self.ns, &iterator.name, value.clone(), None);
        }
        self.check(body, &mut new_env)?;
        Ok(Type::new(TypeKind::None))
    }

    fn function(&mut self, node: &AstNode, env: &mut Env, link: Option<Link>) -> Checked<Type> {
        let AstNode::Function { name, params, return_type, body, loc } = node else {
            unreachable!()
        };
        let name = name.as_ref().map(|ident| ident.name.clone());

        // parameter types from annotations; unannotated parameters are
        // `Any` tied to this function's link
        let mut param_types = Vec::with_capacity(params.len());
        let mut param_names = Vec::with_capacity(params.len());
        let mut param_defaults = Vec::new();
        let mut required = 0usize;

        let param_nodes: Vec<AstNode> = params.iter().map(|p| self.node(p)).collect();
        for param in &param_nodes {
            let AstNode::Param { name, annotation, default, .. } = param else { unreachable!() };
            param_names.push(name.name.clone());
            let typ = match annotation {
                Some(annotation) => self.type_annotation(annotation, env)?,
                None => Type::new(TypeKind::Any { unresolved: link }),
            };
            if default.is_none() {
                required += 1;
            }
            param_types.push(typ);
        }

        for (i, param) in param_nodes.iter().enumerate() {
            let AstNode::Param { name: pname, default: Some(default), loc: ploc, .. } = param
            else {
                continue;
            };
            let default_t = self.check(default, env)?;

            if param_types[i].is(&["Any"]) {
                param_types[i] = default_t.clone();
                param_defaults.push(default_t);
                continue;
            }
            if let Err(mismatch) = nomismatch(&param_types[i], &default_t) {
                return Err(self
                    .diag(518, Some(ploc.clone()))
                    .arg("param", &pname.name)
                    .arg("kind", mismatch.kind)
                    .arg("expected", &mismatch.left)
                    .arg("actual", &mismatch.right)
                    .into());
            }
            param_defaults.push(default_t);
        }

        let annotated_return = match return_type {
            Some(annotation) => Some(self.type_annotation(annotation, env)?),
            None => None,
        };
        let return_t = annotated_return.clone().unwrap_or_else(Type::never);

        let param_addrs: Vec<String> = param_names
            .iter()
            .map(|pname| format!("{pname}-{}", uuid::Uuid::new_v4()))
            .collect();

        let mut sig = FunctionSig {
            params: param_types.clone(),
            param_names: param_names.clone(),
            param_addrs: param_addrs.clone(),
            param_defaults,
            return_type: return_t.clone(),
            arity: (required, param_names.len()),
            unresolved: annotated_return.is_none().then_some(Unresolved::Recursive),
            name: name.clone(),
            loc: loc.span("start", "assign"),
            node: link,
            curried: env.names.clone(),
        };

        if let Some(name) = &name {
            env.set_name(self.ns, name, Type::function(sig.clone()), None);
        }

        let mut new_env = env.child();
        for (i, typ) in param_types.iter().enumerate() {
            new_env.set_name(
                self.ns,
                &param_names[i],
                typ.clone(),
                Some(param_addrs[i].clone()),
            );
        }
        new_env.function = Some(Rc::new(sig.clone()));

        let Some(body) = body else {
            return Ok(Type::function(sig));
        };

        let body_t = match self.check(body, &mut new_env) {
            Ok(body_t) => body_t,
            Err(Failure::Unresolved(unresolved)) if Some(unresolved) == link => {
                // a parameter stayed `Any`: defer to the call sites
                sig.unresolved = Some(Unresolved::Parameters);
                let typ = Type::function(sig);
                if let Some(name) = &name {
                    env.set_name(self.ns, name, typ.clone(), None);
                }
                return Ok(typ);
            }
            Err(other) => return Err(other),
        };

        if let Err(mismatch) = nomismatch(&body_t, &return_t) {
            return Err(self
                .diag(519, Some(self.node(body).loc()))
                .arg("value", &mismatch.left)
                .arg("kind", mismatch.kind)
                .arg("expected", &mismatch.right)
                .into());
        }

        sig.return_type = unify(&return_t, &body_t).unwrap_or(body_t);
        sig.unresolved = None;
        let typ = Type::function(sig);
        if let Some(name) = &name {
            let address = env.set_name(self.ns, name, typ.clone(), None);
            if let Some(link) = link {
                self.ns.meta_mut(link).address = Some(address);
            }
        }
        Ok(typ)
    }

    fn identifier(&mut self, node: &AstNode, env: &Env) -> Checked<Type> {
        let AstNode::Identifier(ident) = node else { unreachable!() };
        let Some(item) = env.get_name(self.ns, &ident.name) else {
            return Err(self.diag(601, Some(ident.loc.clone())).arg("name", &ident.name).into());
        };

        if env.function.is_some() {
            if let TypeKind::Any { unresolved: Some(unresolved) } = item.kind {
                return Err(Failure::Unresolved(unresolved));
            }
        }

        if item.is(&["Undefined"]) {
            return Err(self.diag(601, Some(ident.loc.clone())).arg("name", &ident.name).into());
        }
        Ok(item)
    }

    fn if_(&mut self, node: &AstNode, env: &mut Env) -> Checked<Type> {
        let AstNode::If { condition, then_branch, else_branch, loc, .. } = node else {
            unreachable!()
        };
        let condition_t = self.check(condition, env)?;
        if !methods_of(condition_t.name()).has("__bool__") {
            return Err(self
                .diag(520, Some(self.node(condition).loc()))
                .arg("type", &condition_t)
                .into());
        }

        let then_t = self.check(then_branch, env)?;
        let Some(else_branch) = else_branch else {
            return Ok(then_t);
        };
        let else_t = self.check(else_branch, env)?;

        if let Err(mismatch) = nomismatch(&then_t, &else_t) {
            return Err(self
                .diag(521, Some(loc.clone()))
                .arg("kind", mismatch.kind)
                .arg("then", &mismatch.left)
                .arg("other", &mismatch.right)
                .into());
        }
        Ok(unify(&then_t, &else_t).unwrap_or(then_t))
    }

    fn index(&mut self, node: &AstNode, env: &mut Env) -> Checked<Type> {
        let AstNode::Index { iterable, index, loc } = node else { unreachable!() };
        let value_t = self.check(iterable, env)?;
        let index_t = self.check(index, env)?;

        if index_t.has_dim() {
            return Err(self
                .diag(537, Some(loc.clone()))
                .arg("dimension", dim_repr(index_t.dim()))
                .into());
        }

        let Some(method) = lookup(value_t.name(), "__getitem__") else {
            return Err(self.diag(522, Some(loc.clone())).arg("type", &value_t).into());
        };
        let Some(checked) = method.check(&mut self.varenv, &[value_t.clone(), index_t.clone()])
        else {
            return Err(self
                .diag(523, Some(loc.clone()))
                .arg("type", &value_t)
                .arg("index", &index_t)
                .into());
        };

        if let TypeKind::List { content } = &value_t.kind {
            if content.is(&["Never"]) {
                return Ok(Type::any());
            }
        }
        Ok(checked.return_type)
    }

    fn index_assignment(&mut self, node: &AstNode, env: &mut Env) -> Checked<Type> {
        let AstNode::IndexAssignment { target, value, loc } = node else { unreachable!() };
        let AstNode::Index { iterable, index, .. } = self.node(target) else { unreachable!() };

        let container_t = self.check(&iterable, env)?;
        let index_t = self.check(&index, env)?;
        let value_t = self.check(value, env)?;

        let Some(method) = lookup(container_t.name(), "__setitem__") else {
            return Err(self.diag(522, Some(loc.clone())).arg("type", &container_t).into());
        };
        if method
            .check(&mut self.varenv, &[container_t.clone(), index_t.clone(), value_t])
            .is_none()
        {
            return Err(self
                .diag(523, Some(loc.clone()))
                .arg("type", &container_t)
                .arg("index", &index_t)
                .into());
        }
        Ok(Type::new(TypeKind::None))
    }

    fn list(&mut self, node: &AstNode, env: &mut Env) -> Checked<Type> {
        let AstNode::List { items, .. } = node else { unreachable!() };
        let mut content = Type::never();

        for item in items {
            let element_t = self.check(item, env)?;
            if element_t.is(&["Any"]) {
                return Err(self.diag(524, Some(self.node(item).loc())).into());
            }
            if let Err(mismatch) = nomismatch(&content, &element_t) {
                return Err(self
                    .diag(525, Some(self.node(item).loc()))
                    .arg("kind", mismatch.kind)
                    .into());
            }
            content = unify(&content, &element_t).unwrap_or(content);
        }
        Ok(Type::list(content))
    }

    fn number(&mut self, lit: &NumberLit, typ: NumTyp, _env: &mut Env) -> Checked<Type> {
        let dimension = match &lit.unit {
            Some(unit) if unit.is_truthy() => {
                let dim = self
                    .dimchecker
                    .dimensionize(self.ns, unit, Mode::Unit)
                    .map_err(Failure::Diag)?;
                self.simplifier.simplify(&dim, true).map_err(Failure::Diag)?
            }
            _ => Unit::one(),
        };

        let mantissa: f64 = lit.value.parse().unwrap_or(0.0);
        let exponent: f64 = if lit.exponent.is_empty() {
            0.0
        } else {
            lit.exponent.parse().unwrap_or(0.0)
        };
        Ok(Type::new(TypeKind::Number {
            typ,
            dim: Some(dimension),
            value: mantissa * 10f64.powf(exponent),
        }))
    }

    fn range(&mut self, node: &AstNode, env: &mut Env) -> Checked<Type> {
        let AstNode::Range { start, end, step, .. } = node else { unreachable!() };

        for part in [start, end] {
            let checked = self.check(part, env)?;
            if !checked.is(&["Int"]) {
                return Err(self
                    .diag(526, Some(self.node(part).loc()))
                    .arg("type", &checked)
                    .into());
            }
            if checked.has_dim() {
                return Err(self.diag(527, Some(self.node(part).loc())).into());
            }
        }

        let mut value = Type::int();
        if let Some(step) = step {
            let checked = self.check(step, env)?;
            if !checked.is(&["Int", "Float"]) {
                return Err(self
                    .diag(528, Some(self.node(step).loc()))
                    .arg("type", &checked)
                    .into());
            }
            if checked.has_dim() {
                return Err(self.diag(529, Some(self.node(step).loc())).into());
            }
            if let TypeKind::Number { typ, .. } = checked.kind {
                value = Type::number(typ, None);
            }
        }
        Ok(Type::new(TypeKind::Range { value: Box::new(value) }))
    }

    fn return_(&mut self, node: &AstNode, env: &mut Env) -> Checked<Type> {
        let AstNode::Return { value, loc } = node else { unreachable!() };
        let Some(function) = env.function.clone() else {
            return Err(self.diag(530, Some(loc.clone())).into());
        };

        let mut value_t = match value {
            Some(value) => self.check(value, env)?,
            None => Type::new(TypeKind::None),
        };

        if let Err(mismatch) = nomismatch(&value_t, &function.return_type) {
            return Err(self
                .diag(519, Some(loc.clone()))
                .arg("value", &mismatch.left)
                .arg("kind", mismatch.kind)
                .arg("expected", &mismatch.right)
                .into());
        }

        value_t.meta.returns = true;
        Ok(value_t)
    }

    fn slice(&mut self, node: &AstNode, env: &mut Env) -> Checked<Type> {
        let AstNode::Slice { start, stop, step, .. } = node else { unreachable!() };
        for part in [start, stop, step].into_iter().flatten() {
            let checked = self.check(part, env)?;
            if !checked.is(&["Int"]) {
                return Err(self
                    .diag(532, Some(self.node(part).loc()))
                    .arg("type", &checked)
                    .into());
            }
        }
        Ok(Type::new(TypeKind::Slice))
    }

    fn type_annotation(&mut self, annotation: &Annotation, env: &mut Env) -> Checked<Type> {
        match annotation {
            Annotation::Function(fa) => {
                let mut params = Vec::with_capacity(fa.params.len());
                for param in &fa.params {
                    params.push(self.type_annotation(param, env)?);
                }
                let return_type = match &fa.return_type {
                    Some(annotation) => self.type_annotation(annotation, env)?,
                    None => Type::new(TypeKind::None),
                };
                let param_names: Vec<String> =
                    fa.param_names.iter().map(|ident| ident.name.clone()).collect();
                let param_addrs = param_names
                    .iter()
                    .map(|name| format!("{name}-{}", uuid::Uuid::new_v4()))
                    .collect();
                Ok(Type::function(FunctionSig {
                    params,
                    param_names,
                    param_addrs,
                    return_type,
                    arity: fa.arity,
                    ..FunctionSig::default()
                }))
            }

            Annotation::Type { name, param } => match name.name.as_str() {
                "Int" | "Float" => {
                    let typ = if name.name == "Int" { NumTyp::Int } else { NumTyp::Float };
                    let dim = match param {
                        Some(param) => {
                            let resolved = self.type_annotation(param, env)?;
                            resolved.dim().cloned()
                        }
                        None => None,
                    };
                    let mut number = Type::number(typ, dim);
                    // a dimensioned annotation constrains the dimension, not
                    // the Int/Float split; literals keep their natural kind
                    if number.has_dim() {
                        number.meta.dimension_only = true;
                    }
                    Ok(number)
                }
                "List" => {
                    let content = match param {
                        Some(param) => self.type_annotation(param, env)?,
                        None => Type::never(),
                    };
                    Ok(Type::list(content))
                }
                other => Type::named(other).ok_or_else(|| {
                    self.diag(504, Some(name.loc.clone())).arg("name", other).into()
                }),
            },

            Annotation::Unit(unit) => {
                if unit.is_one() {
                    return Ok(Type::new(TypeKind::Dimension { dim: Unit::one() }));
                }
                // annotations accept unit names first, then dimension names
                let resolved = self
                    .dimchecker
                    .dimensionize(self.ns, unit, Mode::Unit)
                    .or_else(|unit_err| {
                        self.dimchecker
                            .dimensionize(self.ns, unit, Mode::Dimension)
                            .map_err(|_| unit_err)
                    })
                    .map_err(Failure::Diag)?;
                let dim = self.simplifier.simplify(&resolved, true).map_err(Failure::Diag)?;
                Ok(Type::new(TypeKind::Dimension { dim }))
            }
        }
    }

    fn unary_op(&mut self, node: &AstNode, env: &mut Env) -> Checked<Type> {
        let AstNode::UnaryOp { op, operand, loc } = node else { unreachable!() };
        let operand_t = self.check(operand, env)?;

        match op.kind {
            OpKind::Sub => {
                if !matches!(operand_t.kind, TypeKind::Number { .. }) {
                    return Err(self.diag(533, Some(loc.clone())).arg("type", &operand_t).into());
                }
                Ok(operand_t)
            }
            OpKind::Not => {
                if !methods_of(operand_t.name()).has("__bool__") {
                    return Err(self.diag(534, Some(loc.clone())).arg("type", &operand_t).into());
                }
                Ok(operand_t)
            }
            other => unreachable!("not a unary operator: {other:?}"),
        }
    }

    fn unit_reference(&mut self, unit: &Unit) -> Checked<Type> {
        let resolved = self
            .dimchecker
            .dimensionize(self.ns, unit, Mode::Unit)
            .and_then(|dim| self.simplifier.simplify(&dim, true))
            .map_err(Failure::Diag)?;
        Ok(Type::new(TypeKind::Dimension { dim: resolved }))
    }

    fn variable(&mut self, node: &AstNode, env: &mut Env, link: Option<Link>) -> Checked<Type> {
        let AstNode::Variable { name, annotation, value, loc } = node else { unreachable!() };
        let mut value_t = self.check(value, env)?;

        let mut address = None;
        if env.names.contains_key(&name.name) {
            if annotation.is_some() {
                return Err(self
                    .diag(604, Some(loc.clone()))
                    .arg("name", &name.name)
                    .into());
            }
            let existing = env
                .get_name(self.ns, &name.name)
                .unwrap_or_else(Type::never);
            if let Err(mismatch) = nomismatch(&existing, &value_t) {
                return Err(self
                    .diag(535, Some(loc.clone()))
                    .arg("name", &name.name)
                    .arg("kind", mismatch.kind)
                    .arg("value", &mismatch.right)
                    .arg("declared", &mismatch.left)
                    .into());
            }
            address = env.address_of(&name.name).cloned();
        }

        if let Some(annotation) = annotation {
            let mut annotation_t = self.type_annotation(annotation, env)?;

            // refine a partially specified List[Any] from the value
            if let (TypeKind::List { content: declared }, TypeKind::List { content: actual }) =
                (&annotation_t.kind, &value_t.kind)
            {
                if declared.is(&["Any"]) {
                    annotation_t = Type::list((**actual).clone());
                }
            }

            if let Err(mismatch) = nomismatch(&annotation_t, &value_t) {
                return Err(self
                    .diag(536, Some(loc.clone()))
                    .arg("name", &name.name)
                    .arg("declared", &mismatch.left)
                    .arg("kind", mismatch.kind)
                    .arg("value", &mismatch.right)
                    .into());
            }
            value_t = unify(&annotation_t, &value_t).unwrap_or(value_t);
        }

        if !matches!(value_t.kind, TypeKind::Function(_)) {
            if let Some(link) = link {
                value_t.node = Some(link);
            }
        }
        let address = env.set_name(self.ns, &name.name, value_t, address);
        if let Some(link) = link {
            self.ns.meta_mut(link).address = Some(address);
        }
        Ok(Type::new(TypeKind::None))
    }

    fn variable_declaration(
        &mut self,
        node: &AstNode,
        env: &mut Env,
        link: Option<Link>,
    ) -> Checked<Type> {
        let AstNode::VariableDeclaration { name, annotation, loc } = node else { unreachable!() };
        if env.names.contains_key(&name.name) {
            return Err(self.diag(604, Some(loc.clone())).arg("name", &name.name).into());
        }
        let annotation_t = self.type_annotation(annotation, env)?;
        let address = env.set_name(self.ns, &name.name, annotation_t, None);
        if let Some(link) = link {
            self.ns.meta_mut(link).address = Some(address);
        }
        Ok(Type::new(TypeKind::None))
    }

    fn while_loop(&mut self, node: &AstNode, env: &mut Env) -> Checked<Type> {
        let AstNode::WhileLoop { condition, body, .. } = node else { unreachable!() };
        let condition_t = self.check(condition, &mut env.child())?;
        if !methods_of(condition_t.name()).has("__bool__") {
            return Err(self
                .diag(520, Some(self.node(condition).loc()))
                .arg("type", &condition_t)
                .into());
        }
        self.check(body, env)?;
        Ok(Type::new(TypeKind::None))
    }
}
