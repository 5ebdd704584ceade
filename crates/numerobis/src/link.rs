//! Structural AST linking.
//!
//! Interns every node of an AST forest into a flat integer-keyed table so
//! that passes can attach annotations to stable handles and identical
//! subtrees share one entry. Keys are content hashes of the node's shape
//! (locations excluded); the hasher is seeded per process, so handles are
//! process-local.

use std::sync::LazyLock;

use ahash::{AHashMap, RandomState};

use crate::ast::{AstNode, Link};

static HASH_STATE: LazyLock<RandomState> = LazyLock::new(RandomState::new);

/// Applies `f` to every direct `AstNode` child of `node`. Identifiers,
/// operators, annotations and unit expressions are inline leaf data and
/// stay untouched.
fn each(nodes: Vec<AstNode>, f: &mut impl FnMut(AstNode) -> AstNode) -> Vec<AstNode> {
    nodes.into_iter().map(f).collect()
}

fn map_children(node: AstNode, f: &mut impl FnMut(AstNode) -> AstNode) -> AstNode {
    match node {
        AstNode::Block { body, loc } => AstNode::Block { body: each(body, f), loc },
        AstNode::If { condition, then_branch, else_branch, expression, loc } => AstNode::If {
            condition: Box::new(f(*condition)),
            then_branch: Box::new(f(*then_branch)),
            else_branch: else_branch.map(|branch| Box::new(f(*branch))),
            expression,
            loc,
        },
        AstNode::List { items, loc } => AstNode::List { items: each(items, f), loc },
        AstNode::UnaryOp { op, operand, loc } => AstNode::UnaryOp {
            op,
            operand: Box::new(f(*operand)),
            loc,
        },
        AstNode::BinOp { op, left, right, loc } => AstNode::BinOp {
            op,
            left: Box::new(f(*left)),
            right: Box::new(f(*right)),
            loc,
        },
        AstNode::BoolOp { op, left, right, loc } => AstNode::BoolOp {
            op,
            left: Box::new(f(*left)),
            right: Box::new(f(*right)),
            loc,
        },
        AstNode::Compare { ops, left, comparators, loc } => AstNode::Compare {
            ops,
            left: Box::new(f(*left)),
            comparators: each(comparators, f),
            loc,
        },
        AstNode::Conversion { op, value, target, display_only, loc } => AstNode::Conversion {
            op,
            value: Box::new(f(*value)),
            target,
            display_only,
            loc,
        },
        AstNode::Variable { name, annotation, value, loc } => AstNode::Variable {
            name,
            annotation,
            value: Box::new(f(*value)),
            loc,
        },
        AstNode::ForLoop { iterators, iterable, body, loc } => AstNode::ForLoop {
            iterators,
            iterable: Box::new(f(*iterable)),
            body: Box::new(f(*body)),
            loc,
        },
        AstNode::WhileLoop { condition, body, loc } => AstNode::WhileLoop {
            condition: Box::new(f(*condition)),
            body: Box::new(f(*body)),
            loc,
        },
        AstNode::Range { start, end, step, loc } => AstNode::Range {
            start: Box::new(f(*start)),
            end: Box::new(f(*end)),
            step: step.map(|step| Box::new(f(*step))),
            loc,
        },
        AstNode::Param { name, annotation, default, loc } => AstNode::Param {
            name,
            annotation,
            default: default.map(|default| Box::new(f(*default))),
            loc,
        },
        AstNode::Function { name, params, return_type, body, loc } => AstNode::Function {
            name,
            params: each(params, f),
            return_type,
            body: body.map(|body| Box::new(f(*body))),
            loc,
        },
        AstNode::CallArg { name, value, loc } => AstNode::CallArg {
            name,
            value: Box::new(f(*value)),
            loc,
        },
        AstNode::Call { callee, args, loc } => AstNode::Call {
            callee: Box::new(f(*callee)),
            args: each(args, f),
            loc,
        },
        AstNode::Index { iterable, index, loc } => AstNode::Index {
            iterable: Box::new(f(*iterable)),
            index: Box::new(f(*index)),
            loc,
        },
        AstNode::Slice { start, stop, step, loc } => AstNode::Slice {
            start: start.map(|start| Box::new(f(*start))),
            stop: stop.map(|stop| Box::new(f(*stop))),
            step: step.map(|step| Box::new(f(*step))),
            loc,
        },
        AstNode::IndexAssignment { target, value, loc } => AstNode::IndexAssignment {
            target: Box::new(f(*target)),
            value: Box::new(f(*value)),
            loc,
        },
        AstNode::Return { value, loc } => AstNode::Return {
            value: value.map(|value| Box::new(f(*value))),
            loc,
        },
        leaf => leaf,
    }
}

fn link_node(node: AstNode, table: &mut AHashMap<u64, AstNode>) -> Link {
    let cropped = map_children(node, &mut |child| AstNode::Link(link_node(child, table)));
    let hashed = HASH_STATE.hash_one(&cropped);
    table.insert(hashed, cropped);
    Link(hashed)
}

/// Interns a statement forest. Returns the root links; the table receives
/// every interned node.
pub fn link(tree: Vec<AstNode>, table: &mut AHashMap<u64, AstNode>) -> Vec<Link> {
    tree.into_iter().map(|node| link_node(node, table)).collect()
}

/// Fully dereferences links, restoring a structurally equal tree.
pub fn unlink(table: &AHashMap<u64, AstNode>, node: &AstNode) -> AstNode {
    match node {
        AstNode::Link(link) => unlink(table, &table[&link.0]),
        other => map_children(other.clone(), &mut |child| unlink(table, &child)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{errors::ModuleMeta, lexer::lex, parser::parse};
    use pretty_assertions::assert_eq;

    fn ast_of(source: &str) -> Vec<AstNode> {
        let module = ModuleMeta::new("<test>", source);
        let tokens = lex(source, std::rc::Rc::clone(&module)).unwrap();
        parse(tokens, module).unwrap().0
    }

    #[test]
    fn link_then_unlink_round_trips() {
        let ast = ast_of("x = 1 + 2 * 3\ny = if x > 2 then 1 else 0\n");
        let mut table = AHashMap::new();
        let roots = link(ast.clone(), &mut table);
        assert_eq!(roots.len(), ast.len());

        for (root, original) in roots.iter().zip(&ast) {
            let restored = unlink(&table, &AstNode::Link(*root));
            assert_eq!(&restored, original);
        }
    }

    #[test]
    fn identical_subtrees_share_an_entry() {
        let ast = ast_of("x = 1 + 2\ny = 1 + 2\n");
        let mut table = AHashMap::new();
        let roots = link(ast, &mut table);
        // both `1 + 2` expressions intern to the same handle
        let AstNode::Variable { value: a, .. } = table[&roots[0].0].clone() else { panic!() };
        let AstNode::Variable { value: b, .. } = table[&roots[1].0].clone() else { panic!() };
        assert_eq!(a.as_link(), b.as_link());
        assert!(a.as_link().is_some());
    }

    #[test]
    fn children_become_links() {
        let ast = ast_of("x = 1 + 2\n");
        let mut table = AHashMap::new();
        let roots = link(ast, &mut table);
        let AstNode::Variable { value, .. } = &table[&roots[0].0] else { panic!() };
        let AstNode::Link(link) = **value else { panic!("child should be a link") };
        let AstNode::BinOp { left, right, .. } = &table[&link.0] else { panic!() };
        assert!(left.as_link().is_some());
        assert!(right.as_link().is_some());
    }
}
