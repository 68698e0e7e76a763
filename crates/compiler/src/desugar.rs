//! AST desugaring
//!
//! One rewrite pass applied after parsing and before resolution. Two
//! surface forms are lowered to core forms, so every later pass only ever
//! sees while-loops and pointer operations:
//!
//! ```text
//! for <vardecl>, <cond>, <step> { <body> }
//!     =>  { <vardecl> while <cond> { <body> <step> } }
//!
//! <expr>[<index>]
//!     =>  *(<expr> + <index>)
//! ```
//!
//! Nodes are rewritten in place through the arena; the pass is idempotent.

use crate::ast::{
    Ast, AstNode, BinOpKind, Block, ExprBinOp, ExprUnaryOp, NodeId, StmtWhile, UnaryOpKind,
};

pub fn desugar(ast: &mut Ast, root: NodeId) {
    ast.traverse_mut(root, &mut |ast, id, _depth| match ast.node(id) {
        AstNode::For(_) => lower_for(ast, id),
        AstNode::Index(_) => lower_index(ast, id),
        _ => {}
    });
}

fn lower_for(ast: &mut Ast, id: NodeId) {
    let AstNode::For(for_) = ast.node(id).clone() else {
        return;
    };

    let while_ = ast.alloc(AstNode::While(StmtWhile {
        op: for_.op.clone(),
        condition: for_.condition,
        body: for_.body,
    }));

    // The step expression runs at the end of every iteration.
    if let AstNode::Block(body) = ast.node_mut(for_.body) {
        body.stmts.push(for_.step);
    }

    *ast.node_mut(id) = AstNode::Block(Block {
        op: for_.op,
        stmts: vec![for_.vardecl, while_],
        scope: None,
    });
}

fn lower_index(ast: &mut Ast, id: NodeId) {
    let AstNode::Index(index) = ast.node(id).clone() else {
        return;
    };

    let sum = ast.alloc(AstNode::BinOp(ExprBinOp {
        op: index.op.clone(),
        kind: BinOpKind::Add,
        lhs: index.expr,
        rhs: index.index,
    }));

    *ast.node_mut(id) = AstNode::UnaryOp(ExprUnaryOp {
        op: index.op,
        kind: UnaryOpKind::Deref,
        node: sum,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Colors;
    use crate::parser;

    fn desugared(src: &str) -> (Ast, NodeId) {
        let mut ast = Ast::new();
        let root = parser::parse(src, &mut ast).unwrap();
        desugar(&mut ast, root);
        (ast, root)
    }

    fn assert_core_only(ast: &Ast, root: NodeId) {
        ast.traverse(
            root,
            &mut |ast, id, _| {
                assert!(
                    !matches!(ast.node(id), AstNode::For(_) | AstNode::Index(_)),
                    "surface form survived desugaring"
                );
            },
            &mut |_, _, _| {},
        );
    }

    #[test]
    fn test_for_becomes_block_with_while() {
        let (ast, root) =
            desugared("proc f() int { for let i: int = 0, i < 10, i = i + 1 { i; } return 0; }");
        assert_core_only(&ast, root);

        // proc body's first statement is now a block: { vardecl; while }
        let AstNode::Block(program) = ast.node(root) else {
            panic!()
        };
        let AstNode::Proc(proc) = ast.node(program.stmts[0]) else {
            panic!()
        };
        let AstNode::Block(body) = ast.node(proc.body.unwrap()) else {
            panic!()
        };
        let AstNode::Block(lowered) = ast.node(body.stmts[0]) else {
            panic!("for should have become a block")
        };
        assert_eq!(lowered.stmts.len(), 2);
        assert!(matches!(ast.node(lowered.stmts[0]), AstNode::VarDecl(_)));

        let AstNode::While(while_) = ast.node(lowered.stmts[1]) else {
            panic!("second statement should be the while loop")
        };

        // The loop body gained the step as its final statement.
        let AstNode::Block(loop_body) = ast.node(while_.body) else {
            panic!()
        };
        assert_eq!(loop_body.stmts.len(), 2);
        assert!(matches!(
            ast.node(*loop_body.stmts.last().unwrap()),
            AstNode::Assign(_)
        ));
    }

    #[test]
    fn test_index_becomes_deref_of_add() {
        let (ast, root) = desugared("proc f(xs: *int) int { return xs[2]; }");
        assert_core_only(&ast, root);

        let AstNode::Block(program) = ast.node(root) else {
            panic!()
        };
        let AstNode::Proc(proc) = ast.node(program.stmts[0]) else {
            panic!()
        };
        let AstNode::Block(body) = ast.node(proc.body.unwrap()) else {
            panic!()
        };
        let AstNode::Return(ret) = ast.node(body.stmts[0]) else {
            panic!()
        };
        let AstNode::UnaryOp(deref) = ast.node(ret.expr.unwrap()) else {
            panic!("index should have become a deref")
        };
        assert_eq!(deref.kind, UnaryOpKind::Deref);
        let AstNode::BinOp(add) = ast.node(deref.node) else {
            panic!("deref operand should be the pointer add")
        };
        assert_eq!(add.kind, BinOpKind::Add);
    }

    #[test]
    fn test_nested_indices_all_lowered() {
        let (ast, root) = desugared("proc f(xs: *int, ys: *int) int { return xs[ys[1]]; }");
        assert_core_only(&ast, root);
    }

    #[test]
    fn test_index_assignment_target_lowered() {
        let (ast, root) = desugared("proc f(xs: *int) { xs[0] = 1; }");
        assert_core_only(&ast, root);
    }

    #[test]
    fn test_desugar_is_idempotent() {
        let src = "proc f(xs: *int) int { for let i: int = 0, i < 4, i = i + 1 { xs[i] = i; } return xs[2]; }";
        let (mut ast, root) = desugared(src);
        let once = ast.render_tree(root, 2, &Colors::OFF);
        desugar(&mut ast, root);
        let twice = ast.render_tree(root, 2, &Colors::OFF);
        assert_eq!(once, twice);
    }
}
