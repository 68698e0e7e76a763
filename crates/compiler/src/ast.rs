//! Abstract syntax tree for Seron
//!
//! All nodes live in a single arena ([`Ast`]) owned by the compilation;
//! nodes refer to each other by dense [`NodeId`] indices, which keeps the
//! tree free of lifetime plumbing and makes in-place rewrites (desugaring)
//! cheap. Every node carries its originating token so diagnostics can point
//! back into the source.

use crate::diagnostics::Colors;
use crate::lexer::{NumberWidth, Token, TokenKind};
use crate::symboltable::ScopeId;
use crate::types::{Param, ProcSignature, Type};

/// Handle to a node in the [`Ast`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralKind {
    Number,
    String,
    Ident,
}

impl LiteralKind {
    pub fn from_token(kind: TokenKind) -> Option<LiteralKind> {
        match kind {
            TokenKind::Number => Some(LiteralKind::Number),
            TokenKind::String => Some(LiteralKind::String),
            TokenKind::Identifier => Some(LiteralKind::Ident),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOpKind {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Neq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    BitOr,
    BitAnd,
    LogOr,
    LogAnd,
}

impl BinOpKind {
    pub fn from_token(kind: TokenKind) -> Option<BinOpKind> {
        match kind {
            TokenKind::Plus => Some(BinOpKind::Add),
            TokenKind::Minus => Some(BinOpKind::Sub),
            TokenKind::Asterisk => Some(BinOpKind::Mul),
            TokenKind::Slash => Some(BinOpKind::Div),
            TokenKind::Eq => Some(BinOpKind::Eq),
            TokenKind::Neq => Some(BinOpKind::Neq),
            TokenKind::Lt => Some(BinOpKind::Lt),
            TokenKind::LtEq => Some(BinOpKind::LtEq),
            TokenKind::Gt => Some(BinOpKind::Gt),
            TokenKind::GtEq => Some(BinOpKind::GtEq),
            TokenKind::Pipe => Some(BinOpKind::BitOr),
            TokenKind::Ampersand => Some(BinOpKind::BitAnd),
            TokenKind::LogOr => Some(BinOpKind::LogOr),
            TokenKind::LogAnd => Some(BinOpKind::LogAnd),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BinOpKind::Add => "add",
            BinOpKind::Sub => "sub",
            BinOpKind::Mul => "mul",
            BinOpKind::Div => "div",
            BinOpKind::Eq => "eq",
            BinOpKind::Neq => "neq",
            BinOpKind::Lt => "lt",
            BinOpKind::LtEq => "lt-eq",
            BinOpKind::Gt => "gt",
            BinOpKind::GtEq => "gt-eq",
            BinOpKind::BitOr => "bitwise-or",
            BinOpKind::BitAnd => "bitwise-and",
            BinOpKind::LogOr => "log-or",
            BinOpKind::LogAnd => "log-and",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOpKind::Eq
                | BinOpKind::Neq
                | BinOpKind::Lt
                | BinOpKind::LtEq
                | BinOpKind::Gt
                | BinOpKind::GtEq
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOpKind {
    /// Arithmetic negation `-`
    Minus,
    /// Logical negation `!`
    Neg,
    /// Address-of `&`
    Addrof,
    /// Pointer dereference `*`
    Deref,
}

impl UnaryOpKind {
    pub fn from_token(kind: TokenKind) -> Option<UnaryOpKind> {
        match kind {
            TokenKind::Minus => Some(UnaryOpKind::Minus),
            TokenKind::Bang => Some(UnaryOpKind::Neg),
            TokenKind::Ampersand => Some(UnaryOpKind::Addrof),
            TokenKind::Asterisk => Some(UnaryOpKind::Deref),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UnaryOpKind::Minus => "minus",
            UnaryOpKind::Neg => "neg",
            UnaryOpKind::Addrof => "addrof",
            UnaryOpKind::Deref => "deref",
        }
    }
}

/// Builtin procedures live in a reserved namespace checked before symbol
/// lookup. Currently just the inline-assembly escape hatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinProc {
    Asm,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Callee {
    Expr(NodeId),
    Builtin(BuiltinProc),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExprLiteral {
    pub op: Token,
    pub kind: LiteralKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExprGrouping {
    pub op: Token,
    pub expr: NodeId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExprBinOp {
    pub op: Token,
    pub kind: BinOpKind,
    pub lhs: NodeId,
    pub rhs: NodeId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExprUnaryOp {
    pub op: Token,
    pub kind: UnaryOpKind,
    pub node: NodeId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExprCall {
    pub op: Token,
    pub callee: Callee,
    pub args: Vec<NodeId>,
}

/// `expr[index]`. Lowered away by desugaring; later passes never see it.
#[derive(Debug, Clone, PartialEq)]
pub struct ExprIndex {
    pub op: Token,
    pub expr: NodeId,
    pub index: NodeId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExprAssign {
    pub op: Token,
    pub target: NodeId,
    pub value: NodeId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub op: Token,
    pub stmts: Vec<NodeId>,
    /// Filled in by symbol-table construction.
    pub scope: Option<ScopeId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeclProc {
    pub op: Token,
    pub ident: Token,
    /// Always `Type::Proc`; holds the signature.
    pub ty: Type,
    /// `None` for an extern declaration (`proc f(...);`).
    pub body: Option<NodeId>,
    /// Frame size in bytes, precomputed during layout.
    pub stack_size: u64,
}

impl DeclProc {
    pub fn signature(&self) -> &ProcSignature {
        match &self.ty {
            Type::Proc(sig) => sig,
            other => panic!("procedure node carries non-procedure type {:?}", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeclTable {
    pub op: Token,
    pub ident: Token,
    pub fields: Vec<Param>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StmtVarDecl {
    pub op: Token,
    pub ident: Token,
    pub ty: Type,
    pub init: Option<NodeId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StmtIf {
    pub op: Token,
    pub condition: NodeId,
    pub then_body: NodeId,
    pub else_body: Option<NodeId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StmtWhile {
    pub op: Token,
    pub condition: NodeId,
    pub body: NodeId,
}

/// `for vardecl, cond, step { body }`. Lowered to a block holding the
/// vardecl and a while-loop; later passes never see it.
#[derive(Debug, Clone, PartialEq)]
pub struct StmtFor {
    pub op: Token,
    pub vardecl: NodeId,
    pub condition: NodeId,
    pub step: NodeId,
    pub body: NodeId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StmtReturn {
    pub op: Token,
    pub expr: Option<NodeId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AstNode {
    Literal(ExprLiteral),
    Grouping(ExprGrouping),
    BinOp(ExprBinOp),
    UnaryOp(ExprUnaryOp),
    Call(ExprCall),
    Index(ExprIndex),
    Assign(ExprAssign),
    Block(Block),
    Proc(DeclProc),
    Table(DeclTable),
    VarDecl(StmtVarDecl),
    If(StmtIf),
    While(StmtWhile),
    For(StmtFor),
    Return(StmtReturn),
}

impl AstNode {
    /// The originating token, for diagnostics.
    pub fn token(&self) -> &Token {
        match self {
            AstNode::Literal(n) => &n.op,
            AstNode::Grouping(n) => &n.op,
            AstNode::BinOp(n) => &n.op,
            AstNode::UnaryOp(n) => &n.op,
            AstNode::Call(n) => &n.op,
            AstNode::Index(n) => &n.op,
            AstNode::Assign(n) => &n.op,
            AstNode::Block(n) => &n.op,
            AstNode::Proc(n) => &n.op,
            AstNode::Table(n) => &n.op,
            AstNode::VarDecl(n) => &n.op,
            AstNode::If(n) => &n.op,
            AstNode::While(n) => &n.op,
            AstNode::For(n) => &n.op,
            AstNode::Return(n) => &n.op,
        }
    }

    /// Child node ids in traversal order.
    fn children(&self) -> Vec<NodeId> {
        match self {
            AstNode::Literal(_) | AstNode::Table(_) => Vec::new(),
            AstNode::Grouping(n) => vec![n.expr],
            AstNode::BinOp(n) => vec![n.lhs, n.rhs],
            AstNode::UnaryOp(n) => vec![n.node],
            AstNode::Call(n) => {
                let mut out = Vec::new();
                if let Callee::Expr(callee) = n.callee {
                    out.push(callee);
                }
                out.extend(&n.args);
                out
            }
            AstNode::Index(n) => vec![n.expr, n.index],
            AstNode::Assign(n) => vec![n.target, n.value],
            AstNode::Block(n) => n.stmts.clone(),
            AstNode::Proc(n) => n.body.into_iter().collect(),
            AstNode::VarDecl(n) => n.init.into_iter().collect(),
            AstNode::If(n) => {
                let mut out = vec![n.condition, n.then_body];
                out.extend(n.else_body);
                out
            }
            AstNode::While(n) => vec![n.condition, n.body],
            AstNode::For(n) => vec![n.vardecl, n.condition, n.step, n.body],
            AstNode::Return(n) => n.expr.into_iter().collect(),
        }
    }
}

/// Arena owning every node of one compilation unit.
///
/// Nodes are never freed individually; dropping the arena reclaims the
/// whole tree at once.
#[derive(Debug, Default)]
pub struct Ast {
    nodes: Vec<AstNode>,
}

impl Ast {
    pub fn new() -> Self {
        Ast::default()
    }

    pub fn alloc(&mut self, node: AstNode) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn node(&self, id: NodeId) -> &AstNode {
        &self.nodes[id.0 as usize]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut AstNode {
        &mut self.nodes[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Depth-first walk. `pre` fires before descending into a node's
    /// children, `post` after.
    pub fn traverse<Pre, Post>(&self, root: NodeId, pre: &mut Pre, post: &mut Post)
    where
        Pre: FnMut(&Ast, NodeId, usize),
        Post: FnMut(&Ast, NodeId, usize),
    {
        self.traverse_at(root, 0, pre, post);
    }

    fn traverse_at<Pre, Post>(&self, id: NodeId, depth: usize, pre: &mut Pre, post: &mut Post)
    where
        Pre: FnMut(&Ast, NodeId, usize),
        Post: FnMut(&Ast, NodeId, usize),
    {
        pre(self, id, depth);
        for child in self.node(id).children() {
            self.traverse_at(child, depth + 1, pre, post);
        }
        post(self, id, depth);
    }

    /// Depth-first walk with mutable access, for rewrite passes. The child
    /// list is re-read after `pre` runs, so a callback that replaces the
    /// node in place has its replacement's children visited.
    pub fn traverse_mut<Pre>(&mut self, root: NodeId, pre: &mut Pre)
    where
        Pre: FnMut(&mut Ast, NodeId, usize),
    {
        self.traverse_mut_at(root, 0, pre);
    }

    fn traverse_mut_at<Pre>(&mut self, id: NodeId, depth: usize, pre: &mut Pre)
    where
        Pre: FnMut(&mut Ast, NodeId, usize),
    {
        pre(self, id, depth);
        for child in self.node(id).children() {
            self.traverse_mut_at(child, depth + 1, pre);
        }
    }

    /// Render the tree as indented lines. Backs `--dump-ast`.
    pub fn render_tree(&self, root: NodeId, spacing: usize, colors: &Colors) -> String {
        let mut out = String::new();

        self.traverse(
            root,
            &mut |ast: &Ast, id: NodeId, depth: usize| {
                for _ in 0..depth * spacing {
                    out.push_str(colors.dim);
                    out.push('.');
                    out.push_str(colors.reset);
                }
                out.push_str(&render_node(ast.node(id), colors));
                out.push('\n');
            },
            &mut |_, _, _| {},
        );

        out
    }

    pub fn dump(&self, root: NodeId, spacing: usize) {
        eprint!("{}", self.render_tree(root, spacing, &Colors::stderr()));
    }
}

fn render_node(node: &AstNode, colors: &Colors) -> String {
    let kw = colors.red;
    let sem = colors.blue;
    let val = colors.bold;
    let reset = colors.reset;

    match node {
        AstNode::Block(_) => format!("{}block{}", sem, reset),
        AstNode::Grouping(_) => format!("{}grouping{}", sem, reset),
        AstNode::If(_) => format!("{}if{}", kw, reset),
        AstNode::While(_) => format!("{}while{}", kw, reset),
        AstNode::For(_) => format!("{}for{}", kw, reset),
        AstNode::Index(_) => format!("{}index{}", sem, reset),
        AstNode::Assign(_) => format!("{}assign{}", sem, reset),
        AstNode::Return(n) => {
            if n.expr.is_none() {
                format!("{}return{} (no-expr)", kw, reset)
            } else {
                format!("{}return{}", kw, reset)
            }
        }
        AstNode::BinOp(n) => format!("{}{}{}", sem, n.kind.as_str(), reset),
        AstNode::UnaryOp(n) => format!("{}{}{}", sem, n.kind.as_str(), reset),
        AstNode::Call(n) => match n.callee {
            Callee::Builtin(BuiltinProc::Asm) => format!("{}call{} {}asm{}", sem, reset, val, reset),
            Callee::Expr(_) => format!("{}call{}", sem, reset),
        },
        AstNode::Proc(n) => {
            let sig = n.signature();
            let params: Vec<&str> = sig.params.iter().map(|p| p.ident.as_str()).collect();
            let mut line = format!(
                "{}proc{}: {}{}({}){}",
                kw,
                reset,
                val,
                n.ident.value,
                params.join(", "),
                reset
            );
            if n.body.is_none() {
                line.push_str(" (no-body)");
            }
            line
        }
        AstNode::Table(n) => format!("{}table{}: {}{}{}", kw, reset, val, n.ident.value, reset),
        AstNode::VarDecl(n) => format!(
            "{}vardecl{}: {}{}{} {}",
            kw, reset, val, n.ident.value, reset, n.ty
        ),
        AstNode::Literal(n) => match n.kind {
            LiteralKind::Ident => format!("{}ident{}: {}", kw, reset, n.op.value),
            LiteralKind::String => format!("{}string{}: \"{}\"", kw, reset, n.op.value),
            LiteralKind::Number => {
                let width = match n.op.width {
                    NumberWidth::Char => " (char)",
                    NumberWidth::Int => " (int)",
                    NumberWidth::Long => " (long)",
                    NumberWidth::Any => "",
                };
                format!("{}number{}: {}{}", kw, reset, n.op.number, width)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::NumberWidth;

    fn tok(kind: TokenKind) -> Token {
        Token {
            kind,
            value: String::new(),
            number: 0,
            width: NumberWidth::Any,
            pos: 0,
            len: 0,
            line: 1,
            column: 1,
        }
    }

    fn number(ast: &mut Ast, n: i64) -> NodeId {
        let mut t = tok(TokenKind::Number);
        t.number = n;
        ast.alloc(AstNode::Literal(ExprLiteral {
            op: t,
            kind: LiteralKind::Number,
        }))
    }

    #[test]
    fn test_traverse_orders_and_depth() {
        let mut ast = Ast::new();
        let lhs = number(&mut ast, 1);
        let rhs = number(&mut ast, 2);
        let add = ast.alloc(AstNode::BinOp(ExprBinOp {
            op: tok(TokenKind::Plus),
            kind: BinOpKind::Add,
            lhs,
            rhs,
        }));
        let block = ast.alloc(AstNode::Block(Block {
            op: tok(TokenKind::Lbrace),
            stmts: vec![add],
            scope: None,
        }));

        let mut pre = Vec::new();
        let mut post = Vec::new();
        ast.traverse(
            block,
            &mut |_, id, depth| pre.push((id, depth)),
            &mut |_, id, depth| post.push((id, depth)),
        );

        assert_eq!(pre, vec![(block, 0), (add, 1), (lhs, 2), (rhs, 2)]);
        assert_eq!(post, vec![(lhs, 2), (rhs, 2), (add, 1), (block, 0)]);
    }

    #[test]
    fn test_traversal_visits_each_node_once() {
        let mut ast = Ast::new();
        let a = number(&mut ast, 1);
        let b = number(&mut ast, 2);
        let add = ast.alloc(AstNode::BinOp(ExprBinOp {
            op: tok(TokenKind::Plus),
            kind: BinOpKind::Add,
            lhs: a,
            rhs: b,
        }));
        let ret = ast.alloc(AstNode::Return(StmtReturn {
            op: tok(TokenKind::KwReturn),
            expr: Some(add),
        }));
        let block = ast.alloc(AstNode::Block(Block {
            op: tok(TokenKind::Lbrace),
            stmts: vec![ret],
            scope: None,
        }));

        let mut visits = 0;
        ast.traverse(block, &mut |_, _, _| visits += 1, &mut |_, _, _| {});
        assert_eq!(visits, ast.len());
    }

    #[test]
    fn test_render_tree_indents() {
        let mut ast = Ast::new();
        let value = number(&mut ast, 7);
        let ret = ast.alloc(AstNode::Return(StmtReturn {
            op: tok(TokenKind::KwReturn),
            expr: Some(value),
        }));
        let block = ast.alloc(AstNode::Block(Block {
            op: tok(TokenKind::Lbrace),
            stmts: vec![ret],
            scope: None,
        }));

        let rendered = ast.render_tree(block, 2, &Colors::OFF);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "block");
        assert_eq!(lines[1], "..return");
        assert_eq!(lines[2], "....number: 7");
    }
}
