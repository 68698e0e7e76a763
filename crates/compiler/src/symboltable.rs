//! Symbol tables, scope tree and frame layout
//!
//! Scopes form a tree mirroring lexical nesting: every block introduces a
//! scope whose parent is the enclosing block's scope. The tree is built in
//! two phases over the AST:
//!
//! * **Phase A** appends a scope per block, records the scope handle on
//!   the block node, and inserts procedure and variable symbols. A
//!   duplicate name within one scope is a fatal error.
//! * **Phase B** inserts each procedure's parameters into its body scope
//!   and precomputes the frame layout: 8 bytes per parameter, the natural
//!   size per local, offsets measured downward from the frame base. No
//!   slot offset is ever below 8, and the final frame size is rounded up
//!   to a multiple of 8.
//!
//! Scopes are owned by the [`SymbolTable`]; parent links are plain
//! [`ScopeId`] back-references, never owning.

use crate::ast::{Ast, AstNode, NodeId};
use crate::diagnostics::{Colors, Diagnostic};
use crate::types::Type;
use std::collections::HashMap;

/// Handle to a scope in the [`SymbolTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(u32);

/// A named value known to the compiler: where it lives and what type it
/// has. Variables and parameters live in the frame at a fixed offset;
/// procedures are external labels.
#[derive(Debug, Clone, PartialEq)]
pub enum Symbol {
    Variable { ty: Type, offset: u64 },
    Parameter { ty: Type, offset: u64 },
    Procedure { ty: Type, label: String },
}

impl Symbol {
    pub fn ty(&self) -> &Type {
        match self {
            Symbol::Variable { ty, .. }
            | Symbol::Parameter { ty, .. }
            | Symbol::Procedure { ty, .. } => ty,
        }
    }

    /// Frame offset for variables and parameters, `None` for procedures.
    pub fn offset(&self) -> Option<u64> {
        match self {
            Symbol::Variable { offset, .. } | Symbol::Parameter { offset, .. } => Some(*offset),
            Symbol::Procedure { .. } => None,
        }
    }
}

#[derive(Debug, Default)]
struct Scope {
    entries: HashMap<String, Symbol>,
    parent: Option<ScopeId>,
}

/// All scopes of one compilation unit.
#[derive(Debug, Default)]
pub struct SymbolTable {
    scopes: Vec<Scope>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable::default()
    }

    fn append(&mut self, parent: Option<ScopeId>) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope {
            entries: HashMap::new(),
            parent,
        });
        id
    }

    pub fn parent(&self, scope: ScopeId) -> Option<ScopeId> {
        self.scopes[scope.0 as usize].parent
    }

    /// Number of scopes on the chain from `scope` to the root, inclusive.
    pub fn chain_len(&self, scope: ScopeId) -> usize {
        let mut len = 1;
        let mut current = scope;
        while let Some(parent) = self.parent(current) {
            len += 1;
            current = parent;
        }
        len
    }

    /// Insert into one scope. `Err` when the name already exists there.
    fn insert(&mut self, scope: ScopeId, name: &str, symbol: Symbol) -> Result<(), ()> {
        let entries = &mut self.scopes[scope.0 as usize].entries;
        if entries.contains_key(name) {
            return Err(());
        }
        entries.insert(name.to_string(), symbol);
        Ok(())
    }

    /// Lookup in one scope only.
    fn get(&self, scope: ScopeId, name: &str) -> Option<&Symbol> {
        self.scopes[scope.0 as usize].entries.get(name)
    }

    fn get_mut(&mut self, scope: ScopeId, name: &str) -> Option<&mut Symbol> {
        self.scopes[scope.0 as usize].entries.get_mut(name)
    }

    /// Lookup walking the parent chain from the innermost scope outward.
    pub fn lookup(&self, scope: ScopeId, name: &str) -> Option<&Symbol> {
        let mut current = Some(scope);
        while let Some(id) = current {
            if let Some(symbol) = self.get(id, name) {
                return Some(symbol);
            }
            current = self.parent(id);
        }
        None
    }

    /// Render every scope with its parent link and entries. Entries are
    /// sorted by name so the dump is stable.
    pub fn render(&self, colors: &Colors) -> String {
        let divider = "-----------------------";
        let mut out = String::new();

        for (i, scope) in self.scopes.iter().enumerate() {
            out.push_str(&format!("{}{}{} {}", colors.dim, divider, colors.reset, i));
            match scope.parent {
                Some(parent) => out.push_str(&format!(" -> {}\n", parent.0)),
                None => out.push('\n'),
            }

            let mut names: Vec<&String> = scope.entries.keys().collect();
            names.sort();
            for name in names {
                let symbol = &scope.entries[name];
                out.push_str(&format!("{}{}{}", colors.bold, name, colors.reset));
                match symbol {
                    Symbol::Variable { offset, .. } | Symbol::Parameter { offset, .. } => {
                        out.push_str(&format!(": {}", offset));
                    }
                    Symbol::Procedure { ty, .. } => {
                        out.push_str(&format!(": {}", ty));
                    }
                }
                out.push('\n');
            }
        }

        out.push_str(&format!("{}{}{}\n", colors.dim, divider, colors.reset));
        out
    }

    pub fn dump(&self) {
        eprint!("{}", self.render(&Colors::stderr()));
    }
}

/// Build the scope tree for a desugared AST and precompute frame layout.
pub fn build(ast: &mut Ast, root: NodeId) -> Result<SymbolTable, Diagnostic> {
    let mut table = SymbolTable::new();
    construct(ast, root, None, &mut table)?;
    layout(ast, root, &mut table)?;
    Ok(table)
}

// Phase A. Carries the current parent scope; block nodes append a scope
// and record their handle.
fn construct(
    ast: &mut Ast,
    id: NodeId,
    scope: Option<ScopeId>,
    table: &mut SymbolTable,
) -> Result<(), Diagnostic> {
    match ast.node(id).clone() {
        AstNode::Block(_) => {
            let inner = table.append(scope);
            let AstNode::Block(block) = ast.node_mut(id) else {
                return Ok(());
            };
            block.scope = Some(inner);
            let stmts = block.stmts.clone();

            for stmt in stmts {
                construct(ast, stmt, Some(inner), table)?;
            }
        }

        AstNode::Proc(proc) => {
            let ident = &proc.ident.value;
            // Top-level procedures land in the program scope.
            let scope = scope.ok_or_else(|| {
                Diagnostic::error_at(&proc.ident, "Procedure outside of any scope")
            })?;

            let symbol = Symbol::Procedure {
                ty: proc.ty.clone(),
                label: ident.clone(),
            };
            if table.insert(scope, ident, symbol).is_err() {
                return Err(Diagnostic::error_at(
                    &proc.ident,
                    format!("Procedure `{}` already exists", ident),
                ));
            }

            if let Some(body) = proc.body {
                construct(ast, body, Some(scope), table)?;
            }
        }

        AstNode::VarDecl(decl) => {
            let ident = &decl.ident.value;
            let scope = scope.ok_or_else(|| {
                Diagnostic::error_at(&decl.ident, "Variable declared outside of any scope")
            })?;

            if decl.ty.size().is_none() {
                return Err(Diagnostic::error_at(
                    &decl.ident,
                    format!("Variable `{}` of type `{}` has no storage size", ident, decl.ty),
                ));
            }

            let symbol = Symbol::Variable {
                ty: decl.ty.clone(),
                offset: 0,
            };
            if table.insert(scope, ident, symbol).is_err() {
                return Err(Diagnostic::error_at(
                    &decl.ident,
                    format!("Variable `{}` already exists", ident),
                ));
            }
        }

        // Remaining statements with nested blocks, so every block gets
        // its scope handle.
        AstNode::While(while_) => {
            construct(ast, while_.body, scope, table)?;
        }
        AstNode::If(if_) => {
            construct(ast, if_.then_body, scope, table)?;
            if let Some(else_body) = if_.else_body {
                construct(ast, else_body, scope, table)?;
            }
        }

        _ => {}
    }

    Ok(())
}

// Phase B. Parameters first (8 bytes each), then every local in the body,
// depth first, at its natural size.
fn layout(ast: &mut Ast, root: NodeId, table: &mut SymbolTable) -> Result<(), Diagnostic> {
    let mut procs = Vec::new();
    ast.traverse(
        root,
        &mut |ast, id, _| {
            if matches!(ast.node(id), AstNode::Proc(_)) {
                procs.push(id);
            }
        },
        &mut |_, _, _| {},
    );

    for id in procs {
        let AstNode::Proc(proc) = ast.node(id).clone() else {
            continue;
        };
        let Some(body) = proc.body else {
            continue; // extern declaration, no frame
        };

        let AstNode::Block(block) = ast.node(body) else {
            continue;
        };
        let Some(body_scope) = block.scope else {
            continue;
        };

        let mut stack_size = 0u64;

        for param in &proc.signature().params {
            let symbol = Symbol::Parameter {
                ty: param.ty.clone(),
                offset: 0,
            };
            if table.insert(body_scope, &param.ident, symbol).is_err() {
                return Err(Diagnostic::error_at(
                    &proc.ident,
                    format!("Parameter named `{}` already exists", param.ident),
                ));
            }

            stack_size += 8;
            if let Some(Symbol::Parameter { offset, .. }) = table.get_mut(body_scope, &param.ident)
            {
                *offset = stack_size;
            }
        }

        layout_block(ast, body, table, &mut stack_size);

        // Keep rsp 8-aligned across the prologue.
        stack_size = stack_size.next_multiple_of(8);

        if let AstNode::Proc(proc) = ast.node_mut(id) {
            proc.stack_size = stack_size;
        }
    }

    Ok(())
}

fn layout_block(ast: &Ast, block_id: NodeId, table: &mut SymbolTable, stack_size: &mut u64) {
    let AstNode::Block(block) = ast.node(block_id) else {
        return;
    };
    let Some(scope) = block.scope else {
        return;
    };

    for &stmt in &block.stmts {
        match ast.node(stmt) {
            AstNode::VarDecl(decl) => {
                // Size checked during construction. The first slot is
                // anchored at 8: offsets below the saved base pointer
                // never come closer than [rbp-8].
                let size = decl.ty.size().unwrap_or(8);
                *stack_size = (*stack_size + size).max(8);
                if let Some(Symbol::Variable { offset, .. }) =
                    table.get_mut(scope, &decl.ident.value)
                {
                    *offset = *stack_size;
                }
            }
            AstNode::Block(_) => layout_block(ast, stmt, table, stack_size),
            AstNode::While(while_) => layout_block(ast, while_.body, table, stack_size),
            AstNode::If(if_) => {
                layout_block(ast, if_.then_body, table, stack_size);
                if let Some(else_body) = if_.else_body {
                    layout_block(ast, else_body, table, stack_size);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desugar;
    use crate::parser;

    fn analyzed(src: &str) -> (Ast, NodeId, SymbolTable) {
        let mut ast = Ast::new();
        let root = parser::parse(src, &mut ast).unwrap();
        desugar::desugar(&mut ast, root);
        let table = build(&mut ast, root).unwrap();
        (ast, root, table)
    }

    fn analyze_err(src: &str) -> Diagnostic {
        let mut ast = Ast::new();
        let root = parser::parse(src, &mut ast).unwrap();
        desugar::desugar(&mut ast, root);
        build(&mut ast, root).unwrap_err()
    }

    fn proc_of<'a>(ast: &'a Ast, root: NodeId, index: usize) -> &'a crate::ast::DeclProc {
        let AstNode::Block(program) = ast.node(root) else {
            panic!()
        };
        let AstNode::Proc(proc) = ast.node(program.stmts[index]) else {
            panic!()
        };
        proc
    }

    fn body_scope(ast: &Ast, root: NodeId, index: usize) -> ScopeId {
        let proc = proc_of(ast, root, index);
        let AstNode::Block(block) = ast.node(proc.body.unwrap()) else {
            panic!()
        };
        block.scope.unwrap()
    }

    #[test]
    fn test_every_block_gets_a_scope() {
        let (ast, root, table) = analyzed("proc f() { { { } } while 1 { } }");
        let mut depths = Vec::new();
        ast.traverse(
            root,
            &mut |ast, id, _| {
                if let AstNode::Block(block) = ast.node(id) {
                    let scope = block.scope.expect("block without scope");
                    depths.push(table.chain_len(scope));
                }
            },
            &mut |_, _, _| {},
        );
        // program, body, nested, doubly nested, while body
        assert_eq!(depths, vec![1, 2, 3, 4, 3]);
    }

    #[test]
    fn test_procedure_symbol_in_program_scope() {
        let (ast, root, table) = analyzed("proc add(a: int, b: int) int { return a + b; }");
        let AstNode::Block(program) = ast.node(root) else {
            panic!()
        };
        let program_scope = program.scope.unwrap();
        let Some(Symbol::Procedure { label, ty }) = table.lookup(program_scope, "add") else {
            panic!("add not resolved to a procedure")
        };
        assert_eq!(label, "add");
        assert!(matches!(ty, Type::Proc(_)));
    }

    #[test]
    fn test_parameter_offsets_are_eight_bytes_apart() {
        let (ast, root, table) = analyzed("proc f(a: int, b: char, c: long) { }");
        let scope = body_scope(&ast, root, 0);
        assert_eq!(table.lookup(scope, "a").unwrap().offset(), Some(8));
        assert_eq!(table.lookup(scope, "b").unwrap().offset(), Some(16));
        assert_eq!(table.lookup(scope, "c").unwrap().offset(), Some(24));
        assert_eq!(proc_of(&ast, root, 0).stack_size, 24);
    }

    #[test]
    fn test_local_offsets_use_natural_sizes() {
        let (ast, root, table) =
            analyzed("proc f(n: long) { let a: int = 1; let b: char = 2c; let p: *int; }");
        let scope = body_scope(&ast, root, 0);
        assert_eq!(table.lookup(scope, "n").unwrap().offset(), Some(8));
        assert_eq!(table.lookup(scope, "a").unwrap().offset(), Some(12));
        assert_eq!(table.lookup(scope, "b").unwrap().offset(), Some(13));
        assert_eq!(table.lookup(scope, "p").unwrap().offset(), Some(21));
        // 21 rounded up to the next multiple of 8
        assert_eq!(proc_of(&ast, root, 0).stack_size, 24);
    }

    #[test]
    fn test_leading_small_local_starts_at_eight() {
        // Without parameters, the first slot still sits at [rbp-8].
        let (ast, root, table) =
            analyzed("proc f() { let c: char = 1c; let d: char = 2c; let n: int = 3; }");
        let scope = body_scope(&ast, root, 0);
        assert_eq!(table.lookup(scope, "c").unwrap().offset(), Some(8));
        assert_eq!(table.lookup(scope, "d").unwrap().offset(), Some(9));
        assert_eq!(table.lookup(scope, "n").unwrap().offset(), Some(13));
        assert_eq!(proc_of(&ast, root, 0).stack_size, 16);
    }

    #[test]
    fn test_stack_size_covers_nested_blocks() {
        let (ast, root, table) =
            analyzed("proc f() { let a: long = 1l; { let b: long = 2l; } while 1 { let c: long = 3l; } }");
        assert_eq!(proc_of(&ast, root, 0).stack_size, 24);
        // b lives in the nested scope, not in the body scope
        let scope = body_scope(&ast, root, 0);
        assert!(table.get(scope, "b").is_none());
        assert!(table.lookup(scope, "a").is_some());
    }

    #[test]
    fn test_for_loop_variable_gets_a_slot() {
        let (ast, root, _) =
            analyzed("proc f() { for let i: int = 0, i < 4, i = i + 1 { } }");
        // The desugared block holds the loop variable; it must have
        // contributed to the frame.
        assert_eq!(proc_of(&ast, root, 0).stack_size, 8);
    }

    #[test]
    fn test_lookup_walks_parent_chain_and_shadows() {
        let (ast, root, table) = analyzed(
            "proc f() { let x: int = 1; { let y: int = 2; { let x: long = 3l; } } }",
        );
        let outer = body_scope(&ast, root, 0);

        // Find the innermost scope via the doubly nested block.
        let mut innermost = None;
        ast.traverse(
            root,
            &mut |ast, id, _| {
                if let AstNode::Block(block) = ast.node(id)
                    && let Some(scope) = block.scope
                    && table.get(scope, "x").map(|s| s.ty()) == Some(&Type::Long)
                {
                    innermost = Some(scope);
                }
            },
            &mut |_, _, _| {},
        );
        let innermost = innermost.expect("inner scope not found");

        // Inner x shadows outer x; y is found through the chain.
        assert_eq!(table.lookup(innermost, "x").unwrap().ty(), &Type::Long);
        assert_eq!(table.lookup(outer, "x").unwrap().ty(), &Type::Int);
        assert!(table.lookup(innermost, "y").is_some());
        assert!(table.lookup(outer, "y").is_none());
        assert!(table.lookup(innermost, "nosuch").is_none());
    }

    #[test]
    fn test_duplicate_variable_in_same_block() {
        let err = analyze_err("proc f() { { let x: int = 1; let x: int = 2; } }");
        assert!(err.message.contains("`x` already exists"));
    }

    #[test]
    fn test_duplicate_procedure() {
        let err = analyze_err("proc f() { } proc f() { }");
        assert!(err.message.contains("Procedure `f` already exists"));
    }

    #[test]
    fn test_duplicate_parameter() {
        let err = analyze_err("proc f(a: int, a: int) { }");
        assert!(err.message.contains("Parameter named `a` already exists"));
    }

    #[test]
    fn test_void_variable_rejected() {
        let err = analyze_err("proc f() { let x: void; }");
        assert!(err.message.contains("no storage size"));
    }

    #[test]
    fn test_scope_chain_is_acyclic() {
        let (_, _, table) = analyzed("proc f() { { { { } } } }");
        for i in 0..table.scopes.len() {
            // chain_len terminates for every scope; bound it by the scope
            // count to catch cycles.
            assert!(table.chain_len(ScopeId(i as u32)) <= table.scopes.len());
        }
    }
}
