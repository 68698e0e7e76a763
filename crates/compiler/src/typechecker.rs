//! Type checker for Seron
//!
//! A recursive walk over the desugared AST with an explicit current scope.
//! Expressions yield their type; statements yield void. The first mismatch
//! is fatal: checking stops and the diagnostic points at the offending
//! token with the expected and actual types.
//!
//! Type equality is structural (see [`crate::types`]); the one deliberate
//! asymmetry is pointer arithmetic: `pointer + integer` (and `-`) yields
//! the pointer type, which the index desugaring relies on.

use crate::ast::{
    Ast, AstNode, BinOpKind, BuiltinProc, Callee, ExprCall, LiteralKind, NodeId, UnaryOpKind,
};
use crate::diagnostics::Diagnostic;
use crate::lexer::{NumberWidth, Token};
use crate::symboltable::{ScopeId, Symbol, SymbolTable};
use crate::types::Type;

pub struct TypeChecker<'a> {
    ast: &'a Ast,
    table: &'a SymbolTable,
}

/// Check a whole program. `root` must be the desugared program block with
/// resolved scopes.
pub fn check(ast: &Ast, root: NodeId, table: &SymbolTable) -> Result<(), Diagnostic> {
    let checker = TypeChecker { ast, table };

    let AstNode::Block(program) = ast.node(root) else {
        return Err(Diagnostic::error("program root is not a block"));
    };
    let scope = program
        .scope
        .ok_or_else(|| Diagnostic::error("program scope was not resolved"))?;

    for &stmt in &program.stmts {
        checker.check_node(stmt, scope, None)?;
    }

    Ok(())
}

fn mismatch(tok: &Token, expected: &Type, actual: &Type) -> Diagnostic {
    Diagnostic::error_at(
        tok,
        format!("Invalid type `{}`, expected `{}`", actual, expected),
    )
}

impl<'a> TypeChecker<'a> {
    fn check_node(
        &self,
        id: NodeId,
        scope: ScopeId,
        returns: Option<&Type>,
    ) -> Result<Type, Diagnostic> {
        match self.ast.node(id) {
            AstNode::Literal(lit) => match lit.kind {
                LiteralKind::Number => Ok(match lit.op.width {
                    NumberWidth::Char => Type::Char,
                    NumberWidth::Long => Type::Long,
                    NumberWidth::Int | NumberWidth::Any => Type::Int,
                }),
                LiteralKind::String => Ok(Type::Pointer(Box::new(Type::Char))),
                LiteralKind::Ident => {
                    let name = &lit.op.value;
                    match self.table.lookup(scope, name) {
                        Some(symbol) => Ok(symbol.ty().clone()),
                        None => Err(Diagnostic::error_at(
                            &lit.op,
                            format!("Symbol `{}` does not exist", name),
                        )),
                    }
                }
            },

            AstNode::Grouping(group) => self.check_node(group.expr, scope, returns),

            AstNode::UnaryOp(unary) => {
                let operand = self.check_node(unary.node, scope, returns)?;
                match unary.kind {
                    UnaryOpKind::Neg | UnaryOpKind::Minus => Ok(operand),
                    UnaryOpKind::Deref => match operand {
                        Type::Pointer(pointee) => Ok(*pointee),
                        other => Err(Diagnostic::error_at(
                            &unary.op,
                            format!("Cannot dereference non-pointer type `{}`", other),
                        )),
                    },
                    UnaryOpKind::Addrof => {
                        if !self.is_lvalue(unary.node) {
                            return Err(Diagnostic::error_at(
                                &unary.op,
                                "Can only take the address of a variable or dereference",
                            ));
                        }
                        Ok(Type::Pointer(Box::new(operand)))
                    }
                }
            }

            AstNode::BinOp(binop) => {
                let lhs = self.check_node(binop.lhs, scope, returns)?;
                let rhs = self.check_node(binop.rhs, scope, returns)?;

                // Pointer arithmetic: pointer +- integer keeps the pointer
                // type. Index expressions desugar to exactly this shape.
                if matches!(binop.kind, BinOpKind::Add | BinOpKind::Sub)
                    && matches!(lhs, Type::Pointer(_))
                    && rhs.is_integer()
                {
                    return Ok(lhs);
                }

                if lhs != rhs {
                    return Err(mismatch(&binop.op, &lhs, &rhs));
                }

                match binop.kind {
                    kind if kind.is_comparison() => Ok(Type::Int),
                    BinOpKind::LogOr | BinOpKind::LogAnd => {
                        if !lhs.is_integer() {
                            return Err(Diagnostic::error_at(
                                &binop.op,
                                format!("Logical operands must have integer type, got `{}`", lhs),
                            ));
                        }
                        Ok(Type::Int)
                    }
                    _ => Ok(lhs),
                }
            }

            AstNode::Assign(assign) => {
                if !self.is_lvalue(assign.target) {
                    return Err(Diagnostic::error_at(&assign.op, "Invalid assignment target"));
                }
                let target = self.check_node(assign.target, scope, returns)?;
                let value = self.check_node(assign.value, scope, returns)?;
                if target != value {
                    return Err(mismatch(&assign.op, &target, &value));
                }
                Ok(value)
            }

            AstNode::Call(call) => self.check_call(call, scope, returns),

            AstNode::Block(block) => {
                let inner = block
                    .scope
                    .ok_or_else(|| Diagnostic::error_at(&block.op, "block scope was not resolved"))?;
                for &stmt in &block.stmts {
                    self.check_node(stmt, inner, returns)?;
                }
                Ok(Type::Void)
            }

            AstNode::Proc(proc) => {
                if let Some(body) = proc.body {
                    let returntype = proc.signature().returntype.clone();
                    self.check_node(body, scope, Some(&returntype))?;
                }
                Ok(Type::Void)
            }

            AstNode::VarDecl(decl) => {
                if let Some(init) = decl.init {
                    let actual = self.check_node(init, scope, returns)?;
                    if actual != decl.ty {
                        return Err(mismatch(&decl.op, &decl.ty, &actual));
                    }
                }
                Ok(Type::Void)
            }

            AstNode::If(if_) => {
                self.check_condition(if_.condition, &if_.op, scope, returns)?;
                self.check_node(if_.then_body, scope, returns)?;
                if let Some(else_body) = if_.else_body {
                    self.check_node(else_body, scope, returns)?;
                }
                Ok(Type::Void)
            }

            AstNode::While(while_) => {
                self.check_condition(while_.condition, &while_.op, scope, returns)?;
                self.check_node(while_.body, scope, returns)?;
                Ok(Type::Void)
            }

            AstNode::Return(ret) => {
                let expected = returns.ok_or_else(|| {
                    Diagnostic::error_at(&ret.op, "Return outside of a procedure")
                })?;
                let actual = match ret.expr {
                    Some(expr) => self.check_node(expr, scope, returns)?,
                    None => Type::Void,
                };
                if &actual != expected {
                    return Err(mismatch(&ret.op, expected, &actual));
                }
                Ok(Type::Void)
            }

            AstNode::Table(_) => Ok(Type::Void),

            // Lowered away before type checking runs.
            AstNode::For(for_) => Err(Diagnostic::error_at(
                &for_.op,
                "for-loop reached the type checker without being lowered",
            )),
            AstNode::Index(index) => Err(Diagnostic::error_at(
                &index.op,
                "index expression reached the type checker without being lowered",
            )),
        }
    }

    fn check_condition(
        &self,
        condition: NodeId,
        op: &Token,
        scope: ScopeId,
        returns: Option<&Type>,
    ) -> Result<(), Diagnostic> {
        let ty = self.check_node(condition, scope, returns)?;
        if !ty.is_integer() {
            return Err(Diagnostic::error_at(
                op,
                format!("Condition must have integer type, got `{}`", ty),
            ));
        }
        Ok(())
    }

    fn check_call(
        &self,
        call: &ExprCall,
        scope: ScopeId,
        returns: Option<&Type>,
    ) -> Result<Type, Diagnostic> {
        let callee = match call.callee {
            Callee::Builtin(BuiltinProc::Asm) => return self.check_asm(call, scope),
            Callee::Expr(callee) => callee,
        };

        let sig = match self.check_node(callee, scope, returns)? {
            Type::Proc(sig) => sig,
            other => {
                return Err(Diagnostic::error_at(
                    &call.op,
                    format!("Callee must be a procedure, got `{}`", other),
                ));
            }
        };

        if call.args.len() != sig.params.len() {
            return Err(Diagnostic::error_at(
                &call.op,
                format!(
                    "Expected {} arguments, got {}",
                    sig.params.len(),
                    call.args.len()
                ),
            ));
        }

        for (arg, param) in call.args.iter().zip(&sig.params) {
            let actual = self.check_node(*arg, scope, returns)?;
            if actual != param.ty {
                return Err(mismatch(self.ast.node(*arg).token(), &param.ty, &actual));
            }
        }

        Ok(sig.returntype)
    }

    /// `asm(template, operands...)`: the template must be a string literal
    /// whose `{}` placeholders match the operand count; every operand must
    /// name a variable or parameter so it has a frame slot to substitute.
    fn check_asm(&self, call: &ExprCall, scope: ScopeId) -> Result<Type, Diagnostic> {
        let Some(&template) = call.args.first() else {
            return Err(Diagnostic::error_at(
                &call.op,
                "asm() requires a template string argument",
            ));
        };

        let AstNode::Literal(lit) = self.ast.node(template) else {
            return Err(Diagnostic::error_at(
                self.ast.node(template).token(),
                "First argument to asm() must be a string literal",
            ));
        };
        if lit.kind != LiteralKind::String {
            return Err(Diagnostic::error_at(
                &lit.op,
                "First argument to asm() must be a string literal",
            ));
        }

        let placeholders = lit.op.value.matches("{}").count();
        let operands = call.args.len() - 1;
        if placeholders != operands {
            return Err(Diagnostic::error_at(
                &call.op,
                format!(
                    "asm() template has {} placeholders, got {} operands",
                    placeholders, operands
                ),
            ));
        }

        for &arg in &call.args[1..] {
            let AstNode::Literal(operand) = self.ast.node(arg) else {
                return Err(Diagnostic::error_at(
                    self.ast.node(arg).token(),
                    "asm() operands must be variables",
                ));
            };
            if operand.kind != LiteralKind::Ident {
                return Err(Diagnostic::error_at(
                    &operand.op,
                    "asm() operands must be variables",
                ));
            }
            match self.table.lookup(scope, &operand.op.value) {
                Some(Symbol::Variable { .. }) | Some(Symbol::Parameter { .. }) => {}
                Some(_) => {
                    return Err(Diagnostic::error_at(
                        &operand.op,
                        "asm() operands must be variables",
                    ));
                }
                None => {
                    return Err(Diagnostic::error_at(
                        &operand.op,
                        format!("Symbol `{}` does not exist", operand.op.value),
                    ));
                }
            }
        }

        Ok(Type::Void)
    }

    // Post-desugaring lvalues: identifiers and dereferences.
    fn is_lvalue(&self, id: NodeId) -> bool {
        match self.ast.node(id) {
            AstNode::Literal(lit) => lit.kind == LiteralKind::Ident,
            AstNode::UnaryOp(unary) => unary.kind == UnaryOpKind::Deref,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desugar;
    use crate::parser;
    use crate::symboltable;

    fn check_src(src: &str) -> Result<(), Diagnostic> {
        let mut ast = Ast::new();
        let root = parser::parse(src, &mut ast).unwrap();
        desugar::desugar(&mut ast, root);
        let table = symboltable::build(&mut ast, root).unwrap();
        check(&ast, root, &table)
    }

    fn check_err(src: &str) -> Diagnostic {
        check_src(src).unwrap_err()
    }

    #[test]
    fn test_well_typed_programs_pass() {
        let sources = [
            "proc main() int { return 1 + 2; }",
            "proc add(a: int, b: int) int { return a + b; }",
            "proc main() int { let x: int = 5; while x > 0 { x = x - 1; } return x; }",
            "proc f(xs: *int) int { return xs[2]; }",
            "proc f(p: *char) char { return *p; }",
            "proc f() *char { return \"hi\"; }",
            "proc f(a: long) long { return -a; }",
            "proc f(a: int) int { return !a; }",
            "proc f(a: int, b: int) int { return a < b || a == b && b > 0; }",
            "proc f() { return; }",
            "proc g(n: int) int; proc f() int { return g(3); }",
            "proc f(x: int) *int { return &x; }",
            "proc f() int { let c: char = 65c; let l: long = 1l; return 0; }",
            "proc id(n: int) int { return n; } proc f(cb: proc(n: int) int) int { return cb(4); } proc main() int { return f(id); }",
            "proc f() { let x: int = 0; asm(\"mov dword {}, 42\", x); }",
            "proc f(xs: *int) { xs[1] = 2; }",
        ];
        for src in sources {
            assert!(check_src(src).is_ok(), "expected {:?} to typecheck", src);
        }
    }

    #[test]
    fn test_unknown_symbol() {
        let err = check_err("proc f() int { return x; }");
        assert!(err.message.contains("Symbol `x` does not exist"));
        assert!(err.span.is_some());
    }

    #[test]
    fn test_vardecl_initializer_mismatch() {
        let err = check_err("proc f() { let x: int = 1l; }");
        assert!(err.message.contains("Invalid type `long`, expected `int`"));
    }

    #[test]
    fn test_binop_operand_mismatch() {
        let err = check_err("proc f(a: int, b: long) long { return a + b; }");
        assert!(err.message.contains("Invalid type"));
    }

    #[test]
    fn test_arity_mismatch() {
        let err = check_err("proc g(a: int) int; proc f(a: int) int { return g(a, a); }");
        assert!(err.message.contains("Expected 1 arguments, got 2"));
    }

    #[test]
    fn test_argument_type_mismatch() {
        let err = check_err("proc g(a: int) int; proc f() int { return g(1l); }");
        assert!(err.message.contains("Invalid type `long`, expected `int`"));
    }

    #[test]
    fn test_callee_must_be_procedure() {
        let err = check_err("proc f() { let x: int = 1; x(); }");
        assert!(err.message.contains("Callee must be a procedure"));
    }

    #[test]
    fn test_deref_non_pointer() {
        let err = check_err("proc f(a: int) int { return *a; }");
        assert!(err.message.contains("Cannot dereference non-pointer type `int`"));
    }

    #[test]
    fn test_addrof_non_lvalue() {
        let err = check_err("proc f() *int { return &(1 + 2); }");
        assert!(err.message.contains("address"));
    }

    #[test]
    fn test_condition_must_be_integer() {
        let err = check_err("proc f(p: *int) { while p { } }");
        assert!(err.message.contains("Condition must have integer type"));
    }

    #[test]
    fn test_return_type_mismatch() {
        let err = check_err("proc f() int { return 1l; }");
        assert!(err.message.contains("Invalid type `long`, expected `int`"));
    }

    #[test]
    fn test_missing_return_value() {
        let err = check_err("proc f() int { return; }");
        assert!(err.message.contains("Invalid type `void`, expected `int`"));
    }

    #[test]
    fn test_comparison_yields_int() {
        // long < long compares fine and yields int, usable as condition
        assert!(check_src("proc f(a: long) { if a < 2l { } }").is_ok());
        // but assigning the comparison to a long is a mismatch
        let err = check_err("proc f(a: long) { let x: long = a < 2l; }");
        assert!(err.message.contains("Invalid type `int`, expected `long`"));
    }

    #[test]
    fn test_pointer_arithmetic_is_directional() {
        assert!(check_src("proc f(p: *int) *int { return p + 1; }").is_ok());
        let err = check_err("proc f(p: *int) *int { return 1 + p; }");
        assert!(err.message.contains("Invalid type"));
    }

    #[test]
    fn test_assignment_types() {
        assert!(check_src("proc f(p: *int) { *p = 3; }").is_ok());
        let err = check_err("proc f(p: *int) { *p = 3l; }");
        assert!(err.message.contains("Invalid type `long`, expected `int`"));
    }

    #[test]
    fn test_asm_placeholder_count() {
        let err = check_err("proc f() { let x: int = 0; asm(\"mov {}, {}\", x); }");
        assert!(err.message.contains("placeholders"));
    }

    #[test]
    fn test_asm_template_must_be_string() {
        let err = check_err("proc f() { asm(1); }");
        assert!(err.message.contains("string literal"));
    }

    #[test]
    fn test_asm_operand_must_be_variable() {
        let err = check_err("proc f() { asm(\"add {}\", 1 + 2); }");
        assert!(err.message.contains("operands must be variables"));
    }

    #[test]
    fn test_string_literal_is_char_pointer() {
        let err = check_err("proc f() *int { return \"nope\"; }");
        assert!(err.message.contains("Invalid type `*char`, expected `*int`"));
    }
}
