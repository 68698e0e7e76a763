//! x86-64 code generation
//!
//! Emits NASM-syntax assembly for the Linux System V ABI, integer class
//! only. Text accumulates in two buffers (`.data` for string literals,
//! `.text` for everything else) which are concatenated at the end.
//!
//! # Conventions
//!
//! Every expression leaves its value in the correctly sized sub-register
//! of `rax`; `rdi` carries the second operand of binary operations and the
//! destination of stores. Two emit routines exist: [`CodeGen::emit`]
//! computes a value, [`CodeGen::emit_addr`] computes the address of an
//! lvalue. Both return the type of what they produced.
//!
//! The generator runs after resolution and type checking and relies on
//! their invariants; failures here are compiler bugs surfacing as
//! [`CodegenError::Logic`], not user errors.

use crate::ast::{
    Ast, AstNode, BinOpKind, Block, BuiltinProc, Callee, DeclProc, ExprAssign, ExprBinOp,
    ExprCall, ExprLiteral, ExprUnaryOp, LiteralKind, NodeId, StmtIf, StmtReturn, StmtVarDecl,
    StmtWhile, UnaryOpKind,
};
use crate::lexer::NumberWidth;
use crate::symboltable::{ScopeId, Symbol, SymbolTable};
use crate::types::Type;
use std::fmt::Write as _;

/// Error type for code generation.
///
/// `Logic` marks an internal invariant violation (the input should have
/// been rejected earlier); `Format` wraps buffer write failures so `?`
/// works throughout.
#[derive(Debug)]
pub enum CodegenError {
    Logic(String),
    Format(std::fmt::Error),
}

impl std::fmt::Display for CodegenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodegenError::Logic(msg) => write!(f, "code generation failed: {}", msg),
            CodegenError::Format(e) => write!(f, "code generation write error: {}", e),
        }
    }
}

impl std::error::Error for CodegenError {}

impl From<String> for CodegenError {
    fn from(msg: String) -> Self {
        CodegenError::Logic(msg)
    }
}

impl From<std::fmt::Error> for CodegenError {
    fn from(e: std::fmt::Error) -> Self {
        CodegenError::Format(e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Register {
    Rax,
    Rdi,
    Rsi,
    Rdx,
    Rcx,
    R8,
    R9,
}

/// Name of the sub-register of `reg` matching the width of `ty`.
fn subregister(reg: Register, ty: &Type) -> Result<&'static str, CodegenError> {
    use Register::*;

    let index = match ty {
        Type::Char => 0,
        Type::Int => 1,
        Type::Long | Type::Pointer(_) | Type::Proc(_) => 2,
        other => {
            return Err(CodegenError::Logic(format!(
                "type `{}` has no register representation",
                other
            )));
        }
    };

    let names: [&'static str; 3] = match reg {
        Rax => ["al", "eax", "rax"],
        Rdi => ["dil", "edi", "rdi"],
        Rsi => ["sil", "esi", "rsi"],
        Rdx => ["dl", "edx", "rdx"],
        Rcx => ["cl", "ecx", "rcx"],
        R8 => ["r8b", "r8d", "r8"],
        R9 => ["r9b", "r9d", "r9"],
    };

    Ok(names[index])
}

// x86_64-linux ABI: the first six integer arguments go in registers, the
// rest on the stack. `argnum` starts at 1.
fn abi_register(argnum: usize) -> Option<Register> {
    match argnum {
        1 => Some(Register::Rdi),
        2 => Some(Register::Rsi),
        3 => Some(Register::Rdx),
        4 => Some(Register::Rcx),
        5 => Some(Register::R8),
        6 => Some(Register::R9),
        _ => None,
    }
}

pub struct CodeGen<'a> {
    ast: &'a Ast,
    table: &'a SymbolTable,
    data: String,
    text: String,
    label_count: usize,
    string_count: usize,
    scope: Option<ScopeId>,
    asmdoc: bool,
}

/// Generate the full assembly artifact for a resolved, type-checked
/// program.
pub fn generate(
    ast: &Ast,
    root: NodeId,
    table: &SymbolTable,
    asmdoc: bool,
) -> Result<String, CodegenError> {
    let mut generator = CodeGen {
        ast,
        table,
        data: String::new(),
        text: String::new(),
        label_count: 0,
        string_count: 0,
        scope: None,
        asmdoc,
    };

    generator.emit(root)?;

    Ok(format!(
        "section .data\n{}section .text\n{}",
        generator.data, generator.text
    ))
}

impl<'a> CodeGen<'a> {
    fn comment(&mut self, text: &str) -> Result<(), CodegenError> {
        if self.asmdoc {
            writeln!(self.text, "; {}", text)?;
        }
        Ok(())
    }

    fn current_scope(&self) -> Result<ScopeId, CodegenError> {
        self.scope
            .ok_or_else(|| CodegenError::Logic("no scope active during emission".to_string()))
    }

    fn lookup(&self, name: &str) -> Result<Symbol, CodegenError> {
        let scope = self.current_scope()?;
        self.table
            .lookup(scope, name)
            .cloned()
            .ok_or_else(|| CodegenError::Logic(format!("symbol `{}` vanished after analysis", name)))
    }

    fn next_label(&mut self) -> usize {
        let label = self.label_count;
        self.label_count += 1;
        label
    }

    /// Compute the value of `id` into `rax`, returning its type.
    fn emit(&mut self, id: NodeId) -> Result<Type, CodegenError> {
        match self.ast.node(id).clone() {
            AstNode::Block(block) => self.block(&block),
            AstNode::Proc(proc) => self.proc(&proc),
            AstNode::Return(ret) => self.return_(&ret),
            AstNode::VarDecl(decl) => self.vardecl(&decl),
            AstNode::If(if_) => self.cond(&if_),
            AstNode::While(while_) => self.while_(&while_),
            AstNode::Grouping(group) => self.emit(group.expr),
            AstNode::Assign(assign) => self.assign(&assign),
            AstNode::BinOp(binop) => self.binop(&binop),
            AstNode::UnaryOp(unary) => self.unaryop(&unary),
            AstNode::Call(call) => self.call(&call),
            AstNode::Literal(lit) => self.literal(&lit),
            AstNode::Table(_) => Ok(Type::Void),
            AstNode::For(_) | AstNode::Index(_) => Err(CodegenError::Logic(
                "surface form reached the generator without being lowered".to_string(),
            )),
        }
    }

    /// Compute the address of the lvalue `id` into `rax`, returning a
    /// pointer to the lvalue's type. Defined on identifiers and
    /// dereferences only.
    fn emit_addr(&mut self, id: NodeId) -> Result<Type, CodegenError> {
        match self.ast.node(id).clone() {
            AstNode::Literal(lit) => self.literal_addr(&lit),
            AstNode::UnaryOp(unary) if unary.kind == UnaryOpKind::Deref => {
                // The operand already evaluates to the address.
                self.emit(unary.node)
            }
            other => Err(CodegenError::Logic(format!(
                "node `{:?}` is not an lvalue",
                other.token().kind.as_str()
            ))),
        }
    }

    fn block(&mut self, block: &Block) -> Result<Type, CodegenError> {
        let old_scope = self.scope;
        self.scope = Some(block.scope.ok_or_else(|| {
            CodegenError::Logic("block without resolved scope".to_string())
        })?);

        for &stmt in &block.stmts {
            self.emit(stmt)?;
        }

        self.scope = old_scope;
        Ok(Type::Void)
    }

    fn proc(&mut self, proc: &DeclProc) -> Result<Type, CodegenError> {
        let ident = &proc.ident.value;
        let sig = proc.signature();

        let Some(body) = proc.body else {
            self.comment(&format!("extern proc {}", ident))?;
            writeln!(self.text, "extern {}", ident)?;
            return Ok(Type::Void);
        };

        self.comment(&format!("proc {}", ident))?;
        writeln!(self.text, "global {}", ident)?;
        writeln!(self.text, "{}:", ident)?;
        writeln!(self.text, "push rbp")?;
        writeln!(self.text, "mov rbp, rsp")?;
        writeln!(self.text, "sub rsp, {}", proc.stack_size)?;

        let AstNode::Block(body_block) = self.ast.node(body) else {
            return Err(CodegenError::Logic("procedure body is not a block".to_string()));
        };
        let body_scope = body_block.scope.ok_or_else(|| {
            CodegenError::Logic("procedure body without resolved scope".to_string())
        })?;

        // Move arguments into their frame slots. Stack-passed arguments
        // start at rbp+16, past the saved base pointer and return address.
        let mut stack_arg_offset = 16u64;
        for (i, param) in sig.params.iter().enumerate() {
            let symbol = self
                .table
                .lookup(body_scope, &param.ident)
                .ok_or_else(|| {
                    CodegenError::Logic(format!("parameter `{}` has no symbol", param.ident))
                })?;
            let offset = symbol.offset().ok_or_else(|| {
                CodegenError::Logic(format!("parameter `{}` has no frame slot", param.ident))
            })?;

            match abi_register(i + 1) {
                Some(reg) => {
                    let reg = subregister(reg, &param.ty)?;
                    writeln!(self.text, "mov [rbp-{}], {}", offset, reg)?;
                }
                None => {
                    let rax = subregister(Register::Rax, &param.ty)?;
                    writeln!(self.text, "mov {}, [rbp+{}]", rax, stack_arg_offset)?;
                    writeln!(self.text, "mov [rbp-{}], {}", offset, rax)?;
                    stack_arg_offset += 8;
                }
            }
        }

        self.emit(body)?;

        writeln!(self.text, ".return:")?;
        writeln!(self.text, "mov rsp, rbp")?;
        writeln!(self.text, "pop rbp")?;
        writeln!(self.text, "ret")?;

        Ok(Type::Void)
    }

    fn return_(&mut self, ret: &StmtReturn) -> Result<Type, CodegenError> {
        self.comment("return")?;
        if let Some(expr) = ret.expr {
            self.emit(expr)?;
        }
        writeln!(self.text, "jmp .return")?;
        Ok(Type::Void)
    }

    fn vardecl(&mut self, decl: &StmtVarDecl) -> Result<Type, CodegenError> {
        let Some(init) = decl.init else {
            return Ok(Type::Void);
        };

        let ident = &decl.ident.value;
        self.comment(&format!("let {}", ident))?;

        let ty = self.emit(init)?;
        let symbol = self.lookup(ident)?;
        let offset = symbol
            .offset()
            .ok_or_else(|| CodegenError::Logic(format!("variable `{}` has no frame slot", ident)))?;
        let rax = subregister(Register::Rax, &ty)?;
        writeln!(self.text, "mov [rbp-{}], {} ; {}", offset, rax, ident)?;

        Ok(Type::Void)
    }

    fn cond(&mut self, if_: &StmtIf) -> Result<Type, CodegenError> {
        let label = self.next_label();

        self.comment("if")?;
        let ty = self.emit(if_.condition)?;
        let rax = subregister(Register::Rax, &ty)?;
        writeln!(self.text, "cmp {}, 0", rax)?;
        writeln!(self.text, "je .else{}", label)?;

        self.emit(if_.then_body)?;

        writeln!(self.text, "jmp .end{}", label)?;
        writeln!(self.text, ".else{}:", label)?;

        if let Some(else_body) = if_.else_body {
            self.emit(else_body)?;
        }

        writeln!(self.text, ".end{}:", label)?;
        Ok(Type::Void)
    }

    fn while_(&mut self, while_: &StmtWhile) -> Result<Type, CodegenError> {
        let label = self.next_label();

        self.comment("while")?;
        writeln!(self.text, "jmp .cond{}", label)?;
        writeln!(self.text, ".while{}:", label)?;

        self.emit(while_.body)?;

        writeln!(self.text, ".cond{}:", label)?;
        let ty = self.emit(while_.condition)?;
        let rax = subregister(Register::Rax, &ty)?;
        writeln!(self.text, "cmp {}, 0", rax)?;
        writeln!(self.text, "jne .while{}", label)?;

        Ok(Type::Void)
    }

    fn assign(&mut self, assign: &ExprAssign) -> Result<Type, CodegenError> {
        self.comment("assign")?;

        self.emit_addr(assign.target)?;
        writeln!(self.text, "push rax")?;

        let ty = self.emit(assign.value)?;
        writeln!(self.text, "pop rdi")?;
        let rax = subregister(Register::Rax, &ty)?;
        writeln!(self.text, "mov [rdi], {}", rax)?;

        Ok(ty)
    }

    fn binop(&mut self, binop: &ExprBinOp) -> Result<Type, CodegenError> {
        // Logical operators short-circuit: the right operand only runs
        // when the left has not already decided the result.
        match binop.kind {
            BinOpKind::LogOr => return self.log_or(binop),
            BinOpKind::LogAnd => return self.log_and(binop),
            _ => {}
        }

        let rhs = self.emit(binop.rhs)?;
        writeln!(self.text, "push rax")?;
        let lhs = self.emit(binop.lhs)?;
        writeln!(self.text, "pop rdi")?;

        // Pointer arithmetic: the integer operand widens to 64 bits, the
        // add/sub runs on the full registers.
        if matches!(binop.kind, BinOpKind::Add | BinOpKind::Sub)
            && matches!(lhs, Type::Pointer(_))
            && rhs.is_integer()
        {
            match rhs {
                Type::Char => writeln!(self.text, "movsx rdi, dil")?,
                Type::Int => writeln!(self.text, "movsxd rdi, edi")?,
                _ => {}
            }
            let op = if binop.kind == BinOpKind::Add { "add" } else { "sub" };
            writeln!(self.text, "{} rax, rdi", op)?;
            return Ok(lhs);
        }

        // LHS: rax, RHS: rdi
        let rax = subregister(Register::Rax, &lhs)?;
        let rdi = subregister(Register::Rdi, &lhs)?;

        match binop.kind {
            BinOpKind::Add => writeln!(self.text, "add {}, {}", rax, rdi)?,
            BinOpKind::Sub => writeln!(self.text, "sub {}, {}", rax, rdi)?,
            BinOpKind::Mul => writeln!(self.text, "imul {}", rdi)?,
            BinOpKind::Div => {
                // Sign-extend the dividend before idiv.
                match lhs {
                    Type::Char => writeln!(self.text, "cbw")?,
                    Type::Long => writeln!(self.text, "cqo")?,
                    _ => writeln!(self.text, "cdq")?,
                }
                writeln!(self.text, "idiv {}", rdi)?;
            }
            BinOpKind::BitOr => writeln!(self.text, "or {}, {}", rax, rdi)?,
            BinOpKind::BitAnd => writeln!(self.text, "and {}, {}", rax, rdi)?,
            kind if kind.is_comparison() => {
                let set = match kind {
                    BinOpKind::Eq => "sete",
                    BinOpKind::Neq => "setne",
                    BinOpKind::Gt => "setg",
                    BinOpKind::GtEq => "setge",
                    BinOpKind::Lt => "setl",
                    _ => "setle",
                };
                writeln!(self.text, "cmp {}, {}", rax, rdi)?;
                writeln!(self.text, "{} al", set)?;
                // Normalize to a clean 0/1 int.
                writeln!(self.text, "movzx eax, al")?;
                return Ok(Type::Int);
            }
            BinOpKind::LogOr | BinOpKind::LogAnd => unreachable!("handled above"),
            _ => unreachable!("all operators covered"),
        }

        Ok(lhs)
    }

    fn log_or(&mut self, binop: &ExprBinOp) -> Result<Type, CodegenError> {
        let label = self.next_label();

        let lhs = self.emit(binop.lhs)?;
        let rax = subregister(Register::Rax, &lhs)?;
        writeln!(self.text, "cmp {}, 0", rax)?;
        writeln!(self.text, "jne .true{}", label)?;

        let rhs = self.emit(binop.rhs)?;
        let rax = subregister(Register::Rax, &rhs)?;
        writeln!(self.text, "cmp {}, 0", rax)?;
        writeln!(self.text, "jne .true{}", label)?;

        writeln!(self.text, "mov eax, 0")?;
        writeln!(self.text, "jmp .end{}", label)?;
        writeln!(self.text, ".true{}:", label)?;
        writeln!(self.text, "mov eax, 1")?;
        writeln!(self.text, ".end{}:", label)?;

        Ok(Type::Int)
    }

    fn log_and(&mut self, binop: &ExprBinOp) -> Result<Type, CodegenError> {
        let label = self.next_label();

        let lhs = self.emit(binop.lhs)?;
        let rax = subregister(Register::Rax, &lhs)?;
        writeln!(self.text, "cmp {}, 0", rax)?;
        writeln!(self.text, "je .false{}", label)?;

        let rhs = self.emit(binop.rhs)?;
        let rax = subregister(Register::Rax, &rhs)?;
        writeln!(self.text, "cmp {}, 0", rax)?;
        writeln!(self.text, "je .false{}", label)?;

        writeln!(self.text, "mov eax, 1")?;
        writeln!(self.text, "jmp .end{}", label)?;
        writeln!(self.text, ".false{}:", label)?;
        writeln!(self.text, "mov eax, 0")?;
        writeln!(self.text, ".end{}:", label)?;

        Ok(Type::Int)
    }

    fn unaryop(&mut self, unary: &ExprUnaryOp) -> Result<Type, CodegenError> {
        match unary.kind {
            UnaryOpKind::Neg => {
                let ty = self.emit(unary.node)?;
                let rax = subregister(Register::Rax, &ty)?;
                writeln!(self.text, "cmp {}, 0", rax)?;
                writeln!(self.text, "sete al")?;
                // Zero-extend the flag to the operand width.
                match ty {
                    Type::Char => {}
                    Type::Int => writeln!(self.text, "movzx eax, al")?,
                    _ => writeln!(self.text, "movzx rax, al")?,
                }
                Ok(ty)
            }

            UnaryOpKind::Minus => {
                let ty = self.emit(unary.node)?;
                let rax = subregister(Register::Rax, &ty)?;
                // imul-with-immediate has no 8-bit form.
                if ty == Type::Char {
                    writeln!(self.text, "neg {}", rax)?;
                } else {
                    writeln!(self.text, "imul {}, -1", rax)?;
                }
                Ok(ty)
            }

            UnaryOpKind::Deref => {
                let ty = self.emit(unary.node)?;
                writeln!(self.text, "mov rax, [rax]")?;
                match ty {
                    Type::Pointer(pointee) => Ok(*pointee),
                    other => Err(CodegenError::Logic(format!(
                        "dereference of non-pointer type `{}`",
                        other
                    ))),
                }
            }

            UnaryOpKind::Addrof => self.emit_addr(unary.node),
        }
    }

    fn call(&mut self, call: &ExprCall) -> Result<Type, CodegenError> {
        let callee = match call.callee {
            Callee::Builtin(BuiltinProc::Asm) => return self.inline_asm(call),
            Callee::Expr(callee) => callee,
        };

        self.comment("call")?;
        let sig = match self.emit(callee)? {
            Type::Proc(sig) => sig,
            other => {
                return Err(CodegenError::Logic(format!(
                    "call through non-procedure type `{}`",
                    other
                )));
            }
        };
        writeln!(self.text, "push rax")?;

        // Stack-passed arguments (beyond six) go first, pushed in reverse
        // source order so the seventh argument ends up on top. A pad slot
        // keeps the stack 16-byte aligned across the call when the spill
        // block plus the saved callee would break it.
        let spill_count = call.args.len().saturating_sub(6);
        let pad = if spill_count > 0 && spill_count % 2 == 0 { 8 } else { 0 };
        if pad > 0 {
            writeln!(self.text, "sub rsp, {}", pad)?;
        }
        for &arg in call.args.iter().skip(6).rev() {
            self.emit(arg)?;
            writeln!(self.text, "push rax")?;
        }

        // Register arguments in source order.
        for (i, &arg) in call.args.iter().take(6).enumerate() {
            let ty = &sig.params[i].ty;
            let reg = abi_register(i + 1).ok_or_else(|| {
                CodegenError::Logic("register argument index out of range".to_string())
            })?;
            self.emit(arg)?;
            let dst = subregister(reg, ty)?;
            let src = subregister(Register::Rax, ty)?;
            writeln!(self.text, "mov {}, {}", dst, src)?;
        }

        if spill_count == 0 {
            writeln!(self.text, "pop rax")?;
            writeln!(self.text, "call rax")?;
        } else {
            // The callee address sits below the spill block.
            let spill_bytes = 8 * spill_count as u64 + pad;
            writeln!(self.text, "mov rax, [rsp+{}]", spill_bytes)?;
            writeln!(self.text, "call rax")?;
            writeln!(self.text, "add rsp, {}", spill_bytes + 8)?;
        }

        Ok(sig.returntype)
    }

    /// Substitute each `{}` in the template with the frame slot of the
    /// corresponding operand and splice the text into the output.
    fn inline_asm(&mut self, call: &ExprCall) -> Result<Type, CodegenError> {
        self.comment("inline asm")?;

        let Some(&template_id) = call.args.first() else {
            return Err(CodegenError::Logic("asm() without a template".to_string()));
        };
        let AstNode::Literal(template) = self.ast.node(template_id) else {
            return Err(CodegenError::Logic("asm() template is not a literal".to_string()));
        };

        let mut line = String::new();
        let mut rest = template.op.value.as_str();
        for &arg in &call.args[1..] {
            let AstNode::Literal(operand) = self.ast.node(arg) else {
                return Err(CodegenError::Logic("asm() operand is not a name".to_string()));
            };
            let name = operand.op.value.clone();
            let symbol = self.lookup(&name)?;
            let offset = symbol.offset().ok_or_else(|| {
                CodegenError::Logic(format!("asm() operand `{}` has no frame slot", name))
            })?;

            let Some(split) = rest.find("{}") else {
                return Err(CodegenError::Logic(
                    "asm() placeholder count changed after checking".to_string(),
                ));
            };
            line.push_str(&rest[..split]);
            line.push_str(&format!("[rbp-{}]", offset));
            rest = &rest[split + 2..];
        }
        line.push_str(rest);

        writeln!(self.text, "{}", line)?;
        Ok(Type::Void)
    }

    fn literal(&mut self, lit: &ExprLiteral) -> Result<Type, CodegenError> {
        match lit.kind {
            LiteralKind::String => {
                let id = self.string_count;
                self.string_count += 1;

                writeln!(self.data, "string_{}:", id)?;
                writeln!(self.data, "db \"{}\", 0", lit.op.value)?;
                writeln!(self.text, "mov rax, string_{}", id)?;

                Ok(Type::Pointer(Box::new(Type::Char)))
            }

            LiteralKind::Number => {
                let ty = match lit.op.width {
                    NumberWidth::Char => Type::Char,
                    NumberWidth::Long => Type::Long,
                    NumberWidth::Int | NumberWidth::Any => Type::Int,
                };
                let rax = subregister(Register::Rax, &ty)?;
                writeln!(self.text, "mov {}, {}", rax, lit.op.number)?;
                Ok(ty)
            }

            LiteralKind::Ident => self.literal_ident(lit, false),
        }
    }

    fn literal_addr(&mut self, lit: &ExprLiteral) -> Result<Type, CodegenError> {
        match lit.kind {
            LiteralKind::Ident => self.literal_ident(lit, true),
            _ => Err(CodegenError::Logic(
                "address of a non-identifier literal".to_string(),
            )),
        }
    }

    fn literal_ident(&mut self, lit: &ExprLiteral, addr: bool) -> Result<Type, CodegenError> {
        let name = &lit.op.value;
        let symbol = self.lookup(name)?;

        match symbol {
            Symbol::Variable { ty, offset } | Symbol::Parameter { ty, offset } => {
                if addr {
                    writeln!(self.text, "lea rax, [rbp-{}]", offset)?;
                    Ok(Type::Pointer(Box::new(ty)))
                } else {
                    let rax = subregister(Register::Rax, &ty)?;
                    writeln!(self.text, "mov {}, [rbp-{}]", rax, offset)?;
                    Ok(ty)
                }
            }
            Symbol::Procedure { ty, label } => {
                writeln!(self.text, "mov rax, {}", label)?;
                if addr {
                    Ok(Type::Pointer(Box::new(ty)))
                } else {
                    Ok(ty)
                }
            }
        }
    }
}
