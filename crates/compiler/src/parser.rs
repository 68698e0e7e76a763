//! Recursive-descent parser for Seron
//!
//! One grammar rule per function, layered to encode operator precedence.
//! The parser owns a one-token lookahead over the lazy lexer and allocates
//! every node into the [`Ast`] arena it was given.
//!
//! # Error recovery
//!
//! Parse errors do not abort compilation immediately. A rule that cannot
//! make progress records a diagnostic and returns [`ParseError::Recover`],
//! which unwinds to the nearest recovery boundary: the statement loop of a
//! block, or the declaration loop at top level. The boundary synchronizes
//! the token stream (through the next `;`, or to the next `proc`/`table`)
//! and resumes parsing. Lexer failures and a truncated token stream are
//! [`ParseError::Fatal`] and end parsing on the spot. After the root
//! production completes, parsing as a whole fails if any error was
//! recorded.

use crate::ast::{
    Ast, AstNode, BinOpKind, Block, BuiltinProc, Callee, DeclProc, DeclTable, ExprAssign,
    ExprBinOp, ExprCall, ExprGrouping, ExprIndex, ExprLiteral, ExprUnaryOp, LiteralKind, NodeId,
    StmtFor, StmtIf, StmtReturn, StmtVarDecl, StmtWhile, UnaryOpKind,
};
use crate::diagnostics::Diagnostic;
use crate::lexer::{Lexer, Token, TokenKind};
use crate::types::{MAX_PARAM_COUNT, Param, ProcSignature, Type};

enum ParseError {
    /// Recoverable: a diagnostic has been recorded; unwind to the nearest
    /// synchronization boundary.
    Recover,
    /// Unrecoverable: the token stream is unusable past this point.
    Fatal(Diagnostic),
}

type PResult<T> = Result<T, ParseError>;

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    ast: &'a mut Ast,
    tok: Token,
    errors: Vec<Diagnostic>,
}

/// Parse a whole source string into `ast`, returning the root block.
///
/// On failure the accumulated diagnostics are returned; the arena may hold
/// partially built nodes which the caller simply drops.
pub fn parse(src: &str, ast: &mut Ast) -> Result<NodeId, Vec<Diagnostic>> {
    let mut lexer = Lexer::new(src);
    let first = match lexer.next() {
        Ok(tok) => tok,
        Err(diag) => return Err(vec![diag]),
    };

    let mut parser = Parser {
        lexer,
        ast,
        tok: first,
        errors: Vec::new(),
    };

    match parser.rule_program() {
        Ok(root) if parser.errors.is_empty() => Ok(root),
        Ok(_) | Err(ParseError::Recover) => Err(parser.errors),
        Err(ParseError::Fatal(diag)) => {
            parser.errors.push(diag);
            Err(parser.errors)
        }
    }
}

impl<'a> Parser<'a> {
    fn matches(&self, kind: TokenKind) -> bool {
        self.tok.kind == kind
    }

    fn matches_any(&self, kinds: &[TokenKind]) -> bool {
        kinds.contains(&self.tok.kind)
    }

    fn is_at_end(&self) -> bool {
        self.matches(TokenKind::Eof)
    }

    /// Move one token ahead, returning the token before.
    fn advance(&mut self) -> PResult<Token> {
        if self.is_at_end() {
            // There is nothing left to synchronize against.
            return Err(ParseError::Fatal(Diagnostic::error_at(
                &self.tok,
                "Unexpected end of file",
            )));
        }

        let next = self.lexer.next().map_err(ParseError::Fatal)?;
        Ok(std::mem::replace(&mut self.tok, next))
    }

    fn error_here(&mut self, message: impl Into<String>) -> ParseError {
        self.errors.push(Diagnostic::error_at(&self.tok, message));
        ParseError::Recover
    }

    fn error_at(&mut self, tok: &Token, message: impl Into<String>) -> ParseError {
        self.errors.push(Diagnostic::error_at(tok, message));
        ParseError::Recover
    }

    /// Advance, enforcing that the current token has the given kind.
    fn consume(&mut self, kind: TokenKind) -> PResult<Token> {
        if !self.is_at_end() && !self.matches(kind) {
            let err = self.error_here(format!(
                "Expected `{}`, got `{}`",
                kind.as_str(),
                self.tok.kind.as_str()
            ));
            return Err(err);
        }
        self.advance()
    }

    /// Skip to just past the next `;`, stopping short of a closing brace so
    /// a malformed statement cannot eat the end of its block.
    fn sync_stmt(&mut self) -> PResult<()> {
        loop {
            if self.matches(TokenKind::Semicolon) {
                self.advance()?;
                return Ok(());
            }
            if self.matches(TokenKind::Rbrace) || self.is_at_end() {
                return Ok(());
            }
            self.advance()?;
        }
    }

    /// Skip to the next declaration keyword.
    fn sync_decl(&mut self) -> PResult<()> {
        while !self.matches_any(&[TokenKind::KwProc, TokenKind::KwTable]) && !self.is_at_end() {
            self.advance()?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Declarations
    // ------------------------------------------------------------------

    fn rule_program(&mut self) -> PResult<NodeId> {
        // <program> ::= <declaration>*
        let op = self.tok.clone();
        let mut stmts = Vec::new();

        while !self.is_at_end() {
            match self.rule_decl() {
                Ok(decl) => stmts.push(decl),
                Err(ParseError::Recover) => self.sync_decl()?,
                Err(fatal) => return Err(fatal),
            }
        }

        Ok(self.ast.alloc(AstNode::Block(Block {
            op,
            stmts,
            scope: None,
        })))
    }

    fn rule_decl(&mut self) -> PResult<NodeId> {
        // <declaration> ::= <proc> | <table>
        match self.tok.kind {
            TokenKind::KwProc => self.rule_proc(),
            TokenKind::KwTable => self.rule_table(),
            _ => Err(self.error_here("Expected declaration")),
        }
    }

    fn rule_proc(&mut self) -> PResult<NodeId> {
        // <proc> ::= <proc-type> <block> | <proc-type> ";"
        let (ty, ident, op) = self.rule_util_proc_type(true)?;
        let ident = ident.unwrap();

        let body = if self.matches(TokenKind::Semicolon) {
            self.advance()?;
            None
        } else {
            Some(self.rule_block()?)
        };

        Ok(self.ast.alloc(AstNode::Proc(DeclProc {
            op,
            ident,
            ty,
            body,
            stack_size: 0,
        })))
    }

    fn rule_table(&mut self) -> PResult<NodeId> {
        // <table> ::= "table" IDENTIFIER <fieldlist>
        let op = self.consume(TokenKind::KwTable)?;
        let ident = self.consume(TokenKind::Identifier)?;

        let fields = self.rule_util_fieldlist()?;

        Ok(self
            .ast
            .alloc(AstNode::Table(DeclTable { op, ident, fields })))
    }

    // ------------------------------------------------------------------
    // Types and parameter lists
    // ------------------------------------------------------------------

    fn token_is_type(&self) -> bool {
        self.matches_any(&[
            TokenKind::Asterisk,
            TokenKind::TypeVoid,
            TokenKind::TypeChar,
            TokenKind::TypeInt,
            TokenKind::TypeLong,
            TokenKind::KwProc,
        ])
    }

    /// `proc IDENT? <paramlist> <type>?`. With `with_ident` the procedure
    /// name is required; without, an anonymous procedure type is parsed
    /// (type annotations). The return type defaults to void.
    fn rule_util_proc_type(&mut self, with_ident: bool) -> PResult<(Type, Option<Token>, Token)> {
        let op = self.consume(TokenKind::KwProc)?;

        let ident = if with_ident {
            Some(self.consume(TokenKind::Identifier)?)
        } else {
            None
        };

        let params = self.rule_util_paramlist()?;

        let returntype = if self.token_is_type() {
            self.rule_util_type()?
        } else {
            Type::Void
        };

        let ty = Type::Proc(Box::new(ProcSignature { params, returntype }));
        Ok((ty, ident, op))
    }

    fn rule_util_type(&mut self) -> PResult<Type> {
        // <type> ::= "*" <type> | "int" | "long" | "char" | "void"
        //          | <proc-type> | IDENTIFIER
        if self.matches(TokenKind::Asterisk) {
            self.advance()?;
            let pointee = self.rule_util_type()?;
            return Ok(Type::Pointer(Box::new(pointee)));
        }

        if self.matches(TokenKind::KwProc) {
            let (ty, _, _) = self.rule_util_proc_type(false)?;
            return Ok(ty);
        }

        if self.matches(TokenKind::Identifier) {
            let tok = self.advance()?;
            return Ok(Type::Table(tok.value));
        }

        if let Some(ty) = Type::from_token_keyword(self.tok.kind) {
            self.advance()?;
            return Ok(ty);
        }

        Err(self.error_here(format!("Unknown type `{}`", self.tok.kind.as_str())))
    }

    fn rule_util_param(&mut self) -> PResult<Param> {
        // <param> ::= IDENTIFIER ":" <type>
        let ident = self.consume(TokenKind::Identifier)?;
        self.consume(TokenKind::Colon)?;
        let ty = self.rule_util_type()?;
        Ok(Param {
            ident: ident.value,
            ty,
        })
    }

    fn rule_util_paramlist(&mut self) -> PResult<Vec<Param>> {
        // <paramlist> ::= "(" (<param> ("," <param>)*)? ")"
        self.consume(TokenKind::Lparen)?;

        let mut params = Vec::new();
        while !self.matches(TokenKind::Rparen) {
            params.push(self.rule_util_param()?);

            if params.len() > MAX_PARAM_COUNT {
                let err = self.error_here(format!(
                    "Procedures may not have more than {} parameters",
                    MAX_PARAM_COUNT
                ));
                return Err(err);
            }

            if self.matches(TokenKind::Comma) {
                self.advance()?;
            }
        }

        self.consume(TokenKind::Rparen)?;
        Ok(params)
    }

    fn rule_util_fieldlist(&mut self) -> PResult<Vec<Param>> {
        // <fieldlist> ::= "{" (<param> ("," <param>)*)? "}"
        self.consume(TokenKind::Lbrace)?;

        let mut fields = Vec::new();
        while !self.matches(TokenKind::Rbrace) {
            fields.push(self.rule_util_param()?);

            if self.matches(TokenKind::Comma) {
                self.advance()?;
            }
        }

        self.consume(TokenKind::Rbrace)?;
        Ok(fields)
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn rule_block(&mut self) -> PResult<NodeId> {
        // <block> ::= "{" <statement>* "}"
        let brace = self.consume(TokenKind::Lbrace)?;
        let mut stmts = Vec::new();

        loop {
            if self.matches(TokenKind::Rbrace) {
                break;
            }

            if self.is_at_end() {
                return Err(ParseError::Fatal(Diagnostic::error_at(
                    &brace,
                    "Unmatched brace. did you forget the closing brace?",
                )));
            }

            match self.rule_stmt() {
                Ok(Some(stmt)) => stmts.push(stmt),
                Ok(None) => {}
                Err(ParseError::Recover) => self.sync_stmt()?,
                Err(fatal) => return Err(fatal),
            }
        }

        self.advance()?;
        Ok(self.ast.alloc(AstNode::Block(Block {
            op: brace,
            stmts,
            scope: None,
        })))
    }

    /// Returns `None` for the empty statement (a bare `;`).
    fn rule_stmt(&mut self) -> PResult<Option<NodeId>> {
        // <statement> ::= <block> | <vardecl> | <if> | <while> | <for>
        //               | <return> | <exprstmt>
        match self.tok.kind {
            TokenKind::Lbrace => self.rule_block().map(Some),
            TokenKind::KwLet => self.rule_vardecl().map(Some),
            TokenKind::KwIf => self.rule_if().map(Some),
            TokenKind::KwWhile => self.rule_while().map(Some),
            TokenKind::KwFor => self.rule_for().map(Some),
            TokenKind::KwReturn => self.rule_return().map(Some),
            _ => self.rule_exprstmt(),
        }
    }

    /// `let IDENT ":" <type> ("=" <expr>)?` without the terminator, shared
    /// between statement position and the for-loop header.
    fn rule_vardecl_core(&mut self) -> PResult<NodeId> {
        let op = self.consume(TokenKind::KwLet)?;
        let ident = self.consume(TokenKind::Identifier)?;
        self.consume(TokenKind::Colon)?;
        let ty = self.rule_util_type()?;

        let init = if self.matches(TokenKind::Assign) {
            self.advance()?;
            Some(self.rule_expr()?)
        } else {
            None
        };

        Ok(self.ast.alloc(AstNode::VarDecl(StmtVarDecl {
            op,
            ident,
            ty,
            init,
        })))
    }

    fn rule_vardecl(&mut self) -> PResult<NodeId> {
        // <vardecl> ::= "let" IDENTIFIER ":" <type> ("=" <expression>)? ";"
        let decl = self.rule_vardecl_core()?;
        self.consume(TokenKind::Semicolon)?;
        Ok(decl)
    }

    fn rule_if(&mut self) -> PResult<NodeId> {
        // <if> ::= "if" <expression> <block> ("else" <block>)?
        let op = self.consume(TokenKind::KwIf)?;

        let condition = self.rule_expr()?;
        let then_body = self.rule_block()?;

        let else_body = if self.matches(TokenKind::KwElse) {
            self.advance()?;
            Some(self.rule_block()?)
        } else {
            None
        };

        Ok(self.ast.alloc(AstNode::If(StmtIf {
            op,
            condition,
            then_body,
            else_body,
        })))
    }

    fn rule_while(&mut self) -> PResult<NodeId> {
        // <while> ::= "while" <expression> <block>
        let op = self.consume(TokenKind::KwWhile)?;

        let condition = self.rule_expr()?;
        let body = self.rule_block()?;

        Ok(self.ast.alloc(AstNode::While(StmtWhile {
            op,
            condition,
            body,
        })))
    }

    fn rule_for(&mut self) -> PResult<NodeId> {
        // <for> ::= "for" <vardecl> "," <expression> "," <expression> <block>
        let op = self.consume(TokenKind::KwFor)?;

        let vardecl = self.rule_vardecl_core()?;
        self.consume(TokenKind::Comma)?;
        let condition = self.rule_expr()?;
        self.consume(TokenKind::Comma)?;
        let step = self.rule_expr()?;
        let body = self.rule_block()?;

        Ok(self.ast.alloc(AstNode::For(StmtFor {
            op,
            vardecl,
            condition,
            step,
            body,
        })))
    }

    fn rule_return(&mut self) -> PResult<NodeId> {
        // <return> ::= "return" <expression>? ";"
        let op = self.consume(TokenKind::KwReturn)?;

        let expr = if self.matches(TokenKind::Semicolon) {
            None
        } else {
            Some(self.rule_expr()?)
        };

        self.consume(TokenKind::Semicolon)?;
        Ok(self.ast.alloc(AstNode::Return(StmtReturn { op, expr })))
    }

    /// Returns `None` for the empty statement.
    fn rule_exprstmt(&mut self) -> PResult<Option<NodeId>> {
        // <exprstmt> ::= <expression>? ";"
        let node = if self.matches(TokenKind::Semicolon) {
            None
        } else {
            Some(self.rule_expr()?)
        };

        self.consume(TokenKind::Semicolon)?;
        Ok(node)
    }

    // ------------------------------------------------------------------
    // Expressions, lowest to highest precedence
    // ------------------------------------------------------------------

    fn rule_expr(&mut self) -> PResult<NodeId> {
        // <expression> ::= <assignment>
        self.rule_assign()
    }

    fn is_lvalue(&self, id: NodeId) -> bool {
        match self.ast.node(id) {
            AstNode::Literal(lit) => lit.kind == LiteralKind::Ident,
            AstNode::UnaryOp(unary) => unary.kind == UnaryOpKind::Deref,
            // Index is sugar for a dereference.
            AstNode::Index(_) => true,
            _ => false,
        }
    }

    fn rule_assign(&mut self) -> PResult<NodeId> {
        // <assign> ::= <log-or> ("=" <assign>)?
        let target = self.rule_log_or()?;

        if !self.matches(TokenKind::Assign) {
            return Ok(target);
        }

        let op = self.advance()?;

        if !self.is_lvalue(target) {
            return Err(self.error_at(&op, "Invalid assignment target"));
        }

        let value = self.rule_assign()?;

        Ok(self.ast.alloc(AstNode::Assign(ExprAssign {
            op,
            target,
            value,
        })))
    }

    /// Template for the left-associative binary-operator levels.
    fn templ_binop(
        &mut self,
        rule: fn(&mut Self) -> PResult<NodeId>,
        ops: &[TokenKind],
    ) -> PResult<NodeId> {
        let mut lhs = rule(self)?;

        while self.matches_any(ops) {
            let op = self.advance()?;
            let rhs = rule(self)?;
            // The operator token always maps: `ops` only lists operators.
            let kind = BinOpKind::from_token(op.kind).unwrap();
            lhs = self
                .ast
                .alloc(AstNode::BinOp(ExprBinOp { op, kind, lhs, rhs }));
        }

        Ok(lhs)
    }

    fn rule_log_or(&mut self) -> PResult<NodeId> {
        // <log-or> ::= <log-and> ("||" <log-and>)*
        self.templ_binop(Self::rule_log_and, &[TokenKind::LogOr])
    }

    fn rule_log_and(&mut self) -> PResult<NodeId> {
        // <log-and> ::= <bitwise-or> ("&&" <bitwise-or>)*
        self.templ_binop(Self::rule_bit_or, &[TokenKind::LogAnd])
    }

    fn rule_bit_or(&mut self) -> PResult<NodeId> {
        // <bitwise-or> ::= <bitwise-and> ("|" <bitwise-and>)*
        self.templ_binop(Self::rule_bit_and, &[TokenKind::Pipe])
    }

    fn rule_bit_and(&mut self) -> PResult<NodeId> {
        // <bitwise-and> ::= <equality> ("&" <equality>)*
        self.templ_binop(Self::rule_equality, &[TokenKind::Ampersand])
    }

    fn rule_equality(&mut self) -> PResult<NodeId> {
        // <equality> ::= <comparison> (("==" | "!=") <comparison>)*
        self.templ_binop(Self::rule_comparison, &[TokenKind::Eq, TokenKind::Neq])
    }

    fn rule_comparison(&mut self) -> PResult<NodeId> {
        // <comparison> ::= <term> (("<" | "<=" | ">" | ">=") <term>)*
        self.templ_binop(
            Self::rule_term,
            &[
                TokenKind::Lt,
                TokenKind::LtEq,
                TokenKind::Gt,
                TokenKind::GtEq,
            ],
        )
    }

    fn rule_term(&mut self) -> PResult<NodeId> {
        // <term> ::= <factor> (("+" | "-") <factor>)*
        self.templ_binop(Self::rule_factor, &[TokenKind::Plus, TokenKind::Minus])
    }

    fn rule_factor(&mut self) -> PResult<NodeId> {
        // <factor> ::= <unary> (("*" | "/") <unary>)*
        self.templ_binop(Self::rule_unary, &[TokenKind::Asterisk, TokenKind::Slash])
    }

    fn rule_unary(&mut self) -> PResult<NodeId> {
        // <unary> ::= ("&" | "*" | "!" | "-") <unary> | <call>
        let Some(kind) = UnaryOpKind::from_token(self.tok.kind) else {
            return self.rule_call();
        };

        let op = self.advance()?;
        let node = self.rule_unary()?;

        Ok(self
            .ast
            .alloc(AstNode::UnaryOp(ExprUnaryOp { op, kind, node })))
    }

    fn rule_util_arglist(&mut self) -> PResult<Vec<NodeId>> {
        // <arglist> ::= "(" (<expr> ("," <expr>)*)? ")"
        self.consume(TokenKind::Lparen)?;

        let mut args = Vec::new();
        while !self.matches(TokenKind::Rparen) {
            args.push(self.rule_expr()?);

            if self.matches(TokenKind::Comma) {
                self.advance()?;
            }
        }

        self.consume(TokenKind::Rparen)?;
        Ok(args)
    }

    fn rule_call(&mut self) -> PResult<NodeId> {
        // <call> ::= <primary> (<arglist> | "[" <expr> "]")*
        if self.matches(TokenKind::BuiltinAsm) {
            let op = self.advance()?;
            let args = self.rule_util_arglist()?;
            return Ok(self.ast.alloc(AstNode::Call(ExprCall {
                op,
                callee: Callee::Builtin(BuiltinProc::Asm),
                args,
            })));
        }

        let mut node = self.rule_primary()?;

        loop {
            if self.matches(TokenKind::Lparen) {
                let op = self.tok.clone();
                let args = self.rule_util_arglist()?;
                node = self.ast.alloc(AstNode::Call(ExprCall {
                    op,
                    callee: Callee::Expr(node),
                    args,
                }));
            } else if self.matches(TokenKind::Lbracket) {
                let op = self.advance()?;
                let index = self.rule_expr()?;
                self.consume(TokenKind::Rbracket)?;
                node = self.ast.alloc(AstNode::Index(ExprIndex {
                    op,
                    expr: node,
                    index,
                }));
            } else {
                return Ok(node);
            }
        }
    }

    fn rule_grouping(&mut self) -> PResult<NodeId> {
        // <grouping> ::= "(" <expression> ")"
        let op = self.consume(TokenKind::Lparen)?;

        if self.matches(TokenKind::Rparen) {
            return Err(self.error_here("Expected expression inside grouping"));
        }

        let expr = self.rule_expr()?;
        self.consume(TokenKind::Rparen)?;

        Ok(self.ast.alloc(AstNode::Grouping(ExprGrouping { op, expr })))
    }

    fn rule_primary(&mut self) -> PResult<NodeId> {
        // <primary> ::= NUMBER | IDENTIFIER | STRING | <grouping>
        if let Some(kind) = LiteralKind::from_token(self.tok.kind) {
            let op = self.advance()?;
            return Ok(self.ast.alloc(AstNode::Literal(ExprLiteral { op, kind })));
        }

        if self.matches(TokenKind::Lparen) {
            return self.rule_grouping();
        }

        Err(self.error_here(format!(
            "unexpected token `{}`, expected expression",
            self.tok.kind.as_str()
        )))
    }
}
