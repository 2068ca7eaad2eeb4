// パス: src/parser.rs
// 役割: トークン列を解析し、シンボル環境へ束縛した解決済みプログラム木を生成する
// 意図: 構文解析・名前解決・型検査を 1 パスで行い、複数エラーを位置付きで報告する
// 関連ファイル: src/lexer.rs, src/ast.rs, src/symbols.rs, src/engine.rs
//! 構文解析・束縛モジュール
//!
//! - 優先順位は `or < and < 比較 < 加減 < 乗除 < 単項 < べき乗` の順でハンドコードする。
//! - 文単位でエラーから復帰し（次のトップレベル `;` まで読み飛ばす）、複数のエラーを収集する。
//! - トップレベルの `var` 宣言と未知シンボル解決で生まれる変数は保留し、成功時のみ環境へ登録する。

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::trace;

use crate::ast::{
    AssignOp, BinaryOp, CompiledProgram, Init, Intrinsic, Node, Slot, Target, UnaryOp,
};
use crate::engine::{CompileOptions, SymbolEntry, SymbolKind};
use crate::errors::{CompileError, ErrorMode};
use crate::lexer::{check_brackets, lex, Token, TokenKind};
use crate::symbols::{Arity, Origin, SymbolEnvironment, SymbolValue};

/// 値の静的な型。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ty {
    Scalar,
    Str,
}

/// 変数の格納形態。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Storage {
    Scalar,
    Vector,
    Str,
}

impl Storage {
    fn of(value: &SymbolValue) -> Option<Storage> {
        match value {
            SymbolValue::Scalar(_) => Some(Storage::Scalar),
            SymbolValue::Vector(_) => Some(Storage::Vector),
            SymbolValue::Str(_) => Some(Storage::Str),
            SymbolValue::Function(_) => None,
        }
    }

    fn global_kind(self) -> SymbolKind {
        match self {
            Storage::Scalar => SymbolKind::Variable,
            Storage::Vector => SymbolKind::Vector,
            Storage::Str => SymbolKind::String,
        }
    }

    fn local_kind(self) -> SymbolKind {
        match self {
            Storage::Scalar => SymbolKind::LocalVariable,
            Storage::Vector => SymbolKind::LocalVector,
            Storage::Str => SymbolKind::LocalString,
        }
    }
}

/// 代入可能な参照の情報。
#[derive(Debug, Clone)]
struct Place {
    name: String,
    kind: SymbolKind,
    constant: bool,
}

/// 型付きの式。
struct Typed {
    node: Node,
    ty: Ty,
    place: Option<Place>,
}

impl Typed {
    fn scalar(node: Node) -> Self {
        Self {
            node,
            ty: Ty::Scalar,
            place: None,
        }
    }

    fn string(node: Node) -> Self {
        Self {
            node,
            ty: Ty::Str,
            place: None,
        }
    }
}

/// 解決済みの変数。
struct Resolved {
    slot: Slot,
    storage: Storage,
    kind: SymbolKind,
    constant: bool,
}

struct Pending {
    name: String,
    value: SymbolValue,
    declared: bool,
}

type PResult<T> = Result<T, CompileError>;

/// 式の入れ子の上限（`parse_expression` / `parse_unary` の再帰段数）。
/// 括弧 1 段でおよそ 2 段進む。コンパイル済みの木の深さもこれで抑えられる。
pub const MAX_NESTING_DEPTH: usize = 200;

/// 宣言できるベクトルの最大要素数。
pub const MAX_VECTOR_SIZE: usize = 1_000_000;

struct Compiler<'e> {
    ts: Vec<Token>,
    i: usize,
    env: &'e SymbolEnvironment,
    options: CompileOptions,
    pending: Vec<Pending>,
    pending_index: FxHashMap<String, usize>,
    top_declared: FxHashSet<String>,
    scopes: Vec<FxHashMap<String, (usize, Storage)>>,
    frame_size: usize,
    loop_depth: usize,
    /// 式・単項演算の再帰の深さ。
    depth: usize,
    symbols: Vec<SymbolEntry>,
    assignments: Vec<SymbolEntry>,
    errors: Vec<CompileError>,
}

/// プログラムをコンパイルし、成功時のみ保留中の宣言を環境へ確定する。
pub fn compile(
    source: &str,
    env: &mut SymbolEnvironment,
    options: &CompileOptions,
) -> Result<CompiledProgram, Vec<CompileError>> {
    let tokens = lex(source).map_err(|e| vec![e])?;
    let bracket_errors = check_brackets(&tokens);
    if !bracket_errors.is_empty() {
        return Err(bracket_errors);
    }

    let mut compiler = Compiler::new(tokens, env, *options);
    let body = compiler.parse_program();
    if !compiler.errors.is_empty() {
        return Err(compiler.errors);
    }
    if body.is_empty() {
        return Err(vec![CompileError::syntax("PAR000", "empty program", 0)]);
    }

    let Compiler {
        pending,
        frame_size,
        symbols,
        assignments,
        ..
    } = compiler;
    env.commit(pending.into_iter().map(|p| (p.name, p.value)).collect());
    trace!(
        statements = body.len(),
        frame_size,
        generation = env.generation(),
        "program compiled"
    );
    Ok(CompiledProgram {
        body,
        frame_size,
        generation: env.generation(),
        symbols,
        assignments,
    })
}

impl<'e> Compiler<'e> {
    fn new(ts: Vec<Token>, env: &'e SymbolEnvironment, options: CompileOptions) -> Self {
        Self {
            ts,
            i: 0,
            env,
            options,
            pending: Vec::new(),
            pending_index: FxHashMap::default(),
            top_declared: FxHashSet::default(),
            scopes: Vec::new(),
            frame_size: 0,
            loop_depth: 0,
            depth: 0,
            symbols: Vec::new(),
            assignments: Vec::new(),
            errors: Vec::new(),
        }
    }

    // ---- トークン操作 -------------------------------------------------

    fn peek(&self) -> &Token {
        let last = self.ts.len() - 1;
        &self.ts[self.i.min(last)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn peek_kind_at(&self, offset: usize) -> TokenKind {
        self.ts
            .get(self.i + offset)
            .map(|t| t.kind)
            .unwrap_or(TokenKind::EOF)
    }

    fn pop_any(&mut self) -> Token {
        let t = self.peek().clone();
        if t.kind != TokenKind::EOF {
            self.i += 1;
        }
        t
    }

    fn accept(&mut self, kind: TokenKind) -> Option<Token> {
        if self.peek_kind() == kind {
            Some(self.pop_any())
        } else {
            None
        }
    }

    fn pop(&mut self, kind: TokenKind, what: &str) -> PResult<Token> {
        if self.peek_kind() == kind {
            return Ok(self.pop_any());
        }
        Err(self.unexpected(what))
    }

    fn unexpected(&self, expected: &str) -> CompileError {
        let t = self.peek();
        if t.kind == TokenKind::EOF {
            CompileError::syntax(
                "PAR002",
                format!("unexpected end of input, expected {}", expected),
                t.pos,
            )
        } else {
            CompileError::syntax(
                "PAR001",
                format!("unexpected token '{}', expected {}", t.value, expected),
                t.pos,
            )
        }
    }

    fn previous_was_block(&self) -> bool {
        self.i > 0 && self.ts[self.i - 1].kind == TokenKind::RBRACE
    }

    /// 次のトップレベル `;` まで読み飛ばし、解析状態を初期化する。
    fn recover(&mut self) {
        let mut depth = 0usize;
        loop {
            match self.peek_kind() {
                TokenKind::EOF => break,
                TokenKind::LPAREN | TokenKind::LBRACK | TokenKind::LBRACE => depth += 1,
                TokenKind::RPAREN | TokenKind::RBRACK | TokenKind::RBRACE => {
                    depth = depth.saturating_sub(1)
                }
                TokenKind::SEMI if depth == 0 => {
                    self.pop_any();
                    break;
                }
                _ => {}
            }
            self.pop_any();
        }
        self.scopes.clear();
        self.loop_depth = 0;
    }

    // ---- プログラム・文 -------------------------------------------------

    fn parse_program(&mut self) -> Vec<Node> {
        let mut body = Vec::new();
        loop {
            while self.accept(TokenKind::SEMI).is_some() {}
            if self.peek_kind() == TokenKind::EOF {
                break;
            }
            match self.parse_statement() {
                Ok(stmt) => {
                    body.push(stmt.node);
                    let separated = self.accept(TokenKind::SEMI).is_some()
                        || self.peek_kind() == TokenKind::EOF
                        || self.previous_was_block();
                    if !separated {
                        self.errors.push(self.unexpected("';'"));
                        self.recover();
                    }
                }
                Err(e) => {
                    self.errors.push(e);
                    self.recover();
                }
            }
        }
        body
    }

    fn parse_statement(&mut self) -> PResult<Typed> {
        if self.peek_kind() == TokenKind::VAR {
            self.parse_declaration()
        } else {
            self.parse_expression()
        }
    }

    fn parse_declaration(&mut self) -> PResult<Typed> {
        self.pop(TokenKind::VAR, "'var'")?;
        let name_tok = self.pop(TokenKind::IDENT, "identifier after 'var'")?;
        let name = name_tok.value.clone();
        if Intrinsic::lookup(&name).is_some() {
            return Err(CompileError::symtab(
                "SYM002",
                format!("illegal redefinition of reserved symbol '{}'", name),
                name_tok.pos,
            ));
        }

        let (storage, init) = if self.accept(TokenKind::LBRACK).is_some() {
            let declared_size = if self.peek_kind() == TokenKind::NUMBER {
                let size_tok = self.pop_any();
                Some(parse_vector_size(&size_tok)?)
            } else {
                None
            };
            self.pop(TokenKind::RBRACK, "']'")?;
            let mut items = Vec::new();
            if self.accept(TokenKind::ASSIGN).is_some() {
                self.pop(TokenKind::LBRACE, "'{' vector initialiser")?;
                if self.accept(TokenKind::RBRACE).is_none() {
                    loop {
                        let item = self.parse_expression()?;
                        items.push(self.expect_scalar(item, "vector element")?);
                        if self.accept(TokenKind::COMMA).is_none() {
                            break;
                        }
                    }
                    self.pop(TokenKind::RBRACE, "'}'")?;
                }
            }
            let size = declared_size.unwrap_or(items.len());
            if size > MAX_VECTOR_SIZE {
                return Err(CompileError::new(
                    "NUM002",
                    ErrorMode::Numeric,
                    format!("vector '{}' exceeds maximum of {} elements", name, MAX_VECTOR_SIZE),
                    name_tok.pos,
                ));
            }
            if size == 0 {
                return Err(CompileError::new(
                    "NUM002",
                    ErrorMode::Numeric,
                    format!("vector '{}' must have a positive size", name),
                    name_tok.pos,
                ));
            }
            if items.len() > size {
                return Err(CompileError::parser(
                    "PAR040",
                    format!(
                        "too many initialisers for vector '{}' ({} > {})",
                        name,
                        items.len(),
                        size
                    ),
                    name_tok.pos,
                ));
            }
            (Storage::Vector, Init::Vector { size, items })
        } else if self.accept(TokenKind::ASSIGN).is_some() {
            let value = self.parse_expression()?;
            match value.ty {
                Ty::Str => (Storage::Str, Init::Str(Box::new(value.node))),
                Ty::Scalar => (Storage::Scalar, Init::Scalar(Some(Box::new(value.node)))),
            }
        } else {
            (Storage::Scalar, Init::Scalar(None))
        };

        let slot = self.declare(&name, storage, &init, name_tok.pos)?;
        self.note_symbol(&name, storage.local_kind());
        Ok(Typed::scalar(Node::Declare { slot, init }))
    }

    fn declare(&mut self, name: &str, storage: Storage, init: &Init, pos: usize) -> PResult<Slot> {
        let redefinition = || {
            CompileError::symtab(
                "SYM002",
                format!("illegal redefinition of '{}'", name),
                pos,
            )
        };

        if let Some(scope) = self.scopes.last_mut() {
            if scope.contains_key(name) {
                return Err(redefinition());
            }
            let idx = self.frame_size;
            self.frame_size += 1;
            scope.insert(name.to_string(), (idx, storage));
            return Ok(Slot::Local(idx));
        }

        if self.top_declared.contains(name) {
            return Err(redefinition());
        }
        let slot = if let Some(&pi) = self.pending_index.get(name) {
            if Storage::of(&self.pending[pi].value) != Some(storage) {
                return Err(redefinition());
            }
            self.pending[pi].declared = true;
            Slot::Global(self.env.len() + pi)
        } else if let Some((idx, sym)) = self.env.lookup(name) {
            // 永続化された利用者変数は同じ形態なら再宣言できる。
            if sym.origin != Origin::User || Storage::of(&sym.value) != Some(storage) {
                return Err(redefinition());
            }
            Slot::Global(idx)
        } else {
            let value = match (storage, init) {
                (Storage::Vector, Init::Vector { size, .. }) => SymbolValue::Vector(vec![0.0; *size]),
                (Storage::Str, _) => SymbolValue::Str(String::new()),
                _ => SymbolValue::Scalar(0.0),
            };
            self.push_pending(name, value, true)
        };
        self.top_declared.insert(name.to_string());
        Ok(slot)
    }

    fn push_pending(&mut self, name: &str, value: SymbolValue, declared: bool) -> Slot {
        let pi = self.pending.len();
        self.pending.push(Pending {
            name: name.to_string(),
            value,
            declared,
        });
        self.pending_index.insert(name.to_string(), pi);
        Slot::Global(self.env.len() + pi)
    }

    // ---- 式 -------------------------------------------------------------

    /// 再帰の深さを 1 段進めて `f` を実行する。上限を超える入力はコンパイルエラーとする。
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(nesting_error(self.peek().pos));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    /// 左結合の演算子列を解析する。列の長さも深さとして数え、終了時に元へ戻す。
    fn chained(&mut self, f: impl FnOnce(&mut Self) -> PResult<Typed>) -> PResult<Typed> {
        let base = self.depth;
        let result = f(self);
        self.depth = base;
        result
    }

    /// 演算子列を 1 つ延ばす。木の高さは入れ子と同じ上限に従う。
    fn extend_chain(&mut self, pos: usize) -> PResult<()> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(nesting_error(pos));
        }
        self.depth += 1;
        Ok(())
    }

    // 再帰はすべて parse_expression か parse_unary を経由する。
    fn parse_expression(&mut self) -> PResult<Typed> {
        self.nested(Self::parse_assignment)
    }

    fn parse_assignment(&mut self) -> PResult<Typed> {
        let lhs = self.parse_ternary()?;
        let op = match self.peek_kind() {
            TokenKind::ASSIGN => AssignOp::Set,
            TokenKind::ADDASSIGN => AssignOp::Add,
            TokenKind::SUBASSIGN => AssignOp::Sub,
            TokenKind::MULASSIGN => AssignOp::Mul,
            TokenKind::DIVASSIGN => AssignOp::Div,
            TokenKind::MODASSIGN => AssignOp::Mod,
            _ => return Ok(lhs),
        };
        let op_tok = self.pop_any();
        let Some(place) = lhs.place.clone() else {
            return Err(CompileError::parser(
                "PAR030",
                format!("invalid assignment target before '{}'", op_tok.value),
                op_tok.pos,
            ));
        };
        if place.constant {
            return Err(CompileError::parser(
                "PAR031",
                format!("cannot assign to constant '{}'", place.name),
                op_tok.pos,
            ));
        }
        let rhs = self.parse_expression()?;
        let node = match lhs.node {
            Node::Load(slot) => {
                let value = self.expect_scalar(rhs, "assigned value")?;
                Typed::scalar(Node::Assign {
                    target: Target::Scalar(slot),
                    op,
                    value: Box::new(value),
                })
            }
            Node::Element { slot, index } => {
                let value = self.expect_scalar(rhs, "assigned value")?;
                Typed::scalar(Node::Assign {
                    target: Target::Element { slot, index },
                    op,
                    value: Box::new(value),
                })
            }
            Node::StrLoad(slot) => {
                if rhs.ty != Ty::Str {
                    return Err(type_mismatch("string assignment", op_tok.pos));
                }
                let append = match op {
                    AssignOp::Set => false,
                    AssignOp::Add => true,
                    _ => {
                        return Err(CompileError::parser(
                            "PAR032",
                            format!("operator '{}' is not defined for strings", op_tok.value),
                            op_tok.pos,
                        ))
                    }
                };
                Typed::string(Node::StrAssign {
                    slot,
                    append,
                    value: Box::new(rhs.node),
                })
            }
            _ => {
                return Err(CompileError::parser(
                    "PAR030",
                    format!("invalid assignment target before '{}'", op_tok.value),
                    op_tok.pos,
                ))
            }
        };
        self.note_assignment(&place.name, place.kind);
        Ok(node)
    }

    fn parse_ternary(&mut self) -> PResult<Typed> {
        let cond = self.parse_or()?;
        let Some(q) = self.accept(TokenKind::QMARK) else {
            return Ok(cond);
        };
        let cond = self.expect_scalar_at(cond, q.pos)?;
        let then = self.parse_expression()?;
        let then = self.expect_scalar_at(then, q.pos)?;
        self.pop(TokenKind::COLON, "':' in conditional")?;
        let otherwise = self.parse_expression()?;
        let otherwise = self.expect_scalar_at(otherwise, q.pos)?;
        Ok(Typed::scalar(Node::Conditional {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Some(Box::new(otherwise)),
        }))
    }

    fn parse_or(&mut self) -> PResult<Typed> {
        self.chained(Self::parse_or_chain)
    }

    fn parse_or_chain(&mut self) -> PResult<Typed> {
        let mut lhs = self.parse_and()?;
        loop {
            let kind = self.peek_kind();
            if !matches!(kind, TokenKind::OR | TokenKind::BAR | TokenKind::XOR) {
                return Ok(lhs);
            }
            let op_tok = self.pop_any();
            self.extend_chain(op_tok.pos)?;
            let rhs = self.parse_and()?;
            let l = Box::new(self.expect_scalar_at(lhs, op_tok.pos)?);
            let r = Box::new(self.expect_scalar_at(rhs, op_tok.pos)?);
            lhs = Typed::scalar(if kind == TokenKind::XOR {
                Node::Binary(BinaryOp::Xor, l, r)
            } else {
                Node::Or(l, r)
            });
        }
    }

    fn parse_and(&mut self) -> PResult<Typed> {
        self.chained(Self::parse_and_chain)
    }

    fn parse_and_chain(&mut self) -> PResult<Typed> {
        let mut lhs = self.parse_comparison()?;
        while matches!(self.peek_kind(), TokenKind::AND | TokenKind::AMP) {
            let op_tok = self.pop_any();
            self.extend_chain(op_tok.pos)?;
            let rhs = self.parse_comparison()?;
            let l = Box::new(self.expect_scalar_at(lhs, op_tok.pos)?);
            let r = Box::new(self.expect_scalar_at(rhs, op_tok.pos)?);
            lhs = Typed::scalar(Node::And(l, r));
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> PResult<Typed> {
        self.chained(Self::parse_comparison_chain)
    }

    fn parse_comparison_chain(&mut self) -> PResult<Typed> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::EQ => BinaryOp::Eq,
                TokenKind::NE => BinaryOp::Ne,
                TokenKind::LT => BinaryOp::Lt,
                TokenKind::LE => BinaryOp::Le,
                TokenKind::GT => BinaryOp::Gt,
                TokenKind::GE => BinaryOp::Ge,
                _ => return Ok(lhs),
            };
            let op_tok = self.pop_any();
            self.extend_chain(op_tok.pos)?;
            let rhs = self.parse_additive()?;
            lhs = match (lhs.ty, rhs.ty) {
                (Ty::Scalar, Ty::Scalar) => Typed::scalar(Node::Binary(
                    op,
                    Box::new(lhs.node),
                    Box::new(rhs.node),
                )),
                (Ty::Str, Ty::Str) => Typed::scalar(Node::StrCompare(
                    op,
                    Box::new(lhs.node),
                    Box::new(rhs.node),
                )),
                _ => return Err(type_mismatch("comparison", op_tok.pos)),
            };
        }
    }

    fn parse_additive(&mut self) -> PResult<Typed> {
        self.chained(Self::parse_additive_chain)
    }

    fn parse_additive_chain(&mut self) -> PResult<Typed> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::PLUS => BinaryOp::Add,
                TokenKind::MINUS => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            let op_tok = self.pop_any();
            self.extend_chain(op_tok.pos)?;
            let rhs = self.parse_multiplicative()?;
            lhs = match (lhs.ty, rhs.ty, op) {
                (Ty::Str, Ty::Str, BinaryOp::Add) => Typed::string(Node::StrConcat(
                    Box::new(lhs.node),
                    Box::new(rhs.node),
                )),
                (Ty::Scalar, Ty::Scalar, _) => Typed::scalar(Node::Binary(
                    op,
                    Box::new(lhs.node),
                    Box::new(rhs.node),
                )),
                _ => return Err(type_mismatch("arithmetic", op_tok.pos)),
            };
        }
    }

    fn parse_multiplicative(&mut self) -> PResult<Typed> {
        self.chained(Self::parse_multiplicative_chain)
    }

    fn parse_multiplicative_chain(&mut self) -> PResult<Typed> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::STAR => BinaryOp::Mul,
                TokenKind::SLASH => BinaryOp::Div,
                TokenKind::PERCENT => BinaryOp::Mod,
                _ => return Ok(lhs),
            };
            let op_tok = self.pop_any();
            self.extend_chain(op_tok.pos)?;
            let rhs = self.parse_unary()?;
            let l = Box::new(self.expect_scalar_at(lhs, op_tok.pos)?);
            let r = Box::new(self.expect_scalar_at(rhs, op_tok.pos)?);
            lhs = Typed::scalar(Node::Binary(op, l, r));
        }
    }

    fn parse_unary(&mut self) -> PResult<Typed> {
        self.nested(Self::parse_prefixed)
    }

    fn parse_prefixed(&mut self) -> PResult<Typed> {
        let op = match self.peek_kind() {
            TokenKind::MINUS => UnaryOp::Neg,
            TokenKind::PLUS => UnaryOp::Pos,
            TokenKind::NOT | TokenKind::BANG => UnaryOp::Not,
            _ => return self.parse_power(),
        };
        let op_tok = self.pop_any();
        let operand = self.parse_unary()?;
        let operand = self.expect_scalar_at(operand, op_tok.pos)?;
        Ok(Typed::scalar(Node::Unary(op, Box::new(operand))))
    }

    fn parse_power(&mut self) -> PResult<Typed> {
        let base = self.parse_primary()?;
        let Some(op_tok) = self.accept(TokenKind::CARET) else {
            return Ok(base);
        };
        // 右結合: 2^3^2 = 2^(3^2)
        let exponent = self.parse_unary()?;
        let b = Box::new(self.expect_scalar_at(base, op_tok.pos)?);
        let e = Box::new(self.expect_scalar_at(exponent, op_tok.pos)?);
        Ok(Typed::scalar(Node::Binary(BinaryOp::Pow, b, e)))
    }

    fn parse_primary(&mut self) -> PResult<Typed> {
        match self.peek_kind() {
            TokenKind::NUMBER => {
                let t = self.pop_any();
                let value = t.value.parse::<f64>().map_err(|_| {
                    CompileError::new(
                        "NUM003",
                        ErrorMode::Numeric,
                        format!("invalid numeric literal '{}'", t.value),
                        t.pos,
                    )
                })?;
                Ok(Typed::scalar(Node::Number(value)))
            }
            TokenKind::STRING => {
                let t = self.pop_any();
                Ok(Typed::string(Node::Str(t.value)))
            }
            TokenKind::TRUE => {
                self.pop_any();
                Ok(Typed::scalar(Node::Number(1.0)))
            }
            TokenKind::FALSE => {
                self.pop_any();
                Ok(Typed::scalar(Node::Number(0.0)))
            }
            TokenKind::LPAREN => {
                self.pop_any();
                self.parse_sequence(TokenKind::RPAREN, "')'")
            }
            TokenKind::LBRACE => {
                self.pop_any();
                self.parse_sequence(TokenKind::RBRACE, "'}'")
            }
            TokenKind::IF => self.parse_if(),
            TokenKind::WHILE => self.parse_while(),
            TokenKind::FOR => self.parse_for(),
            TokenKind::BREAK => {
                let t = self.pop_any();
                self.require_loop(&t)?;
                let value = if self.accept(TokenKind::LBRACK).is_some() {
                    let v = self.parse_expression()?;
                    let v = self.expect_scalar_at(v, t.pos)?;
                    self.pop(TokenKind::RBRACK, "']'")?;
                    Some(Box::new(v))
                } else {
                    None
                };
                Ok(Typed::scalar(Node::Break(value)))
            }
            TokenKind::CONTINUE => {
                let t = self.pop_any();
                self.require_loop(&t)?;
                Ok(Typed::scalar(Node::Continue))
            }
            TokenKind::IDENT => self.parse_identifier(),
            _ => Err(self.unexpected("expression")),
        }
    }

    /// `(...)` / `{...}` 内の文の並び。独自のスコープを持つ。
    fn parse_sequence(&mut self, close: TokenKind, what: &str) -> PResult<Typed> {
        self.scopes.push(FxHashMap::default());
        let result = self.parse_sequence_body(close, what);
        self.scopes.pop();
        let mut stmts = result?;
        if close == TokenKind::RPAREN && stmts.len() == 1 {
            let only = stmts.remove(0);
            if !matches!(only.node, Node::Declare { .. }) {
                return Ok(Typed {
                    node: only.node,
                    ty: only.ty,
                    place: None,
                });
            }
            stmts.push(only);
        }
        Ok(Typed::scalar(Node::Block(
            stmts.into_iter().map(|s| s.node).collect(),
        )))
    }

    fn parse_sequence_body(&mut self, close: TokenKind, what: &str) -> PResult<Vec<Typed>> {
        let mut stmts = Vec::new();
        loop {
            while self.accept(TokenKind::SEMI).is_some() {}
            if self.accept(close).is_some() {
                return Ok(stmts);
            }
            stmts.push(self.parse_statement()?);
            if self.accept(TokenKind::SEMI).is_some() {
                continue;
            }
            if self.accept(close).is_some() {
                return Ok(stmts);
            }
            if self.previous_was_block() {
                continue;
            }
            return Err(self.unexpected(&format!("';' or {}", what)));
        }
    }

    /// 制御構文の本体。ブロック以外の単文でも独自スコープを持つ。
    fn parse_body(&mut self) -> PResult<Node> {
        self.scopes.push(FxHashMap::default());
        let result = self.parse_statement();
        self.scopes.pop();
        Ok(result?.node)
    }

    fn parse_if(&mut self) -> PResult<Typed> {
        let if_tok = self.pop(TokenKind::IF, "'if'")?;
        self.pop(TokenKind::LPAREN, "'(' after 'if'")?;
        let cond = self.parse_expression()?;
        let cond = self.expect_scalar_at(cond, if_tok.pos)?;

        // 関数形式: if(c, a, b)
        if self.accept(TokenKind::COMMA).is_some() {
            let then = self.parse_expression()?;
            let then = self.expect_scalar_at(then, if_tok.pos)?;
            self.pop(TokenKind::COMMA, "','")?;
            let otherwise = self.parse_expression()?;
            let otherwise = self.expect_scalar_at(otherwise, if_tok.pos)?;
            self.pop(TokenKind::RPAREN, "')'")?;
            return Ok(Typed::scalar(Node::Conditional {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Some(Box::new(otherwise)),
            }));
        }

        self.pop(TokenKind::RPAREN, "')'")?;
        let then = self.parse_body()?;
        if self.peek_kind() == TokenKind::SEMI && self.peek_kind_at(1) == TokenKind::ELSE {
            self.pop_any();
        }
        let otherwise = if self.accept(TokenKind::ELSE).is_some() {
            Some(Box::new(self.parse_body()?))
        } else {
            None
        };
        Ok(Typed::scalar(Node::Conditional {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise,
        }))
    }

    fn parse_while(&mut self) -> PResult<Typed> {
        let while_tok = self.pop(TokenKind::WHILE, "'while'")?;
        self.pop(TokenKind::LPAREN, "'(' after 'while'")?;
        let cond = self.parse_expression()?;
        let cond = self.expect_scalar_at(cond, while_tok.pos)?;
        self.pop(TokenKind::RPAREN, "')'")?;
        self.loop_depth += 1;
        let body = self.parse_body();
        self.loop_depth -= 1;
        Ok(Typed::scalar(Node::While {
            cond: Box::new(cond),
            body: Box::new(body?),
        }))
    }

    fn parse_for(&mut self) -> PResult<Typed> {
        self.pop(TokenKind::FOR, "'for'")?;
        self.pop(TokenKind::LPAREN, "'(' after 'for'")?;
        self.scopes.push(FxHashMap::default());
        let result = self.parse_for_rest();
        self.scopes.pop();
        result
    }

    fn parse_for_rest(&mut self) -> PResult<Typed> {
        let init = if self.peek_kind() == TokenKind::SEMI {
            None
        } else {
            Some(Box::new(self.parse_statement()?.node))
        };
        self.pop(TokenKind::SEMI, "';' in for header")?;
        let cond = if self.peek_kind() == TokenKind::SEMI {
            None
        } else {
            let pos = self.peek().pos;
            let c = self.parse_expression()?;
            Some(Box::new(self.expect_scalar_at(c, pos)?))
        };
        self.pop(TokenKind::SEMI, "';' in for header")?;
        let step = if self.peek_kind() == TokenKind::RPAREN {
            None
        } else {
            Some(Box::new(self.parse_expression()?.node))
        };
        self.pop(TokenKind::RPAREN, "')'")?;
        self.loop_depth += 1;
        let body = self.parse_body();
        self.loop_depth -= 1;
        Ok(Typed::scalar(Node::For {
            init,
            cond,
            step,
            body: Box::new(body?),
        }))
    }

    fn require_loop(&self, t: &Token) -> PResult<()> {
        if self.loop_depth == 0 {
            return Err(CompileError::syntax(
                "PAR050",
                format!("'{}' outside of a loop", t.value),
                t.pos,
            ));
        }
        Ok(())
    }

    fn parse_identifier(&mut self) -> PResult<Typed> {
        let name_tok = self.pop_any();
        let name = name_tok.value.clone();
        if self.peek_kind() == TokenKind::LPAREN {
            return self.parse_call(&name_tok);
        }
        if Intrinsic::lookup(&name).is_some() {
            return Err(CompileError::syntax(
                "PAR060",
                format!("function '{}' requires an argument list", name),
                name_tok.pos,
            ));
        }
        let resolved = self.resolve(&name, name_tok.pos)?;
        self.note_symbol(&name, resolved.kind);
        let place = Place {
            name: name.clone(),
            kind: resolved.kind,
            constant: resolved.constant,
        };
        match resolved.storage {
            Storage::Scalar => Ok(Typed {
                node: Node::Load(resolved.slot),
                ty: Ty::Scalar,
                place: Some(place),
            }),
            Storage::Str => Ok(Typed {
                node: Node::StrLoad(resolved.slot),
                ty: Ty::Str,
                place: Some(place),
            }),
            Storage::Vector => {
                let Some(open) = self.accept(TokenKind::LBRACK) else {
                    return Err(CompileError::parser(
                        "PAR061",
                        format!("vector '{}' requires an index", name),
                        name_tok.pos,
                    ));
                };
                if self.accept(TokenKind::RBRACK).is_some() {
                    return Ok(Typed::scalar(Node::Size(resolved.slot)));
                }
                let index = self.parse_expression()?;
                let index = self.expect_scalar_at(index, open.pos)?;
                self.pop(TokenKind::RBRACK, "']'")?;
                Ok(Typed {
                    node: Node::Element {
                        slot: resolved.slot,
                        index: Box::new(index),
                    },
                    ty: Ty::Scalar,
                    place: Some(place),
                })
            }
        }
    }

    fn parse_call(&mut self, name_tok: &Token) -> PResult<Typed> {
        let name = &name_tok.value;
        self.pop(TokenKind::LPAREN, "'('")?;
        let mut args = Vec::new();
        if self.accept(TokenKind::RPAREN).is_none() {
            loop {
                args.push(self.parse_expression()?);
                if self.accept(TokenKind::COMMA).is_none() {
                    break;
                }
            }
            self.pop(TokenKind::RPAREN, "')' after arguments")?;
        }

        if let Some(func) = Intrinsic::lookup(name) {
            check_arity(name, func.arity(), args.len(), 1, name_tok.pos)?;
            let args = args
                .into_iter()
                .map(|a| self.expect_scalar_at(a, name_tok.pos))
                .collect::<PResult<Vec<_>>>()?;
            return Ok(Typed::scalar(Node::Intrinsic { func, args }));
        }

        let func = match self.env.lookup(name) {
            Some((_, sym)) => match sym.value {
                SymbolValue::Function(f) => f,
                _ => {
                    return Err(CompileError::syntax(
                        "PAR062",
                        format!("'{}' is not a function", name),
                        name_tok.pos,
                    ))
                }
            },
            None => {
                return Err(CompileError::symtab(
                    "SYM003",
                    format!("undefined function '{}'", name),
                    name_tok.pos,
                ))
            }
        };
        check_arity(name, func.arity(), args.len(), 0, name_tok.pos)?;
        let args = if func.accepts_strings() {
            args.into_iter().map(|a| a.node).collect()
        } else {
            args.into_iter()
                .map(|a| self.expect_scalar_at(a, name_tok.pos))
                .collect::<PResult<Vec<_>>>()?
        };
        self.note_symbol(name, SymbolKind::Function);
        Ok(Typed::scalar(Node::Call { func, args }))
    }

    /// ローカル → 保留中 → 環境 → 未知シンボル解決 の順に名前を解決する。
    fn resolve(&mut self, name: &str, pos: usize) -> PResult<Resolved> {
        for scope in self.scopes.iter().rev() {
            if let Some(&(idx, storage)) = scope.get(name) {
                return Ok(Resolved {
                    slot: Slot::Local(idx),
                    storage,
                    kind: storage.local_kind(),
                    constant: false,
                });
            }
        }
        if let Some(&pi) = self.pending_index.get(name) {
            let p = &self.pending[pi];
            if let Some(storage) = Storage::of(&p.value) {
                return Ok(Resolved {
                    slot: Slot::Global(self.env.len() + pi),
                    storage,
                    kind: if p.declared {
                        storage.local_kind()
                    } else {
                        storage.global_kind()
                    },
                    constant: false,
                });
            }
        }
        if let Some((idx, sym)) = self.env.lookup(name) {
            let Some(storage) = Storage::of(&sym.value) else {
                return Err(CompileError::syntax(
                    "PAR060",
                    format!("function '{}' requires an argument list", name),
                    pos,
                ));
            };
            let kind = if self.top_declared.contains(name) {
                storage.local_kind()
            } else {
                storage.global_kind()
            };
            return Ok(Resolved {
                slot: Slot::Global(idx),
                storage,
                kind,
                constant: sym.origin == Origin::Constant,
            });
        }
        if self.options.unknown_symbol_resolution {
            trace!(symbol = name, "unknown symbol resolved as variable");
            let slot = self.push_pending(name, SymbolValue::Scalar(0.0), false);
            return Ok(Resolved {
                slot,
                storage: Storage::Scalar,
                kind: SymbolKind::Variable,
                constant: false,
            });
        }
        Err(CompileError::symtab(
            "SYM001",
            format!("undefined symbol '{}'", name),
            pos,
        ))
    }

    // ---- 依存収集・型検査 -------------------------------------------------

    fn note_symbol(&mut self, name: &str, kind: SymbolKind) {
        let enabled = match kind {
            SymbolKind::Function => self.options.collect_functions,
            _ => self.options.collect_variables,
        };
        if enabled && !self.symbols.iter().any(|s| s.name == name) {
            self.symbols.push(SymbolEntry::new(name, kind));
        }
    }

    fn note_assignment(&mut self, name: &str, kind: SymbolKind) {
        if self.options.collect_assignments && !self.assignments.iter().any(|s| s.name == name) {
            self.assignments.push(SymbolEntry::new(name, kind));
        }
    }

    fn expect_scalar(&self, value: Typed, what: &str) -> PResult<Node> {
        let pos = self.peek().pos;
        if value.ty != Ty::Scalar {
            return Err(type_mismatch(what, pos));
        }
        Ok(value.node)
    }

    fn expect_scalar_at(&self, value: Typed, pos: usize) -> PResult<Node> {
        if value.ty != Ty::Scalar {
            return Err(type_mismatch("scalar operand", pos));
        }
        Ok(value.node)
    }
}

fn type_mismatch(context: &str, pos: usize) -> CompileError {
    CompileError::parser(
        "PAR020",
        format!("type mismatch in {}: expected scalar operands", context),
        pos,
    )
}

fn check_arity(name: &str, arity: Arity, got: usize, min: usize, pos: usize) -> PResult<()> {
    let ok = match arity {
        Arity::Exact(n) => got == n,
        Arity::Variadic => got >= min,
    };
    if ok {
        return Ok(());
    }
    let expected = match arity {
        Arity::Exact(n) => n.to_string(),
        Arity::Variadic => format!("at least {}", min),
    };
    Err(CompileError::parser(
        "PAR063",
        format!(
            "invalid argument count for '{}': expected {}, got {}",
            name, expected, got
        ),
        pos,
    ))
}

fn nesting_error(pos: usize) -> CompileError {
    CompileError::parser("PAR070", "expression nesting exceeds maximum depth", pos)
}

fn parse_vector_size(tok: &Token) -> PResult<usize> {
    let too_large = || {
        CompileError::new(
            "NUM002",
            ErrorMode::Numeric,
            format!(
                "vector size '{}' exceeds maximum of {} elements",
                tok.value, MAX_VECTOR_SIZE
            ),
            tok.pos,
        )
    };
    let invalid = || {
        CompileError::new(
            "NUM002",
            ErrorMode::Numeric,
            format!("invalid vector size '{}'", tok.value),
            tok.pos,
        )
    };
    let v = tok.value.parse::<f64>().map_err(|_| invalid())?;
    if v.fract() != 0.0 || v < 0.0 {
        return Err(invalid());
    }
    if v > MAX_VECTOR_SIZE as f64 {
        return Err(too_large());
    }
    Ok(v as usize)
}
