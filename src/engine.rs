// パス: src/engine.rs
// 役割: コンパイル・評価・依存シンボル収集の協調インターフェースを定義する
// 意図: セッション制御をエンジン実装から切り離し、差し替えやテスト用の計測を可能にする
// 関連ファイル: src/parser.rs, src/evaluator.rs, src/repl/pipeline.rs
//! 式エンジンの協調インターフェース
//!
//! セッション制御層はこのトレイトだけを通してエンジンを利用する。
//! 既定実装 [`Engine`] は本クレートのパーサと評価器を束ねたもの。

use std::io::Write;

use crate::ast::CompiledProgram;
use crate::errors::{CompileError, EvalError};
use crate::symbols::SymbolEnvironment;
use crate::{evaluator, parser};

/// 依存シンボルの種別。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Variable,
    Vector,
    String,
    Function,
    LocalVariable,
    LocalVector,
    LocalString,
}

impl SymbolKind {
    /// ダンプ表示用のラベル。
    pub fn label(self) -> &'static str {
        match self {
            SymbolKind::Variable => "Variable",
            SymbolKind::Vector => "Vector",
            SymbolKind::String => "String",
            SymbolKind::Function => "Function",
            SymbolKind::LocalVariable => "LocalVar",
            SymbolKind::LocalVector => "LocalVec",
            SymbolKind::LocalString => "LocalStr",
        }
    }
}

/// 依存収集の結果 1 件。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolEntry {
    pub name: String,
    pub kind: SymbolKind,
}

impl SymbolEntry {
    pub fn new(name: impl Into<String>, kind: SymbolKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// コンパイル時オプション。セッションフラグから導出される。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompileOptions {
    pub collect_variables: bool,
    pub collect_functions: bool,
    pub collect_assignments: bool,
    pub unknown_symbol_resolution: bool,
}

/// セッション制御層が利用する式エンジンの能力。
pub trait ExpressionEngine {
    type Program;

    /// プログラムを環境へ束縛してコンパイルする。失敗時はエラー一覧を順序付きで返す。
    fn compile(
        &mut self,
        source: &str,
        env: &mut SymbolEnvironment,
        options: &CompileOptions,
    ) -> Result<Self::Program, Vec<CompileError>>;

    /// コンパイル済みプログラムを評価し、スカラー結果を返す。
    fn evaluate(
        &mut self,
        program: &Self::Program,
        env: &mut SymbolEnvironment,
        out: &mut dyn Write,
    ) -> Result<f64, EvalError>;

    /// 参照シンボル一覧（収集が有効な場合のみ非空）。
    fn symbols(&self, program: &Self::Program) -> Vec<SymbolEntry>;

    /// 代入先シンボル一覧（収集が有効な場合のみ非空）。
    fn assignment_symbols(&self, program: &Self::Program) -> Vec<SymbolEntry>;
}

/// 既定の式エンジン。
#[derive(Debug, Clone, Copy, Default)]
pub struct Engine;

impl ExpressionEngine for Engine {
    type Program = CompiledProgram;

    fn compile(
        &mut self,
        source: &str,
        env: &mut SymbolEnvironment,
        options: &CompileOptions,
    ) -> Result<CompiledProgram, Vec<CompileError>> {
        parser::compile(source, env, options)
    }

    fn evaluate(
        &mut self,
        program: &CompiledProgram,
        env: &mut SymbolEnvironment,
        out: &mut dyn Write,
    ) -> Result<f64, EvalError> {
        evaluator::evaluate(program, env, out)
    }

    fn symbols(&self, program: &CompiledProgram) -> Vec<SymbolEntry> {
        program.symbols.clone()
    }

    fn assignment_symbols(&self, program: &CompiledProgram) -> Vec<SymbolEntry> {
        program.assignments.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_labels_match_dump_table() {
        let labels: Vec<&str> = [
            SymbolKind::Variable,
            SymbolKind::Vector,
            SymbolKind::String,
            SymbolKind::Function,
            SymbolKind::LocalVariable,
            SymbolKind::LocalVector,
            SymbolKind::LocalString,
        ]
        .into_iter()
        .map(SymbolKind::label)
        .collect();
        assert_eq!(
            labels,
            vec!["Variable", "Vector", "String", "Function", "LocalVar", "LocalVec", "LocalStr"]
        );
    }

    #[test]
    /// 既定エンジンでコンパイル→評価が一巡することを確認する。
    fn default_engine_round_trip() {
        let mut engine = Engine;
        let mut env = SymbolEnvironment::new();
        let opts = CompileOptions {
            collect_variables: true,
            collect_functions: true,
            ..Default::default()
        };
        let prog = engine.compile("var a := 2; a * pi", &mut env, &opts).unwrap();
        let mut out = Vec::new();
        let v = engine.evaluate(&prog, &mut env, &mut out).unwrap();
        assert!((v - 2.0 * std::f64::consts::PI).abs() < 1e-12);
        let names: Vec<String> = engine.symbols(&prog).into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["a", "pi"]);
        assert!(engine.assignment_symbols(&prog).is_empty());
    }
}
