// パス: src/lib.rs
// 役割: Crate root wiring modules and exports
// 意図: Expose the session controller and its expression-engine collaborators
// 関連ファイル: src/repl/mod.rs, src/engine.rs, src/symbols.rs
//! exprepl ルートモジュール
//!
//! 目的:
//! - 数式プログラムを対話/バッチで評価するセッション制御を提供する。
//! - シンボル環境の寿命管理、`$` 指示の解釈、診断表示をここで担う。
//!
//! 方針:
//! - コメント/ドキュメントは日本語、識別子は英語。
//! - セッション層は `engine::ExpressionEngine` だけを通して式エンジンを使う。
//! - パブリックAPIは最小限。

pub mod ast;
pub mod cli;
pub mod engine;
pub mod errors;
pub mod evaluator;
pub mod lexer;
pub mod logging;
pub mod parser;
pub mod repl;
pub mod symbols;

// 便利な再エクスポート
pub use crate::engine::{CompileOptions, Engine, ExpressionEngine, SymbolEntry, SymbolKind};
pub use crate::errors::{CompileError, ErrorMode, EvalError, SessionError};
pub use crate::symbols::{EnvironmentPolicy, SymbolEnvironment};
