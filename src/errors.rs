// パス: src/errors.rs
// 役割: コンパイル・評価・セッション各層のエラー型を定義する
// 意図: エンジン由来の構造化エラーと利用者向けの失敗を分けて扱う
// 関連ファイル: src/parser.rs, src/evaluator.rs, src/repl/printer.rs
//! エラー型の定義（共通フォーマット: \[CODE\] メッセージ @pos）。

use std::fmt::{self, Display, Formatter};
use std::io;

use thiserror::Error;

/// コンパイルエラーの分類。診断表示ではラベル文字列として出力される。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorMode {
    Syntax,
    Token,
    Numeric,
    Symtab,
    Lexer,
    Parser,
}

impl ErrorMode {
    /// 表示用のカテゴリ名を返す。
    pub fn label(self) -> &'static str {
        match self {
            ErrorMode::Syntax => "Syntax Error",
            ErrorMode::Token => "Token Error",
            ErrorMode::Numeric => "Numeric Error",
            ErrorMode::Symtab => "Symbol Error",
            ErrorMode::Lexer => "Lexer Error",
            ErrorMode::Parser => "Parser Error",
        }
    }
}

impl Display for ErrorMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// コンパイル時に検出された 1 件のエラー。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub code: &'static str,
    pub mode: ErrorMode,
    pub diagnostic: String,
    pub position: usize, // ソース先頭からのバイトオフセット
}

impl CompileError {
    pub fn new(
        code: &'static str,
        mode: ErrorMode,
        diagnostic: impl Into<String>,
        position: usize,
    ) -> Self {
        Self {
            code,
            mode,
            diagnostic: diagnostic.into(),
            position,
        }
    }

    pub fn syntax(code: &'static str, diagnostic: impl Into<String>, position: usize) -> Self {
        Self::new(code, ErrorMode::Syntax, diagnostic, position)
    }

    pub fn symtab(code: &'static str, diagnostic: impl Into<String>, position: usize) -> Self {
        Self::new(code, ErrorMode::Symtab, diagnostic, position)
    }

    pub fn parser(code: &'static str, diagnostic: impl Into<String>, position: usize) -> Self {
        Self::new(code, ErrorMode::Parser, diagnostic, position)
    }

    /// コード付きの診断文 (`CODE - message`) を返す。
    pub fn message(&self) -> String {
        format!("{} - {}", self.code, self.diagnostic)
    }
}

impl Display for CompileError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} @pos={}", self.code, self.diagnostic, self.position)
    }
}

impl std::error::Error for CompileError {}

/// 評価器が返しうる失敗。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("コンパイル済みプログラムが古い環境に束縛されています (program: {bound}, environment: {current})")]
    StaleProgram { bound: u64, current: u64 },
    #[error("出力に失敗しました: {0}")]
    Output(String),
}

impl From<io::Error> for EvalError {
    fn from(e: io::Error) -> Self {
        EvalError::Output(e.to_string())
    }
}

/// セッション制御層で発生し、利用者へ報告される失敗。
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("ERROR: Failed to open file: {path}")]
    FileAccess {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("ERROR - Invalid directive: {0}")]
    InvalidDirective(String),
    #[error("ERROR - Missing path for directive: {0}")]
    MissingLoadPath(String),
    #[error("ERROR - Unterminated $begin block")]
    UnterminatedBlock,
    #[error("ERROR - $begin requires a line source; submit the block as one program")]
    BlockWithoutLineSource,
}

impl SessionError {
    pub fn file_access(path: impl Into<String>, source: io::Error) -> Self {
        Self::FileAccess {
            path: path.into(),
            source,
        }
    }
}
