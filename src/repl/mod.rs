// パス: src/repl/mod.rs
// 役割: REPL module facade and re-exports
// 意図: Expose the session controller without leaking per-cycle internals
// 関連ファイル: src/repl/cmd.rs, src/repl/directive.rs, src/bin/exprepl.rs
//! 式評価セッションを構成するモジュール群をまとめたファサード。
//!
//! 入力・指示解釈・評価サイクル・表示を役割ごとに分け、外部には最小限の API のみを公開する。
//! - `cmd`: メインループと入力行の分類
//! - `directive`: `$` 指示とセッションフラグ
//! - `input`: 行ソース
//! - `loader`: プログラムファイルの読み込み
//! - `pipeline`: コンパイル → 評価 → 報告の 1 サイクル
//! - `printer`: ユーザー向けの表示ロジック

pub mod cmd;
pub mod directive;
pub mod input;
pub mod loader;
mod pipeline;
pub mod printer;

pub use cmd::{
    dispatch_messages, parse_repl_command, run, run_files, run_repl_with, ReplCommand, ReplMsg,
    ReplSession, PROMPT,
};
pub use directive::{parse_directive, Directive, Flag, SessionFlags};
pub use input::{PromptReader, ReadResult, ReplLineSource};
pub use loader::{FsIo, ReplIo};
pub use pipeline::CycleOutcome;
