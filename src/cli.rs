// パス: src/cli.rs
// 役割: コマンドライン引数の定義と初期セッションフラグへの変換
// 意図: 設定面を clap の derive に集約し、設定ファイルや環境変数を持たない
// 関連ファイル: src/bin/exprepl.rs, src/repl/directive.rs, src/logging.rs
//! コマンドライン設定。

use std::path::PathBuf;

use clap::Parser;

use crate::repl::directive::{Flag, SessionFlags};

/// 数式プログラムを対話的またはバッチで評価する
#[derive(Debug, Parser)]
#[command(name = "exprepl")]
#[command(version)]
#[command(about = "Expression evaluation session controller", long_about = None)]
pub struct Cli {
    /// 順に処理するプログラムファイル（省略時は対話モード）
    #[arg(value_name = "FILES")]
    pub files: Vec<PathBuf>,

    /// ログの詳細度（-v: info, -vv: debug, -vvv: trace）
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// 失敗したサイクルがあれば終了コード 1 を返す
    #[arg(long)]
    pub strict: bool,

    /// `$enable_cache` 相当で開始する
    #[arg(long)]
    pub enable_cache: bool,

    /// `$enable_symbol_dump` 相当で開始する
    #[arg(long)]
    pub symbol_dump: bool,

    /// `$enable_assignment_dump` 相当で開始する
    #[arg(long)]
    pub assignment_dump: bool,

    /// `$enable_timer` 相当で開始する
    #[arg(long)]
    pub timer: bool,

    /// `$enable_compile_timer` 相当で開始する
    #[arg(long)]
    pub compile_timer: bool,

    /// `$enable_usr` 相当で開始する
    #[arg(long)]
    pub usr: bool,
}

impl Cli {
    /// 最初の入力を読む前のセッションフラグ。
    pub fn initial_flags(&self) -> SessionFlags {
        SessionFlags::default()
            .with(Flag::PersistEnvironment, self.enable_cache)
            .with(Flag::DumpSymbols, self.symbol_dump)
            .with(Flag::DumpAssignments, self.assignment_dump)
            .with(Flag::ShowEvalTime, self.timer)
            .with(Flag::ShowCompileTime, self.compile_timer)
            .with(Flag::UnknownSymbolResolution, self.usr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_seed_session_state() {
        let cli = Cli::try_parse_from(["exprepl", "--enable-cache", "--usr", "-vv", "a.txt", "b.txt"])
            .unwrap();
        assert_eq!(cli.files, vec![PathBuf::from("a.txt"), PathBuf::from("b.txt")]);
        assert_eq!(cli.verbose, 2);
        let flags = cli.initial_flags();
        assert!(flags.get(Flag::PersistEnvironment));
        assert!(flags.get(Flag::UnknownSymbolResolution));
        assert!(!flags.get(Flag::DumpSymbols));
        assert!(!cli.strict);
    }

    #[test]
    fn no_arguments_means_interactive_defaults() {
        let cli = Cli::try_parse_from(["exprepl"]).unwrap();
        assert!(cli.files.is_empty());
        assert_eq!(cli.initial_flags(), SessionFlags::default());
    }
}
