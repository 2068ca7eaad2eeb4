// パス: src/repl/directive.rs
// 役割: `$` で始まる指示行を閉じた命令集合へ解釈し、セッションフラグへ適用する
// 意図: フラグ操作を 1 つの構造体と 1 つの変更点に閉じ込め、未知の指示を必ず報告する
// 関連ファイル: src/repl/cmd.rs, src/engine.rs, src/symbols.rs
//! 指示（ディレクティブ）の解釈とセッションフラグ。

use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::engine::CompileOptions;
use crate::symbols::EnvironmentPolicy;

/// 指示行の先頭文字。
pub const SENTINEL: char = '$';
/// 複数行ブロックの開始行。
pub const BLOCK_BEGIN: &str = "$begin";
/// 複数行ブロックの終端行。
pub const BLOCK_END: &str = "$end";

const LIST_VARS: &str = "$list_vars";
const LOAD: &str = "$load";

/// セッションの真偽値フラグ。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    PersistEnvironment,
    DumpSymbols,
    DumpAssignments,
    ShowEvalTime,
    ShowCompileTime,
    UnknownSymbolResolution,
}

impl Flag {
    pub const ALL: [Flag; 6] = [
        Flag::PersistEnvironment,
        Flag::DumpSymbols,
        Flag::DumpAssignments,
        Flag::ShowEvalTime,
        Flag::ShowCompileTime,
        Flag::UnknownSymbolResolution,
    ];

    /// 指示名の接尾辞（`$enable_<name>` / `$disable_<name>`）。
    pub fn directive_name(self) -> &'static str {
        match self {
            Flag::PersistEnvironment => "cache",
            Flag::DumpSymbols => "symbol_dump",
            Flag::DumpAssignments => "assignment_dump",
            Flag::ShowEvalTime => "timer",
            Flag::ShowCompileTime => "compile_timer",
            Flag::UnknownSymbolResolution => "usr",
        }
    }
}

/// セッション全体で共有されるフラグ集合。変更は [`SessionFlags::set`] のみ。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionFlags {
    persist_environment: bool,
    dump_symbols: bool,
    dump_assignments: bool,
    show_eval_time: bool,
    show_compile_time: bool,
    unknown_symbol_resolution: bool,
}

impl SessionFlags {
    pub fn get(&self, flag: Flag) -> bool {
        match flag {
            Flag::PersistEnvironment => self.persist_environment,
            Flag::DumpSymbols => self.dump_symbols,
            Flag::DumpAssignments => self.dump_assignments,
            Flag::ShowEvalTime => self.show_eval_time,
            Flag::ShowCompileTime => self.show_compile_time,
            Flag::UnknownSymbolResolution => self.unknown_symbol_resolution,
        }
    }

    /// フラグを設定し、直前の値を返す。
    pub fn set(&mut self, flag: Flag, on: bool) -> bool {
        let slot = match flag {
            Flag::PersistEnvironment => &mut self.persist_environment,
            Flag::DumpSymbols => &mut self.dump_symbols,
            Flag::DumpAssignments => &mut self.dump_assignments,
            Flag::ShowEvalTime => &mut self.show_eval_time,
            Flag::ShowCompileTime => &mut self.show_compile_time,
            Flag::UnknownSymbolResolution => &mut self.unknown_symbol_resolution,
        };
        std::mem::replace(slot, on)
    }

    /// ビルダー形式の設定。
    pub fn with(mut self, flag: Flag, on: bool) -> Self {
        self.set(flag, on);
        self
    }

    /// シンボルダンプは変数と関数の両方を収集する。
    pub fn compile_options(&self) -> CompileOptions {
        CompileOptions {
            collect_variables: self.dump_symbols,
            collect_functions: self.dump_symbols,
            collect_assignments: self.dump_assignments,
            unknown_symbol_resolution: self.unknown_symbol_resolution,
        }
    }

    pub fn environment_policy(&self) -> EnvironmentPolicy {
        EnvironmentPolicy::from_persist_flag(self.persist_environment)
    }
}

/// 解釈済みの指示。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Toggle { flag: Flag, on: bool },
    ListVars,
    Load(String),
    Begin,
    /// パスを伴わない `$load`。
    MissingLoadPath(String),
    Invalid(String),
}

static TOGGLES: Lazy<FxHashMap<String, (Flag, bool)>> = Lazy::new(|| {
    Flag::ALL
        .iter()
        .flat_map(|&flag| {
            [
                (format!("$enable_{}", flag.directive_name()), (flag, true)),
                (format!("$disable_{}", flag.directive_name()), (flag, false)),
            ]
        })
        .collect()
});

/// 指示行を解釈する。先頭が `$` であることは呼び出し側が保証する。
pub fn parse_directive(line: &str) -> Directive {
    if let Some(&(flag, on)) = TOGGLES.get(line) {
        return Directive::Toggle { flag, on };
    }
    match line {
        LIST_VARS => return Directive::ListVars,
        BLOCK_BEGIN => return Directive::Begin,
        _ => {}
    }
    if let Some(rest) = line.strip_prefix(LOAD) {
        if rest.is_empty() {
            return Directive::MissingLoadPath(line.to_string());
        }
        if rest.starts_with(' ') {
            let path = rest.trim();
            if path.is_empty() {
                return Directive::MissingLoadPath(line.to_string());
            }
            return Directive::Load(path.to_string());
        }
    }
    Directive::Invalid(line.to_string())
}

/// 切替指示をフラグへ適用する。切替以外の指示では何もせず `false`。
pub fn apply(flags: &mut SessionFlags, directive: &Directive) -> bool {
    let Directive::Toggle { flag, on } = *directive else {
        return false;
    };
    let before = flags.set(flag, on);
    debug!(
        flag = flag.directive_name(),
        before,
        after = on,
        "session flag toggled"
    );
    true
}
