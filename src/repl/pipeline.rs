// パス: src/repl/pipeline.rs
// 役割: 1 プログラム分の 環境準備 → コンパイル → 評価 → 報告 を実行する
// 意図: セッション制御からエンジン呼び出しと計時を切り離し、1 サイクルを独立させる
// 関連ファイル: src/repl/cmd.rs, src/repl/printer.rs, src/engine.rs

use std::io::{self, Write};
use std::time::Instant;

use tracing::{debug, warn};

use crate::engine::ExpressionEngine;
use crate::symbols::SymbolEnvironment;

use super::directive::{Flag, SessionFlags};
use super::printer::{
    build_records, write_assignment_dump, write_compile_time, write_diagnostics,
    write_eval_time, write_result, write_symbol_dump,
};

/// 1 サイクルの結末。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CycleOutcome {
    Evaluated(f64),
    /// コンパイル失敗（エラー件数）。評価は行われない。
    CompileFailed(usize),
    EvalFailed,
}

impl CycleOutcome {
    pub fn is_failure(&self) -> bool {
        !matches!(self, CycleOutcome::Evaluated(_))
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

/// プログラムを 1 回処理し、表示内容を `out` へ書き出す。
pub(crate) fn run_cycle<E, W>(
    engine: &mut E,
    env: &mut SymbolEnvironment,
    flags: &SessionFlags,
    program: &str,
    out: &mut W,
) -> io::Result<CycleOutcome>
where
    E: ExpressionEngine,
    W: Write,
{
    if env.prepare(flags.environment_policy()) {
        debug!("user symbols purged before compile");
    }

    let options = flags.compile_options();
    let started = Instant::now();
    let compiled = engine.compile(program, env, &options);
    let compile_ms = elapsed_ms(started);

    let compiled = match compiled {
        Ok(p) => p,
        Err(errors) => {
            debug!(errors = errors.len(), "compile failed");
            let records = build_records(program, &errors);
            write_diagnostics(out, program, &records)?;
            return Ok(CycleOutcome::CompileFailed(errors.len()));
        }
    };

    if flags.get(Flag::ShowCompileTime) {
        write_compile_time(out, compile_ms)?;
    }

    let started = Instant::now();
    let value = match engine.evaluate(&compiled, env, out) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "evaluation failed");
            write!(out, "\nERROR - {}\n", e)?;
            return Ok(CycleOutcome::EvalFailed);
        }
    };
    let eval_ms = elapsed_ms(started);

    write_result(out, value)?;
    if flags.get(Flag::ShowEvalTime) {
        write_eval_time(out, eval_ms)?;
    }
    if flags.get(Flag::DumpSymbols) {
        write_symbol_dump(out, &engine.symbols(&compiled))?;
    }
    if flags.get(Flag::DumpAssignments) {
        write_assignment_dump(out, &engine.assignment_symbols(&compiled))?;
    }
    Ok(CycleOutcome::Evaluated(value))
}
