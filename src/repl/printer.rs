// パス: src/repl/printer.rs
// 役割: コンパイル診断・依存ダンプ・変数一覧・結果行の表示書式を集約する
// 意図: 出力書式を一箇所にまとめ、種別ごとの表示を網羅的な match で保証する
// 関連ファイル: src/repl/pipeline.rs, src/repl/cmd.rs, src/lexer.rs
//! REPL の表示ロジック。
//!
//! すべての関数は任意の `Write` へ書き出し、書式は固定幅の桁揃えを保つ。

use std::io::{self, Write};

use crate::engine::SymbolEntry;
use crate::errors::{CompileError, ErrorMode};
use crate::lexer::LineMap;

/// この長さ以上のプログラムは見出しで省略表示する。
const ECHO_LIMIT: usize = 200;
const ECHO_PLACEHOLDER: &str = ".....";

/// 先頭エラーの位置情報。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    /// 1 始まり。
    pub line: usize,
    /// 0 始まりの文字数。
    pub column: usize,
    pub text: String,
}

/// 1 件分の診断。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticRecord {
    pub index: usize,
    pub message: String,
    pub category: ErrorMode,
    pub position: usize,
    /// 先頭エラーのみ解決される。
    pub location: Option<Location>,
}

/// エンジンのエラー一覧から診断レコードを作る。
pub fn build_records(program: &str, errors: &[CompileError]) -> Vec<DiagnosticRecord> {
    let map = LineMap::new(program);
    errors
        .iter()
        .enumerate()
        .map(|(index, e)| {
            let location = (index == 0).then(|| {
                let (line, column) = map.locate(program, e.position);
                Location {
                    line,
                    column,
                    text: map.line_text(program, line).to_string(),
                }
            });
            DiagnosticRecord {
                index,
                message: e.message(),
                category: e.mode,
                position: e.position,
                location,
            }
        })
        .collect()
}

/// 診断一式を書き出す。
pub fn write_diagnostics<W: Write>(
    out: &mut W,
    program: &str,
    records: &[DiagnosticRecord],
) -> io::Result<()> {
    let Some(first) = records.first() else {
        return Ok(());
    };
    let separator = if program.contains('\n') { '\n' } else { ' ' };
    let echo = if program.len() < ECHO_LIMIT {
        program
    } else {
        ECHO_PLACEHOLDER
    };
    writeln!(
        out,
        "Error: {} [{}]\tExpression:{}{}",
        first.message, first.category, separator, echo
    )?;
    for r in records {
        writeln!(
            out,
            "Err No.: {:02}  Pos: {:02}  Type: [{:>14}] Msg: {}",
            r.index,
            r.position,
            r.category.label(),
            r.message
        )?;
        if let Some(loc) = &r.location {
            writeln!(out, "Error (line: {} column: {})", loc.line, loc.column)?;
            writeln!(out, "{} ", loc.text)?;
            writeln!(out, "{}", caret_line(loc.column))?;
        }
    }
    Ok(())
}

/// `~` を column 個並べた後に `^` を置いた行。
pub fn caret_line(column: usize) -> String {
    let mut s = "~".repeat(column);
    s.push('^');
    s
}

/// 依存ダンプの 1 区画を書き出す。
fn write_dump<W: Write>(
    out: &mut W,
    open: &str,
    close: &str,
    entries: &[SymbolEntry],
) -> io::Result<()> {
    writeln!(out, "{}", open)?;
    for (i, e) in entries.iter().enumerate() {
        writeln!(out, "[{:02}] {:<10}{}", i, e.kind.label(), e.name)?;
    }
    writeln!(out, "{}", close)
}

pub fn write_symbol_dump<W: Write>(out: &mut W, entries: &[SymbolEntry]) -> io::Result<()> {
    write_dump(out, "---- Symbols ----", "-----------------", entries)
}

pub fn write_assignment_dump<W: Write>(out: &mut W, entries: &[SymbolEntry]) -> io::Result<()> {
    write_dump(
        out,
        "---- Assignments ----",
        "---------------------",
        entries,
    )
}

/// `$list_vars` の出力。名前は最長の名前に揃えて左詰めする。
pub fn write_variable_list<W: Write>(out: &mut W, vars: &[(String, f64)]) -> io::Result<()> {
    let width = vars.iter().map(|(n, _)| n.len()).max().unwrap_or(0);
    for (i, (name, value)) in vars.iter().enumerate() {
        writeln!(out, "{:02} {:<width$} {:25.10}", i, name, value, width = width)?;
    }
    Ok(())
}

pub fn write_result<W: Write>(out: &mut W, value: f64) -> io::Result<()> {
    write!(out, "\nresult: {:10.5}\n", value)
}

pub fn write_compile_time<W: Write>(out: &mut W, millis: f64) -> io::Result<()> {
    write!(out, "\nCompile time: {:6.3}ms\n", millis)
}

pub fn write_eval_time<W: Write>(out: &mut W, millis: f64) -> io::Result<()> {
    write!(out, "\nTotal time: {:6.3}ms\n", millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SymbolKind;

    fn render<F: FnOnce(&mut Vec<u8>) -> io::Result<()>>(f: F) -> String {
        let mut buf = Vec::new();
        f(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    /// 改行を含むプログラムで、キャレット行の `~` の数が列番号と一致することを確認する。
    fn caret_count_matches_resolved_column() {
        let program = "var a := 1;\nvar b := a +* 2;";
        let err = CompileError::syntax("PAR001", "unexpected token '*'", 24);
        let records = build_records(program, &[err]);
        let loc = records[0].location.clone().unwrap();
        assert_eq!((loc.line, loc.column), (2, 12));
        assert_eq!(loc.text, "var b := a +* 2;");

        let text = render(|b| write_diagnostics(b, program, &records));
        let caret = text.lines().last().unwrap();
        assert_eq!(caret.matches('~').count(), loc.column);
        assert!(caret.ends_with('^'));
        assert!(text.starts_with("Error: PAR001 - unexpected token '*' [Syntax Error]\tExpression:\nvar a"));
        assert!(text.contains("Err No.: 00  Pos: 24  Type: [  Syntax Error] Msg: PAR001 - unexpected token '*'"));
        assert!(text.contains("Error (line: 2 column: 12)\nvar b := a +* 2; \n"));
    }

    #[test]
    fn only_first_error_gets_a_location_and_long_programs_are_elided() {
        let program = format!("{};", "1 + ".repeat(60));
        let errs = vec![
            CompileError::syntax("PAR001", "first", 4),
            CompileError::symtab("SYM001", "second", 8),
        ];
        let records = build_records(&program, &errs);
        assert!(records[0].location.is_some());
        assert!(records[1].location.is_none());
        let text = render(|b| write_diagnostics(b, &program, &records));
        assert!(text.starts_with("Error: PAR001 - first [Syntax Error]\tExpression: .....\n"));
        assert!(text.contains("Err No.: 01  Pos: 08  Type: [  Symbol Error] Msg: SYM001 - second"));
    }

    #[test]
    fn dump_lines_use_fixed_labels() {
        let entries = vec![
            SymbolEntry::new("x", SymbolKind::Variable),
            SymbolEntry::new("v", SymbolKind::LocalVector),
            SymbolEntry::new("println", SymbolKind::Function),
        ];
        let text = render(|b| write_symbol_dump(b, &entries));
        assert_eq!(
            text,
            "---- Symbols ----\n[00] Variable  x\n[01] LocalVec  v\n[02] Function  println\n-----------------\n"
        );
        let text = render(|b| write_assignment_dump(b, &[]));
        assert_eq!(text, "---- Assignments ----\n---------------------\n");
    }

    #[test]
    fn variable_list_preserves_order_and_pads_names() {
        assert_eq!(render(|b| write_variable_list(b, &[])), "");
        let vars = vec![("a".to_string(), 1.0), ("bee".to_string(), 2.5)];
        let text = render(|b| write_variable_list(b, &vars));
        assert_eq!(
            text,
            format!(
                "00 a   {:>25}\n01 bee {:>25}\n",
                "1.0000000000", "2.5000000000"
            )
        );
    }

    #[test]
    fn result_and_timer_lines() {
        assert_eq!(render(|b| write_result(b, 3.5)), "\nresult:    3.50000\n");
        assert_eq!(render(|b| write_compile_time(b, 1.25)), "\nCompile time:  1.250ms\n");
        assert_eq!(render(|b| write_eval_time(b, 12.5)), "\nTotal time: 12.500ms\n");
    }
}
