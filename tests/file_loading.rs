// パス: tests/file_loading.rs
// 役割: `$load` 指示とファイル引数モードによるプログラムファイル処理の検証
// 意図: 実ファイルとメモリ I/O の双方で、ファイル単位の独立性と失敗の継続を確かめる
// 関連ファイル: tests/test_support.rs, src/repl/loader.rs, src/repl/cmd.rs
#[path = "test_support.rs"]
mod support;

use std::fs;

use clap::Parser;
use exprepl::cli::Cli;
use exprepl::repl::{Flag, FsIo, ReplSession};
use pretty_assertions::assert_eq;
use support::{results, run_lines, run_paths, MapIo};

#[test]
fn load_directive_runs_file_content_as_one_program() {
    let io = MapIo::default().with("prog.txt", "var a := 2;\nvar b := a ^ 3;\nb - 1\n");
    let mut session = ReplSession::with_defaults();
    let out = run_lines(&mut session, &["$load prog.txt"], &io);
    assert_eq!(out, "\nresult:    7.00000\n");
    assert_eq!(session.cycles(), 1);
}

#[test]
fn directive_lines_inside_a_loaded_file_are_not_interpreted() {
    let io = MapIo::default().with("odd.txt", "$enable_cache\n1 + 1");
    let mut session = ReplSession::with_defaults();
    let out = run_lines(&mut session, &["$load odd.txt"], &io);
    assert!(out.starts_with("Error: "));
    assert!(!session.flags().get(Flag::PersistEnvironment));
}

#[test]
fn missing_file_is_reported_and_the_session_continues() {
    let mut session = ReplSession::with_defaults();
    let out = run_lines(&mut session, &["$load nowhere.txt", "1 + 2"], &MapIo::default());
    assert_eq!(
        out,
        "ERROR: Failed to open file: nowhere.txt\n\n\nresult:    3.00000\n"
    );
    assert_eq!(session.failures(), 1);
    assert_eq!(session.cycles(), 1);
}

#[test]
fn load_without_a_path_is_rejected() {
    let mut session = ReplSession::with_defaults();
    let out = run_lines(&mut session, &["$load   "], &MapIo::default());
    assert!(out.starts_with("\nERROR - Missing path for directive: "), "{out}");
    assert_eq!(session.cycles(), 0);
    assert_eq!(session.failures(), 1);
}

#[test]
fn load_directive_reads_real_files_through_fs_io() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sum.txt");
    fs::write(
        &path,
        "var s := 0;\nfor (var i := 0; i < 5; i += 1)\n{\n  s += i;\n}\ns\n",
    )
    .unwrap();
    let mut session = ReplSession::with_defaults();
    let line = format!("$load {}", path.display());
    let out = run_lines(&mut session, &[line.as_str()], &FsIo);
    assert_eq!(results(&out), vec![10.0]);
}

#[test]
fn batch_mode_processes_files_in_order_and_skips_unreadable_ones() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("first.txt");
    let second = dir.path().join("second.txt");
    fs::write(&first, "var x := 21; x * 2").unwrap();
    fs::write(&second, "println('second'); 5").unwrap();
    let missing = dir.path().join("missing.txt");
    let paths: Vec<String> = [&first, &missing, &second]
        .iter()
        .map(|p| p.display().to_string())
        .collect();

    let mut session = ReplSession::with_defaults();
    let out = run_paths(&mut session, &paths, &FsIo);
    assert_eq!(results(&out), vec![42.0, 5.0]);
    assert!(out.contains(&format!("ERROR: Failed to open file: {}\n\n", paths[1])));
    assert!(out.contains("second\n\nresult:    5.00000\n"));
    assert_eq!(session.cycles(), 2);
    assert_eq!(session.failures(), 1);
}

#[test]
fn batch_files_do_not_share_variables_unless_cache_is_enabled() {
    let io = MapIo::default()
        .with("a.txt", "var shared := 7;")
        .with("b.txt", "shared + 1");
    let paths = vec!["a.txt".to_string(), "b.txt".to_string()];

    let mut session = ReplSession::with_defaults();
    let out = run_paths(&mut session, &paths, &io);
    assert_eq!(results(&out), vec![7.0]);
    assert_eq!(session.failures(), 1);

    let cli = Cli::try_parse_from(["exprepl", "--enable-cache", "a.txt", "b.txt"]).unwrap();
    let mut session = ReplSession::new(cli.initial_flags());
    let out = run_paths(&mut session, &paths, &io);
    assert_eq!(results(&out), vec![7.0, 8.0]);
    assert_eq!(session.failures(), 0);
}

#[test]
fn cli_flags_seed_dumps_for_batch_runs() {
    let io = MapIo::default().with("p.txt", "var q := 1; q += 2");
    let cli = Cli::try_parse_from(["exprepl", "--strict", "--assignment-dump", "p.txt"]).unwrap();
    assert!(cli.strict);
    let mut session = ReplSession::new(cli.initial_flags());
    let out = run_paths(&mut session, &["p.txt".to_string()], &io);
    assert_eq!(
        out,
        "\nresult:    3.00000\n---- Assignments ----\n[00] LocalVar  q\n---------------------\n"
    );
}
