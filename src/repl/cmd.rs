// パス: src/repl/cmd.rs
// 役割: セッション制御ループ、入力行の分類、指示と評価サイクルの調停
// 意図: フラグとシンボル環境を 1 つのセッションが所有し、各サイクルを互いに独立させる
// 関連ファイル: src/repl/directive.rs, src/repl/pipeline.rs, src/repl/loader.rs
//! 対話・バッチ両モードのセッション制御。
//! 入力行を空行・終了語・指示・プログラムに分類し、評価パイプラインへ橋渡しする。

use std::io::{self, Write};
use std::process::ExitCode;

use tracing::{debug, error, info};

use crate::cli::Cli;
use crate::engine::{Engine, ExpressionEngine};
use crate::errors::SessionError;
use crate::symbols::SymbolEnvironment;

use super::directive::{self, Directive, SessionFlags, BLOCK_END, SENTINEL};
use super::input::{PromptReader, ReadResult, ReplLineSource};
use super::loader::{FsIo, ReplIo};
use super::pipeline::{run_cycle, CycleOutcome};
use super::printer::write_variable_list;

/// 対話入力のプロンプト。
pub const PROMPT: &str = ">> ";

const EXIT_WORDS: [&str; 2] = ["exit", "quit"];

/// 1 行の入力を分類した結果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    /// 空行・空白のみの行。何もしない。
    Empty,
    /// `exit` / `quit`。
    Exit,
    Directive(Directive),
    Program(String),
}

/// 生の入力行を `ReplCommand` に分類する。
pub fn parse_repl_command(line: &str) -> ReplCommand {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return ReplCommand::Empty;
    }
    if EXIT_WORDS.contains(&trimmed) {
        return ReplCommand::Exit;
    }
    if line.starts_with(SENTINEL) {
        return ReplCommand::Directive(directive::parse_directive(line.trim_end()));
    }
    ReplCommand::Program(line.to_string())
}

/// セッション制御層が利用者へ返すメッセージ（指示の結果やファイルエラー）。
///
/// プログラムの評価出力と結果行はここを経由せず、出力先へ直接書き出される。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplMsg {
    /// そのまま出力するテキスト。
    Text(String),
    /// そのまま出力し、失敗として数えるテキスト。
    Fail(String),
}

impl ReplMsg {
    pub fn is_failure(&self) -> bool {
        matches!(self, ReplMsg::Fail(_))
    }
}

/// フラグ・シンボル環境・エンジンを所有するセッション。
pub struct ReplSession<E: ExpressionEngine = Engine> {
    engine: E,
    env: SymbolEnvironment,
    flags: SessionFlags,
    cycles: usize,
    failures: usize,
}

impl ReplSession<Engine> {
    pub fn new(flags: SessionFlags) -> Self {
        Self::with_engine(Engine, flags)
    }

    pub fn with_defaults() -> Self {
        Self::new(SessionFlags::default())
    }
}

impl<E: ExpressionEngine> ReplSession<E> {
    pub fn with_engine(engine: E, flags: SessionFlags) -> Self {
        Self {
            engine,
            env: SymbolEnvironment::new(),
            flags,
            cycles: 0,
            failures: 0,
        }
    }

    pub fn flags(&self) -> SessionFlags {
        self.flags
    }

    pub fn env(&self) -> &SymbolEnvironment {
        &self.env
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// 実行したプログラムサイクル数。
    pub fn cycles(&self) -> usize {
        self.cycles
    }

    /// 失敗として報告した入力の数。
    pub fn failures(&self) -> usize {
        self.failures
    }

    /// 分類済みの入力を実行し、すべての出力を `out` へ逐次書き出す。
    ///
    /// `$begin` のブロックは行ソースから続きを読む必要があるため、ここでは実行できない。
    /// 渡された場合は失敗として報告する（ブロックは [`run_repl_with`] が集めて
    /// `ReplCommand::Program` として渡す）。
    pub fn execute<I, W>(&mut self, cmd: ReplCommand, io: &I, out: &mut W) -> io::Result<()>
    where
        I: ReplIo,
        W: Write,
    {
        let failed = match cmd {
            ReplCommand::Empty | ReplCommand::Exit => false,
            ReplCommand::Directive(d) => self.exec_directive(d, io, out)?,
            ReplCommand::Program(src) => self.submit(&src, out)?.is_failure(),
        };
        if failed {
            self.failures += 1;
        }
        out.flush()
    }

    fn exec_directive<I, W>(&mut self, d: Directive, io: &I, out: &mut W) -> io::Result<bool>
    where
        I: ReplIo,
        W: Write,
    {
        let msgs = match d {
            Directive::Toggle { .. } => {
                directive::apply(&mut self.flags, &d);
                Vec::new()
            }
            Directive::ListVars => {
                write_variable_list(out, &self.env.list_variables())?;
                Vec::new()
            }
            Directive::Load(path) => return self.load_file(&path, io, out),
            Directive::Begin => vec![session_failure(SessionError::BlockWithoutLineSource)],
            Directive::MissingLoadPath(text) => {
                vec![session_failure(SessionError::MissingLoadPath(text))]
            }
            Directive::Invalid(text) => {
                debug!(directive = %text, "invalid directive");
                vec![session_failure(SessionError::InvalidDirective(text))]
            }
        };
        report(msgs, out)
    }

    /// ファイル全体を 1 つのプログラムとして処理する。内容は指示として再解釈しない。
    /// 失敗（読み込み・コンパイル・評価）なら `true`。失敗の計上は呼び出し側が行う。
    pub fn load_file<I, W>(&mut self, path: &str, io: &I, out: &mut W) -> io::Result<bool>
    where
        I: ReplIo,
        W: Write,
    {
        match io.read_to_string(path) {
            Ok(src) => Ok(self.submit(&src, out)?.is_failure()),
            Err(e) => {
                info!(path, "program file skipped");
                report(vec![ReplMsg::Fail(format!("{}\n\n", e))], out)
            }
        }
    }

    /// プログラムテキストを 1 サイクル処理する。評価中の出力はそのまま `out` へ流れる。
    pub fn submit<W: Write>(&mut self, program: &str, out: &mut W) -> io::Result<CycleOutcome> {
        self.cycles += 1;
        run_cycle(&mut self.engine, &mut self.env, &self.flags, program, out)
    }

    /// 失敗を 1 件記録して報告する。
    pub(crate) fn fail<W: Write>(&mut self, err: SessionError, out: &mut W) -> io::Result<()> {
        self.failures += 1;
        report(vec![session_failure(err)], out)?;
        out.flush()
    }
}

fn session_failure(err: SessionError) -> ReplMsg {
    ReplMsg::Fail(format!("\n{}\n", err))
}

/// メッセージを書き出し、失敗を含んでいたかを返す。
fn report<W: Write>(msgs: Vec<ReplMsg>, out: &mut W) -> io::Result<bool> {
    let failed = msgs.iter().any(ReplMsg::is_failure);
    dispatch_messages(msgs, out)?;
    Ok(failed)
}

/// メッセージ列を出力先へ書き出す。
pub fn dispatch_messages<W: Write>(msgs: Vec<ReplMsg>, out: &mut W) -> io::Result<()> {
    for msg in msgs {
        let (ReplMsg::Text(s) | ReplMsg::Fail(s)) = msg;
        out.write_all(s.as_bytes())?;
    }
    out.flush()
}

/// `$end` まで行を集める。空行は読み飛ばし、各行は改行で終える。EOF なら `None`。
fn collect_block<S: ReplLineSource>(editor: &mut S) -> io::Result<Option<String>> {
    let mut program = String::new();
    loop {
        match editor.read_line(PROMPT)? {
            ReadResult::Eof => return Ok(None),
            ReadResult::Line(line) => {
                if line.is_empty() {
                    continue;
                }
                if line == BLOCK_END {
                    return Ok(Some(program));
                }
                program.push_str(&line);
                program.push('\n');
            }
        }
    }
}

/// 行ソースから入力を読み続ける対話ループ。
pub fn run_repl_with<E, S, I, W>(
    session: &mut ReplSession<E>,
    editor: &mut S,
    io: &I,
    out: &mut W,
) -> io::Result<()>
where
    E: ExpressionEngine,
    S: ReplLineSource,
    I: ReplIo,
    W: Write,
{
    loop {
        let line = match editor.read_line(PROMPT)? {
            ReadResult::Line(line) => line,
            ReadResult::Eof => break,
        };
        match parse_repl_command(&line) {
            ReplCommand::Empty => continue,
            ReplCommand::Exit => break,
            ReplCommand::Directive(Directive::Begin) => match collect_block(editor)? {
                Some(program) => session.execute(ReplCommand::Program(program), io, out)?,
                None => {
                    session.fail(SessionError::UnterminatedBlock, out)?;
                    break;
                }
            },
            cmd => session.execute(cmd, io, out)?,
        }
    }
    Ok(())
}

/// 各ファイルを独立したプログラムとして引数順に処理する。
pub fn run_files<E, I, W>(
    session: &mut ReplSession<E>,
    paths: &[String],
    io: &I,
    out: &mut W,
) -> io::Result<()>
where
    E: ExpressionEngine,
    I: ReplIo,
    W: Write,
{
    for path in paths {
        if session.load_file(path, io, out)? {
            session.failures += 1;
        }
        out.flush()?;
    }
    Ok(())
}

/// コマンドライン設定に従ってセッションを実行し、終了コードを返す。
pub fn run(cli: &Cli) -> ExitCode {
    let mut session = ReplSession::new(cli.initial_flags());
    let mut stdout = io::stdout();
    let result = if cli.files.is_empty() {
        let mut source = PromptReader::stdio();
        run_repl_with(&mut session, &mut source, &FsIo, &mut stdout)
    } else {
        let paths: Vec<String> = cli
            .files
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        run_files(&mut session, &paths, &FsIo, &mut stdout)
    };
    info!(
        cycles = session.cycles(),
        failures = session.failures(),
        "session finished"
    );
    if let Err(e) = result {
        error!(error = %e, "session aborted by I/O failure");
        eprintln!("I/O error: {}", e);
        return ExitCode::FAILURE;
    }
    if cli.strict && session.failures() > 0 {
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::{HashMap, VecDeque};
    use std::rc::Rc;

    use super::*;
    use crate::ast::CompiledProgram;
    use crate::engine::{CompileOptions, SymbolEntry};
    use crate::errors::{CompileError, EvalError};
    use crate::repl::directive::Flag;

    /// 事前に登録した内容を返すテスト用 I/O。
    struct MapIo(HashMap<String, String>);

    impl ReplIo for MapIo {
        fn read_to_string(&self, path: &str) -> Result<String, SessionError> {
            self.0.get(path).cloned().ok_or_else(|| {
                SessionError::file_access(path, io::Error::new(io::ErrorKind::NotFound, "missing"))
            })
        }
    }

    struct ScriptedLineSource {
        lines: VecDeque<&'static str>,
    }

    impl ScriptedLineSource {
        fn new(lines: impl IntoIterator<Item = &'static str>) -> Self {
            Self {
                lines: lines.into_iter().collect(),
            }
        }
    }

    impl ReplLineSource for ScriptedLineSource {
        fn read_line(&mut self, prompt: &str) -> io::Result<ReadResult> {
            assert_eq!(prompt, PROMPT);
            Ok(match self.lines.pop_front() {
                Some(s) => ReadResult::Line(s.to_string()),
                None => ReadResult::Eof,
            })
        }
    }

    /// 既定エンジンへ委譲しつつ評価回数を数えるエンジン。
    #[derive(Default)]
    struct CountingEngine {
        inner: Engine,
        compiles: usize,
        evaluations: usize,
        sources: Vec<String>,
    }

    impl ExpressionEngine for CountingEngine {
        type Program = CompiledProgram;

        fn compile(
            &mut self,
            source: &str,
            env: &mut SymbolEnvironment,
            options: &CompileOptions,
        ) -> Result<CompiledProgram, Vec<CompileError>> {
            self.compiles += 1;
            self.sources.push(source.to_string());
            self.inner.compile(source, env, options)
        }

        fn evaluate(
            &mut self,
            program: &CompiledProgram,
            env: &mut SymbolEnvironment,
            out: &mut dyn Write,
        ) -> Result<f64, EvalError> {
            self.evaluations += 1;
            self.inner.evaluate(program, env, out)
        }

        fn symbols(&self, program: &CompiledProgram) -> Vec<SymbolEntry> {
            self.inner.symbols(program)
        }

        fn assignment_symbols(&self, program: &CompiledProgram) -> Vec<SymbolEntry> {
            self.inner.assignment_symbols(program)
        }
    }

    fn run_script(
        session: &mut ReplSession<CountingEngine>,
        lines: Vec<&'static str>,
        io: &MapIo,
    ) -> String {
        let mut src = ScriptedLineSource::new(lines);
        let mut out = Vec::new();
        run_repl_with(session, &mut src, io, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    fn counting_session() -> ReplSession<CountingEngine> {
        ReplSession::with_engine(CountingEngine::default(), SessionFlags::default())
    }

    fn no_files() -> MapIo {
        MapIo(HashMap::new())
    }

    #[test]
    /// 入力行が期待通りの `ReplCommand` に分類されることを確認する。
    fn parse_repl_command_variants() {
        assert_eq!(parse_repl_command(""), ReplCommand::Empty);
        assert_eq!(parse_repl_command("   \t"), ReplCommand::Empty);
        assert_eq!(parse_repl_command("exit"), ReplCommand::Exit);
        assert_eq!(parse_repl_command("quit"), ReplCommand::Exit);
        assert_eq!(
            parse_repl_command("$enable_cache"),
            ReplCommand::Directive(Directive::Toggle {
                flag: Flag::PersistEnvironment,
                on: true
            })
        );
        assert_eq!(
            parse_repl_command("1 + 2"),
            ReplCommand::Program("1 + 2".into())
        );
        assert_eq!(
            parse_repl_command("exit_code + 1"),
            ReplCommand::Program("exit_code + 1".into())
        );
    }

    #[test]
    /// コンパイル失敗時に評価が一度も呼ばれないことを確認する。
    fn compile_failure_never_evaluates() {
        let mut session = counting_session();
        let out = run_script(&mut session, vec!["var x := ;"], &no_files());
        assert_eq!(session.engine().compiles, 1);
        assert_eq!(session.engine().evaluations, 0);
        assert!(out.starts_with("Error: "));
        assert!(out.contains("Type: [  Syntax Error]"));
        assert_eq!(session.failures(), 1);
    }

    #[test]
    fn cache_directive_persists_variables_between_cycles() {
        let mut session = counting_session();
        let out = run_script(
            &mut session,
            vec!["$enable_cache", "var k := 10;", "k + 1;"],
            &no_files(),
        );
        assert!(out.ends_with("\nresult:   11.00000\n"), "{out}");
        assert_eq!(session.engine().evaluations, 2);
    }

    #[test]
    fn variables_do_not_leak_without_cache() {
        let mut session = counting_session();
        let out = run_script(&mut session, vec!["var k := 10;", "k + 1;"], &no_files());
        assert!(out.contains("SYM001 - undefined symbol 'k'"), "{out}");
        assert_eq!(session.engine().evaluations, 1);
    }

    #[test]
    fn invalid_directive_echoes_text_and_keeps_flags() {
        let mut session = counting_session();
        let before = session.flags();
        let out = run_script(&mut session, vec!["$foo"], &no_files());
        assert_eq!(out, "\nERROR - Invalid directive: $foo\n");
        assert_eq!(session.flags(), before);
        assert_eq!(session.engine().compiles, 0);
    }

    #[test]
    /// ブロック内の空行が無視され、各行が改行付きで連結されることを確認する。
    fn begin_block_collects_until_end() {
        let mut session = counting_session();
        let out = run_script(
            &mut session,
            vec!["$begin", "var a := 2;", "", "a * 3", "$end", "exit", "1"],
            &no_files(),
        );
        assert_eq!(session.engine().sources, vec!["var a := 2;\na * 3\n"]);
        assert!(out.ends_with("\nresult:    6.00000\n"));
    }

    #[test]
    fn unterminated_block_is_reported() {
        let mut session = counting_session();
        let out = run_script(&mut session, vec!["$begin", "1 + 1"], &no_files());
        assert_eq!(out, "\nERROR - Unterminated $begin block\n");
        assert_eq!(session.engine().compiles, 0);
        assert_eq!(session.failures(), 1);
    }

    #[test]
    fn load_reads_program_text_without_directive_interpretation() {
        let mut files = HashMap::new();
        files.insert("prog.txt".to_string(), "$enable_cache\n".to_string());
        files.insert("ok.txt".to_string(), "var q := 4;\nq * q".to_string());
        let io = MapIo(files);
        let mut session = counting_session();
        let out = run_script(
            &mut session,
            vec!["$load ok.txt", "$load prog.txt", "$load missing.txt", "$load"],
            &io,
        );
        assert!(out.contains("\nresult:   16.00000\n"));
        assert!(!session.flags().get(Flag::PersistEnvironment));
        assert!(out.contains("ERROR: Failed to open file: missing.txt\n\n"));
        assert!(out.ends_with("\nERROR - Missing path for directive: $load\n"));
        assert_eq!(session.failures(), 3);
    }

    #[test]
    fn list_vars_prints_user_scalars_in_order() {
        let mut session = counting_session();
        let out = run_script(
            &mut session,
            vec!["$enable_cache", "$list_vars", "var a := 1; var b := 2.5;", "$list_vars"],
            &no_files(),
        );
        let tail = out.rsplit("result:").next().unwrap();
        assert!(tail.contains("00 a"));
        assert!(tail.find("00 a").unwrap() < tail.find("01 b").unwrap());
    }

    #[test]
    fn run_files_processes_each_file_independently() {
        let mut files = HashMap::new();
        files.insert("a".to_string(), "var x := 1; x + 1".to_string());
        files.insert("b".to_string(), "x".to_string());
        let io = MapIo(files);
        let mut session = counting_session();
        let mut out = Vec::new();
        run_files(
            &mut session,
            &["a".to_string(), "nope".to_string(), "b".to_string()],
            &io,
            &mut out,
        )
        .unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.starts_with("\nresult:    2.00000\n"));
        assert!(out.contains("ERROR: Failed to open file: nope\n\n"));
        assert!(out.contains("undefined symbol 'x'"));
        assert_eq!(session.engine().compiles, 2);
    }

    /// 複製しても同じバッファへ書き込む出力先。
    #[derive(Clone, Default)]
    struct SharedSink(Rc<RefCell<Vec<u8>>>);

    impl SharedSink {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.borrow()).into_owned()
        }
    }

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// 評価が終わった瞬間の出力先の内容を記録するエンジン。
    struct SnapshotEngine {
        sink: SharedSink,
        snapshots: Vec<String>,
    }

    impl ExpressionEngine for SnapshotEngine {
        type Program = CompiledProgram;

        fn compile(
            &mut self,
            source: &str,
            env: &mut SymbolEnvironment,
            options: &CompileOptions,
        ) -> Result<CompiledProgram, Vec<CompileError>> {
            Engine.compile(source, env, options)
        }

        fn evaluate(
            &mut self,
            program: &CompiledProgram,
            env: &mut SymbolEnvironment,
            out: &mut dyn Write,
        ) -> Result<f64, EvalError> {
            let value = Engine.evaluate(program, env, out);
            self.snapshots.push(self.sink.text());
            value
        }

        fn symbols(&self, program: &CompiledProgram) -> Vec<SymbolEntry> {
            Engine.symbols(program)
        }

        fn assignment_symbols(&self, program: &CompiledProgram) -> Vec<SymbolEntry> {
            Engine.assignment_symbols(program)
        }
    }

    #[test]
    /// 評価中の出力が結果行より先にセッションの出力先へ届いていることを確認する。
    fn evaluation_output_is_streamed_to_the_session_writer() {
        let sink = SharedSink::default();
        let engine = SnapshotEngine {
            sink: sink.clone(),
            snapshots: Vec::new(),
        };
        let mut session = ReplSession::with_engine(engine, SessionFlags::default());
        let mut out = sink.clone();
        session
            .execute(
                parse_repl_command("var i := 0; while (i < 2) { println(i); i += 1; }; 7"),
                &no_files(),
                &mut out,
            )
            .unwrap();
        assert_eq!(session.engine().snapshots, vec!["0\n1\n".to_string()]);
        assert_eq!(sink.text(), "0\n1\n\nresult:    7.00000\n");
    }

    #[test]
    fn begin_passed_directly_to_execute_is_reported() {
        let mut session = counting_session();
        let mut out = Vec::new();
        session
            .execute(ReplCommand::Directive(Directive::Begin), &no_files(), &mut out)
            .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "\nERROR - $begin requires a line source; submit the block as one program\n"
        );
        assert_eq!(session.failures(), 1);
        assert_eq!(session.engine().compiles, 0);
    }
}
