// パス: src/repl/input.rs
// 役割: プロンプトを表示して 1 行ずつ入力を読む行ソース
// 意図: 端末入力とスクリプト入力を同じ抽象で扱い、ループをテスト可能にする
// 関連ファイル: src/repl/cmd.rs
//! 行入力の抽象と標準入力実装。

use std::io::{self, BufRead, StdinLock, Stdout, Write};

/// 行入力の結果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadResult {
    /// 改行を除いた 1 行。
    Line(String),
    Eof,
}

/// 対話ループが利用する行ソース。
pub trait ReplLineSource {
    fn read_line(&mut self, prompt: &str) -> io::Result<ReadResult>;
}

/// プロンプトを書き出してから `BufRead` を 1 行読む行ソース。
pub struct PromptReader<R, W> {
    input: R,
    prompt_out: W,
}

impl PromptReader<StdinLock<'static>, Stdout> {
    /// 標準入力・標準出力に結び付いた行ソース。
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> PromptReader<R, W> {
    pub fn new(input: R, prompt_out: W) -> Self {
        Self { input, prompt_out }
    }
}

impl<R: BufRead, W: Write> ReplLineSource for PromptReader<R, W> {
    fn read_line(&mut self, prompt: &str) -> io::Result<ReadResult> {
        self.prompt_out.write_all(prompt.as_bytes())?;
        self.prompt_out.flush()?;
        // 不正な UTF-8 は置換文字に変えてプログラムとして渡し、コンパイル側で報告させる。
        let mut bytes = Vec::new();
        if self.input.read_until(b'\n', &mut bytes)? == 0 {
            return Ok(ReadResult::Eof);
        }
        while matches!(bytes.last(), Some(b'\n' | b'\r')) {
            bytes.pop();
        }
        Ok(ReadResult::Line(String::from_utf8_lossy(&bytes).into_owned()))
    }
}
