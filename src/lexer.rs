// パス: src/lexer.rs
// 役割: 式プログラム用の字句解析器とトークン定義、位置→行・列変換を提供する
// 意図: 構文解析と診断表示の双方が同じ位置情報を共有できるようにする
// 関連ファイル: src/parser.rs, src/errors.rs, src/repl/printer.rs
//! 字句解析モジュール
//!
//! - ソースをトークン列へ変換する。正規表現ライブラリは使わない。
//! - すべてのトークンにバイト位置を記録し、診断時に `LineMap` で行・列へ解決する。
//! - コメントは `#` / `//` の行コメントと `/* */` のブロックコメント。

use crate::errors::{CompileError, ErrorMode};

#[derive(Debug, Clone, PartialEq)]
/// 生成されたトークンとその位置情報を保持するレコード。
pub struct Token {
    pub kind: TokenKind,
    pub value: String,
    pub pos: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// 字句解析で識別されるトークンの分類。
pub enum TokenKind {
    EOF,
    // リテラル・識別子
    NUMBER,
    STRING,
    IDENT,
    // キーワード
    VAR,
    IF,
    ELSE,
    FOR,
    WHILE,
    BREAK,
    CONTINUE,
    TRUE,
    FALSE,
    AND,
    OR,
    XOR,
    NOT,
    // 代入演算子
    ASSIGN,
    ADDASSIGN,
    SUBASSIGN,
    MULASSIGN,
    DIVASSIGN,
    MODASSIGN,
    // 比較演算子
    EQ,
    NE,
    LT,
    LE,
    GT,
    GE,
    // 算術・論理記号
    PLUS,
    MINUS,
    STAR,
    SLASH,
    PERCENT,
    CARET,
    BANG,
    AMP,
    BAR,
    QMARK,
    COLON,
    // 区切り
    LPAREN,
    RPAREN,
    LBRACK,
    RBRACK,
    LBRACE,
    RBRACE,
    COMMA,
    SEMI,
}

#[derive(Debug)]
/// 行頭オフセットを事前計算し、行・列情報を素早く算出するヘルパ。
pub struct LineMap {
    starts: Vec<usize>,
}

impl LineMap {
    /// 入力全体を 1 度だけ走査して行頭インデックスを収集する。
    pub fn new(src: &str) -> Self {
        let mut starts = vec![0];
        for (idx, ch) in src.char_indices() {
            if ch == '\n' {
                starts.push(idx + ch.len_utf8());
            }
        }
        Self { starts }
    }

    /// 指定バイト位置の行番号 (1 起点) と桁位置 (0 起点の文字数) を返す。
    ///
    /// 位置がソース長を超える場合は末尾へ丸める。
    pub fn locate(&self, src: &str, pos: usize) -> (usize, usize) {
        let pos = floor_char_boundary(src, pos.min(src.len()));
        let idx = match self.starts.binary_search(&pos) {
            Ok(i) => i,
            Err(0) => 0,
            Err(i) => i - 1,
        };
        let start = self.starts[idx];
        (idx + 1, src[start..pos].chars().count())
    }

    /// 指定行に対応するテキスト断片を返す（改行は除去する）。
    pub fn line_text<'a>(&self, src: &'a str, line: usize) -> &'a str {
        if line == 0 || line > self.starts.len() {
            return "";
        }
        let start = self.starts[line - 1];
        let end = self.starts.get(line).copied().unwrap_or(src.len());
        let slice = &src[start..end];
        let slice = slice.strip_suffix('\n').unwrap_or(slice);
        slice.strip_suffix('\r').unwrap_or(slice)
    }
}

fn floor_char_boundary(src: &str, mut pos: usize) -> usize {
    while pos > 0 && !src.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}

fn is_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n')
}
fn is_digit(c: char) -> bool {
    c.is_ascii_digit()
}
/// 識別子の先頭に使用可能な文字かどうかを判定する。
fn is_letter(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}
fn is_ident_rest(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

struct Lexer<'a> {
    src: &'a str,
    cursor: usize,
    len: usize,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            cursor: 0,
            len: src.len(),
            tokens: Vec::new(),
        }
    }

    fn run(mut self) -> Result<Vec<Token>, CompileError> {
        while self.cursor < self.len {
            if self.consume_trivia()? {
                continue;
            }
            if self.cursor >= self.len {
                break;
            }
            self.lex_token()?;
        }
        self.push_simple(TokenKind::EOF, "", self.len);
        Ok(self.tokens)
    }

    fn consume_trivia(&mut self) -> Result<bool, CompileError> {
        let mut advanced = false;
        loop {
            if self.consume_whitespace() {
                advanced = true;
                continue;
            }
            if self.cursor >= self.len {
                break;
            }
            if self.consume_block_comment()? {
                advanced = true;
                continue;
            }
            if self.consume_line_comment() {
                advanced = true;
                continue;
            }
            break;
        }
        Ok(advanced)
    }

    fn consume_whitespace(&mut self) -> bool {
        let mut advanced = false;
        while let Some(ch) = self.peek_char() {
            if is_whitespace(ch) {
                self.advance_char();
                advanced = true;
            } else {
                break;
            }
        }
        advanced
    }

    fn consume_line_comment(&mut self) -> bool {
        if self.starts_with("//") {
            self.advance_bytes(2);
        } else if self.starts_with("#") {
            self.advance_bytes(1);
        } else {
            return false;
        }
        while let Some(ch) = self.advance_char() {
            if ch == '\n' {
                break;
            }
        }
        true
    }

    fn consume_block_comment(&mut self) -> Result<bool, CompileError> {
        if !self.starts_with("/*") {
            return Ok(false);
        }
        let start = self.cursor;
        match self.src[start + 2..].find("*/") {
            Some(offset) => {
                self.cursor = start + 2 + offset + 2;
                Ok(true)
            }
            None => Err(self.err("LEX001", "unterminated block comment", start)),
        }
    }

    fn lex_token(&mut self) -> Result<(), CompileError> {
        let start = self.cursor;
        let Some(ch) = self.peek_char() else {
            return Ok(());
        };
        if self.try_multi_char_symbol(ch) {
            return Ok(());
        }
        if self.try_single_char_symbol(ch) {
            return Ok(());
        }
        if ch == '\'' {
            return self.lex_string_literal();
        }
        if is_digit(ch) || (ch == '.' && self.peek_second_char().is_some_and(is_digit)) {
            return self.lex_number();
        }
        if is_letter(ch) {
            self.lex_identifier_or_keyword();
            return Ok(());
        }
        Err(self.err("LEX090", format!("invalid character {:?}", ch), start))
    }

    fn try_multi_char_symbol(&mut self, first: char) -> bool {
        let Some(second) = self.peek_second_char() else {
            return false;
        };
        let token = match (first, second) {
            (':', '=') => Some((TokenKind::ASSIGN, ":=")),
            ('+', '=') => Some((TokenKind::ADDASSIGN, "+=")),
            ('-', '=') => Some((TokenKind::SUBASSIGN, "-=")),
            ('*', '=') => Some((TokenKind::MULASSIGN, "*=")),
            ('/', '=') => Some((TokenKind::DIVASSIGN, "/=")),
            ('%', '=') => Some((TokenKind::MODASSIGN, "%=")),
            ('=', '=') => Some((TokenKind::EQ, "==")),
            ('!', '=') => Some((TokenKind::NE, "!=")),
            ('<', '>') => Some((TokenKind::NE, "<>")),
            ('<', '=') => Some((TokenKind::LE, "<=")),
            ('>', '=') => Some((TokenKind::GE, ">=")),
            _ => None,
        };
        if let Some((kind, value)) = token {
            let start = self.cursor;
            self.advance_bytes(first.len_utf8() + second.len_utf8());
            self.push_simple(kind, value, start);
            return true;
        }
        false
    }

    fn try_single_char_symbol(&mut self, ch: char) -> bool {
        let token = match ch {
            '=' => Some((TokenKind::EQ, "=")),
            '<' => Some((TokenKind::LT, "<")),
            '>' => Some((TokenKind::GT, ">")),
            '+' => Some((TokenKind::PLUS, "+")),
            '-' => Some((TokenKind::MINUS, "-")),
            '*' => Some((TokenKind::STAR, "*")),
            '/' => Some((TokenKind::SLASH, "/")),
            '%' => Some((TokenKind::PERCENT, "%")),
            '^' => Some((TokenKind::CARET, "^")),
            '!' => Some((TokenKind::BANG, "!")),
            '&' => Some((TokenKind::AMP, "&")),
            '|' => Some((TokenKind::BAR, "|")),
            '?' => Some((TokenKind::QMARK, "?")),
            ':' => Some((TokenKind::COLON, ":")),
            '(' => Some((TokenKind::LPAREN, "(")),
            ')' => Some((TokenKind::RPAREN, ")")),
            '[' => Some((TokenKind::LBRACK, "[")),
            ']' => Some((TokenKind::RBRACK, "]")),
            '{' => Some((TokenKind::LBRACE, "{")),
            '}' => Some((TokenKind::RBRACE, "}")),
            ',' => Some((TokenKind::COMMA, ",")),
            ';' => Some((TokenKind::SEMI, ";")),
            _ => None,
        };
        if let Some((kind, value)) = token {
            let start = self.cursor;
            self.advance_bytes(ch.len_utf8());
            self.push_simple(kind, value, start);
            return true;
        }
        false
    }

    /// `'...'` 形式の文字列リテラル。トークン値にはエスケープ解除後の内容を格納する。
    fn lex_string_literal(&mut self) -> Result<(), CompileError> {
        let start = self.cursor;
        self.advance_bytes(1); // 開始クォート
        let mut decoded = String::new();
        loop {
            let Some(ch) = self.advance_char() else {
                return Err(self.err("LEX003", "unterminated string literal", start));
            };
            match ch {
                '\'' => break,
                '\\' => {
                    let Some(e) = self.advance_char() else {
                        return Err(self.err("LEX003", "unterminated string literal", start));
                    };
                    match e {
                        'n' => decoded.push('\n'),
                        't' => decoded.push('\t'),
                        'r' => decoded.push('\r'),
                        other => decoded.push(other),
                    }
                }
                other => decoded.push(other),
            }
        }
        self.tokens.push(Token {
            kind: TokenKind::STRING,
            value: decoded,
            pos: start,
        });
        Ok(())
    }

    fn lex_number(&mut self) -> Result<(), CompileError> {
        let start = self.cursor;
        self.consume_digits();
        if self.peek_char() == Some('.') {
            self.advance_char();
            self.consume_digits();
        }
        if let Some('e') | Some('E') = self.peek_char() {
            self.advance_char();
            if let Some('+') | Some('-') = self.peek_char() {
                self.advance_char();
            }
            if self.consume_digits() == 0 {
                return Err(CompileError::new(
                    "NUM001",
                    ErrorMode::Numeric,
                    format!("malformed exponent in '{}'", &self.src[start..self.cursor]),
                    start,
                ));
            }
        }
        let end = self.cursor;
        self.push_slice(TokenKind::NUMBER, start, end);
        Ok(())
    }

    fn consume_digits(&mut self) -> usize {
        let mut count = 0;
        while let Some(ch) = self.peek_char() {
            if is_digit(ch) {
                self.advance_char();
                count += 1;
            } else {
                break;
            }
        }
        count
    }

    fn lex_identifier_or_keyword(&mut self) {
        let start = self.cursor;
        self.advance_char();
        while let Some(ch) = self.peek_char() {
            if is_ident_rest(ch) {
                self.advance_char();
            } else {
                break;
            }
        }
        let slice = &self.src[start..self.cursor];
        let kind = match slice {
            "var" => TokenKind::VAR,
            "if" => TokenKind::IF,
            "else" => TokenKind::ELSE,
            "for" => TokenKind::FOR,
            "while" => TokenKind::WHILE,
            "break" => TokenKind::BREAK,
            "continue" => TokenKind::CONTINUE,
            "true" => TokenKind::TRUE,
            "false" => TokenKind::FALSE,
            "and" => TokenKind::AND,
            "or" => TokenKind::OR,
            "xor" => TokenKind::XOR,
            "not" => TokenKind::NOT,
            _ => TokenKind::IDENT,
        };
        self.push_simple(kind, slice, start);
    }

    fn push_simple(&mut self, kind: TokenKind, value: &str, start: usize) {
        self.tokens.push(Token {
            kind,
            value: value.into(),
            pos: start,
        });
    }

    fn push_slice(&mut self, kind: TokenKind, start: usize, end: usize) {
        self.tokens.push(Token {
            kind,
            value: self.src[start..end].into(),
            pos: start,
        });
    }

    fn peek_char(&self) -> Option<char> {
        self.src[self.cursor..].chars().next()
    }

    fn peek_second_char(&self) -> Option<char> {
        let mut iter = self.src[self.cursor..].chars();
        iter.next()?;
        iter.next()
    }

    fn advance_char(&mut self) -> Option<char> {
        let ch = self.peek_char()?;
        self.advance_bytes(ch.len_utf8());
        Some(ch)
    }

    fn advance_bytes(&mut self, count: usize) {
        self.cursor = (self.cursor + count).min(self.len);
    }

    fn starts_with(&self, pattern: &str) -> bool {
        self.src[self.cursor..].starts_with(pattern)
    }

    fn err(&self, code: &'static str, message: impl Into<String>, pos: usize) -> CompileError {
        CompileError::new(code, ErrorMode::Lexer, message, pos)
    }
}

pub fn lex(src: &str) -> Result<Vec<Token>, CompileError> {
    Lexer::new(src).run()
}

/// 括弧の対応を事前検査し、不一致をトークンエラーとして列挙する。
pub fn check_brackets(tokens: &[Token]) -> Vec<CompileError> {
    let mut stack: Vec<&Token> = Vec::new();
    let mut errors = Vec::new();
    for tok in tokens {
        match tok.kind {
            TokenKind::LPAREN | TokenKind::LBRACK | TokenKind::LBRACE => stack.push(tok),
            TokenKind::RPAREN | TokenKind::RBRACK | TokenKind::RBRACE => {
                let expected = match tok.kind {
                    TokenKind::RPAREN => TokenKind::LPAREN,
                    TokenKind::RBRACK => TokenKind::LBRACK,
                    _ => TokenKind::LBRACE,
                };
                match stack.pop() {
                    Some(open) if open.kind == expected => {}
                    Some(open) => errors.push(CompileError::new(
                        "TOK001",
                        ErrorMode::Token,
                        format!("mismatched bracket '{}' closes '{}'", tok.value, open.value),
                        tok.pos,
                    )),
                    None => errors.push(CompileError::new(
                        "TOK002",
                        ErrorMode::Token,
                        format!("unexpected closing bracket '{}'", tok.value),
                        tok.pos,
                    )),
                }
            }
            _ => {}
        }
    }
    for open in stack {
        errors.push(CompileError::new(
            "TOK003",
            ErrorMode::Token,
            format!("unclosed bracket '{}'", open.value),
            open.pos,
        ));
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        lex(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    /// 代入・比較の複合記号が 1 トークンとして切り出されるか確認する。
    fn lex_compound_operators() {
        use TokenKind::*;
        assert_eq!(
            kinds("x := 1; x += 2 <> 3 <= 4"),
            vec![IDENT, ASSIGN, NUMBER, SEMI, IDENT, ADDASSIGN, NUMBER, NE, NUMBER, LE, NUMBER, EOF]
        );
        assert_eq!(kinds("a = b == c"), vec![IDENT, EQ, IDENT, EQ, IDENT, EOF]);
    }

    #[test]
    fn lex_numbers_and_keywords() {
        let toks = lex("var x := 1.5e3 + .25; for while").unwrap();
        assert_eq!(toks[0].kind, TokenKind::VAR);
        assert_eq!(toks[3].value, "1.5e3");
        assert_eq!(toks[5].value, ".25");
        assert_eq!(toks[7].kind, TokenKind::FOR);
        assert_eq!(toks[8].kind, TokenKind::WHILE);
    }

    #[test]
    /// コメントが読み飛ばされ、位置情報が元のバイトオフセットを指すことを確認する。
    fn lex_skips_comments_and_keeps_positions() {
        let toks = lex("# head\n1 // tail\n/* block */ 2").unwrap();
        assert_eq!(toks.len(), 3);
        assert_eq!(toks[0].pos, 7);
        assert_eq!(toks[1].value, "2");
    }

    #[test]
    fn lex_string_literal_unescapes() {
        let toks = lex("'a\\'b\\n'").unwrap();
        assert_eq!(toks[0].kind, TokenKind::STRING);
        assert_eq!(toks[0].value, "a'b\n");
    }

    #[test]
    fn lex_errors_carry_mode_and_position() {
        let err = lex("1 + 'abc").unwrap_err();
        assert_eq!(err.mode, ErrorMode::Lexer);
        assert_eq!(err.position, 4);
        let err = lex("2e+").unwrap_err();
        assert_eq!(err.mode, ErrorMode::Numeric);
        let err = lex("1 @ 2").unwrap_err();
        assert_eq!(err.code, "LEX090");
    }

    #[test]
    /// 行・列の解決と行テキスト抽出を検証する。
    fn line_map_locates_positions() {
        let src = "a := 1;\nbb := ;\r\nc";
        let map = LineMap::new(src);
        assert_eq!(map.locate(src, 0), (1, 0));
        assert_eq!(map.locate(src, 14), (2, 6));
        assert_eq!(map.line_text(src, 2), "bb := ;");
        assert_eq!(map.locate(src, 999), (3, 1));
        assert_eq!(map.line_text(src, 9), "");
    }

    #[test]
    fn bracket_check_reports_each_imbalance() {
        let toks = lex("(1 + [2)").unwrap();
        let errs = check_brackets(&toks);
        assert_eq!(errs.len(), 2);
        assert!(errs.iter().all(|e| e.mode == ErrorMode::Token));
        assert!(check_brackets(&lex("{ (a[1]) }").unwrap()).is_empty());
    }
}
