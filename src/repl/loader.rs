// パス: src/repl/loader.rs
// 役割: `$load` と CLI 引数で指定されたプログラムファイルの読み込み
// 意図: ファイルアクセスを差し替え可能にし、失敗をセッションエラーへ変換する
// 関連ファイル: src/repl/cmd.rs, src/errors.rs
//! プログラムファイルのロード処理

use tracing::debug;

use crate::errors::SessionError;

/// REPL に必要な最小限のファイル読み込み抽象。
pub trait ReplIo {
    /// 指定されたパスの内容を 1 つのプログラムテキストとして取得する。
    fn read_to_string(&self, path: &str) -> Result<String, SessionError>;
}

/// 実際のファイルシステムにアクセスする標準実装。
#[derive(Debug, Clone, Copy, Default)]
pub struct FsIo;

impl ReplIo for FsIo {
    fn read_to_string(&self, path: &str) -> Result<String, SessionError> {
        // ハンドルはこの呼び出しの中で開閉される。
        let text =
            std::fs::read_to_string(path).map_err(|e| SessionError::file_access(path, e))?;
        debug!(path, bytes = text.len(), "program file loaded");
        Ok(text)
    }
}
