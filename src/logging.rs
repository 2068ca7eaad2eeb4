// パス: src/logging.rs
// 役割: tracing サブスクライバの初期化
// 意図: 診断ログを標準エラーへ分離し、標準出力の表示内容を変えない
// 関連ファイル: src/bin/exprepl.rs, src/cli.rs
//! ログ初期化。フィルタは `-v` の回数だけで決まり、環境変数は読まない。

use std::sync::Once;

static TRACING_INIT: Once = Once::new();

/// `-v` の回数に対応するフィルタ指定。
pub fn filter_directive(verbosity: u8) -> String {
    let level = match verbosity {
        0 => "error",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    format!("exprepl={}", level)
}

/// サブスクライバを一度だけ登録する。2 回目以降の呼び出しは無視される。
pub fn init_tracing(verbosity: u8) {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        let filter = EnvFilter::new(filter_directive(verbosity));
        let _ = tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_level(true),
            )
            .with(filter)
            .try_init();
    });
}
