// パス: src/bin/exprepl.rs
// 役割: Binary entrypoint that launches the session controller
// 意図: Parse the command line, install logging, and map the session outcome to an exit code
// 関連ファイル: src/repl/cmd.rs, src/cli.rs, src/logging.rs
use std::process::ExitCode;

use clap::Parser;

use exprepl::cli::Cli;

fn main() -> ExitCode {
    let cli = Cli::parse();
    exprepl::logging::init_tracing(cli.verbose);
    exprepl::repl::run(&cli)
}
