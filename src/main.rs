//! # defectkit 命令行入口
//!
//! 解析命令行参数并分派到 `commands/`，致命错误以 `[ERR]` 输出并以状态 1 退出。

use clap::Parser;
use defectkit::cli::Cli;
use defectkit::{commands, utils};

fn main() {
    // Initialize colored output for Windows compatibility
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    let cli = Cli::parse();

    if let Err(e) = commands::run(cli.command) {
        utils::output::print_error(&format!("{}", e));
        std::process::exit(1);
    }
}
