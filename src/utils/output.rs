//! # 美化输出工具
//!
//! 提供统一的终端输出样式。多行提示的后续行缩进对齐到前缀之后。
//!
//! ## 依赖关系
//! - 被 `commands/` 模块与 `main.rs` 使用
//! - 使用 `colored` crate

use colored::Colorize;

/// 标题栏与分隔线宽度
const RULE_WIDTH: usize = 72;

/// 多行消息的后续行缩进
fn indent_continuation(msg: &str, prefix_width: usize) -> String {
    let pad = " ".repeat(prefix_width + 1);
    msg.lines()
        .enumerate()
        .map(|(i, line)| {
            if i == 0 || line.is_empty() {
                line.to_string()
            } else {
                format!("{}{}", pad, line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// 打印成功消息
pub fn print_success(msg: &str) {
    println!("{} {}", "[OK]".green().bold(), msg);
}

/// 打印错误消息（stderr）
pub fn print_error(msg: &str) {
    eprintln!("{} {}", "[ERR]".red().bold(), indent_continuation(msg, 5));
}

/// 打印警告消息
pub fn print_warning(msg: &str) {
    println!("{} {}", "[WARN]".yellow().bold(), indent_continuation(msg, 6));
}

/// 打印信息消息
pub fn print_info(msg: &str) {
    println!("{} {}", "[*]".blue().bold(), msg);
}

/// 打印跳过消息
pub fn print_skip(msg: &str) {
    println!("{} {}", "[SKIP]".dimmed(), msg);
}

/// 打印完成消息
pub fn print_done(msg: &str) {
    println!("{} {}", "[DONE]".green().bold(), msg);
}

/// 打印标题栏
pub fn print_header(title: &str) {
    let line = "─".repeat(RULE_WIDTH);
    println!("\n{}", line.dimmed());
    println!("  {}", title.bold());
    println!("{}\n", line.dimmed());
}

/// 打印分隔线
pub fn print_separator() {
    println!("{}", "─".repeat(RULE_WIDTH).dimmed());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indent_continuation() {
        assert_eq!(
            indent_continuation("first\nsecond\n\nthird", 6),
            "first\n       second\n\n       third"
        );
        assert_eq!(indent_continuation("single", 6), "single");
    }
}
