//! # summary 子命令 CLI 定义
//!
//! ## 依赖关系
//! - 被 `cli/mod.rs` 使用
//! - 参数传递给 `commands/summary.rs`

use clap::Args;
use std::path::PathBuf;

/// summary 子命令参数
#[derive(Args, Debug)]
pub struct SummaryArgs {
    /// Defect archive written by `defectkit parse` (.json or .json.gz)
    pub archive: PathBuf,

    /// Also write the table to a CSV file
    #[arg(long)]
    pub csv: Option<PathBuf>,
}
