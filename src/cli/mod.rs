//! # CLI 模块
//!
//! 使用 `clap` 定义命令行参数和子命令。
//!
//! ## 命令结构
//! - `parse`: 解析缺陷计算目录并保存档案
//! - `summary`: 查看已保存的档案
//!
//! ## 依赖关系
//! - 被 `main.rs` 使用
//! - 子模块: parse, summary

pub mod parse;
pub mod summary;

use clap::{Parser, Subcommand};

/// defectkit - 缺陷形成能数据提取与有限尺寸电荷修正
#[derive(Parser)]
#[command(name = "defectkit")]
#[command(author = "Changjiang Wu")]
#[command(version)]
#[command(
    about = "Parse VASP defect supercell calculations and apply finite-size charge corrections",
    long_about = None
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// 可用的子命令
#[derive(Subcommand)]
pub enum Commands {
    /// Parse all defect calculations under a directory into an archive
    Parse(parse::ParseArgs),

    /// Print a table of the entries stored in a defect archive
    Summary(summary::SummaryArgs),
}
