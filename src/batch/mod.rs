//! # 批量处理模块
//!
//! 提供计算目录的批量发现、并行解析与提示汇总能力。
//!
//! ## 功能
//! - 发现体相与缺陷计算目录
//! - 并行处理
//! - 进度反馈与提示汇总
//!
//! ## 依赖关系
//! - 被 `analysis/defects_parser.rs` 使用
//! - 使用 `rayon` 进行并行处理
//! - 使用 `indicatif` 显示进度

pub mod collector;
pub mod reporter;
pub mod runner;

pub use collector::{CollectedFolders, FolderCollector};
pub use reporter::{BatchWarning, ParseWarning, WarningReporter};
pub use runner::{BatchResult, BatchRunner, ProcessResult};
