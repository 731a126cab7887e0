//! # defectkit - 点缺陷计算数据提取工具
//!
//! 从 VASP 体相与缺陷超胞计算中提取缺陷形成能所需的数据：识别缺陷类型与位点、
//! 确定电荷态、计算有限尺寸电荷修正（eFNV / FNV），并将结果保存为档案。
//!
//! ## 子命令
//! - `parse` - 解析缺陷计算目录
//! - `summary` - 查看档案内容
//!
//! ## 依赖关系
//! ```text
//! main.rs
//!   ├── cli/          (命令行参数定义)
//!   ├── commands/     (命令执行逻辑)
//!   │     └── analysis/    (缺陷识别、单目录与批量解析)
//!   │           ├── batch/       (目录收集、并行执行、提示汇总)
//!   │           ├── corrections/ (电荷修正)
//!   │           ├── geometry/    (结构匹配、对称性、Voronoi 节点)
//!   │           ├── parsers/     (VASP 文件解析)
//!   │           └── models/      (数据模型)
//!   ├── utils/        (输出与进度条)
//!   └── error.rs      (错误处理)
//! ```

pub mod analysis;
pub mod batch;
pub mod cli;
pub mod commands;
pub mod corrections;
pub mod error;
pub mod geometry;
pub mod models;
pub mod parsers;
pub mod utils;

pub use analysis::{ArchiveTarget, DefectsParser, ParsedBatch, ParserConfig};
pub use error::{DefectError, Result};
pub use models::{DefectArchive, DefectEntry, Dielectric};
