//! # 统一错误处理模块
//!
//! 定义 defectkit 的所有错误类型，使用 `thiserror` 派生。
//!
//! ## 错误分级
//! - 致命错误：体相目录不明确、没有任何条目解析成功、重命名后名称冲突
//! - 单目录错误：在编排器中被捕获并转换为 `ParseWarning::ParsingFailed`
//! - 提示性问题不在此处，见 `batch::reporter`
//!
//! ## 依赖关系
//! - 被所有其他模块使用
//! - 无外部模块依赖

use thiserror::Error;

/// defectkit 统一错误类型
#[derive(Error, Debug)]
pub enum DefectError {
    // ─────────────────────────────────────────────────────────────
    // I/O 错误
    // ─────────────────────────────────────────────────────────────
    #[error("Failed to read file: {path}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file: {path}")]
    FileWriteError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Directory not found: {path}")]
    DirectoryNotFound { path: String },

    #[error("No {kind} file found in {dir}")]
    FileNotFound { kind: String, dir: String },

    // ─────────────────────────────────────────────────────────────
    // 解析错误
    // ─────────────────────────────────────────────────────────────
    #[error("Failed to parse {format} file: {path}\nReason: {reason}")]
    ParseError {
        format: String,
        path: String,
        reason: String,
    },

    #[error("Calculation in {path} did not finish (no timing footer in OUTCAR)")]
    UnfinishedCalculation { path: String },

    #[error("Could not determine the charge state of {folder}: {reason}")]
    ChargeStateUnknown { folder: String, reason: String },

    // ─────────────────────────────────────────────────────────────
    // 缺陷识别错误
    // ─────────────────────────────────────────────────────────────
    #[error(
        "Could not map the defect supercell onto the bulk supercell: {reason}\n\
         Check that the bulk and defect calculations use the same lattice vectors \
         and basis (e.g. the defect supercell was generated from this bulk supercell), \
         or supply the bulk calculation explicitly."
    )]
    SiteCorrespondence { reason: String },

    #[error("Invalid structure: {0}")]
    InvalidStructure(String),

    // ─────────────────────────────────────────────────────────────
    // 电荷修正错误
    // ─────────────────────────────────────────────────────────────
    #[error("{scheme} charge correction failed: {reason}")]
    CorrectionFailed { scheme: String, reason: String },

    #[error("Invalid dielectric: {0}")]
    InvalidDielectric(String),

    // ─────────────────────────────────────────────────────────────
    // 批处理致命错误
    // ─────────────────────────────────────────────────────────────
    #[error("Could not identify the bulk calculation in {root}: {reason}")]
    AmbiguousBulk { root: String, reason: String },

    #[error("No defect calculations found in {path}")]
    NoDefectFolders { path: String },

    #[error("No defect entries were parsed successfully from {path}:\n{details}")]
    NoEntriesParsed { path: String, details: String },

    #[error(
        "Entry name '{name}' is shared by several calculations ({folders}) \
         even after canonical renaming. Rename the folders so each has a distinct defect name."
    )]
    NameCollision { name: String, folders: String },

    // ─────────────────────────────────────────────────────────────
    // 参数错误
    // ─────────────────────────────────────────────────────────────
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // ─────────────────────────────────────────────────────────────
    // 序列化错误
    // ─────────────────────────────────────────────────────────────
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────
    // 其他
    // ─────────────────────────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, DefectError>;
