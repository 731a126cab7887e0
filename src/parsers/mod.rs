//! # 解析器模块
//!
//! 提供 VASP 计算输出与输入文件的解析器，以及计算目录中的文件定位。
//!
//! ## 功能
//! - 透明读取 gzip 压缩文件 (`*.gz`)
//! - 在目录中按名称前缀定位文件，多个候选时确定性地选择一个并报告
//!
//! ## 依赖关系
//! - 被 `analysis/` 模块使用
//! - 使用 `models/` 数据模型
//! - 子模块: poscar, outcar, locpot, incar

pub mod incar;
pub mod locpot;
pub mod outcar;
pub mod poscar;

use crate::error::{DefectError, Result};
use flate2::read::GzDecoder;
use glob::Pattern;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

/// 计算代码后端，在构造编排器时一次性选定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodeBackend {
    #[default]
    Vasp,
}

impl CodeBackend {
    /// 主输出文件（能量、完成标志、位点电势）
    pub fn main_output(&self) -> &'static str {
        match self {
            CodeBackend::Vasp => "OUTCAR",
        }
    }

    /// 弛豫后的结构文件
    pub fn structure_file(&self) -> &'static str {
        match self {
            CodeBackend::Vasp => "CONTCAR",
        }
    }

    /// 平面平均电势文件
    pub fn planar_potential_file(&self) -> &'static str {
        match self {
            CodeBackend::Vasp => "LOCPOT",
        }
    }
}

/// 在目录中定位到的文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedFile {
    pub path: PathBuf,
    /// 未被选中的其他候选文件名
    pub alternatives: Vec<String>,
}

impl LocatedFile {
    pub fn is_ambiguous(&self) -> bool {
        !self.alternatives.is_empty()
    }
}

/// 在 `dir` 中查找名称以 `name` 开头的文件
///
/// 优先级：精确名称 > `name.gz` > 排序后的第一个候选。
/// 找不到时返回 `Ok(None)`。
pub fn locate_file(dir: &Path, name: &str) -> Result<Option<LocatedFile>> {
    let pattern = Pattern::new(&format!("{}*", Pattern::escape(name)))
        .map_err(|e| DefectError::Other(format!("Invalid file pattern '{}': {}", name, e)))?;

    let read_dir = fs::read_dir(dir).map_err(|e| DefectError::FileReadError {
        path: dir.display().to_string(),
        source: e,
    })?;

    let mut candidates: Vec<String> = read_dir
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .filter(|file_name| pattern.matches(file_name))
        .collect();

    if candidates.is_empty() {
        return Ok(None);
    }
    candidates.sort();

    let gz_name = format!("{}.gz", name);
    let chosen = if candidates.iter().any(|c| c == name) {
        name.to_string()
    } else if candidates.iter().any(|c| *c == gz_name) {
        gz_name
    } else {
        candidates[0].clone()
    };

    let alternatives = candidates.into_iter().filter(|c| *c != chosen).collect();
    Ok(Some(LocatedFile {
        path: dir.join(chosen),
        alternatives,
    }))
}

/// 与 [`locate_file`] 相同，但找不到时返回错误
pub fn require_file(dir: &Path, name: &str) -> Result<LocatedFile> {
    locate_file(dir, name)?.ok_or_else(|| DefectError::FileNotFound {
        kind: name.to_string(),
        dir: dir.display().to_string(),
    })
}

/// 读取文本文件，`.gz` 结尾时自动解压
pub fn read_text(path: &Path) -> Result<String> {
    let file = File::open(path).map_err(|e| DefectError::FileReadError {
        path: path.display().to_string(),
        source: e,
    })?;

    let mut content = String::new();
    let read = if path.extension().map(|e| e == "gz").unwrap_or(false) {
        GzDecoder::new(file).read_to_string(&mut content)
    } else {
        let mut file = file;
        file.read_to_string(&mut content)
    };

    read.map_err(|e| DefectError::FileReadError {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(content)
}

/// 解析错误的便捷构造
pub(crate) fn parse_error(format: &str, path: &Path, reason: impl Into<String>) -> DefectError {
    DefectError::ParseError {
        format: format.to_string(),
        path: path.display().to_string(),
        reason: reason.into(),
    }
}
