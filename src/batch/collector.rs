//! # 计算目录收集器
//!
//! 在根目录下发现体相与缺陷计算目录。
//!
//! ## 功能
//! - 收集任意深度含有主输出文件的直接子目录，找不到时扩展到上级目录
//! - 按优先级列表投票决定运行子目录（vasp_ncl、vasp_std 等）
//! - 确定体相目录：显式路径，或唯一一个名称含 "bulk" 的目录
//!
//! ## 依赖关系
//! - 被 `analysis/defects_parser.rs` 调用
//! - 使用 `walkdir` 遍历目录，`glob` 匹配文件名

use crate::error::{DefectError, Result};
use glob::Pattern;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// 运行子目录名称模式，按优先级排列
pub const SUBFOLDER_PATTERNS: [&str; 4] = ["vasp_ncl", "vasp_std", "vasp_nkred_std", "vasp_gam"];

/// 收集结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedFolders {
    /// 实际搜索的根目录（可能已扩展到上级目录）
    pub root: PathBuf,
    /// 运行子目录，"." 表示目录本身
    pub subfolder: String,
    /// 体相计算目录（含主输出文件）
    pub bulk_dir: PathBuf,
    /// 缺陷目录名（相对 `root`，已排序）
    pub defect_folders: Vec<String>,
}

impl CollectedFolders {
    /// 缺陷目录对应的计算目录
    pub fn calculation_dir(&self, folder: &str) -> PathBuf {
        if self.subfolder == "." {
            self.root.join(folder)
        } else {
            self.root.join(folder).join(&self.subfolder)
        }
    }
}

/// 计算目录收集器
pub struct FolderCollector {
    /// 输入根目录
    root: PathBuf,
    /// 主输出文件名模式
    pattern: Pattern,
    /// 显式指定的体相目录
    bulk_path: Option<PathBuf>,
    /// 显式指定的运行子目录
    subfolder: Option<String>,
}

impl FolderCollector {
    /// 创建新的收集器，`output_file` 为主输出文件名（如 OUTCAR），允许任意后缀
    pub fn new(root: PathBuf, output_file: &str) -> Result<Self> {
        let pattern = Pattern::new(&format!("{}*", Pattern::escape(output_file))).map_err(|e| {
            DefectError::Other(format!("Invalid file pattern '{}': {}", output_file, e))
        })?;
        Ok(Self {
            root,
            pattern,
            bulk_path: None,
            subfolder: None,
        })
    }

    /// 设置体相目录
    pub fn with_bulk_path(mut self, bulk_path: Option<PathBuf>) -> Self {
        self.bulk_path = bulk_path;
        self
    }

    /// 设置运行子目录
    pub fn with_subfolder(mut self, subfolder: Option<String>) -> Self {
        self.subfolder = subfolder;
        self
    }

    /// 收集体相与缺陷目录
    pub fn collect(&self) -> Result<CollectedFolders> {
        if !self.root.is_dir() {
            return Err(DefectError::DirectoryNotFound {
                path: self.root.display().to_string(),
            });
        }

        let mut root = self.root.clone();
        let mut candidates = self.candidate_folders(&root, |_| true)?;

        if candidates.is_empty() {
            // 根目录本身可能就是某个缺陷目录
            if let Some(parent) = self.root.parent().filter(|p| p.is_dir()) {
                let own_name = dir_name(&self.root);
                let bulk_name = self.bulk_path.as_ref().map(|p| dir_name(p).to_lowercase());
                let widened = self.candidate_folders(parent, |name| {
                    let lower = name.to_lowercase();
                    (!own_name.is_empty() && name.contains(own_name.as_str()))
                        || lower.contains("bulk")
                        || bulk_name.as_ref().is_some_and(|b| lower.contains(b.as_str()))
                })?;
                if !widened.is_empty() {
                    root = parent.to_path_buf();
                    candidates = widened;
                }
            }
        }

        if candidates.is_empty() {
            return Err(DefectError::NoDefectFolders {
                path: self.root.display().to_string(),
            });
        }

        let subfolder = match &self.subfolder {
            Some(s) => s.clone(),
            None => vote_subfolder(&root, &candidates),
        };

        let explicit_bulk = self.bulk_path.as_ref().map(|p| dir_name(p).to_lowercase());
        let bulk_folders: Vec<&String> = candidates
            .iter()
            .filter(|name| {
                name.to_lowercase().contains("bulk")
                    || explicit_bulk.as_ref() == Some(&name.to_lowercase())
            })
            .collect();

        let bulk_root = self.resolve_bulk_root(&root, &bulk_folders)?;
        let bulk_dir = self.resolve_bulk_dir(&bulk_root, &subfolder)?;

        let mut defect_folders: Vec<String> = candidates
            .iter()
            .filter(|name| !bulk_folders.contains(name))
            .filter(|name| subfolder == "." || root.join(name).join(&subfolder).is_dir())
            .cloned()
            .collect();
        defect_folders.sort();

        Ok(CollectedFolders {
            root,
            subfolder,
            bulk_dir,
            defect_folders,
        })
    }

    /// 任意深度含有主输出文件的直接子目录
    fn candidate_folders<F>(&self, dir: &Path, keep: F) -> Result<Vec<String>>
    where
        F: Fn(&str) -> bool,
    {
        let read_dir = fs::read_dir(dir).map_err(|e| DefectError::FileReadError {
            path: dir.display().to_string(),
            source: e,
        })?;

        let mut folders: Vec<String> = read_dir
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .filter(|name| keep(name.as_str()))
            .filter(|name| self.contains_output(&dir.join(name)))
            .collect();
        folders.sort();
        Ok(folders)
    }

    /// 目录树中是否有主输出文件
    fn contains_output(&self, dir: &Path) -> bool {
        WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .any(|e| self.matches(e.path()))
    }

    /// 目录中（不递归）是否有主输出文件
    fn has_output(&self, dir: &Path) -> bool {
        WalkDir::new(dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .any(|e| self.matches(e.path()))
    }

    fn matches(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .map(|n| self.pattern.matches(n))
            .unwrap_or(false)
    }

    /// 体相顶层目录：显式路径，或唯一的 bulk 目录，或唯一以 `_bulk` 结尾的目录
    fn resolve_bulk_root(&self, root: &Path, bulk_folders: &[&String]) -> Result<PathBuf> {
        if let Some(path) = &self.bulk_path {
            if path.is_dir() {
                return Ok(path.clone());
            }
            if path.is_relative() && root.join(path).is_dir() {
                return Ok(root.join(path));
            }
            if bulk_folders.len() == 1 {
                return Ok(root.join(bulk_folders[0]));
            }
            return Err(DefectError::AmbiguousBulk {
                root: root.display().to_string(),
                reason: format!(
                    "the bulk calculation folder '{}' does not exist",
                    path.display()
                ),
            });
        }

        if bulk_folders.len() == 1 {
            return Ok(root.join(bulk_folders[0]));
        }
        let suffixed: Vec<&&String> = bulk_folders
            .iter()
            .filter(|name| name.to_lowercase().ends_with("_bulk"))
            .collect();
        if suffixed.len() == 1 {
            return Ok(root.join(suffixed[0]));
        }

        Err(DefectError::AmbiguousBulk {
            root: root.display().to_string(),
            reason: format!(
                "found {} folders containing calculation outputs and 'bulk' in the folder name; \
                 specify the bulk path explicitly",
                bulk_folders.len()
            ),
        })
    }

    /// 体相计算目录：bulk/subfolder > bulk > bulk 下唯一含主输出文件的子目录
    fn resolve_bulk_dir(&self, bulk_root: &Path, subfolder: &str) -> Result<PathBuf> {
        let with_subfolder = bulk_root.join(subfolder);
        if subfolder != "." && with_subfolder.is_dir() && self.has_output(&with_subfolder) {
            return Ok(with_subfolder);
        }
        if self.has_output(bulk_root) {
            return Ok(bulk_root.to_path_buf());
        }

        let read_dir = fs::read_dir(bulk_root).map_err(|e| DefectError::FileReadError {
            path: bulk_root.display().to_string(),
            source: e,
        })?;
        let subdirs: Vec<PathBuf> = read_dir
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir() && self.has_output(p))
            .collect();
        if subdirs.len() == 1 && self.subfolder.is_none() {
            return Ok(subdirs[0].clone());
        }

        Err(DefectError::AmbiguousBulk {
            root: bulk_root.display().to_string(),
            reason: format!(
                "no calculation output found in the bulk folder or its '{}' subfolder",
                subfolder
            ),
        })
    }
}

/// 投票决定运行子目录：匹配数最多的模式胜出，平票按优先级，都不匹配时为 "."
pub fn vote_subfolder(root: &Path, folders: &[String]) -> String {
    let subdirs: Vec<String> = folders
        .iter()
        .filter_map(|folder| fs::read_dir(root.join(folder)).ok())
        .flat_map(|read_dir| {
            read_dir
                .filter_map(|e| e.ok())
                .filter(|e| e.path().is_dir())
                .filter_map(|e| e.file_name().to_str().map(str::to_string))
                .collect::<Vec<_>>()
        })
        .filter(|name| name.contains("vasp_"))
        .collect();

    let mut best: Option<(&str, usize)> = None;
    for pattern in SUBFOLDER_PATTERNS {
        let count = subdirs.iter().filter(|s| s.contains(pattern)).count();
        if count > 0 && best.map_or(true, |(_, c)| count > c) {
            best = Some((pattern, count));
        }
    }
    best.map(|(p, _)| p.to_string())
        .unwrap_or_else(|| ".".to_string())
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}
