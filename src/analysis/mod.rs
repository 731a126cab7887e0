//! # 缺陷分析模块
//!
//! 从体相与缺陷计算目录中提取缺陷形成能数据：识别缺陷、确定电荷态、命名、
//! 应用有限尺寸电荷修正，并在批处理中汇总。
//!
//! ## 依赖关系
//! - 被 `commands/parse.rs` 使用
//! - 使用 `geometry/`、`corrections/`、`parsers/`、`batch/`
//! - 子模块: classifier, naming, oxidation, metadata, defect_parser, defects_parser

pub mod classifier;
pub mod defect_parser;
pub mod defects_parser;
pub mod metadata;
pub mod naming;
pub mod oxidation;

pub use classifier::{Classification, DefectClassifier};
pub use defect_parser::{BulkArtifact, BulkData, DefectParser, ParsedDefect};
pub use defects_parser::{DefectsParser, ParsedBatch};

use crate::corrections::CorrectionSettings;
use crate::geometry::DEFAULT_SYMPREC;
use crate::models::Dielectric;
use crate::parsers::CodeBackend;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// 结构匹配的默认位置容差 (Å)
pub const DEFAULT_STOL: f64 = 1.0;

/// 档案文件的保存位置
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ArchiveTarget {
    /// `{约化化学式}_defect_dict.json.gz`，位于根目录
    #[default]
    Default,
    Path(PathBuf),
    Disabled,
}

/// 解析配置，构造后只读
#[derive(Debug, Clone, PartialEq)]
pub struct ParserConfig {
    /// 显式指定的体相目录
    pub bulk_path: Option<PathBuf>,
    /// 运行子目录，None 时投票决定
    pub subfolder: Option<String>,
    pub dielectric: Option<Dielectric>,
    /// 目录名 -> 电荷态
    pub charges: BTreeMap<String, i32>,
    /// 元素 -> 氧化态
    pub oxidation_states: BTreeMap<String, i32>,
    pub skip_corrections: bool,
    /// 并行作业数，None 时自动决定
    pub processes: Option<usize>,
    pub corrections: CorrectionSettings,
    pub backend: CodeBackend,
    pub symprec: f64,
    /// 结构匹配容差 (Å)
    pub stol: f64,
    pub archive: ArchiveTarget,
    pub show_progress: bool,
}

impl Default for ParserConfig {
    fn default() -> Self {
        ParserConfig {
            bulk_path: None,
            subfolder: None,
            dielectric: None,
            charges: BTreeMap::new(),
            oxidation_states: BTreeMap::new(),
            skip_corrections: false,
            processes: None,
            corrections: CorrectionSettings::default(),
            backend: CodeBackend::default(),
            symprec: DEFAULT_SYMPREC,
            stol: DEFAULT_STOL,
            archive: ArchiveTarget::default(),
            show_progress: true,
        }
    }
}

impl ParserConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bulk_path(mut self, bulk_path: impl Into<PathBuf>) -> Self {
        self.bulk_path = Some(bulk_path.into());
        self
    }

    pub fn with_subfolder(mut self, subfolder: impl Into<String>) -> Self {
        self.subfolder = Some(subfolder.into());
        self
    }

    pub fn with_dielectric(mut self, dielectric: Dielectric) -> Self {
        self.dielectric = Some(dielectric);
        self
    }

    /// 为某个目录显式指定电荷态
    pub fn with_charge(mut self, folder: impl Into<String>, charge: i32) -> Self {
        self.charges.insert(folder.into(), charge);
        self
    }

    pub fn with_oxidation_state(mut self, element: impl Into<String>, state: i32) -> Self {
        self.oxidation_states.insert(element.into(), state);
        self
    }

    pub fn with_skip_corrections(mut self, skip: bool) -> Self {
        self.skip_corrections = skip;
        self
    }

    pub fn with_processes(mut self, processes: usize) -> Self {
        self.processes = Some(processes.max(1));
        self
    }

    pub fn with_error_tolerance(mut self, tolerance: f64) -> Self {
        self.corrections.error_tolerance = tolerance;
        self
    }

    /// 缺陷区域半径 (Å)
    pub fn with_sampling_radius(mut self, radius: f64) -> Self {
        self.corrections.sampling_radius = Some(radius);
        self
    }

    pub fn with_archive(mut self, archive: ArchiveTarget) -> Self {
        self.archive = archive;
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }
}
